use std::path::PathBuf;

use log::info;
use serde_json::json;

use lmcs::{Database, DatabaseConfig, Query};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = DatabaseConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--data-dir" | "-d" => {
                if i + 1 < args.len() {
                    config.custom_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            other => {
                eprintln!("unrecognized argument: {}", other);
            }
        }
        i += 1;
    }

    let mut db = Database::open(config)?;
    info!("database opened");

    db.insert("users", json!({"name": "Ada Lovelace", "role": "engineer"}))?;
    db.insert("users", json!({"name": "Grace Hopper", "role": "engineer"}))?;

    let engineers = db.find_all("users", &Query::new())?;
    info!("{} user(s) on file", engineers.len());
    for user in engineers {
        println!("{}", serde_json::to_string(&lmcs::Value::Object(user).to_json())?);
    }

    db.close()?;
    Ok(())
}
