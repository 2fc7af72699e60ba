use lmcs::{Database, DatabaseConfig, Filter, Query, SortDirection, Value};
use serde_json::json;

#[test]
fn simple_insert_find_update_remove_round_trip() {
    let mut db = Database::open(DatabaseConfig::in_memory()).unwrap();

    let inserted = db
        .insert("users", json!({"name": "Ada", "age": 36}))
        .unwrap();
    let id = inserted.get("_id").unwrap().as_str().unwrap().to_string();

    let found = db
        .find_one("users", &Query::new().with_filter(Filter::eq("_id", Value::String(id.clone()))))
        .unwrap()
        .unwrap();
    assert_eq!(found.get("name"), Some(&Value::String("Ada".into())));

    db.update("users", &id, json!({"age": 37})).unwrap();
    let updated = db
        .find_one("users", &Query::new().with_filter(Filter::eq("_id", Value::String(id.clone()))))
        .unwrap()
        .unwrap();
    assert_eq!(updated.get("age"), Some(&Value::Number(37.0)));

    db.remove("users", &id).unwrap();
    assert_eq!(db.count("users", None).unwrap(), 0);
}

#[test]
fn query_sort_skip_limit_across_many_documents() {
    let mut db = Database::open(DatabaseConfig::in_memory()).unwrap();
    for i in 0..10 {
        db.insert("scores", json!({"n": i})).unwrap();
    }

    let page = db
        .find_all(
            "scores",
            &Query::new().sort_by("n", SortDirection::Desc).skip(2).limit(3),
        )
        .unwrap();
    let values: Vec<f64> = page.iter().map(|d| d.get("n").unwrap().as_f64().unwrap()).collect();
    assert_eq!(values, vec![7.0, 6.0, 5.0]);
}

#[test]
fn query_operators_combine_with_and_or() {
    let mut db = Database::open(DatabaseConfig::in_memory()).unwrap();
    db.insert("products", json!({"name": "widget", "price": 9, "tags": ["sale"]})).unwrap();
    db.insert("products", json!({"name": "gadget", "price": 99, "tags": []})).unwrap();
    db.insert("products", json!({"name": "gizmo", "price": 50, "tags": ["sale", "new"]})).unwrap();

    let filter = lmcs::query::parse_filter(&json!({
        "$or": [
            {"price": {"$lt": 10}},
            {"$and": [{"price": {"$gte": 50}}, {"tags": {"$contains": "sale"}}]}
        ]
    }))
    .unwrap();

    let matches = db.find_all("products", &Query::new().with_filter(filter)).unwrap();
    let names: Vec<String> = matches
        .iter()
        .map(|d| d.get("name").unwrap().as_str().unwrap().to_string())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"widget".to_string()));
    assert!(names.contains(&"gizmo".to_string()));
}

#[test]
fn duplicate_id_is_rejected() {
    let mut db = Database::open(DatabaseConfig::in_memory()).unwrap();
    db.insert("users", json!({"_id": "fixed", "name": "Ada"})).unwrap();
    let result = db.insert("users", json!({"_id": "fixed", "name": "Grace"}));
    assert!(result.is_err());
}

#[test]
fn updating_missing_document_is_an_error() {
    let mut db = Database::open(DatabaseConfig::in_memory()).unwrap();
    let result = db.update("users", "nonexistent", json!({"age": 1}));
    assert!(result.is_err());
}
