use jsondb::{callback_ref, CallbackRegistry, Database, Document, Options, Query};
use serde_json::json;
use std::path::Path;

fn main() {
    env_logger::init();
    log::info!("Starting jsondb quickstart");

    let data_dir = std::env::var("JSONDB_DATA_DIR").unwrap_or_else(|_| "jsondb-data".to_string());
    let options = match std::env::var("JSONDB_OPTIONS") {
        Ok(path) => Options::from_yaml_file(Path::new(&path)).expect("Failed to read options"),
        Err(_) => Options::default(),
    };

    log::info!("Opening database at: {data_dir}");
    let db = Database::open_with_options(&data_dir, options).expect("Failed to open database");
    let users = db.collection("users").expect("Failed to open users collection");

    let alice = Document::new(json!({"name": "username1", "email": "username1@example.com"}))
        .expect("valid document");
    let bob = Document::new(json!({"name": "username2", "email": "username2@example.com"}))
        .expect("valid document");
    let inserted = users.insert_many([alice, bob]).expect("insert failed");
    log::info!("Inserted {} documents", inserted.iter().count());

    let deleted = users.delete_one(json!({"name": "username1"})).expect("delete failed");
    println!("deleted username1: {deleted}");

    // Callbacks are opt-in: the document stores a name, the application owns the code
    let mut callbacks = CallbackRegistry::new();
    callbacks.register("greet", |doc: &Document| {
        json!(format!("hello from {}", doc.get_string("name", "nobody")))
    });
    users
        .insert(json!({"name": "username3", "on_login": callback_ref("greet")}))
        .expect("insert failed");

    let found = users.query(json!({"name": "username2"})).expect("query failed");
    println!("query name=username2: {}", found.len());
    let third = users.search_one("name", "username3").expect("search failed");
    println!("search name=username3: {:?}", third.map(|d| d.id().to_string()));
    println!(
        "documents with name and email: {}",
        users.by_containing_keys(&["name", "email"]).expect("query").len()
    );

    if let Some(doc) = users.find_one(Query::new().field("name", "username3")).expect("query") {
        println!("callback says: {:?}", doc.invoke("on_login", &callbacks));
    }

    let count = users.len();
    let updated = users
        .update_many(Query::all(), json!({"collection_length": count}))
        .expect("update failed");
    println!("updated all: {updated}");

    if users.len() >= 10 {
        println!("cleared: {}", users.delete_many(Query::all()).expect("delete failed"));
    }

    let stats = users.stats();
    log::info!(
        "users: {} documents, {} flushes, {} pending",
        users.len(),
        stats.flushes,
        stats.pending
    );

    db.close().expect("Failed to close database");
    log::info!("Closed database");
}
