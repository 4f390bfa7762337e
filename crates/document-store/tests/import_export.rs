use document_store::{export_database, import_database, DatabaseAdministration, DatabaseClient, Document, Filter,
                     InMemoryDatabaseClient, JsonDatabaseClient, StoreError};
use serde_json::{json, Value};
use std::collections::BTreeSet;

fn doc(value: Value) -> Document {
  value.as_object().cloned().unwrap()
}

fn identifiers(client: &dyn DatabaseClient, table: &str) -> BTreeSet<String> {
  client.find_many(table, &Filter::new(), 0, None, &[])
        .unwrap()
        .iter()
        .map(|d| d["identifier"].as_str().unwrap().to_string())
        .collect()
}

fn source(directory: &std::path::Path) -> JsonDatabaseClient {
  let source = JsonDatabaseClient::new(directory);
  source.create_index("run", "identifier_unique", &["identifier"], true).unwrap();
  source.create_index("task", "identifier_unique", &["identifier"], true).unwrap();
  source.insert_one("job", doc(json!({"identifier": "my-job", "project": "my-project"}))).unwrap();
  source.insert_many("run",
                     vec![doc(json!({"identifier": "r1", "job": "my-job"})),
                          doc(json!({"identifier": "r2", "job": "my-job"}))])
        .unwrap();
  source
}

fn check_import<C: DatabaseClient + DatabaseAdministration>(source: &JsonDatabaseClient,
                                                           target: &C,
                                                           directory: &std::path::Path) {
  assert_eq!(import_database(target, directory).unwrap(), vec!["job".to_string(), "run".to_string()]);
  for table in ["job", "run"] {
    assert_eq!(target.count(table, &Filter::new()).unwrap(), source.count(table, &Filter::new()).unwrap());
    assert_eq!(identifiers(target, table), identifiers(source, table));
  }
  // los índices únicos viajan con los datos, también los de tablas vacías
  assert_eq!(target.list_indexes("run").unwrap(), source.list_indexes("run").unwrap());
  assert_eq!(target.list_indexes("task").unwrap().len(), 1);
  let duplicate = target.insert_one("run", doc(json!({"identifier": "r1"}))).unwrap_err();
  assert!(matches!(duplicate, StoreError::DuplicateKey { .. }));
}

#[test]
fn export_then_import_preserves_counts_identifiers_and_indexes() {
  let dir = tempfile::tempdir().unwrap();
  let source = source(&dir.path().join("source"));

  let intermediate = dir.path().join("export");
  let exported = export_database(&source, &intermediate).unwrap();
  assert_eq!(exported, vec!["job".to_string(), "run".to_string()]);
  assert!(intermediate.join("admin.json").exists());

  check_import(&source, &JsonDatabaseClient::new(dir.path().join("target")), &intermediate);
  check_import(&source, &InMemoryDatabaseClient::new(), &intermediate);
}

#[test]
fn import_rejects_duplicates_that_violate_exported_indexes() {
  let dir = tempfile::tempdir().unwrap();
  let intermediate = dir.path().join("export");
  export_database(&source(&dir.path().join("source")), &intermediate).unwrap();
  std::fs::write(intermediate.join("run.json"),
                 serde_json::to_vec(&json!([{"identifier": "r1"}, {"identifier": "r1"}])).unwrap()).unwrap();

  let target = InMemoryDatabaseClient::new();
  assert!(matches!(import_database(&target, &intermediate), Err(StoreError::DuplicateKey { .. })));
  assert_eq!(target.count("run", &Filter::new()).unwrap(), 0);
}
