// Archivo: import_export.rs
// Propósito: exportar todas las tablas de un almacén a un directorio (un
// fichero `<tabla>.json` por tabla más `admin.json` con los índices) y
// reimportarlas en otro almacén.
use crate::client::{DatabaseAdministration, DatabaseClient};
use crate::document::{Document, Filter};
use crate::errors::{Result, StoreError};
use crate::json_client::{AdministrationData, ADMIN_TABLE};
use std::path::Path;

/// Exporta cada tabla de `client` a `<directory>/<tabla>.json` y las
/// declaraciones de índices a `<directory>/admin.json`.
/// Devuelve los nombres de las tablas exportadas.
pub fn export_database<C>(client: &C, directory: &Path) -> Result<Vec<String>>
    where C: DatabaseClient + DatabaseAdministration + ?Sized
{
    std::fs::create_dir_all(directory)?;
    let administration = AdministrationData { indexes: client.list_all_indexes()? };
    log::info!("Exportando {} índices", administration.indexes.len());
    std::fs::write(directory.join(format!("{}.json", ADMIN_TABLE)), serde_json::to_vec_pretty(&administration)?)?;

    let tables = client.list_tables()?;
    for table in tables.iter() {
        let rows = client.find_many(table, &Filter::new(), 0, None, &[])?;
        log::info!("Exportando tabla {} ({} documentos)", table, rows.len());
        std::fs::write(directory.join(format!("{}.json", table)), serde_json::to_vec_pretty(&rows)?)?;
    }
    Ok(tables)
}

/// Importa en `client` los índices de `admin.json` (si existe) y después
/// cada fichero `<tabla>.json` de `directory`, de modo que los índices
/// únicos ya se comprueban al insertar. Devuelve los nombres de las tablas
/// importadas.
pub fn import_database<C>(client: &C, directory: &Path) -> Result<Vec<String>>
    where C: DatabaseClient + DatabaseAdministration + ?Sized
{
    let administration_path = directory.join(format!("{}.json", ADMIN_TABLE));
    if administration_path.exists() {
        let administration: AdministrationData =
            serde_json::from_str(&std::fs::read_to_string(&administration_path)?)?;
        for index in administration.indexes.iter() {
            let fields: Vec<&str> = index.field_collection.iter().map(String::as_str).collect();
            client.create_index(&index.table, &index.identifier, &fields, index.is_unique)?;
        }
        log::info!("Importados {} índices", administration.indexes.len());
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            files.push(path);
        }
    }
    files.sort();

    let mut tables = Vec::new();
    for path in files {
        let table = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) if stem != ADMIN_TABLE => stem.to_string(),
            _ => continue,
        };
        let content = std::fs::read_to_string(&path)?;
        let rows: Vec<serde_json::Value> = serde_json::from_str(&content)?;
        let documents = rows.into_iter()
                            .map(|row| match row {
                                serde_json::Value::Object(map) => Ok(map),
                                other => Err(StoreError::InvalidDocument(format!("{}: {}", path.display(), other))),
                            })
                            .collect::<Result<Vec<Document>>>()?;
        log::info!("Importando tabla {} ({} documentos)", table, documents.len());
        if !documents.is_empty() {
            client.insert_many(&table, documents)?;
        }
        tables.push(table);
    }
    Ok(tables)
}
