//! Crate `document_store` — almacén documental orientado a tablas
//!
//! Este crate define el contrato de persistencia genérico (`DatabaseClient`
//! y `DatabaseAdministration`) sobre el que se apoyan los proveedores de
//! runs, jobs y tareas. No conoce la semántica de runs ni de jobs: sólo
//! maneja tablas de documentos JSON, filtros por ruta, ordenación,
//! paginación e índices únicos.
//!
//! Implementaciones:
//! - `JsonDatabaseClient`: un fichero JSON por tabla, reescrito de forma
//!   atómica (temporal + rename) bajo un lock exclusivo por tabla.
//! - `InMemoryDatabaseClient`: misma semántica sin disco, útil para pruebas.
//!
//! Ejemplo rápido:
//! ```rust
//! use document_store::{DatabaseClient, Filter, InMemoryDatabaseClient};
//! use serde_json::json;
//! let client = InMemoryDatabaseClient::new();
//! let doc = json!({"id": 1, "key": "value"}).as_object().cloned().unwrap();
//! client.insert_one("record", doc).unwrap();
//! assert_eq!(client.count("record", &Filter::new()).unwrap(), 1);
//! ```
pub mod client;
pub mod document;
pub mod errors;
pub mod file_lock;
pub mod import_export;
pub mod json_client;
mod operations;
pub mod stubs;

pub use client::*;
pub use document::*;
pub use errors::*;
pub use file_lock::FileLock;
pub use import_export::{export_database, import_database};
pub use json_client::JsonDatabaseClient;
pub use stubs::InMemoryDatabaseClient;
