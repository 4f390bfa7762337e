// Archivo: client.rs
// Propósito: definir los traits `DatabaseClient` y `DatabaseAdministration`.
// Describe el contrato que deben implementar los almacenes (ficheros JSON,
// memoria, etc.).
use crate::document::{Document, Filter, IndexDefinition, OrderBy};
use crate::errors::Result;

/// Contrato del almacén documental.
///
/// Todas las operaciones sobre una misma tabla se serializan; operaciones
/// sobre tablas distintas no se bloquean entre sí.
pub trait DatabaseClient: Send + Sync {
    /// Cuenta los documentos de `table` que cumplen `filter`.
    fn count(&self, table: &str, filter: &Filter) -> Result<usize>;

    /// Devuelve los documentos que cumplen `filter`, ordenados por
    /// `order_by` y recortados con `skip`/`limit`.
    fn find_many(&self,
                 table: &str,
                 filter: &Filter,
                 skip: usize,
                 limit: Option<usize>,
                 order_by: &[OrderBy])
                 -> Result<Vec<Document>>;

    /// Devuelve el primer documento que cumple `filter`, si existe.
    fn find_one(&self, table: &str, filter: &Filter) -> Result<Option<Document>>;

    /// Inserta un documento. Falla con `StoreError::DuplicateKey` si viola un
    /// índice único.
    fn insert_one(&self, table: &str, document: Document) -> Result<()>;

    /// Inserta varios documentos de forma atómica: o entran todos o ninguno.
    fn insert_many(&self, table: &str, documents: Vec<Document>) -> Result<()>;

    /// Mezcla los campos de `update` en el primer documento que cumple
    /// `filter`. Devuelve `false` si nada coincide (no-op).
    fn update_one(&self, table: &str, filter: &Filter, update: Document) -> Result<bool>;

    /// Elimina el primer documento que cumple `filter`.
    fn delete_one(&self, table: &str, filter: &Filter) -> Result<bool>;

    /// Lista las tablas existentes.
    fn list_tables(&self) -> Result<Vec<String>>;
}

/// Operaciones de administración (declaración de índices).
pub trait DatabaseAdministration: Send + Sync {
    /// Declara (o reemplaza) un índice sobre `table`. Los índices únicos sólo
    /// se comprueban al insertar.
    fn create_index(&self, table: &str, identifier: &str, fields: &[&str], is_unique: bool) -> Result<()>;

    /// Lista los índices declarados para `table`.
    fn list_indexes(&self, table: &str) -> Result<Vec<IndexDefinition>>;

    /// Lista todas las declaraciones, también las de tablas aún vacías.
    fn list_all_indexes(&self) -> Result<Vec<IndexDefinition>>;
}
