// Archivo: stubs.rs
// Propósito: implementación en memoria del almacén para pruebas y wiring
// rápido. Misma semántica de filtros, índices y locks por tabla que
// `JsonDatabaseClient`, sin durabilidad.
use crate::client::{DatabaseAdministration, DatabaseClient};
use crate::document::{Document, Filter, IndexDefinition, OrderBy};
use crate::errors::{Result, StoreError};
use crate::operations;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type Table = Arc<Mutex<Vec<Document>>>;

// Minimal in-memory store for tests and examples (not durable)
pub struct InMemoryDatabaseClient {
    /// Filas por tabla; cada tabla tiene su propio mutex.
    tables: DashMap<String, Table>,
    /// Declaraciones de índices.
    indexes: Mutex<Vec<IndexDefinition>>,
}

impl InMemoryDatabaseClient {
    /// Crea un almacén vacío.
    pub fn new() -> Self {
        Self { tables: DashMap::new(), indexes: Mutex::new(Vec::new()) }
    }

    /// Tabla para escribir; se crea si no existe.
    fn table(&self, table: &str) -> Table {
        self.tables.entry(table.to_string()).or_default().clone()
    }

    /// Tabla para leer; una tabla inexistente no se crea.
    fn existing_table(&self, table: &str) -> Option<Table> {
        self.tables.get(table).map(|entry| entry.value().clone())
    }

    /// Helper para mapear `Mutex::lock()` en un `Result` con
    /// `StoreError::InvalidDocument`.
    fn lock<'a, T>(&self, m: &'a Mutex<T>) -> std::result::Result<MutexGuard<'a, T>, StoreError> {
        m.lock().map_err(|e| StoreError::InvalidDocument(format!("mutex poisoned: {:?}", e)))
    }

    fn table_indexes(&self, table: &str) -> Result<Vec<IndexDefinition>> {
        Ok(self.lock(&self.indexes)?.iter().filter(|i| i.table == table).cloned().collect())
    }
}

impl Default for InMemoryDatabaseClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseClient for InMemoryDatabaseClient {
    fn count(&self, table: &str, filter: &Filter) -> Result<usize> {
        let Some(handle) = self.existing_table(table) else {
            return Ok(0);
        };
        let rows = self.lock(&handle)?;
        Ok(rows.iter().filter(|row| filter.matches(row)).count())
    }

    fn find_many(&self,
                 table: &str,
                 filter: &Filter,
                 skip: usize,
                 limit: Option<usize>,
                 order_by: &[OrderBy])
                 -> Result<Vec<Document>> {
        let Some(handle) = self.existing_table(table) else {
            return Ok(Vec::new());
        };
        let rows = self.lock(&handle)?;
        Ok(operations::select(rows.clone(), filter, skip, limit, order_by))
    }

    fn find_one(&self, table: &str, filter: &Filter) -> Result<Option<Document>> {
        let Some(handle) = self.existing_table(table) else {
            return Ok(None);
        };
        let rows = self.lock(&handle)?;
        Ok(rows.iter().find(|row| filter.matches(row)).cloned())
    }

    fn insert_one(&self, table: &str, document: Document) -> Result<()> {
        self.insert_many(table, vec![document])
    }

    fn insert_many(&self, table: &str, documents: Vec<Document>) -> Result<()> {
        let handle = self.table(table);
        let mut rows = self.lock(&handle)?;
        let indexes = self.table_indexes(table)?;
        operations::check_unique(table, &indexes, &rows, &documents)?;
        rows.extend(documents);
        Ok(())
    }

    fn update_one(&self, table: &str, filter: &Filter, update: Document) -> Result<bool> {
        let Some(handle) = self.existing_table(table) else {
            return Ok(false);
        };
        let mut rows = self.lock(&handle)?;
        Ok(operations::update_first(&mut rows, filter, update))
    }

    fn delete_one(&self, table: &str, filter: &Filter) -> Result<bool> {
        let Some(handle) = self.existing_table(table) else {
            return Ok(false);
        };
        let mut rows = self.lock(&handle)?;
        Ok(operations::delete_first(&mut rows, filter))
    }

    fn list_tables(&self) -> Result<Vec<String>> {
        let mut tables: Vec<String> = self.tables.iter().map(|e| e.key().clone()).collect();
        tables.sort();
        Ok(tables)
    }
}

impl DatabaseAdministration for InMemoryDatabaseClient {
    fn create_index(&self, table: &str, identifier: &str, fields: &[&str], is_unique: bool) -> Result<()> {
        let definition = IndexDefinition { table: table.to_string(),
                                           identifier: identifier.to_string(),
                                           field_collection: fields.iter().map(|f| f.to_string()).collect(),
                                           is_unique };
        // mismo orden que `insert_many`: tabla y luego índices
        let handle = self.existing_table(table);
        let _rows = match &handle {
            Some(handle) => Some(self.lock(handle)?),
            None => None,
        };
        operations::upsert_index(&mut *self.lock(&self.indexes)?, definition);
        Ok(())
    }

    fn list_indexes(&self, table: &str) -> Result<Vec<IndexDefinition>> {
        self.table_indexes(table)
    }

    fn list_all_indexes(&self) -> Result<Vec<IndexDefinition>> {
        Ok(self.lock(&self.indexes)?.clone())
    }
}
