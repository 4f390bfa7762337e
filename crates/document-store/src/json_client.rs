// Archivo: json_client.rs
// Propósito: implementar `DatabaseClient` y `DatabaseAdministration` sobre
// un directorio con un fichero JSON por tabla.
//
// Cada operación toma un lock exclusivo por tabla (mutex en proceso +
// lock de fichero `<tabla>.lock`) antes de leer y lo suelta después de
// confirmar el nuevo contenido. La escritura es siempre
// `<tabla>.json.tmp` + rename atómico.
use crate::client::{DatabaseAdministration, DatabaseClient};
use crate::document::{Document, Filter, IndexDefinition, OrderBy};
use crate::errors::{Result, StoreError};
use crate::file_lock::FileLock;
use crate::operations;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Tabla reservada para las declaraciones de índices.
pub(crate) const ADMIN_TABLE: &str = "admin";

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct AdministrationData {
    #[serde(default)]
    pub(crate) indexes: Vec<IndexDefinition>,
}

/// Cliente del almacén basado en ficheros JSON, pensado para despliegues
/// pequeños (miles de documentos por tabla, no millones).
pub struct JsonDatabaseClient {
    data_directory: PathBuf,
    lock_timeout: Duration,
    /// Mutex en proceso por nombre de tabla.
    table_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl JsonDatabaseClient {
    /// Crea el cliente sobre `data_directory` (se crea al primer guardado).
    pub fn new(data_directory: impl Into<PathBuf>) -> Self {
        Self { data_directory: data_directory.into(),
               lock_timeout: Duration::from_secs(5),
               table_locks: DashMap::new() }
    }

    /// Cambia el timeout usado al esperar el lock de fichero.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn data_directory(&self) -> &Path {
        &self.data_directory
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.data_directory.join(format!("{}.json", table))
    }

    /// Ejecuta `operation` con el lock exclusivo de `table` tomado.
    fn with_table_lock<T>(&self, table: &str, operation: impl FnOnce() -> Result<T>) -> Result<T> {
        let mutex = self.table_locks
                        .entry(table.to_string())
                        .or_insert_with(|| Arc::new(Mutex::new(())))
                        .clone();
        let _guard = mutex.lock().unwrap_or_else(|e| e.into_inner());
        let lock_path = self.data_directory.join(format!("{}.lock", table));
        let _file_lock = FileLock::acquire(&lock_path, self.lock_timeout)?;
        operation()
    }

    fn load(&self, table: &str) -> Result<Vec<Document>> {
        let path = self.table_path(table);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)?;
        let rows: Vec<serde_json::Value> = serde_json::from_str(&content)?;
        rows.into_iter()
            .map(|row| match row {
                serde_json::Value::Object(map) => Ok(map),
                other => Err(StoreError::InvalidDocument(format!("tabla '{}': se esperaba un objeto, se leyó {}",
                                                                 table, other))),
            })
            .collect()
    }

    fn save<T: Serialize>(&self, table: &str, data: &T) -> Result<()> {
        std::fs::create_dir_all(&self.data_directory)?;
        let path = self.table_path(table);
        let temporary_path = self.data_directory.join(format!("{}.json.tmp", table));
        std::fs::write(&temporary_path, serde_json::to_vec_pretty(data)?)?;
        std::fs::rename(&temporary_path, &path)?;
        Ok(())
    }

    fn load_administration(&self) -> Result<AdministrationData> {
        let path = self.table_path(ADMIN_TABLE);
        if !path.exists() {
            return Ok(AdministrationData::default());
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn load_indexes(&self, table: &str) -> Result<Vec<IndexDefinition>> {
        let administration = self.with_table_lock(ADMIN_TABLE, || self.load_administration())?;
        Ok(administration.indexes.into_iter().filter(|i| i.table == table).collect())
    }

    /// Los índices se leen con el lock de la tabla tomado (orden: tabla y
    /// luego `admin`, igual que `create_index`).
    fn insert_rows(&self, table: &str, documents: Vec<Document>) -> Result<()> {
        if table == ADMIN_TABLE {
            return Err(StoreError::InvalidDocument(format!("la tabla '{}' está reservada", ADMIN_TABLE)));
        }
        self.with_table_lock(table, || {
                let indexes = self.load_indexes(table)?;
                let mut rows = self.load(table)?;
                operations::check_unique(table, &indexes, &rows, &documents)?;
                rows.extend(documents);
                self.save(table, &rows)
            })
    }
}

impl DatabaseClient for JsonDatabaseClient {
    fn count(&self, table: &str, filter: &Filter) -> Result<usize> {
        self.with_table_lock(table, || Ok(self.load(table)?.iter().filter(|row| filter.matches(row)).count()))
    }

    fn find_many(&self,
                 table: &str,
                 filter: &Filter,
                 skip: usize,
                 limit: Option<usize>,
                 order_by: &[OrderBy])
                 -> Result<Vec<Document>> {
        self.with_table_lock(table, || Ok(operations::select(self.load(table)?, filter, skip, limit, order_by)))
    }

    fn find_one(&self, table: &str, filter: &Filter) -> Result<Option<Document>> {
        self.with_table_lock(table, || Ok(self.load(table)?.into_iter().find(|row| filter.matches(row))))
    }

    fn insert_one(&self, table: &str, document: Document) -> Result<()> {
        self.insert_rows(table, vec![document])
    }

    fn insert_many(&self, table: &str, documents: Vec<Document>) -> Result<()> {
        self.insert_rows(table, documents)
    }

    fn update_one(&self, table: &str, filter: &Filter, update: Document) -> Result<bool> {
        self.with_table_lock(table, || {
                let mut rows = self.load(table)?;
                if !operations::update_first(&mut rows, filter, update) {
                    return Ok(false);
                }
                self.save(table, &rows)?;
                Ok(true)
            })
    }

    fn delete_one(&self, table: &str, filter: &Filter) -> Result<bool> {
        self.with_table_lock(table, || {
                let mut rows = self.load(table)?;
                if !operations::delete_first(&mut rows, filter) {
                    return Ok(false);
                }
                self.save(table, &rows)?;
                Ok(true)
            })
    }

    fn list_tables(&self) -> Result<Vec<String>> {
        if !self.data_directory.exists() {
            return Ok(Vec::new());
        }
        let mut tables = Vec::new();
        for entry in std::fs::read_dir(&self.data_directory)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if stem != ADMIN_TABLE {
                    tables.push(stem.to_string());
                }
            }
        }
        tables.sort();
        Ok(tables)
    }
}

impl DatabaseAdministration for JsonDatabaseClient {
    fn create_index(&self, table: &str, identifier: &str, fields: &[&str], is_unique: bool) -> Result<()> {
        if table == ADMIN_TABLE {
            return Err(StoreError::InvalidDocument(format!("la tabla '{}' está reservada", ADMIN_TABLE)));
        }
        let definition = IndexDefinition { table: table.to_string(),
                                           identifier: identifier.to_string(),
                                           field_collection: fields.iter().map(|f| f.to_string()).collect(),
                                           is_unique };
        self.with_table_lock(table, || {
                self.with_table_lock(ADMIN_TABLE, || {
                        let mut administration = self.load_administration()?;
                        operations::upsert_index(&mut administration.indexes, definition);
                        self.save(ADMIN_TABLE, &administration)
                    })
            })
    }

    fn list_indexes(&self, table: &str) -> Result<Vec<IndexDefinition>> {
        self.load_indexes(table)
    }

    fn list_all_indexes(&self) -> Result<Vec<IndexDefinition>> {
        Ok(self.with_table_lock(ADMIN_TABLE, || self.load_administration())?.indexes)
    }
}
