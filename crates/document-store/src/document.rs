// Archivo: document.rs
// Propósito: tipos básicos del almacén (documento, filtro, ordenación e
// índice) y la semántica de resolución de rutas con puntos.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Un documento es un objeto JSON sin clave primaria implícita.
pub type Document = Map<String, Value>;

/// Filtro de igualdad exacta por ruta con puntos (`"source.type"`).
///
/// Un documento cumple el filtro si todas las rutas se resuelven a un valor
/// igual. Una clave intermedia ausente hace fallar la coincidencia, nunca
/// produce un error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    entries: Vec<(String, Value)>,
}

impl Filter {
    /// Filtro vacío: coincide con cualquier documento.
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Añade una condición `path == value`.
    pub fn eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.push((path.into(), value.into()));
        self
    }

    /// Construye un filtro que exige todos los campos de primer nivel del
    /// documento dado.
    pub fn from_document(document: &Document) -> Self {
        Self { entries: document.iter().map(|(k, v)| (k.clone(), v.clone())).collect() }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    /// Evalúa el filtro sobre un documento.
    pub fn matches(&self, document: &Document) -> bool {
        self.entries
            .iter()
            .all(|(path, expected)| resolve_path(document, path).map(|v| v == expected).unwrap_or(false))
    }
}

/// Resuelve una ruta con puntos recorriendo objetos anidados.
pub fn resolve_path<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = document.get(first)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Dirección de ordenación.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Una clave de ordenación `(ruta, dirección)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub path: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn ascending(path: impl Into<String>) -> Self {
        Self { path: path.into(), direction: SortDirection::Ascending }
    }

    pub fn descending(path: impl Into<String>) -> Self {
        Self { path: path.into(), direction: SortDirection::Descending }
    }
}

/// Declaración de índice tal como se guarda en `admin.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub table: String,
    pub identifier: String,
    pub field_collection: Vec<String>,
    pub is_unique: bool,
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Compara dos valores JSON. Un valor ausente o `null` es siempre el menor.
pub fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    let left = left.filter(|v| !v.is_null());
    let right = right.filter(|v| !v.is_null());
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(l), Some(r)) => compare_present(l, r),
    }
}

fn compare_present(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Bool(l), Value::Bool(r)) => l.cmp(r),
        (Value::Number(l), Value::Number(r)) => {
            let l = l.as_f64().unwrap_or(0.0);
            let r = r.as_f64().unwrap_or(0.0);
            l.partial_cmp(&r).unwrap_or(Ordering::Equal)
        }
        (Value::String(l), Value::String(r)) => l.cmp(r),
        (Value::Array(l), Value::Array(r)) => {
            for (a, b) in l.iter().zip(r.iter()) {
                let o = compare_values(Some(a), Some(b));
                if o != Ordering::Equal {
                    return o;
                }
            }
            l.len().cmp(&r.len())
        }
        (Value::Object(_), Value::Object(_)) => Ordering::Equal,
        _ => kind_rank(left).cmp(&kind_rank(right)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn nested_path_resolution() {
        let d = doc(json!({"source": {"type": "user", "identifier": "alice"}}));
        assert_eq!(resolve_path(&d, "source.type"), Some(&json!("user")));
        assert_eq!(resolve_path(&d, "source.missing"), None);
        assert_eq!(resolve_path(&d, "source.type.deeper"), None);
    }

    #[test]
    fn missing_intermediate_key_fails_match() {
        let d = doc(json!({"worker": null, "status": "pending"}));
        assert!(Filter::new().eq("worker", Value::Null).eq("status", "pending").matches(&d));
        assert!(!Filter::new().eq("source.type", "user").matches(&d));
    }

    #[test]
    fn null_sorts_before_values() {
        assert_eq!(compare_values(None, Some(&json!(1))), Ordering::Less);
        assert_eq!(compare_values(Some(&Value::Null), None), Ordering::Equal);
        assert_eq!(compare_values(Some(&json!("b")), Some(&json!("a"))), Ordering::Greater);
    }
}
