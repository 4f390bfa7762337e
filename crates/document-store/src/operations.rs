// Archivo: operations.rs
// Propósito: lógica pura compartida por las implementaciones del almacén
// (selección, ordenación, comprobación de índices y mezcla). Ninguna de
// estas funciones toca disco ni locks.
use crate::document::{compare_values, resolve_path, Document, Filter, IndexDefinition, OrderBy, SortDirection};
use crate::errors::{Result, StoreError};
use serde_json::Value;

/// Ordena de forma estable aplicando las claves en orden inverso, de modo
/// que las primeras claves dominan.
pub(crate) fn apply_order_by(rows: &mut [Document], order_by: &[OrderBy]) {
    for key in order_by.iter().rev() {
        rows.sort_by(|a, b| {
            let ordering = compare_values(resolve_path(a, &key.path), resolve_path(b, &key.path));
            match key.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            }
        });
    }
}

pub(crate) fn select(mut rows: Vec<Document>,
                     filter: &Filter,
                     skip: usize,
                     limit: Option<usize>,
                     order_by: &[OrderBy])
                     -> Vec<Document> {
    apply_order_by(&mut rows, order_by);
    let matched = rows.into_iter().filter(|row| filter.matches(row)).skip(skip);
    match limit {
        Some(limit) => matched.take(limit).collect(),
        None => matched.collect(),
    }
}

fn index_filter(index: &IndexDefinition, document: &Document) -> Filter {
    index.field_collection.iter().fold(Filter::new(), |filter, field| {
        let value = resolve_path(document, field).cloned().unwrap_or(Value::Null);
        filter.eq(field.clone(), value)
    })
}

/// Comprueba los índices únicos contra las filas ya confirmadas y contra las
/// filas anteriores del mismo lote.
pub(crate) fn check_unique(table: &str,
                           indexes: &[IndexDefinition],
                           committed: &[Document],
                           incoming: &[Document])
                           -> Result<()> {
    for index in indexes.iter().filter(|i| i.is_unique) {
        for (position, document) in incoming.iter().enumerate() {
            let filter = index_filter(index, document);
            let clash = committed.iter().chain(incoming[..position].iter()).any(|row| filter.matches(row));
            if clash {
                let key = serde_json::to_string(&filter.entries()
                                                       .iter()
                                                       .map(|(k, v)| (k.clone(), v.clone()))
                                                       .collect::<serde_json::Map<_, _>>())?;
                return Err(StoreError::DuplicateKey { table: table.to_string(),
                                                      index: index.identifier.clone(),
                                                      key });
            }
        }
    }
    Ok(())
}

/// Mezcla superficial de `update` en el primer documento que cumple el
/// filtro. Devuelve `true` si hubo coincidencia.
pub(crate) fn update_first(rows: &mut [Document], filter: &Filter, update: Document) -> bool {
    match rows.iter_mut().find(|row| filter.matches(row)) {
        Some(row) => {
            for (key, value) in update {
                row.insert(key, value);
            }
            true
        }
        None => false,
    }
}

pub(crate) fn delete_first(rows: &mut Vec<Document>, filter: &Filter) -> bool {
    match rows.iter().position(|row| filter.matches(row)) {
        Some(position) => {
            rows.remove(position);
            true
        }
        None => false,
    }
}

/// Reemplaza o añade una declaración de índice.
pub(crate) fn upsert_index(indexes: &mut Vec<IndexDefinition>, definition: IndexDefinition) {
    indexes.retain(|i| !(i.table == definition.table && i.identifier == definition.identifier));
    indexes.push(definition);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(values: Vec<Value>) -> Vec<Document> {
        values.into_iter().map(|v| v.as_object().cloned().unwrap()).collect()
    }

    #[test]
    fn earlier_keys_dominate_ordering() {
        let mut data = rows(vec![json!({"a": 2, "b": 1}),
                                 json!({"a": 1, "b": 2}),
                                 json!({"a": 1, "b": 1}),
                                 json!({"b": 3})]);
        apply_order_by(&mut data, &[OrderBy::ascending("a"), OrderBy::descending("b")]);
        let pairs: Vec<(Option<i64>, i64)> =
            data.iter().map(|d| (d.get("a").and_then(|v| v.as_i64()), d["b"].as_i64().unwrap())).collect();
        assert_eq!(pairs, vec![(None, 3), (Some(1), 2), (Some(1), 1), (Some(2), 1)]);
    }

    #[test]
    fn descending_places_missing_last() {
        let mut data = rows(vec![json!({"x": null}), json!({"x": 5}), json!({})]);
        apply_order_by(&mut data, &[OrderBy::descending("x")]);
        assert_eq!(data[0]["x"], json!(5));
    }

    #[test]
    fn batch_duplicates_are_detected() {
        let index = IndexDefinition { table: "t".into(),
                                      identifier: "id_unique".into(),
                                      field_collection: vec!["id".into()],
                                      is_unique: true };
        let incoming = rows(vec![json!({"id": 1}), json!({"id": 1})]);
        let err = check_unique("t", &[index], &[], &incoming).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
    }
}
