//! Translation of [`Filter`] predicates into MongoDB query documents.
//!
//! Every filter is pushed down to the server; nothing is evaluated in process.

use bson::{Bson, Document, doc};
use service_common_core::entity::ID_FIELD;
use service_common_core::filter::Filter;
use service_common_core::repository::RepositoryError;
use uuid::Uuid;

/// Query document selecting the entity with identifier `id`.
#[must_use]
pub fn id_query(id: Uuid) -> Document {
    doc! { ID_FIELD: id.to_string() }
}

/// Translate a filter into a MongoDB query document.
///
/// # Errors
///
/// Returns [`RepositoryError::Serialization`] if a comparison value has no BSON form.
pub fn to_query(filter: &Filter) -> Result<Document, RepositoryError> {
    let query = match filter {
        Filter::All => Document::new(),
        Filter::Id(id) => id_query(*id),
        Filter::Compare { field, op, value } => {
            field_query(field, doc! { op.operator(): to_bson(value)? })
        },
        Filter::In { field, values } => {
            field_query(field, doc! { "$in": to_bson_array(values)? })
        },
        Filter::NotIn { field, values } => {
            field_query(field, doc! { "$nin": to_bson_array(values)? })
        },
        Filter::Exists { field, exists } => field_query(field, doc! { "$exists": *exists }),
        // `$and`/`$or` reject empty arrays, so the identities are spelled out
        Filter::And(filters) if filters.is_empty() => Document::new(),
        Filter::Or(filters) if filters.is_empty() => doc! { ID_FIELD: { "$exists": false } },
        Filter::And(filters) => doc! { "$and": to_query_array(filters)? },
        Filter::Or(filters) => doc! { "$or": to_query_array(filters)? },
        Filter::Not(inner) => doc! { "$nor": [to_query(inner)?] },
    };
    Ok(query)
}

fn field_query(field: &str, condition: Document) -> Document {
    let mut query = Document::new();
    query.insert(field, condition);
    query
}

fn to_bson(value: &serde_json::Value) -> Result<Bson, RepositoryError> {
    bson::to_bson(value).map_err(|e| RepositoryError::Serialization(e.to_string()))
}

fn to_bson_array(values: &[serde_json::Value]) -> Result<Vec<Bson>, RepositoryError> {
    values.iter().map(to_bson).collect()
}

fn to_query_array(filters: &[Filter]) -> Result<Vec<Document>, RepositoryError> {
    filters.iter().map(to_query).collect()
}
