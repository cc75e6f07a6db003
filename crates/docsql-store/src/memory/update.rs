//! Update application

use docsql_ir::{set_path, Document, UpdateSpec};

use super::eval::evaluate;
use crate::error::{codes, Result, StoreError};

/// Apply `update` to a copy of `doc`. Returns `None` when nothing changed.
pub(crate) fn apply_update(doc: &Document, update: &UpdateSpec) -> Result<Option<Document>> {
    let assignments = match update {
        UpdateSpec::Set(fields) => fields.clone(),
        // Every expression sees the document as it was before the update.
        UpdateSpec::Pipeline(fields) => {
            let mut values = Vec::with_capacity(fields.len());
            for (path, expr) in fields {
                values.push((path.clone(), evaluate(expr, doc)?));
            }
            values
        }
    };

    let mut updated = doc.clone();
    for (path, value) in assignments {
        if path == "_id" || path.starts_with("_id.") {
            return Err(StoreError::command(
                codes::IMMUTABLE_FIELD,
                "Performing an update on the path '_id' would modify the immutable field '_id'",
            ));
        }
        set_path(&mut updated, &path, value);
    }

    if updated == *doc {
        Ok(None)
    } else {
        Ok(Some(updated))
    }
}
