//! INSERT, UPDATE and DELETE to write commands

use docsql_ir::{
    set_path, DeleteCommand, Document, InsertCommand, Operation, TranslatedQuery, UpdateCommand,
    UpdateSpec, Value,
};

use super::expr::{to_agg, Scope};
use super::filter::translate_filter;
use super::{map_primary_key, Context};
use crate::ast::*;
use crate::error::TranslationError;

fn write_query(ctx: &Context<'_>, operation: Operation) -> TranslatedQuery {
    TranslatedQuery {
        collection: ctx.collection.clone(),
        operation,
        columns: Vec::new(),
        wildcard: false,
    }
}

pub(crate) fn translate_insert(ctx: &Context<'_>, insert: &Insert) -> Result<TranslatedQuery, TranslationError> {
    let documents = match &insert.source {
        InsertSource::Values { columns, rows } => {
            let mut documents = Vec::with_capacity(rows.len());
            for row in rows {
                let paths: Vec<String> = if columns.is_empty() {
                    (0..row.len()).map(|i| format!("col{}", i)).collect()
                } else if columns.len() == row.len() {
                    columns.iter().map(|c| ctx.path(c)).collect()
                } else {
                    return Err(TranslationError::InvalidValue(format!(
                        "INSERT has {} columns but {} values",
                        columns.len(),
                        row.len()
                    )));
                };
                let mut doc = Document::new();
                for (path, expr) in paths.iter().zip(row) {
                    set_path(&mut doc, path, constant(ctx, expr)?);
                }
                documents.push(doc);
            }
            documents
        }
        InsertSource::Documents(exprs) => {
            let mut documents = Vec::with_capacity(exprs.len());
            for expr in exprs {
                match constant(ctx, expr)? {
                    Value::Document(doc) => documents.push(
                        doc.into_iter()
                            .map(|(key, value)| (map_primary_key(key), value))
                            .collect(),
                    ),
                    other => {
                        return Err(TranslationError::InvalidValue(format!(
                            "expected a document, found {}",
                            other.type_name()
                        )))
                    }
                }
            }
            documents
        }
    };
    Ok(write_query(ctx, Operation::Insert(InsertCommand { documents })))
}

fn constant(ctx: &Context<'_>, expr: &Expr) -> Result<Value, TranslationError> {
    ctx.constant(expr)?
        .ok_or_else(|| TranslationError::unsupported("non-constant value in INSERT"))
}

fn where_filter(ctx: &Context<'_>, selection: Option<&Expr>) -> Result<docsql_ir::Filter, TranslationError> {
    match selection {
        Some(expr) => translate_filter(ctx, &Scope::Document, expr),
        None => Ok(docsql_ir::Filter::all()),
    }
}

pub(crate) fn translate_update(ctx: &Context<'_>, update: &Update) -> Result<TranslatedQuery, TranslationError> {
    let mut constants = Vec::with_capacity(update.assignments.len());
    let mut all_constant = true;
    for assignment in &update.assignments {
        let path = ctx.path(&assignment.column);
        if path == "_id" || path.starts_with("_id.") {
            return Err(TranslationError::InvalidValue(
                "the primary key cannot be updated".to_string(),
            ));
        }
        let value = ctx.constant(&assignment.value)?;
        all_constant &= value.is_some();
        constants.push((path, value));
    }

    let spec = if all_constant {
        UpdateSpec::Set(
            constants
                .into_iter()
                .filter_map(|(path, value)| value.map(|v| (path, v)))
                .collect(),
        )
    } else {
        let mut fields = Vec::with_capacity(update.assignments.len());
        for ((path, _), assignment) in constants.into_iter().zip(&update.assignments) {
            fields.push((path, to_agg(ctx, &Scope::Document, &assignment.value)?));
        }
        UpdateSpec::Pipeline(fields)
    };

    Ok(write_query(
        ctx,
        Operation::Update(UpdateCommand {
            filter: where_filter(ctx, update.selection.as_ref())?,
            update: spec,
            multi: true,
        }),
    ))
}

pub(crate) fn translate_delete(ctx: &Context<'_>, delete: &Delete) -> Result<TranslatedQuery, TranslationError> {
    Ok(write_query(
        ctx,
        Operation::Delete(DeleteCommand {
            filter: where_filter(ctx, delete.selection.as_ref())?,
            multi: true,
        }),
    ))
}
