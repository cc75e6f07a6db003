//! Convert AST statements to document-store commands

mod expr;
mod filter;
mod select;
mod write;

use docsql_ir::{Params, SqlType, TranslatedQuery, Value};
use docsql_registry::FunctionRegistry;

use crate::ast::*;
use crate::error::TranslationError;

/// Translate a statement using the builtin function registry.
pub fn translate(statement: &Statement, params: &Params) -> Result<TranslatedQuery, TranslationError> {
    Translator::new(FunctionRegistry::builtin()).translate(statement, params)
}

pub struct Translator<'r> {
    registry: &'r FunctionRegistry,
}

impl<'r> Translator<'r> {
    pub fn new(registry: &'r FunctionRegistry) -> Self {
        Self { registry }
    }

    pub fn translate(
        &self,
        statement: &Statement,
        params: &Params,
    ) -> Result<TranslatedQuery, TranslationError> {
        check_primary_key(statement)?;
        check_positional_count(statement, params)?;

        let query = match statement {
            Statement::Select(select) => {
                let (name, alias) = match &select.from {
                    TableRef::Collection { name, alias } => (name, alias),
                    TableRef::Join { .. } => return Err(TranslationError::unsupported("JOIN")),
                    TableRef::Derived { .. } => {
                        return Err(TranslationError::unsupported("subquery in FROM"))
                    }
                };
                let ctx = Context::new(self.registry, params, name, alias.as_deref());
                select::translate_select(&ctx, select)?
            }
            Statement::Insert(insert) => {
                let ctx = Context::new(self.registry, params, &insert.collection, None);
                write::translate_insert(&ctx, insert)?
            }
            Statement::Update(update) => {
                let ctx = Context::new(self.registry, params, &update.collection, update.alias.as_deref());
                write::translate_update(&ctx, update)?
            }
            Statement::Delete(delete) => {
                let ctx = Context::new(self.registry, params, &delete.collection, delete.alias.as_deref());
                write::translate_delete(&ctx, delete)?
            }
        };

        tracing::debug!(
            statement = statement.kind(),
            command = query.operation.command_name(),
            collection = %query.collection,
            "translated statement"
        );
        Ok(query)
    }
}

/// Per-statement translation state.
pub(crate) struct Context<'a> {
    pub registry: &'a FunctionRegistry,
    pub params: &'a Params,
    pub collection: String,
    qualifiers: Vec<String>,
}

impl<'a> Context<'a> {
    fn new(
        registry: &'a FunctionRegistry,
        params: &'a Params,
        collection: &str,
        alias: Option<&str>,
    ) -> Self {
        let mut qualifiers = vec![collection.to_string()];
        qualifiers.extend(alias.map(str::to_string));
        Self {
            registry,
            params,
            collection: collection.to_string(),
            qualifiers,
        }
    }

    /// Column path as written, minus any collection qualifier.
    pub fn display_path(&self, col: &ColumnRef) -> String {
        let quals: Vec<&str> = self.qualifiers.iter().map(String::as_str).collect();
        col.path(&quals)
    }

    /// Document path of a column. A leading `id` names the primary key.
    pub fn path(&self, col: &ColumnRef) -> String {
        map_primary_key(self.display_path(col))
    }

    /// Value of an expression that needs no document to evaluate.
    pub fn constant(&self, expr: &Expr) -> Result<Option<Value>, TranslationError> {
        let value = match expr {
            Expr::Literal(lit) => literal_value(lit)?,
            Expr::Placeholder(Placeholder::Positional(i)) => self
                .params
                .positional(*i)
                .cloned()
                .ok_or_else(|| TranslationError::MissingParameter(format!("#{}", i + 1)))?,
            Expr::Placeholder(Placeholder::Named(name)) => self
                .params
                .named(name)
                .cloned()
                .ok_or_else(|| TranslationError::MissingParameter(format!(":{}", name)))?,
            Expr::Negate(inner) => match self.constant(inner)? {
                Some(Value::Int32(i)) => Value::integer(-(i as i64)),
                Some(Value::Int64(i)) => Value::Int64(-i),
                Some(Value::Double(f)) => Value::Double(-f),
                Some(Value::Decimal(d)) => Value::Decimal(-d),
                _ => return Ok(None),
            },
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match self.constant(item)? {
                        Some(v) => values.push(v),
                        None => return Ok(None),
                    }
                }
                Value::Array(values)
            }
            Expr::Object(fields) => {
                let mut doc = docsql_ir::Document::new();
                for (key, item) in fields {
                    match self.constant(item)? {
                        Some(v) => {
                            doc.insert(key.clone(), v);
                        }
                        None => return Ok(None),
                    }
                }
                Value::Document(doc)
            }
            Expr::FunctionCall(call) if call.over.is_none() => {
                let ty = match call.name.to_ascii_lowercase().as_str() {
                    "date" => SqlType::Date,
                    "datetime" => SqlType::DateTime,
                    "timestamp" => SqlType::Timestamp,
                    _ => return Ok(None),
                };
                let arg = match call.args.as_slice() {
                    [FunctionArg::Expr(arg)] => arg,
                    _ => return Ok(None),
                };
                match self.constant(arg)? {
                    Some(Value::String(text)) => {
                        let parsed = Value::parse_datetime(&text).ok_or_else(|| {
                            TranslationError::InvalidValue(format!("{}('{}')", call.name.to_uppercase(), text))
                        })?;
                        ty.coerce(&Value::Date(parsed))?
                    }
                    Some(other) => ty.coerce(&other)?,
                    None => return Ok(None),
                }
            }
            Expr::Cast { expr, data_type } => {
                let ty = SqlType::from_name(data_type)
                    .ok_or_else(|| TranslationError::UnknownType(data_type.clone()))?;
                match self.constant(expr)? {
                    Some(v) => ty.coerce(&v)?,
                    None => return Ok(None),
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    /// Non-negative integer for LIMIT and OFFSET.
    pub fn count(&self, expr: &Expr, clause: &str) -> Result<u64, TranslationError> {
        self.constant(expr)?
            .as_ref()
            .and_then(Value::as_i64)
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| {
                TranslationError::InvalidValue(format!("{} must be a non-negative integer", clause))
            })
    }
}

pub(crate) fn map_primary_key(path: String) -> String {
    if path == "id" {
        "_id".to_string()
    } else if let Some(rest) = path.strip_prefix("id.") {
        format!("_id.{}", rest)
    } else {
        path
    }
}

pub(crate) fn literal_value(lit: &Literal) -> Result<Value, TranslationError> {
    Ok(match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Integer(i) => Value::integer(*i),
        Literal::Number(text) => Value::Double(
            text.parse()
                .map_err(|_| TranslationError::InvalidValue(text.clone()))?,
        ),
        Literal::String(s) => Value::String(s.clone()),
    })
}

/// Top-level expressions of a statement, in source order.
fn statement_exprs(statement: &Statement) -> Vec<&Expr> {
    let mut exprs = Vec::new();
    match statement {
        Statement::Select(select) => {
            for item in &select.items {
                if let SelectItem::Expr { expr, .. } = item {
                    exprs.push(expr);
                }
            }
            exprs.extend(select.selection.iter());
            exprs.extend(select.group_by.iter());
            exprs.extend(select.having.iter());
            exprs.extend(select.order_by.iter().map(|o| &o.expr));
            exprs.extend(select.limit.iter());
            exprs.extend(select.offset.iter());
        }
        Statement::Insert(insert) => match &insert.source {
            InsertSource::Values { rows, .. } => exprs.extend(rows.iter().flatten()),
            InsertSource::Documents(docs) => exprs.extend(docs.iter()),
        },
        Statement::Update(update) => {
            exprs.extend(update.assignments.iter().map(|a| &a.value));
            exprs.extend(update.selection.iter());
        }
        Statement::Delete(delete) => exprs.extend(delete.selection.iter()),
    }
    exprs
}

/// Reject statements that spell the primary key both as `id` and `_id`.
fn check_primary_key(statement: &Statement) -> Result<(), TranslationError> {
    let (collection, alias) = match statement {
        Statement::Select(s) => match &s.from {
            TableRef::Collection { name, alias } => (name.as_str(), alias.as_deref()),
            _ => return Ok(()),
        },
        Statement::Insert(i) => (i.collection.as_str(), None),
        Statement::Update(u) => (u.collection.as_str(), u.alias.as_deref()),
        Statement::Delete(d) => (d.collection.as_str(), d.alias.as_deref()),
    };
    let mut quals = vec![collection];
    quals.extend(alias);

    let mut heads: Vec<String> = Vec::new();
    let mut note = |col: &ColumnRef| {
        let path = col.path(&quals);
        let head = path.split('.').next().unwrap_or_default().to_string();
        heads.push(head);
    };

    for expr in statement_exprs(statement) {
        expr.walk(&mut |e| match e {
            Expr::Column(col) => note(col),
            Expr::Object(fields) => {
                for (key, _) in fields {
                    note(&ColumnRef::new(key.clone()));
                }
            }
            _ => {}
        });
    }
    match statement {
        Statement::Insert(Insert {
            source: InsertSource::Values { columns, .. },
            ..
        }) => columns.iter().for_each(&mut note),
        Statement::Update(update) => update.assignments.iter().for_each(|a| note(&a.column)),
        _ => {}
    }

    if heads.iter().any(|h| h == "id") && heads.iter().any(|h| h == "_id") {
        return Err(TranslationError::AmbiguousPrimaryKey);
    }
    Ok(())
}

fn check_positional_count(statement: &Statement, params: &Params) -> Result<(), TranslationError> {
    let mut expected = 0;
    for expr in statement_exprs(statement) {
        expr.walk(&mut |e| {
            if let Expr::Placeholder(Placeholder::Positional(i)) = e {
                expected = expected.max(i + 1);
            }
        });
    }
    let actual = match params {
        Params::Positional(values) => values.len(),
        _ => 0,
    };
    if expected != actual && (expected > 0 || matches!(params, Params::Positional(_))) {
        return Err(TranslationError::ParameterCount { expected, actual });
    }
    Ok(())
}

/// Name for an output column that has no alias.
pub(crate) fn synthesized_name(ctx: &Context<'_>, expr: &Expr, index: usize) -> String {
    match expr {
        Expr::Column(col) => ctx.display_path(col),
        Expr::FunctionCall(call) => {
            let func = call.name.to_ascii_lowercase();
            match call.args.as_slice() {
                [FunctionArg::Wildcard] => format!("{}_star", func),
                [FunctionArg::Expr(Expr::Column(col)), ..] => {
                    format!("{}_{}", func, ctx.display_path(col).replace('.', "_"))
                }
                _ => func,
            }
        }
        Expr::Cast { expr, .. } => synthesized_name(ctx, expr, index),
        _ => format!("expr_{}", index),
    }
}

/// Make `name` unique among `taken`, suffixing `_2`, `_3`, ...
pub(crate) fn unique_name(name: String, taken: &[String]) -> String {
    if !taken.contains(&name) {
        return name;
    }
    (2..)
        .map(|n| format!("{}_{}", name, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or(name)
}
