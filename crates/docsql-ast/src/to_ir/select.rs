//! SELECT to find or aggregate

use docsql_ir::{
    Accumulator, AggExpr, Column, ExprOp, FindQuery, GroupKey, GroupStage, Operation, Pipeline,
    ProjectField, Projection, SortDirection, SortSpec, SqlType, Stage, TranslatedQuery, Value,
};
use docsql_registry::FunctionKind;

use super::expr::{
    field_path, is_aggregate_call, same_expr, to_agg, GroupKeyField, GroupedAggregate, Grouping,
    Scope,
};
use super::filter::translate_filter;
use super::{synthesized_name, unique_name, Context};
use crate::ast::*;
use crate::error::TranslationError;

/// An item of the select list with its output name.
struct OutputItem<'s> {
    expr: &'s Expr,
    name: String,
}

pub(crate) fn translate_select(ctx: &Context<'_>, select: &Select) -> Result<TranslatedQuery, TranslationError> {
    let wildcard = select.items.iter().any(|i| matches!(i, SelectItem::Wildcard));
    if wildcard && select.items.len() > 1 {
        return Err(TranslationError::unsupported("* mixed with other select items"));
    }
    let items = output_items(ctx, select);

    let grouped = select.distinct
        || !select.group_by.is_empty()
        || select.having.is_some()
        || items.iter().any(|i| contains_aggregate(ctx, i.expr))
        || select.order_by.iter().any(|o| contains_aggregate(ctx, &o.expr));

    let (operation, columns) = if grouped {
        if wildcard {
            return Err(TranslationError::unsupported("* with grouping or DISTINCT"));
        }
        grouped_pipeline(ctx, select, &items)?
    } else if items.iter().all(|i| matches!(i.expr, Expr::Column(_))) {
        find(ctx, select, &items)?
    } else {
        computed_pipeline(ctx, select, &items)?
    };

    Ok(TranslatedQuery {
        collection: ctx.collection.clone(),
        operation,
        columns,
        wildcard,
    })
}

fn output_items<'s>(ctx: &Context<'_>, select: &'s Select) -> Vec<OutputItem<'s>> {
    let mut taken: Vec<String> = Vec::new();
    let mut items = Vec::new();
    for (index, item) in select.items.iter().enumerate() {
        if let SelectItem::Expr { expr, alias } = item {
            let name = alias
                .clone()
                .unwrap_or_else(|| synthesized_name(ctx, expr, index));
            let name = unique_name(name, &taken);
            taken.push(name.clone());
            items.push(OutputItem { expr, name });
        }
    }
    items
}

fn contains_aggregate(ctx: &Context<'_>, expr: &Expr) -> bool {
    let mut found = false;
    expr.walk(&mut |e| {
        if let Expr::FunctionCall(call) = e {
            found |= is_aggregate_call(ctx, call);
        }
    });
    found
}

fn where_filter(ctx: &Context<'_>, select: &Select) -> Result<Option<docsql_ir::Filter>, TranslationError> {
    select
        .selection
        .as_ref()
        .map(|e| translate_filter(ctx, &Scope::Document, e))
        .transpose()
        .map(|f| f.filter(|f| !f.is_empty()))
}

fn paging(ctx: &Context<'_>, select: &Select) -> Result<(Option<u64>, Option<u64>), TranslationError> {
    let skip = select.offset.as_ref().map(|e| ctx.count(e, "OFFSET")).transpose()?;
    let limit = select.limit.as_ref().map(|e| ctx.count(e, "LIMIT")).transpose()?;
    Ok((skip, limit))
}

/// The select item an ORDER BY key refers to by alias or 1-based ordinal.
fn referenced_item<'i, 's>(
    ctx: &Context<'_>,
    items: &'i [OutputItem<'s>],
    key: &Expr,
) -> Result<Option<&'i OutputItem<'s>>, TranslationError> {
    match key {
        Expr::Column(col) if col.segments.len() == 1 => {
            let name = ctx.display_path(col);
            Ok(items.iter().find(|i| i.name == name && !matches!(i.expr, Expr::Column(c) if c == col)))
        }
        Expr::Literal(Literal::Integer(n)) => usize::try_from(*n)
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| items.get(i))
            .map(Some)
            .ok_or_else(|| TranslationError::UnknownSortKey(n.to_string())),
        _ => Ok(None),
    }
}

fn direction(order: &OrderByExpr) -> SortDirection {
    if order.desc {
        SortDirection::Descending
    } else {
        SortDirection::Ascending
    }
}

fn sort_spec(keys: Vec<(String, SortDirection)>) -> Option<SortSpec> {
    if keys.is_empty() {
        None
    } else {
        Some(SortSpec { keys })
    }
}

fn column_type(ctx: &Context<'_>, expr: &Expr) -> Option<SqlType> {
    match expr {
        Expr::FunctionCall(call) => ctx.registry.get(&call.name).and_then(|sig| sig.return_type),
        Expr::Cast { data_type, .. } => SqlType::from_name(data_type),
        _ => None,
    }
}

/// Plain column lists run as `find`.
fn find(
    ctx: &Context<'_>,
    select: &Select,
    items: &[OutputItem<'_>],
) -> Result<(Operation, Vec<Column>), TranslationError> {
    let mut columns = Vec::with_capacity(items.len());
    let mut sources: Vec<String> = Vec::new();
    for item in items {
        if let Expr::Column(col) = item.expr {
            let source = ctx.path(col);
            if !sources.contains(&source) {
                sources.push(source.clone());
            }
            columns.push(Column::new(item.name.clone(), source));
        }
    }

    let mut keys = Vec::new();
    for order in &select.order_by {
        let path = match referenced_item(ctx, items, &order.expr)? {
            Some(OutputItem {
                expr: Expr::Column(col),
                ..
            }) => ctx.path(col),
            Some(item) => return Err(TranslationError::UnknownSortKey(item.name.clone())),
            None => match &order.expr {
                Expr::Column(col) => ctx.path(col),
                _ => return Err(TranslationError::unsupported("ORDER BY on a computed expression")),
            },
        };
        keys.push((path, direction(order)));
    }

    let (skip, limit) = paging(ctx, select)?;
    let query = FindQuery {
        filter: where_filter(ctx, select)?.unwrap_or_default(),
        projection: if sources.is_empty() {
            None
        } else {
            Some(Projection::include(sources))
        },
        sort: sort_spec(keys),
        skip,
        limit,
    };
    Ok((Operation::Find(query), columns))
}

/// Select lists with computed columns run as `$match, $sort, $skip, $limit, $project`.
fn computed_pipeline(
    ctx: &Context<'_>,
    select: &Select,
    items: &[OutputItem<'_>],
) -> Result<(Operation, Vec<Column>), TranslationError> {
    let mut fields = Vec::with_capacity(items.len());
    let mut columns = Vec::with_capacity(items.len());
    for item in items {
        let field = match item.expr {
            Expr::Column(col) if ctx.path(col) == item.name => ProjectField::Include,
            expr => ProjectField::Computed(to_agg(ctx, &Scope::Document, expr)?),
        };
        fields.push((item.name.clone(), field));
        columns.push(Column::new(item.name.clone(), item.name.clone()).typed(column_type(ctx, item.expr)));
    }

    let mut keys = Vec::new();
    for order in &select.order_by {
        let path = match referenced_item(ctx, items, &order.expr)? {
            Some(OutputItem {
                expr: Expr::Column(col),
                ..
            }) => ctx.path(col),
            Some(_) => return Err(TranslationError::unsupported("ORDER BY on a computed column")),
            None => match &order.expr {
                Expr::Column(col) => ctx.path(col),
                _ => return Err(TranslationError::unsupported("ORDER BY on a computed expression")),
            },
        };
        keys.push((path, direction(order)));
    }

    let (skip, limit) = paging(ctx, select)?;
    let mut stages = Vec::new();
    stages.extend(where_filter(ctx, select)?.map(Stage::Match));
    stages.extend(sort_spec(keys).map(Stage::Sort));
    stages.extend(skip.map(Stage::Skip));
    stages.extend(limit.map(Stage::Limit));
    stages.push(Stage::Project(Projection { fields }));

    Ok((Operation::Aggregate(Pipeline::new(stages)?), columns))
}

/// GROUP BY, DISTINCT and aggregate calls run as
/// `$match, $group, $match, $sort, $skip, $limit, $project`.
fn grouped_pipeline(
    ctx: &Context<'_>,
    select: &Select,
    items: &[OutputItem<'_>],
) -> Result<(Operation, Vec<Column>), TranslationError> {
    let key_exprs: Vec<&Expr> = if select.group_by.is_empty() && select.distinct {
        items
            .iter()
            .map(|i| i.expr)
            .filter(|e| !contains_aggregate(ctx, e))
            .collect()
    } else {
        select.group_by.iter().collect()
    };
    let grouping = build_grouping(ctx, select, items, &key_exprs)?;

    let group_key = match grouping.keys.as_slice() {
        [] => GroupKey::Null,
        [single] => GroupKey::Expr(to_agg(ctx, &Scope::Document, &single.expr)?),
        keys => {
            let mut parts = Vec::with_capacity(keys.len());
            for key in keys {
                let name = key.path.trim_start_matches("_id.").to_string();
                parts.push((name, to_agg(ctx, &Scope::Document, &key.expr)?));
            }
            GroupKey::Compound(parts)
        }
    };
    let mut accumulators = Vec::with_capacity(grouping.aggregates.len());
    for aggregate in &grouping.aggregates {
        accumulators.push((aggregate.name.clone(), accumulator(ctx, &aggregate.call)?));
    }

    let scope = Scope::Grouped(&grouping);
    let having = select
        .having
        .as_ref()
        .map(|e| translate_filter(ctx, &scope, e))
        .transpose()?
        .filter(|f| !f.is_empty());

    let mut fields = Vec::with_capacity(items.len());
    let mut columns = Vec::with_capacity(items.len());
    for item in items {
        let field = match field_path(ctx, &scope, item.expr)? {
            Some(path) if path == item.name => ProjectField::Include,
            Some(path) => ProjectField::Computed(AggExpr::Field(path)),
            None => ProjectField::Computed(to_agg(ctx, &scope, item.expr)?),
        };
        fields.push((item.name.clone(), field));
        columns.push(Column::new(item.name.clone(), item.name.clone()).typed(column_type(ctx, item.expr)));
    }

    let mut keys = Vec::new();
    for order in &select.order_by {
        let target = referenced_item(ctx, items, &order.expr)?
            .map(|item| item.expr)
            .unwrap_or(&order.expr);
        let path = field_path(ctx, &scope, target)?
            .ok_or_else(|| TranslationError::unsupported("ORDER BY on a computed expression"))?;
        keys.push((path, direction(order)));
    }

    let (skip, limit) = paging(ctx, select)?;
    let mut stages = Vec::new();
    stages.extend(where_filter(ctx, select)?.map(Stage::Match));
    stages.push(Stage::Group(GroupStage {
        key: group_key,
        accumulators,
    }));
    stages.extend(having.map(Stage::Match));
    stages.extend(sort_spec(keys).map(Stage::Sort));
    stages.extend(skip.map(Stage::Skip));
    stages.extend(limit.map(Stage::Limit));
    stages.push(Stage::Project(Projection { fields }));

    Ok((Operation::Aggregate(Pipeline::new(stages)?), columns))
}

fn build_grouping(
    ctx: &Context<'_>,
    select: &Select,
    items: &[OutputItem<'_>],
    key_exprs: &[&Expr],
) -> Result<Grouping, TranslationError> {
    let mut grouping = Grouping::default();

    let mut key_names: Vec<String> = Vec::new();
    for (index, expr) in key_exprs.iter().enumerate() {
        if contains_aggregate(ctx, expr) {
            return Err(TranslationError::MisplacedAggregate(
                "aggregate in GROUP BY".to_string(),
            ));
        }
        if grouping.keys.iter().any(|k| same_expr(ctx, &k.expr, expr)) {
            continue;
        }
        let name = items
            .iter()
            .find(|i| same_expr(ctx, i.expr, expr))
            .map(|i| i.name.clone())
            .unwrap_or_else(|| synthesized_name(ctx, expr, index));
        let name = unique_name(name.replace('.', "_"), &key_names);
        key_names.push(name.clone());
        grouping.keys.push(GroupKeyField {
            expr: (*expr).clone(),
            path: name,
        });
    }
    if grouping.keys.len() == 1 {
        grouping.keys[0].path = "_id".to_string();
    } else {
        for key in &mut grouping.keys {
            key.path = format!("_id.{}", key.path);
        }
    }

    // Aggregate calls in order of appearance; aliased select items name theirs.
    let mut calls: Vec<(FunctionCall, Option<String>)> = Vec::new();
    for item in items {
        collect_aggregates(ctx, item.expr, Some(&item.name), &mut calls)?;
    }
    if let Some(having) = &select.having {
        collect_aggregates(ctx, having, None, &mut calls)?;
    }
    for order in &select.order_by {
        collect_aggregates(ctx, &order.expr, None, &mut calls)?;
    }

    let mut taken: Vec<String> = vec!["_id".to_string()];
    taken.extend(calls.iter().filter_map(|(_, name)| name.clone()));
    for (index, (call, name)) in calls.into_iter().enumerate() {
        let name = match name {
            Some(name) => name,
            None => {
                let base = synthesized_name(ctx, &Expr::FunctionCall(call.clone()), index);
                let unique = unique_name(base, &taken);
                taken.push(unique.clone());
                unique
            }
        };
        grouping.aggregates.push(GroupedAggregate { call, name });
    }
    Ok(grouping)
}

fn collect_aggregates(
    ctx: &Context<'_>,
    expr: &Expr,
    direct_name: Option<&str>,
    calls: &mut Vec<(FunctionCall, Option<String>)>,
) -> Result<(), TranslationError> {
    let mut nested = None;
    expr.walk(&mut |e| {
        let call = match e {
            Expr::FunctionCall(call) if is_aggregate_call(ctx, call) => call,
            _ => return,
        };
        let has_inner = call.args.iter().any(|a| match a {
            FunctionArg::Expr(inner) => contains_aggregate(ctx, inner),
            FunctionArg::Wildcard => false,
        });
        if has_inner {
            nested = Some(call.name.to_uppercase());
        }
        if calls.iter().any(|(c, _)| c == call) {
            return;
        }
        let name = match (expr, direct_name) {
            (Expr::FunctionCall(top), Some(n)) if top == call => Some(n.to_string()),
            _ => None,
        };
        calls.push((call.clone(), name));
    });
    match nested {
        Some(name) => Err(TranslationError::MisplacedAggregate(name)),
        None => Ok(()),
    }
}

fn accumulator(ctx: &Context<'_>, call: &FunctionCall) -> Result<Accumulator, TranslationError> {
    let sig = ctx.registry.lookup(&call.name, call.args.len())?;
    let func = match sig.kind {
        FunctionKind::Aggregate(func) => func,
        FunctionKind::Scalar(_) => return Err(TranslationError::MisplacedAggregate(call.name.to_uppercase())),
    };
    if call.distinct {
        return Err(TranslationError::unsupported(format!(
            "{}(DISTINCT ...)",
            call.name.to_uppercase()
        )));
    }

    let arg = match call.args.as_slice() {
        [FunctionArg::Wildcard] if func == docsql_registry::AggregateFunction::Count => {
            return Ok(Accumulator::count())
        }
        [FunctionArg::Expr(arg)] => arg,
        _ => {
            return Err(TranslationError::InvalidValue(format!(
                "{}(*)",
                call.name.to_uppercase()
            )))
        }
    };

    if func != docsql_registry::AggregateFunction::Count {
        return Ok(Accumulator::new(
            func.accumulator(),
            to_agg(ctx, &Scope::Document, arg)?,
        ));
    }
    // The primary key is never null, so counting it counts rows.
    if matches!(arg, Expr::Column(col) if ctx.path(col) == "_id") {
        return Ok(Accumulator::count());
    }
    let present = AggExpr::call(
        ExprOp::Gt,
        vec![to_agg(ctx, &Scope::Document, arg)?, AggExpr::Literal(Value::Null)],
    );
    Ok(Accumulator::new(
        func.accumulator(),
        AggExpr::call(ExprOp::Cond, vec![present, AggExpr::literal(1), AggExpr::literal(0)]),
    ))
}
