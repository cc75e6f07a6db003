//! Aggregation pipelines
//!
//! Stages are typed and their order is checked when the pipeline is built:
//! `$match`, `$group`, `$match`, `$sort`, `$skip`, `$limit`, `$project`,
//! each optional, none repeated.

use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::expr::{Accumulator, AggExpr};
use crate::filter::Filter;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("stage {stage} cannot follow {previous}")]
    OutOfOrder {
        stage: &'static str,
        previous: &'static str,
    },

    #[error("pipeline has no stages")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_i32(&self) -> i32 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortSpec {
    pub keys: Vec<(String, SortDirection)>,
}

impl SortSpec {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.keys
                .iter()
                .map(|(path, dir)| (path.clone(), json!(dir.as_i32())))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectField {
    /// `field: 1`
    Include,
    /// `field: 0`
    Exclude,
    Computed(AggExpr),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub fields: Vec<(String, ProjectField)>,
}

impl Projection {
    pub fn include(paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fields: paths
                .into_iter()
                .map(|p| (p.into(), ProjectField::Include))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether `_id` survives the projection.
    pub fn keeps_id(&self) -> bool {
        !self
            .fields
            .iter()
            .any(|(name, f)| name == "_id" && *f == ProjectField::Exclude)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(name, field)| {
                    let value = match field {
                        ProjectField::Include => json!(1),
                        ProjectField::Exclude => json!(0),
                        ProjectField::Computed(expr) => expr.to_json(),
                    };
                    (name.clone(), value)
                })
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    /// `_id: null`, one group for the whole input.
    Null,
    Expr(AggExpr),
    Compound(Vec<(String, AggExpr)>),
}

impl GroupKey {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            GroupKey::Null => serde_json::Value::Null,
            GroupKey::Expr(expr) => expr.to_json(),
            GroupKey::Compound(parts) => serde_json::Value::Object(
                parts
                    .iter()
                    .map(|(name, expr)| (name.clone(), expr.to_json()))
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupStage {
    pub key: GroupKey,
    pub accumulators: Vec<(String, Accumulator)>,
}

impl GroupStage {
    pub fn to_json(&self) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        body.insert("_id".to_string(), self.key.to_json());
        for (name, acc) in &self.accumulators {
            body.insert(name.clone(), acc.to_json());
        }
        serde_json::Value::Object(body)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Group(GroupStage),
    Sort(SortSpec),
    Skip(u64),
    Limit(u64),
    Project(Projection),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Group(_) => "$group",
            Stage::Sort(_) => "$sort",
            Stage::Skip(_) => "$skip",
            Stage::Limit(_) => "$limit",
            Stage::Project(_) => "$project",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let body = match self {
            Stage::Match(filter) => filter.to_json(),
            Stage::Group(group) => group.to_json(),
            Stage::Sort(sort) => sort.to_json(),
            Stage::Skip(n) | Stage::Limit(n) => json!(n),
            Stage::Project(projection) => projection.to_json(),
        };
        json!({ self.name(): body })
    }

    // Position in the fixed stage order. `$match` ranks by whether a
    // `$group` came before it.
    fn rank(&self, after_group: bool) -> u8 {
        match self {
            Stage::Match(_) if after_group => 2,
            Stage::Match(_) => 0,
            Stage::Group(_) => 1,
            Stage::Sort(_) => 3,
            Stage::Skip(_) => 4,
            Stage::Limit(_) => 5,
            Stage::Project(_) => 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "serde_json::Value")]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Result<Self, PipelineError> {
        if stages.is_empty() {
            return Err(PipelineError::Empty);
        }

        let mut after_group = false;
        let mut last: Option<(u8, &'static str)> = None;
        for stage in &stages {
            let rank = stage.rank(after_group);
            if let Some((prev_rank, prev_name)) = last {
                if rank <= prev_rank {
                    return Err(PipelineError::OutOfOrder {
                        stage: stage.name(),
                        previous: prev_name,
                    });
                }
            }
            if matches!(stage, Stage::Group(_)) {
                after_group = true;
            }
            last = Some((rank, stage.name()));
        }

        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.stages.iter().map(Stage::to_json).collect())
    }
}

impl From<Pipeline> for serde_json::Value {
    fn from(pipeline: Pipeline) -> Self {
        pipeline.to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Clause, FieldOp, Predicate};
    use crate::value::Value;

    fn having() -> Stage {
        Stage::Match(Filter::single(Clause::field(
            "cnt",
            Predicate::Ops(vec![FieldOp::Gt(Value::from(1))]),
        )))
    }

    fn group() -> Stage {
        Stage::Group(GroupStage {
            key: GroupKey::Expr(AggExpr::field("age")),
            accumulators: vec![("cnt".to_string(), Accumulator::count())],
        })
    }

    #[test]
    fn test_match_on_both_sides_of_group() {
        let pipeline = Pipeline::new(vec![
            Stage::Match(Filter::all()),
            group(),
            having(),
            Stage::Limit(5),
        ])
        .unwrap();
        assert_eq!(pipeline.stage_names(), vec!["$match", "$group", "$match", "$limit"]);
    }

    #[test]
    fn test_rejects_out_of_order() {
        let err = Pipeline::new(vec![Stage::Limit(5), Stage::Sort(SortSpec::default())]).unwrap_err();
        assert_eq!(
            err,
            PipelineError::OutOfOrder {
                stage: "$sort",
                previous: "$limit"
            }
        );
    }

    #[test]
    fn test_rejects_repeated_stage() {
        assert!(Pipeline::new(vec![Stage::Skip(1), Stage::Skip(2)]).is_err());
        assert!(Pipeline::new(vec![group(), group()]).is_err());
    }

    #[test]
    fn test_group_json() {
        assert_eq!(
            group().to_json(),
            json!({ "$group": { "_id": "$age", "cnt": { "$sum": 1 } } })
        );
    }
}
