use crate::error::EngineError;
use crate::query::sql::{BinaryOp, Connector, JoinKind};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Caller-built query over one source relation and the relations joined to
/// it. Every relation occurrence is addressed by its integer index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub relation_id: Uuid,
    #[serde(default)]
    pub index_source: i32,
    #[serde(default)]
    pub joins: Vec<QueryJoin>,
    #[serde(default)]
    pub expressions: Vec<QueryExpression>,
    #[serde(default)]
    pub filters: Vec<QueryFilter>,
    #[serde(default)]
    pub orders: Vec<QueryOrder>,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
}

impl QueryRequest {
    pub fn new(relation_id: Uuid) -> Self {
        Self {
            relation_id,
            ..Self::default()
        }
    }

    pub fn join(mut self, join: QueryJoin) -> Self {
        self.joins.push(join);
        self
    }

    pub fn expression(mut self, expression: QueryExpression) -> Self {
        self.expressions.push(expression);
        self
    }

    pub fn filter(mut self, filter: QueryFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order(mut self, order: QueryOrder) -> Self {
        self.orders.push(order);
        self
    }

    pub fn paginate(mut self, limit: u64, offset: u64) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryJoin {
    /// Relationship attribute connecting `index_from` and `index`.
    pub attribute_id: Uuid,
    pub index: i32,
    pub index_from: i32,
    /// `INNER`, `LEFT`, `RIGHT` or `FULL`.
    pub connector: String,
}

impl QueryJoin {
    pub fn new(attribute_id: Uuid, index_from: i32, index: i32, connector: &str) -> Self {
        Self {
            attribute_id,
            index,
            index_from,
            connector: connector.to_string(),
        }
    }
}

/// Projected column: an attribute of one relation index or a sub-query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueryExpression {
    #[serde(default)]
    pub attribute_id: Option<Uuid>,
    /// Far-side attribute of an n:m association, together with `outside_in`.
    #[serde(default)]
    pub attribute_id_nm: Option<Uuid>,
    #[serde(default)]
    pub query: Option<Box<QueryRequest>>,
    #[serde(default)]
    pub index: i32,
    #[serde(default)]
    pub aggregator: Option<String>,
    #[serde(default)]
    pub group_by: bool,
    #[serde(default)]
    pub distinct: bool,
    /// The attribute lives on the other relation and points at this index.
    #[serde(default)]
    pub outside_in: bool,
}

impl QueryExpression {
    pub fn attribute(attribute_id: Uuid, index: i32) -> Self {
        Self {
            attribute_id: Some(attribute_id),
            index,
            ..Self::default()
        }
    }

    pub fn subquery(query: QueryRequest) -> Self {
        Self {
            query: Some(Box::new(query)),
            ..Self::default()
        }
    }

    pub fn aggregate(mut self, aggregator: &str) -> Self {
        self.aggregator = Some(aggregator.to_string());
        self
    }

    pub fn grouped(mut self) -> Self {
        self.group_by = true;
        self
    }

    pub fn outside_in(mut self, attribute_id_nm: Option<Uuid>) -> Self {
        self.outside_in = true;
        self.attribute_id_nm = attribute_id_nm;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilter {
    /// `AND` or `OR`; ignored on the first filter of a scope.
    #[serde(default)]
    pub connector: String,
    pub operator: String,
    pub side0: QueryFilterSide,
    #[serde(default)]
    pub side1: QueryFilterSide,
}

impl QueryFilter {
    pub fn new(operator: &str, side0: QueryFilterSide, side1: QueryFilterSide) -> Self {
        Self {
            connector: "AND".to_string(),
            operator: operator.to_string(),
            side0,
            side1,
        }
    }

    pub fn or(mut self) -> Self {
        self.connector = "OR".to_string();
        self
    }
}

/// One operand of a filter. Exactly one of attribute, sub-query or value is
/// used, checked in that order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilterSide {
    #[serde(default)]
    pub attribute_id: Option<Uuid>,
    #[serde(default)]
    pub attribute_index: i32,
    /// Scopes upward the attribute's index is resolved in; 0 is the current.
    #[serde(default)]
    pub attribute_nested: u32,
    /// Opening brackets on side 0, closing brackets on side 1.
    #[serde(default)]
    pub brackets: u32,
    #[serde(default)]
    pub query: Option<Box<QueryRequest>>,
    #[serde(default)]
    pub value: Option<JsonValue>,
}

impl QueryFilterSide {
    pub fn attribute(attribute_id: Uuid, index: i32) -> Self {
        Self {
            attribute_id: Some(attribute_id),
            attribute_index: index,
            ..Self::default()
        }
    }

    pub fn value(value: JsonValue) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    pub fn subquery(query: QueryRequest) -> Self {
        Self {
            query: Some(Box::new(query)),
            ..Self::default()
        }
    }

    pub fn nested(mut self, levels_up: u32) -> Self {
        self.attribute_nested = levels_up;
        self
    }

    pub fn brackets(mut self, brackets: u32) -> Self {
        self.brackets = brackets;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueryOrder {
    #[serde(default)]
    pub attribute_id: Option<Uuid>,
    /// Orders by a projected expression instead of an attribute.
    #[serde(default)]
    pub expression_pos: Option<usize>,
    #[serde(default)]
    pub index: i32,
    #[serde(default = "default_true")]
    pub ascending: bool,
}

fn default_true() -> bool {
    true
}

impl QueryOrder {
    pub fn attribute(attribute_id: Uuid, index: i32, ascending: bool) -> Self {
        Self {
            attribute_id: Some(attribute_id),
            expression_pos: None,
            index,
            ascending,
        }
    }

    pub fn expression(pos: usize, ascending: bool) -> Self {
        Self {
            attribute_id: None,
            expression_pos: Some(pos),
            index: 0,
            ascending,
        }
    }
}

pub fn parse_connector(raw: &str) -> Result<Connector, EngineError> {
    match raw {
        "AND" => Ok(Connector::And),
        "OR" => Ok(Connector::Or),
        other => Err(EngineError::Validation(format!(
            "invalid filter connector '{other}'"
        ))),
    }
}

pub fn parse_join_kind(raw: &str) -> Result<JoinKind, EngineError> {
    match raw {
        "INNER" => Ok(JoinKind::Inner),
        "LEFT" => Ok(JoinKind::Left),
        "RIGHT" => Ok(JoinKind::Right),
        "FULL" => Ok(JoinKind::Full),
        other => Err(EngineError::Validation(format!(
            "invalid join connector '{other}'"
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Like,
    ILike,
    NotLike,
    NotILike,
    IsNull,
    IsNotNull,
    EqAny,
    NeAll,
    Contains,
    ContainedBy,
    Overlaps,
}

impl FilterOperator {
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        Ok(match raw {
            "=" => FilterOperator::Eq,
            "<>" => FilterOperator::Ne,
            "<" => FilterOperator::Lt,
            ">" => FilterOperator::Gt,
            "<=" => FilterOperator::Le,
            ">=" => FilterOperator::Ge,
            "LIKE" => FilterOperator::Like,
            "ILIKE" => FilterOperator::ILike,
            "NOT LIKE" => FilterOperator::NotLike,
            "NOT ILIKE" => FilterOperator::NotILike,
            "IS NULL" => FilterOperator::IsNull,
            "IS NOT NULL" => FilterOperator::IsNotNull,
            "= ANY" => FilterOperator::EqAny,
            "<> ALL" => FilterOperator::NeAll,
            "@>" => FilterOperator::Contains,
            "<@" => FilterOperator::ContainedBy,
            "&&" => FilterOperator::Overlaps,
            other => {
                return Err(EngineError::Validation(format!(
                    "invalid filter operator '{other}'"
                )));
            }
        })
    }

    /// Operators taking no right-hand side.
    pub fn is_null_check(self) -> bool {
        matches!(self, FilterOperator::IsNull | FilterOperator::IsNotNull)
    }

    pub fn is_like(self) -> bool {
        matches!(
            self,
            FilterOperator::Like
                | FilterOperator::ILike
                | FilterOperator::NotLike
                | FilterOperator::NotILike
        )
    }

    /// Operators whose right-hand side is a set of values.
    pub fn takes_set(self) -> bool {
        matches!(self, FilterOperator::EqAny | FilterOperator::NeAll)
    }

    /// Binary form, `None` for null checks.
    pub fn binary_op(self) -> Option<BinaryOp> {
        Some(match self {
            FilterOperator::Eq => BinaryOp::Eq,
            FilterOperator::Ne => BinaryOp::Ne,
            FilterOperator::Lt => BinaryOp::Lt,
            FilterOperator::Gt => BinaryOp::Gt,
            FilterOperator::Le => BinaryOp::Le,
            FilterOperator::Ge => BinaryOp::Ge,
            FilterOperator::Like => BinaryOp::Like,
            FilterOperator::ILike => BinaryOp::ILike,
            FilterOperator::NotLike => BinaryOp::NotLike,
            FilterOperator::NotILike => BinaryOp::NotILike,
            FilterOperator::EqAny => BinaryOp::EqAny,
            FilterOperator::NeAll => BinaryOp::NeAll,
            FilterOperator::Contains => BinaryOp::Contains,
            FilterOperator::ContainedBy => BinaryOp::ContainedBy,
            FilterOperator::Overlaps => BinaryOp::Overlaps,
            FilterOperator::IsNull | FilterOperator::IsNotNull => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregator {
    Array,
    Avg,
    Count,
    List,
    Max,
    Min,
    Sum,
    /// Keeps one row per record of the expression's index.
    Record,
}

impl Aggregator {
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        Ok(match raw {
            "array" => Aggregator::Array,
            "avg" => Aggregator::Avg,
            "count" => Aggregator::Count,
            "list" => Aggregator::List,
            "max" => Aggregator::Max,
            "min" => Aggregator::Min,
            "sum" => Aggregator::Sum,
            "record" => Aggregator::Record,
            other => {
                return Err(EngineError::Validation(format!(
                    "invalid aggregator '{other}'"
                )));
            }
        })
    }
}
