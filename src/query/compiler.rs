//! Translates a [`QueryRequest`] into a [`Select`] tree.
//!
//! Compilation is a pure function of the schema snapshot, the login's access
//! and the request. Sub-queries in expressions and filter sides recurse with
//! the nesting level raised by one; each level builds its own tree and the
//! emitter numbers placeholders afterwards, so no argument state is shared
//! between levels.

use crate::catalog::SchemaSnapshot;
use crate::catalog::access::{AccessLevel, LoginAccess};
use crate::catalog::schema::{Attribute, EdgeDirection, Relation};
use crate::catalog::types::{ContentType, Value};
use crate::commit::files::file_table;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::permission::{self, AccessTarget, PolicyAction};
use crate::query::plan::{
    Aggregator, FilterOperator, QueryExpression, QueryFilter, QueryFilterSide, QueryJoin,
    QueryOrder, QueryRequest, parse_connector, parse_join_kind,
};
use crate::query::sql::{
    AggFunc, Condition, Connector, Ident, Join, OrderItem, Select, SelectItem, SqlExpr, TableRef,
};
use crate::store::Statement;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use uuid::Uuid;

/// Output of [`compile`] for a top-level request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub statement: Statement,
    /// Total-count statement sharing the data statement's joins and filters.
    pub count: Option<Statement>,
    /// Leading columns holding projected expression values.
    pub expression_count: usize,
    /// Relation indexes of the record id columns following the expressions.
    pub record_id_indexes: Vec<i32>,
    pub limit: u64,
    pub offset: u64,
}

pub fn compile(
    snapshot: &SchemaSnapshot,
    access: &LoginAccess,
    config: &EngineConfig,
    request: &QueryRequest,
) -> Result<CompiledQuery, EngineError> {
    let compiler = Compiler {
        snapshot,
        access,
        config,
    };
    let built = compiler.select(request, 0, &[])?;
    let statement = built.select.to_statement();
    let count = built.count.as_ref().map(Select::to_statement);
    debug!(
        relation_id = %request.relation_id,
        args = statement.args.len(),
        count_args = count.as_ref().map_or(0, |c| c.args.len()),
        joins = request.joins.len(),
        "query compiled"
    );
    Ok(CompiledQuery {
        statement,
        count,
        expression_count: request.expressions.len(),
        record_id_indexes: built.record_id_indexes,
        limit: request.limit,
        offset: request.offset,
    })
}

/// Relation alias of `index` at nesting `level`.
pub fn relation_alias(index: i32, level: u32) -> Result<Ident, EngineError> {
    if index < 0 {
        return Err(EngineError::Validation(format!(
            "relation index {index} is negative"
        )));
    }
    if level == 0 {
        Ident::new(&format!("_r{index}"))
    } else {
        Ident::new(&format!("_r{index}_l{level}"))
    }
}

/// Table of `relation`: the owning module names the database schema.
pub(crate) fn relation_table(
    snapshot: &SchemaSnapshot,
    relation: &Relation,
) -> Result<TableRef, EngineError> {
    let module = snapshot.relation_module(relation)?;
    Ok(TableRef::new(
        Ident::new(&module.name)?,
        Ident::new(&relation.name)?,
    ))
}

fn expression_alias(pos: usize) -> Result<Ident, EngineError> {
    Ident::new(&format!("_e{pos}"))
}

fn record_id_alias(index: i32) -> Result<Ident, EngineError> {
    Ident::new(&format!("_t{index}"))
}

fn subquery_alias(pos: usize, level: u32) -> Result<Ident, EngineError> {
    Ident::new(&format!("_s{pos}_l{level}"))
}

/// Relation indexes visible at one nesting level.
#[derive(Debug, Clone)]
struct Scope {
    level: u32,
    relations: BTreeMap<i32, Uuid>,
}

impl Scope {
    fn register(&mut self, index: i32, relation_id: Uuid) -> Result<(), EngineError> {
        if self.relations.insert(index, relation_id).is_some() {
            return Err(EngineError::Validation(format!(
                "relation index {index} is used twice"
            )));
        }
        Ok(())
    }

    fn relation(&self, index: i32) -> Result<Uuid, EngineError> {
        self.relations.get(&index).copied().ok_or_else(|| {
            EngineError::Validation(format!("relation index {index} is not part of the query"))
        })
    }

    fn alias(&self, index: i32) -> Result<Ident, EngineError> {
        relation_alias(index, self.level)
    }
}

struct Built {
    select: Select,
    count: Option<Select>,
    record_id_indexes: Vec<i32>,
}

#[derive(Default)]
struct Grouping {
    group_by: Vec<SqlExpr>,
    /// Some expression aggregates or groups.
    aggregated: bool,
    /// Indexes kept one row per record through the `record` aggregator.
    record_indexes: BTreeSet<i32>,
    /// Unaggregated expressions by position and index. `None` stands for a
    /// related-record sub-query, which needs the index's primary key grouped.
    plain: Vec<(usize, i32, Option<SqlExpr>)>,
}

impl Grouping {
    fn active(&self) -> bool {
        self.aggregated || !self.record_indexes.is_empty()
    }

    /// Under grouping, `column` of `index` must be grouped itself or belong
    /// to an index kept per record.
    fn covers(&self, index: i32, column: Option<&SqlExpr>) -> bool {
        !self.active()
            || self.record_indexes.contains(&index)
            || column.is_some_and(|c| self.group_by.contains(c))
    }

    fn check_plain(&self) -> Result<(), EngineError> {
        for (pos, index, column) in &self.plain {
            if !self.covers(*index, column.as_ref()) {
                return Err(EngineError::Validation(format!(
                    "expression {pos} must be grouped or aggregated"
                )));
            }
        }
        Ok(())
    }
}

struct Compiler<'a> {
    snapshot: &'a SchemaSnapshot,
    access: &'a LoginAccess,
    config: &'a EngineConfig,
}

impl Compiler<'_> {
    fn select(
        &self,
        request: &QueryRequest,
        level: u32,
        outer: &[Scope],
    ) -> Result<Built, EngineError> {
        if level > self.config.max_nesting_depth {
            return Err(EngineError::Validation(format!(
                "sub-queries nest deeper than {} levels",
                self.config.max_nesting_depth
            )));
        }
        if request.expressions.is_empty() {
            return Err(EngineError::Validation(
                "query has no expressions".to_string(),
            ));
        }
        if request.filters.len() > self.config.max_filter_count {
            return Err(EngineError::Validation(format!(
                "query has {} filters, at most {} are allowed",
                request.filters.len(),
                self.config.max_filter_count
            )));
        }
        self.authorize(request)?;

        let source = self.snapshot.get_relation(request.relation_id)?;
        let mut scope = Scope {
            level,
            relations: BTreeMap::new(),
        };
        scope.register(request.index_source, source.id)?;
        let source_alias = scope.alias(request.index_source)?;
        let from = self.table(source)?.aliased(source_alias.clone());

        let mut joins = Vec::with_capacity(request.joins.len());
        for join in &request.joins {
            joins.push(self.join(&mut scope, join)?);
        }

        let mut scopes = outer.to_vec();
        scopes.push(scope);
        let scopes = scopes.as_slice();

        let mut grouping = Grouping::default();
        let mut columns = Vec::with_capacity(request.expressions.len());
        for (pos, expression) in request.expressions.iter().enumerate() {
            let expr = self.expression(scopes, pos, expression, &mut grouping)?;
            columns.push(SelectItem {
                expr,
                alias: Some(expression_alias(pos)?),
            });
        }
        grouping.check_plain()?;

        let scope = current(scopes);
        let mut record_id_indexes = Vec::new();
        if level == 0 {
            for (&index, &relation_id) in &scope.relations {
                let expr = if grouping.active() && !grouping.record_indexes.contains(&index) {
                    SqlExpr::Null
                } else {
                    SqlExpr::column(&scope.alias(index)?, &self.pk_ident(relation_id)?)
                };
                columns.push(SelectItem {
                    expr,
                    alias: Some(record_id_alias(index)?),
                });
                record_id_indexes.push(index);
            }
        }

        let mut filters = self.filters(scopes, &request.filters)?;
        if let Some(policy) = permission::policy_filter(
            self.snapshot,
            self.access,
            PolicyAction::Select,
            &source_alias,
            source,
        )? {
            filters.push(Condition::and(policy));
        }

        let order_by = self.orders(scope, request, &grouping)?;

        let count = (level == 0).then(|| -> Result<Select, EngineError> {
            let pk = SqlExpr::column(&source_alias, &self.pk_ident(source.id)?);
            Ok(Select {
                columns: vec![SelectItem {
                    expr: SqlExpr::aggregate(AggFunc::Count, true, pk),
                    alias: None,
                }],
                joins: joins.clone(),
                filters: filters.clone(),
                ..Select::from(from.clone())
            })
        });

        let select = Select {
            columns,
            from,
            joins,
            filters,
            group_by: grouping.group_by,
            order_by,
            limit: (request.limit != 0).then_some(request.limit),
            offset: (request.offset != 0).then_some(request.offset),
        };
        Ok(Built {
            select,
            count: count.transpose()?,
            record_id_indexes,
        })
    }

    /// Read access on every attribute the request touches in this scope.
    fn authorize(&self, request: &QueryRequest) -> Result<(), EngineError> {
        let expression_ids = request
            .expressions
            .iter()
            .flat_map(|e| [e.attribute_id, e.attribute_id_nm]);
        let filter_ids = request
            .filters
            .iter()
            .flat_map(|f| [f.side0.attribute_id, f.side1.attribute_id]);
        let order_ids = request.orders.iter().map(|o| o.attribute_id);
        for attribute_id in expression_ids.chain(filter_ids).chain(order_ids).flatten() {
            self.snapshot.get_attribute(attribute_id)?;
            permission::require(
                self.snapshot,
                self.access,
                AccessTarget::Attribute(attribute_id),
                AccessLevel::READ,
            )?;
        }
        Ok(())
    }

    fn table(&self, relation: &Relation) -> Result<TableRef, EngineError> {
        relation_table(self.snapshot, relation)
    }

    fn pk_ident(&self, relation_id: Uuid) -> Result<Ident, EngineError> {
        let relation = self.snapshot.get_relation(relation_id)?;
        Ident::new(&self.snapshot.pk_attribute(relation)?.name)
    }

    fn join(&self, scope: &mut Scope, join: &QueryJoin) -> Result<Join, EngineError> {
        let kind = parse_join_kind(&join.connector)?;
        let from_relation_id = scope.relation(join.index_from)?;
        let edge = self.snapshot.get_edge(join.attribute_id)?;
        let resolved = edge.resolve_from(from_relation_id).ok_or_else(|| {
            EngineError::Validation(format!(
                "join attribute '{}' does not connect to relation index {}",
                join.attribute_id, join.index_from
            ))
        })?;
        let attribute = Ident::new(&self.snapshot.get_attribute(join.attribute_id)?.name)?;
        let target = self.snapshot.get_relation(resolved.target_relation_id)?;
        scope.register(join.index, target.id)?;

        let from_alias = scope.alias(join.index_from)?;
        let to_alias = scope.alias(join.index)?;
        let key = match resolved.direction {
            EdgeDirection::Forward => SqlExpr::eq(
                SqlExpr::column(&to_alias, &self.pk_ident(target.id)?),
                SqlExpr::column(&from_alias, &attribute),
            ),
            EdgeDirection::Backward => SqlExpr::eq(
                SqlExpr::column(&to_alias, &attribute),
                SqlExpr::column(&from_alias, &self.pk_ident(from_relation_id)?),
            ),
        };
        let mut on = vec![key];
        if let Some(policy) = permission::policy_filter(
            self.snapshot,
            self.access,
            PolicyAction::Select,
            &to_alias,
            target,
        )? {
            on.push(policy);
        }
        Ok(Join {
            kind,
            table: self.table(target)?.aliased(to_alias),
            on,
        })
    }

    fn expression(
        &self,
        scopes: &[Scope],
        pos: usize,
        expression: &QueryExpression,
        grouping: &mut Grouping,
    ) -> Result<SqlExpr, EngineError> {
        let scope = current(scopes);
        if let Some(query) = &expression.query {
            if expression.attribute_id.is_some() {
                return Err(EngineError::Validation(format!(
                    "expression {pos} has both an attribute and a sub-query"
                )));
            }
            if expression.aggregator.is_some() || expression.group_by {
                return Err(EngineError::Validation(format!(
                    "sub-query expression {pos} must aggregate inside the sub-query"
                )));
            }
            return self.subquery(scopes, query).map(|s| SqlExpr::Subquery(Box::new(s)));
        }

        let attribute_id = expression.attribute_id.ok_or_else(|| {
            EngineError::Validation(format!(
                "expression {pos} has neither an attribute nor a sub-query"
            ))
        })?;
        let attribute = self.snapshot.get_attribute(attribute_id)?;
        let relation_id = scope.relation(expression.index)?;
        let alias = scope.alias(expression.index)?;
        let aggregator = expression
            .aggregator
            .as_deref()
            .map(Aggregator::parse)
            .transpose()?;
        if expression.distinct && aggregator.is_none() {
            return Err(EngineError::Validation(format!(
                "expression {pos} uses distinct without an aggregator"
            )));
        }

        if attribute.content.is_files() || expression.outside_in {
            if aggregator.is_some() || expression.group_by {
                return Err(EngineError::Validation(format!(
                    "expression {pos} cannot aggregate over related records"
                )));
            }
            grouping.plain.push((pos, expression.index, None));
            let sub = if attribute.content.is_files() {
                self.files_subquery(scope, pos, attribute, expression.index)?
            } else {
                self.outside_in_subquery(scope, pos, expression, attribute, relation_id, &alias)?
            };
            return Ok(SqlExpr::Subquery(Box::new(sub)));
        }

        if attribute.relation_id != relation_id {
            return Err(EngineError::Validation(format!(
                "attribute '{}' is not part of relation index {}",
                attribute.name, expression.index
            )));
        }
        let column = SqlExpr::column(&alias, &Ident::new(&attribute.name)?);
        if expression.group_by {
            grouping.group_by.push(column.clone());
            grouping.aggregated = true;
        }
        Ok(match aggregator {
            None => {
                if !expression.group_by {
                    grouping.plain.push((pos, expression.index, Some(column.clone())));
                }
                column
            }
            Some(Aggregator::Record) => {
                if grouping.record_indexes.insert(expression.index) {
                    grouping
                        .group_by
                        .push(SqlExpr::column(&alias, &self.pk_ident(relation_id)?));
                }
                column
            }
            Some(aggregator) => {
                grouping.aggregated = true;
                aggregate(aggregator, expression.distinct, column)
            }
        })
    }

    /// Sub-query in an expression or filter side. It must yield one column.
    fn subquery(&self, scopes: &[Scope], query: &QueryRequest) -> Result<Select, EngineError> {
        if query.expressions.len() != 1 {
            return Err(EngineError::Validation(format!(
                "sub-query must have exactly one expression, found {}",
                query.expressions.len()
            )));
        }
        Ok(self.select(query, current(scopes).level + 1, scopes)?.select)
    }

    /// Record ids on the far side of a relationship pointing at `relation_id`.
    fn outside_in_subquery(
        &self,
        scope: &Scope,
        pos: usize,
        expression: &QueryExpression,
        attribute: &Attribute,
        relation_id: Uuid,
        alias: &Ident,
    ) -> Result<Select, EngineError> {
        let edge = self.snapshot.get_edge(attribute.id)?;
        if edge.pk_relation_id != relation_id {
            return Err(EngineError::Validation(format!(
                "attribute '{}' does not point at relation index {}",
                attribute.name, expression.index
            )));
        }
        let other = self.snapshot.get_relation(edge.fk_relation_id)?;
        let sub_alias = subquery_alias(pos, scope.level)?;
        let correlate = SqlExpr::eq(
            SqlExpr::column(&sub_alias, &Ident::new(&attribute.name)?),
            SqlExpr::column(alias, &self.pk_ident(relation_id)?),
        );

        let (projected, single) = match expression.attribute_id_nm {
            Some(nm_id) => {
                let nm = self.snapshot.get_attribute(nm_id)?;
                if nm.relation_id != other.id || !nm.content.is_relationship() {
                    return Err(EngineError::Validation(format!(
                        "attribute '{}' is not a relationship of '{}'",
                        nm.name, other.name
                    )));
                }
                (SqlExpr::column(&sub_alias, &Ident::new(&nm.name)?), false)
            }
            None => (
                SqlExpr::column(&sub_alias, &self.pk_ident(other.id)?),
                edge.content == ContentType::OneToOne,
            ),
        };

        let mut select = Select::from(self.table(other)?.aliased(sub_alias.clone())).filter(correlate);
        if let Some(policy) = permission::policy_filter(
            self.snapshot,
            self.access,
            PolicyAction::Select,
            &sub_alias,
            other,
        )? {
            select = select.filter(policy);
        }
        Ok(if single {
            Select {
                limit: Some(1),
                ..select.column(projected, None)
            }
        } else {
            select.column(SqlExpr::aggregate(AggFunc::ArrayAgg, false, projected), None)
        })
    }

    /// Live (not soft-deleted) files assigned to the record as `[{id, name}]`.
    fn files_subquery(
        &self,
        scope: &Scope,
        pos: usize,
        attribute: &Attribute,
        index: i32,
    ) -> Result<Select, EngineError> {
        let relation_id = scope.relation(index)?;
        if attribute.relation_id != relation_id {
            return Err(EngineError::Validation(format!(
                "attribute '{}' is not part of relation index {index}",
                attribute.name
            )));
        }
        let sub_alias = subquery_alias(pos, scope.level)?;
        let table = file_table(&self.config.file_schema, attribute.id)?.aliased(sub_alias.clone());
        let col = |name: &str| -> Result<SqlExpr, EngineError> {
            Ok(SqlExpr::column(&sub_alias, &Ident::new(name)?))
        };
        let object = SqlExpr::Builtin {
            name: "JSON_BUILD_OBJECT",
            args: vec![
                SqlExpr::Str("id"),
                col("file_id")?,
                SqlExpr::Str("name"),
                col("name")?,
            ],
        };
        Ok(Select::from(table)
            .column(SqlExpr::aggregate(AggFunc::JsonAgg, false, object), None)
            .filter(SqlExpr::eq(
                col("record_id")?,
                SqlExpr::column(&scope.alias(index)?, &self.pk_ident(relation_id)?),
            ))
            .filter(SqlExpr::IsNull {
                expr: Box::new(col("date_delete")?),
                negated: false,
            }))
    }

    /// Flattens filters into `WHERE` conditions. The first condition gets one
    /// extra opening bracket and the last one extra closing bracket, so
    /// everything the caller supplied stays inside one group.
    fn filters(
        &self,
        scopes: &[Scope],
        filters: &[QueryFilter],
    ) -> Result<Vec<Condition>, EngineError> {
        let mut out = Vec::with_capacity(filters.len());
        let mut depth: i64 = 0;
        for (i, filter) in filters.iter().enumerate() {
            let connector = if i == 0 {
                Connector::And
            } else {
                parse_connector(&filter.connector)?
            };
            let operator = FilterOperator::parse(&filter.operator)?;
            depth += i64::from(filter.side0.brackets);
            depth -= i64::from(filter.side1.brackets);
            if depth < 0 {
                return Err(EngineError::Validation(format!(
                    "filter {i} closes a bracket that was never opened"
                )));
            }
            out.push(Condition {
                connector,
                open: filter.side0.brackets,
                expr: self.filter_expr(scopes, operator, filter)?,
                close: filter.side1.brackets,
            });
        }
        if depth != 0 {
            return Err(EngineError::Validation(
                "filter brackets are unbalanced".to_string(),
            ));
        }
        if let Some(first) = out.first_mut() {
            first.open += 1;
        }
        if let Some(last) = out.last_mut() {
            last.close += 1;
        }
        Ok(out)
    }

    fn filter_expr(
        &self,
        scopes: &[Scope],
        operator: FilterOperator,
        filter: &QueryFilter,
    ) -> Result<SqlExpr, EngineError> {
        let left = self.filter_side(scopes, &filter.side0, false, false)?;
        let Some(op) = operator.binary_op() else {
            return Ok(SqlExpr::IsNull {
                expr: Box::new(left),
                negated: operator == FilterOperator::IsNotNull,
            });
        };
        let right =
            self.filter_side(scopes, &filter.side1, operator.is_like(), operator.takes_set())?;
        Ok(SqlExpr::binary(left, op, right))
    }

    fn filter_side(
        &self,
        scopes: &[Scope],
        side: &QueryFilterSide,
        like_pattern: bool,
        set: bool,
    ) -> Result<SqlExpr, EngineError> {
        if let Some(attribute_id) = side.attribute_id {
            if side.query.is_some() {
                return Err(EngineError::Validation(
                    "filter side has both an attribute and a sub-query".to_string(),
                ));
            }
            let scope = scopes
                .len()
                .checked_sub(1 + side.attribute_nested as usize)
                .and_then(|i| scopes.get(i))
                .ok_or_else(|| {
                    EngineError::Validation(format!(
                        "filter references a scope {} levels up",
                        side.attribute_nested
                    ))
                })?;
            let attribute = self.snapshot.get_attribute(attribute_id)?;
            if attribute.content.is_files() {
                return Err(EngineError::Validation(format!(
                    "files attribute '{}' cannot be filtered",
                    attribute.name
                )));
            }
            if attribute.relation_id != scope.relation(side.attribute_index)? {
                return Err(EngineError::Validation(format!(
                    "attribute '{}' is not part of relation index {}",
                    attribute.name, side.attribute_index
                )));
            }
            return Ok(SqlExpr::column(
                &scope.alias(side.attribute_index)?,
                &Ident::new(&attribute.name)?,
            ));
        }
        if let Some(query) = &side.query {
            return self.subquery(scopes, query).map(|s| SqlExpr::Subquery(Box::new(s)));
        }

        let value = side.value.as_ref().map_or(Value::Null, Value::from_json);
        if set
            && !matches!(
                value,
                Value::IntegerArray(_) | Value::TextArray(_) | Value::UuidArray(_)
            )
        {
            return Err(EngineError::Validation(format!(
                "set operator needs an array of integers or strings, got {}",
                value.type_name()
            )));
        }
        let param = SqlExpr::Param(value);
        Ok(if like_pattern {
            SqlExpr::Concat(vec![SqlExpr::Str("%"), param, SqlExpr::Str("%")])
        } else {
            param
        })
    }

    fn orders(
        &self,
        scope: &Scope,
        request: &QueryRequest,
        grouping: &Grouping,
    ) -> Result<Vec<OrderItem>, EngineError> {
        request
            .orders
            .iter()
            .map(|order| {
                Ok(OrderItem {
                    expr: self.order_expr(scope, request, order, grouping)?,
                    ascending: order.ascending,
                })
            })
            .collect()
    }

    fn order_expr(
        &self,
        scope: &Scope,
        request: &QueryRequest,
        order: &QueryOrder,
        grouping: &Grouping,
    ) -> Result<SqlExpr, EngineError> {
        if let Some(pos) = order.expression_pos {
            if pos >= request.expressions.len() {
                return Err(EngineError::Validation(format!(
                    "order references expression {pos} which does not exist"
                )));
            }
            return Ok(SqlExpr::Name(expression_alias(pos)?));
        }
        let attribute_id = order.attribute_id.ok_or_else(|| {
            EngineError::Validation("order has neither an attribute nor an expression".to_string())
        })?;

        // grouped or aggregated columns can only be ordered through their alias
        let projected = request.expressions.iter().position(|e| {
            e.attribute_id == Some(attribute_id)
                && e.index == order.index
                && e.query.is_none()
                && !e.outside_in
                && (e.aggregator.is_some() || e.group_by)
        });
        if let Some(pos) = projected {
            return Ok(SqlExpr::Name(expression_alias(pos)?));
        }

        let attribute = self.snapshot.get_attribute(attribute_id)?;
        if attribute.content.is_files() || attribute.relation_id != scope.relation(order.index)? {
            return Err(EngineError::Validation(format!(
                "cannot order by attribute '{}' at relation index {}",
                attribute.name, order.index
            )));
        }
        let column = SqlExpr::column(&scope.alias(order.index)?, &Ident::new(&attribute.name)?);
        if !grouping.covers(order.index, Some(&column)) {
            return Err(EngineError::Validation(format!(
                "cannot order by ungrouped attribute '{}' at relation index {}",
                attribute.name, order.index
            )));
        }
        Ok(column)
    }
}

fn current(scopes: &[Scope]) -> &Scope {
    // select() always pushes the scope it compiles before descending
    &scopes[scopes.len() - 1]
}

fn aggregate(aggregator: Aggregator, distinct: bool, column: SqlExpr) -> SqlExpr {
    match aggregator {
        Aggregator::Array => SqlExpr::aggregate(AggFunc::ArrayAgg, distinct, column),
        Aggregator::Avg => SqlExpr::Cast {
            expr: Box::new(SqlExpr::aggregate(AggFunc::Avg, distinct, column)),
            ty: "NUMERIC(20,2)",
        },
        Aggregator::Count => SqlExpr::aggregate(AggFunc::Count, distinct, column),
        Aggregator::List => SqlExpr::Aggregate {
            func: AggFunc::StringAgg,
            distinct,
            args: vec![
                SqlExpr::Cast {
                    expr: Box::new(column),
                    ty: "TEXT",
                },
                SqlExpr::Str(", "),
            ],
        },
        Aggregator::Max => SqlExpr::aggregate(AggFunc::Max, distinct, column),
        Aggregator::Min => SqlExpr::aggregate(AggFunc::Min, distinct, column),
        Aggregator::Sum => SqlExpr::aggregate(AggFunc::Sum, distinct, column),
        Aggregator::Record => column,
    }
}
