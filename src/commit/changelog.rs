//! Per-record change log.
//!
//! One `data_log` row per changed record and write, one `data_log_value` row
//! per changed attribute. Values are compared in their JSON form.

use crate::catalog::schema::Relation;
use crate::catalog::types::{Value, is_decimal_literal};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::query::sql::{AggFunc, BinaryOp, Delete, Ident, Insert, Select, SqlExpr, TableRef};
use crate::store::{ExecContext, StoreTx, run_execute};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

const SECONDS_PER_DAY: i64 = 86_400;

/// Identity of a logged value: attribute, far-side n:m attribute, outside-in.
pub type LogKey = (Uuid, Option<Uuid>, bool);

#[derive(Debug, Clone, PartialEq)]
pub struct LoggedValue {
    pub attribute_id: Uuid,
    pub attribute_id_nm: Option<Uuid>,
    pub outside_in: bool,
    /// File attributes log their change set and skip value comparison.
    pub files: bool,
    /// Numeric columns compare by decimal value, not by text.
    pub numeric: bool,
    pub value: JsonValue,
}

impl LoggedValue {
    pub fn key(&self) -> LogKey {
        (self.attribute_id, self.attribute_id_nm, self.outside_in)
    }
}

/// Values worth logging.
///
/// Without `old` (a new record) every non-null value is kept. Otherwise a value
/// is kept when its JSON form differs from the old one; file values are kept
/// whenever a change was recorded.
pub fn diff(old: Option<&BTreeMap<LogKey, JsonValue>>, new: Vec<LoggedValue>) -> Vec<LoggedValue> {
    new.into_iter()
        .filter(|v| {
            if v.files || old.is_none() {
                return !v.value.is_null();
            }
            let before = old
                .and_then(|o| o.get(&v.key()))
                .map(|b| normalize(b, v))
                .unwrap_or(JsonValue::Null);
            before != normalize(&v.value, v)
        })
        .collect()
}

/// Comparable form of a value. Outside-in values are id sets: a 1:1 side
/// reads back as a single id, n:m sides come back in arbitrary order, and an
/// empty set reads as NULL.
fn normalize(value: &JsonValue, logged: &LoggedValue) -> JsonValue {
    if logged.outside_in {
        let items: Vec<JsonValue> = match value {
            JsonValue::Null => Vec::new(),
            JsonValue::Array(items) => items.iter().map(canonical_number).collect(),
            single => vec![canonical_number(single)],
        };
        if items.is_empty() {
            return JsonValue::Null;
        }
        if items.iter().all(JsonValue::is_i64) {
            let mut ids: Vec<i64> = items.iter().filter_map(JsonValue::as_i64).collect();
            ids.sort_unstable();
            return JsonValue::from(ids);
        }
        return JsonValue::Array(items);
    }
    match value {
        JsonValue::Array(items) if items.is_empty() => JsonValue::Null,
        number if logged.numeric => canonical_number(number),
        other => other.clone(),
    }
}

/// `5`, `"5"` and `"5.00"` all become `5`; `"1200.50"` becomes `"1200.5"`.
fn canonical_number(value: &JsonValue) -> JsonValue {
    let text = match value {
        JsonValue::Number(n) if n.is_i64() => return value.clone(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) if is_decimal_literal(s) => s.clone(),
        other => return other.clone(),
    };
    let trimmed = if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text.as_str()
    };
    match trimmed.parse::<i64>() {
        Ok(n) => JsonValue::from(n),
        Err(_) => JsonValue::String(trimmed.to_string()),
    }
}

fn log_table(config: &EngineConfig, name: &str) -> Result<TableRef, EngineError> {
    Ok(TableRef::new(Ident::new(&config.log_schema)?, Ident::new(name)?))
}

fn idents(names: &[&str]) -> Result<Vec<Ident>, EngineError> {
    names.iter().map(|n| Ident::new(n)).collect()
}

/// Writes one log entry for `record_id` unless `values` is empty.
#[allow(clippy::too_many_arguments)]
pub(crate) fn persist(
    ctx: &ExecContext,
    tx: &mut dyn StoreTx,
    config: &EngineConfig,
    relation_id: Uuid,
    record_id: i64,
    login_id: i64,
    values: &[LoggedValue],
    now: i64,
) -> Result<Option<Uuid>, EngineError> {
    if values.is_empty() {
        return Ok(None);
    }
    let log_id = Uuid::new_v4();
    let entry = Insert {
        table: log_table(config, "data_log")?,
        columns: idents(&["id", "relation_id", "record_id_wofk", "login_id", "date_change"])?,
        values: vec![
            SqlExpr::Param(Value::Uuid(log_id)),
            SqlExpr::Param(Value::Uuid(relation_id)),
            SqlExpr::Param(Value::Integer(record_id)),
            SqlExpr::Param(Value::Integer(login_id)),
            SqlExpr::Param(Value::Integer(now)),
        ],
        returning: None,
    };
    run_execute(ctx, tx, &entry.to_statement())?;

    for value in values {
        let row = Insert {
            table: log_table(config, "data_log_value")?,
            columns: idents(&[
                "data_log_id",
                "attribute_id",
                "attribute_id_nm",
                "outside_in",
                "value",
            ])?,
            values: vec![
                SqlExpr::Param(Value::Uuid(log_id)),
                SqlExpr::Param(Value::Uuid(value.attribute_id)),
                SqlExpr::Param(value.attribute_id_nm.map_or(Value::Null, Value::Uuid)),
                SqlExpr::Param(Value::Boolean(value.outside_in)),
                SqlExpr::Param(Value::Json(value.value.clone())),
            ],
            returning: None,
        };
        run_execute(ctx, tx, &row.to_statement())?;
    }
    debug!(
        relation_id = %relation_id,
        record_id = record_id,
        values = values.len(),
        "change logged"
    );
    Ok(Some(log_id))
}

/// Drops log entries of `relation` outside its retention.
///
/// An entry goes once it is older than the day bound and has at least the
/// count bound of newer entries for the same record. An unset bound does not
/// hold entries back; a relation without any bound keeps everything.
pub fn prune_change_log(
    ctx: &ExecContext,
    tx: &mut dyn StoreTx,
    config: &EngineConfig,
    relation: &Relation,
    now: i64,
) -> Result<u64, EngineError> {
    if !relation.logs_changes() {
        return Ok(0);
    }
    let values = Delete {
        table: log_table(config, "data_log_value")?,
        filters: vec![SqlExpr::binary(
            SqlExpr::Name(Ident::new("data_log_id")?),
            BinaryOp::EqAny,
            SqlExpr::Subquery(Box::new(
                Select::from(log_table(config, "data_log")?.aliased(Ident::new("_l")?))
                    .column(SqlExpr::column(&Ident::new("_l")?, &Ident::new("id")?), None)
                    .filter(SqlExpr::And(expired(config, relation, now)?)),
            )),
        )],
    };
    run_execute(ctx, tx, &values.to_statement())?;

    let entries = Delete {
        table: log_table(config, "data_log")?.aliased(Ident::new("_l")?),
        filters: expired(config, relation, now)?,
    };
    let removed = run_execute(ctx, tx, &entries.to_statement())?;
    debug!(
        relation_id = %relation.id,
        removed = removed,
        "change log pruned"
    );
    Ok(removed)
}

/// Conditions on alias `_l` selecting entries outside retention.
fn expired(
    config: &EngineConfig,
    relation: &Relation,
    now: i64,
) -> Result<Vec<SqlExpr>, EngineError> {
    let l = Ident::new("_l")?;
    let col = |name: &str| -> Result<SqlExpr, EngineError> {
        Ok(SqlExpr::column(&l, &Ident::new(name)?))
    };
    let mut terms = vec![SqlExpr::eq(
        col("relation_id")?,
        SqlExpr::Param(Value::Uuid(relation.id)),
    )];
    if let Some(days) = relation.retention_days {
        terms.push(SqlExpr::binary(
            col("date_change")?,
            BinaryOp::Lt,
            SqlExpr::Param(Value::Integer(now - i64::from(days) * SECONDS_PER_DAY)),
        ));
    }
    if let Some(keep) = relation.retention_count {
        let n = Ident::new("_n")?;
        let newer = Select::from(log_table(config, "data_log")?.aliased(n.clone()))
            .column(
                SqlExpr::aggregate(AggFunc::Count, false, SqlExpr::column(&n, &Ident::new("id")?)),
                None,
            )
            .filter(SqlExpr::eq(
                SqlExpr::column(&n, &Ident::new("relation_id")?),
                col("relation_id")?,
            ))
            .filter(SqlExpr::eq(
                SqlExpr::column(&n, &Ident::new("record_id_wofk")?),
                col("record_id_wofk")?,
            ))
            .filter(SqlExpr::binary(
                SqlExpr::column(&n, &Ident::new("date_change")?),
                BinaryOp::Gt,
                col("date_change")?,
            ));
        terms.push(SqlExpr::binary(
            SqlExpr::Subquery(Box::new(newer)),
            BinaryOp::Ge,
            SqlExpr::Param(Value::Integer(i64::from(keep))),
        ));
    }
    Ok(terms)
}
