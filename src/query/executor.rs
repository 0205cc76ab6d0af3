use crate::catalog::types::Value;
use crate::error::EngineError;
use crate::query::compiler::CompiledQuery;
use crate::store::{ExecContext, StoreError, StoreRow, StoreTx, run_query};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueryRow {
    /// Record id per relation index; `None` where grouping hides the record.
    pub index_record_ids: BTreeMap<i32, Option<i64>>,
    /// Values in expression order.
    pub values: Vec<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QueryResult {
    pub rows: Vec<QueryRow>,
    pub count: u64,
}

pub fn execute(
    ctx: &ExecContext,
    tx: &mut dyn StoreTx,
    compiled: &CompiledQuery,
) -> Result<QueryResult, EngineError> {
    let raw = run_query(ctx, tx, &compiled.statement)?;
    let rows = raw
        .into_iter()
        .map(|row| shape_row(compiled, row))
        .collect::<Result<Vec<_>, _>>()?;

    let counted = compiled.count.is_some() && needs_count(compiled, rows.len());
    let count = match &compiled.count {
        Some(statement) if counted => {
            let result = run_query(ctx, tx, statement)?;
            let total = result
                .first()
                .and_then(|r| r.get(0))
                .and_then(Value::as_i64)
                .ok_or_else(|| StoreError::new(None, "count statement returned no integer"))?;
            u64::try_from(total).unwrap_or(0)
        }
        _ => rows.len() as u64,
    };
    debug!(rows = rows.len(), count = count, counted = counted, "query executed");
    Ok(QueryResult { rows, count })
}

/// A short page is authoritative on its own: the total is only fetched when
/// the page is full or does not start at the first row.
fn needs_count(compiled: &CompiledQuery, rows: usize) -> bool {
    compiled.limit != 0 && (rows as u64 >= compiled.limit || compiled.offset != 0)
}

fn shape_row(compiled: &CompiledQuery, row: StoreRow) -> Result<QueryRow, EngineError> {
    let expected = compiled.expression_count + compiled.record_id_indexes.len();
    if row.values.len() != expected {
        return Err(StoreError::new(
            None,
            format!(
                "store returned {} columns, expected {expected}",
                row.values.len()
            ),
        )
        .into());
    }
    let mut values = row.values.into_iter();
    let projected = values
        .by_ref()
        .take(compiled.expression_count)
        .map(|v| v.to_json())
        .collect();
    let mut index_record_ids = BTreeMap::new();
    for (index, value) in compiled.record_id_indexes.iter().zip(values) {
        let id = match value {
            Value::Null => None,
            Value::Integer(id) => Some(id),
            other => {
                return Err(StoreError::new(
                    None,
                    format!("record id of index {index} is {}", other.type_name()),
                )
                .into());
            }
        };
        index_record_ids.insert(*index, id);
    }
    Ok(QueryRow {
        index_record_ids,
        values: projected,
    })
}

#[cfg(test)]
mod tests {
    use super::execute;
    use crate::catalog::types::Value;
    use crate::error::EngineError;
    use crate::query::compiler::CompiledQuery;
    use crate::store::{ExecContext, Statement, StoreError, StoreRow, StoreTx};
    use serde_json::json;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Scripted {
        answers: VecDeque<Vec<StoreRow>>,
        seen: Vec<String>,
    }

    impl StoreTx for Scripted {
        fn query(
            &mut self,
            _ctx: &ExecContext,
            statement: &Statement,
        ) -> Result<Vec<StoreRow>, StoreError> {
            self.seen.push(statement.sql.clone());
            Ok(self.answers.pop_front().unwrap_or_default())
        }

        fn execute(&mut self, _ctx: &ExecContext, _statement: &Statement) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    fn compiled(limit: u64, offset: u64) -> CompiledQuery {
        CompiledQuery {
            statement: Statement {
                sql: "DATA".into(),
                args: vec![],
            },
            count: Some(Statement {
                sql: "COUNT".into(),
                args: vec![],
            }),
            expression_count: 1,
            record_id_indexes: vec![0],
            limit,
            offset,
        }
    }

    fn row(name: &str, id: i64) -> StoreRow {
        StoreRow::new(vec![Value::Text(name.into()), Value::Integer(id)])
    }

    #[test]
    fn short_page_skips_count_statement() {
        let mut tx = Scripted::default();
        tx.answers.push_back(vec![row("a", 1)]);
        let result = execute(&ExecContext::new(), &mut tx, &compiled(10, 0)).unwrap();
        assert_eq!(result.count, 1);
        assert_eq!(tx.seen, vec!["DATA"]);
        assert_eq!(result.rows[0].values, vec![json!("a")]);
        assert_eq!(result.rows[0].index_record_ids.get(&0), Some(&Some(1)));
    }

    #[test]
    fn full_page_or_offset_runs_count_statement() {
        let mut tx = Scripted::default();
        tx.answers.push_back(vec![row("a", 1), row("b", 2)]);
        tx.answers
            .push_back(vec![StoreRow::new(vec![Value::Integer(40)])]);
        let result = execute(&ExecContext::new(), &mut tx, &compiled(2, 0)).unwrap();
        assert_eq!(result.count, 40);

        let mut tx = Scripted::default();
        tx.answers.push_back(vec![]);
        tx.answers
            .push_back(vec![StoreRow::new(vec![Value::Integer(3)])]);
        let result = execute(&ExecContext::new(), &mut tx, &compiled(10, 20)).unwrap();
        assert_eq!(result.count, 3);
        assert_eq!(tx.seen, vec!["DATA", "COUNT"]);
    }

    #[test]
    fn numeric_values_surface_as_strings() {
        let mut tx = Scripted::default();
        tx.answers.push_back(vec![StoreRow::new(vec![
            Value::Numeric("10.50".into()),
            Value::Null,
        ])]);
        let result = execute(&ExecContext::new(), &mut tx, &compiled(0, 0)).unwrap();
        assert_eq!(result.rows[0].values, vec![json!("10.50")]);
        assert_eq!(result.rows[0].index_record_ids.get(&0), Some(&None));
    }

    #[test]
    fn malformed_rows_are_store_errors() {
        let mut tx = Scripted::default();
        tx.answers
            .push_back(vec![StoreRow::new(vec![Value::Text("x".into())])]);
        let err = execute(&ExecContext::new(), &mut tx, &compiled(0, 0)).unwrap_err();
        assert!(matches!(err, EngineError::Store(_)));
    }

    #[test]
    fn cancelled_context_runs_nothing() {
        let ctx = ExecContext::new();
        ctx.cancel();
        let mut tx = Scripted::default();
        let err = execute(&ctx, &mut tx, &compiled(0, 0)).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert!(tx.seen.is_empty());
    }
}
