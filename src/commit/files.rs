//! File assignments of files attributes.
//!
//! Each files attribute has its own table `files_<attribute id>` in the
//! configured file schema with the columns `file_id`, `record_id`, `name` and
//! `date_delete`. Deletion only stamps `date_delete`.

use crate::catalog::types::Value;
use crate::commit::tx::FileChanges;
use crate::error::EngineError;
use crate::query::sql::{Ident, Insert, SqlExpr, TableRef, Update};
use crate::store::{ExecContext, StoreTx, run_execute};
use uuid::Uuid;

pub fn file_table(schema: &str, attribute_id: Uuid) -> Result<TableRef, EngineError> {
    Ok(TableRef::new(
        Ident::new(schema)?,
        Ident::new(&format!("files_{}", attribute_id.simple()))?,
    ))
}

pub(crate) fn apply_file_changes(
    ctx: &ExecContext,
    tx: &mut dyn StoreTx,
    schema: &str,
    attribute_id: Uuid,
    record_id: i64,
    changes: &FileChanges,
    now: i64,
) -> Result<(), EngineError> {
    let table = file_table(schema, attribute_id)?;
    let column = |name: &str| Ident::new(name);
    let of_record = |file_id: Uuid| -> Result<Vec<SqlExpr>, EngineError> {
        Ok(vec![
            SqlExpr::eq(
                SqlExpr::Name(column("file_id")?),
                SqlExpr::Param(Value::Uuid(file_id)),
            ),
            SqlExpr::eq(
                SqlExpr::Name(column("record_id")?),
                SqlExpr::Param(Value::Integer(record_id)),
            ),
        ])
    };

    for file in &changes.added {
        let insert = Insert {
            table: table.clone(),
            columns: vec![column("file_id")?, column("record_id")?, column("name")?],
            values: vec![
                SqlExpr::Param(Value::Uuid(file.id)),
                SqlExpr::Param(Value::Integer(record_id)),
                SqlExpr::Param(Value::Text(file.name.as_str().into())),
            ],
            returning: None,
        };
        run_execute(ctx, tx, &insert.to_statement())?;
    }
    for file in &changes.renamed {
        let update = Update {
            table: table.clone(),
            assignments: vec![(
                column("name")?,
                SqlExpr::Param(Value::Text(file.name.as_str().into())),
            )],
            filters: of_record(file.id)?,
        };
        run_execute(ctx, tx, &update.to_statement())?;
    }
    for file_id in &changes.deleted {
        let mut filters = of_record(*file_id)?;
        filters.push(SqlExpr::IsNull {
            expr: Box::new(SqlExpr::Name(column("date_delete")?)),
            negated: false,
        });
        let update = Update {
            table: table.clone(),
            assignments: vec![(column("date_delete")?, SqlExpr::Param(Value::Integer(now)))],
            filters,
        };
        run_execute(ctx, tx, &update.to_statement())?;
    }
    Ok(())
}
