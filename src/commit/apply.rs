//! Multi-record writes.
//!
//! Data sets are written in ascending index order. A data set holding a
//! foreign key to another data set's record is written after it; that record
//! is created on demand when its index comes later. Every statement runs in
//! the caller's transaction, so any failure leaves nothing behind once the
//! caller rolls back.

use crate::catalog::SchemaSnapshot;
use crate::catalog::access::{AccessLevel, LoginAccess};
use crate::catalog::schema::{Attribute, EdgeDirection, Relation};
use crate::catalog::types::{ContentType, Value};
use crate::commit::changelog::{self, LogKey, LoggedValue};
use crate::commit::files::apply_file_changes;
use crate::commit::tx::{DataSet, DataSetAttribute, DataSets, FileChanges, WriteResult};
use crate::commit::unix_now;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::permission::{self, AccessTarget, PolicyAction};
use crate::query::compiler::{compile, relation_alias, relation_table};
use crate::query::executor::execute;
use crate::query::plan::{QueryExpression, QueryFilter, QueryFilterSide, QueryRequest};
use crate::query::sql::{BinaryOp, Delete, Ident, Insert, Select, SqlExpr, Update};
use crate::store::{ExecContext, StoreError, StoreTx, run_execute, run_query};
use serde_json::{Value as JsonValue, json};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};
use uuid::Uuid;

/// Everything a write is checked and compiled against.
pub struct WriteContext<'a> {
    pub snapshot: &'a SchemaSnapshot,
    pub access: &'a LoginAccess,
    pub config: &'a EngineConfig,
    /// Record id each preset was materialized as.
    pub preset_records: &'a HashMap<Uuid, i64>,
}

pub fn write_data_sets(
    w: &WriteContext<'_>,
    ctx: &ExecContext,
    tx: &mut dyn StoreTx,
    data_sets: &DataSets,
) -> Result<WriteResult, EngineError> {
    if let Some(index) = data_sets.keys().find(|&&index| index < 0) {
        return Err(EngineError::Validation(format!(
            "data set index {index} is negative"
        )));
    }
    let links = data_sets
        .iter()
        .map(|(&index, set)| link_of(w.snapshot, data_sets, index, set))
        .filter_map(Result::transpose)
        .collect::<Result<Vec<_>, _>>()?;
    let mut writer = Writer {
        w,
        ctx,
        tx,
        data_sets,
        links,
        ids: BTreeMap::new(),
        pending: BTreeSet::new(),
        now: unix_now(),
    };
    for &index in data_sets.keys() {
        writer.write_index(index)?;
    }
    debug!(
        login_id = w.access.login_id,
        records = writer.ids.len(),
        "data sets written"
    );
    Ok(writer.ids)
}

/// `holder`'s record stores `target`'s record id in `attribute_id`.
#[derive(Debug, Clone, Copy)]
struct Link {
    holder: i32,
    target: i32,
    attribute_id: Uuid,
}

fn link_of(
    snapshot: &SchemaSnapshot,
    data_sets: &DataSets,
    index: i32,
    set: &DataSet,
) -> Result<Option<Link>, EngineError> {
    let Some(attribute_id) = set.attribute_id else {
        return Ok(None);
    };
    if set.index_from == index {
        return Err(EngineError::Validation(format!(
            "data set {index} is linked to itself"
        )));
    }
    let from = data_sets.get(&set.index_from).ok_or_else(|| {
        EngineError::Validation(format!(
            "data set {index} is linked to missing data set {}",
            set.index_from
        ))
    })?;
    let edge = snapshot.get_edge(attribute_id)?;
    let resolved = edge
        .resolve_from(from.relation_id)
        .filter(|r| r.target_relation_id == set.relation_id)
        .ok_or_else(|| {
            EngineError::Validation(format!(
                "attribute '{attribute_id}' does not link data set {} to data set {index}",
                set.index_from
            ))
        })?;
    Ok(Some(match resolved.direction {
        EdgeDirection::Forward => Link {
            holder: set.index_from,
            target: index,
            attribute_id,
        },
        EdgeDirection::Backward => Link {
            holder: index,
            target: set.index_from,
            attribute_id,
        },
    }))
}

struct Column<'s> {
    attribute: &'s Attribute,
    value: Value,
}

struct Writer<'a, 't> {
    w: &'a WriteContext<'a>,
    ctx: &'a ExecContext,
    tx: &'t mut dyn StoreTx,
    data_sets: &'a DataSets,
    links: Vec<Link>,
    ids: WriteResult,
    /// Indexes whose write has started; re-entering one means a cycle.
    pending: BTreeSet<i32>,
    now: i64,
}

impl<'a> Writer<'a, '_> {
    fn write_index(&mut self, index: i32) -> Result<(), EngineError> {
        if self.ids.contains_key(&index) {
            return Ok(());
        }
        if !self.pending.insert(index) {
            return Err(EngineError::Validation(format!(
                "data set {index} depends on itself through linked data sets"
            )));
        }
        let targets: Vec<i32> = self
            .links
            .iter()
            .filter(|l| l.holder == index)
            .map(|l| l.target)
            .collect();
        for target in targets {
            self.write_index(target)?;
        }
        let data_sets = self.data_sets;
        let set = data_sets.get(&index).ok_or_else(|| {
            EngineError::Validation(format!("data set {index} does not exist"))
        })?;
        let record_id = self.write_record(index, set)?;
        self.pending.remove(&index);
        self.ids.insert(index, record_id);
        Ok(())
    }

    fn write_record(&mut self, index: i32, set: &'a DataSet) -> Result<i64, EngineError> {
        let snapshot = self.w.snapshot;
        let access = self.w.access;
        let config = self.w.config;
        let relation = snapshot.get_relation(set.relation_id)?;
        if set.record_id < 0 {
            return Err(EngineError::Validation(format!(
                "data set {index} has negative record id {}",
                set.record_id
            )));
        }
        if set.is_new() {
            permission::require(
                snapshot,
                access,
                AccessTarget::Relation(relation.id),
                AccessLevel::WRITE,
            )?;
        }
        let pk = snapshot.pk_attribute(relation)?;

        let mut columns: Vec<Column<'a>> = Vec::new();
        let mut outside: Vec<(&'a Attribute, &'a DataSetAttribute)> = Vec::new();
        let mut files: Vec<(&'a Attribute, FileChanges)> = Vec::new();
        for item in &set.attributes {
            let attribute = snapshot.get_attribute(item.attribute_id)?;
            permission::require(
                snapshot,
                access,
                AccessTarget::Attribute(attribute.id),
                AccessLevel::WRITE,
            )?;
            if item.outside_in {
                outside.push((attribute, item));
                continue;
            }
            if attribute.relation_id != relation.id {
                return Err(EngineError::Validation(format!(
                    "attribute '{}' is not part of relation '{}'",
                    attribute.name, relation.name
                )));
            }
            if attribute.content.is_files() {
                files.push((attribute, FileChanges::from_value(&item.value)?));
            } else if attribute.id == pk.id {
                return Err(EngineError::Validation(format!(
                    "primary key '{}' cannot be written",
                    pk.name
                )));
            } else {
                columns.push(Column {
                    attribute,
                    value: Value::from_json_typed(attribute.content, &item.value)?,
                });
            }
        }

        let held: Vec<Link> = self
            .links
            .iter()
            .filter(|l| l.holder == index)
            .copied()
            .collect();
        for link in held {
            let attribute = snapshot.get_attribute(link.attribute_id)?;
            permission::require(
                snapshot,
                access,
                AccessTarget::Attribute(attribute.id),
                AccessLevel::WRITE,
            )?;
            if columns.iter().any(|c| c.attribute.id == attribute.id) {
                return Err(EngineError::Validation(format!(
                    "attribute '{}' of data set {index} is also set through data set {}",
                    attribute.name, link.target
                )));
            }
            let target_id = self.ids.get(&link.target).copied().ok_or_else(|| {
                EngineError::Validation(format!("data set {} was not written", link.target))
            })?;
            columns.push(Column {
                attribute,
                value: Value::Integer(target_id),
            });
        }

        self.check_protected(relation, set, &columns)?;

        let logging = config.change_log_enabled && relation.logs_changes();
        let old = if logging && !set.is_new() {
            Some(self.current_values(relation, set.record_id, &columns, &outside)?)
        } else {
            None
        };

        let record_id = if set.is_new() {
            self.insert(relation, &columns)?
        } else {
            self.update(index, relation, set.record_id, &columns)?;
            set.record_id
        };

        for (attribute, item) in &outside {
            self.apply_outside_in(relation, record_id, set.is_new(), attribute, item)?;
        }
        for (attribute, changes) in &files {
            apply_file_changes(
                self.ctx,
                &mut *self.tx,
                &config.file_schema,
                attribute.id,
                record_id,
                changes,
                self.now,
            )?;
        }

        if logging {
            let mut values = Vec::with_capacity(columns.len() + outside.len() + files.len());
            values.extend(columns.iter().map(|c| LoggedValue {
                attribute_id: c.attribute.id,
                attribute_id_nm: None,
                outside_in: false,
                files: false,
                numeric: c.attribute.content == ContentType::Numeric,
                value: c.value.to_json(),
            }));
            values.extend(outside.iter().map(|(attribute, item)| LoggedValue {
                attribute_id: attribute.id,
                attribute_id_nm: item.attribute_id_nm,
                outside_in: true,
                files: false,
                numeric: false,
                value: item.value.clone(),
            }));
            for (attribute, changes) in &files {
                let value = if changes.is_empty() {
                    JsonValue::Null
                } else {
                    serde_json::to_value(changes)
                        .map_err(|e| EngineError::Validation(e.to_string()))?
                };
                values.push(LoggedValue {
                    attribute_id: attribute.id,
                    attribute_id_nm: None,
                    outside_in: false,
                    files: true,
                    numeric: false,
                    value,
                });
            }
            let changed = changelog::diff(old.as_ref(), values);
            changelog::persist(
                self.ctx,
                &mut *self.tx,
                config,
                relation.id,
                record_id,
                access.login_id,
                &changed,
                self.now,
            )?;
        }
        Ok(record_id)
    }

    fn check_protected(
        &self,
        relation: &Relation,
        set: &DataSet,
        columns: &[Column<'_>],
    ) -> Result<(), EngineError> {
        if set.is_new() {
            return Ok(());
        }
        for preset in &relation.presets {
            if self.w.preset_records.get(&preset.id) != Some(&set.record_id) {
                continue;
            }
            for value in preset.values.iter().filter(|v| v.protected) {
                if let Some(column) = columns.iter().find(|c| c.attribute.id == value.attribute_id) {
                    warn!(
                        login_id = self.w.access.login_id,
                        preset = %preset.name,
                        attribute = %column.attribute.name,
                        "write to protected preset value rejected"
                    );
                    return Err(EngineError::ProtectedViolation(format!(
                        "attribute '{}' of preset '{}' is protected",
                        column.attribute.name, preset.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Pre-write values of everything about to change, read through the
    /// regular query path.
    fn current_values(
        &mut self,
        relation: &Relation,
        record_id: i64,
        columns: &[Column<'_>],
        outside: &[(&Attribute, &DataSetAttribute)],
    ) -> Result<BTreeMap<LogKey, JsonValue>, EngineError> {
        let mut request = QueryRequest::new(relation.id);
        let mut keys: Vec<LogKey> = Vec::new();
        for column in columns {
            request = request.expression(QueryExpression::attribute(column.attribute.id, 0));
            keys.push((column.attribute.id, None, false));
        }
        for (attribute, item) in outside {
            request = request.expression(
                QueryExpression::attribute(attribute.id, 0).outside_in(item.attribute_id_nm),
            );
            keys.push((attribute.id, item.attribute_id_nm, true));
        }
        if keys.is_empty() {
            return Ok(BTreeMap::new());
        }
        let request = request.filter(QueryFilter::new(
            "=",
            QueryFilterSide::attribute(relation.pk_attribute_id, 0),
            QueryFilterSide::value(json!(record_id)),
        ));
        let compiled = compile(self.w.snapshot, self.w.access, self.w.config, &request)?;
        let result = execute(self.ctx, &mut *self.tx, &compiled)?;
        let Some(row) = result.rows.into_iter().next() else {
            return Ok(BTreeMap::new());
        };
        Ok(keys.into_iter().zip(row.values).collect())
    }

    fn insert(&mut self, relation: &Relation, columns: &[Column<'_>]) -> Result<i64, EngineError> {
        let pk = self.w.snapshot.pk_attribute(relation)?;
        let insert = Insert {
            table: relation_table(self.w.snapshot, relation)?,
            columns: columns
                .iter()
                .map(|c| Ident::new(&c.attribute.name))
                .collect::<Result<_, _>>()?,
            values: columns
                .iter()
                .map(|c| SqlExpr::Param(c.value.clone()))
                .collect(),
            returning: Some(Ident::new(&pk.name)?),
        };
        let rows = run_query(self.ctx, &mut *self.tx, &insert.to_statement())?;
        let record_id = rows
            .first()
            .and_then(|r| r.get(0))
            .and_then(Value::as_i64)
            .ok_or_else(|| StoreError::new(None, "insert returned no record id"))?;
        debug!(relation = %relation.name, record_id = record_id, "record created");
        Ok(record_id)
    }

    /// Updates an existing record under the login's update policy. Without
    /// columns to set, the record is selected under that policy instead; links
    /// and files are applied only after this succeeds.
    fn update(
        &mut self,
        index: i32,
        relation: &Relation,
        record_id: i64,
        columns: &[Column<'_>],
    ) -> Result<(), EngineError> {
        let alias = relation_alias(index, 0)?;
        let pk = Ident::new(&self.w.snapshot.pk_attribute(relation)?.name)?;
        let mut filters = vec![SqlExpr::eq(
            SqlExpr::column(&alias, &pk),
            SqlExpr::Param(Value::Integer(record_id)),
        )];
        if let Some(policy) = permission::policy_filter(
            self.w.snapshot,
            self.w.access,
            PolicyAction::Update,
            &alias,
            relation,
        )? {
            filters.push(policy);
        }
        let table = relation_table(self.w.snapshot, relation)?.aliased(alias.clone());
        let affected = if columns.is_empty() {
            let select = filters.into_iter().fold(
                Select::from(table).column(SqlExpr::column(&alias, &pk), None),
                Select::filter,
            );
            run_query(self.ctx, &mut *self.tx, &select.to_statement())?.len() as u64
        } else {
            let update = Update {
                table,
                assignments: columns
                    .iter()
                    .map(|c| -> Result<(Ident, SqlExpr), EngineError> {
                        Ok((Ident::new(&c.attribute.name)?, SqlExpr::Param(c.value.clone())))
                    })
                    .collect::<Result<_, _>>()?,
                filters,
            };
            run_execute(self.ctx, &mut *self.tx, &update.to_statement())?
        };
        if affected == 0 {
            warn!(
                login_id = self.w.access.login_id,
                relation = %relation.name,
                record_id = record_id,
                "update matched no record"
            );
            return Err(EngineError::Unauthorized(format!(
                "record {record_id} of relation '{}' cannot be updated",
                relation.name
            )));
        }
        Ok(())
    }

    /// Points records of the other relation at `record_id` through an
    /// attribute they own.
    fn apply_outside_in(
        &mut self,
        relation: &Relation,
        record_id: i64,
        is_new: bool,
        attribute: &Attribute,
        item: &DataSetAttribute,
    ) -> Result<(), EngineError> {
        let snapshot = self.w.snapshot;
        let edge = snapshot.get_edge(attribute.id)?;
        if edge.pk_relation_id != relation.id {
            return Err(EngineError::Validation(format!(
                "attribute '{}' does not point at relation '{}'",
                attribute.name, relation.name
            )));
        }
        let other = snapshot.get_relation(edge.fk_relation_id)?;
        let table = relation_table(snapshot, other)?;
        let fk = Ident::new(&attribute.name)?;
        let this = || SqlExpr::Param(Value::Integer(record_id));
        let ids = record_ids(&item.value)?;

        if let Some(nm_id) = item.attribute_id_nm {
            let nm = snapshot.get_attribute(nm_id)?;
            if nm.relation_id != other.id || !nm.content.is_relationship() {
                return Err(EngineError::Validation(format!(
                    "attribute '{}' is not a relationship of '{}'",
                    nm.name, other.name
                )));
            }
            let nm_col = Ident::new(&nm.name)?;
            let current: BTreeSet<i64> = if is_new {
                BTreeSet::new()
            } else {
                let select = Select::from(table.clone())
                    .column(SqlExpr::Name(nm_col.clone()), None)
                    .filter(SqlExpr::eq(SqlExpr::Name(fk.clone()), this()));
                run_query(self.ctx, &mut *self.tx, &select.to_statement())?
                    .iter()
                    .filter_map(|r| r.get(0).and_then(Value::as_i64))
                    .collect()
            };
            let wanted: BTreeSet<i64> = ids.into_iter().collect();
            let removed: Vec<i64> = current.difference(&wanted).copied().collect();
            if !removed.is_empty() {
                let delete = Delete {
                    table: table.clone(),
                    filters: vec![
                        SqlExpr::eq(SqlExpr::Name(fk.clone()), this()),
                        SqlExpr::binary(
                            SqlExpr::Name(nm_col.clone()),
                            BinaryOp::EqAny,
                            SqlExpr::Param(Value::IntegerArray(removed)),
                        ),
                    ],
                };
                run_execute(self.ctx, &mut *self.tx, &delete.to_statement())?;
            }
            for added in wanted.difference(&current) {
                let insert = Insert {
                    table: table.clone(),
                    columns: vec![fk.clone(), nm_col.clone()],
                    values: vec![this(), SqlExpr::Param(Value::Integer(*added))],
                    returning: None,
                };
                run_execute(self.ctx, &mut *self.tx, &insert.to_statement())?;
            }
            return Ok(());
        }

        if edge.content == ContentType::OneToOne && ids.len() > 1 {
            return Err(EngineError::Validation(format!(
                "attribute '{}' links a single record",
                attribute.name
            )));
        }
        let other_pk = Ident::new(&snapshot.pk_attribute(other)?.name)?;
        if !is_new {
            let mut release = vec![SqlExpr::eq(SqlExpr::Name(fk.clone()), this())];
            if !ids.is_empty() {
                release.push(SqlExpr::binary(
                    SqlExpr::Name(other_pk.clone()),
                    BinaryOp::NeAll,
                    SqlExpr::Param(Value::IntegerArray(ids.clone())),
                ));
            }
            let update = Update {
                table: table.clone(),
                assignments: vec![(fk.clone(), SqlExpr::Null)],
                filters: release,
            };
            run_execute(self.ctx, &mut *self.tx, &update.to_statement())?;
        }
        if !ids.is_empty() {
            let update = Update {
                table,
                assignments: vec![(fk, this())],
                filters: vec![SqlExpr::binary(
                    SqlExpr::Name(other_pk),
                    BinaryOp::EqAny,
                    SqlExpr::Param(Value::IntegerArray(ids)),
                )],
            };
            run_execute(self.ctx, &mut *self.tx, &update.to_statement())?;
        }
        Ok(())
    }
}

/// Record ids given for an outside-in attribute: null, one id or a list.
fn record_ids(value: &JsonValue) -> Result<Vec<i64>, EngineError> {
    let invalid = || EngineError::Validation(format!("{value} is not a list of record ids"));
    match value {
        JsonValue::Null => Ok(Vec::new()),
        JsonValue::Number(n) => n.as_i64().map(|id| vec![id]).ok_or_else(invalid),
        JsonValue::Array(items) => items
            .iter()
            .map(|v| v.as_i64().ok_or_else(invalid))
            .collect(),
        _ => Err(invalid()),
    }
}

/// Deletes one record, subject to delete access, the delete policy and
/// protected presets.
pub fn delete_record(
    w: &WriteContext<'_>,
    ctx: &ExecContext,
    tx: &mut dyn StoreTx,
    relation_id: Uuid,
    record_id: i64,
) -> Result<(), EngineError> {
    let relation = w.snapshot.get_relation(relation_id)?;
    permission::require(
        w.snapshot,
        w.access,
        AccessTarget::Relation(relation.id),
        AccessLevel::DELETE,
    )?;
    if let Some(preset) = relation
        .presets
        .iter()
        .find(|p| p.protected && w.preset_records.get(&p.id) == Some(&record_id))
    {
        warn!(
            login_id = w.access.login_id,
            preset = %preset.name,
            "delete of protected preset record rejected"
        );
        return Err(EngineError::ProtectedViolation(format!(
            "record of preset '{}' cannot be deleted",
            preset.name
        )));
    }

    let alias = relation_alias(0, 0)?;
    let pk = Ident::new(&w.snapshot.pk_attribute(relation)?.name)?;
    let mut filters = vec![SqlExpr::eq(
        SqlExpr::column(&alias, &pk),
        SqlExpr::Param(Value::Integer(record_id)),
    )];
    if let Some(policy) =
        permission::policy_filter(w.snapshot, w.access, PolicyAction::Delete, &alias, relation)?
    {
        filters.push(policy);
    }
    let delete = Delete {
        table: relation_table(w.snapshot, relation)?.aliased(alias),
        filters,
    };
    if run_execute(ctx, tx, &delete.to_statement())? == 0 {
        warn!(
            login_id = w.access.login_id,
            relation = %relation.name,
            record_id = record_id,
            "delete matched no record"
        );
        return Err(EngineError::Unauthorized(format!(
            "record {record_id} of relation '{}' cannot be deleted",
            relation.name
        )));
    }
    debug!(relation = %relation.name, record_id = record_id, "record deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::record_ids;
    use serde_json::json;

    #[test]
    fn record_ids_accept_null_single_and_lists() {
        assert!(record_ids(&json!(null)).unwrap().is_empty());
        assert_eq!(record_ids(&json!(4)).unwrap(), vec![4]);
        assert_eq!(record_ids(&json!([1, 2])).unwrap(), vec![1, 2]);
        assert!(record_ids(&json!(["1"])).is_err());
        assert!(record_ids(&json!({"id": 1})).is_err());
    }
}
