pub mod catalog;
pub mod commit;
pub mod config;
pub mod error;
pub mod permission;
pub mod query;
pub mod store;

use crate::catalog::access::{LoginAccess, MembershipSource};
use crate::catalog::schema::ModuleDef;
use crate::catalog::{PresetSource, SchemaCache};
use crate::commit::tx::{DataSets, WriteResult};
use crate::commit::{WriteContext, changelog, unix_now};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::query::{CompiledQuery, QueryRequest, QueryResult};
use crate::store::{ExecContext, StoreTx};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub use crate::catalog::SchemaSnapshot;
pub use crate::error::EngineErrorCode;

/// Entry point for request handlers: one per process, shared between workers.
///
/// The engine holds no connections. Every data call borrows the caller's
/// transaction; committing or rolling it back stays with the caller.
pub struct Engine {
    config: EngineConfig,
    cache: Arc<SchemaCache>,
    membership: Arc<dyn MembershipSource>,
    presets: Arc<dyn PresetSource>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        membership: Arc<dyn MembershipSource>,
        presets: Arc<dyn PresetSource>,
    ) -> Self {
        let cache = Arc::new(SchemaCache::new(config.access_cache_capacity));
        Self {
            config,
            cache,
            membership,
            presets,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<SchemaCache> {
        &self.cache
    }

    /// Replaces the given modules' definitions; see [`SchemaCache::reload`].
    pub fn reload(&self, modules: Vec<ModuleDef>) -> Result<u64, EngineError> {
        self.cache.reload(modules)
    }

    pub fn remove_modules(&self, module_ids: &[Uuid]) -> Result<u64, EngineError> {
        self.cache.remove_modules(module_ids)
    }

    /// Must be called after a login's role membership changed.
    pub fn renew_access(&self, login_id: i64) {
        self.cache.renew_access(login_id);
    }

    /// Must be called after role definitions or bulk membership changed.
    pub fn renew_all_access(&self) {
        self.cache.renew_all_access();
    }

    pub fn access(&self, login_id: i64) -> Result<Arc<LoginAccess>, EngineError> {
        self.cache.access(login_id, self.membership.as_ref())
    }

    pub fn calendar_attributes(&self, relation_id: Uuid) -> Result<Arc<Vec<Uuid>>, EngineError> {
        self.cache.calendar_attributes(relation_id)
    }

    pub fn compile(
        &self,
        login_id: i64,
        request: &QueryRequest,
    ) -> Result<CompiledQuery, EngineError> {
        let snapshot = self.cache.snapshot();
        let access = self.access(login_id)?;
        query::compile(&snapshot, &access, &self.config, request)
    }

    pub fn query(
        &self,
        ctx: &ExecContext,
        tx: &mut dyn StoreTx,
        login_id: i64,
        request: &QueryRequest,
    ) -> Result<QueryResult, EngineError> {
        let compiled = self.compile(login_id, request)?;
        query::execute(ctx, tx, &compiled)
    }

    /// Creates or updates all data sets; returns the record id per index.
    pub fn write(
        &self,
        ctx: &ExecContext,
        tx: &mut dyn StoreTx,
        login_id: i64,
        data_sets: &DataSets,
    ) -> Result<WriteResult, EngineError> {
        let snapshot = self.cache.snapshot();
        let access = self.access(login_id)?;
        let preset_records = self.cache.preset_records(self.presets.as_ref())?;
        let w = WriteContext {
            snapshot: &snapshot,
            access: &access,
            config: &self.config,
            preset_records: &preset_records,
        };
        commit::write_data_sets(&w, ctx, tx, data_sets)
    }

    pub fn delete(
        &self,
        ctx: &ExecContext,
        tx: &mut dyn StoreTx,
        login_id: i64,
        relation_id: Uuid,
        record_id: i64,
    ) -> Result<(), EngineError> {
        let snapshot = self.cache.snapshot();
        let access = self.access(login_id)?;
        let preset_records = self.cache.preset_records(self.presets.as_ref())?;
        let w = WriteContext {
            snapshot: &snapshot,
            access: &access,
            config: &self.config,
            preset_records: &preset_records,
        };
        commit::delete_record(&w, ctx, tx, relation_id, record_id)
    }

    /// Applies change-log retention of one relation. Meant for a periodic
    /// maintenance task rather than request handlers.
    pub fn prune_change_log(
        &self,
        ctx: &ExecContext,
        tx: &mut dyn StoreTx,
        relation_id: Uuid,
    ) -> Result<u64, EngineError> {
        let snapshot = self.cache.snapshot();
        let relation = snapshot.get_relation(relation_id)?;
        let removed = changelog::prune_change_log(ctx, tx, &self.config, relation, unix_now())?;
        debug!(relation_id = %relation_id, removed = removed, "retention applied");
        Ok(removed)
    }
}
