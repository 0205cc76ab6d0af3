pub mod access;
pub mod schema;
pub mod types;

use crate::catalog::access::{LoginAccess, MembershipSource};
use crate::catalog::schema::{
    Attribute, Module, ModuleDef, PgFunction, Relation, RelationshipEdge, Role,
};
use crate::error::{EngineError, ResourceType};
use crate::query::sql::is_valid_identifier;
use im::HashMap;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap as StdHashMap};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Immutable view of the loaded schema.
///
/// Snapshots are never mutated in place. A reload derives a new snapshot from
/// the current one (the `im` maps share structure) and swaps it in, so any
/// holder of an `Arc<SchemaSnapshot>` keeps one consistent picture for as long
/// as it needs.
#[derive(Debug, Clone, Default)]
pub struct SchemaSnapshot {
    version: u64,
    modules: HashMap<Uuid, Module>,
    relations: HashMap<Uuid, Relation>,
    attributes: HashMap<Uuid, Attribute>,
    roles: HashMap<Uuid, Role>,
    pg_functions: HashMap<Uuid, PgFunction>,
    edges: HashMap<Uuid, RelationshipEdge>,
}

impl SchemaSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn module(&self, id: Uuid) -> Option<&Module> {
        self.modules.get(&id)
    }

    pub fn relation(&self, id: Uuid) -> Option<&Relation> {
        self.relations.get(&id)
    }

    pub fn attribute(&self, id: Uuid) -> Option<&Attribute> {
        self.attributes.get(&id)
    }

    pub fn role(&self, id: Uuid) -> Option<&Role> {
        self.roles.get(&id)
    }

    pub fn pg_function(&self, id: Uuid) -> Option<&PgFunction> {
        self.pg_functions.get(&id)
    }

    pub fn edge(&self, attribute_id: Uuid) -> Option<&RelationshipEdge> {
        self.edges.get(&attribute_id)
    }

    pub fn get_module(&self, id: Uuid) -> Result<&Module, EngineError> {
        self.module(id)
            .ok_or_else(|| EngineError::unknown(ResourceType::Module, id))
    }

    pub fn get_relation(&self, id: Uuid) -> Result<&Relation, EngineError> {
        self.relation(id)
            .ok_or_else(|| EngineError::unknown(ResourceType::Relation, id))
    }

    pub fn get_attribute(&self, id: Uuid) -> Result<&Attribute, EngineError> {
        self.attribute(id)
            .ok_or_else(|| EngineError::unknown(ResourceType::Attribute, id))
    }

    pub fn get_pg_function(&self, id: Uuid) -> Result<&PgFunction, EngineError> {
        self.pg_function(id)
            .ok_or_else(|| EngineError::unknown(ResourceType::PgFunction, id))
    }

    /// Relationship edge of a relationship attribute. Non-relationship
    /// attributes have no edge and fail validation.
    pub fn get_edge(&self, attribute_id: Uuid) -> Result<&RelationshipEdge, EngineError> {
        let attribute = self.get_attribute(attribute_id)?;
        self.edge(attribute_id).ok_or_else(|| {
            EngineError::Validation(format!(
                "attribute '{}' is not a relationship",
                attribute.name
            ))
        })
    }

    pub fn pk_attribute(&self, relation: &Relation) -> Result<&Attribute, EngineError> {
        self.get_attribute(relation.pk_attribute_id)
    }

    /// Module owning `relation`, i.e. the database schema it lives in.
    pub fn relation_module(&self, relation: &Relation) -> Result<&Module, EngineError> {
        self.get_module(relation.module_id)
    }

    pub fn attributes_of<'a>(
        &'a self,
        relation: &'a Relation,
    ) -> impl Iterator<Item = &'a Attribute> + 'a {
        relation
            .attribute_ids
            .iter()
            .filter_map(move |id| self.attributes.get(id))
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// New snapshot with the given modules replaced (or added) as a unit.
    pub fn with_modules(&self, defs: Vec<ModuleDef>) -> Result<SchemaSnapshot, EngineError> {
        let ids: Vec<Uuid> = defs.iter().map(|d| d.id).collect();
        let mut next = self.without_entries(&ids);
        for def in defs {
            next.insert_module(def)?;
        }
        next.rebuild_edges()?;
        next.version = self.version + 1;
        Ok(next)
    }

    /// New snapshot with the given modules dropped entirely.
    pub fn without_modules(&self, ids: &[Uuid]) -> Result<SchemaSnapshot, EngineError> {
        let mut next = self.without_entries(ids);
        next.rebuild_edges()?;
        next.version = self.version + 1;
        Ok(next)
    }

    fn without_entries(&self, module_ids: &[Uuid]) -> SchemaSnapshot {
        let mut next = self.clone();
        for module_id in module_ids {
            let Some(module) = next.modules.remove(module_id) else {
                continue;
            };
            for relation_id in &module.relation_ids {
                if let Some(relation) = next.relations.remove(relation_id) {
                    for attribute_id in &relation.attribute_ids {
                        next.attributes.remove(attribute_id);
                    }
                }
            }
            for role_id in &module.role_ids {
                next.roles.remove(role_id);
            }
            for fn_id in &module.pg_function_ids {
                next.pg_functions.remove(fn_id);
            }
        }
        next
    }

    fn insert_module(&mut self, def: ModuleDef) -> Result<(), EngineError> {
        check_name("module", &def.name)?;
        let mut module = Module {
            id: def.id,
            name: def.name,
            relation_ids: Vec::with_capacity(def.relations.len()),
            role_ids: Vec::with_capacity(def.roles.len()),
            pg_function_ids: Vec::with_capacity(def.pg_functions.len()),
        };
        for rel in def.relations {
            check_name("relation", &rel.name)?;
            let mut pk_attribute_id = None;
            let mut attribute_ids = Vec::with_capacity(rel.attributes.len());
            let mut names = BTreeSet::new();
            for mut attribute in rel.attributes {
                check_name("attribute", &attribute.name)?;
                if !names.insert(attribute.name.clone()) {
                    return Err(EngineError::Validation(format!(
                        "relation '{}' defines attribute '{}' twice",
                        rel.name, attribute.name
                    )));
                }
                attribute.relation_id = rel.id;
                if attribute.primary_key {
                    if pk_attribute_id.is_some() {
                        return Err(EngineError::Validation(format!(
                            "relation '{}' has more than one primary key attribute",
                            rel.name
                        )));
                    }
                    pk_attribute_id = Some(attribute.id);
                }
                attribute_ids.push(attribute.id);
                self.attributes.insert(attribute.id, attribute);
            }
            let pk_attribute_id = pk_attribute_id.ok_or_else(|| {
                EngineError::Validation(format!(
                    "relation '{}' has no primary key attribute",
                    rel.name
                ))
            })?;
            module.relation_ids.push(rel.id);
            self.relations.insert(
                rel.id,
                Relation {
                    id: rel.id,
                    module_id: module.id,
                    name: rel.name,
                    pk_attribute_id,
                    retention_count: rel.retention_count,
                    retention_days: rel.retention_days,
                    attribute_ids,
                    policies: rel.policies,
                    presets: rel.presets,
                },
            );
        }
        for role in def.roles {
            module.role_ids.push(role.id);
            self.roles.insert(role.id, role);
        }
        for function in def.pg_functions {
            check_name("function", &function.name)?;
            module.pg_function_ids.push(function.id);
            self.pg_functions.insert(function.id, function);
        }
        self.modules.insert(module.id, module);
        Ok(())
    }

    /// Recomputes the edge view of every relationship attribute and checks
    /// cross-module references. Removing or replacing one module can orphan
    /// references held by others, so this always covers the whole snapshot.
    fn rebuild_edges(&mut self) -> Result<(), EngineError> {
        let mut edges = HashMap::new();
        for attribute in self.attributes.values() {
            if !attribute.content.is_relationship() {
                continue;
            }
            let target = attribute.relationship_id.ok_or_else(|| {
                EngineError::Validation(format!(
                    "relationship attribute '{}' has no target relation",
                    attribute.name
                ))
            })?;
            if !self.relations.contains_key(&target) {
                return Err(EngineError::Validation(format!(
                    "relationship attribute '{}' targets unknown relation '{target}'",
                    attribute.name
                )));
            }
            edges.insert(
                attribute.id,
                RelationshipEdge {
                    attribute_id: attribute.id,
                    fk_relation_id: attribute.relation_id,
                    pk_relation_id: target,
                    content: attribute.content,
                },
            );
        }
        for relation in self.relations.values() {
            for policy in &relation.policies {
                for fn_id in [policy.pg_function_id_excl, policy.pg_function_id_incl]
                    .into_iter()
                    .flatten()
                {
                    if !self.pg_functions.contains_key(&fn_id) {
                        return Err(EngineError::Validation(format!(
                            "policy on relation '{}' references unknown function '{fn_id}'",
                            relation.name
                        )));
                    }
                }
            }
        }
        self.edges = edges;
        Ok(())
    }
}

fn check_name(kind: &str, name: &str) -> Result<(), EngineError> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "{kind} name '{name}' is not a valid identifier"
        )))
    }
}

/// Provides the record ids that preset records were materialized as.
pub trait PresetSource: Send + Sync {
    fn preset_record_ids(&self) -> Result<StdHashMap<Uuid, i64>, EngineError>;
}

struct Versioned<T> {
    version: u64,
    value: Arc<T>,
}

/// Process-wide schema cache.
///
/// Readers call [`SchemaCache::snapshot`] and work against the returned
/// snapshot without holding any lock. Derived caches are stamped with the
/// snapshot version they were computed from; entries from older versions are
/// dropped on reload and ignored if a racing reader inserts one late.
pub struct SchemaCache {
    current: RwLock<Arc<SchemaSnapshot>>,
    access: Mutex<LruCache<i64, Arc<LoginAccess>>>,
    presets: Mutex<Option<Versioned<StdHashMap<Uuid, i64>>>>,
    calendar: Mutex<StdHashMap<Uuid, Versioned<Vec<Uuid>>>>,
}

impl SchemaCache {
    pub fn new(access_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(access_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            current: RwLock::new(Arc::new(SchemaSnapshot::default())),
            access: Mutex::new(LruCache::new(capacity)),
            presets: Mutex::new(None),
            calendar: Mutex::new(StdHashMap::new()),
        }
    }

    pub fn snapshot(&self) -> Arc<SchemaSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Replaces the definitions of the given modules and only those.
    ///
    /// Validation failures leave the current snapshot untouched.
    pub fn reload(&self, defs: Vec<ModuleDef>) -> Result<u64, EngineError> {
        let module_ids: Vec<Uuid> = defs.iter().map(|d| d.id).collect();
        let mut current = self.current.write();
        let next = current.with_modules(defs)?;
        let version = next.version();
        *current = Arc::new(next);
        self.invalidate_derived();
        drop(current);
        info!(
            modules = module_ids.len(),
            version = version,
            "schema cache reloaded"
        );
        Ok(version)
    }

    pub fn remove_modules(&self, module_ids: &[Uuid]) -> Result<u64, EngineError> {
        let mut current = self.current.write();
        let next = current.without_modules(module_ids)?;
        let version = next.version();
        *current = Arc::new(next);
        self.invalidate_derived();
        drop(current);
        info!(
            modules = module_ids.len(),
            version = version,
            "schema modules removed"
        );
        Ok(version)
    }

    fn invalidate_derived(&self) {
        self.access.lock().clear();
        *self.presets.lock() = None;
        self.calendar.lock().clear();
    }

    /// Effective access of `login_id`, computed on first use.
    pub fn access(
        &self,
        login_id: i64,
        source: &dyn MembershipSource,
    ) -> Result<Arc<LoginAccess>, EngineError> {
        let snapshot = self.snapshot();
        if let Some(hit) = self.access.lock().get(&login_id)
            && hit.schema_version == snapshot.version()
        {
            return Ok(Arc::clone(hit));
        }
        let roles = source.login_roles(login_id)?;
        let access = Arc::new(LoginAccess::build(&snapshot, login_id, &roles));
        debug!(
            login_id = login_id,
            roles = access.role_ids.len(),
            "login access computed"
        );
        self.access.lock().put(login_id, Arc::clone(&access));
        Ok(access)
    }

    /// Drops cached access for one login after its role membership changed.
    pub fn renew_access(&self, login_id: i64) {
        self.access.lock().pop(&login_id);
    }

    pub fn renew_all_access(&self) {
        self.access.lock().clear();
    }

    pub fn preset_records(
        &self,
        source: &dyn PresetSource,
    ) -> Result<Arc<StdHashMap<Uuid, i64>>, EngineError> {
        let version = self.snapshot().version();
        if let Some(cached) = self.presets.lock().as_ref()
            && cached.version == version
        {
            return Ok(Arc::clone(&cached.value));
        }
        let value = Arc::new(source.preset_record_ids()?);
        *self.presets.lock() = Some(Versioned {
            version,
            value: Arc::clone(&value),
        });
        Ok(value)
    }

    /// Date and datetime attributes of a relation, usable as calendar fields.
    pub fn calendar_attributes(&self, relation_id: Uuid) -> Result<Arc<Vec<Uuid>>, EngineError> {
        let snapshot = self.snapshot();
        if let Some(cached) = self.calendar.lock().get(&relation_id)
            && cached.version == snapshot.version()
        {
            return Ok(Arc::clone(&cached.value));
        }
        let relation = snapshot.get_relation(relation_id)?;
        let value: Arc<Vec<Uuid>> = Arc::new(
            snapshot
                .attributes_of(relation)
                .filter(|a| a.content_use.is_calendar())
                .map(|a| a.id)
                .collect(),
        );
        self.calendar.lock().insert(
            relation_id,
            Versioned {
                version: snapshot.version(),
                value: Arc::clone(&value),
            },
        );
        Ok(value)
    }
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new(1024)
    }
}
