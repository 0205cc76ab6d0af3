use crate::catalog::access::AccessLevel;
use crate::catalog::types::{ContentType, ContentUse};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use uuid::Uuid;

/// Unit of schema reload: one module with everything it owns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleDef {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub pg_functions: Vec<PgFunction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelationDef {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub retention_count: Option<u32>,
    #[serde(default)]
    pub retention_days: Option<u32>,
    pub attributes: Vec<Attribute>,
    /// Evaluated in order; the first policy matching a login's roles wins.
    #[serde(default)]
    pub policies: Vec<RelationPolicy>,
    #[serde(default)]
    pub presets: Vec<Preset>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Module {
    pub id: Uuid,
    pub name: String,
    pub relation_ids: Vec<Uuid>,
    pub role_ids: Vec<Uuid>,
    pub pg_function_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relation {
    pub id: Uuid,
    pub module_id: Uuid,
    pub name: String,
    pub pk_attribute_id: Uuid,
    pub retention_count: Option<u32>,
    pub retention_days: Option<u32>,
    pub attribute_ids: Vec<Uuid>,
    pub policies: Vec<RelationPolicy>,
    pub presets: Vec<Preset>,
}

impl Relation {
    /// Change logging is active once either retention bound is configured.
    pub fn logs_changes(&self) -> bool {
        self.retention_count.is_some() || self.retention_days.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attribute {
    pub id: Uuid,
    pub relation_id: Uuid,
    pub name: String,
    pub content: ContentType,
    #[serde(default)]
    pub content_use: ContentUse,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    /// Target relation for relationship attributes.
    #[serde(default)]
    pub relationship_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationPolicy {
    pub role_id: Uuid,
    /// Function returning the record ids the role must not see.
    #[serde(default)]
    pub pg_function_id_excl: Option<Uuid>,
    /// Function returning the only record ids the role may see.
    #[serde(default)]
    pub pg_function_id_incl: Option<Uuid>,
    #[serde(default)]
    pub action_select: bool,
    #[serde(default)]
    pub action_update: bool,
    #[serde(default)]
    pub action_delete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PgFunction {
    pub id: Uuid,
    pub module_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Preset {
    pub id: Uuid,
    pub relation_id: Uuid,
    pub name: String,
    /// Protected presets cannot be deleted.
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub values: Vec<PresetValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresetValue {
    pub attribute_id: Uuid,
    /// Protected values cannot be overwritten on the preset's record.
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub value: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RoleAccess {
    #[serde(default)]
    pub relations: HashMap<Uuid, AccessLevel>,
    #[serde(default)]
    pub attributes: HashMap<Uuid, AccessLevel>,
    #[serde(default)]
    pub menus: HashMap<Uuid, AccessLevel>,
    #[serde(default)]
    pub collections: HashMap<Uuid, AccessLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    pub id: Uuid,
    pub module_id: Uuid,
    pub name: String,
    /// Roles whose access this role includes.
    #[serde(default)]
    pub child_role_ids: Vec<Uuid>,
    #[serde(default)]
    pub access: RoleAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    /// The join's "from" side holds the foreign key.
    Forward,
    /// The joined relation holds the foreign key.
    Backward,
}

/// Relationship attribute seen as a directed edge, resolved at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipEdge {
    pub attribute_id: Uuid,
    /// Relation owning the foreign key column.
    pub fk_relation_id: Uuid,
    /// Relation the foreign key points at.
    pub pk_relation_id: Uuid,
    pub content: ContentType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedEdge {
    pub direction: EdgeDirection,
    pub target_relation_id: Uuid,
}

impl RelationshipEdge {
    /// Resolves traversal starting at `from_relation_id`. Self references
    /// always resolve forward: the starting side carries the foreign key.
    pub fn resolve_from(&self, from_relation_id: Uuid) -> Option<ResolvedEdge> {
        if from_relation_id == self.fk_relation_id {
            Some(ResolvedEdge {
                direction: EdgeDirection::Forward,
                target_relation_id: self.pk_relation_id,
            })
        } else if from_relation_id == self.pk_relation_id {
            Some(ResolvedEdge {
                direction: EdgeDirection::Backward,
                target_relation_id: self.fk_relation_id,
            })
        } else {
            None
        }
    }

    pub fn is_self_reference(&self) -> bool {
        self.fk_relation_id == self.pk_relation_id
    }
}
