use crate::catalog::SchemaSnapshot;
use crate::catalog::schema::RoleAccess;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Ordinal access level; higher levels include lower ones.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(transparent)]
pub struct AccessLevel(pub u8);

impl AccessLevel {
    pub const NONE: AccessLevel = AccessLevel(0);
    pub const READ: AccessLevel = AccessLevel(1);
    pub const WRITE: AccessLevel = AccessLevel(2);
    pub const DELETE: AccessLevel = AccessLevel(3);

    pub fn as_str(self) -> &'static str {
        match self.0 {
            0 => "none",
            1 => "read",
            2 => "write",
            _ => "delete",
        }
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role membership of one login as reported by the access-control subsystem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LoginRoles {
    pub role_ids: Vec<Uuid>,
    #[serde(default)]
    pub admin: bool,
}

/// Source of login role assignments, consulted once per login until the
/// cached access is renewed.
pub trait MembershipSource: Send + Sync {
    fn login_roles(&self, login_id: i64) -> Result<LoginRoles, EngineError>;
}

/// Effective access of one login: the union of all assigned roles and the
/// roles they include, highest level winning.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoginAccess {
    pub login_id: i64,
    /// Version of the schema snapshot this access was derived from.
    pub schema_version: u64,
    pub admin: bool,
    /// Assigned roles plus every role reachable through inclusion.
    pub role_ids: BTreeSet<Uuid>,
    pub relations: HashMap<Uuid, AccessLevel>,
    pub attributes: HashMap<Uuid, AccessLevel>,
    pub menus: HashMap<Uuid, AccessLevel>,
    pub collections: HashMap<Uuid, AccessLevel>,
}

impl LoginAccess {
    pub fn build(snapshot: &SchemaSnapshot, login_id: i64, roles: &LoginRoles) -> Self {
        let mut access = LoginAccess {
            login_id,
            schema_version: snapshot.version(),
            admin: roles.admin,
            ..LoginAccess::default()
        };
        let mut pending: Vec<Uuid> = roles.role_ids.clone();
        while let Some(role_id) = pending.pop() {
            if !access.role_ids.insert(role_id) {
                continue;
            }
            // roles of modules not (or no longer) loaded contribute nothing
            let Some(role) = snapshot.role(role_id) else {
                continue;
            };
            access.merge(&role.access);
            pending.extend(role.child_role_ids.iter().copied());
        }
        access
    }

    fn merge(&mut self, role: &RoleAccess) {
        merge_max(&mut self.relations, &role.relations);
        merge_max(&mut self.attributes, &role.attributes);
        merge_max(&mut self.menus, &role.menus);
        merge_max(&mut self.collections, &role.collections);
    }

    pub fn has_role(&self, role_id: Uuid) -> bool {
        self.role_ids.contains(&role_id)
    }
}

fn merge_max(into: &mut HashMap<Uuid, AccessLevel>, from: &HashMap<Uuid, AccessLevel>) {
    for (id, level) in from {
        let slot = into.entry(*id).or_default();
        if *level > *slot {
            *slot = *level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessLevel, LoginAccess, LoginRoles};
    use crate::catalog::SchemaSnapshot;
    use crate::catalog::schema::{ModuleDef, Role, RoleAccess};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn role(module_id: Uuid, children: Vec<Uuid>, relations: &[(Uuid, u8)]) -> Role {
        Role {
            id: Uuid::new_v4(),
            module_id,
            name: "r".into(),
            child_role_ids: children,
            access: RoleAccess {
                relations: relations
                    .iter()
                    .map(|(id, l)| (*id, AccessLevel(*l)))
                    .collect::<HashMap<_, _>>(),
                ..RoleAccess::default()
            },
        }
    }

    #[test]
    fn highest_level_wins_across_included_roles() {
        let module_id = Uuid::new_v4();
        let rel = Uuid::new_v4();
        let reader = role(module_id, vec![], &[(rel, 1)]);
        let deleter = role(module_id, vec![], &[(rel, 3)]);
        let parent = role(module_id, vec![deleter.id, reader.id], &[(rel, 2)]);
        let snapshot = SchemaSnapshot::default()
            .with_modules(vec![ModuleDef {
                id: module_id,
                name: "app".into(),
                relations: vec![],
                roles: vec![reader.clone(), deleter.clone(), parent.clone()],
                pg_functions: vec![],
            }])
            .unwrap();

        let access = LoginAccess::build(
            &snapshot,
            7,
            &LoginRoles {
                role_ids: vec![parent.id],
                admin: false,
            },
        );
        assert_eq!(access.relations.get(&rel), Some(&AccessLevel::DELETE));
        assert!(access.has_role(deleter.id));
        assert_eq!(access.role_ids.len(), 3);
    }

    #[test]
    fn role_inclusion_cycles_terminate() {
        let module_id = Uuid::new_v4();
        let mut a = role(module_id, vec![], &[]);
        let mut b = role(module_id, vec![], &[]);
        a.child_role_ids.push(b.id);
        b.child_role_ids.push(a.id);
        let snapshot = SchemaSnapshot::default()
            .with_modules(vec![ModuleDef {
                id: module_id,
                name: "app".into(),
                relations: vec![],
                roles: vec![a.clone(), b],
                pg_functions: vec![],
            }])
            .unwrap();
        let access = LoginAccess::build(
            &snapshot,
            1,
            &LoginRoles {
                role_ids: vec![a.id],
                admin: false,
            },
        );
        assert_eq!(access.role_ids.len(), 2);
    }
}
