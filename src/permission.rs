use crate::catalog::SchemaSnapshot;
use crate::catalog::access::{AccessLevel, LoginAccess};
use crate::catalog::schema::Relation;
use crate::error::EngineError;
use crate::query::sql::{BinaryOp, Ident, SqlExpr};
use tracing::warn;
use uuid::Uuid;

/// Schema object an access level is checked against.
///
/// Semantics:
/// - `Attribute` access granted directly on the attribute wins, whether it is
///   higher or lower than the relation's. Without it the owning relation's
///   level applies.
/// - `Relation` only consults relation-level access.
/// - A missing entry means no access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessTarget {
    Relation(Uuid),
    Attribute(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyAction {
    Select,
    Update,
    Delete,
}

impl PolicyAction {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyAction::Select => "select",
            PolicyAction::Update => "update",
            PolicyAction::Delete => "delete",
        }
    }
}

pub fn effective_level(
    snapshot: &SchemaSnapshot,
    access: &LoginAccess,
    target: AccessTarget,
) -> AccessLevel {
    match target {
        AccessTarget::Relation(id) => access.relations.get(&id).copied().unwrap_or_default(),
        AccessTarget::Attribute(id) => {
            if let Some(level) = access.attributes.get(&id) {
                return *level;
            }
            snapshot
                .attribute(id)
                .and_then(|a| access.relations.get(&a.relation_id))
                .copied()
                .unwrap_or_default()
        }
    }
}

pub fn authorized(
    snapshot: &SchemaSnapshot,
    access: &LoginAccess,
    target: AccessTarget,
    required: AccessLevel,
) -> bool {
    effective_level(snapshot, access, target) >= required
}

/// Like [`authorized`] but fails with [`EngineError::Unauthorized`].
pub fn require(
    snapshot: &SchemaSnapshot,
    access: &LoginAccess,
    target: AccessTarget,
    required: AccessLevel,
) -> Result<(), EngineError> {
    if authorized(snapshot, access, target, required) {
        return Ok(());
    }
    let (kind, name) = match target {
        AccessTarget::Relation(id) => ("relation", snapshot.relation(id).map(|r| r.name.as_str())),
        AccessTarget::Attribute(id) => (
            "attribute",
            snapshot.attribute(id).map(|a| a.name.as_str()),
        ),
    };
    let name = name.unwrap_or("?");
    warn!(
        login_id = access.login_id,
        target = kind,
        name = name,
        required = required.as_str(),
        "access denied"
    );
    Err(EngineError::Unauthorized(format!(
        "{} access to {kind} '{name}' required",
        required.as_str()
    )))
}

/// Row-level filter for `relation` addressed through `alias`.
///
/// Policies are evaluated in declaration order and the first one naming one of
/// the login's roles for `action` decides. Its exclusion function removes the
/// record ids it returns, its inclusion function restricts to the ids it
/// returns. A deciding policy without functions grants unrestricted rows, and
/// no deciding policy adds no restriction.
pub fn policy_filter(
    snapshot: &SchemaSnapshot,
    access: &LoginAccess,
    action: PolicyAction,
    alias: &Ident,
    relation: &Relation,
) -> Result<Option<SqlExpr>, EngineError> {
    let Some(policy) = relation.policies.iter().find(|p| {
        access.has_role(p.role_id)
            && match action {
                PolicyAction::Select => p.action_select,
                PolicyAction::Update => p.action_update,
                PolicyAction::Delete => p.action_delete,
            }
    }) else {
        return Ok(None);
    };

    let pk = Ident::new(&snapshot.pk_attribute(relation)?.name)?;
    let mut terms = Vec::with_capacity(2);
    for (fn_id, op) in [
        (policy.pg_function_id_excl, BinaryOp::NeAll),
        (policy.pg_function_id_incl, BinaryOp::EqAny),
    ] {
        let Some(fn_id) = fn_id else {
            continue;
        };
        let function = snapshot.get_pg_function(fn_id)?;
        let module = snapshot.get_module(function.module_id)?;
        terms.push(SqlExpr::binary(
            SqlExpr::column(alias, &pk),
            op,
            SqlExpr::Function {
                schema: Ident::new(&module.name)?,
                name: Ident::new(&function.name)?,
                args: vec![],
            },
        ));
    }
    Ok(match terms.len() {
        0 => None,
        1 => terms.pop(),
        _ => Some(SqlExpr::And(terms)),
    })
}
