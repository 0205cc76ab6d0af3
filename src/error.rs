use crate::store::StoreError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Module,
    Relation,
    Attribute,
    PgFunction,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Module => write!(f, "module"),
            ResourceType::Relation => write!(f, "relation"),
            ResourceType::Attribute => write!(f, "attribute"),
            ResourceType::PgFunction => write!(f, "function"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorCode {
    SchemaUnknown,
    Unauthorized,
    Validation,
    ProtectedViolation,
    Store,
    Cancelled,
    Timeout,
}

impl EngineErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineErrorCode::SchemaUnknown => "schema_unknown",
            EngineErrorCode::Unauthorized => "unauthorized",
            EngineErrorCode::Validation => "validation",
            EngineErrorCode::ProtectedViolation => "protected_violation",
            EngineErrorCode::Store => "store",
            EngineErrorCode::Cancelled => "cancelled",
            EngineErrorCode::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{resource_type} '{id}' unknown")]
    SchemaUnknown { resource_type: ResourceType, id: Uuid },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("protected: {0}")]
    ProtectedViolation(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("cancelled")]
    Cancelled,
    #[error("timeout")]
    Timeout,
}

impl EngineError {
    pub fn unknown(resource_type: ResourceType, id: Uuid) -> Self {
        EngineError::SchemaUnknown { resource_type, id }
    }

    pub fn code(&self) -> EngineErrorCode {
        match self {
            EngineError::SchemaUnknown { .. } => EngineErrorCode::SchemaUnknown,
            EngineError::Unauthorized(_) => EngineErrorCode::Unauthorized,
            EngineError::Validation(_) => EngineErrorCode::Validation,
            EngineError::ProtectedViolation(_) => EngineErrorCode::ProtectedViolation,
            EngineError::Store(_) => EngineErrorCode::Store,
            EngineError::Cancelled => EngineErrorCode::Cancelled,
            EngineError::Timeout => EngineErrorCode::Timeout,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// Message safe to hand to the caller.
    ///
    /// Schema drift, validation and store failures can leak relation and
    /// column names, so non-admin callers only see a generic message for those.
    pub fn public_message(&self, admin: bool) -> String {
        if admin {
            return self.to_string();
        }
        match self {
            EngineError::SchemaUnknown { .. } => {
                "request references unknown schema entities".to_string()
            }
            EngineError::Validation(_) => "invalid request".to_string(),
            EngineError::Store(err) => match err.code.as_deref() {
                Some(code) => format!("database error ({code})"),
                None => "database error".to_string(),
            },
            EngineError::Unauthorized(_)
            | EngineError::ProtectedViolation(_)
            | EngineError::Cancelled
            | EngineError::Timeout => self.to_string(),
        }
    }
}
