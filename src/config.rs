/// Runtime configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Deepest sub-query nesting level the compiler accepts.
    pub max_nesting_depth: u32,
    /// Upper bound on filters per request scope.
    pub max_filter_count: usize,
    /// Number of logins whose effective access is kept in memory.
    pub access_cache_capacity: usize,
    pub change_log_enabled: bool,
    /// Database schema holding the per-attribute file record tables.
    pub file_schema: String,
    /// Database schema holding the change log tables.
    pub log_schema: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_nesting_depth: 8,
            max_filter_count: 256,
            access_cache_capacity: 1024,
            change_log_enabled: true,
            file_schema: "instance_file".to_string(),
            log_schema: "instance".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn development() -> Self {
        Self {
            max_nesting_depth: 16,
            max_filter_count: 1024,
            access_cache_capacity: 64,
            ..Self::default()
        }
    }

    /// Tighter limits for instances exposed to untrusted request builders.
    pub fn strict() -> Self {
        Self {
            max_nesting_depth: 4,
            max_filter_count: 64,
            ..Self::default()
        }
    }

    pub fn without_change_log(mut self) -> Self {
        self.change_log_enabled = false;
        self
    }
}
