//! Binding configuration
//!
//! Defaults can be overridden from JSON or from `MATBIND_*` environment
//! variables before the module registers itself with the host.

use thiserror::Error;

/// Environment variable overriding [`BindingConfig::max_allocation_bytes`]
pub const ENV_MAX_ALLOCATION_BYTES: &str = "MATBIND_MAX_ALLOCATION_BYTES";
/// Environment variable overriding [`BindingConfig::class_name`]
pub const ENV_CLASS_NAME: &str = "MATBIND_CLASS_NAME";

/// Errors raised while building a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("class name {0:?} is not a valid identifier")]
    InvalidClassName(String),
    #[error("max_allocation_bytes must be positive")]
    ZeroAllocationLimit,
    #[cfg(feature = "serde")]
    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration for the matrix binding
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BindingConfig {
    /// Largest single buffer `allocate` may create, in bytes
    pub max_allocation_bytes: usize,
    /// Name the constructor is installed under in the module namespace
    pub class_name: String,
}

impl BindingConfig {
    /// Default per-allocation limit: 1 GiB
    pub const DEFAULT_MAX_ALLOCATION_BYTES: usize = 1 << 30;

    /// Default constructor name
    pub const DEFAULT_CLASS_NAME: &'static str = "Mat";

    /// Set the per-allocation byte limit
    pub fn with_max_allocation_bytes(mut self, bytes: usize) -> Self {
        self.max_allocation_bytes = bytes;
        self
    }

    /// Set the exported class name
    pub fn with_class_name(mut self, name: impl Into<String>) -> Self {
        self.class_name = name.into();
        self
    }

    /// Parse a JSON document; missing fields keep their defaults
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by the `MATBIND_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup, then validate
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_ALLOCATION_BYTES) {
            self.max_allocation_bytes =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: ENV_MAX_ALLOCATION_BYTES,
                        value: value.clone(),
                    })?;
        }
        if let Some(value) = lookup(ENV_CLASS_NAME) {
            self.class_name = value.trim().to_string();
        }
        self.validate()?;
        Ok(self)
    }

    /// Check invariants the registrar relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_allocation_bytes == 0 {
            return Err(ConfigError::ZeroAllocationLimit);
        }
        if !is_identifier(&self.class_name) {
            return Err(ConfigError::InvalidClassName(self.class_name.clone()));
        }
        Ok(())
    }
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            max_allocation_bytes: Self::DEFAULT_MAX_ALLOCATION_BYTES,
            class_name: Self::DEFAULT_CLASS_NAME.to_string(),
        }
    }
}

/// Host identifier rule: leading letter, `_` or `$`, then alphanumerics too
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
