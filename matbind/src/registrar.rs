//! Module entry point
//!
//! Registration is staged: the class definition and the target namespace are
//! checked before anything is committed, so a failed registration leaves the
//! host's namespace exactly as it was.

use std::sync::Arc;

use thiserror::Error;

use crate::binding::{self, MatRuntime};
use crate::config::{BindingConfig, ConfigError};
use crate::host::{Env, Export, Exports, HostError};
use crate::ledger::MemoryLedger;

/// Name the module is loaded under
pub const MODULE_NAME: &str = "matbind";

/// Fatal failure while installing the module
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("invalid binding configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("`{0}` is already exported by the module namespace")]
    NameCollision(String),
    #[error("class `{class}` declares `{member}` more than once")]
    DuplicateMember { class: String, member: &'static str },
    #[error("the matrix module is already registered in this environment as `{0}`")]
    AlreadyRegistered(String),
    #[error("host rejected the class definition: {0}")]
    Host(#[from] HostError),
}

/// Installs the matrix class into a module namespace
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistrar {
    config: BindingConfig,
}

impl ModuleRegistrar {
    pub fn new(config: BindingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BindingConfig {
        &self.config
    }

    /// Populate `exports` with the matrix class
    ///
    /// On failure the error is logged and `exports` is dropped unmodified;
    /// the caller should treat the module as not loaded.
    pub fn init(&self, env: &mut Env, exports: Exports) -> Result<Exports, RegistrationError> {
        self.register(env, exports).map_err(|err| {
            tracing::error!(module = MODULE_NAME, error = %err, "module registration failed");
            err
        })
    }

    /// Load through the host's module cache; `init` runs at most once per env
    pub fn load(&self, env: &mut Env) -> Result<Exports, RegistrationError> {
        env.load_module(MODULE_NAME, |env, exports| self.init(env, exports))
    }

    fn register(&self, env: &mut Env, mut exports: Exports) -> Result<Exports, RegistrationError> {
        self.config.validate()?;
        if let Some(runtime) = env.instance_data::<MatRuntime>() {
            return Err(RegistrationError::AlreadyRegistered(
                runtime.class_name().to_string(),
            ));
        }

        let def = binding::class_def(&self.config.class_name);
        if exports.contains(&def.name) {
            return Err(RegistrationError::NameCollision(def.name));
        }
        if let Some(member) = def.duplicate_member() {
            return Err(RegistrationError::DuplicateMember {
                class: def.name,
                member,
            });
        }

        // commit: nothing below fails after the host accepts the class
        let class = env.define_class(def)?;
        let ledger = Arc::new(MemoryLedger::new(self.config.max_allocation_bytes));
        env.set_instance_data(MatRuntime::new(ledger, self.config.class_name.clone()));
        exports.insert(self.config.class_name.clone(), Export::Class(class));

        tracing::info!(
            module = MODULE_NAME,
            class = %self.config.class_name,
            max_allocation_bytes = self.config.max_allocation_bytes,
            "registered module"
        );
        Ok(exports)
    }
}

/// Host entry point: configuration comes from `MATBIND_*` variables
pub fn init(env: &mut Env, exports: Exports) -> Result<Exports, RegistrationError> {
    let config = BindingConfig::from_env().map_err(|err| {
        tracing::error!(module = MODULE_NAME, error = %err, "module configuration rejected");
        RegistrationError::from(err)
    })?;
    ModuleRegistrar::new(config).init(env, exports)
}

/// Load the module into `env` via its module cache using [`init`]
pub fn load(env: &mut Env) -> Result<Exports, RegistrationError> {
    env.load_module(MODULE_NAME, init)
}
