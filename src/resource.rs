//! Resource injectors
//!
//! The external collaborators that seed a context: file reads, environment lookups, and
//! registered functions. The engine treats them as read-only and takes no locks around
//! them; consistency between concurrent reads is the resource owner's concern.

use crate::context::ContextValue;
use crate::error::ResourceError;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Arguments passed to an injected function, already resolved against the context.
pub type FunctionArgs = BTreeMap<String, ContextValue>;

/// A function callable from an `InjectFunction` step.
pub type InjectFn = Arc<dyn Fn(&FunctionArgs) -> anyhow::Result<ContextValue> + Send + Sync>;

/// Read-only access to the resources a thread step may inject
pub trait ResourceResolver: Send + Sync {
    fn read_file(&self, path: &Path) -> Result<String, ResourceError>;

    fn read_env(&self, name: &str) -> Result<String, ResourceError>;

    fn call_function(&self, name: &str, args: &FunctionArgs) -> Result<ContextValue, ResourceError>;
}

/// Named functions available to `InjectFunction` steps
#[derive(Default)]
pub struct FunctionRegistry {
    functions: RwLock<HashMap<String, InjectFn>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(&FunctionArgs) -> anyhow::Result<ContextValue> + Send + Sync + 'static,
    {
        self.functions.write().insert(name.into(), Arc::new(function));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn call(&self, name: &str, args: &FunctionArgs) -> Result<ContextValue, ResourceError> {
        // Clone the handle out so the lock is not held while user code runs.
        let function = self
            .functions
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ResourceError::UnknownFunction(name.to_string()))?;
        function(args).map_err(|err| ResourceError::Function {
            name: name.to_string(),
            message: format!("{:#}", err),
        })
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

/// Resolver backed by the local filesystem, the process environment and a function registry.
///
/// Relative file paths resolve against `root` when one is set. Env overrides shadow the
/// process environment, which keeps tests independent of global state.
#[derive(Debug, Default, Clone)]
pub struct LocalResolver {
    root: Option<PathBuf>,
    env_overrides: HashMap<String, String>,
    functions: Arc<FunctionRegistry>,
}

impl LocalResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_overrides.insert(name.into(), value.into());
        self
    }

    pub fn with_functions(mut self, functions: Arc<FunctionRegistry>) -> Self {
        self.functions = functions;
        self
    }

    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.functions
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl ResourceResolver for LocalResolver {
    fn read_file(&self, path: &Path) -> Result<String, ResourceError> {
        let full_path = self.resolve_path(path);
        std::fs::read_to_string(&full_path).map_err(|err| ResourceError::File {
            path: full_path,
            message: err.to_string(),
        })
    }

    fn read_env(&self, name: &str) -> Result<String, ResourceError> {
        if let Some(value) = self.env_overrides.get(name) {
            return Ok(value.clone());
        }
        std::env::var(name).map_err(|_| ResourceError::MissingEnv(name.to_string()))
    }

    fn call_function(&self, name: &str, args: &FunctionArgs) -> Result<ContextValue, ResourceError> {
        self.functions.call(name, args)
    }
}
