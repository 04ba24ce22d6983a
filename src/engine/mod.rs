mod wasm;

pub use wasm::{WasmEngine, WasmEngineConfig};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Execution interface for a loaded engine module.
///
/// Implementations run a code string to completion; what "running" means is
/// entirely up to the engine. The bridge only hands the string over and
/// collects whatever the engine emitted.
#[async_trait::async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(&self, code: &str) -> Result<ExecutionOutcome, EngineError>;
}

/// Raw result of one engine invocation, before stamping.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Guest exit status; zero means success.
    pub status: i32,
    pub output: Vec<String>,
    pub wall_time: Duration,
    pub truncated: bool,
}

/// Resolves a working execution engine on first use.
///
/// The loader calls this at most once per successful load; tests substitute
/// counting or failing doubles.
#[async_trait::async_trait]
pub trait EngineResolver: Send + Sync {
    async fn resolve(&self) -> Result<Arc<dyn ExecutionEngine>, LoadError>;
}

/// Production resolver: the wasm engine module at a filesystem locator.
pub struct WasmModuleResolver {
    path: PathBuf,
    config: WasmEngineConfig,
}

impl WasmModuleResolver {
    pub fn new(path: PathBuf, config: WasmEngineConfig) -> Self {
        Self { path, config }
    }
}

#[async_trait::async_trait]
impl EngineResolver for WasmModuleResolver {
    async fn resolve(&self) -> Result<Arc<dyn ExecutionEngine>, LoadError> {
        // Compilation is CPU-bound; keep it off the async runtime.
        let path = self.path.clone();
        let config = self.config.clone();
        let engine = tokio::task::spawn_blocking(move || WasmEngine::from_file(&path, config))
            .await
            .map_err(|e| LoadError::Init(e.to_string()))??;
        Ok(Arc::new(engine))
    }
}

/// The engine module could not be resolved or initialized.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("engine module not found: {}", path.display())]
    ModuleNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid engine module: {0}")]
    InvalidModule(String),

    #[error("engine initialization failed: {0}")]
    Init(String),
}

/// The engine itself failed while running submitted code.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine trapped: {0}")]
    Trap(String),

    #[error("engine is missing export `{0}`")]
    MissingExport(&'static str),

    #[error("execution deadline exceeded")]
    DeadlineExceeded,

    #[error("engine task failed: {0}")]
    Join(String),
}
