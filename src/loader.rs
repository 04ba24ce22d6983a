//! Lazy engine loading and run dispatch.
//!
//! Decouples the run action from the cost of obtaining a working engine: the
//! first dispatch resolves and initializes the backend, every later dispatch
//! reuses the same handle.

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::engine::{
    EngineResolver, ExecutionEngine, LoadError, WasmEngineConfig, WasmModuleResolver,
};
use crate::model::{utc_timestamp, ExecutionRequest, IsolationMode, RunConfig, RunOutcome};
use crate::worker::{self, SpawnError, WorkerHandle};

/// The memoized execution backend: one of the two isolation implementations.
pub enum Backend {
    InProcess(Arc<dyn ExecutionEngine>),
    Worker(WorkerHandle),
}

/// A run failed somewhere between trigger and engine completion.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("engine load failed: {0}")]
    Load(#[from] LoadError),

    #[error("worker spawn failed: {0}")]
    Spawn(#[from] SpawnError),

    #[error("execution failed: {0}")]
    Execution(#[from] crate::engine::EngineError),

    #[error("worker error: {0}")]
    Worker(#[from] worker::WorkerError),
}

fn engine_config(cfg: &RunConfig) -> WasmEngineConfig {
    WasmEngineConfig {
        exec_timeout: cfg.exec_timeout,
        max_output_bytes: cfg.max_output_bytes,
        ..Default::default()
    }
}

/// Loads the execution backend once and dispatches requests to it.
///
/// Initializing at most once is a correctness requirement, not an
/// optimization: a second engine instance would duplicate global engine state
/// (and a second worker would double the isolation context). `OnceCell`
/// single-flights the first load, so concurrent early dispatches share the
/// one in-flight initialization. A failed load is not memoized; the next
/// dispatch retries.
pub struct EngineLoader {
    cfg: RunConfig,
    resolver: Arc<dyn EngineResolver>,
    backend: OnceCell<Arc<Backend>>,
}

impl EngineLoader {
    /// Loader for the engine module named by the config's locator.
    pub fn new(cfg: RunConfig) -> Self {
        let resolver = Arc::new(WasmModuleResolver::new(
            cfg.engine_path.clone(),
            engine_config(&cfg),
        ));
        Self::with_resolver(cfg, resolver)
    }

    /// Loader with an explicit resolver; tests inject doubles here.
    ///
    /// The resolver only covers in-process execution; worker isolation always
    /// loads from the config's module locator.
    pub fn with_resolver(cfg: RunConfig, resolver: Arc<dyn EngineResolver>) -> Self {
        Self {
            cfg,
            resolver,
            backend: OnceCell::new(),
        }
    }

    /// Obtain the backend handle, initializing it on first use.
    pub async fn load(&self) -> Result<Arc<Backend>, RunError> {
        let backend = self
            .backend
            .get_or_try_init(|| async {
                let backend = match self.cfg.isolation {
                    IsolationMode::InProcess => {
                        Backend::InProcess(self.resolver.resolve().await?)
                    }
                    IsolationMode::Worker => Backend::Worker(
                        worker::wasm_worker(
                            &self.cfg.engine_path,
                            engine_config(&self.cfg),
                            self.cfg.spawn_timeout,
                        )
                        .await?,
                    ),
                };
                Ok::<_, RunError>(Arc::new(backend))
            })
            .await?;
        Ok(backend.clone())
    }

    /// Whether the backend has already been initialized.
    pub fn is_loaded(&self) -> bool {
        self.backend.initialized()
    }

    pub fn config(&self) -> &RunConfig {
        &self.cfg
    }

    /// Run one request to completion on the loaded backend.
    pub async fn dispatch(&self, request: ExecutionRequest) -> Result<RunOutcome, RunError> {
        let backend = self.load().await?;
        let outcome = match backend.as_ref() {
            Backend::InProcess(engine) => engine.execute(&request.code).await?,
            Backend::Worker(handle) => handle.execute(&request.code).await?,
        };
        Ok(RunOutcome {
            request_id: request.id,
            timestamp_utc: utc_timestamp(),
            status: outcome.status,
            output: outcome.output,
            wall_time_ms: outcome.wall_time.as_millis() as u64,
            truncated: outcome.truncated,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::engine::{EngineError, ExecutionOutcome};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Engine double that records every code string it is handed.
    pub struct RecordingEngine {
        pub executed: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ExecutionEngine for RecordingEngine {
        async fn execute(&self, code: &str) -> Result<ExecutionOutcome, EngineError> {
            self.executed.lock().unwrap().push(code.to_string());
            Ok(ExecutionOutcome {
                status: 0,
                output: vec![code.to_string()],
                wall_time: Duration::from_millis(1),
                truncated: false,
            })
        }
    }

    /// Resolver double that counts resolutions and can stall or fail.
    pub struct StubResolver {
        pub calls: AtomicUsize,
        pub engine: Arc<RecordingEngine>,
        pub delay: Option<Duration>,
        pub fail_first: AtomicUsize,
    }

    impl StubResolver {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                engine: Arc::new(RecordingEngine {
                    executed: std::sync::Mutex::new(Vec::new()),
                }),
                delay: None,
                fail_first: AtomicUsize::new(0),
            })
        }

        pub fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                engine: Arc::new(RecordingEngine {
                    executed: std::sync::Mutex::new(Vec::new()),
                }),
                delay: Some(delay),
                fail_first: AtomicUsize::new(0),
            })
        }

        pub fn failing(times: usize) -> Arc<Self> {
            let stub = Self::new();
            stub.fail_first.store(times, Ordering::SeqCst);
            stub
        }
    }

    #[async_trait::async_trait]
    impl EngineResolver for StubResolver {
        async fn resolve(&self) -> Result<Arc<dyn ExecutionEngine>, LoadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(LoadError::Init("resolver refused".into()));
            }
            Ok(self.engine.clone() as Arc<dyn ExecutionEngine>)
        }
    }

    pub fn test_config(isolation: IsolationMode) -> RunConfig {
        RunConfig {
            engine_path: PathBuf::from("unused.wasm"),
            isolation,
            exec_timeout: Duration::from_secs(2),
            spawn_timeout: Duration::from_secs(2),
            max_output_bytes: 64 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{test_config, StubResolver};
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn load_is_idempotent_and_returns_the_same_handle() {
        let resolver = StubResolver::new();
        let loader =
            EngineLoader::with_resolver(test_config(IsolationMode::InProcess), resolver.clone());

        let first = loader.load().await.unwrap();
        let second = loader.load().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_first_dispatches_share_one_initialization() {
        let resolver = StubResolver::slow(Duration::from_millis(100));
        let loader = Arc::new(EngineLoader::with_resolver(
            test_config(IsolationMode::InProcess),
            resolver.clone(),
        ));

        let a = {
            let loader = loader.clone();
            tokio::spawn(
                async move { loader.dispatch(ExecutionRequest::new("a".into())).await },
            )
        };
        let b = {
            let loader = loader.clone();
            tokio::spawn(
                async move { loader.dispatch(ExecutionRequest::new("b".into())).await },
            )
        };

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        let mut seen = resolver.engine.executed.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn failed_load_is_not_memoized() {
        let resolver = StubResolver::failing(1);
        let loader =
            EngineLoader::with_resolver(test_config(IsolationMode::InProcess), resolver.clone());

        let err = loader
            .dispatch(ExecutionRequest::new("x".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Load(_)));
        assert!(!loader.is_loaded());

        // The next dispatch retries and succeeds.
        loader
            .dispatch(ExecutionRequest::new("x".into()))
            .await
            .unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dispatch_hands_the_exact_snapshot_to_the_engine() {
        let resolver = StubResolver::new();
        let loader =
            EngineLoader::with_resolver(test_config(IsolationMode::InProcess), resolver.clone());

        let outcome = loader
            .dispatch(ExecutionRequest::new("print(1)".into()))
            .await
            .unwrap();

        assert!(outcome.succeeded());
        assert_eq!(
            resolver.engine.executed.lock().unwrap().as_slice(),
            ["print(1)".to_string()]
        );
    }
}
