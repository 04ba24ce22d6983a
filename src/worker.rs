//! Dedicated-thread isolation for the execution engine.
//!
//! A worker owns its engine on a separate OS thread and takes jobs over a
//! channel, so runaway user code never blocks the interface thread. The
//! handle resolves once the worker reports that its engine is ready,
//! mirroring the in-process dispatch contract.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::engine::{
    EngineError, EngineResolver, ExecutionOutcome, LoadError, WasmEngineConfig, WasmModuleResolver,
};

/// Grace added on top of the engine's own deadline before the handle gives
/// up on a reply and tears the worker down.
const REPLY_GRACE: Duration = Duration::from_secs(1);

/// A dedicated worker context failed to start.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("worker thread failed to start: {0}")]
    Thread(String),

    #[error("worker failed to initialize its engine: {0}")]
    Load(#[from] LoadError),

    #[error("worker did not become ready within {0:?}")]
    ReadyTimeout(Duration),
}

/// A run on an already-spawned worker failed outside the engine itself.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker is gone")]
    WorkerGone,

    #[error("worker run exceeded {0:?} and the worker was torn down")]
    Timeout(Duration),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

struct Job {
    code: String,
    reply: oneshot::Sender<Result<ExecutionOutcome, EngineError>>,
}

/// Handle to a running worker; dropping the last clone of the job channel
/// lets the thread drain and exit.
#[derive(Debug)]
pub struct WorkerHandle {
    jobs: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    reply_timeout: Duration,
}

impl WorkerHandle {
    /// Run code inside the worker, mirroring the loader's dispatch contract.
    ///
    /// The engine enforces its own deadline inside the guest; this wait only
    /// has to catch a wedged worker. On expiry the handle is poisoned and the
    /// job channel dropped, so the thread exits once the hung engine call
    /// returns.
    pub async fn execute(&self, code: &str) -> Result<ExecutionOutcome, WorkerError> {
        let sender = self
            .jobs
            .lock()
            .unwrap()
            .clone()
            .ok_or(WorkerError::WorkerGone)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        sender
            .send(Job {
                code: code.to_string(),
                reply: reply_tx,
            })
            .map_err(|_| WorkerError::WorkerGone)?;

        match tokio::time::timeout(self.reply_timeout, reply_rx).await {
            Ok(Ok(result)) => result.map_err(WorkerError::Engine),
            Ok(Err(_)) => Err(WorkerError::WorkerGone),
            Err(_) => {
                self.teardown();
                Err(WorkerError::Timeout(self.reply_timeout))
            }
        }
    }

    fn teardown(&self) {
        self.jobs.lock().unwrap().take();
    }
}

/// Start a worker around the engine the resolver produces.
///
/// Resolution happens inside the worker thread; the returned future resolves
/// when the worker reports readiness, or fails with the resolution error.
pub async fn spawn(
    resolver: Arc<dyn EngineResolver>,
    exec_timeout: Duration,
    spawn_timeout: Duration,
) -> Result<WorkerHandle, SpawnError> {
    let (jobs_tx, jobs_rx) = mpsc::unbounded_channel::<Job>();
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), LoadError>>();

    std::thread::Builder::new()
        .name("wasmpad-worker".into())
        .spawn(move || worker_main(resolver, jobs_rx, ready_tx))
        .map_err(|e| SpawnError::Thread(e.to_string()))?;

    match tokio::time::timeout(spawn_timeout, ready_rx).await {
        Ok(Ok(Ok(()))) => Ok(WorkerHandle {
            jobs: Mutex::new(Some(jobs_tx)),
            reply_timeout: exec_timeout + REPLY_GRACE,
        }),
        Ok(Ok(Err(load_err))) => Err(SpawnError::Load(load_err)),
        Ok(Err(_)) => Err(SpawnError::Thread(
            "worker exited before reporting ready".into(),
        )),
        Err(_) => Err(SpawnError::ReadyTimeout(spawn_timeout)),
    }
}

/// Spawn a worker for the wasm engine module at `file_url`.
pub async fn wasm_worker(
    file_url: &Path,
    config: WasmEngineConfig,
    spawn_timeout: Duration,
) -> Result<WorkerHandle, SpawnError> {
    let exec_timeout = config.exec_timeout;
    let resolver = Arc::new(WasmModuleResolver::new(file_url.to_path_buf(), config));
    spawn(resolver, exec_timeout, spawn_timeout).await
}

fn worker_main(
    resolver: Arc<dyn EngineResolver>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    ready: oneshot::Sender<Result<(), LoadError>>,
) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready.send(Err(LoadError::Init(e.to_string())));
            return;
        }
    };

    let engine = match rt.block_on(resolver.resolve()) {
        Ok(engine) => engine,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if ready.send(Ok(())).is_err() {
        return;
    }

    while let Some(job) = jobs.blocking_recv() {
        let result = rt.block_on(engine.execute(&job.code));
        // The caller may have timed out and dropped its receiver.
        let _ = job.reply.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecutionEngine;
    use crate::loader::test_support::StubResolver;
    use std::path::PathBuf;

    struct HangingEngine;

    #[async_trait::async_trait]
    impl ExecutionEngine for HangingEngine {
        async fn execute(&self, _code: &str) -> Result<ExecutionOutcome, EngineError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            unreachable!("the handle should give up first");
        }
    }

    struct HangingResolver;

    #[async_trait::async_trait]
    impl EngineResolver for HangingResolver {
        async fn resolve(&self) -> Result<Arc<dyn ExecutionEngine>, LoadError> {
            Ok(Arc::new(HangingEngine))
        }
    }

    #[tokio::test]
    async fn worker_executes_and_replies() {
        let resolver = StubResolver::new();
        let handle = spawn(resolver.clone(), Duration::from_secs(2), Duration::from_secs(2))
            .await
            .unwrap();

        let outcome = handle.execute("print(1)").await.unwrap();
        assert_eq!(outcome.status, 0);
        assert_eq!(
            resolver.engine.executed.lock().unwrap().as_slice(),
            ["print(1)".to_string()]
        );
    }

    #[tokio::test]
    async fn failed_resolution_surfaces_as_spawn_error() {
        let resolver = StubResolver::failing(1);
        let err = spawn(resolver, Duration::from_secs(2), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, SpawnError::Load(_)));
    }

    #[tokio::test]
    async fn missing_module_fails_the_wasm_worker() {
        let err = wasm_worker(
            &PathBuf::from("/definitely/not/here.wasm"),
            WasmEngineConfig::default(),
            Duration::from_secs(2),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            SpawnError::Load(LoadError::ModuleNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn wedged_worker_is_torn_down_and_stays_gone() {
        let handle = spawn(
            Arc::new(HangingResolver),
            Duration::from_millis(50),
            Duration::from_secs(2),
        )
        .await
        .unwrap();

        let err = handle.execute("spin").await.unwrap_err();
        assert!(matches!(err, WorkerError::Timeout(_)));

        let err = handle.execute("again").await.unwrap_err();
        assert!(matches!(err, WorkerError::WorkerGone));
    }
}
