//! Wasm-backed execution engine using wasmtime.
//!
//! The guest ABI is one code string in, emitted lines out: the host calls the
//! exported `alloc` to place the string in linear memory, then `execute`; the
//! guest reports output through the imported `env::emit`.

use std::time::{Duration, Instant};

use wasmtime::{
    Caller, Config, Engine, Extern, InstancePre, Linker, Module, Store, StoreLimits,
    StoreLimitsBuilder, Trap,
};

use super::{EngineError, ExecutionEngine, ExecutionOutcome, LoadError};

/// Engine-global epoch tick; per-run deadlines are counted in these ticks.
const EPOCH_TICK: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct WasmEngineConfig {
    /// Hard wall-clock limit for one `execute` call.
    pub exec_timeout: Duration,
    /// Cap on bytes collected from `emit`; the rest is dropped and flagged.
    pub max_output_bytes: usize,
    /// Max guest linear memory (bytes).
    pub max_memory_bytes: usize,
}

impl Default for WasmEngineConfig {
    fn default() -> Self {
        Self {
            exec_timeout: Duration::from_secs(5),
            max_output_bytes: 256 * 1024,
            max_memory_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Per-run host state: collected output plus the memory limiter.
struct HostState {
    output: Vec<String>,
    emitted_bytes: usize,
    max_output_bytes: usize,
    truncated: bool,
    limits: StoreLimits,
}

impl HostState {
    fn new(config: &WasmEngineConfig) -> Self {
        Self {
            output: Vec::new(),
            emitted_bytes: 0,
            max_output_bytes: config.max_output_bytes,
            truncated: false,
            limits: StoreLimitsBuilder::new()
                .memory_size(config.max_memory_bytes)
                .build(),
        }
    }
}

/// A compiled engine module, instantiated freshly for every run.
///
/// The compiled `Module` and the pre-linked instance template are shared
/// read-only across runs; each run gets its own `Store`, so guest state never
/// leaks between requests.
#[derive(Clone)]
pub struct WasmEngine {
    engine: Engine,
    instance_pre: InstancePre<HostState>,
    config: WasmEngineConfig,
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WasmEngine {
    pub fn from_file(path: &std::path::Path, config: WasmEngineConfig) -> Result<Self, LoadError> {
        let bytes = std::fs::read(path).map_err(|source| LoadError::ModuleNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&bytes, config)
    }

    pub fn from_bytes(bytes: &[u8], config: WasmEngineConfig) -> Result<Self, LoadError> {
        if bytes.len() < 4 || !bytes.starts_with(b"\0asm") {
            return Err(LoadError::InvalidModule("missing wasm magic header".into()));
        }

        let mut wasm_config = Config::new();
        wasm_config.epoch_interruption(true);
        let engine =
            Engine::new(&wasm_config).map_err(|e| LoadError::Init(format!("{e:#}")))?;

        let module = Module::new(&engine, bytes)
            .map_err(|e| LoadError::InvalidModule(format!("{e:#}")))?;

        for export in ["memory", "alloc", "execute"] {
            if module.get_export(export).is_none() {
                return Err(LoadError::InvalidModule(format!(
                    "missing export `{export}`"
                )));
            }
        }

        let mut linker: Linker<HostState> = Linker::new(&engine);
        linker
            .func_wrap("env", "emit", host_emit)
            .map_err(|e| LoadError::Init(format!("{e:#}")))?;
        let instance_pre = linker
            .instantiate_pre(&module)
            .map_err(|e| LoadError::InvalidModule(format!("{e:#}")))?;

        // One background ticker drives epoch deadlines for the lifetime of
        // this engine; the engine is loaded once per process.
        let ticker = engine.clone();
        std::thread::spawn(move || loop {
            std::thread::sleep(EPOCH_TICK);
            ticker.increment_epoch();
        });

        Ok(Self {
            engine,
            instance_pre,
            config,
        })
    }

    fn run_blocking(&self, code: &str) -> Result<ExecutionOutcome, EngineError> {
        let started = Instant::now();

        let mut store = Store::new(&self.engine, HostState::new(&self.config));
        store.limiter(|state| &mut state.limits);
        store.set_epoch_deadline(deadline_ticks(self.config.exec_timeout));

        let instance = self
            .instance_pre
            .instantiate(&mut store)
            .map_err(classify_trap)?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or(EngineError::MissingExport("memory"))?;
        let alloc = instance
            .get_typed_func::<u32, u32>(&mut store, "alloc")
            .map_err(|_| EngineError::MissingExport("alloc"))?;
        let execute = instance
            .get_typed_func::<(u32, u32), i32>(&mut store, "execute")
            .map_err(|_| EngineError::MissingExport("execute"))?;

        let len = code.len() as u32;
        let ptr = alloc.call(&mut store, len).map_err(classify_trap)?;
        memory
            .write(&mut store, ptr as usize, code.as_bytes())
            .map_err(|e| EngineError::Trap(format!("{e:#}")))?;

        let status = execute.call(&mut store, (ptr, len)).map_err(classify_trap)?;

        let state = store.into_data();
        Ok(ExecutionOutcome {
            status,
            output: state.output,
            wall_time: started.elapsed(),
            truncated: state.truncated,
        })
    }
}

#[async_trait::async_trait]
impl ExecutionEngine for WasmEngine {
    async fn execute(&self, code: &str) -> Result<ExecutionOutcome, EngineError> {
        // The wasm call is blocking; keep it off the async runtime so the
        // interface stays responsive while user code runs.
        let engine = self.clone();
        let code = code.to_string();
        tokio::task::spawn_blocking(move || engine.run_blocking(&code))
            .await
            .map_err(|e| EngineError::Join(e.to_string()))?
    }
}

/// Collect one emitted chunk from the guest as an output line.
fn host_emit(mut caller: Caller<'_, HostState>, ptr: u32, len: u32) -> anyhow::Result<()> {
    let memory = match caller.get_export("memory") {
        Some(Extern::Memory(m)) => m,
        _ => anyhow::bail!("guest has no exported memory"),
    };

    let mut buf = vec![0u8; len as usize];
    memory.read(&caller, ptr as usize, &mut buf)?;

    let state = caller.data_mut();
    if state.emitted_bytes + buf.len() > state.max_output_bytes {
        state.truncated = true;
        return Ok(());
    }
    state.emitted_bytes += buf.len();
    state
        .output
        .push(String::from_utf8_lossy(&buf).into_owned());
    Ok(())
}

fn deadline_ticks(timeout: Duration) -> u64 {
    (timeout.as_millis() / EPOCH_TICK.as_millis()).max(1) as u64
}

fn classify_trap(err: anyhow::Error) -> EngineError {
    if err.downcast_ref::<Trap>() == Some(&Trap::Interrupt) {
        EngineError::DeadlineExceeded
    } else {
        EngineError::Trap(format!("{err:#}"))
    }
}
