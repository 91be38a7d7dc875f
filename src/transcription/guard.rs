//! # Model Lifecycle Guard
//!
//! Loads the speech engine at most once per process, on first use, no matter
//! how many sessions ask for it at the same time.
//!
//! ## Loading Strategy (double-checked):
//! 1. Fast path: the engine is already set, hand it out without locking
//! 2. Slow path: take the async load lock, check again, then load
//! 3. A failed load stores nothing, so the next caller simply tries again
//!
//! ## Engine Lookup:
//! The compiled engine lives at `<model_dir>/<model_name>.<ext>`. That file is
//! checked first, then the same file name in every data directory. When none
//! exists the engine is built from the model name and written to the
//! `model_dir` location, so later runs load it directly.

use crate::error::{WyomingError, WyomingResult};
use crate::transcription::backend::{EngineLoader, SpeechEngine};
use crate::transcription::worker::WorkerContext;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::sync::Mutex;

/// Where the guard looks for and writes compiled engines.
#[derive(Debug, Clone)]
pub struct EngineLocation {
    pub model_name: String,
    pub model_dir: PathBuf,
    pub data_dirs: Vec<PathBuf>,
}

struct LoadedEngine {
    engine: Arc<dyn SpeechEngine>,
    path: PathBuf,
}

/// Process-wide owner of the loaded engine.
///
/// The state lives behind an `Arc` so a load can outlive the caller that
/// started it: a session that disconnects during a long build does not
/// abandon the build, and the next caller picks up its result.
pub struct ModelGuard {
    inner: Arc<GuardState>,
}

struct GuardState {
    location: EngineLocation,
    loader: Arc<dyn EngineLoader>,
    worker: WorkerContext,
    loaded: OnceLock<LoadedEngine>,
    load_lock: Mutex<()>,
}

impl ModelGuard {
    pub fn new(
        location: EngineLocation,
        loader: Arc<dyn EngineLoader>,
        worker: WorkerContext,
    ) -> Self {
        Self {
            inner: Arc::new(GuardState {
                location,
                loader,
                worker,
                loaded: OnceLock::new(),
                load_lock: Mutex::new(()),
            }),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.inner.location.model_name
    }

    /// Return the engine, loading or building it first if needed.
    ///
    /// ## Returns:
    /// - **Ok(engine)**: the shared engine, identical for every caller
    /// - **Err(ModelUnavailable)**: load or build failed; nothing was cached
    pub async fn ensure_loaded(&self) -> WyomingResult<Arc<dyn SpeechEngine>> {
        if let Some(loaded) = self.inner.loaded.get() {
            return Ok(loaded.engine.clone());
        }

        // Detached so that dropping this future does not cancel the load
        let state = self.inner.clone();
        tokio::spawn(async move { state.load_once().await })
            .await
            .map_err(|e| {
                WyomingError::ModelUnavailable(format!("load task did not complete: {}", e))
            })?
    }

    /// Whether a load has completed successfully.
    pub fn is_loaded(&self) -> bool {
        self.inner.loaded.get().is_some()
    }

    /// Path of the engine file in use, or the path a build would write to.
    pub fn engine_path(&self) -> PathBuf {
        match self.inner.loaded.get() {
            Some(loaded) => loaded.path.clone(),
            None => self.inner.engine_file(),
        }
    }
}

impl GuardState {
    async fn load_once(&self) -> WyomingResult<Arc<dyn SpeechEngine>> {
        let _lock = self.load_lock.lock().await;

        // Another session may have finished loading while we waited
        if let Some(loaded) = self.loaded.get() {
            return Ok(loaded.engine.clone());
        }

        let start = Instant::now();
        tracing::info!(model = %self.location.model_name, "Loading speech engine");

        let loaded = self.load().await.map_err(|e| {
            tracing::error!(
                model = %self.location.model_name,
                error = ?e,
                "Failed to load speech engine"
            );
            WyomingError::ModelUnavailable(format!("{:#}", e))
        })?;

        tracing::info!(
            model = %self.location.model_name,
            engine = %loaded.engine.describe(),
            path = %loaded.path.display(),
            elapsed_secs = start.elapsed().as_secs_f64(),
            "Speech engine ready"
        );

        let engine = loaded.engine.clone();
        let _ = self.loaded.set(loaded);
        Ok(engine)
    }

    fn engine_file_name(&self) -> String {
        format!("{}.{}", self.location.model_name, self.loader.engine_extension())
    }

    fn engine_file(&self) -> PathBuf {
        self.location.model_dir.join(self.engine_file_name())
    }

    /// First existing engine file: `model_dir`, then each data directory.
    fn find_existing_engine(&self) -> Option<PathBuf> {
        let file_name = self.engine_file_name();
        std::iter::once(self.location.model_dir.as_path())
            .chain(self.location.data_dirs.iter().map(PathBuf::as_path))
            .map(|dir| dir.join(&file_name))
            .find(|path| path.is_file())
    }

    async fn load(&self) -> anyhow::Result<LoadedEngine> {
        let loader = self.loader.clone();

        if let Some(path) = self.find_existing_engine() {
            tracing::info!(
                path = %path.display(),
                data_dir = !path.starts_with(&self.location.model_dir),
                "Loading cached engine"
            );
            let job_path = path.clone();
            let engine = self
                .worker
                .run("load-engine", move || loader.load_engine(&job_path))
                .await?;
            return Ok(LoadedEngine { engine, path });
        }

        let path = self.engine_file();
        tracing::info!(
            model = %self.location.model_name,
            path = %path.display(),
            "No cached engine found, building one"
        );

        let model_name = self.location.model_name.clone();
        let job_path = path.clone();
        let engine = self
            .worker
            .run("build-engine", move || {
                if let Some(dir) = job_path.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                loader.build_engine(&model_name, &job_path)
            })
            .await?;

        Ok(LoadedEngine { engine, path })
    }
}
