use parking_lot::Mutex;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ModelLoadError {
    #[error("model file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to load model from {path}: {message}")]
    Load { path: PathBuf, message: String },
}

pub trait ModelLoader: Send + Sync + 'static {
    type Model: Send + Sync + 'static;

    fn load(&self, path: &Path) -> Result<Self::Model, ModelLoadError>;
}

/// Path-keyed cache of loaded model artifacts.
///
/// The lock is held for the whole first load, so two concurrent requests for
/// the same artifact share a single read from disk. Load failures are never
/// cached: a later call retries.
pub struct ModelCache<L: ModelLoader> {
    loader: L,
    loaded: Mutex<HashMap<PathBuf, Arc<L::Model>>>,
}

impl<L: ModelLoader> ModelCache<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, path: &Path) -> Result<Arc<L::Model>, ModelLoadError> {
        let mut loaded = self.loaded.lock();
        if let Some(model) = loaded.get(path) {
            return Ok(model.clone());
        }

        let model = Arc::new(self.loader.load(path)?);
        loaded.insert(path.to_path_buf(), model.clone());
        tracing::info!("loaded model artifact {}", path.display());

        Ok(model)
    }

    /// Drops the cached handle for `path`. Returns whether one was present.
    pub fn invalidate(&self, path: &Path) -> bool {
        self.loaded.lock().remove(path).is_some()
    }

    pub fn reload(&self, path: &Path) -> Result<Arc<L::Model>, ModelLoadError> {
        self.invalidate(path);
        self.get(path)
    }
}
