//! Model loading with progress reporting.
//!
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::{io::AsyncWriteExt, sync::watch, task::JoinHandle};

use crate::nn::{InferModel, InferenceError, YoloModel, YoloParams};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to download model: {0}")]
    Network(#[from] reqwest::Error),
    #[error("failed to store model: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to initialize model: {0}")]
    Model(#[from] InferenceError),
    #[error("model loading task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Progress of loading the model.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LoadProgress {
    pub loading: bool,
    pub fraction: f32,
}

impl Default for LoadProgress {
    fn default() -> Self {
        Self {
            loading: true,
            fraction: 0.0,
        }
    }
}

/// Publishes [`LoadProgress`]. The fraction never decreases.
pub struct LoadTracker {
    tx: watch::Sender<LoadProgress>,
}

impl LoadTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LoadProgress::default());
        Self { tx }
    }

    pub fn get(&self) -> LoadProgress {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoadProgress> {
        self.tx.subscribe()
    }

    pub fn update(&self, fraction: f32) {
        let fraction = fraction.clamp(0.0, 1.0);
        self.tx.send_if_modified(|progress| {
            if progress.loading && fraction > progress.fraction {
                progress.fraction = fraction;
                true
            } else {
                false
            }
        });
    }

    pub fn finish(&self) {
        self.tx.send_replace(LoadProgress {
            loading: false,
            fraction: 1.0,
        });
    }
}

impl Default for LoadTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Slot holding the model once it has been loaded.
pub struct ModelSlot {
    tx: watch::Sender<Option<Arc<dyn InferModel>>>,
}

impl ModelSlot {
    pub fn empty() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn with_model(model: Arc<dyn InferModel>) -> Self {
        let slot = Self::empty();
        slot.set(model);
        slot
    }

    pub fn set(&self, model: Arc<dyn InferModel>) {
        self.tx.send_replace(Some(model));
    }

    pub fn current(&self) -> Option<Arc<dyn InferModel>> {
        self.tx.borrow().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

impl Default for ModelSlot {
    fn default() -> Self {
        Self::empty()
    }
}

/// Where the model file comes from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ModelSource {
    Path(PathBuf),
    Url(String),
}

impl From<&str> for ModelSource {
    fn from(source: &str) -> Self {
        if source.starts_with("http://") || source.starts_with("https://") {
            ModelSource::Url(source.to_owned())
        } else {
            ModelSource::Path(PathBuf::from(source))
        }
    }
}

pub struct ModelLoader {
    client: Client,
    cache_dir: PathBuf,
}

impl ModelLoader {
    pub fn new(client: Client, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            cache_dir: cache_dir.into(),
        }
    }

    /// Default cache directory for downloaded models.
    pub fn default_cache_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("cone_cam")
    }

    /// Make the model available as a local file.
    pub async fn fetch(
        &self,
        source: &ModelSource,
        progress: &LoadTracker,
    ) -> Result<PathBuf, LoadError> {
        match source {
            ModelSource::Path(path) => {
                progress.update(1.0);
                Ok(path.clone())
            }
            ModelSource::Url(url) => {
                let filepath = self.cache_dir.join(cache_file_name(url));
                if tokio::fs::metadata(&filepath).await.is_ok() {
                    log::info!("Using cached model {}", filepath.display());
                    progress.update(1.0);
                } else {
                    self.download(url, &filepath, progress).await?;
                }
                Ok(filepath)
            }
        }
    }

    /// Download a file from a URL to a given filepath, reporting the received fraction.
    async fn download(
        &self,
        url: &str,
        filepath: &Path,
        progress: &LoadTracker,
    ) -> Result<(), LoadError> {
        log::info!("Downloading model from {url}");
        let resp = self.client.get(url).send().await?.error_for_status()?;
        let total = resp.content_length();

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let partial = filepath.with_extension("part");
        let mut file = tokio::fs::File::create(&partial).await?;

        let mut received: u64 = 0;
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            if let Some(total) = total.filter(|total| *total > 0) {
                progress.update(received as f32 / total as f32);
            }
        }
        file.flush().await?;
        tokio::fs::rename(&partial, filepath).await?;
        progress.update(1.0);

        Ok(())
    }

    /// Fetch, load and warm up the model, then place it into the slot.
    pub async fn load(
        &self,
        source: &ModelSource,
        params: YoloParams,
        slot: &ModelSlot,
        progress: &LoadTracker,
    ) -> Result<(), LoadError> {
        let path = self.fetch(source, progress).await?;

        let model = tokio::task::spawn_blocking(move || {
            let model = YoloModel::load(&path, params)?;
            model.warm_up()?;
            Ok::<_, InferenceError>(model)
        })
        .await??;

        slot.set(Arc::new(model));
        progress.finish();

        Ok(())
    }
}

fn cache_file_name(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("model.onnx")
        .to_owned()
}

/// Load the model in the background.
pub fn spawn_model_loader(
    loader: ModelLoader,
    source: ModelSource,
    params: YoloParams,
    slot: Arc<ModelSlot>,
    progress: Arc<LoadTracker>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match loader.load(&source, params, &slot, &progress).await {
            Ok(()) => log::info!("Model {:?} loaded", &source),
            Err(e) => log::error!("Loading model {:?} failed: {e}", &source),
        }
    })
}
