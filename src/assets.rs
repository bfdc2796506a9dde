//! Asset readiness barrier.
//!
//! Every `img` source of a mounted surface is loaded through an
//! [`AssetLoader`]. Each load is bounded by its own timeout and all loads are
//! joined before capture. A broken or slow asset only ever degrades to a
//! missing image; the barrier itself never fails.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STD, Engine as _};
use futures::future::join_all;
use image::RgbaImage;

use crate::error::{CardError, Result};

/// Default per-asset bound.
pub const DEFAULT_ASSET_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves an image reference to its encoded bytes.
#[async_trait]
pub trait AssetLoader: Send + Sync {
    async fn load(&self, src: &str) -> Result<Vec<u8>>;
}

/// Loads `data:` URIs in process and everything else from a local asset
/// directory. Network references are refused.
#[derive(Debug, Clone)]
pub struct FsAssetLoader {
    root: PathBuf,
}

impl FsAssetLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, src: &str) -> PathBuf {
        let path = Path::new(src.strip_prefix("file://").unwrap_or(src));
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

#[async_trait]
impl AssetLoader for FsAssetLoader {
    async fn load(&self, src: &str) -> Result<Vec<u8>> {
        if src.starts_with("data:") {
            return parse_data_uri(src).map(|(_, bytes)| bytes);
        }
        if src.starts_with("http://") || src.starts_with("https://") {
            return Err(CardError::Asset(format!(
                "remote asset {src:?} not fetched: rendering makes no network calls"
            )));
        }
        let path = self.resolve(src);
        tokio::fs::read(&path)
            .await
            .map_err(|e| CardError::Asset(format!("{}: {e}", path.display())))
    }
}

/// How one asset settled at the barrier.
#[derive(Debug, Clone)]
pub enum AssetOutcome {
    Ready(Arc<RgbaImage>),
    Failed(String),
    TimedOut,
}

impl AssetOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, AssetOutcome::Ready(_))
    }
}

/// Settled outcomes for every asset of one surface, keyed by `src`.
#[derive(Debug, Clone, Default)]
pub struct AssetSet {
    outcomes: HashMap<String, AssetOutcome>,
}

impl AssetSet {
    pub fn outcome(&self, src: &str) -> Option<&AssetOutcome> {
        self.outcomes.get(src)
    }

    /// The decoded image for `src`, if it loaded.
    pub fn image(&self, src: &str) -> Option<&RgbaImage> {
        match self.outcomes.get(src) {
            Some(AssetOutcome::Ready(img)) => Some(img.as_ref()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn ready_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_ready()).count()
    }
}

/// Wait until every source has loaded, failed, or timed out.
///
/// Duplicate sources are loaded once. Loads run concurrently; each is
/// bounded by `timeout` independently.
pub async fn wait_for_assets(
    loader: &dyn AssetLoader,
    sources: &[String],
    timeout: Duration,
) -> AssetSet {
    let mut seen = HashSet::new();
    let unique: Vec<&String> = sources.iter().filter(|s| seen.insert(s.as_str())).collect();

    let waits = unique.into_iter().map(|src| async move {
        let outcome = match tokio::time::timeout(timeout, loader.load(src)).await {
            Ok(Ok(bytes)) => match decode_image(&bytes) {
                Ok(img) => AssetOutcome::Ready(Arc::new(img)),
                Err(e) => {
                    log::warn!("Asset {} could not be decoded: {e}", preview(src));
                    AssetOutcome::Failed(e.to_string())
                }
            },
            Ok(Err(e)) => {
                log::warn!("Asset {} failed to load: {e}", preview(src));
                AssetOutcome::Failed(e.to_string())
            }
            Err(_) => {
                log::warn!("Asset {} not ready after {timeout:?}; continuing without it", preview(src));
                AssetOutcome::TimedOut
            }
        };
        (src.clone(), outcome)
    });

    let outcomes: HashMap<String, AssetOutcome> = join_all(waits).await.into_iter().collect();
    log::debug!(
        "Asset barrier settled: {}/{} ready",
        outcomes.values().filter(|o| o.is_ready()).count(),
        outcomes.len()
    );
    AssetSet { outcomes }
}

/// Decode PNG or JPEG bytes into RGBA pixels.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| CardError::Asset(format!("decode error: {e}")))
}

/// Parse a `data:<mime>;base64,<data>` URI into its MIME type and bytes.
pub fn parse_data_uri(src: &str) -> Result<(String, Vec<u8>)> {
    let rest = src.strip_prefix("data:").ok_or_else(|| {
        CardError::Asset(format!("not a data URI: {}", preview(src)))
    })?;
    let (header, data) = rest.split_once(',').ok_or_else(|| {
        CardError::Asset("invalid data URI: missing `,` separator between header and data".into())
    })?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| CardError::Asset("only base64-encoded data URIs are supported".into()))?;
    let bytes = BASE64_STD
        .decode(data.trim())
        .map_err(|e| CardError::Asset(format!("base64 decode error: {e}")))?;
    Ok((mime.to_string(), bytes))
}

/// Keep log lines short when the source is a data URI.
fn preview(src: &str) -> &str {
    match src.char_indices().nth(60) {
        Some((idx, _)) => &src[..idx],
        None => src,
    }
}
