//! Artifact emission – hands the finished document to its destination.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{CardError, Result};

/// A named, fully serialised output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Deterministic artifact name for a folio: `tarjeton-<folio>.pdf`.
///
/// The folio is sanitised so it can never escape the output directory.
pub fn artifact_file_name(folio: &str) -> String {
    let folio = sanitize_filename::sanitize(folio.trim());
    let folio = if folio.is_empty() { "sin-folio".to_string() } else { folio };
    format!("tarjeton-{folio}.pdf")
}

/// Receives finished artifacts.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Deliver an artifact. Returns where it ended up, when meaningful.
    async fn deliver(&self, artifact: Artifact) -> Result<Option<PathBuf>>;
}

/// Writes artifacts into a directory, the local stand-in for a download.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    async fn deliver(&self, artifact: Artifact) -> Result<Option<PathBuf>> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CardError::Emit(format!("{}: {e}", self.dir.display())))?;
        let path = self.dir.join(&artifact.file_name);
        tokio::fs::write(&path, &artifact.bytes)
            .await
            .map_err(|e| CardError::Emit(format!("{}: {e}", path.display())))?;
        log::info!("Wrote {} ({} bytes)", path.display(), artifact.bytes.len());
        Ok(Some(path))
    }
}

/// Keeps artifacts in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    artifacts: Mutex<Vec<Artifact>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn artifacts(&self) -> Vec<Artifact> {
        self.artifacts.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.artifacts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.lock().is_empty()
    }
}

#[async_trait]
impl ArtifactSink for MemorySink {
    async fn deliver(&self, artifact: Artifact) -> Result<Option<PathBuf>> {
        self.artifacts.lock().push(artifact);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_from_folio() {
        assert_eq!(artifact_file_name("12345"), "tarjeton-12345.pdf");
        assert_eq!(artifact_file_name(" 77 "), "tarjeton-77.pdf");
        assert!(!artifact_file_name("../../etc/passwd").contains('/'));
        assert_eq!(artifact_file_name(""), "tarjeton-sin-folio.pdf");
    }

    #[tokio::test]
    async fn directory_sink_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path().join("salida"));
        let path = sink
            .deliver(Artifact {
                file_name: "tarjeton-1.pdf".into(),
                bytes: b"%PDF-1.7".to_vec(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"%PDF-1.7");
    }

    #[tokio::test]
    async fn memory_sink_collects() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        sink.deliver(Artifact {
            file_name: "a.pdf".into(),
            bytes: vec![1],
        })
        .await
        .unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.artifacts()[0].file_name, "a.pdf");
    }
}
