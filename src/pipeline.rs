//! Pipeline – renders both sides of a card, stages, waits for assets,
//! captures, composes and emits, as one sequential invocation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::assets::{wait_for_assets, AssetLoader, FsAssetLoader};
use crate::compose::{compose, OutputDocument};
use crate::emit::{artifact_file_name, Artifact, ArtifactSink, DirectorySink};
use crate::error::{CardError, Result};
use crate::fonts::FontManager;
use crate::raster::{CaptureOptions, Rasterizer, SkiaRasterizer};
use crate::record::CardRecord;
use crate::staging::{StagingArea, SURFACE_HEIGHT_PX, SURFACE_WIDTH_PX};
use crate::templates::{
    render_page, PageContext, PageSide, DEFAULT_BACK_BACKGROUND, DEFAULT_FRONT_BACKGROUND,
    DEFAULT_PLACE, DEFAULT_SIGNATORY_NAME, DEFAULT_SIGNATORY_TITLE,
};

/// Configuration for the card pipeline.
///
/// Every field has a default, so a JSON config file only needs the keys it
/// changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root for relative asset references (default: `assets`).
    pub assets_dir: PathBuf,
    /// Front artwork reference (default: `images/Frente.pdf.png`).
    pub front_background: String,
    /// Back artwork reference (default: `images/tarjeton-reverso1.jpg`).
    pub back_background: String,
    /// Per-asset readiness bound in milliseconds (default: 5000).
    pub asset_timeout_ms: u64,
    pub capture: CaptureOptions,
    /// Regular face; system fonts are searched when absent.
    pub font_path: Option<PathBuf>,
    pub bold_font_path: Option<PathBuf>,
    /// Where [`DirectorySink`] writes artifacts (default: current directory).
    pub output_dir: PathBuf,
    pub place: String,
    pub signatory_name: String,
    pub signatory_title: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            assets_dir: PathBuf::from("assets"),
            front_background: DEFAULT_FRONT_BACKGROUND.to_string(),
            back_background: DEFAULT_BACK_BACKGROUND.to_string(),
            asset_timeout_ms: 5_000,
            capture: CaptureOptions::default(),
            font_path: None,
            bold_font_path: None,
            output_dir: PathBuf::from("."),
            place: DEFAULT_PLACE.to_string(),
            signatory_name: DEFAULT_SIGNATORY_NAME.to_string(),
            signatory_title: DEFAULT_SIGNATORY_TITLE.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load a (possibly partial) JSON config file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CardError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.capture.scale > 0.0) {
            return Err(CardError::Config(format!(
                "capture scale must be positive, got {}",
                self.capture.scale
            )));
        }
        if (self.capture.width_px, self.capture.height_px) != (SURFACE_WIDTH_PX, SURFACE_HEIGHT_PX) {
            return Err(CardError::Config(format!(
                "capture size is fixed at {SURFACE_WIDTH_PX}x{SURFACE_HEIGHT_PX} px, got {}x{}",
                self.capture.width_px, self.capture.height_px
            )));
        }
        Ok(())
    }

    pub fn asset_timeout(&self) -> Duration {
        Duration::from_millis(self.asset_timeout_ms)
    }

    /// Template context for one invocation.
    pub fn page_context(&self, generated_on: NaiveDate) -> PageContext {
        PageContext {
            generated_on,
            front_background: self.front_background.clone(),
            back_background: self.back_background.clone(),
            place: self.place.clone(),
            signatory_name: self.signatory_name.clone(),
            signatory_title: self.signatory_title.clone(),
        }
    }
}

/// Everything one invocation needs.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub record: CardRecord,
    /// Date printed on the back side.
    pub generated_on: NaiveDate,
}

impl GenerationRequest {
    pub fn new(record: CardRecord, generated_on: NaiveDate) -> Self {
        Self {
            record,
            generated_on,
        }
    }

    /// A request dated with the local calendar date.
    pub fn today(record: CardRecord) -> Self {
        Self::new(record, chrono::Local::now().date_naive())
    }
}

/// Result of a successful invocation.
#[derive(Debug, Clone)]
pub struct GeneratedCard {
    pub file_name: String,
    pub document: OutputDocument,
    /// Where the sink put the artifact, if it has a location.
    pub location: Option<PathBuf>,
}

/// The card pipeline with its collaborators.
pub struct CardPipeline {
    config: PipelineConfig,
    fonts: Arc<FontManager>,
    loader: Arc<dyn AssetLoader>,
    rasterizer: Arc<dyn Rasterizer>,
    sink: Arc<dyn ArtifactSink>,
}

impl CardPipeline {
    /// Pipeline with filesystem assets, the tiny-skia rasterizer and a
    /// directory sink, all taken from `config`.
    pub fn new(config: PipelineConfig) -> Self {
        let fonts = Arc::new(FontManager::with_fonts(
            config.font_path.as_deref(),
            config.bold_font_path.as_deref(),
        ));
        Self::with_fonts(config, fonts)
    }

    pub fn with_fonts(config: PipelineConfig, fonts: Arc<FontManager>) -> Self {
        Self {
            loader: Arc::new(FsAssetLoader::new(config.assets_dir.clone())),
            rasterizer: Arc::new(SkiaRasterizer::new(fonts.clone(), config.capture.clone())),
            sink: Arc::new(DirectorySink::new(config.output_dir.clone())),
            fonts,
            config,
        }
    }

    pub fn with_loader(mut self, loader: Arc<dyn AssetLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn fonts(&self) -> &Arc<FontManager> {
        &self.fonts
    }

    /// A fresh staging area sharing this pipeline's fonts.
    pub fn staging_area(&self) -> StagingArea {
        StagingArea::new(self.fonts.clone())
    }

    /// Run one invocation on a private staging area.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedCard> {
        let mut staging = self.staging_area();
        self.generate_with(&mut staging, request).await
    }

    /// Run one invocation on the caller's staging area.
    ///
    /// The artifact is emitted only after both pages compose; any capture,
    /// layout or compose failure returns early with every surface disposed.
    pub async fn generate_with(
        &self,
        staging: &mut StagingArea,
        request: &GenerationRequest,
    ) -> Result<GeneratedCard> {
        let folio = &request.record.folio;
        let document = self.render_document(staging, request).await?;

        let file_name = artifact_file_name(folio);
        let location = self
            .sink
            .deliver(Artifact {
                file_name: file_name.clone(),
                bytes: document.bytes().to_vec(),
            })
            .await?;

        log::info!("Card {folio} emitted as {file_name}");
        Ok(GeneratedCard {
            file_name,
            document,
            location,
        })
    }

    /// Stage, capture and compose both sides without emitting.
    pub async fn render_document(
        &self,
        staging: &mut StagingArea,
        request: &GenerationRequest,
    ) -> Result<OutputDocument> {
        self.config.validate()?;
        let record = &request.record;
        let ctx = self.config.page_context(request.generated_on);
        let timeout = self.config.asset_timeout();
        let mut pages = Vec::with_capacity(PageSide::ALL.len());

        for side in PageSide::ALL {
            log::debug!("Card {}: staging {} side", record.folio, side.label());
            let markup = render_page(record, side, &ctx);
            let mut surface = staging.mount(markup)?;

            let sources = surface.image_sources();
            let assets = wait_for_assets(self.loader.as_ref(), &sources, timeout).await;
            if assets.ready_count() < assets.len() {
                log::warn!(
                    "Card {}: {} of {} assets unavailable on {} side",
                    record.folio,
                    assets.len() - assets.ready_count(),
                    assets.len(),
                    side.label()
                );
            }

            let page = self.rasterizer.capture(&surface, &assets).await?;
            surface.mark_captured();
            pages.push(page);
            surface.unmount();
        }

        compose(&pages, &format!("tarjeton-{}", record.folio))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"asset_timeout_ms": 250, "capture": {"scale": 2.0}}"#).unwrap();
        assert_eq!(config.asset_timeout(), Duration::from_millis(250));
        assert_eq!(config.capture.scale, 2.0);
        assert_eq!(config.capture.width_px, 567);
        assert_eq!(config.front_background, DEFAULT_FRONT_BACKGROUND);
        assert_eq!(config.place, "Pachuca de Soto, Hidalgo");
    }

    #[test]
    fn config_file_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"capture": {"scale": 0}}"#).unwrap();
        assert!(matches!(
            PipelineConfig::from_json_file(&path),
            Err(CardError::Config(_))
        ));
        assert!(PipelineConfig::from_json_file(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn capture_size_must_match_the_page_canvas() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"capture": {"width_px": 100}}"#).unwrap();
        assert!(matches!(config.validate(), Err(CardError::Config(_))));
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[tokio::test]
    async fn invalid_config_fails_before_staging() {
        let mut config = PipelineConfig::default();
        config.capture.height_px = 50;
        let pipeline = CardPipeline::with_fonts(config, Arc::new(FontManager::default()));
        let mut staging = pipeline.staging_area();
        let request = GenerationRequest::new(
            CardRecord::default(),
            NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
        );

        let err = pipeline.render_document(&mut staging, &request).await.unwrap_err();
        assert!(matches!(err, CardError::Config(_)));
        assert!(staging.ledger().is_empty());
    }

    #[test]
    fn page_context_uses_request_date() {
        let date = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();
        let ctx = PipelineConfig::default().page_context(date);
        assert_eq!(ctx.generated_on, date);
        assert_eq!(ctx.back_background, DEFAULT_BACK_BACKGROUND);
    }
}
