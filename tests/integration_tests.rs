//! Integration tests for the card pipeline.
//!
//! These tests validate:
//! - A full run emits one two-page PDF named after the folio
//! - Capture failures emit nothing and leave no surface attached
//! - Slow assets do not block a run past the readiness bound
//! - Template content reaches the staged surface

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use tarjeton_forge::assets::{parse_data_uri, AssetLoader, AssetSet};
use tarjeton_forge::dom::{find_by_role, image_elements, parse_markup, text_content};
use tarjeton_forge::emit::MemorySink;
use tarjeton_forge::fonts::FontManager;
use tarjeton_forge::raster::{CaptureOptions, RasterPage, Rasterizer};
use tarjeton_forge::record::{records_from_json, Photograph};
use tarjeton_forge::staging::{StagedSurface, SurfaceState};
use tarjeton_forge::{
    render_page, CardError, CardPipeline, CardRecord, GenerationRequest, PageContext, PageSide,
    PipelineConfig, Result,
};

// =====================================================================
// Helpers
// =====================================================================

fn png_bytes(w: u32, h: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(w, h, image::Rgb(rgb));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

fn sample_record() -> CardRecord {
    CardRecord {
        id: 12345,
        folio: "12345".into(),
        operator_folio: "OP-778".into(),
        issue_date: "2021-03-01".into(),
        expiry_date: "2024-03-01".into(),
        procedure_type: "REFRENDO".into(),
        operator_name: "María López".into(),
        municipality: "Pachuca".into(),
        modality: "INDIVIDUAL".into(),
        card_type: "ORDINARIO".into(),
        status: "Vigente".into(),
        ..CardRecord::default()
    }
}

fn generation_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 9).unwrap()
}

/// Config pointing at a temp asset directory with both backgrounds,
/// captured at 1× to keep the tests quick.
fn config_with_assets(dir: &Path) -> PipelineConfig {
    std::fs::write(dir.join("front.png"), png_bytes(60, 80, [200, 30, 30])).unwrap();
    std::fs::write(dir.join("back.png"), png_bytes(60, 80, [30, 30, 200])).unwrap();
    PipelineConfig {
        assets_dir: dir.to_path_buf(),
        front_background: "front.png".into(),
        back_background: "back.png".into(),
        capture: CaptureOptions {
            scale: 1.0,
            ..CaptureOptions::default()
        },
        ..PipelineConfig::default()
    }
}

fn pipeline(config: PipelineConfig) -> CardPipeline {
    CardPipeline::with_fonts(config, Arc::new(FontManager::default()))
}

fn assert_valid_pdf(bytes: &[u8]) {
    assert!(bytes.len() > 100, "PDF too small: {} bytes", bytes.len());
    assert_eq!(&bytes[0..5], b"%PDF-", "Missing PDF header");
}

// =====================================================================
// End-to-end runs
// =====================================================================

#[tokio::test]
async fn full_run_emits_two_page_pdf() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(config_with_assets(dir.path())).with_sink(sink.clone());

    let card = pipeline
        .generate(&GenerationRequest::new(sample_record(), generation_date()))
        .await
        .unwrap();

    assert_eq!(card.file_name, "tarjeton-12345.pdf");
    assert!(card.location.is_none());
    assert_eq!(card.document.page_count(), 2);
    for page in card.document.pages() {
        assert_eq!(page.width_mm, 150.0);
        assert_eq!(page.height_mm, 212.0);
    }
    assert_valid_pdf(card.document.bytes());

    let artifacts = sink.artifacts();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].file_name, "tarjeton-12345.pdf");
    assert_eq!(artifacts[0].bytes, card.document.bytes());
}

#[tokio::test]
async fn directory_sink_writes_named_file() {
    let assets = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        output_dir: out.path().join("tarjetones"),
        ..config_with_assets(assets.path())
    };

    let card = pipeline(config)
        .generate(&GenerationRequest::new(sample_record(), generation_date()))
        .await
        .unwrap();

    let path = card.location.unwrap();
    assert_eq!(path, out.path().join("tarjetones").join("tarjeton-12345.pdf"));
    assert_valid_pdf(&std::fs::read(path).unwrap());
}

#[tokio::test]
async fn missing_backgrounds_still_produce_a_card() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemorySink::new());
    let config = PipelineConfig {
        assets_dir: dir.path().to_path_buf(),
        capture: CaptureOptions {
            scale: 1.0,
            ..CaptureOptions::default()
        },
        ..PipelineConfig::default()
    };

    let card = pipeline(config)
        .with_sink(sink.clone())
        .generate(&GenerationRequest::new(sample_record(), generation_date()))
        .await
        .unwrap();

    assert_eq!(card.document.page_count(), 2);
    assert_eq!(sink.len(), 1);
}

#[tokio::test]
async fn staging_area_is_left_idle() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(config_with_assets(dir.path())).with_sink(Arc::new(MemorySink::new()));
    let mut staging = pipeline.staging_area();

    pipeline
        .generate_with(&mut staging, &GenerationRequest::new(sample_record(), generation_date()))
        .await
        .unwrap();

    assert!(staging.is_idle());
    assert_eq!(staging.ledger().len(), 2);
    assert!(staging
        .ledger()
        .iter()
        .all(|(_, state)| *state == SurfaceState::Disposed));
}

// =====================================================================
// Failure paths
// =====================================================================

struct FailingRasterizer;

#[async_trait]
impl Rasterizer for FailingRasterizer {
    async fn capture(&self, _surface: &StagedSurface, _assets: &AssetSet) -> Result<RasterPage> {
        Err(CardError::Capture("canvas unavailable".into()))
    }
}

#[tokio::test]
async fn capture_failure_emits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(config_with_assets(dir.path()))
        .with_rasterizer(Arc::new(FailingRasterizer))
        .with_sink(sink.clone());
    let mut staging = pipeline.staging_area();

    let err = pipeline
        .generate_with(&mut staging, &GenerationRequest::new(sample_record(), generation_date()))
        .await
        .unwrap_err();

    assert!(matches!(err, CardError::Capture(_)));
    assert!(sink.is_empty());
    assert!(staging.is_idle());
    assert!(!staging.ledger().is_empty());
    assert!(staging
        .ledger()
        .iter()
        .all(|(_, state)| *state == SurfaceState::Disposed));
}

struct NeverLoader;

#[async_trait]
impl AssetLoader for NeverLoader {
    async fn load(&self, _src: &str) -> Result<Vec<u8>> {
        futures::future::pending::<Result<Vec<u8>>>().await
    }
}

#[tokio::test(start_paused = true)]
async fn stalled_assets_time_out_and_run_continues() {
    let sink = Arc::new(MemorySink::new());
    let config = PipelineConfig {
        asset_timeout_ms: 50,
        capture: CaptureOptions {
            scale: 1.0,
            ..CaptureOptions::default()
        },
        ..PipelineConfig::default()
    };
    let pipeline = pipeline(config)
        .with_loader(Arc::new(NeverLoader))
        .with_sink(sink.clone());

    let card = pipeline
        .generate(&GenerationRequest::new(sample_record(), generation_date()))
        .await
        .unwrap();

    assert_eq!(card.document.page_count(), 2);
    assert_eq!(sink.len(), 1);
}

// =====================================================================
// Template content
// =====================================================================

#[test]
fn no_photo_renders_placeholder_on_both_sides() {
    let ctx = PageContext::new(generation_date());
    let record = sample_record();

    for side in PageSide::ALL {
        let dom = parse_markup(&render_page(&record, side, &ctx));
        assert!(find_by_role(&dom, "photo-placeholder").is_some());
        assert!(find_by_role(&dom, "photo").is_none());
        let photos = image_elements(&dom)
            .into_iter()
            .filter(|img| img.role() == Some("photo"))
            .count();
        assert_eq!(photos, 0);
    }
}

#[test]
fn photo_data_uri_round_trips_bytes() {
    let photo = png_bytes(4, 4, [1, 2, 3]);
    let record = CardRecord {
        photograph: Some(Photograph::new(photo.clone())),
        ..sample_record()
    };
    let ctx = PageContext::new(generation_date());

    for side in PageSide::ALL {
        let dom = parse_markup(&render_page(&record, side, &ctx));
        let img = find_by_role(&dom, "photo").expect("photo element");
        let (mime, bytes) = parse_data_uri(img.src().unwrap()).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, photo);
    }
}

#[test]
fn back_side_maps_modality() {
    let ctx = PageContext::new(generation_date());
    let individual = render_page(&sample_record(), PageSide::Back, &ctx);
    assert!(individual.contains("Individual"));

    let collective = CardRecord {
        modality: "COLECTIVO".into(),
        ..sample_record()
    };
    let dom = parse_markup(&render_page(&collective, PageSide::Back, &ctx));
    assert!(text_content(&dom).contains("Transporte Colectivo"));
}

#[test]
fn catalog_json_feeds_the_template() {
    let json = r#"[{
        "idTarjeton": 98765,
        "folioOperador": "OP-1",
        "emision": "2020-01-15",
        "vence": "2025-01-15",
        "nombreOperador": "Pedro Ruiz",
        "modalidad": "INDIVIDUAL",
        "estatus": "Vigente"
    }]"#;
    let records = records_from_json(json).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].folio, "98765");

    let ctx = PageContext::new(generation_date());
    let dom = parse_markup(&render_page(&records[0], PageSide::Back, &ctx));
    let name = find_by_role(&dom, "operator-name").unwrap();
    assert_eq!(text_content(&name.children), "Pedro Ruiz");
    assert!(text_content(&dom).contains("Antigüedad: 5 años"));
}

#[test]
fn malformed_photograph_keeps_the_batch_and_shows_placeholder() {
    let json = r#"[
        {"idTarjeton": 1, "nombreOperador": "Uno", "fotografia": {"type": "Buffer"}},
        {"idTarjeton": 2, "nombreOperador": "Dos", "fotografia": {"type": "Buffer", "data": [1, 2, 3, 4]}}
    ]"#;
    let records = records_from_json(json).unwrap();
    assert_eq!(records.len(), 2);

    let ctx = PageContext::new(generation_date());
    for record in &records {
        for side in PageSide::ALL {
            let dom = parse_markup(&render_page(record, side, &ctx));
            assert!(find_by_role(&dom, "photo-placeholder").is_some());
            assert!(find_by_role(&dom, "photo").is_none());
        }
    }
}
