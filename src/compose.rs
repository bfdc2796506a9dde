//! PDF composer – places captured page bitmaps into a multi-page document
//! using `printpdf` (v0.8 ops-based API).

use printpdf::*;

use crate::error::{CardError, Result};
use crate::raster::RasterPage;

/// Points per millimetre.
pub const MM_TO_PT: f32 = 72.0 / 25.4;

/// A card document is always front then back.
pub const CARD_PAGE_COUNT: usize = 2;

/// Physical size of one composed page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_mm: f32,
    pub height_mm: f32,
}

/// A serialised multi-page document.
#[derive(Debug, Clone)]
pub struct OutputDocument {
    pages: Vec<PageSize>,
    bytes: Vec<u8>,
}

impl OutputDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[PageSize] {
        &self.pages
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Compose the front and back captures into one portrait document.
///
/// Each bitmap fills its page exactly; its pixel size only sets the
/// embedded resolution.
pub fn compose(pages: &[RasterPage], title: &str) -> Result<OutputDocument> {
    if pages.len() != CARD_PAGE_COUNT {
        return Err(CardError::Compose(format!(
            "expected {CARD_PAGE_COUNT} pages (front, back), got {}",
            pages.len()
        )));
    }

    let mut doc = PdfDocument::new(title);
    let mut pdf_pages = Vec::with_capacity(pages.len());
    let mut sizes = Vec::with_capacity(pages.len());
    let mut img_warnings: Vec<PdfWarnMsg> = Vec::new();

    for (index, page) in pages.iter().enumerate() {
        if page.width_px() == 0 || page.height_px() == 0 {
            return Err(CardError::Compose(format!("page {} has an empty bitmap", index + 1)));
        }

        let png = page.to_png()?;
        let raw = RawImage::decode_from_bytes(&png, &mut img_warnings)
            .map_err(|e| CardError::Compose(format!("page {}: image embed error: {e}", index + 1)))?;
        let xobj_id = doc.add_image(&raw);

        // At 72 dpi one image pixel is one point; scale to the page size.
        let page_w_pt = page.width_mm * MM_TO_PT;
        let page_h_pt = page.height_mm * MM_TO_PT;
        let ops = vec![Op::UseXobject {
            id: xobj_id,
            transform: XObjectTransform {
                translate_x: Some(Pt(0.0)),
                translate_y: Some(Pt(0.0)),
                dpi: Some(72.0),
                scale_x: Some(page_w_pt / page.width_px() as f32),
                scale_y: Some(page_h_pt / page.height_px() as f32),
                rotate: None,
            },
        }];

        pdf_pages.push(PdfPage::new(Mm(page.width_mm), Mm(page.height_mm), ops));
        sizes.push(PageSize {
            width_mm: page.width_mm,
            height_mm: page.height_mm,
        });
    }

    for warning in &img_warnings {
        log::debug!("Image embed warning: {warning:?}");
    }

    doc.with_pages(pdf_pages);
    let bytes = doc.save(&PdfSaveOptions::default(), &mut Vec::new());
    log::info!("Composed {} page(s), {} bytes", sizes.len(), bytes.len());

    Ok(OutputDocument {
        pages: sizes,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::image::{Rgb, RgbImage};

    fn page(colour: [u8; 3]) -> RasterPage {
        RasterPage {
            image: RgbImage::from_pixel(15, 21, Rgb(colour)),
            width_mm: 150.0,
            height_mm: 212.0,
        }
    }

    #[test]
    fn two_pages_make_a_pdf() {
        let doc = compose(&[page([255, 255, 255]), page([0, 0, 0])], "tarjeton-1").unwrap();
        assert_eq!(doc.page_count(), 2);
        assert!(doc
            .pages()
            .iter()
            .all(|p| p.width_mm == 150.0 && p.height_mm == 212.0));
        assert!(doc.bytes().starts_with(b"%PDF"));
    }

    #[test]
    fn a_lone_front_page_is_rejected() {
        let err = compose(&[page([255, 255, 255])], "tarjeton-1").unwrap_err();
        assert!(matches!(err, CardError::Compose(_)));
    }

    #[test]
    fn empty_bitmap_is_rejected() {
        let empty = RasterPage {
            image: RgbImage::new(0, 0),
            width_mm: 150.0,
            height_mm: 212.0,
        };
        assert!(compose(&[page([1, 2, 3]), empty], "x").is_err());
    }
}
