//! Print templates for the two physical sides of a card.
//!
//! [`render_page`] is pure: the same record, side and context always yield
//! the same markup. All positions are absolute, in millimetres, over the
//! 150 mm × 212 mm page.

use base64::{engine::general_purpose::STANDARD as BASE64_STD, Engine as _};
use chrono::NaiveDate;

use crate::dates::{format_years, tenure_years, LongDate};
use crate::dom::escape_text;
use crate::record::CardRecord;

/// Default front artwork, relative to the assets directory.
pub const DEFAULT_FRONT_BACKGROUND: &str = "images/Frente.pdf.png";
/// Default back artwork, relative to the assets directory.
pub const DEFAULT_BACK_BACKGROUND: &str = "images/tarjeton-reverso1.jpg";
pub const DEFAULT_PLACE: &str = "Pachuca de Soto, Hidalgo";
pub const DEFAULT_SIGNATORY_NAME: &str = "Dr. José Antonio Pérez Sánchez";
pub const DEFAULT_SIGNATORY_TITLE: &str = "Encargado de la Dirección General del STCH";

const LEGAL_NOTICE: &str = "El Titular del presente documento, es sujeto obligado a lo establecido \
en los numerales 9 fracción I, V, XVII, XXVI, 10, 17, 19, 112 al 122, 151, 152 y 154 de la Ley de \
Movilidad y Transporte para el Estado de Hidalgo; 109 al 125 del Reglamento de Ley de Movilidad y \
Transporte para el Estado de Hidalgo.";

/// Which physical side of the card to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageSide {
    Front,
    Back,
}

impl PageSide {
    /// Both sides in output order.
    pub const ALL: [PageSide; 2] = [PageSide::Front, PageSide::Back];

    pub fn label(self) -> &'static str {
        match self {
            PageSide::Front => "front",
            PageSide::Back => "back",
        }
    }
}

/// Per-invocation values the templates need besides the record.
#[derive(Debug, Clone)]
pub struct PageContext {
    /// Date printed on the "place and date" line of the back side.
    pub generated_on: NaiveDate,
    pub front_background: String,
    pub back_background: String,
    pub place: String,
    pub signatory_name: String,
    pub signatory_title: String,
}

impl PageContext {
    pub fn new(generated_on: NaiveDate) -> Self {
        Self {
            generated_on,
            front_background: DEFAULT_FRONT_BACKGROUND.to_string(),
            back_background: DEFAULT_BACK_BACKGROUND.to_string(),
            place: DEFAULT_PLACE.to_string(),
            signatory_name: DEFAULT_SIGNATORY_NAME.to_string(),
            signatory_title: DEFAULT_SIGNATORY_TITLE.to_string(),
        }
    }
}

/// Encode a photograph as a self-contained `data:` URI, with the MIME type
/// sniffed from the bytes.
///
/// Only PNG and JPEG payloads that actually decode are embedded; anything
/// else yields `None` so the page falls back to the placeholder.
pub fn photo_data_uri(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    let (format, mime) = match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png) => (image::ImageFormat::Png, "image/png"),
        Ok(image::ImageFormat::Jpeg) => (image::ImageFormat::Jpeg, "image/jpeg"),
        Ok(other) => {
            log::warn!("Ignoring photograph: unsupported format {other:?}");
            return None;
        }
        Err(_) => {
            log::warn!("Ignoring photograph: {} bytes of unknown format", bytes.len());
            return None;
        }
    };
    if let Err(e) = image::load_from_memory_with_format(bytes, format) {
        log::warn!("Ignoring photograph: {e}");
        return None;
    }
    Some(format!("data:{mime};base64,{}", BASE64_STD.encode(bytes)))
}

/// Build the markup for one side of the card.
pub fn render_page(record: &CardRecord, side: PageSide, ctx: &PageContext) -> String {
    let photo = record.photograph_bytes().and_then(photo_data_uri);
    match side {
        PageSide::Front => render_front(record, photo.as_deref(), ctx),
        PageSide::Back => render_back(record, photo.as_deref(), ctx),
    }
}

fn page_open(background: &str) -> String {
    format!(
        r#"<div style="position: relative; width: 150mm; height: 212mm; background: white; font-family: Montserrat, sans-serif; overflow: hidden">
  <img data-role="background" src="{}" style="position: absolute; top: 0; left: 0; width: 100%; height: 100%; object-fit: cover; z-index: 1">
"#,
        escape_text(background)
    )
}

fn photo_box(photo: Option<&str>, placeholder: &str) -> String {
    let inner = match photo {
        Some(uri) => format!(
            r#"<img data-role="photo" src="{uri}" style="width: 100%; height: 100%; object-fit: cover">"#
        ),
        None => placeholder.to_string(),
    };
    format!(
        r#"  <div style="position: absolute; top: 35mm; left: 34mm; width: 70mm; height: 85mm; z-index: 2; background: white; overflow: hidden">
    {inner}
  </div>
"#
    )
}

fn name_box(record: &CardRecord, top_mm: u32, background: &str) -> String {
    format!(
        r#"  <div style="position: absolute; top: {top_mm}mm; left: 39mm; width: 66mm; z-index: 3; {background}padding: 3mm; text-align: center">
    <div data-role="operator-name" style="font-size: 14px; font-weight: bold; color: #000; line-height: 1.3; text-transform: uppercase">{}</div>
  </div>
"#,
        escape_text(&record.operator_name)
    )
}

fn expiry_box(record: &CardRecord) -> String {
    format!(
        r#"  <div style="position: absolute; top: 203mm; left: 38mm; z-index: 3; padding: 2mm 4mm">
    <div data-role="expiry" style="font-size: 13px; font-weight: bold; color: #8B4513">{}</div>
  </div>
"#,
        escape_text(&record.expiry_date)
    )
}

fn render_front(record: &CardRecord, photo: Option<&str>, ctx: &PageContext) -> String {
    let placeholder = r#"<div data-role="photo-placeholder" style="width: 100%; height: 100%; display: flex; align-items: center; justify-content: center; background: #f3f4f6; color: #6b7280; font-size: 14px; font-weight: bold">SIN FOTOGRAFÍA</div>"#;

    let mut html = page_open(&ctx.front_background);
    html.push_str(&photo_box(photo, placeholder));
    html.push_str(&name_box(record, 125, "background: rgba(255, 255, 255, 0.95); "));
    html.push_str(&format!(
        r#"  <div style="position: absolute; top: 175mm; left: 18mm; width: 114mm; z-index: 3; background: rgba(255, 255, 255, 0.95); padding: 3mm; text-align: center">
    <div style="font-size: 12px; font-weight: bold; color: #000; margin-bottom: 2mm">{}</div>
    <div style="font-size: 10px; color: #000; line-height: 1.3; margin-bottom: 1mm">{}</div>
  </div>
"#,
        escape_text(&ctx.signatory_name),
        escape_text(&ctx.signatory_title)
    ));
    html.push_str(&expiry_box(record));
    html.push_str("</div>\n");
    html
}

/// One "Label: value" line on the back side.
fn field_row(top_mm: u32, label: &str, value: &str) -> String {
    format!(
        r#"    <div style="position: absolute; top: {top_mm}mm; left: 22mm; padding: 2mm 3mm">
      <span style="font-size: 11px; color: #374151; font-weight: 500">{}</span><span style="font-size: 11px; font-weight: bold; color: #000">{}</span>
    </div>
"#,
        escape_text(label),
        escape_text(value)
    )
}

fn render_back(record: &CardRecord, photo: Option<&str>, ctx: &PageContext) -> String {
    let placeholder = r#"<div data-role="photo-placeholder" style="width: 100%; height: 100%; display: flex; align-items: center; justify-content: center; color: #6b7280; font-size: 12px">Sin foto</div>"#;
    let tenure = format_years(tenure_years(&record.issue_date, &record.expiry_date));
    let date = LongDate::generation(ctx.generated_on);

    let mut html = page_open(&ctx.back_background);
    html.push_str(&photo_box(photo, placeholder));
    html.push_str(&name_box(record, 118, ""));

    html.push_str(
        r#"  <div style="position: absolute; top: 0; left: 0; width: 100%; height: 100%; z-index: 3">
"#,
    );
    html.push_str(&field_row(125, "Folio de Operador: ", &record.operator_folio));
    html.push_str(&field_row(132, "Municipio: ", &record.municipality));
    html.push_str(&field_row(139, "Tipo de Trámite: ", &record.procedure_type));
    html.push_str(&field_row(146, "Modalidad: ", record.modality_label()));
    html.push_str(&field_row(153, "Tipo de Tarjetón: ", &record.card_type));
    html.push_str(&field_row(160, "Antigüedad: ", &tenure));

    let plain = r#"style="font-size: 11px; color: #374151""#;
    let strong = r#"style="font-size: 11px; font-weight: bold; color: #000""#;
    html.push_str(&format!(
        r#"    <div data-role="generation-date" style="position: absolute; top: 167mm; left: 22mm; width: 106mm; padding: 2mm 3mm">
      <span {plain}>{place} a </span><span {strong}>{day}</span><span {plain}> de </span><span {strong}>{month}</span><span {plain}> del </span><span {strong}>{year}</span>
    </div>
"#,
        place = escape_text(&ctx.place),
        day = date.day,
        month = date.month,
        year = date.year,
    ));

    html.push_str(&format!(
        r#"    <div style="position: absolute; top: 175mm; left: 22mm; width: 106mm; padding: 3mm">
      <p data-role="legal-notice" style="font-size: 10px; color: #374151; line-height: 1.3; text-align: justify; margin: 0">{LEGAL_NOTICE}</p>
    </div>
"#
    ));
    html.push_str(&expiry_box(record));
    html.push_str("  </div>\n</div>\n");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{find_by_role, image_elements, parse_markup, text_content};
    use crate::record::Photograph;

    fn ctx() -> PageContext {
        PageContext::new(NaiveDate::from_ymd_opt(2026, 3, 9).unwrap())
    }

    fn sample() -> CardRecord {
        CardRecord {
            folio: "12345".into(),
            operator_folio: "OP-778".into(),
            operator_name: "María López".into(),
            issue_date: "01/06/2020".into(),
            expiry_date: "15/05/2024".into(),
            procedure_type: "Renovación".into(),
            municipality: "Pachuca".into(),
            modality: "INDIVIDUAL".into(),
            card_type: "A".into(),
            ..Default::default()
        }
    }

    #[test]
    fn front_without_photo_uses_placeholder() {
        let dom = parse_markup(&render_page(&sample(), PageSide::Front, &ctx()));
        let placeholder = find_by_role(&dom, "photo-placeholder").unwrap();
        assert_eq!(text_content(&placeholder.children), "SIN FOTOGRAFÍA");
        let images = image_elements(&dom);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].role(), Some("background"));
    }

    #[test]
    fn back_lists_attributes_and_tenure() {
        let markup = render_page(&sample(), PageSide::Back, &ctx());
        let dom = parse_markup(&markup);
        let text = text_content(&dom);
        assert!(text.contains("Folio de Operador: OP-778"));
        assert!(text.contains("Modalidad: Individual"));
        assert!(text.contains("Antigüedad: 3 años"));
        assert!(text.contains("Pachuca de Soto, Hidalgo a 09 de Marzo del 2026"));
        assert!(find_by_role(&dom, "legal-notice").is_some());
        assert_eq!(
            text_content(&find_by_role(&dom, "photo-placeholder").unwrap().children),
            "Sin foto"
        );
    }

    #[test]
    fn names_are_escaped() {
        let mut record = sample();
        record.operator_name = "<b>Juan</b> & Hijos".into();
        let markup = render_page(&record, PageSide::Front, &ctx());
        assert!(!markup.contains("<b>"));
        let dom = parse_markup(&markup);
        let name = find_by_role(&dom, "operator-name").unwrap();
        assert_eq!(text_content(&name.children), "<b>Juan</b> & Hijos");
    }

    fn png_photo() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(2, 3, image::Rgb([9, 8, 7]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn photo_is_embedded_inline() {
        let mut record = sample();
        record.photograph = Some(Photograph::new(png_photo()));
        let dom = parse_markup(&render_page(&record, PageSide::Back, &ctx()));
        let photo = find_by_role(&dom, "photo").unwrap();
        let src = photo.src().unwrap();
        assert!(src.starts_with("data:image/png;base64,"));
        assert!(find_by_role(&dom, "photo-placeholder").is_none());
    }

    #[test]
    fn undecodable_photo_falls_back_to_placeholder() {
        let truncated_png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        for bytes in [vec![1, 2, 3, 4], truncated_png.to_vec()] {
            let mut record = sample();
            record.photograph = Some(Photograph::new(bytes));
            for side in PageSide::ALL {
                let dom = parse_markup(&render_page(&record, side, &ctx()));
                assert!(find_by_role(&dom, "photo-placeholder").is_some());
                assert!(find_by_role(&dom, "photo").is_none());
            }
        }
    }

    #[test]
    fn photo_uri_requires_an_image() {
        assert!(photo_data_uri(&[1, 2, 3]).is_none());
        assert!(photo_data_uri(&[]).is_none());
        assert!(photo_data_uri(&png_photo()).is_some());
    }

    #[test]
    fn rendering_is_deterministic() {
        let a = render_page(&sample(), PageSide::Back, &ctx());
        let b = render_page(&sample(), PageSide::Back, &ctx());
        assert_eq!(a, b);
    }
}
