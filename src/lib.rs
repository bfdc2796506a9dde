//! # tarjeton-forge – print-accurate operator card renderer
//!
//! Turns a card record into a two-page PDF (front, back), each page
//! 150 mm × 212 mm. The pipeline stages are:
//!
//! 1. **Template** – record → page markup with absolute positions ([`templates`])
//! 2. **Stage** – parse ([`dom`]), style ([`style`]) and lay out ([`layout`])
//!    the markup on an off-screen surface ([`staging`])
//! 3. **Wait** – load every image of the surface, each bounded by a timeout ([`assets`])
//! 4. **Capture** – rasterize the surface at 3× into an opaque bitmap ([`raster`])
//! 5. **Compose** – place both bitmaps into a PDF ([`compose`])
//! 6. **Emit** – hand `tarjeton-<folio>.pdf` to a sink ([`emit`])
//!
//! [`pipeline::CardPipeline`] runs all of them for one [`pipeline::GenerationRequest`].

pub mod assets;
pub mod compose;
pub mod dates;
pub mod dom;
pub mod emit;
pub mod error;
pub mod fonts;
pub mod layout;
pub mod pipeline;
pub mod raster;
pub mod record;
pub mod staging;
pub mod style;
pub mod templates;

// Re-exports for convenience
pub use error::{CardError, Result};
pub use pipeline::{CardPipeline, GeneratedCard, GenerationRequest, PipelineConfig};
pub use record::{records_from_json, CardRecord};
pub use templates::{render_page, PageContext, PageSide};
