//! Off-screen staging area.
//!
//! A [`StagingArea`] owns at most one attached surface at a time. Mounting
//! parses the markup, resolves styles and lays the page out on a fixed
//! 567 × 800 px canvas (150 mm × 212 mm at 96 DPI). The returned
//! [`MountedSurface`] guard detaches the surface when dropped, so every exit
//! path of the caller disposes it exactly once.

use std::ops::Deref;
use std::sync::Arc;

use crate::dom::{image_elements, parse_markup, DomNode};
use crate::error::Result;
use crate::fonts::FontManager;
use crate::layout::{compute_layout, PositionedBox};
use crate::style::build_styled_tree;

/// Physical page width.
pub const PAGE_WIDTH_MM: f32 = 150.0;
/// Physical page height.
pub const PAGE_HEIGHT_MM: f32 = 212.0;
/// Surface width in CSS px at the 96 DPI reference.
pub const SURFACE_WIDTH_PX: u32 = 567;
/// Surface height in CSS px at the 96 DPI reference.
pub const SURFACE_HEIGHT_PX: u32 = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

impl std::fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// Lifecycle of a staged surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    Unmounted,
    Mounted,
    Captured,
    Disposed,
}

/// A laid-out page ready for capture.
#[derive(Debug)]
pub struct StagedSurface {
    id: SurfaceId,
    markup: String,
    dom: Vec<DomNode>,
    boxes: Vec<PositionedBox>,
}

impl StagedSurface {
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }

    /// Top-level boxes in surface coordinates.
    pub fn boxes(&self) -> &[PositionedBox] {
        &self.boxes
    }

    pub fn width_px(&self) -> u32 {
        SURFACE_WIDTH_PX
    }

    pub fn height_px(&self) -> u32 {
        SURFACE_HEIGHT_PX
    }

    pub fn width_mm(&self) -> f32 {
        PAGE_WIDTH_MM
    }

    pub fn height_mm(&self) -> f32 {
        PAGE_HEIGHT_MM
    }

    /// Every `img` source in document order.
    pub fn image_sources(&self) -> Vec<String> {
        image_elements(&self.dom)
            .into_iter()
            .filter_map(|img| img.src())
            .filter(|src| !src.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// The single off-screen staging region.
pub struct StagingArea {
    fonts: Arc<FontManager>,
    attached: Option<SurfaceId>,
    ledger: Vec<(SurfaceId, SurfaceState)>,
    next_id: u64,
}

impl StagingArea {
    pub fn new(fonts: Arc<FontManager>) -> Self {
        Self {
            fonts,
            attached: None,
            ledger: Vec::new(),
            next_id: 1,
        }
    }

    pub fn fonts(&self) -> &Arc<FontManager> {
        &self.fonts
    }

    /// Stage `markup` on a fresh surface.
    ///
    /// A layout failure disposes the surface before the error is returned.
    pub fn mount(&mut self, markup: impl Into<String>) -> Result<MountedSurface<'_>> {
        if let Some(stale) = self.attached {
            log::warn!("Staging area still holds {stale}; detaching it before mounting");
            self.unmount(stale);
        }

        let id = SurfaceId(self.next_id);
        self.next_id += 1;
        self.ledger.push((id, SurfaceState::Unmounted));

        let markup = markup.into();
        let dom = parse_markup(&markup);
        let styled = build_styled_tree(&dom, None);
        let boxes = match compute_layout(
            &styled,
            SURFACE_WIDTH_PX as f32,
            SURFACE_HEIGHT_PX as f32,
            &self.fonts,
        ) {
            Ok(boxes) => boxes,
            Err(e) => {
                self.set_state(id, SurfaceState::Disposed);
                return Err(e);
            }
        };

        self.attached = Some(id);
        self.set_state(id, SurfaceState::Mounted);
        log::debug!("Mounted {id} ({} top-level boxes)", boxes.len());

        Ok(MountedSurface {
            area: self,
            surface: StagedSurface {
                id,
                markup,
                dom,
                boxes,
            },
        })
    }

    /// Detach and dispose a surface. Safe to call more than once; problems
    /// are logged, never raised.
    pub fn unmount(&mut self, id: SurfaceId) {
        match self.state(id) {
            None => log::warn!("Unmount requested for unknown {id}"),
            Some(SurfaceState::Disposed) => log::debug!("{id} already disposed"),
            Some(_) => {
                if self.attached == Some(id) {
                    self.attached = None;
                } else {
                    log::warn!("{id} was not attached to the staging area");
                }
                self.set_state(id, SurfaceState::Disposed);
                log::debug!("Disposed {id}");
            }
        }
    }

    pub fn state(&self, id: SurfaceId) -> Option<SurfaceState> {
        self.ledger
            .iter()
            .rev()
            .find(|(sid, _)| *sid == id)
            .map(|(_, state)| *state)
    }

    /// Every surface this area has created, with its current state.
    pub fn ledger(&self) -> &[(SurfaceId, SurfaceState)] {
        &self.ledger
    }

    /// True when no surface is attached.
    pub fn is_idle(&self) -> bool {
        self.attached.is_none()
    }

    fn set_state(&mut self, id: SurfaceId, state: SurfaceState) {
        if let Some(entry) = self.ledger.iter_mut().find(|(sid, _)| *sid == id) {
            entry.1 = state;
        }
    }
}

/// Scope guard for a mounted surface. Dereferences to the surface and
/// unmounts it on drop.
pub struct MountedSurface<'a> {
    area: &'a mut StagingArea,
    surface: StagedSurface,
}

impl MountedSurface<'_> {
    pub fn mark_captured(&mut self) {
        self.area.set_state(self.surface.id, SurfaceState::Captured);
    }

    pub fn state(&self) -> Option<SurfaceState> {
        self.area.state(self.surface.id)
    }

    /// Unmount now instead of at end of scope.
    pub fn unmount(self) {}
}

impl Deref for MountedSurface<'_> {
    type Target = StagedSurface;

    fn deref(&self) -> &StagedSurface {
        &self.surface
    }
}

impl Drop for MountedSurface<'_> {
    fn drop(&mut self) {
        self.area.unmount(self.surface.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKUP: &str = r#"<div style="position: relative; width: 150mm; height: 212mm">
        <img src="images/fondo.png" style="position: absolute; top: 0; left: 0; width: 100%; height: 100%">
        <div style="position: absolute; top: 35mm; left: 34mm; width: 70mm; height: 85mm"><img src="data:image/jpeg;base64,AQID"></div>
    </div>"#;

    fn area() -> StagingArea {
        StagingArea::new(Arc::new(FontManager::default()))
    }

    #[test]
    fn mount_lays_out_and_drop_disposes() {
        let mut area = area();
        let id = {
            let surface = area.mount(MARKUP).unwrap();
            assert_eq!(surface.state(), Some(SurfaceState::Mounted));
            assert_eq!(surface.boxes().len(), 1);
            assert_eq!(
                surface.image_sources(),
                vec!["images/fondo.png".to_string(), "data:image/jpeg;base64,AQID".to_string()]
            );
            surface.id()
        };
        assert_eq!(area.state(id), Some(SurfaceState::Disposed));
        assert!(area.is_idle());
    }

    #[test]
    fn captured_surface_is_still_disposed() {
        let mut area = area();
        let mut surface = area.mount(MARKUP).unwrap();
        surface.mark_captured();
        assert_eq!(surface.state(), Some(SurfaceState::Captured));
        let id = surface.id();
        surface.unmount();
        assert_eq!(area.state(id), Some(SurfaceState::Disposed));
    }

    #[test]
    fn unmount_is_idempotent() {
        let mut area = area();
        let id = area.mount(MARKUP).unwrap().id();
        area.unmount(id);
        area.unmount(id);
        assert_eq!(area.state(id), Some(SurfaceState::Disposed));
    }

    #[test]
    fn error_path_still_disposes() {
        fn capture_that_fails(area: &mut StagingArea) -> Result<()> {
            let _surface = area.mount(MARKUP)?;
            Err(crate::error::CardError::Capture("boom".into()))
        }

        let mut area = area();
        assert!(capture_that_fails(&mut area).is_err());
        assert!(area
            .ledger()
            .iter()
            .all(|(_, state)| *state == SurfaceState::Disposed));
    }

    #[test]
    fn leaked_surface_is_detached_on_next_mount() {
        let mut area = area();
        let first = area.mount(MARKUP).unwrap();
        let first_id = first.id();
        std::mem::forget(first);
        let second = area.mount(MARKUP).unwrap();
        let second_id = second.id();
        drop(second);
        assert_eq!(area.state(first_id), Some(SurfaceState::Disposed));
        assert_eq!(area.state(second_id), Some(SurfaceState::Disposed));
        assert_eq!(area.ledger().len(), 2);
    }
}
