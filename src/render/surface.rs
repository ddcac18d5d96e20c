//! Render surface controller
//!
//! Mounts a frame source's live video into a fixed-position overlay slot on
//! the host page. The slot is keyed by media type so camera and screen
//! previews sit side by side in the bottom-right corner; swapping the
//! underlying source only rebuilds the inner elements.

use super::page::{ElementHandle, HostPage};
use crate::capture::source::FrameSource;
use crate::capture::traits::MediaType;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How the video fills its slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectFit {
    Cover,
    Contain,
    Fill,
}

impl ObjectFit {
    pub fn css(&self) -> &'static str {
        match self {
            ObjectFit::Cover => "cover",
            ObjectFit::Contain => "contain",
            ObjectFit::Fill => "fill",
        }
    }
}

/// Geometry and appearance of preview slots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SurfaceOptions {
    /// Slot width in CSS pixels
    pub width: u32,

    /// Slot height in CSS pixels
    pub height: u32,

    /// Distance from the viewport edges and between slots
    pub margin: u32,

    pub z_index: i32,

    pub fit: ObjectFit,

    /// Show the floating preview (slots are hidden by default)
    pub visible: bool,

    /// Override the mount point id derived from the media type
    pub element_id: Option<String>,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            width: 200,
            height: 140,
            margin: 10,
            z_index: 999,
            fit: ObjectFit::Cover,
            visible: false,
            element_id: None,
        }
    }
}

impl SurfaceOptions {
    /// Mount point id for `media_type`
    pub fn mount_point_id(&self, media_type: MediaType) -> String {
        self.element_id
            .clone()
            .unwrap_or_else(|| format!("video-player-{}", media_type.slug()))
    }

    /// `(bottom, right)` offsets of the slot for `media_type`.
    ///
    /// The camera sits in the corner, the screen preview one slot to its left.
    pub fn anchor(&self, media_type: MediaType) -> (u32, u32) {
        match media_type {
            MediaType::Camera => (self.margin, self.margin),
            MediaType::Screen => (self.margin, self.margin * 2 + self.width),
        }
    }
}

/// Owns the overlay region one capture track renders into
pub struct RenderSurfaceController {
    page: Arc<dyn HostPage>,
    media_type: MediaType,
    options: SurfaceOptions,
    mount_point_id: String,
    slot: ElementHandle,
    slot_preexisting: bool,
    container: Option<ElementHandle>,
    video: Option<ElementHandle>,
    source_id: Option<String>,
    destroyed: bool,
}

impl RenderSurfaceController {
    /// Mount (or adopt) the slot for `media_type`
    pub fn mount(page: Arc<dyn HostPage>, media_type: MediaType, options: SurfaceOptions) -> Self {
        let mount_point_id = options.mount_point_id(media_type);

        let (slot, slot_preexisting) = match page.find_element(&mount_point_id) {
            Some(existing) => {
                tracing::debug!("Adopting page element #{} as {} slot", mount_point_id, media_type);
                page.clear_children(existing);
                (existing, true)
            }
            None => {
                let slot = page.create_element("div", &mount_point_id);
                let (bottom, right) = options.anchor(media_type);
                let display = if options.visible { "block" } else { "none" };
                page.set_style(slot, "display", display);
                page.set_style(slot, "height", &format!("{}px", options.height));
                page.set_style(slot, "width", &format!("{}px", options.width));
                page.set_style(slot, "z-index", &options.z_index.to_string());
                page.set_style(slot, "bottom", &format!("{bottom}px"));
                page.set_style(slot, "right", &format!("{right}px"));
                page.set_style(slot, "position", "fixed");
                page.set_style(slot, "border-radius", "10px");
                page.set_style(
                    slot,
                    "box-shadow",
                    "0px 1px 3px 0px #3c40434d, 0px 4px 8px 3px #3c404326",
                );
                page.append_child(None, slot);
                (slot, false)
            }
        };

        Self {
            page,
            media_type,
            options,
            mount_point_id,
            slot,
            slot_preexisting,
            container: None,
            video: None,
            source_id: None,
            destroyed: false,
        }
    }

    /// Render `source` into the slot and return its video element.
    ///
    /// Attaching the source that is already rendered returns the existing
    /// element untouched.
    pub fn attach(&mut self, source: &FrameSource) -> ElementHandle {
        if let (Some(current), Some(video)) = (self.source_id.as_deref(), self.video) {
            if current == source.id() {
                return video;
            }
        }

        self.teardown_inner();

        let track_id = source.id().to_string();
        let page = &self.page;

        let container = page.create_element("div", &format!("video-player-{track_id}"));
        page.set_style(container, "width", "100%");
        page.set_style(container, "height", "100%");
        page.set_style(container, "position", "relative");
        page.set_style(container, "overflow", "hidden");
        page.set_style(container, "border-radius", "10px");
        page.set_style(container, "background-color", "black");

        let video = page.create_element("video", &format!("video_{track_id}"));
        page.set_style(video, "width", "100%");
        page.set_style(video, "height", "100%");
        page.set_style(video, "object-fit", self.options.fit.css());
        page.set_video_source(video, Some(&track_id));

        page.append_child(Some(container), video);
        page.append_child(Some(self.slot), container);

        tracing::debug!("Attached {} track {} to #{}", self.media_type, track_id, self.mount_point_id);

        self.container = Some(container);
        self.video = Some(video);
        self.source_id = Some(track_id);
        video
    }

    /// Start playback of the attached video
    pub fn play(&self) {
        if let Some(video) = self.video {
            self.page.play(video);
        }
    }

    fn teardown_inner(&mut self) {
        if let Some(video) = self.video.take() {
            self.page.set_video_source(video, None);
        }
        if let Some(container) = self.container.take() {
            self.page.remove_element(container);
        }
        self.source_id = None;
    }

    /// Remove everything this controller created. A pre-existing slot only
    /// loses its children.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.teardown_inner();
        if self.slot_preexisting {
            self.page.clear_children(self.slot);
        } else {
            self.page.remove_element(self.slot);
        }
        tracing::debug!("Destroyed {} surface #{}", self.media_type, self.mount_point_id);
    }

    pub fn mount_point_id(&self) -> &str {
        &self.mount_point_id
    }

    pub fn slot(&self) -> ElementHandle {
        self.slot
    }

    pub fn video(&self) -> Option<ElementHandle> {
        self.video
    }

    pub fn source_id(&self) -> Option<&str> {
        self.source_id.as_deref()
    }

    pub fn is_preexisting(&self) -> bool {
        self.slot_preexisting
    }
}

impl Drop for RenderSurfaceController {
    fn drop(&mut self) {
        self.destroy();
    }
}
