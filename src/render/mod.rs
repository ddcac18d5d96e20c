//! Preview rendering
//!
//! Host page abstraction and the controller that mounts live tracks into
//! floating preview slots.

pub mod page;
pub mod surface;

pub use page::{ElementHandle, HostPage, VirtualPage};
pub use surface::{ObjectFit, RenderSurfaceController, SurfaceOptions};
