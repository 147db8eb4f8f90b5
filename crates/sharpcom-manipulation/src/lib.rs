//! # sharpcom-manipulation
//!
//! DirectManipulation bindings built on `sharpcom-core`.
//!
//! - [`viewport`]: the input region, its configurations and transforms
//! - [`content`]: the surface a viewport moves
//! - [`event_handler`]: viewport notifications delivered to Rust
//! - [`types`]: rectangles, transforms, status and option flags
//!
//! Viewports and contents are obtained from a native manager created by
//! the host application; these wrappers only drive them. Event handlers go
//! the other way: a Rust [`ViewportEventHandler`] is bound to a shadow and
//! registered with [`Viewport::add_event_handler`].

pub mod content;
pub mod event_handler;
pub mod types;
pub mod viewport;

#[cfg(test)]
mod fake;

pub use content::Content;
pub use event_handler::{EventHandler, ViewportEventHandler};
pub use types::{
    ContentTransform, InputMode, ManipulationConfiguration, MotionTypes, Rect, Tag, ViewportOptions,
    ViewportStatus,
};
pub use viewport::Viewport;
