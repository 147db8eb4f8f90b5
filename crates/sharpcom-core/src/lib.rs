//! # sharpcom-core
//!
//! COM interop core for the sharpcom bindings.
//!
//! This crate holds everything that is independent of a particular native API:
//!
//! - [`Guid`] and [`HResult`]: the identifiers and status codes of the COM ABI
//! - [`ComObject`] and the [`Interface`] trait: reference-counted wrappers around
//!   native interface pointers, with `QueryInterface` narrowing
//! - [`Shadow`] and [`ComCallback`]: Rust objects exposed to native code through
//!   synthesized vtables
//! - [`Marshal`] and [`ScratchArena`]: layout-exact parameter blocks and the
//!   transient native memory they point into
//! - [`ObjectTracker`]: leak diagnostics for live wrappers
//!
//! ## Architecture
//!
//! ```text
//! caller
//!    ↓
//! Interface wrapper (com_interface!)  ──  Marshal → ScratchArena
//!    ↓
//! native vtable call
//!    ↓ (optional callback)
//! Shadow thunk → registry → ComCallback implementation
//! ```
//!
//! Per-API crates (`sharpcom-xaudio2`, `sharpcom-manipulation`) build their
//! mirror structs, wrappers and callback contracts on top of these pieces.

pub mod config;
pub mod error;
pub mod guid;
pub mod marshal;
pub mod memory;
pub mod object;
pub mod result;
pub mod shadow;
pub mod tracker;

pub use config::Configuration;
pub use error::{Error, Result};
pub use guid::Guid;
pub use marshal::Marshal;
pub use memory::{MemoryStats, NativeBuffer, ScratchArena};
pub use object::{ComObject, IUnknownVtbl, Interface, Unknown};
pub use result::{register_descriptors, HResult, ResultDescriptor};
pub use shadow::{ComCallback, InterfaceEntry, Shadow, ShadowState};
pub use tracker::{LeakReport, ObjectReference, ObjectTracker, TrackingScope};
