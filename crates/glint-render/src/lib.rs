// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic core of the glint frame host: the data model, the
//! vendor-capability negotiator, the per-frame state machine and the
//! contracts a hardware backend has to satisfy.

pub mod backend;
pub mod content;
pub mod fence;
pub mod frame;
pub mod state;
pub mod vendor;
pub mod version;

pub use backend::{FrameBackend, RenderSize};
pub use fence::CompletionFence;
pub use frame::FrameLoop;
pub use state::{MemoryTier, ResourceState, TextureDesc, TextureUsage};
pub use vendor::{try_activate, ActiveExtension, VendorDeviceInfo, VendorError, VendorProvider};
pub use version::ExtensionVersion;

/// Number of interchangeable presentation targets behind the surface.
pub const FRAME_COUNT: usize = 2;
