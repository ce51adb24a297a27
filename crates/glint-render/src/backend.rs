// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;

use crate::fence::CompletionFence;
use crate::state::ResourceState;

#[derive(Clone, Copy, Debug)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

/// One device, one submission queue, one presentation surface, as seen by
/// the frame state machine.
///
/// The recording methods append to a single command stream that is replayed
/// once per submission. [`begin_commands`](Self::begin_commands) resets the
/// allocator backing the stream and is only legal after the previously
/// recorded batch has retired; the state machine guarantees that by always
/// draining the fence before looping back.
pub trait FrameBackend {
    type Fence: CompletionFence;

    /// Slot count reported by the presentation surface.
    fn slot_count(&self) -> usize;

    /// Slot index most recently reported by the surface. The application
    /// never chooses this value.
    fn current_slot(&self) -> usize;

    /// Re-query the surface for the slot to target next; it may have
    /// changed as a result of the present call.
    fn acquire_slot(&mut self) -> Result<usize>;

    /// Whether the vendor capability context is active, i.e. the storage
    /// image, compute pipeline and readback buffer all exist.
    fn atomics_enabled(&self) -> bool;

    /// Extent of the unordered-access storage image.
    fn storage_extent(&self) -> RenderSize;

    /// Reset the command allocator and the stream, leaving it recording
    /// with the graphics pipeline bound as the starting configuration.
    fn begin_commands(&mut self) -> Result<()>;

    /// Finalize the stream. No recording is legal afterwards until the
    /// next [`begin_commands`](Self::begin_commands).
    fn close_commands(&mut self) -> Result<()>;

    /// Submit the closed stream to the queue as a single batch.
    fn submit(&mut self) -> Result<()>;

    /// Present the current slot. Only `sync_interval == 1` (vsync-locked)
    /// is supported.
    fn present(&mut self, sync_interval: u32) -> Result<()>;

    /// Record the graphics root bindings: descriptor table, viewport and
    /// scissor.
    fn bind_graphics(&mut self) -> Result<()>;

    /// Record a state barrier on a frame slot's backing resource.
    fn transition_slot(&mut self, slot: usize, from: ResourceState, to: ResourceState)
        -> Result<()>;

    /// Record a clear of the slot's render target.
    fn clear_render_target(&mut self, slot: usize, color: [f32; 4]) -> Result<()>;

    /// Record the fixed triangle draw using the static vertex data and the
    /// shader-read texture.
    fn draw_triangle(&mut self) -> Result<()>;

    /// Record the compute root bindings.
    fn bind_compute(&mut self) -> Result<()>;

    /// Record a compute dispatch of the given workgroup grid.
    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) -> Result<()>;

    /// Record a state barrier on the storage image.
    fn transition_storage(&mut self, from: ResourceState, to: ResourceState) -> Result<()>;

    /// Record a copy of the storage image's full tiling footprint into the
    /// readback buffer.
    fn copy_storage_to_readback(&mut self) -> Result<()>;

    fn fence_mut(&mut self) -> &mut Self::Fence;

    /// Map the readback buffer, copy out the first `out.len()` 64-bit
    /// words, and unmap. Only legal while no submitted batch is in flight.
    fn read_readback(&mut self, out: &mut [u64]) -> Result<()>;
}
