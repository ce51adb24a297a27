// SPDX-License-Identifier: CEPL-1.0
//! The per-frame orchestration core: command recording, resource-state
//! transitions, submission, presentation and completion waiting for exactly
//! one frame at a time.

use anyhow::{ensure, Result};
use tracing::{debug, info};

use crate::backend::FrameBackend;
use crate::fence::CompletionFence;
use crate::state::ResourceState;

/// Workgroup edge length of the storage-atomics compute shader.
pub const TILE_SIZE: u32 = 32;

/// Default background color the render target is cleared to.
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.2, 0.4, 1.0];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Recording,
    Submitted,
    WaitingForCompletion,
}

/// Drives `Idle -> Recording -> Submitted -> WaitingForCompletion -> Idle`,
/// strictly sequentially: GPU execution of frame N is never overlapped with
/// recording of frame N+1.
pub struct FrameLoop<B: FrameBackend> {
    backend: B,
    clear_color: [f32; 4],
    phase: Phase,
    next_fence_value: u64,
    submitted_batch: u64,
    retired_batch: u64,
    frames_rendered: u64,
}

impl<B: FrameBackend> FrameLoop<B> {
    pub fn new(mut backend: B) -> Self {
        // The backend may already have spent fence values on its setup
        // uploads; continue the counter, never restart it.
        let next_fence_value = backend.fence_mut().completed_value() + 1;
        Self {
            backend,
            clear_color: CLEAR_COLOR,
            phase: Phase::Idle,
            next_fence_value,
            submitted_batch: 0,
            retired_batch: 0,
            frames_rendered: 0,
        }
    }

    pub fn with_clear_color(mut self, rgba: [f32; 4]) -> Self {
        self.clear_color = rgba;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Per-frame update hook. Nothing animates in this host.
    pub fn update(&mut self) {}

    /// One full frame cycle.
    pub fn render(&mut self) -> Result<()> {
        ensure!(
            self.phase == Phase::Idle,
            "frame cycle re-entered while in {:?}",
            self.phase
        );
        debug_assert_eq!(self.retired_batch, self.submitted_batch);

        // Resetting the stream is legal here: the previous batch was
        // drained before we returned to Idle.
        self.backend.begin_commands()?;
        self.phase = Phase::Recording;

        let slot = self.backend.current_slot();
        self.backend.bind_graphics()?;
        self.backend
            .transition_slot(slot, ResourceState::PresentSource, ResourceState::RenderTarget)?;
        self.backend.clear_render_target(slot, self.clear_color)?;
        self.backend.draw_triangle()?;

        if self.backend.atomics_enabled() {
            self.record_atomics()?;
        }

        self.backend
            .transition_slot(slot, ResourceState::RenderTarget, ResourceState::PresentSource)?;

        self.backend.close_commands()?;
        self.backend.submit()?;
        self.submitted_batch += 1;
        self.phase = Phase::Submitted;

        self.backend.present(1)?;
        self.phase = Phase::WaitingForCompletion;
        self.drain()?;

        let slot = self.backend.acquire_slot()?;
        debug!("next frame slot: {slot}");

        if self.backend.atomics_enabled() {
            self.report_readback()?;
        }

        self.phase = Phase::Idle;
        self.frames_rendered += 1;
        Ok(())
    }

    /// Compute pass: dispatch over the storage image, then copy the whole
    /// image into the readback buffer.
    ///
    /// The grid is the image extent over [`TILE_SIZE`], integer division:
    /// the extent must be an exact multiple of the tile size, and a
    /// remainder is left uncovered rather than rounded up.
    fn record_atomics(&mut self) -> Result<()> {
        let extent = self.backend.storage_extent();
        let groups_x = extent.width / TILE_SIZE;
        let groups_y = extent.height / TILE_SIZE;

        self.backend.bind_compute()?;
        self.backend.dispatch(groups_x, groups_y, 1)?;
        self.backend
            .transition_storage(ResourceState::UnorderedAccess, ResourceState::CopySource)?;
        self.backend.copy_storage_to_readback()?;
        self.backend
            .transition_storage(ResourceState::CopySource, ResourceState::UnorderedAccess)?;
        Ok(())
    }

    /// Signal the fence with the next counter value and block until the
    /// GPU reaches it.
    ///
    /// This serializes CPU and GPU one frame at a time, which is the
    /// simplest correct scheme, not the fastest: a pipelined host would
    /// track a fence value per frame slot and only block when that slot is
    /// about to be reused.
    fn drain(&mut self) -> Result<()> {
        let value = self.next_fence_value;
        self.next_fence_value += 1;

        let fence = self.backend.fence_mut();
        fence.signal(value)?;
        fence.block_until(value)?;
        self.retired_batch = self.submitted_batch;
        Ok(())
    }

    fn report_readback(&mut self) -> Result<()> {
        let mut words = [0u64; 4];
        self.backend.read_readback(&mut words)?;
        info!(
            "the first few storage values are: {}, {}, {}, {}",
            words[0], words[1], words[2], words[3]
        );
        Ok(())
    }

    /// Drain outstanding GPU work so nothing in flight references resources
    /// about to be destroyed, then release the backend (which tears its
    /// resources down in reverse dependency order).
    pub fn shutdown(mut self) -> Result<()> {
        self.drain()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::backend::RenderSize;
    use crate::FRAME_COUNT;

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Event {
        Reset,
        BindGraphics,
        SlotBarrier { slot: usize, from: ResourceState, to: ResourceState },
        Clear { slot: usize },
        Draw,
        BindCompute,
        Dispatch { x: u32, y: u32, z: u32 },
        StorageBarrier { from: ResourceState, to: ResourceState },
        Copy,
        Close,
        Submit { batch: u64 },
        Present,
        Signal { value: u64 },
        WaitReturned { value: u64 },
        Acquire { slot: usize },
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    struct SoftFence {
        log: Log,
        signaled: u64,
        completed: u64,
    }

    impl CompletionFence for SoftFence {
        fn signal(&mut self, value: u64) -> Result<()> {
            assert!(value > self.signaled, "fence values must strictly increase");
            self.signaled = value;
            self.log.borrow_mut().push(Event::Signal { value });
            Ok(())
        }

        fn completed_value(&self) -> u64 {
            self.completed
        }

        fn block_until(&mut self, value: u64) -> Result<()> {
            if self.completed < value {
                assert!(self.signaled >= value, "wait for a value that was never signaled");
                self.completed = value;
            }
            self.log.borrow_mut().push(Event::WaitReturned { value });
            Ok(())
        }
    }

    /// In-memory device: executes the dispatch and copy in software and
    /// checks every recorded operation against the tracked resource
    /// states, the way a validation layer would.
    struct SoftDevice {
        log: Log,
        fence: SoftFence,
        slot_states: [ResourceState; FRAME_COUNT],
        storage_state: ResourceState,
        current_slot: usize,
        atomics: bool,
        storage_extent: RenderSize,
        storage: Vec<u64>,
        readback: Vec<u64>,
        recording: bool,
        batches_submitted: u64,
    }

    impl SoftDevice {
        fn new(atomics: bool, storage_extent: RenderSize) -> Self {
            let log: Log = Rc::default();
            let texels = (storage_extent.width * storage_extent.height) as usize;
            Self {
                fence: SoftFence { log: Rc::clone(&log), signaled: 0, completed: 0 },
                log,
                slot_states: [ResourceState::PresentSource; FRAME_COUNT],
                storage_state: ResourceState::UnorderedAccess,
                current_slot: 0,
                atomics,
                storage_extent,
                storage: vec![0; texels],
                readback: vec![0; texels],
                recording: false,
                batches_submitted: 0,
            }
        }

        fn events(&self) -> Vec<Event> {
            self.log.borrow().clone()
        }
    }

    impl FrameBackend for SoftDevice {
        type Fence = SoftFence;

        fn slot_count(&self) -> usize {
            FRAME_COUNT
        }

        fn current_slot(&self) -> usize {
            self.current_slot
        }

        fn acquire_slot(&mut self) -> Result<usize> {
            self.current_slot = (self.current_slot + 1) % FRAME_COUNT;
            self.log.borrow_mut().push(Event::Acquire { slot: self.current_slot });
            Ok(self.current_slot)
        }

        fn atomics_enabled(&self) -> bool {
            self.atomics
        }

        fn storage_extent(&self) -> RenderSize {
            self.storage_extent
        }

        fn begin_commands(&mut self) -> Result<()> {
            assert!(!self.recording, "reset while recording");
            self.recording = true;
            self.log.borrow_mut().push(Event::Reset);
            Ok(())
        }

        fn close_commands(&mut self) -> Result<()> {
            assert!(self.recording);
            self.recording = false;
            self.log.borrow_mut().push(Event::Close);
            Ok(())
        }

        fn submit(&mut self) -> Result<()> {
            assert!(!self.recording, "submit of an unclosed stream");
            self.batches_submitted += 1;
            let batch = self.batches_submitted;
            self.log.borrow_mut().push(Event::Submit { batch });
            Ok(())
        }

        fn present(&mut self, sync_interval: u32) -> Result<()> {
            assert_eq!(sync_interval, 1);
            assert_eq!(
                self.slot_states[self.current_slot],
                ResourceState::PresentSource,
                "presented slot must be back in present state"
            );
            self.log.borrow_mut().push(Event::Present);
            Ok(())
        }

        fn bind_graphics(&mut self) -> Result<()> {
            self.log.borrow_mut().push(Event::BindGraphics);
            Ok(())
        }

        fn transition_slot(
            &mut self,
            slot: usize,
            from: ResourceState,
            to: ResourceState,
        ) -> Result<()> {
            assert_eq!(self.slot_states[slot], from, "slot barrier from wrong state");
            self.slot_states[slot] = to;
            self.log.borrow_mut().push(Event::SlotBarrier { slot, from, to });
            Ok(())
        }

        fn clear_render_target(&mut self, slot: usize, _color: [f32; 4]) -> Result<()> {
            assert_eq!(self.slot_states[slot], ResourceState::RenderTarget);
            self.log.borrow_mut().push(Event::Clear { slot });
            Ok(())
        }

        fn draw_triangle(&mut self) -> Result<()> {
            assert_eq!(self.slot_states[self.current_slot], ResourceState::RenderTarget);
            self.log.borrow_mut().push(Event::Draw);
            Ok(())
        }

        fn bind_compute(&mut self) -> Result<()> {
            self.log.borrow_mut().push(Event::BindCompute);
            Ok(())
        }

        fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
            assert_eq!(self.storage_state, ResourceState::UnorderedAccess);
            // Atomic-max of the packed (x, y) cell coordinate, the
            // deterministic pattern the compute shader writes.
            for ty in 0..y * TILE_SIZE {
                for tx in 0..x * TILE_SIZE {
                    let value = (u64::from(ty) << 32) | u64::from(tx);
                    let cell =
                        &mut self.storage[(ty * self.storage_extent.width + tx) as usize];
                    *cell = (*cell).max(value);
                }
            }
            self.log.borrow_mut().push(Event::Dispatch { x, y, z });
            Ok(())
        }

        fn transition_storage(&mut self, from: ResourceState, to: ResourceState) -> Result<()> {
            assert_eq!(self.storage_state, from, "storage barrier from wrong state");
            self.storage_state = to;
            self.log.borrow_mut().push(Event::StorageBarrier { from, to });
            Ok(())
        }

        fn copy_storage_to_readback(&mut self) -> Result<()> {
            assert_eq!(self.storage_state, ResourceState::CopySource);
            self.readback.copy_from_slice(&self.storage);
            self.log.borrow_mut().push(Event::Copy);
            Ok(())
        }

        fn fence_mut(&mut self) -> &mut SoftFence {
            &mut self.fence
        }

        fn read_readback(&mut self, out: &mut [u64]) -> Result<()> {
            out.copy_from_slice(&self.readback[..out.len()]);
            Ok(())
        }
    }

    fn loop_with_atomics() -> FrameLoop<SoftDevice> {
        FrameLoop::new(SoftDevice::new(true, RenderSize { width: 640, height: 480 }))
    }

    #[test]
    fn slot_barriers_bracket_every_draw() {
        let mut frame = loop_with_atomics();
        frame.render().unwrap();

        let events = frame.backend().events();
        let barriers: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, Event::SlotBarrier { .. }))
            .cloned()
            .collect();
        assert_eq!(
            barriers,
            vec![
                Event::SlotBarrier {
                    slot: 0,
                    from: ResourceState::PresentSource,
                    to: ResourceState::RenderTarget,
                },
                Event::SlotBarrier {
                    slot: 0,
                    from: ResourceState::RenderTarget,
                    to: ResourceState::PresentSource,
                },
            ]
        );

        // Clear and draw both land strictly between the two barriers.
        let to_rt = events
            .iter()
            .position(|e| matches!(e, Event::SlotBarrier { to: ResourceState::RenderTarget, .. }))
            .unwrap();
        let to_present = events
            .iter()
            .position(|e| matches!(e, Event::SlotBarrier { to: ResourceState::PresentSource, .. }))
            .unwrap();
        let clear = events.iter().position(|e| matches!(e, Event::Clear { .. })).unwrap();
        let draw = events.iter().position(|e| matches!(e, Event::Draw)).unwrap();
        assert!(to_rt < clear && clear < draw && draw < to_present);
    }

    #[test]
    fn storage_barriers_bracket_the_copy() {
        let mut frame = loop_with_atomics();
        frame.render().unwrap();

        let events = frame.backend().events();
        let barriers: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, Event::StorageBarrier { .. }))
            .cloned()
            .collect();
        assert_eq!(
            barriers,
            vec![
                Event::StorageBarrier {
                    from: ResourceState::UnorderedAccess,
                    to: ResourceState::CopySource,
                },
                Event::StorageBarrier {
                    from: ResourceState::CopySource,
                    to: ResourceState::UnorderedAccess,
                },
            ]
        );

        let dispatch = events.iter().position(|e| matches!(e, Event::Dispatch { .. })).unwrap();
        let copy = events.iter().position(|e| matches!(e, Event::Copy)).unwrap();
        let to_copy_src = events
            .iter()
            .position(|e| matches!(e, Event::StorageBarrier { to: ResourceState::CopySource, .. }))
            .unwrap();
        assert!(dispatch < to_copy_src && to_copy_src < copy);
    }

    #[test]
    fn stream_is_never_reset_with_a_batch_in_flight() {
        let mut frame = loop_with_atomics();
        for _ in 0..3 {
            frame.render().unwrap();
        }

        let mut in_flight = false;
        for event in frame.backend().events() {
            match event {
                Event::Submit { .. } => in_flight = true,
                Event::WaitReturned { .. } => in_flight = false,
                Event::Reset => assert!(!in_flight, "reset between submit and fence wait"),
                _ => {}
            }
        }
    }

    #[test]
    fn fence_values_increase_by_one_per_frame() {
        let mut frame = loop_with_atomics();
        for _ in 0..3 {
            frame.render().unwrap();
        }

        let signals: Vec<_> = frame
            .backend()
            .events()
            .iter()
            .filter_map(|e| match e {
                Event::Signal { value } => Some(*value),
                _ => None,
            })
            .collect();
        assert_eq!(signals, vec![1, 2, 3]);
        assert_eq!(frame.backend().fence.completed_value(), 3);
    }

    #[test]
    fn readback_holds_packed_row_major_coordinates() {
        let mut frame = loop_with_atomics();
        frame.render().unwrap();

        let mut words = [0u64; 4];
        // Mirrors what report_readback logged: row 0 of the storage image,
        // (x, y) packed with x in the low half.
        frame.backend.read_readback(&mut words).unwrap();
        assert_eq!(words, [0, 1, 2, 3]);
    }

    #[test]
    fn dispatch_grid_is_extent_over_tile_size() {
        let mut frame = loop_with_atomics();
        frame.render().unwrap();

        let events = frame.backend().events();
        assert!(events.contains(&Event::Dispatch { x: 640 / TILE_SIZE, y: 480 / TILE_SIZE, z: 1 }));
    }

    #[test]
    fn compute_is_skipped_without_the_extension() {
        let mut frame =
            FrameLoop::new(SoftDevice::new(false, RenderSize { width: 640, height: 480 }));
        frame.render().unwrap();

        let events = frame.backend().events();
        assert!(!events.iter().any(|e| matches!(
            e,
            Event::BindCompute | Event::Dispatch { .. } | Event::Copy | Event::StorageBarrier { .. }
        )));
        // The graphics half of the frame is unaffected.
        assert!(events.contains(&Event::Draw));
        assert!(events.contains(&Event::Present));
    }

    #[test]
    fn slot_index_is_refreshed_after_present() {
        let mut frame = loop_with_atomics();
        assert_eq!(frame.backend().current_slot(), 0);
        frame.render().unwrap();
        assert_eq!(frame.backend().current_slot(), 1);
        frame.render().unwrap();
        assert_eq!(frame.backend().current_slot(), 0);

        // Present happens before the refresh, wait before the acquire.
        let events = frame.backend().events();
        let present = events.iter().position(|e| matches!(e, Event::Present)).unwrap();
        let wait = events.iter().position(|e| matches!(e, Event::WaitReturned { .. })).unwrap();
        let acquire = events.iter().position(|e| matches!(e, Event::Acquire { .. })).unwrap();
        assert!(present < wait && wait < acquire);
    }

    #[test]
    fn shutdown_drains_outstanding_work() {
        let mut frame = loop_with_atomics();
        frame.render().unwrap();
        let log = Rc::clone(&frame.backend().log);
        frame.shutdown().unwrap();

        let events = log.borrow();
        assert!(matches!(events.last(), Some(Event::WaitReturned { value: 2 })));
    }
}
