//! Timeline-semaphore implementation of the completion fence: a single
//! monotonically increasing 64-bit counter the queue signals and the CPU
//! waits on by value.

use std::cell::Cell;
use std::ffi::c_void;

use anyhow::{ensure, Context, Result};
use ash::vk;
use glint_render::CompletionFence;

pub struct TimelineFence {
  device: ash::Device,
  queue: vk::Queue,
  semaphore: vk::Semaphore,
  last_signaled: u64,
  observed: Cell<u64>,
}

impl TimelineFence {
  pub fn new(device: &ash::Device, queue: vk::Queue) -> Result<Self> {
    let type_info = vk::SemaphoreTypeCreateInfo {
      s_type: vk::StructureType::SEMAPHORE_TYPE_CREATE_INFO,
      semaphore_type: vk::SemaphoreType::TIMELINE,
      initial_value: 0,
      ..Default::default()
    };
    let create_info = vk::SemaphoreCreateInfo {
      s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
      p_next: &type_info as *const _ as *const c_void,
      ..Default::default()
    };
    let semaphore = unsafe { device.create_semaphore(&create_info, None) }
      .context("create timeline semaphore")?;

    Ok(Self {
      device: device.clone(),
      queue,
      semaphore,
      last_signaled: 0,
      observed: Cell::new(0),
    })
  }

  /// Destroy the semaphore. Must be called before the device goes away;
  /// no GPU work may still reference the fence.
  pub unsafe fn destroy(&mut self) {
    if self.semaphore != vk::Semaphore::null() {
      unsafe { self.device.destroy_semaphore(self.semaphore, None) };
      self.semaphore = vk::Semaphore::null();
    }
  }
}

impl CompletionFence for TimelineFence {
  fn signal(&mut self, value: u64) -> Result<()> {
    ensure!(
      value > self.last_signaled,
      "fence value {value} not above {}",
      self.last_signaled
    );

    // An empty submission carrying only the timeline signal: the counter
    // reaches `value` once every batch submitted before this point has
    // retired.
    let timeline = vk::TimelineSemaphoreSubmitInfo {
      s_type: vk::StructureType::TIMELINE_SEMAPHORE_SUBMIT_INFO,
      signal_semaphore_value_count: 1,
      p_signal_semaphore_values: &value,
      ..Default::default()
    };
    let submit = vk::SubmitInfo {
      s_type: vk::StructureType::SUBMIT_INFO,
      p_next: &timeline as *const _ as *const c_void,
      signal_semaphore_count: 1,
      p_signal_semaphores: &self.semaphore,
      ..Default::default()
    };
    unsafe {
      self
        .device
        .queue_submit(self.queue, std::slice::from_ref(&submit), vk::Fence::null())
    }
    .context("submit fence signal")?;

    self.last_signaled = value;
    Ok(())
  }

  fn completed_value(&self) -> u64 {
    match unsafe { self.device.get_semaphore_counter_value(self.semaphore) } {
      Ok(value) => {
        // Defend the monotonicity contract even against a misbehaving
        // driver query.
        let value = value.max(self.observed.get());
        self.observed.set(value);
        value
      }
      Err(e) => {
        tracing::error!("fence counter query failed: {e}");
        self.observed.get()
      }
    }
  }

  fn block_until(&mut self, value: u64) -> Result<()> {
    if self.completed_value() >= value {
      return Ok(());
    }

    let wait_info = vk::SemaphoreWaitInfo {
      s_type: vk::StructureType::SEMAPHORE_WAIT_INFO,
      semaphore_count: 1,
      p_semaphores: &self.semaphore,
      p_values: &value,
      ..Default::default()
    };
    // No timeout: a wedged queue stalls the host here.
    unsafe { self.device.wait_semaphores(&wait_info, u64::MAX) }
      .context("wait on completion fence")?;
    self.observed.set(self.observed.get().max(value));
    Ok(())
  }
}
