//! Vulkan implementation of the frame host's backend contract: one logical
//! device, one direct queue, a double-buffered swapchain, a timeline-
//! semaphore completion fence, and the vendor wide-atomics extension when
//! its library is installed.

use std::fs;
use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use tracing::{info, warn};

use glint_render::content::{
  checkerboard, triangle_vertices, STORAGE_HEIGHT, STORAGE_PIXEL_SIZE, STORAGE_WIDTH,
  TEXTURE_HEIGHT, TEXTURE_PIXEL_SIZE, TEXTURE_WIDTH,
};
use glint_render::vendor::{deactivate, try_activate, ActiveExtension};
use glint_render::{
  CompletionFence, ExtensionVersion, FrameBackend, MemoryTier, RenderSize, ResourceState,
  TextureDesc, TextureUsage,
};

pub mod fence;
pub mod pipeline;
pub mod resources;
pub mod setup;
pub mod vendor;

use fence::TimelineFence;
use pipeline::{ComputePipeline, GraphicsPipeline};
use resources::{access_for, color_subresource_range, layout_for, Buffer, Mapping, Texture};
use vendor::{GfxExtContext, GfxExtLibrary, RawImageDesc};

/// Extension version this host requires for emulated wide atomics.
pub const REQUIRED_EXTENSION_VERSION: ExtensionVersion = ExtensionVersion::new(3, 4, 1);

/// Compute blob produced by this crate's build script; the app passes this
/// path unless the configuration overrides it.
pub const DEFAULT_COMPUTE_SHADER: &str = concat!(env!("OUT_DIR"), "/atomic_max.comp.spv");

pub struct VkBackendOptions {
  pub size: RenderSize,
  pub validation: bool,
  pub software_adapter: bool,
  pub required_extension: ExtensionVersion,
  pub compute_shader: PathBuf,
}

impl Default for VkBackendOptions {
  fn default() -> Self {
    Self {
      size: RenderSize { width: 1280, height: 720 },
      validation: false,
      software_adapter: false,
      required_extension: REQUIRED_EXTENSION_VERSION,
      compute_shader: PathBuf::from(DEFAULT_COMPUTE_SHADER),
    }
  }
}

struct FrameSlot {
  image: vk::Image,
  view: vk::ImageView,
}

/// Everything that only exists when the vendor extension negotiated
/// successfully: the driver context, the storage image allocated through
/// the extension, the readback buffer and the compute pipeline.
struct VendorState {
  provider: GfxExtLibrary,
  active: ActiveExtension<GfxExtContext>,
  storage: Texture,
  readback: Buffer,
  compute: ComputePipeline,
  compute_set: vk::DescriptorSet,
}

pub struct VkBackend {
  _entry: Entry,
  instance: Instance,
  debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
  surface_loader: surface::Instance,
  surface: vk::SurfaceKHR,

  phys: vk::PhysicalDevice,
  device: ash::Device,
  queue_family: u32,
  queue: vk::Queue,

  swapchain_loader: swapchain::Device,
  swapchain: vk::SwapchainKHR,
  format: vk::Format,
  extent: vk::Extent2D,
  slots: Vec<FrameSlot>,
  current_slot: usize,

  acquire_semaphore: vk::Semaphore,
  render_done_semaphore: vk::Semaphore,
  pending_acquire: bool,

  cmd_pool: vk::CommandPool,
  cmd_buf: vk::CommandBuffer,

  completion: TimelineFence,

  graphics: GraphicsPipeline,
  descriptor_pool: vk::DescriptorPool,
  graphics_set: vk::DescriptorSet,
  sampler: vk::Sampler,
  texture: Texture,
  vertex_buffer: Buffer,

  vendor: Option<VendorState>,
}

unsafe fn create_binary_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
  let create_info = vk::SemaphoreCreateInfo {
    s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
    ..Default::default()
  };
  Ok(device.create_semaphore(&create_info, None).context("create semaphore")?)
}

unsafe fn build_backend(
  window: &dyn HasWindowHandle,
  display: &dyn HasDisplayHandle,
  options: &VkBackendOptions,
) -> Result<VkBackend> {
  let entry = Entry::linked();

  let dh: RawDisplayHandle = display.display_handle()?.as_raw();
  let wh: RawWindowHandle = window.window_handle()?.as_raw();

  let instance = setup::create_instance(&entry, dh, options.validation)?;
  let debug = if options.validation {
    match setup::create_debug_messenger(&entry, &instance) {
      Ok(pair) => Some(pair),
      Err(e) => {
        warn!("validation requested but messenger creation failed: {e}");
        None
      }
    }
  } else {
    None
  };

  let surface = ash_window::create_surface(&entry, &instance, dh, wh, None)
    .context("create_surface")?;
  let surface_loader = surface::Instance::new(&entry, &instance);

  let (phys, queue_family) =
    setup::pick_adapter(&instance, &surface_loader, surface, options.software_adapter)?;
  let device = setup::create_device(&instance, phys, queue_family)?;
  let queue = device.get_device_queue(queue_family, 0);
  let mem_props = instance.get_physical_device_memory_properties(phys);

  let swapchain_loader = swapchain::Device::new(&instance, &device);
  let bundle = setup::create_swapchain_bundle(
    &device,
    &surface_loader,
    &swapchain_loader,
    phys,
    surface,
    vk::Extent2D { width: options.size.width, height: options.size.height },
  )?;
  let slots = bundle
    .images
    .iter()
    .zip(&bundle.views)
    .map(|(&image, &view)| FrameSlot { image, view })
    .collect::<Vec<_>>();

  let acquire_semaphore = create_binary_semaphore(&device)?;
  let render_done_semaphore = create_binary_semaphore(&device)?;

  // Pool-level reset only: the allocator backing the stream is recycled as
  // a whole at the top of every frame.
  let pool_info = vk::CommandPoolCreateInfo {
    s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
    queue_family_index: queue_family,
    ..Default::default()
  };
  let cmd_pool = device.create_command_pool(&pool_info, None)?;
  let alloc_info = vk::CommandBufferAllocateInfo {
    s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
    command_pool: cmd_pool,
    level: vk::CommandBufferLevel::PRIMARY,
    command_buffer_count: 1,
    ..Default::default()
  };
  let cmd_buf = device.allocate_command_buffers(&alloc_info)?[0];

  let mut completion = TimelineFence::new(&device, queue)?;

  let sampler = resources::create_sampler(&device)?;
  let graphics = pipeline::create_graphics_pipeline(&device, bundle.format)?;
  let descriptor_pool = pipeline::create_descriptor_pool(&device)?;
  let graphics_set = pipeline::allocate_set(&device, descriptor_pool, graphics.set_layout)?;

  // Shader-read checkerboard texture, staged through an upload buffer.
  let texture = resources::create_texture(
    &device,
    &mem_props,
    TextureDesc {
      width: TEXTURE_WIDTH,
      height: TEXTURE_HEIGHT,
      bytes_per_texel: TEXTURE_PIXEL_SIZE,
      usage: TextureUsage::SHADER_READ | TextureUsage::COPY_DST,
    },
    vk::Format::R8G8B8A8_UNORM,
  )?;
  let pixels = checkerboard();
  let staging = resources::create_buffer(
    &device,
    &mem_props,
    pixels.len() as u64,
    vk::BufferUsageFlags::TRANSFER_SRC,
    MemoryTier::CpuUpload,
  )?;
  {
    let mut mapping = Mapping::new(&device, staging.memory, staging.size)?;
    mapping.write(&pixels)?;
  }
  pipeline::write_sampled_image(&device, graphics_set, texture.view, sampler);

  // Vertex data lives in an upload-tier buffer; a handful of vertices does
  // not justify a device-local copy.
  let aspect = options.size.width as f32 / options.size.height as f32;
  let vertices = triangle_vertices(aspect);
  let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);
  let vertex_buffer = resources::create_buffer(
    &device,
    &mem_props,
    vertex_bytes.len() as u64,
    vk::BufferUsageFlags::VERTEX_BUFFER,
    MemoryTier::CpuUpload,
  )?;
  {
    let mut mapping = Mapping::new(&device, vertex_buffer.memory, vertex_buffer.size)?;
    mapping.write(vertex_bytes)?;
  }

  // Negotiate the vendor extension; everything compute exists only when a
  // context came back.
  let mut provider = GfxExtLibrary::new(device.handle());
  let vendor = match try_activate(&mut provider, options.required_extension) {
    Some(active) => {
      let desc = TextureDesc {
        width: STORAGE_WIDTH,
        height: STORAGE_HEIGHT,
        bytes_per_texel: STORAGE_PIXEL_SIZE,
        usage: TextureUsage::STORAGE_ATOMICS | TextureUsage::COPY_SRC,
      };
      // Allocation goes through the extension's committed-resource entry
      // point: the emulated-atomics capability is a resource-description
      // flag the standard image path cannot express.
      let raw_desc = RawImageDesc {
        width: desc.width,
        height: desc.height,
        format: vk::Format::R32G32_UINT.as_raw(),
        usage: (vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC).as_raw(),
        emulated_wide_atomics: 1,
      };
      let (image, memory) = provider
        .create_committed_image(&active.context, &raw_desc)
        .context("create storage image through the vendor extension")?;
      let view = resources::create_image_view(&device, image, vk::Format::R32G32_UINT)?;
      let storage = Texture { image, memory, view, desc };

      let readback = resources::create_buffer(
        &device,
        &mem_props,
        desc.byte_size(),
        vk::BufferUsageFlags::TRANSFER_DST,
        MemoryTier::CpuReadback,
      )?;

      let blob = fs::read(&options.compute_shader).with_context(|| {
        format!("read compute shader blob {}", options.compute_shader.display())
      })?;
      let compute = pipeline::create_compute_pipeline(&device, &blob)?;
      let compute_set = pipeline::allocate_set(&device, descriptor_pool, compute.set_layout)?;
      pipeline::write_storage_image(&device, compute_set, view);

      Some(VendorState { provider, active, storage, readback, compute, compute_set })
    }
    None => None,
  };

  // One-time setup submission: move the texture through its upload states
  // and put the storage image into its initial unordered-access state.
  let begin = vk::CommandBufferBeginInfo {
    s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
    ..Default::default()
  };
  device.begin_command_buffer(cmd_buf, &begin)?;

  record_raw_barrier(
    &device,
    cmd_buf,
    texture.image,
    vk::ImageLayout::UNDEFINED,
    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    vk::AccessFlags::empty(),
    vk::AccessFlags::TRANSFER_WRITE,
  );
  let region = vk::BufferImageCopy {
    buffer_offset: 0,
    buffer_row_length: 0,
    buffer_image_height: 0,
    image_subresource: vk::ImageSubresourceLayers {
      aspect_mask: vk::ImageAspectFlags::COLOR,
      mip_level: 0,
      base_array_layer: 0,
      layer_count: 1,
    },
    image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
    image_extent: vk::Extent3D { width: TEXTURE_WIDTH, height: TEXTURE_HEIGHT, depth: 1 },
  };
  device.cmd_copy_buffer_to_image(
    cmd_buf,
    staging.buffer,
    texture.image,
    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    std::slice::from_ref(&region),
  );
  record_raw_barrier(
    &device,
    cmd_buf,
    texture.image,
    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    vk::AccessFlags::TRANSFER_WRITE,
    vk::AccessFlags::SHADER_READ,
  );
  if let Some(v) = &vendor {
    record_raw_barrier(
      &device,
      cmd_buf,
      v.storage.image,
      vk::ImageLayout::UNDEFINED,
      layout_for(ResourceState::UnorderedAccess),
      vk::AccessFlags::empty(),
      access_for(ResourceState::UnorderedAccess),
    );
  }
  device.end_command_buffer(cmd_buf)?;

  let submit = vk::SubmitInfo {
    s_type: vk::StructureType::SUBMIT_INFO,
    command_buffer_count: 1,
    p_command_buffers: &cmd_buf,
    ..Default::default()
  };
  device
    .queue_submit(queue, std::slice::from_ref(&submit), vk::Fence::null())
    .context("submit setup commands")?;

  // Wait for the upload to retire before the staging buffer goes away and
  // before the first frame records.
  completion.signal(1)?;
  completion.block_until(1)?;

  device.destroy_buffer(staging.buffer, None);
  device.free_memory(staging.memory, None);

  let mut backend = VkBackend {
    _entry: entry,
    instance,
    debug,
    surface_loader,
    surface,
    phys,
    device,
    queue_family,
    queue,
    swapchain_loader,
    swapchain: bundle.swapchain,
    format: bundle.format,
    extent: bundle.extent,
    slots,
    current_slot: 0,
    acquire_semaphore,
    render_done_semaphore,
    pending_acquire: false,
    cmd_pool,
    cmd_buf,
    completion,
    graphics,
    descriptor_pool,
    graphics_set,
    sampler,
    texture,
    vertex_buffer,
    vendor,
  };

  // The surface chooses the first slot, not the application.
  backend.acquire_slot()?;
  Ok(backend)
}

fn record_raw_barrier(
  device: &ash::Device,
  cmd_buf: vk::CommandBuffer,
  image: vk::Image,
  old_layout: vk::ImageLayout,
  new_layout: vk::ImageLayout,
  src_access: vk::AccessFlags,
  dst_access: vk::AccessFlags,
) {
  let barrier = vk::ImageMemoryBarrier {
    s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
    src_access_mask: src_access,
    dst_access_mask: dst_access,
    old_layout,
    new_layout,
    src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
    dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
    image,
    subresource_range: color_subresource_range(),
    ..Default::default()
  };
  // Conservative full-pipeline scopes; this host never overlaps GPU work.
  unsafe {
    device.cmd_pipeline_barrier(
      cmd_buf,
      vk::PipelineStageFlags::ALL_COMMANDS,
      vk::PipelineStageFlags::ALL_COMMANDS,
      vk::DependencyFlags::empty(),
      &[],
      &[],
      std::slice::from_ref(&barrier),
    );
  }
}

impl VkBackend {
  pub fn new(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    options: &VkBackendOptions,
  ) -> Result<Self> {
    unsafe {
      let backend = build_backend(window, display, options)?;
      info!(
        "vulkan surface ready ({}x{}, fmt 0x{:x}, {} slots, atomics {})",
        backend.extent.width,
        backend.extent.height,
        backend.format.as_raw(),
        backend.slots.len(),
        if backend.vendor.is_some() { "on" } else { "off" },
      );
      Ok(backend)
    }
  }

  /// Version the negotiator actually selected, when a context is active.
  pub fn active_extension_version(&self) -> Option<ExtensionVersion> {
    self.vendor.as_ref().map(|v| v.active.version)
  }

  fn record_state_barrier(&self, image: vk::Image, from: ResourceState, to: ResourceState) {
    record_raw_barrier(
      &self.device,
      self.cmd_buf,
      image,
      layout_for(from),
      layout_for(to),
      access_for(from),
      access_for(to),
    );
  }
}

impl FrameBackend for VkBackend {
  type Fence = TimelineFence;

  fn slot_count(&self) -> usize {
    self.slots.len()
  }

  fn current_slot(&self) -> usize {
    self.current_slot
  }

  fn acquire_slot(&mut self) -> Result<usize> {
    let (index, _suboptimal) = unsafe {
      self.swapchain_loader.acquire_next_image(
        self.swapchain,
        u64::MAX,
        self.acquire_semaphore,
        vk::Fence::null(),
      )
    }
    .context("acquire_next_image")?;
    self.current_slot = index as usize;
    self.pending_acquire = true;
    Ok(self.current_slot)
  }

  fn atomics_enabled(&self) -> bool {
    self.vendor.is_some()
  }

  fn storage_extent(&self) -> RenderSize {
    match &self.vendor {
      Some(v) => RenderSize { width: v.storage.desc.width, height: v.storage.desc.height },
      None => RenderSize { width: STORAGE_WIDTH, height: STORAGE_HEIGHT },
    }
  }

  fn begin_commands(&mut self) -> Result<()> {
    unsafe {
      self
        .device
        .reset_command_pool(self.cmd_pool, vk::CommandPoolResetFlags::empty())
        .context("reset command allocator")?;
      let begin = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        ..Default::default()
      };
      self.device.begin_command_buffer(self.cmd_buf, &begin).context("begin command stream")?;
      // Starting pipeline configuration for the stream.
      self.device.cmd_bind_pipeline(
        self.cmd_buf,
        vk::PipelineBindPoint::GRAPHICS,
        self.graphics.pipeline,
      );
    }
    Ok(())
  }

  fn close_commands(&mut self) -> Result<()> {
    unsafe { self.device.end_command_buffer(self.cmd_buf) }.context("close command stream")
  }

  fn submit(&mut self) -> Result<()> {
    let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    let wait_count = u32::from(self.pending_acquire);
    let submit = vk::SubmitInfo {
      s_type: vk::StructureType::SUBMIT_INFO,
      wait_semaphore_count: wait_count,
      p_wait_semaphores: &self.acquire_semaphore,
      p_wait_dst_stage_mask: &wait_stage,
      command_buffer_count: 1,
      p_command_buffers: &self.cmd_buf,
      signal_semaphore_count: 1,
      p_signal_semaphores: &self.render_done_semaphore,
      ..Default::default()
    };
    unsafe {
      self
        .device
        .queue_submit(self.queue, std::slice::from_ref(&submit), vk::Fence::null())
    }
    .context("queue_submit")?;
    self.pending_acquire = false;
    Ok(())
  }

  fn present(&mut self, sync_interval: u32) -> Result<()> {
    ensure!(sync_interval == 1, "only vsync-locked presentation is supported");
    let image_index = self.current_slot as u32;
    let present = vk::PresentInfoKHR {
      s_type: vk::StructureType::PRESENT_INFO_KHR,
      wait_semaphore_count: 1,
      p_wait_semaphores: &self.render_done_semaphore,
      swapchain_count: 1,
      p_swapchains: &self.swapchain,
      p_image_indices: &image_index,
      ..Default::default()
    };
    unsafe { self.swapchain_loader.queue_present(self.queue, &present) }
      .context("queue_present")?;
    Ok(())
  }

  fn bind_graphics(&mut self) -> Result<()> {
    let viewport = vk::Viewport {
      x: 0.0,
      y: 0.0,
      width: self.extent.width as f32,
      height: self.extent.height as f32,
      min_depth: 0.0,
      max_depth: 1.0,
    };
    let scissor = vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: self.extent };
    unsafe {
      self.device.cmd_set_viewport(self.cmd_buf, 0, std::slice::from_ref(&viewport));
      self.device.cmd_set_scissor(self.cmd_buf, 0, std::slice::from_ref(&scissor));
      self.device.cmd_bind_descriptor_sets(
        self.cmd_buf,
        vk::PipelineBindPoint::GRAPHICS,
        self.graphics.layout,
        0,
        std::slice::from_ref(&self.graphics_set),
        &[],
      );
    }
    Ok(())
  }

  fn transition_slot(&mut self, slot: usize, from: ResourceState, to: ResourceState) -> Result<()> {
    ensure!(slot < self.slots.len(), "slot {slot} out of range");
    self.record_state_barrier(self.slots[slot].image, from, to);
    Ok(())
  }

  fn clear_render_target(&mut self, slot: usize, color: [f32; 4]) -> Result<()> {
    ensure!(slot < self.slots.len(), "slot {slot} out of range");
    let attachment = vk::RenderingAttachmentInfo {
      s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
      image_view: self.slots[slot].view,
      image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
      load_op: vk::AttachmentLoadOp::CLEAR,
      store_op: vk::AttachmentStoreOp::STORE,
      clear_value: vk::ClearValue { color: vk::ClearColorValue { float32: color } },
      ..Default::default()
    };
    let rendering = vk::RenderingInfo {
      s_type: vk::StructureType::RENDERING_INFO,
      render_area: vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: self.extent },
      layer_count: 1,
      color_attachment_count: 1,
      p_color_attachments: &attachment,
      ..Default::default()
    };
    // The clear rides the attachment load; rendering stays open until the
    // draw ends it.
    unsafe { self.device.cmd_begin_rendering(self.cmd_buf, &rendering) };
    Ok(())
  }

  fn draw_triangle(&mut self) -> Result<()> {
    unsafe {
      self.device.cmd_bind_vertex_buffers(
        self.cmd_buf,
        0,
        std::slice::from_ref(&self.vertex_buffer.buffer),
        &[0],
      );
      self.device.cmd_draw(self.cmd_buf, 3, 1, 0, 0);
      self.device.cmd_end_rendering(self.cmd_buf);
    }
    Ok(())
  }

  fn bind_compute(&mut self) -> Result<()> {
    let vendor = self.vendor.as_ref().context("compute recorded without an active extension")?;
    unsafe {
      self.device.cmd_bind_pipeline(
        self.cmd_buf,
        vk::PipelineBindPoint::COMPUTE,
        vendor.compute.pipeline,
      );
      self.device.cmd_bind_descriptor_sets(
        self.cmd_buf,
        vk::PipelineBindPoint::COMPUTE,
        vendor.compute.layout,
        0,
        std::slice::from_ref(&vendor.compute_set),
        &[],
      );
    }
    Ok(())
  }

  fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) -> Result<()> {
    unsafe { self.device.cmd_dispatch(self.cmd_buf, groups_x, groups_y, groups_z) };
    Ok(())
  }

  fn transition_storage(&mut self, from: ResourceState, to: ResourceState) -> Result<()> {
    let vendor = self.vendor.as_ref().context("no storage image without an active extension")?;
    self.record_state_barrier(vendor.storage.image, from, to);
    Ok(())
  }

  fn copy_storage_to_readback(&mut self) -> Result<()> {
    let vendor = self.vendor.as_ref().context("no readback without an active extension")?;
    // The buffer layout matches the image's exact tiling footprint: tight
    // rows of width x 8 bytes.
    let region = vk::BufferImageCopy {
      buffer_offset: 0,
      buffer_row_length: vendor.storage.desc.width,
      buffer_image_height: vendor.storage.desc.height,
      image_subresource: vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
      },
      image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
      image_extent: vk::Extent3D {
        width: vendor.storage.desc.width,
        height: vendor.storage.desc.height,
        depth: 1,
      },
    };
    unsafe {
      self.device.cmd_copy_image_to_buffer(
        self.cmd_buf,
        vendor.storage.image,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        vendor.readback.buffer,
        std::slice::from_ref(&region),
      );
    }
    Ok(())
  }

  fn fence_mut(&mut self) -> &mut TimelineFence {
    &mut self.completion
  }

  fn read_readback(&mut self, out: &mut [u64]) -> Result<()> {
    let vendor = self.vendor.as_ref().context("no readback without an active extension")?;
    let mapping = Mapping::new(&self.device, vendor.readback.memory, vendor.readback.size)?;
    mapping.read_words(out)
  }
}

impl Drop for VkBackend {
  fn drop(&mut self) {
    unsafe {
      let d = &self.device;
      d.device_wait_idle().ok();

      // Reverse dependency order: compute and vendor state first, then the
      // graphics resources, then the presentation plumbing.
      if let Some(mut v) = self.vendor.take() {
        d.destroy_pipeline(v.compute.pipeline, None);
        d.destroy_pipeline_layout(v.compute.layout, None);
        d.destroy_descriptor_set_layout(v.compute.set_layout, None);
        d.destroy_image_view(v.storage.view, None);
        d.destroy_image(v.storage.image, None);
        d.free_memory(v.storage.memory, None);
        d.destroy_buffer(v.readback.buffer, None);
        d.free_memory(v.readback.memory, None);
        deactivate(&mut v.provider, &mut v.active);
      }

      d.destroy_pipeline(self.graphics.pipeline, None);
      d.destroy_pipeline_layout(self.graphics.layout, None);
      d.destroy_descriptor_set_layout(self.graphics.set_layout, None);
      d.destroy_descriptor_pool(self.descriptor_pool, None);
      d.destroy_sampler(self.sampler, None);

      d.destroy_image_view(self.texture.view, None);
      d.destroy_image(self.texture.image, None);
      d.free_memory(self.texture.memory, None);
      d.destroy_buffer(self.vertex_buffer.buffer, None);
      d.free_memory(self.vertex_buffer.memory, None);

      d.destroy_semaphore(self.acquire_semaphore, None);
      d.destroy_semaphore(self.render_done_semaphore, None);
      self.completion.destroy();
      d.destroy_command_pool(self.cmd_pool, None);

      for slot in &self.slots {
        d.destroy_image_view(slot.view, None);
      }
      self.swapchain_loader.destroy_swapchain(self.swapchain, None);
      d.destroy_device(None);

      self.surface_loader.destroy_surface(self.surface, None);
      if let Some((loader, messenger)) = self.debug.take() {
        loader.destroy_debug_utils_messenger(messenger, None);
      }
      self.instance.destroy_instance(None);
    }
  }
}
