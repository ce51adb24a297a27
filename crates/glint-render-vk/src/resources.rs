//! GPU-visible allocations and their views, plus the scoped CPU mapping
//! used for upload and readback. Every creation failure is a fatal
//! initialization error for the host; nothing here retries.

use std::ffi::c_void;

use anyhow::{ensure, Context, Result};
use ash::vk;
use glint_render::{MemoryTier, ResourceState, TextureDesc, TextureUsage};

pub struct Texture {
  pub image: vk::Image,
  pub memory: vk::DeviceMemory,
  pub view: vk::ImageView,
  pub desc: TextureDesc,
}

pub struct Buffer {
  pub buffer: vk::Buffer,
  pub memory: vk::DeviceMemory,
  pub size: u64,
}

/// Image layout backing each declared resource state.
pub fn layout_for(state: ResourceState) -> vk::ImageLayout {
  match state {
    ResourceState::PresentSource => vk::ImageLayout::PRESENT_SRC_KHR,
    ResourceState::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    ResourceState::ShaderRead => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    ResourceState::UnorderedAccess => vk::ImageLayout::GENERAL,
    ResourceState::CopySource => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    ResourceState::CopyDest => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
  }
}

/// Memory accesses that must be visible before leaving / after entering a
/// state.
pub fn access_for(state: ResourceState) -> vk::AccessFlags {
  match state {
    ResourceState::PresentSource => vk::AccessFlags::empty(),
    ResourceState::RenderTarget => {
      vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
    }
    ResourceState::ShaderRead => vk::AccessFlags::SHADER_READ,
    ResourceState::UnorderedAccess => {
      vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE
    }
    ResourceState::CopySource => vk::AccessFlags::TRANSFER_READ,
    ResourceState::CopyDest => vk::AccessFlags::TRANSFER_WRITE,
  }
}

pub fn memory_flags_for(tier: MemoryTier) -> vk::MemoryPropertyFlags {
  match tier {
    MemoryTier::GpuOnly => vk::MemoryPropertyFlags::DEVICE_LOCAL,
    MemoryTier::CpuUpload | MemoryTier::CpuReadback => {
      vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
    }
  }
}

fn image_usage_for(usage: TextureUsage) -> vk::ImageUsageFlags {
  let mut flags = vk::ImageUsageFlags::empty();
  if usage.contains(TextureUsage::RENDER_TARGET) {
    flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
  }
  if usage.contains(TextureUsage::SHADER_READ) {
    flags |= vk::ImageUsageFlags::SAMPLED;
  }
  if usage.contains(TextureUsage::STORAGE_ATOMICS) {
    flags |= vk::ImageUsageFlags::STORAGE;
  }
  if usage.contains(TextureUsage::COPY_SRC) {
    flags |= vk::ImageUsageFlags::TRANSFER_SRC;
  }
  if usage.contains(TextureUsage::COPY_DST) {
    flags |= vk::ImageUsageFlags::TRANSFER_DST;
  }
  flags
}

pub fn find_memory_type(
  mem_props: &vk::PhysicalDeviceMemoryProperties,
  type_bits: u32,
  required: vk::MemoryPropertyFlags,
) -> Result<u32> {
  for i in 0..mem_props.memory_type_count {
    let supported = type_bits & (1 << i) != 0;
    let adequate = mem_props.memory_types[i as usize].property_flags.contains(required);
    if supported && adequate {
      return Ok(i);
    }
  }
  anyhow::bail!("no memory type supports {required:?}")
}

pub unsafe fn create_buffer(
  device: &ash::Device,
  mem_props: &vk::PhysicalDeviceMemoryProperties,
  size: u64,
  usage: vk::BufferUsageFlags,
  tier: MemoryTier,
) -> Result<Buffer> {
  let buffer_info = vk::BufferCreateInfo {
    s_type: vk::StructureType::BUFFER_CREATE_INFO,
    size,
    usage,
    sharing_mode: vk::SharingMode::EXCLUSIVE,
    ..Default::default()
  };
  let buffer = device.create_buffer(&buffer_info, None).context("create buffer")?;

  let requirements = device.get_buffer_memory_requirements(buffer);
  let memory_type = find_memory_type(
    mem_props,
    requirements.memory_type_bits,
    memory_flags_for(tier),
  )?;
  let alloc_info = vk::MemoryAllocateInfo {
    s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
    allocation_size: requirements.size,
    memory_type_index: memory_type,
    ..Default::default()
  };
  let memory = device.allocate_memory(&alloc_info, None).context("allocate buffer memory")?;
  device.bind_buffer_memory(buffer, memory, 0).context("bind buffer memory")?;

  Ok(Buffer { buffer, memory, size })
}

pub unsafe fn create_image_view(
  device: &ash::Device,
  image: vk::Image,
  format: vk::Format,
) -> Result<vk::ImageView> {
  let view_info = vk::ImageViewCreateInfo {
    s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
    image,
    view_type: vk::ImageViewType::TYPE_2D,
    format,
    subresource_range: color_subresource_range(),
    ..Default::default()
  };
  Ok(device.create_image_view(&view_info, None).context("create image view")?)
}

pub fn color_subresource_range() -> vk::ImageSubresourceRange {
  vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
  }
}

/// Device-local 2-D image plus its view, in `initial_layout` UNDEFINED; the
/// caller records the transition into the first real state.
pub unsafe fn create_texture(
  device: &ash::Device,
  mem_props: &vk::PhysicalDeviceMemoryProperties,
  desc: TextureDesc,
  format: vk::Format,
) -> Result<Texture> {
  let image_info = vk::ImageCreateInfo {
    s_type: vk::StructureType::IMAGE_CREATE_INFO,
    image_type: vk::ImageType::TYPE_2D,
    format,
    extent: vk::Extent3D { width: desc.width, height: desc.height, depth: 1 },
    mip_levels: 1,
    array_layers: 1,
    samples: vk::SampleCountFlags::TYPE_1,
    tiling: vk::ImageTiling::OPTIMAL,
    usage: image_usage_for(desc.usage),
    sharing_mode: vk::SharingMode::EXCLUSIVE,
    initial_layout: vk::ImageLayout::UNDEFINED,
    ..Default::default()
  };
  let image = device.create_image(&image_info, None).context("create image")?;

  let requirements = device.get_image_memory_requirements(image);
  let memory_type = find_memory_type(
    mem_props,
    requirements.memory_type_bits,
    memory_flags_for(MemoryTier::GpuOnly),
  )?;
  let alloc_info = vk::MemoryAllocateInfo {
    s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
    allocation_size: requirements.size,
    memory_type_index: memory_type,
    ..Default::default()
  };
  let memory = device.allocate_memory(&alloc_info, None).context("allocate image memory")?;
  device.bind_image_memory(image, memory, 0).context("bind image memory")?;

  let view = create_image_view(device, image, format)?;
  Ok(Texture { image, memory, view, desc })
}

/// The original's static sampler: point filtering, border addressing with a
/// transparent black border.
pub unsafe fn create_sampler(device: &ash::Device) -> Result<vk::Sampler> {
  let sampler_info = vk::SamplerCreateInfo {
    s_type: vk::StructureType::SAMPLER_CREATE_INFO,
    mag_filter: vk::Filter::NEAREST,
    min_filter: vk::Filter::NEAREST,
    mipmap_mode: vk::SamplerMipmapMode::NEAREST,
    address_mode_u: vk::SamplerAddressMode::CLAMP_TO_BORDER,
    address_mode_v: vk::SamplerAddressMode::CLAMP_TO_BORDER,
    address_mode_w: vk::SamplerAddressMode::CLAMP_TO_BORDER,
    border_color: vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
    compare_op: vk::CompareOp::NEVER,
    max_lod: vk::LOD_CLAMP_NONE,
    ..Default::default()
  };
  Ok(device.create_sampler(&sampler_info, None).context("create sampler")?)
}

/// Scoped CPU mapping of a host-visible allocation. Unmaps on every exit
/// path, so a mapping can never stay open across a queue submission.
pub struct Mapping<'a> {
  device: &'a ash::Device,
  memory: vk::DeviceMemory,
  ptr: *mut c_void,
  size: usize,
}

impl<'a> Mapping<'a> {
  pub fn new(device: &'a ash::Device, memory: vk::DeviceMemory, size: u64) -> Result<Self> {
    let ptr = unsafe { device.map_memory(memory, 0, size, vk::MemoryMapFlags::empty()) }
      .context("map host-visible memory")?;
    Ok(Self { device, memory, ptr, size: size as usize })
  }

  pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
    ensure!(bytes.len() <= self.size, "write of {} bytes into {}-byte mapping", bytes.len(), self.size);
    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.cast::<u8>(), bytes.len()) };
    Ok(())
  }

  pub fn read_words(&self, out: &mut [u64]) -> Result<()> {
    ensure!(out.len() * 8 <= self.size, "read of {} words from {}-byte mapping", out.len(), self.size);
    unsafe { std::ptr::copy_nonoverlapping(self.ptr.cast::<u64>(), out.as_mut_ptr(), out.len()) };
    Ok(())
  }
}

impl Drop for Mapping<'_> {
  fn drop(&mut self) {
    unsafe { self.device.unmap_memory(self.memory) };
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn every_state_maps_to_a_distinct_layout() {
    let states = [
      ResourceState::PresentSource,
      ResourceState::RenderTarget,
      ResourceState::ShaderRead,
      ResourceState::UnorderedAccess,
      ResourceState::CopySource,
      ResourceState::CopyDest,
    ];
    let mut layouts: Vec<_> = states.iter().map(|&s| layout_for(s)).collect();
    layouts.sort_by_key(|l| l.as_raw());
    layouts.dedup();
    assert_eq!(layouts.len(), states.len());
  }

  #[test]
  fn host_tiers_are_mappable() {
    for tier in [MemoryTier::CpuUpload, MemoryTier::CpuReadback] {
      assert!(memory_flags_for(tier).contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
    }
    assert!(!memory_flags_for(MemoryTier::GpuOnly).contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
  }

  #[test]
  fn storage_usage_includes_storage_and_copy_source() {
    let usage = image_usage_for(TextureUsage::STORAGE_ATOMICS | TextureUsage::COPY_SRC);
    assert!(usage.contains(vk::ImageUsageFlags::STORAGE));
    assert!(usage.contains(vk::ImageUsageFlags::TRANSFER_SRC));
    assert!(!usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
  }
}
