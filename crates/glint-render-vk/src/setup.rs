//! One-time device and queue bring-up: instance, optional validation
//! messenger, adapter selection, logical device, submission queue and the
//! double-buffered presentation surface. These are one-shot calls with no
//! transient-failure expectation; any error here is fatal to the host.

use std::ffi::{c_void, CStr, CString};

use anyhow::{anyhow, Context, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::RawDisplayHandle;
use tracing::{info, warn};

use glint_render::FRAME_COUNT;

use crate::resources::color_subresource_range;

/// Fixed swapchain pixel format.
pub const SURFACE_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

const VALIDATION_LAYER: &CStr =
  unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

pub unsafe fn create_instance(
  entry: &Entry,
  display_raw: RawDisplayHandle,
  validation: bool,
) -> Result<Instance> {
  let app_name = CString::new("glint").unwrap();

  let app_info = vk::ApplicationInfo {
    s_type: vk::StructureType::APPLICATION_INFO,
    p_application_name: app_name.as_ptr(),
    application_version: 0,
    p_engine_name: app_name.as_ptr(),
    engine_version: 0,
    api_version: vk::API_VERSION_1_3,
    ..Default::default()
  };

  let ext_slice = ash_window::enumerate_required_extensions(display_raw)
    .context("enumerate_required_extensions")?;
  let mut ext_vec = ext_slice.to_vec();
  if validation {
    ext_vec.push(debug_utils::NAME.as_ptr());
  }

  let mut layers = Vec::new();
  if validation {
    layers.push(VALIDATION_LAYER.as_ptr());
  }

  let create_info = vk::InstanceCreateInfo {
    s_type: vk::StructureType::INSTANCE_CREATE_INFO,
    p_application_info: &app_info,
    enabled_layer_count: layers.len() as u32,
    pp_enabled_layer_names: layers.as_ptr(),
    enabled_extension_count: ext_vec.len() as u32,
    pp_enabled_extension_names: ext_vec.as_ptr(),
    ..Default::default()
  };

  Ok(entry.create_instance(&create_info, None)?)
}

unsafe extern "system" fn debug_callback(
  severity: vk::DebugUtilsMessageSeverityFlagsEXT,
  _types: vk::DebugUtilsMessageTypeFlagsEXT,
  data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
  _user_data: *mut c_void,
) -> vk::Bool32 {
  let message = CStr::from_ptr((*data).p_message).to_string_lossy();
  if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
    tracing::error!("[vk] {message}");
  } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
    warn!("[vk] {message}");
  } else {
    tracing::debug!("[vk] {message}");
  }
  vk::FALSE
}

pub unsafe fn create_debug_messenger(
  entry: &Entry,
  instance: &Instance,
) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
  let loader = debug_utils::Instance::new(entry, instance);
  let create_info = vk::DebugUtilsMessengerCreateInfoEXT {
    s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
      | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
      | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
      | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
    pfn_user_callback: Some(debug_callback),
    ..Default::default()
  };
  let messenger = loader
    .create_debug_utils_messenger(&create_info, None)
    .context("create debug messenger")?;
  Ok((loader, messenger))
}

fn adapter_score(device_type: vk::PhysicalDeviceType) -> u32 {
  // Real hardware first; the CPU rasterizer only when asked for.
  match device_type {
    vk::PhysicalDeviceType::DISCRETE_GPU => 4,
    vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
    vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
    vk::PhysicalDeviceType::CPU => 0,
    _ => 1,
  }
}

/// Select a physical adapter and a queue family that can do graphics,
/// compute and presentation on one queue. `software` flips the preference
/// to the CPU rasterizer, the configuration-selectable fallback.
pub unsafe fn pick_adapter(
  instance: &Instance,
  surface_loader: &surface::Instance,
  surface: vk::SurfaceKHR,
  software: bool,
) -> Result<(vk::PhysicalDevice, u32)> {
  let mut best: Option<(vk::PhysicalDevice, u32, u32)> = None;

  for phys in instance.enumerate_physical_devices()? {
    let props = instance.get_physical_device_properties(phys);
    let is_software = props.device_type == vk::PhysicalDeviceType::CPU;
    if software != is_software {
      continue;
    }

    let qprops = instance.get_physical_device_queue_family_properties(phys);
    let family = qprops.iter().enumerate().find_map(|(i, q)| {
      let capable = q
        .queue_flags
        .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE);
      let presentable = surface_loader
        .get_physical_device_surface_support(phys, i as u32, surface)
        .unwrap_or(false);
      (capable && presentable).then_some(i as u32)
    });

    if let Some(family) = family {
      let score = adapter_score(props.device_type);
      if best.map_or(true, |(_, _, s)| score > s) {
        let name = CStr::from_ptr(props.device_name.as_ptr()).to_string_lossy().into_owned();
        info!("adapter candidate: {name} ({:?})", props.device_type);
        best = Some((phys, family, score));
      }
    }
  }

  best
    .map(|(phys, family, _)| (phys, family))
    .ok_or_else(|| anyhow!("no suitable physical device/queue family (software={software})"))
}

/// Logical device with one direct (graphics + compute) queue and the fixed
/// minimum feature level: timeline semaphores and dynamic rendering.
pub unsafe fn create_device(
  instance: &Instance,
  phys: vk::PhysicalDevice,
  queue_family: u32,
) -> Result<ash::Device> {
  let priorities = [1.0_f32];
  let qinfo = vk::DeviceQueueCreateInfo {
    s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
    queue_family_index: queue_family,
    queue_count: 1,
    p_queue_priorities: priorities.as_ptr(),
    ..Default::default()
  };

  let mut features13 = vk::PhysicalDeviceVulkan13Features {
    s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_3_FEATURES,
    dynamic_rendering: vk::TRUE,
    ..Default::default()
  };
  let features12 = vk::PhysicalDeviceVulkan12Features {
    s_type: vk::StructureType::PHYSICAL_DEVICE_VULKAN_1_2_FEATURES,
    p_next: &mut features13 as *mut _ as *mut c_void,
    timeline_semaphore: vk::TRUE,
    ..Default::default()
  };

  let device_exts = [swapchain::NAME.as_ptr()];
  let dinfo = vk::DeviceCreateInfo {
    s_type: vk::StructureType::DEVICE_CREATE_INFO,
    p_next: &features12 as *const _ as *const c_void,
    queue_create_info_count: 1,
    p_queue_create_infos: &qinfo,
    enabled_extension_count: device_exts.len() as u32,
    pp_enabled_extension_names: device_exts.as_ptr(),
    ..Default::default()
  };

  Ok(instance.create_device(phys, &dinfo, None).context("create_device")?)
}

pub struct SwapchainBundle {
  pub swapchain: vk::SwapchainKHR,
  pub format: vk::Format,
  pub extent: vk::Extent2D,
  pub images: Vec<vk::Image>,
  pub views: Vec<vk::ImageView>,
}

fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: vk::Extent2D) -> vk::Extent2D {
  if caps.current_extent.width != u32::MAX {
    caps.current_extent
  } else {
    vk::Extent2D {
      width: want.width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
      height: want.height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
  }
}

/// Presentation surface with the fixed buffer count and pixel format,
/// vsync-locked (FIFO).
pub unsafe fn create_swapchain_bundle(
  device: &ash::Device,
  surface_loader: &surface::Instance,
  swapchain_loader: &swapchain::Device,
  phys: vk::PhysicalDevice,
  surface: vk::SurfaceKHR,
  extent_hint: vk::Extent2D,
) -> Result<SwapchainBundle> {
  let caps = surface_loader.get_physical_device_surface_capabilities(phys, surface)?;
  let formats = surface_loader.get_physical_device_surface_formats(phys, surface)?;

  let surf_format = formats
    .iter()
    .copied()
    .find(|f| f.format == SURFACE_FORMAT)
    .ok_or_else(|| anyhow!("surface does not offer {SURFACE_FORMAT:?}"))?;

  let extent = extent_from_caps(&caps, extent_hint);

  let mut min_count = (FRAME_COUNT as u32).max(caps.min_image_count);
  if caps.max_image_count != 0 {
    min_count = min_count.min(caps.max_image_count);
  }

  let swap_info = vk::SwapchainCreateInfoKHR {
    s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
    surface,
    min_image_count: min_count,
    image_format: surf_format.format,
    image_color_space: surf_format.color_space,
    image_extent: extent,
    image_array_layers: 1,
    image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
    image_sharing_mode: vk::SharingMode::EXCLUSIVE,
    pre_transform: caps.current_transform,
    composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
    present_mode: vk::PresentModeKHR::FIFO,
    clipped: vk::TRUE,
    ..Default::default()
  };

  let swapchain = swapchain_loader.create_swapchain(&swap_info, None)?;
  let images = swapchain_loader.get_swapchain_images(swapchain)?;
  if images.len() < FRAME_COUNT {
    anyhow::bail!("surface produced {} slot(s), need {FRAME_COUNT}", images.len());
  }
  if images.len() != FRAME_COUNT {
    info!("surface produced {} slots (asked for {FRAME_COUNT})", images.len());
  }

  let mut views = Vec::with_capacity(images.len());
  for &img in &images {
    let iv_info = vk::ImageViewCreateInfo {
      s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
      image: img,
      view_type: vk::ImageViewType::TYPE_2D,
      format: surf_format.format,
      subresource_range: color_subresource_range(),
      ..Default::default()
    };
    views.push(device.create_image_view(&iv_info, None)?);
  }

  Ok(SwapchainBundle { swapchain, format: surf_format.format, extent, images, views })
}
