//! Pipeline state and descriptor tables for the two stages the host
//! records: the textured-triangle graphics pass and the wide-atomics
//! compute pass.

use std::ffi::{c_void, CStr};
use std::io::Cursor;

use anyhow::{Context, Result};
use ash::util::read_spv;
use ash::vk;

use glint_render::content::Vertex;

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

const VERT_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.vert.spv"));
const FRAG_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.frag.spv"));

pub struct GraphicsPipeline {
  pub pipeline: vk::Pipeline,
  pub layout: vk::PipelineLayout,
  pub set_layout: vk::DescriptorSetLayout,
}

pub struct ComputePipeline {
  pub pipeline: vk::Pipeline,
  pub layout: vk::PipelineLayout,
  pub set_layout: vk::DescriptorSetLayout,
}

unsafe fn shader_module(device: &ash::Device, spv: &[u8], what: &str) -> Result<vk::ShaderModule> {
  let words = read_spv(&mut Cursor::new(spv)).with_context(|| format!("decode {what}"))?;
  let create_info = vk::ShaderModuleCreateInfo {
    s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
    code_size: words.len() * 4,
    p_code: words.as_ptr(),
    ..Default::default()
  };
  Ok(device.create_shader_module(&create_info, None).with_context(|| format!("create {what}"))?)
}

unsafe fn set_layout(
  device: &ash::Device,
  descriptor_type: vk::DescriptorType,
  stages: vk::ShaderStageFlags,
) -> Result<vk::DescriptorSetLayout> {
  let binding = vk::DescriptorSetLayoutBinding {
    binding: 0,
    descriptor_type,
    descriptor_count: 1,
    stage_flags: stages,
    ..Default::default()
  };
  let create_info = vk::DescriptorSetLayoutCreateInfo {
    s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
    binding_count: 1,
    p_bindings: &binding,
    ..Default::default()
  };
  Ok(device.create_descriptor_set_layout(&create_info, None)?)
}

unsafe fn pipeline_layout(
  device: &ash::Device,
  set_layout: vk::DescriptorSetLayout,
) -> Result<vk::PipelineLayout> {
  let create_info = vk::PipelineLayoutCreateInfo {
    s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
    set_layout_count: 1,
    p_set_layouts: &set_layout,
    ..Default::default()
  };
  Ok(device.create_pipeline_layout(&create_info, None)?)
}

/// Graphics pipeline targeting the swapchain format through dynamic
/// rendering: one vertex buffer (pos + uv), one sampled texture, no depth,
/// no blending. Viewport and scissor are dynamic and recorded per frame.
pub unsafe fn create_graphics_pipeline(
  device: &ash::Device,
  color_format: vk::Format,
) -> Result<GraphicsPipeline> {
  let set_layout = set_layout(
    device,
    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    vk::ShaderStageFlags::FRAGMENT,
  )?;
  let layout = pipeline_layout(device, set_layout)?;

  let vs = shader_module(device, VERT_SPV, "vertex shader")?;
  let fs = shader_module(device, FRAG_SPV, "fragment shader")?;

  let stages = [
    vk::PipelineShaderStageCreateInfo {
      s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
      stage: vk::ShaderStageFlags::VERTEX,
      module: vs,
      p_name: ENTRY_POINT.as_ptr(),
      ..Default::default()
    },
    vk::PipelineShaderStageCreateInfo {
      s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
      stage: vk::ShaderStageFlags::FRAGMENT,
      module: fs,
      p_name: ENTRY_POINT.as_ptr(),
      ..Default::default()
    },
  ];

  let binding = vk::VertexInputBindingDescription {
    binding: 0,
    stride: std::mem::size_of::<Vertex>() as u32,
    input_rate: vk::VertexInputRate::VERTEX,
  };
  let attributes = [
    vk::VertexInputAttributeDescription {
      location: 0,
      binding: 0,
      format: vk::Format::R32G32B32_SFLOAT,
      offset: 0,
    },
    vk::VertexInputAttributeDescription {
      location: 1,
      binding: 0,
      format: vk::Format::R32G32_SFLOAT,
      offset: 12,
    },
  ];
  let vertex_input = vk::PipelineVertexInputStateCreateInfo {
    s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
    vertex_binding_description_count: 1,
    p_vertex_binding_descriptions: &binding,
    vertex_attribute_description_count: attributes.len() as u32,
    p_vertex_attribute_descriptions: attributes.as_ptr(),
    ..Default::default()
  };

  let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
    s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
    topology: vk::PrimitiveTopology::TRIANGLE_LIST,
    ..Default::default()
  };

  let viewport_state = vk::PipelineViewportStateCreateInfo {
    s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
    viewport_count: 1,
    scissor_count: 1,
    ..Default::default()
  };

  let rasterization = vk::PipelineRasterizationStateCreateInfo {
    s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
    polygon_mode: vk::PolygonMode::FILL,
    cull_mode: vk::CullModeFlags::NONE,
    front_face: vk::FrontFace::CLOCKWISE,
    line_width: 1.0,
    ..Default::default()
  };

  let multisample = vk::PipelineMultisampleStateCreateInfo {
    s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
    rasterization_samples: vk::SampleCountFlags::TYPE_1,
    ..Default::default()
  };

  let blend_attachment = vk::PipelineColorBlendAttachmentState {
    blend_enable: vk::FALSE,
    color_write_mask: vk::ColorComponentFlags::RGBA,
    ..Default::default()
  };
  let blend = vk::PipelineColorBlendStateCreateInfo {
    s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
    attachment_count: 1,
    p_attachments: &blend_attachment,
    ..Default::default()
  };

  let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
  let dynamic = vk::PipelineDynamicStateCreateInfo {
    s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
    dynamic_state_count: dynamic_states.len() as u32,
    p_dynamic_states: dynamic_states.as_ptr(),
    ..Default::default()
  };

  let rendering_info = vk::PipelineRenderingCreateInfo {
    s_type: vk::StructureType::PIPELINE_RENDERING_CREATE_INFO,
    color_attachment_count: 1,
    p_color_attachment_formats: &color_format,
    ..Default::default()
  };

  let create_info = vk::GraphicsPipelineCreateInfo {
    s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
    p_next: &rendering_info as *const _ as *const c_void,
    stage_count: stages.len() as u32,
    p_stages: stages.as_ptr(),
    p_vertex_input_state: &vertex_input,
    p_input_assembly_state: &input_assembly,
    p_viewport_state: &viewport_state,
    p_rasterization_state: &rasterization,
    p_multisample_state: &multisample,
    p_color_blend_state: &blend,
    p_dynamic_state: &dynamic,
    layout,
    ..Default::default()
  };

  let pipeline = device
    .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&create_info), None)
    .map_err(|(_, e)| e)
    .context("create graphics pipeline")?[0];

  device.destroy_shader_module(vs, None);
  device.destroy_shader_module(fs, None);

  Ok(GraphicsPipeline { pipeline, layout, set_layout })
}

/// Compute pipeline from a precompiled opaque blob. One storage-image
/// binding; the workgroup size is baked into the blob.
pub unsafe fn create_compute_pipeline(device: &ash::Device, blob: &[u8]) -> Result<ComputePipeline> {
  let set_layout = set_layout(
    device,
    vk::DescriptorType::STORAGE_IMAGE,
    vk::ShaderStageFlags::COMPUTE,
  )?;
  let layout = pipeline_layout(device, set_layout)?;
  let cs = shader_module(device, blob, "compute shader")?;

  let create_info = vk::ComputePipelineCreateInfo {
    s_type: vk::StructureType::COMPUTE_PIPELINE_CREATE_INFO,
    stage: vk::PipelineShaderStageCreateInfo {
      s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
      stage: vk::ShaderStageFlags::COMPUTE,
      module: cs,
      p_name: ENTRY_POINT.as_ptr(),
      ..Default::default()
    },
    layout,
    ..Default::default()
  };

  let pipeline = device
    .create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&create_info), None)
    .map_err(|(_, e)| e)
    .context("create compute pipeline")?[0];

  device.destroy_shader_module(cs, None);

  Ok(ComputePipeline { pipeline, layout, set_layout })
}

/// Descriptor pool sized for the host's two tables: the graphics sampler
/// table and the compute storage table.
pub unsafe fn create_descriptor_pool(device: &ash::Device) -> Result<vk::DescriptorPool> {
  let sizes = [
    vk::DescriptorPoolSize {
      ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
      descriptor_count: 1,
    },
    vk::DescriptorPoolSize { ty: vk::DescriptorType::STORAGE_IMAGE, descriptor_count: 1 },
  ];
  let create_info = vk::DescriptorPoolCreateInfo {
    s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
    max_sets: 2,
    pool_size_count: sizes.len() as u32,
    p_pool_sizes: sizes.as_ptr(),
    ..Default::default()
  };
  Ok(device.create_descriptor_pool(&create_info, None).context("create descriptor pool")?)
}

pub unsafe fn allocate_set(
  device: &ash::Device,
  pool: vk::DescriptorPool,
  layout: vk::DescriptorSetLayout,
) -> Result<vk::DescriptorSet> {
  let alloc_info = vk::DescriptorSetAllocateInfo {
    s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
    descriptor_pool: pool,
    descriptor_set_count: 1,
    p_set_layouts: &layout,
    ..Default::default()
  };
  Ok(device.allocate_descriptor_sets(&alloc_info).context("allocate descriptor set")?[0])
}

pub unsafe fn write_sampled_image(
  device: &ash::Device,
  set: vk::DescriptorSet,
  view: vk::ImageView,
  sampler: vk::Sampler,
) {
  let image_info = vk::DescriptorImageInfo {
    sampler,
    image_view: view,
    image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
  };
  let write = vk::WriteDescriptorSet {
    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
    dst_set: set,
    dst_binding: 0,
    descriptor_count: 1,
    descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    p_image_info: &image_info,
    ..Default::default()
  };
  device.update_descriptor_sets(std::slice::from_ref(&write), &[]);
}

pub unsafe fn write_storage_image(device: &ash::Device, set: vk::DescriptorSet, view: vk::ImageView) {
  let image_info = vk::DescriptorImageInfo {
    sampler: vk::Sampler::null(),
    image_view: view,
    image_layout: vk::ImageLayout::GENERAL,
  };
  let write = vk::WriteDescriptorSet {
    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
    dst_set: set,
    dst_binding: 0,
    descriptor_count: 1,
    descriptor_type: vk::DescriptorType::STORAGE_IMAGE,
    p_image_info: &image_info,
    ..Default::default()
  };
  device.update_descriptor_sets(std::slice::from_ref(&write), &[]);
}
