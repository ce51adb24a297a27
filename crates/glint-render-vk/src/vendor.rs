//! FFI binding to the vendor capability library (`gfxext`), resolved at
//! run time with `libloading`. A missing install fails closed: negotiation
//! reports no capability and the host renders without the compute pass.
//!
//! Load and unload touch process-global loader state; nothing else in this
//! host uses the library concurrently.

use std::ffi::c_void;
use std::ptr;

use ash::vk;
use libloading::Library;
use glint_render::{ExtensionVersion, VendorDeviceInfo, VendorError, VendorProvider};

#[cfg(unix)]
const LIBRARY_NAME: &str = "libgfxext.so";
#[cfg(windows)]
const LIBRARY_NAME: &str = "gfxext.dll";

/// Nonzero return codes are vendor-defined failures.
type RawResult = i32;

#[repr(C)]
struct RawDeviceInfo {
  gpu_max_freq: u32,
  generation: u32,
  eu_count: u32,
  package_tdp: u32,
  max_fill_rate: u32,
}

/// Resource description the extension's committed-resource entry point
/// consumes. `emulated_wide_atomics` is the extension-specific flag the
/// standard image path has no equivalent for.
#[repr(C)]
pub struct RawImageDesc {
  pub width: u32,
  pub height: u32,
  pub format: i32,
  pub usage: u32,
  pub emulated_wide_atomics: u32,
}

type GetSupportedVersionsFn =
  unsafe extern "C" fn(vk::Device, *mut ExtensionVersion, *mut u32) -> RawResult;
type CreateContextFn = unsafe extern "C" fn(
  vk::Device,
  *const ExtensionVersion,
  *mut RawDeviceInfo,
  *mut *mut c_void,
) -> RawResult;
type DestroyContextFn = unsafe extern "C" fn(*mut *mut c_void) -> RawResult;
type CreateCommittedImageFn = unsafe extern "C" fn(
  *mut c_void,
  *const RawImageDesc,
  *mut vk::Image,
  *mut vk::DeviceMemory,
) -> RawResult;

/// Driver-side extension context. Owns vendor state until destroyed.
pub struct GfxExtContext {
  raw: *mut c_void,
}

pub struct GfxExtLibrary {
  device: vk::Device,
  library: Option<Library>,
}

impl GfxExtLibrary {
  pub fn new(device: vk::Device) -> Self {
    Self { device, library: None }
  }

  fn symbol<T>(&self, name: &[u8]) -> Result<libloading::Symbol<'_, T>, VendorError> {
    let library = self
      .library
      .as_ref()
      .ok_or_else(|| VendorError::LibraryUnavailable("library not loaded".into()))?;
    unsafe { library.get(name) }.map_err(|_| {
      VendorError::MissingSymbol(String::from_utf8_lossy(&name[..name.len() - 1]).into_owned())
    })
  }

  /// Allocate an image through the extension's committed-resource entry
  /// point. The driver owns the placement; the returned image and memory
  /// are destroyed through the standard device API at teardown.
  pub fn create_committed_image(
    &self,
    context: &GfxExtContext,
    desc: &RawImageDesc,
  ) -> Result<(vk::Image, vk::DeviceMemory), VendorError> {
    let create = self.symbol::<CreateCommittedImageFn>(b"gfxext_create_committed_image\0")?;
    let mut image = vk::Image::null();
    let mut memory = vk::DeviceMemory::null();
    let rc = unsafe { create(context.raw, desc, &mut image, &mut memory) };
    if rc != 0 {
      return Err(VendorError::CallFailed("gfxext_create_committed_image"));
    }
    Ok((image, memory))
  }
}

impl VendorProvider for GfxExtLibrary {
  type Context = GfxExtContext;

  fn load(&mut self) -> Result<(), VendorError> {
    if self.library.is_some() {
      return Ok(());
    }
    // Searches the system loader path, i.e. the driver's installed copy.
    let library = unsafe { Library::new(LIBRARY_NAME) }
      .map_err(|e| VendorError::LibraryUnavailable(e.to_string()))?;
    self.library = Some(library);
    Ok(())
  }

  fn version_count(&mut self) -> Result<u32, VendorError> {
    let enumerate = self.symbol::<GetSupportedVersionsFn>(b"gfxext_get_supported_versions\0")?;
    let mut count = 0u32;
    // Sizing call: null output buffer fills the count only.
    let rc = unsafe { enumerate(self.device, ptr::null_mut(), &mut count) };
    if rc != 0 {
      return Err(VendorError::CallFailed("gfxext_get_supported_versions (sizing)"));
    }
    Ok(count)
  }

  fn versions(&mut self, out: &mut [ExtensionVersion]) -> Result<(), VendorError> {
    let enumerate = self.symbol::<GetSupportedVersionsFn>(b"gfxext_get_supported_versions\0")?;
    let mut count = out.len() as u32;
    let rc = unsafe { enumerate(self.device, out.as_mut_ptr(), &mut count) };
    if rc != 0 {
      return Err(VendorError::CallFailed("gfxext_get_supported_versions (fill)"));
    }
    Ok(())
  }

  fn create_context(
    &mut self,
    version: ExtensionVersion,
  ) -> Result<(GfxExtContext, VendorDeviceInfo), VendorError> {
    let create = self.symbol::<CreateContextFn>(b"gfxext_create_device_context\0")?;
    let mut raw_info = RawDeviceInfo {
      gpu_max_freq: 0,
      generation: 0,
      eu_count: 0,
      package_tdp: 0,
      max_fill_rate: 0,
    };
    let mut raw = ptr::null_mut();
    let rc = unsafe { create(self.device, &version, &mut raw_info, &mut raw) };
    if rc != 0 || raw.is_null() {
      return Err(VendorError::CallFailed("gfxext_create_device_context"));
    }
    Ok((
      GfxExtContext { raw },
      VendorDeviceInfo {
        gpu_max_freq_mhz: raw_info.gpu_max_freq,
        generation: raw_info.generation,
        execution_units: raw_info.eu_count,
        package_tdp_watts: raw_info.package_tdp,
        max_fill_rate: raw_info.max_fill_rate,
      },
    ))
  }

  fn destroy_context(&mut self, context: &mut GfxExtContext) -> Result<(), VendorError> {
    if context.raw.is_null() {
      return Err(VendorError::ContextGone);
    }
    let destroy = self.symbol::<DestroyContextFn>(b"gfxext_destroy_device_context\0")?;
    let rc = unsafe { destroy(&mut context.raw) };
    // The entry point nulls the handle on success; mirror that on our side
    // so a second destroy reports ContextGone instead of faulting.
    context.raw = ptr::null_mut();
    if rc != 0 {
      return Err(VendorError::CallFailed("gfxext_destroy_device_context"));
    }
    Ok(())
  }

  fn unload(&mut self) {
    if self.library.take().is_some() {
      tracing::debug!("vendor extension library unloaded");
    }
  }
}
