// SPDX-License-Identifier: CEPL-1.0
use bitflags::bitflags;

/// Declared GPU-side state of a resource. The GPU may only read or write a
/// resource while it is in the state matching the operation; every change
/// is an explicit barrier recorded into the command stream, never implicit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceState {
    /// Ready to be consumed by the presentation engine.
    PresentSource,
    /// Bound as a color render target.
    RenderTarget,
    /// Readable from shaders through a sampled view.
    ShaderRead,
    /// Read/write from compute through an unordered-access view.
    UnorderedAccess,
    /// Source of a copy operation.
    CopySource,
    /// Destination of a copy operation.
    CopyDest,
}

bitflags! {
    /// Usage a texture is allocated for.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TextureUsage: u32 {
        const RENDER_TARGET   = 1 << 0;
        const SHADER_READ     = 1 << 1;
        /// Unordered access with wide-atomic emulation; requires an active
        /// vendor extension context to allocate.
        const STORAGE_ATOMICS = 1 << 2;
        const COPY_SRC        = 1 << 3;
        const COPY_DST        = 1 << 4;
    }
}

/// Which memory an allocation lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryTier {
    /// Device-local, never CPU-mapped.
    GpuOnly,
    /// Host-visible staging memory the CPU writes through a scoped mapping.
    CpuUpload,
    /// Host-visible memory the CPU reads results back from.
    CpuReadback,
}

/// Description of a 2-D image allocation.
#[derive(Clone, Copy, Debug)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub bytes_per_texel: u32,
    pub usage: TextureUsage,
}

impl TextureDesc {
    /// Tight row-major byte footprint: width x height x element size.
    pub fn byte_size(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * u64::from(self.bytes_per_texel)
    }

    pub fn row_pitch(&self) -> u32 {
        self.width * self.bytes_per_texel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_size_matches_footprint() {
        let desc = TextureDesc {
            width: 640,
            height: 480,
            bytes_per_texel: 8,
            usage: TextureUsage::STORAGE_ATOMICS | TextureUsage::COPY_SRC,
        };
        assert_eq!(desc.byte_size(), 640 * 480 * 8);
        assert_eq!(desc.row_pitch(), 640 * 8);
    }
}
