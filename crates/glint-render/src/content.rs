// SPDX-License-Identifier: CEPL-1.0
//! Static demo content: the triangle vertex data and the checkerboard
//! texture the fragment stage samples.

use bytemuck::{Pod, Zeroable};

/// Shader-read texture dimensions (RGBA8, four bytes per pixel).
pub const TEXTURE_WIDTH: u32 = 256;
pub const TEXTURE_HEIGHT: u32 = 256;
pub const TEXTURE_PIXEL_SIZE: u32 = 4;

/// Storage-image dimensions for the wide-atomics compute target. The
/// element is a packed two-component wide integer, eight bytes per texel,
/// distinct from the four-component shader-read format above.
pub const STORAGE_WIDTH: u32 = 640;
pub const STORAGE_HEIGHT: u32 = 480;
pub const STORAGE_PIXEL_SIZE: u32 = 8;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

/// Triangle centered in the viewport, apex up, with the vertical extent
/// corrected for the window aspect ratio (width / height).
pub fn triangle_vertices(aspect_ratio: f32) -> [Vertex; 3] {
    [
        Vertex { position: [0.0, 0.25 * aspect_ratio, 0.0], uv: [0.5, 0.0] },
        Vertex { position: [0.25, -0.25 * aspect_ratio, 0.0], uv: [1.0, 1.0] },
        Vertex { position: [-0.25, -0.25 * aspect_ratio, 0.0], uv: [0.0, 1.0] },
    ]
}

/// Black and white checkerboard, eight cells per edge, opaque alpha.
pub fn checkerboard() -> Vec<u8> {
    let row_pitch = TEXTURE_WIDTH * TEXTURE_PIXEL_SIZE;
    let cell_pitch = row_pitch >> 3;
    let cell_height = TEXTURE_HEIGHT >> 3;
    let size = (row_pitch * TEXTURE_HEIGHT) as usize;

    let mut data = vec![0u8; size];
    for n in (0..size).step_by(TEXTURE_PIXEL_SIZE as usize) {
        let x = n as u32 % row_pitch;
        let y = n as u32 / row_pitch;
        let i = x / cell_pitch;
        let j = y / cell_height;

        let v = if i % 2 == j % 2 { 0x00 } else { 0xff };
        data[n] = v;
        data[n + 1] = v;
        data[n + 2] = v;
        data[n + 3] = 0xff;
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(data: &[u8], x: u32, y: u32) -> [u8; 4] {
        let offset = ((y * TEXTURE_WIDTH + x) * TEXTURE_PIXEL_SIZE) as usize;
        [data[offset], data[offset + 1], data[offset + 2], data[offset + 3]]
    }

    #[test]
    fn checkerboard_cells_alternate() {
        let data = checkerboard();
        // 256 wide with an 8x8 grid: cells are 32 pixels across.
        assert_eq!(pixel(&data, 0, 0), [0, 0, 0, 255]);
        assert_eq!(pixel(&data, 32, 0), [255, 255, 255, 255]);
        assert_eq!(pixel(&data, 0, 32), [255, 255, 255, 255]);
        assert_eq!(pixel(&data, 32, 32), [0, 0, 0, 255]);
        assert_eq!(data.len(), (TEXTURE_WIDTH * TEXTURE_HEIGHT * TEXTURE_PIXEL_SIZE) as usize);
    }

    #[test]
    fn triangle_tracks_aspect_ratio() {
        let verts = triangle_vertices(16.0 / 9.0);
        assert!((verts[0].position[1] - 0.25 * 16.0 / 9.0).abs() < 1e-6);
        assert_eq!(verts[0].uv, [0.5, 0.0]);
        // Pod layout: three floats of position then two of uv.
        assert_eq!(std::mem::size_of::<Vertex>(), 20);
    }
}
