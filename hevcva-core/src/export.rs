//! Surface export
//!
//! Reads a decoded surface back through a VA image and packs it into a
//! tight NV12 buffer (Y rows of `width` bytes, then `height/2` rows of
//! interleaved UV). Source planes may be padded; planar I420/YV12 images
//! are interleaved on the way.

use serde::{Deserialize, Serialize};

use crate::config::Geometry;
use crate::error::{DecodeError, Result};
use crate::va::ffi::{fourcc_str, VA_FOURCC_I420, VA_FOURCC_NV12, VA_FOURCC_YV12};
use crate::va::{ImageInfo, SurfaceId, VaBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Nv12,
}

impl PixelFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Nv12 => "NV12",
        }
    }
}

// ============================================================================
// Frame Buffer
// ============================================================================

/// Grow-only backing store for exported frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    data: Vec<u8>,
    len: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A writable frame of exactly `size` bytes. Reallocates only when
    /// `size` exceeds every earlier request.
    pub fn prepare(&mut self, size: usize) -> &mut [u8] {
        if self.data.len() < size {
            self.data.resize(size, 0);
        }
        self.len = size;
        &mut self.data[..size]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}

/// A packed NV12 frame borrowed from the session.
///
/// The bytes are overwritten by the next decode; copy them to keep them.
#[derive(Debug, Clone, Copy)]
pub struct Nv12Frame<'a> {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: &'a [u8],
}

impl Nv12Frame<'_> {
    pub fn y_plane(&self) -> &[u8] {
        &self.data[..self.width as usize * self.height as usize]
    }

    pub fn uv_plane(&self) -> &[u8] {
        &self.data[self.width as usize * self.height as usize..]
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }
}

// ============================================================================
// Plane Packing
// ============================================================================

fn plane_extent(offset: u32, pitch: u32, row_bytes: usize, rows: usize, src_len: usize) -> Result<()> {
    if (pitch as usize) < row_bytes {
        return Err(DecodeError::Export(format!(
            "pitch {} smaller than row of {} bytes",
            pitch, row_bytes
        )));
    }
    if rows == 0 {
        return Ok(());
    }
    let end = offset as usize + pitch as usize * (rows - 1) + row_bytes;
    if end > src_len {
        return Err(DecodeError::Export(format!(
            "plane at offset {} exceeds mapped image ({} > {} bytes)",
            offset, end, src_len
        )));
    }
    Ok(())
}

fn copy_plane(src: &[u8], offset: u32, pitch: u32, row_bytes: usize, rows: usize, dst: &mut [u8]) -> Result<()> {
    plane_extent(offset, pitch, row_bytes, rows, src.len())?;

    for (y, row) in dst.chunks_exact_mut(row_bytes).take(rows).enumerate() {
        let start = offset as usize + y * pitch as usize;
        row.copy_from_slice(&src[start..start + row_bytes]);
    }
    Ok(())
}

/// Pack the mapped image bytes `src` into `dst` (`width*height*3/2`).
pub fn pack_nv12(image: &ImageInfo, src: &[u8], width: u32, height: u32, dst: &mut [u8]) -> Result<()> {
    let (w, h) = (width as usize, height as usize);
    let luma = w * h;
    if dst.len() != luma * 3 / 2 {
        return Err(DecodeError::Export(format!(
            "destination is {} bytes, expected {}",
            dst.len(),
            luma * 3 / 2
        )));
    }
    if image.width < width || image.height < height {
        return Err(DecodeError::Export(format!(
            "image {}x{} smaller than frame {}x{}",
            image.width, image.height, width, height
        )));
    }

    let (y_plane, uv_plane) = dst.split_at_mut(luma);
    copy_plane(src, image.offsets[0], image.pitches[0], w, h, y_plane)?;

    match image.fourcc {
        VA_FOURCC_NV12 => copy_plane(src, image.offsets[1], image.pitches[1], w, h / 2, uv_plane),
        VA_FOURCC_I420 | VA_FOURCC_YV12 => {
            let (u, v) = if image.fourcc == VA_FOURCC_I420 { (1, 2) } else { (2, 1) };
            let (u_off, u_pitch) = (image.offsets[u] as usize, image.pitches[u] as usize);
            let (v_off, v_pitch) = (image.offsets[v] as usize, image.pitches[v] as usize);
            plane_extent(image.offsets[u], image.pitches[u], w / 2, h / 2, src.len())?;
            plane_extent(image.offsets[v], image.pitches[v], w / 2, h / 2, src.len())?;

            for (y, row) in uv_plane.chunks_exact_mut(w).take(h / 2).enumerate() {
                let u_row = &src[u_off + y * u_pitch..][..w / 2];
                let v_row = &src[v_off + y * v_pitch..][..w / 2];
                for (x, pair) in row.chunks_exact_mut(2).enumerate() {
                    pair[0] = u_row[x];
                    pair[1] = v_row[x];
                }
            }
            Ok(())
        }
        other => Err(DecodeError::Format(format!(
            "surface image format {} is not NV12-convertible",
            fourcc_str(other)
        ))),
    }
}

// ============================================================================
// Surface Export
// ============================================================================

fn readback_image(backend: &mut dyn VaBackend, surface: SurfaceId, geometry: Geometry) -> Result<ImageInfo> {
    let image = backend
        .create_image(VA_FOURCC_NV12, geometry.width, geometry.height)
        .map_err(DecodeError::export)?;

    if let Err(e) = backend.get_image(surface, geometry.width, geometry.height, &image) {
        if let Err(destroy_err) = backend.destroy_image(&image) {
            tracing::warn!("{}", destroy_err);
        }
        return Err(DecodeError::export(e));
    }
    Ok(image)
}

fn read_image(
    backend: &mut dyn VaBackend,
    image: &ImageInfo,
    geometry: Geometry,
    buffer: &mut FrameBuffer,
) -> Result<()> {
    let dst = buffer.prepare(geometry.frame_size());
    let mut packed = Ok(());
    backend
        .map_image(image, &mut |src: &[u8]| {
            packed = pack_nv12(image, src, geometry.width, geometry.height, dst);
        })
        .map_err(DecodeError::export)?;
    packed
}

/// Export a synced surface into `buffer`.
///
/// Tries `vaDeriveImage` first and falls back to `vaCreateImage` +
/// `vaGetImage` when the driver cannot derive. The image is always
/// destroyed before returning.
pub fn export_surface(
    backend: &mut dyn VaBackend,
    surface: SurfaceId,
    geometry: Geometry,
    buffer: &mut FrameBuffer,
) -> Result<()> {
    let image = match backend.derive_image(surface) {
        Ok(image) => image,
        Err(e) => {
            tracing::warn!("{}; falling back to vaGetImage", e);
            readback_image(backend, surface, geometry)?
        }
    };

    tracing::trace!(
        "Image {} {} pitches {:?} offsets {:?}",
        image.id,
        fourcc_str(image.fourcc),
        image.pitches,
        image.offsets
    );

    let result = read_image(backend, &image, geometry, buffer);
    if let Err(e) = backend.destroy_image(&image) {
        tracing::warn!("{}", e);
    }
    result
}
