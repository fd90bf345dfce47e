//! VA-API access layer
//!
//! [`VaBackend`] is the seam between the decode session and the driver:
//! [`libva::LibvaBackend`] talks to libva loaded at runtime, tests drive a
//! recording mock instead.

pub mod ffi;
#[cfg(target_os = "linux")]
pub mod libva;
#[cfg(test)]
pub(crate) mod mock;

use std::path::Path;

use thiserror::Error;

use ffi::{VAPictureParameterBufferHEVC, VASliceParameterBufferHEVC};

pub type SurfaceId = u32;
pub type ConfigId = u32;
pub type ContextId = u32;

/// A failed VA (or device) call.
#[derive(Debug, Clone, Error)]
#[error("{call} failed: {message}")]
pub struct VaError {
    pub call: &'static str,
    /// Raw `VAStatus`, absent for failures outside libva (dlopen, open(2)).
    pub status: Option<i32>,
    pub message: String,
}

impl VaError {
    pub fn status(call: &'static str, status: i32, message: impl Into<String>) -> Self {
        Self {
            call,
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn plain(call: &'static str, message: impl Into<String>) -> Self {
        Self {
            call,
            status: None,
            message: message.into(),
        }
    }
}

/// Host-visible image describing a surface's pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub id: u32,
    pub buf: u32,
    pub fourcc: u32,
    pub width: u32,
    pub height: u32,
    pub data_size: u32,
    pub num_planes: u32,
    pub pitches: [u32; 3],
    pub offsets: [u32; 3],
}

impl From<&ffi::VAImage> for ImageInfo {
    fn from(image: &ffi::VAImage) -> Self {
        Self {
            id: image.image_id,
            buf: image.buf,
            fourcc: image.format.fourcc,
            width: image.width as u32,
            height: image.height as u32,
            data_size: image.data_size,
            num_planes: image.num_planes,
            pitches: image.pitches,
            offsets: image.offsets,
        }
    }
}

/// Driver operations used by the HEVC decode pipeline.
///
/// Calls mirror libva one-to-one. Implementations own the device handle and
/// display; the caller owns ordering (acquire in order, release in reverse).
pub trait VaBackend: Send {
    fn name(&self) -> &'static str;

    fn open_device(&mut self, path: &Path) -> Result<(), VaError>;
    fn close_device(&mut self);

    /// Obtain the display for the open device and initialize it.
    /// Returns the libva `(major, minor)` version.
    fn initialize(&mut self) -> Result<(i32, i32), VaError>;
    fn terminate(&mut self) -> Result<(), VaError>;

    fn query_profiles(&mut self) -> Result<Vec<i32>, VaError>;
    fn query_entrypoints(&mut self, profile: i32) -> Result<Vec<i32>, VaError>;

    fn create_config(&mut self, profile: i32, entrypoint: i32) -> Result<ConfigId, VaError>;
    fn destroy_config(&mut self, config: ConfigId) -> Result<(), VaError>;

    fn create_surfaces(
        &mut self,
        rt_format: u32,
        width: u32,
        height: u32,
        count: usize,
    ) -> Result<Vec<SurfaceId>, VaError>;
    fn destroy_surfaces(&mut self, surfaces: &[SurfaceId]) -> Result<(), VaError>;

    fn create_context(
        &mut self,
        config: ConfigId,
        width: u32,
        height: u32,
        surfaces: &[SurfaceId],
    ) -> Result<ContextId, VaError>;
    fn destroy_context(&mut self, context: ContextId) -> Result<(), VaError>;

    fn begin_picture(&mut self, context: ContextId, target: SurfaceId) -> Result<(), VaError>;
    fn render_picture_params(
        &mut self,
        context: ContextId,
        params: &VAPictureParameterBufferHEVC,
    ) -> Result<(), VaError>;
    fn render_slice_params(
        &mut self,
        context: ContextId,
        params: &VASliceParameterBufferHEVC,
    ) -> Result<(), VaError>;
    fn render_slice_data(&mut self, context: ContextId, data: &[u8]) -> Result<(), VaError>;
    /// Must be called once per successful `begin_picture`, even after a
    /// render failure.
    fn end_picture(&mut self, context: ContextId) -> Result<(), VaError>;

    fn sync_surface(&mut self, surface: SurfaceId) -> Result<(), VaError>;

    fn derive_image(&mut self, surface: SurfaceId) -> Result<ImageInfo, VaError>;
    fn create_image(&mut self, fourcc: u32, width: u32, height: u32) -> Result<ImageInfo, VaError>;
    fn get_image(
        &mut self,
        surface: SurfaceId,
        width: u32,
        height: u32,
        image: &ImageInfo,
    ) -> Result<(), VaError>;
    /// Map the image buffer for the duration of `read`.
    fn map_image(&mut self, image: &ImageInfo, read: &mut dyn FnMut(&[u8])) -> Result<(), VaError>;
    fn destroy_image(&mut self, image: &ImageInfo) -> Result<(), VaError>;
}
