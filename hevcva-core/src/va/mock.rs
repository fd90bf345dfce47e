//! Recording [`VaBackend`] for tests.
//!
//! Every call is logged. A "decoded" surface holds an FNV-1a checksum of
//! the slice data submitted to it; images render that checksum into the Y
//! and UV planes so frames can be compared without real hardware.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use super::ffi::{self, VAPictureParameterBufferHEVC, VASliceParameterBufferHEVC};
use super::{ConfigId, ContextId, ImageInfo, SurfaceId, VaBackend, VaError};

pub const SURFACE_BASE: SurfaceId = 0x100;
const PADDING_BYTE: u8 = 0xEE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    OpenDevice,
    CloseDevice,
    Initialize,
    Terminate,
    QueryProfiles,
    QueryEntrypoints,
    CreateConfig,
    DestroyConfig,
    CreateSurfaces { width: u32, height: u32, count: usize },
    DestroySurfaces(usize),
    CreateContext,
    DestroyContext,
    BeginPicture(SurfaceId),
    PictureParams,
    SliceParams { size: u32 },
    SliceData(Vec<u8>),
    EndPicture,
    Sync(SurfaceId),
    DeriveImage(SurfaceId),
    CreateImage,
    GetImage(SurfaceId),
    MapImage,
    DestroyImage,
}

#[derive(Debug)]
struct MockImage {
    info: ImageInfo,
    surface: Option<SurfaceId>,
}

#[derive(Debug)]
pub struct MockState {
    pub calls: Vec<Call>,
    fail: HashSet<&'static str>,
    fail_once: HashSet<&'static str>,
    pub profiles: Vec<i32>,
    pub derive_supported: bool,
    pub fourcc: u32,
    /// Extra bytes per luma row in exported images.
    pub row_padding: u32,

    pub device_open: bool,
    pub initialized: bool,
    pub config: Option<ConfigId>,
    pub surfaces: Vec<SurfaceId>,
    pub context: Option<ContextId>,
    geometry: (u32, u32),
    picture: Option<(SurfaceId, u64)>,
    checksums: HashMap<SurfaceId, u64>,
    images: HashMap<u32, MockImage>,
    next_image: u32,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            fail: HashSet::new(),
            fail_once: HashSet::new(),
            profiles: vec![ffi::VA_PROFILE_HEVC_MAIN],
            derive_supported: true,
            fourcc: ffi::VA_FOURCC_NV12,
            row_padding: 0,
            device_open: false,
            initialized: false,
            config: None,
            surfaces: Vec::new(),
            context: None,
            geometry: (0, 0),
            picture: None,
            checksums: HashMap::new(),
            images: HashMap::new(),
            next_image: 1,
        }
    }
}

impl MockState {
    fn check(&mut self, call: &'static str) -> Result<(), VaError> {
        if self.fail_once.remove(call) || self.fail.contains(call) {
            return Err(VaError::status(call, ffi::VA_STATUS_ERROR_OPERATION_FAILED, "operation failed"));
        }
        Ok(())
    }

    /// Nothing acquired is still held.
    pub fn released(&self) -> bool {
        !self.device_open
            && !self.initialized
            && self.config.is_none()
            && self.surfaces.is_empty()
            && self.context.is_none()
            && self.images.is_empty()
    }

    pub fn live_images(&self) -> usize {
        self.images.len()
    }
}

/// Cheap-to-clone handle; tests keep one while the session owns another.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

fn fnv1a(mut hash: u64, data: &[u8]) -> u64 {
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;

/// The packed NV12 frame the mock produces for a surface checksum.
pub fn expected_frame(checksum: u64, width: u32, height: u32) -> Vec<u8> {
    let bytes = checksum.to_le_bytes();
    let luma = (width * height) as usize;
    let chroma = luma / 2;
    let mut out = Vec::with_capacity(luma + chroma);
    out.extend((0..luma).map(|i| bytes[i % 8]));
    out.extend((0..chroma).map(|i| bytes[i % 8] ^ 0xFF));
    out
}

fn image_layout(fourcc: u32, width: u32, height: u32, padding: u32) -> ([u32; 3], [u32; 3], u32, u32) {
    let pitch = width + padding;
    let luma = pitch * height;
    match fourcc {
        ffi::VA_FOURCC_I420 | ffi::VA_FOURCC_YV12 => {
            let cpitch = pitch / 2;
            let csize = cpitch * (height / 2);
            ([pitch, cpitch, cpitch], [0, luma, luma + csize], 3, luma + 2 * csize)
        }
        _ => ([pitch, pitch, 0], [0, luma, 0], 2, luma + pitch * (height / 2)),
    }
}

fn render_image(info: &ImageInfo, checksum: u64) -> Vec<u8> {
    let cs = checksum.to_le_bytes();
    let (w, h) = (info.width as usize, info.height as usize);
    let mut buf = vec![PADDING_BYTE; info.data_size as usize];

    let (p0, o0) = (info.pitches[0] as usize, info.offsets[0] as usize);
    for y in 0..h {
        for x in 0..w {
            buf[o0 + y * p0 + x] = cs[(y * w + x) % 8];
        }
    }

    let (p1, o1) = (info.pitches[1] as usize, info.offsets[1] as usize);
    match info.fourcc {
        ffi::VA_FOURCC_I420 | ffi::VA_FOURCC_YV12 => {
            let (p2, o2) = (info.pitches[2] as usize, info.offsets[2] as usize);
            let (u_at, u_pitch, v_at, v_pitch) = if info.fourcc == ffi::VA_FOURCC_I420 {
                (o1, p1, o2, p2)
            } else {
                (o2, p2, o1, p1)
            };
            for y in 0..h / 2 {
                for x in 0..w / 2 {
                    let j = y * w + 2 * x;
                    buf[u_at + y * u_pitch + x] = cs[j % 8] ^ 0xFF;
                    buf[v_at + y * v_pitch + x] = cs[(j + 1) % 8] ^ 0xFF;
                }
            }
        }
        _ => {
            for y in 0..h / 2 {
                for x in 0..w {
                    buf[o1 + y * p1 + x] = cs[(y * w + x) % 8] ^ 0xFF;
                }
            }
        }
    }
    buf
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> parking_lot::MutexGuard<'_, MockState> {
        self.state.lock()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Make every call to `call` fail. Keys are libva function names, or a
    /// buffer type name to fail one kind of `vaRenderPicture`.
    pub fn fail_on(&self, call: &'static str) {
        self.state.lock().fail.insert(call);
    }

    pub fn fail_once(&self, call: &'static str) {
        self.state.lock().fail_once.insert(call);
    }

    pub fn checksum(&self, surface: SurfaceId) -> Option<u64> {
        self.state.lock().checksums.get(&surface).copied()
    }

    fn with<T>(
        &self,
        call: &'static str,
        record: Call,
        f: impl FnOnce(&mut MockState) -> Result<T, VaError>,
    ) -> Result<T, VaError> {
        let mut state = self.state.lock();
        state.calls.push(record);
        state.check(call)?;
        f(&mut state)
    }

    /// Render calls also fail when their buffer type name
    /// (`VASliceDataBufferType`, ...) is set to fail.
    fn with_render(
        &self,
        buffer: &'static str,
        record: Call,
        f: impl FnOnce(&mut MockState) -> Result<(), VaError>,
    ) -> Result<(), VaError> {
        let mut state = self.state.lock();
        state.calls.push(record);
        if state.fail_once.remove(buffer) || state.fail.contains(buffer) {
            return Err(VaError::status(
                "vaRenderPicture",
                ffi::VA_STATUS_ERROR_OPERATION_FAILED,
                "operation failed",
            ));
        }
        state.check("vaRenderPicture")?;
        f(&mut state)
    }
}

fn invalid(call: &'static str, what: &str) -> VaError {
    VaError::status(call, ffi::VA_STATUS_ERROR_INVALID_SURFACE, what)
}

impl VaBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn open_device(&mut self, _path: &Path) -> Result<(), VaError> {
        self.with("open", Call::OpenDevice, |s| {
            s.device_open = true;
            Ok(())
        })
    }

    fn close_device(&mut self) {
        let mut state = self.state.lock();
        state.calls.push(Call::CloseDevice);
        state.device_open = false;
    }

    fn initialize(&mut self) -> Result<(i32, i32), VaError> {
        self.with("vaInitialize", Call::Initialize, |s| {
            if !s.device_open {
                return Err(invalid("vaInitialize", "device not open"));
            }
            s.initialized = true;
            Ok((1, 20))
        })
    }

    fn terminate(&mut self) -> Result<(), VaError> {
        self.with("vaTerminate", Call::Terminate, |s| {
            s.initialized = false;
            s.images.clear();
            Ok(())
        })
    }

    fn query_profiles(&mut self) -> Result<Vec<i32>, VaError> {
        self.with("vaQueryConfigProfiles", Call::QueryProfiles, |s| Ok(s.profiles.clone()))
    }

    fn query_entrypoints(&mut self, _profile: i32) -> Result<Vec<i32>, VaError> {
        self.with("vaQueryConfigEntrypoints", Call::QueryEntrypoints, |_| {
            Ok(vec![ffi::VA_ENTRYPOINT_VLD])
        })
    }

    fn create_config(&mut self, profile: i32, entrypoint: i32) -> Result<ConfigId, VaError> {
        self.with("vaCreateConfig", Call::CreateConfig, |s| {
            if !s.profiles.contains(&profile) || entrypoint != ffi::VA_ENTRYPOINT_VLD {
                return Err(VaError::status(
                    "vaCreateConfig",
                    ffi::VA_STATUS_ERROR_UNSUPPORTED_PROFILE,
                    "unsupported profile",
                ));
            }
            s.config = Some(1);
            Ok(1)
        })
    }

    fn destroy_config(&mut self, _config: ConfigId) -> Result<(), VaError> {
        self.with("vaDestroyConfig", Call::DestroyConfig, |s| {
            s.config = None;
            Ok(())
        })
    }

    fn create_surfaces(
        &mut self,
        _rt_format: u32,
        width: u32,
        height: u32,
        count: usize,
    ) -> Result<Vec<SurfaceId>, VaError> {
        self.with("vaCreateSurfaces", Call::CreateSurfaces { width, height, count }, |s| {
            s.surfaces = (0..count as u32).map(|i| SURFACE_BASE + i).collect();
            s.geometry = (width, height);
            Ok(s.surfaces.clone())
        })
    }

    fn destroy_surfaces(&mut self, surfaces: &[SurfaceId]) -> Result<(), VaError> {
        self.with("vaDestroySurfaces", Call::DestroySurfaces(surfaces.len()), |s| {
            s.surfaces.retain(|id| !surfaces.contains(id));
            Ok(())
        })
    }

    fn create_context(
        &mut self,
        _config: ConfigId,
        _width: u32,
        _height: u32,
        surfaces: &[SurfaceId],
    ) -> Result<ContextId, VaError> {
        self.with("vaCreateContext", Call::CreateContext, |s| {
            if surfaces.iter().any(|id| !s.surfaces.contains(id)) {
                return Err(invalid("vaCreateContext", "unknown render target"));
            }
            s.context = Some(7);
            Ok(7)
        })
    }

    fn destroy_context(&mut self, _context: ContextId) -> Result<(), VaError> {
        self.with("vaDestroyContext", Call::DestroyContext, |s| {
            s.context = None;
            Ok(())
        })
    }

    fn begin_picture(&mut self, _context: ContextId, target: SurfaceId) -> Result<(), VaError> {
        self.with("vaBeginPicture", Call::BeginPicture(target), |s| {
            if s.picture.is_some() {
                return Err(invalid("vaBeginPicture", "picture already open"));
            }
            if !s.surfaces.contains(&target) {
                return Err(invalid("vaBeginPicture", "invalid VASurfaceID"));
            }
            s.picture = Some((target, FNV_OFFSET));
            Ok(())
        })
    }

    fn render_picture_params(
        &mut self,
        _context: ContextId,
        _params: &VAPictureParameterBufferHEVC,
    ) -> Result<(), VaError> {
        self.with_render("VAPictureParameterBufferType", Call::PictureParams, |s| {
            s.picture.map(|_| ()).ok_or_else(|| invalid("vaRenderPicture", "no open picture"))
        })
    }

    fn render_slice_params(
        &mut self,
        _context: ContextId,
        params: &VASliceParameterBufferHEVC,
    ) -> Result<(), VaError> {
        let size = params.slice_data_size;
        self.with_render("VASliceParameterBufferType", Call::SliceParams { size }, |s| {
            s.picture.map(|_| ()).ok_or_else(|| invalid("vaRenderPicture", "no open picture"))
        })
    }

    fn render_slice_data(&mut self, _context: ContextId, data: &[u8]) -> Result<(), VaError> {
        self.with_render("VASliceDataBufferType", Call::SliceData(data.to_vec()), |s| match s.picture.as_mut() {
            Some((_, hash)) => {
                *hash = fnv1a(*hash, data);
                Ok(())
            }
            None => Err(invalid("vaRenderPicture", "no open picture")),
        })
    }

    fn end_picture(&mut self, _context: ContextId) -> Result<(), VaError> {
        let mut state = self.state.lock();
        state.calls.push(Call::EndPicture);
        // A failed end still closes the picture, as libva does.
        let picture = state.picture.take();
        state.check("vaEndPicture")?;
        let (surface, hash) = picture.ok_or_else(|| invalid("vaEndPicture", "no open picture"))?;
        state.checksums.insert(surface, hash);
        Ok(())
    }

    fn sync_surface(&mut self, surface: SurfaceId) -> Result<(), VaError> {
        self.with("vaSyncSurface", Call::Sync(surface), |s| {
            if s.surfaces.contains(&surface) {
                Ok(())
            } else {
                Err(invalid("vaSyncSurface", "invalid VASurfaceID"))
            }
        })
    }

    fn derive_image(&mut self, surface: SurfaceId) -> Result<ImageInfo, VaError> {
        self.with("vaDeriveImage", Call::DeriveImage(surface), |s| {
            if !s.derive_supported {
                return Err(VaError::status(
                    "vaDeriveImage",
                    ffi::VA_STATUS_ERROR_UNIMPLEMENTED,
                    "the requested function is not implemented",
                ));
            }
            let (width, height) = s.geometry;
            let fourcc = s.fourcc;
            let info = new_image(s, fourcc, width, height);
            s.images.insert(info.id, MockImage { info, surface: Some(surface) });
            Ok(info)
        })
    }

    fn create_image(&mut self, fourcc: u32, width: u32, height: u32) -> Result<ImageInfo, VaError> {
        self.with("vaCreateImage", Call::CreateImage, |s| {
            let info = new_image(s, fourcc, width, height);
            s.images.insert(info.id, MockImage { info, surface: None });
            Ok(info)
        })
    }

    fn get_image(
        &mut self,
        surface: SurfaceId,
        _width: u32,
        _height: u32,
        image: &ImageInfo,
    ) -> Result<(), VaError> {
        self.with("vaGetImage", Call::GetImage(surface), |s| {
            let image = s
                .images
                .get_mut(&image.id)
                .ok_or_else(|| invalid("vaGetImage", "invalid VAImageID"))?;
            image.surface = Some(surface);
            Ok(())
        })
    }

    fn map_image(&mut self, image: &ImageInfo, read: &mut dyn FnMut(&[u8])) -> Result<(), VaError> {
        let bytes = self.with("vaMapBuffer", Call::MapImage, |s| {
            let mock = s
                .images
                .get(&image.id)
                .ok_or_else(|| invalid("vaMapBuffer", "invalid VABufferID"))?;
            let checksum = mock
                .surface
                .and_then(|surface| s.checksums.get(&surface).copied())
                .unwrap_or(0);
            Ok(render_image(&mock.info, checksum))
        })?;
        read(&bytes);
        Ok(())
    }

    fn destroy_image(&mut self, image: &ImageInfo) -> Result<(), VaError> {
        self.with("vaDestroyImage", Call::DestroyImage, |s| {
            s.images.remove(&image.id);
            Ok(())
        })
    }
}

fn new_image(state: &mut MockState, fourcc: u32, width: u32, height: u32) -> ImageInfo {
    let (pitches, offsets, num_planes, data_size) = image_layout(fourcc, width, height, state.row_padding);
    let id = state.next_image;
    state.next_image += 1;
    ImageInfo {
        id,
        buf: id + 0x1000,
        fourcc,
        width,
        height,
        data_size,
        num_planes,
        pitches,
        offsets,
    }
}
