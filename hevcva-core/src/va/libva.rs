// LIBVA BACKEND - VA-API via dynamic library loading (Linux)
//
// Loads libva.so.2 + libva-drm.so.2 at runtime, no compile-time
// dependency. Each backend owns its loader, so independent sessions never
// share process-wide state.
//
// Display comes from a DRM render node opened with open(2).

use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_int, c_uint};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

use super::ffi::*;
use super::{ConfigId, ContextId, ImageInfo, SurfaceId, VaBackend, VaError};

// ============================================================================
// Library Path Detection
// ============================================================================

fn find_library(candidates: &[&'static str]) -> &'static str {
    for path in candidates {
        if !path.contains('/') || Path::new(path).exists() {
            return path;
        }
    }
    candidates[0]
}

fn libva_path() -> &'static str {
    find_library(&[
        "libva.so.2",
        "/usr/lib/x86_64-linux-gnu/libva.so.2",
        "/usr/lib/libva.so.2",
        "/usr/lib64/libva.so.2",
    ])
}

fn libva_drm_path() -> &'static str {
    find_library(&[
        "libva-drm.so.2",
        "/usr/lib/x86_64-linux-gnu/libva-drm.so.2",
        "/usr/lib/libva-drm.so.2",
        "/usr/lib64/libva-drm.so.2",
    ])
}

// ============================================================================
// Loaded Functions Container
// ============================================================================

struct LibvaLibrary {
    _libva: libloading::Library,
    _libva_drm: libloading::Library,

    va_get_display_drm: VaGetDisplayDrmFn,
    va_initialize: VaInitializeFn,
    va_terminate: VaTerminateFn,
    va_max_num_profiles: VaMaxNumProfilesFn,
    va_max_num_entrypoints: VaMaxNumEntrypointsFn,
    va_query_config_profiles: VaQueryConfigProfilesFn,
    va_query_config_entrypoints: VaQueryConfigEntrypointsFn,
    va_create_config: VaCreateConfigFn,
    va_destroy_config: VaDestroyConfigFn,
    va_create_surfaces: VaCreateSurfacesFn,
    va_destroy_surfaces: VaDestroySurfacesFn,
    va_create_context: VaCreateContextFn,
    va_destroy_context: VaDestroyContextFn,
    va_create_buffer: VaCreateBufferFn,
    va_destroy_buffer: VaDestroyBufferFn,
    va_begin_picture: VaBeginPictureFn,
    va_render_picture: VaRenderPictureFn,
    va_end_picture: VaEndPictureFn,
    va_sync_surface: VaSyncSurfaceFn,
    va_derive_image: VaDeriveImageFn,
    va_create_image: VaCreateImageFn,
    va_get_image: VaGetImageFn,
    va_destroy_image: VaDestroyImageFn,
    va_map_buffer: VaMapBufferFn,
    va_unmap_buffer: VaUnmapBufferFn,
    va_error_str: Option<VaErrorStrFn>,
}

impl LibvaLibrary {
    fn load() -> Result<Self, libloading::Error> {
        unsafe {
            let libva = libloading::Library::new(libva_path())?;
            let libva_drm = libloading::Library::new(libva_drm_path())?;

            let va_initialize: VaInitializeFn = *libva.get(b"vaInitialize\0")?;
            let va_terminate: VaTerminateFn = *libva.get(b"vaTerminate\0")?;
            let va_max_num_profiles: VaMaxNumProfilesFn = *libva.get(b"vaMaxNumProfiles\0")?;
            let va_max_num_entrypoints: VaMaxNumEntrypointsFn = *libva.get(b"vaMaxNumEntrypoints\0")?;
            let va_query_config_profiles: VaQueryConfigProfilesFn = *libva.get(b"vaQueryConfigProfiles\0")?;
            let va_query_config_entrypoints: VaQueryConfigEntrypointsFn =
                *libva.get(b"vaQueryConfigEntrypoints\0")?;
            let va_create_config: VaCreateConfigFn = *libva.get(b"vaCreateConfig\0")?;
            let va_destroy_config: VaDestroyConfigFn = *libva.get(b"vaDestroyConfig\0")?;
            let va_create_surfaces: VaCreateSurfacesFn = *libva.get(b"vaCreateSurfaces\0")?;
            let va_destroy_surfaces: VaDestroySurfacesFn = *libva.get(b"vaDestroySurfaces\0")?;
            let va_create_context: VaCreateContextFn = *libva.get(b"vaCreateContext\0")?;
            let va_destroy_context: VaDestroyContextFn = *libva.get(b"vaDestroyContext\0")?;
            let va_create_buffer: VaCreateBufferFn = *libva.get(b"vaCreateBuffer\0")?;
            let va_destroy_buffer: VaDestroyBufferFn = *libva.get(b"vaDestroyBuffer\0")?;
            let va_begin_picture: VaBeginPictureFn = *libva.get(b"vaBeginPicture\0")?;
            let va_render_picture: VaRenderPictureFn = *libva.get(b"vaRenderPicture\0")?;
            let va_end_picture: VaEndPictureFn = *libva.get(b"vaEndPicture\0")?;
            let va_sync_surface: VaSyncSurfaceFn = *libva.get(b"vaSyncSurface\0")?;
            let va_derive_image: VaDeriveImageFn = *libva.get(b"vaDeriveImage\0")?;
            let va_create_image: VaCreateImageFn = *libva.get(b"vaCreateImage\0")?;
            let va_get_image: VaGetImageFn = *libva.get(b"vaGetImage\0")?;
            let va_destroy_image: VaDestroyImageFn = *libva.get(b"vaDestroyImage\0")?;
            let va_map_buffer: VaMapBufferFn = *libva.get(b"vaMapBuffer\0")?;
            let va_unmap_buffer: VaUnmapBufferFn = *libva.get(b"vaUnmapBuffer\0")?;
            let va_error_str = libva.get::<VaErrorStrFn>(b"vaErrorStr\0").ok().map(|sym| *sym);

            let va_get_display_drm: VaGetDisplayDrmFn = *libva_drm.get(b"vaGetDisplayDRM\0")?;

            tracing::debug!("libva loaded from {} / {}", libva_path(), libva_drm_path());

            Ok(Self {
                _libva: libva,
                _libva_drm: libva_drm,
                va_get_display_drm,
                va_initialize,
                va_terminate,
                va_max_num_profiles,
                va_max_num_entrypoints,
                va_query_config_profiles,
                va_query_config_entrypoints,
                va_create_config,
                va_destroy_config,
                va_create_surfaces,
                va_destroy_surfaces,
                va_create_context,
                va_destroy_context,
                va_create_buffer,
                va_destroy_buffer,
                va_begin_picture,
                va_render_picture,
                va_end_picture,
                va_sync_surface,
                va_derive_image,
                va_create_image,
                va_get_image,
                va_destroy_image,
                va_map_buffer,
                va_unmap_buffer,
                va_error_str,
            })
        }
    }

    fn error_string(&self, status: VAStatus) -> String {
        if let Some(va_error_str) = self.va_error_str {
            let msg = unsafe { va_error_str(status) };
            if !msg.is_null() {
                return unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned();
            }
        }
        format!("VA status {}", status)
    }
}

/// `vaInitialize` on a display fresh from `vaGetDisplayDRM`. The display
/// is terminated again on failure, since only `vaTerminate` frees it.
fn initialize_display(
    display: VADisplay,
    initialize: impl FnOnce(VADisplay, &mut c_int, &mut c_int) -> VAStatus,
    terminate: impl FnOnce(VADisplay),
) -> Result<(i32, i32), VAStatus> {
    let mut major = 0;
    let mut minor = 0;
    let status = initialize(display, &mut major, &mut minor);
    if status != VA_STATUS_SUCCESS {
        terminate(display);
        return Err(status);
    }
    Ok((major, minor))
}

// ============================================================================
// Backend
// ============================================================================

/// [`VaBackend`] backed by the system libva and a DRM render node.
pub struct LibvaBackend {
    lib: Option<LibvaLibrary>,
    drm_fd: c_int,
    display: VADisplay,
    /// Parameter/data buffers of the picture being built.
    pending_buffers: Vec<VABufferID>,
}

// The display handle is only touched through &mut self.
unsafe impl Send for LibvaBackend {}

impl Default for LibvaBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LibvaBackend {
    /// The library is loaded lazily by [`VaBackend::open_device`].
    pub fn new() -> Self {
        Self {
            lib: None,
            drm_fd: -1,
            display: ptr::null_mut(),
            pending_buffers: Vec::new(),
        }
    }

    fn lib(&self, call: &'static str) -> Result<&LibvaLibrary, VaError> {
        self.lib.as_ref().ok_or_else(|| VaError::plain(call, "libva not loaded"))
    }

    fn display(&self, call: &'static str) -> Result<(&LibvaLibrary, VADisplay), VaError> {
        let lib = self.lib(call)?;
        if self.display.is_null() {
            return Err(VaError::plain(call, "display not initialized"));
        }
        Ok((lib, self.display))
    }

    fn check(lib: &LibvaLibrary, call: &'static str, status: VAStatus) -> Result<(), VaError> {
        if status == VA_STATUS_SUCCESS {
            Ok(())
        } else {
            Err(VaError::status(call, status, lib.error_string(status)))
        }
    }

    fn render_buffer(
        &mut self,
        context: ContextId,
        buffer_type: VABufferType,
        size: usize,
        data: *const c_void,
    ) -> Result<(), VaError> {
        let (lib, display) = self.display("vaCreateBuffer")?;
        let mut buffer: VABufferID = VA_INVALID_ID;
        let status = unsafe {
            (lib.va_create_buffer)(
                display,
                context,
                buffer_type,
                size as c_uint,
                1,
                data as *mut c_void,
                &mut buffer,
            )
        };
        Self::check(lib, "vaCreateBuffer", status)?;

        let status = unsafe { (lib.va_render_picture)(display, context, &mut buffer, 1) };
        let result = Self::check(lib, "vaRenderPicture", status);
        self.pending_buffers.push(buffer);
        result
    }

    fn release_pending_buffers(&mut self) {
        let buffers = std::mem::take(&mut self.pending_buffers);
        let Ok((lib, display)) = self.display("vaDestroyBuffer") else {
            return;
        };
        for buffer in buffers {
            let status = unsafe { (lib.va_destroy_buffer)(display, buffer) };
            if status != VA_STATUS_SUCCESS {
                tracing::warn!("vaDestroyBuffer({}) failed: {}", buffer, lib.error_string(status));
            }
        }
    }
}

impl VaBackend for LibvaBackend {
    fn name(&self) -> &'static str {
        "libva"
    }

    fn open_device(&mut self, path: &Path) -> Result<(), VaError> {
        if self.lib.is_none() {
            let lib = LibvaLibrary::load().map_err(|e| VaError::plain("dlopen", e.to_string()))?;
            self.lib = Some(lib);
        }

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| VaError::plain("open", format!("invalid device path {}", path.display())))?;
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR | libc::O_CLOEXEC) };
        if fd < 0 {
            return Err(VaError::plain(
                "open",
                format!("{}: {}", path.display(), std::io::Error::last_os_error()),
            ));
        }

        self.drm_fd = fd;
        Ok(())
    }

    fn close_device(&mut self) {
        if self.drm_fd >= 0 {
            unsafe {
                libc::close(self.drm_fd);
            }
            self.drm_fd = -1;
        }
    }

    fn initialize(&mut self) -> Result<(i32, i32), VaError> {
        let lib = self.lib("vaGetDisplayDRM")?;
        if self.drm_fd < 0 {
            return Err(VaError::plain("vaGetDisplayDRM", "device not open"));
        }

        let display = unsafe { (lib.va_get_display_drm)(self.drm_fd) };
        if display.is_null() {
            return Err(VaError::plain("vaGetDisplayDRM", "no VA display for render node"));
        }

        let version = initialize_display(
            display,
            |display, major, minor| unsafe { (lib.va_initialize)(display, major, minor) },
            |display| unsafe {
                (lib.va_terminate)(display);
            },
        )
        .map_err(|status| VaError::status("vaInitialize", status, lib.error_string(status)))?;

        self.display = display;
        Ok(version)
    }

    fn terminate(&mut self) -> Result<(), VaError> {
        if self.display.is_null() {
            return Ok(());
        }
        self.release_pending_buffers();
        let (lib, display) = self.display("vaTerminate")?;
        let status = unsafe { (lib.va_terminate)(display) };
        self.display = ptr::null_mut();
        Self::check(self.lib("vaTerminate")?, "vaTerminate", status)
    }

    fn query_profiles(&mut self) -> Result<Vec<i32>, VaError> {
        let (lib, display) = self.display("vaQueryConfigProfiles")?;
        let max = unsafe { (lib.va_max_num_profiles)(display) }.max(0) as usize;
        let mut profiles = vec![0 as VAProfile; max];
        let mut count: c_int = 0;
        let status = unsafe { (lib.va_query_config_profiles)(display, profiles.as_mut_ptr(), &mut count) };
        Self::check(lib, "vaQueryConfigProfiles", status)?;
        profiles.truncate((count.max(0) as usize).min(max));
        Ok(profiles)
    }

    fn query_entrypoints(&mut self, profile: i32) -> Result<Vec<i32>, VaError> {
        let (lib, display) = self.display("vaQueryConfigEntrypoints")?;
        let max = unsafe { (lib.va_max_num_entrypoints)(display) }.max(0) as usize;
        let mut entrypoints = vec![0 as VAEntrypoint; max];
        let mut count: c_int = 0;
        let status = unsafe {
            (lib.va_query_config_entrypoints)(display, profile, entrypoints.as_mut_ptr(), &mut count)
        };
        Self::check(lib, "vaQueryConfigEntrypoints", status)?;
        entrypoints.truncate((count.max(0) as usize).min(max));
        Ok(entrypoints)
    }

    fn create_config(&mut self, profile: i32, entrypoint: i32) -> Result<ConfigId, VaError> {
        let (lib, display) = self.display("vaCreateConfig")?;
        let mut config: VAConfigID = VA_INVALID_ID;
        let status =
            unsafe { (lib.va_create_config)(display, profile, entrypoint, ptr::null_mut(), 0, &mut config) };
        Self::check(lib, "vaCreateConfig", status)?;
        Ok(config)
    }

    fn destroy_config(&mut self, config: ConfigId) -> Result<(), VaError> {
        let (lib, display) = self.display("vaDestroyConfig")?;
        let status = unsafe { (lib.va_destroy_config)(display, config) };
        Self::check(lib, "vaDestroyConfig", status)
    }

    fn create_surfaces(
        &mut self,
        rt_format: u32,
        width: u32,
        height: u32,
        count: usize,
    ) -> Result<Vec<SurfaceId>, VaError> {
        let (lib, display) = self.display("vaCreateSurfaces")?;
        let mut surfaces = vec![VA_INVALID_SURFACE; count];
        let status = unsafe {
            (lib.va_create_surfaces)(
                display,
                rt_format,
                width,
                height,
                surfaces.as_mut_ptr(),
                count as c_uint,
                ptr::null_mut(),
                0,
            )
        };
        Self::check(lib, "vaCreateSurfaces", status)?;
        Ok(surfaces)
    }

    fn destroy_surfaces(&mut self, surfaces: &[SurfaceId]) -> Result<(), VaError> {
        let (lib, display) = self.display("vaDestroySurfaces")?;
        let mut ids = surfaces.to_vec();
        let status = unsafe { (lib.va_destroy_surfaces)(display, ids.as_mut_ptr(), ids.len() as c_int) };
        Self::check(lib, "vaDestroySurfaces", status)
    }

    fn create_context(
        &mut self,
        config: ConfigId,
        width: u32,
        height: u32,
        surfaces: &[SurfaceId],
    ) -> Result<ContextId, VaError> {
        let (lib, display) = self.display("vaCreateContext")?;
        let mut targets = surfaces.to_vec();
        let mut context: VAContextID = VA_INVALID_ID;
        let status = unsafe {
            (lib.va_create_context)(
                display,
                config,
                width as c_int,
                height as c_int,
                VA_PROGRESSIVE,
                targets.as_mut_ptr(),
                targets.len() as c_int,
                &mut context,
            )
        };
        Self::check(lib, "vaCreateContext", status)?;
        Ok(context)
    }

    fn destroy_context(&mut self, context: ContextId) -> Result<(), VaError> {
        let (lib, display) = self.display("vaDestroyContext")?;
        let status = unsafe { (lib.va_destroy_context)(display, context) };
        Self::check(lib, "vaDestroyContext", status)
    }

    fn begin_picture(&mut self, context: ContextId, target: SurfaceId) -> Result<(), VaError> {
        let (lib, display) = self.display("vaBeginPicture")?;
        let status = unsafe { (lib.va_begin_picture)(display, context, target) };
        Self::check(lib, "vaBeginPicture", status)
    }

    fn render_picture_params(
        &mut self,
        context: ContextId,
        params: &VAPictureParameterBufferHEVC,
    ) -> Result<(), VaError> {
        self.render_buffer(
            context,
            VA_PICTURE_PARAMETER_BUFFER_TYPE,
            std::mem::size_of::<VAPictureParameterBufferHEVC>(),
            params as *const _ as *const c_void,
        )
    }

    fn render_slice_params(
        &mut self,
        context: ContextId,
        params: &VASliceParameterBufferHEVC,
    ) -> Result<(), VaError> {
        self.render_buffer(
            context,
            VA_SLICE_PARAMETER_BUFFER_TYPE,
            std::mem::size_of::<VASliceParameterBufferHEVC>(),
            params as *const _ as *const c_void,
        )
    }

    fn render_slice_data(&mut self, context: ContextId, data: &[u8]) -> Result<(), VaError> {
        self.render_buffer(
            context,
            VA_SLICE_DATA_BUFFER_TYPE,
            data.len(),
            data.as_ptr() as *const c_void,
        )
    }

    fn end_picture(&mut self, context: ContextId) -> Result<(), VaError> {
        let result = match self.display("vaEndPicture") {
            Ok((lib, display)) => {
                let status = unsafe { (lib.va_end_picture)(display, context) };
                Self::check(lib, "vaEndPicture", status)
            }
            Err(e) => Err(e),
        };
        self.release_pending_buffers();
        result
    }

    fn sync_surface(&mut self, surface: SurfaceId) -> Result<(), VaError> {
        let (lib, display) = self.display("vaSyncSurface")?;
        let status = unsafe { (lib.va_sync_surface)(display, surface) };
        Self::check(lib, "vaSyncSurface", status)
    }

    fn derive_image(&mut self, surface: SurfaceId) -> Result<ImageInfo, VaError> {
        let (lib, display) = self.display("vaDeriveImage")?;
        let mut image = VAImage::default();
        let status = unsafe { (lib.va_derive_image)(display, surface, &mut image) };
        Self::check(lib, "vaDeriveImage", status)?;
        Ok(ImageInfo::from(&image))
    }

    fn create_image(&mut self, fourcc: u32, width: u32, height: u32) -> Result<ImageInfo, VaError> {
        let (lib, display) = self.display("vaCreateImage")?;
        let mut format = VAImageFormat {
            fourcc,
            byte_order: VA_LSB_FIRST,
            bits_per_pixel: 12,
            ..Default::default()
        };
        let mut image = VAImage::default();
        let status = unsafe {
            (lib.va_create_image)(display, &mut format, width as c_int, height as c_int, &mut image)
        };
        Self::check(lib, "vaCreateImage", status)?;
        Ok(ImageInfo::from(&image))
    }

    fn get_image(
        &mut self,
        surface: SurfaceId,
        width: u32,
        height: u32,
        image: &ImageInfo,
    ) -> Result<(), VaError> {
        let (lib, display) = self.display("vaGetImage")?;
        let status = unsafe { (lib.va_get_image)(display, surface, 0, 0, width, height, image.id) };
        Self::check(lib, "vaGetImage", status)
    }

    fn map_image(&mut self, image: &ImageInfo, read: &mut dyn FnMut(&[u8])) -> Result<(), VaError> {
        let (lib, display) = self.display("vaMapBuffer")?;
        let mut data: *mut c_void = ptr::null_mut();
        let status = unsafe { (lib.va_map_buffer)(display, image.buf, &mut data) };
        Self::check(lib, "vaMapBuffer", status)?;
        if data.is_null() {
            unsafe {
                (lib.va_unmap_buffer)(display, image.buf);
            }
            return Err(VaError::plain("vaMapBuffer", "null mapping"));
        }

        let bytes = unsafe { std::slice::from_raw_parts(data as *const u8, image.data_size as usize) };
        read(bytes);

        let status = unsafe { (lib.va_unmap_buffer)(display, image.buf) };
        Self::check(lib, "vaUnmapBuffer", status)
    }

    fn destroy_image(&mut self, image: &ImageInfo) -> Result<(), VaError> {
        let (lib, display) = self.display("vaDestroyImage")?;
        let status = unsafe { (lib.va_destroy_image)(display, image.id) };
        Self::check(lib, "vaDestroyImage", status)
    }
}

impl Drop for LibvaBackend {
    fn drop(&mut self) {
        if !self.display.is_null() {
            if let Err(e) = self.terminate() {
                tracing::warn!("{}", e);
            }
        }
        self.close_device();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_fallback_name() {
        assert_eq!(find_library(&["libva.so.2", "/nonexistent/libva.so.2"]), "libva.so.2");
        assert_eq!(find_library(&["/nonexistent/a.so", "/nonexistent/b.so"]), "/nonexistent/a.so");
    }

    #[test]
    fn test_failed_initialize_terminates_display() {
        let mut terminated = 0;
        let status = initialize_display(
            ptr::null_mut(),
            |_, _, _| VA_STATUS_ERROR_OPERATION_FAILED,
            |_| terminated += 1,
        )
        .unwrap_err();
        assert_eq!(status, VA_STATUS_ERROR_OPERATION_FAILED);
        assert_eq!(terminated, 1);

        let mut terminated = 0;
        let version = initialize_display(
            ptr::null_mut(),
            |_, major, minor| {
                *major = 1;
                *minor = 20;
                VA_STATUS_SUCCESS
            },
            |_| terminated += 1,
        )
        .unwrap();
        assert_eq!(version, (1, 20));
        assert_eq!(terminated, 0);
    }

    #[test]
    fn test_calls_before_open_fail_cleanly() {
        let mut backend = LibvaBackend::new();
        let err = backend.initialize().unwrap_err();
        assert_eq!(err.call, "vaGetDisplayDRM");
        assert!(backend.sync_surface(0).is_err());
        assert!(backend.terminate().is_ok());
        backend.close_device();
    }
}
