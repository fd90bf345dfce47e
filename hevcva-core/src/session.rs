//! Decode session
//!
//! Owns the stream, the VA resources and the surface rotation. Lifecycle:
//!
//! ```text
//! Uninitialized -> DeviceOpen -> ConfigReady -> SurfacesReady
//!               -> ContextReady -> Active <-> decode cycles -> Closed
//! ```
//!
//! Any failure while opening unwinds every handle already acquired and
//! leaves the session `Uninitialized`.

use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::annexb::RawStream;
use crate::assembler::FrameAssembler;
use crate::config::{Geometry, SessionConfig};
use crate::error::{DecodeError, Result};
use crate::export::{export_surface, FrameBuffer, Nv12Frame, PixelFormat};
use crate::sps;
use crate::submit::submit_access_unit;
use crate::va::ffi::{VA_ENTRYPOINT_VLD, VA_PROFILE_HEVC_MAIN, VA_RT_FORMAT_YUV420};
use crate::va::{ConfigId, ContextId, SurfaceId, VaBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Uninitialized,
    DeviceOpen,
    ConfigReady,
    SurfacesReady,
    ContextReady,
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub surface_count: usize,
    pub format: PixelFormat,
}

/// Counters since the last `open`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeStats {
    pub frames_decoded: u64,
    pub access_units_submitted: u64,
    pub slices_submitted: u64,
    pub nal_units_ignored: u64,
}

pub struct DecodeSession {
    config: SessionConfig,
    backend: Box<dyn VaBackend>,
    state: SessionState,

    stream: Option<RawStream>,
    assembler: FrameAssembler,
    geometry: Option<Geometry>,

    // Acquired VA handles, released in reverse order.
    device_open: bool,
    display_ready: bool,
    config_id: Option<ConfigId>,
    surfaces: Vec<SurfaceId>,
    context: Option<ContextId>,

    current_surface: usize,
    frame: FrameBuffer,
    stats: DecodeStats,
    last_error: String,
}

impl DecodeSession {
    pub fn new(config: SessionConfig, backend: Box<dyn VaBackend>) -> Self {
        let assembler = FrameAssembler::new(config.boundary);
        Self {
            config,
            backend,
            state: SessionState::Uninitialized,
            stream: None,
            assembler,
            geometry: None,
            device_open: false,
            display_ready: false,
            config_id: None,
            surfaces: Vec::new(),
            context: None,
            current_surface: 0,
            frame: FrameBuffer::new(),
            stats: DecodeStats::default(),
            last_error: String::new(),
        }
    }

    /// Session on the system libva.
    #[cfg(target_os = "linux")]
    pub fn with_libva(config: SessionConfig) -> Self {
        Self::new(config, Box::new(crate::va::libva::LibvaBackend::new()))
    }

    // ========================================================================
    // Open / Close
    // ========================================================================

    /// Load `path` and bring up the hardware decoder for it.
    ///
    /// An already-open session is closed first.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.close();
        let result = RawStream::from_file(path.as_ref()).and_then(|stream| self.start(stream));
        self.record(result)
    }

    /// Like [`open`](Self::open) for a stream already in memory.
    pub fn open_bytes(&mut self, data: impl Into<Bytes>) -> Result<()> {
        self.close();
        let stream = RawStream::new(data);
        let result = if stream.is_empty() {
            Err(DecodeError::Io("Empty stream".to_string()))
        } else {
            self.start(stream)
        };
        self.record(result)
    }

    fn start(&mut self, stream: RawStream) -> Result<()> {
        self.state = SessionState::Uninitialized;
        self.config.validate()?;

        let geometry = self.resolve_geometry(&stream)?;
        if let Err(e) = self.initialize(geometry) {
            self.teardown();
            self.state = SessionState::Uninitialized;
            return Err(e);
        }

        tracing::info!(
            "Session open: {} {} bytes, {} surfaces, {} framing",
            geometry,
            stream.len(),
            self.surfaces.len(),
            self.assembler.rule().as_str()
        );

        self.stream = Some(stream);
        self.geometry = Some(geometry);
        self.current_surface = 0;
        self.stats = DecodeStats::default();
        self.state = SessionState::Active;
        Ok(())
    }

    fn resolve_geometry(&self, stream: &RawStream) -> Result<Geometry> {
        if let Some(geometry) = self.config.geometry {
            geometry.validate()?;
            tracing::info!("Using configured geometry {}", geometry);
            return Ok(geometry);
        }

        let sps = sps::find_sps(stream.data())
            .ok_or_else(|| DecodeError::Format("no SPS in stream and no geometry configured".to_string()))??;
        sps.ensure_supported()?;

        let geometry = Geometry::new(sps.width, sps.height);
        geometry.validate()?;
        tracing::info!("Stream geometry {} from SPS {}", geometry, sps.sps_id);
        Ok(geometry)
    }

    fn initialize(&mut self, geometry: Geometry) -> Result<()> {
        self.backend
            .open_device(&self.config.device)
            .map_err(DecodeError::device)?;
        self.device_open = true;
        self.state = SessionState::DeviceOpen;

        let (major, minor) = self.backend.initialize().map_err(DecodeError::device)?;
        self.display_ready = true;
        tracing::info!(
            "VA-API {}.{} ({}) on {}",
            major,
            minor,
            self.backend.name(),
            self.config.device.display()
        );

        let profiles = self.backend.query_profiles().map_err(DecodeError::config)?;
        if !profiles.contains(&VA_PROFILE_HEVC_MAIN) {
            return Err(DecodeError::Config("driver does not support HEVC Main".to_string()));
        }
        let entrypoints = self
            .backend
            .query_entrypoints(VA_PROFILE_HEVC_MAIN)
            .map_err(DecodeError::config)?;
        if !entrypoints.contains(&VA_ENTRYPOINT_VLD) {
            return Err(DecodeError::Config("driver has no VLD entrypoint for HEVC Main".to_string()));
        }

        let config_id = self
            .backend
            .create_config(VA_PROFILE_HEVC_MAIN, VA_ENTRYPOINT_VLD)
            .map_err(DecodeError::config)?;
        self.config_id = Some(config_id);
        self.state = SessionState::ConfigReady;

        self.surfaces = self
            .backend
            .create_surfaces(
                VA_RT_FORMAT_YUV420,
                geometry.width,
                geometry.height,
                self.config.surface_count,
            )
            .map_err(DecodeError::allocation)?;
        self.state = SessionState::SurfacesReady;

        let context = self
            .backend
            .create_context(config_id, geometry.width, geometry.height, &self.surfaces)
            .map_err(DecodeError::allocation)?;
        self.context = Some(context);
        self.state = SessionState::ContextReady;

        Ok(())
    }

    /// Release whatever is held: context, surfaces, config, display, device.
    fn teardown(&mut self) {
        if let Some(context) = self.context.take() {
            if let Err(e) = self.backend.destroy_context(context) {
                tracing::warn!("{}", e);
            }
        }
        if !self.surfaces.is_empty() {
            if let Err(e) = self.backend.destroy_surfaces(&self.surfaces) {
                tracing::warn!("{}", e);
            }
            self.surfaces.clear();
        }
        if let Some(config_id) = self.config_id.take() {
            if let Err(e) = self.backend.destroy_config(config_id) {
                tracing::warn!("{}", e);
            }
        }
        if self.display_ready {
            if let Err(e) = self.backend.terminate() {
                tracing::warn!("{}", e);
            }
            self.display_ready = false;
        }
        if self.device_open {
            self.backend.close_device();
            self.device_open = false;
        }
    }

    /// Release everything. Safe to call repeatedly.
    pub fn close(&mut self) {
        let was_open = self.stream.is_some() || self.device_open;
        self.teardown();
        self.stream = None;
        self.geometry = None;
        self.current_surface = 0;
        if was_open {
            tracing::info!("Session closed after {} frames", self.stats.frames_decoded);
            self.state = SessionState::Closed;
        }
    }

    // ========================================================================
    // Decode
    // ========================================================================

    /// Decode and export the next picture.
    ///
    /// `Ok(None)` is end of stream. The returned frame borrows the session's
    /// buffer, which the next call overwrites.
    pub fn decode_next_frame(&mut self) -> Result<Option<Nv12Frame<'_>>> {
        match self.decode_into_buffer() {
            Ok(Some(geometry)) => Ok(Some(Nv12Frame {
                width: geometry.width,
                height: geometry.height,
                format: PixelFormat::Nv12,
                data: self.frame.as_slice(),
            })),
            Ok(None) => Ok(None),
            Err(e) => {
                self.last_error = e.to_string();
                Err(e)
            }
        }
    }

    fn decode_into_buffer(&mut self) -> Result<Option<Geometry>> {
        if self.state != SessionState::Active {
            return Err(DecodeError::NotInitialized);
        }
        let (Some(stream), Some(geometry), Some(context)) = (self.stream.as_mut(), self.geometry, self.context)
        else {
            return Err(DecodeError::NotInitialized);
        };

        let Some(unit) = self.assembler.next_access_unit(stream) else {
            tracing::debug!("End of stream after {} frames", self.stats.frames_decoded);
            return Ok(None);
        };

        let target = self.surfaces[self.current_surface];
        tracing::debug!(
            "Access unit of {} NAL units -> surface {} ({:#x})",
            unit.len(),
            self.current_surface,
            target
        );

        let summary = submit_access_unit(
            self.backend.as_mut(),
            context,
            target,
            geometry,
            &unit,
            stream,
            self.assembler.rule(),
        )?;
        self.stats.access_units_submitted += 1;
        self.stats.slices_submitted += summary.slices as u64;
        self.stats.nal_units_ignored += summary.ignored as u64;

        export_surface(self.backend.as_mut(), target, geometry, &mut self.frame)?;

        self.current_surface = (self.current_surface + 1) % self.surfaces.len();
        self.stats.frames_decoded += 1;
        Ok(Some(geometry))
    }

    /// Rewind the stream and the surface rotation. Hardware stays up.
    pub fn reset(&mut self) -> Result<()> {
        let result = match self.stream.as_mut() {
            Some(stream) if self.state == SessionState::Active => {
                stream.rewind();
                self.current_surface = 0;
                tracing::debug!("Session reset");
                Ok(())
            }
            _ => Err(DecodeError::NotInitialized),
        };
        self.record(result)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn stream_info(&self) -> Option<StreamInfo> {
        if self.state != SessionState::Active {
            return None;
        }
        self.geometry.map(|g| StreamInfo {
            width: g.width,
            height: g.height,
            surface_count: self.surfaces.len(),
            format: PixelFormat::Nv12,
        })
    }

    /// Most recent failure, empty if none.
    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn current_surface_index(&self) -> usize {
        self.current_surface
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            tracing::warn!("{}", e);
            self.last_error = e.to_string();
        }
        result
    }
}

impl Drop for DecodeSession {
    fn drop(&mut self) {
        self.close();
    }
}
