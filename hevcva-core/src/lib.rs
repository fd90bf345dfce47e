//! # hevcva Core
//!
//! Hardware-accelerated H.265/HEVC elementary-stream decoding over VA-API.
//! Raw Annex-B streams go in, tightly packed NV12 frames come out.

// ============================================================================
// Bitstream
// ============================================================================
pub mod annexb;
pub mod nal;
pub mod sps;
pub mod assembler;

// ============================================================================
// Hardware Decode
// ============================================================================
pub mod va;
pub mod submit;
pub mod export;

// ============================================================================
// Session
// ============================================================================
pub mod config;
pub mod error;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use assembler::{AccessUnit, BoundaryRule, FrameAssembler};
pub use annexb::{NalUnit, RawStream};
pub use config::{Geometry, SessionConfig};
pub use error::{DecodeError, Result};
pub use export::{Nv12Frame, PixelFormat};
pub use session::{DecodeSession, DecodeStats, SessionState, StreamInfo};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
