//! Session configuration

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::assembler::BoundaryRule;
use crate::error::{DecodeError, Result};

pub const DEFAULT_DEVICE: &str = "/dev/dri/renderD128";
pub const DEFAULT_SURFACE_COUNT: usize = 16;
pub const MIN_SURFACE_COUNT: usize = 2;

// ============================================================================
// Geometry
// ============================================================================

/// Coded picture size in luma samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Bytes of one packed NV12 frame.
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * 3 / 2
    }

    /// 4:2:0 needs even dimensions for the chroma plane to tile exactly.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(DecodeError::Config(format!("invalid geometry {}", self)));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(DecodeError::Format(format!("geometry {} is not 4:2:0 aligned", self)));
        }
        if self.width > u16::MAX as u32 || self.height > u16::MAX as u32 {
            return Err(DecodeError::Config(format!("geometry {} too large", self)));
        }
        Ok(())
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Geometry {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(|c: char| c == 'x' || c == 'X')
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
        let width = w.trim().parse().map_err(|_| format!("bad width '{}'", w))?;
        let height = h.trim().parse().map_err(|_| format!("bad height '{}'", h))?;
        Ok(Self { width, height })
    }
}

// ============================================================================
// Session Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// DRM render node.
    pub device: PathBuf,
    /// Rotating decode targets (N).
    pub surface_count: usize,
    /// Explicit geometry. When absent the first SPS of the stream decides.
    pub geometry: Option<Geometry>,
    pub boundary: BoundaryRule,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            surface_count: DEFAULT_SURFACE_COUNT,
            geometry: None,
            boundary: BoundaryRule::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DecodeError::Io(format!("Failed to read config {}: {}", path.display(), e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| DecodeError::Config(format!("Failed to parse config {}: {}", path.display(), e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.surface_count < MIN_SURFACE_COUNT {
            return Err(DecodeError::Config(format!(
                "surface_count {} below minimum {}",
                self.surface_count, MIN_SURFACE_COUNT
            )));
        }
        if let Some(geometry) = &self.geometry {
            geometry.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.device, PathBuf::from("/dev/dri/renderD128"));
        assert_eq!(config.surface_count, 16);
        assert!(config.geometry.is_none());
        assert_eq!(config.boundary, BoundaryRule::SliceNal);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_geometry_parse_and_size() {
        let g: Geometry = "1920x1080".parse().unwrap();
        assert_eq!(g, Geometry::new(1920, 1080));
        assert_eq!(g.frame_size(), 1920 * 1080 * 3 / 2);
        assert_eq!(g.to_string(), "1920x1080");

        assert!("1920".parse::<Geometry>().is_err());
        assert!("ax2".parse::<Geometry>().is_err());
        assert!(matches!(Geometry::new(0, 2).validate(), Err(DecodeError::Config(_))));
        assert!(matches!(Geometry::new(33, 2).validate(), Err(DecodeError::Format(_))));
    }

    #[test]
    fn test_surface_count_minimum() {
        let config = SessionConfig {
            surface_count: 1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DecodeError::Config(_))));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(
            &path,
            r#"{ "surface_count": 4, "geometry": { "width": 352, "height": 288 }, "boundary": "first_slice_segment" }"#,
        )
        .unwrap();

        let config = SessionConfig::from_json_file(&path).unwrap();
        assert_eq!(config.surface_count, 4);
        assert_eq!(config.geometry, Some(Geometry::new(352, 288)));
        assert_eq!(config.boundary, BoundaryRule::FirstSliceSegment);
        assert_eq!(config.device, PathBuf::from(DEFAULT_DEVICE));

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(SessionConfig::from_json_file(&path), Err(DecodeError::Config(_))));

        let missing = dir.path().join("missing.json");
        assert!(matches!(SessionConfig::from_json_file(&missing), Err(DecodeError::Io(_))));
    }
}
