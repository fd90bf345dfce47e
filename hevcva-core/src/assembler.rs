//! Access unit assembly
//!
//! Groups consecutive NAL units into one decodable picture. Two boundary
//! rules are available:
//!
//! - [`BoundaryRule::SliceNal`]: the first slice NAL (types 0..=9) closes
//!   the unit. Cheap, but a multi-slice picture becomes several units.
//! - [`BoundaryRule::FirstSliceSegment`]: a unit closes when the next NAL
//!   starts a new picture, i.e. a VCL NAL with
//!   `first_slice_segment_in_pic_flag` set or a non-VCL NAL that may only
//!   precede the first slice (parameter sets, AUD, prefix SEI, ...).

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::annexb::{NalUnit, RawStream};
use crate::nal::{self, NalClass};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryRule {
    #[default]
    SliceNal,
    FirstSliceSegment,
}

impl BoundaryRule {
    pub fn is_slice(&self, nal_type: u8) -> bool {
        match self {
            BoundaryRule::SliceNal => nal::is_legacy_slice(nal_type),
            BoundaryRule::FirstSliceSegment => nal::is_vcl_slice(nal_type),
        }
    }

    /// How the submission pipeline treats a NAL of this type.
    pub fn classify(&self, nal_type: u8) -> NalClass {
        if self.is_slice(nal_type) {
            NalClass::Slice
        } else if nal::is_parameter_set(nal_type) {
            NalClass::ParameterSet
        } else {
            NalClass::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BoundaryRule::SliceNal => "slice_nal",
            BoundaryRule::FirstSliceSegment => "first_slice_segment",
        }
    }
}

impl FromStr for BoundaryRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "slice" | "slice_nal" | "slice-nal" => Ok(BoundaryRule::SliceNal),
            "first-slice" | "first_slice" | "first_slice_segment" | "first-slice-segment" => {
                Ok(BoundaryRule::FirstSliceSegment)
            }
            other => Err(format!("unknown boundary rule '{}' (expected slice or first-slice)", other)),
        }
    }
}

/// NAL units of one picture, in stream order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessUnit {
    nals: Vec<NalUnit>,
}

impl AccessUnit {
    pub fn nals(&self) -> &[NalUnit] {
        &self.nals
    }

    pub fn len(&self) -> usize {
        self.nals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nals.is_empty()
    }

    pub fn slice_count(&self, rule: BoundaryRule) -> usize {
        self.nals
            .iter()
            .filter(|n| n.nal_type.map_or(false, |t| rule.is_slice(t)))
            .count()
    }

    fn push(&mut self, nal: NalUnit) {
        self.nals.push(nal);
    }
}

/// Pulls access units out of a [`RawStream`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameAssembler {
    rule: BoundaryRule,
}

impl FrameAssembler {
    pub fn new(rule: BoundaryRule) -> Self {
        Self { rule }
    }

    pub fn rule(&self) -> BoundaryRule {
        self.rule
    }

    /// Next complete access unit, or `None` at end of stream.
    ///
    /// Units that reach end of stream without a slice are dropped.
    pub fn next_access_unit(&self, stream: &mut RawStream) -> Option<AccessUnit> {
        let mut unit = AccessUnit::default();
        let mut has_slice = false;

        while let Some((nal, cursor)) = stream.peek_nal() {
            let Some(nal_type) = nal.nal_type else {
                stream.advance_to(cursor);
                continue;
            };

            if has_slice && self.starts_picture(stream, &nal, nal_type) {
                return Some(unit);
            }

            stream.advance_to(cursor);
            tracing::trace!("NAL {} ({}) {} bytes", nal_type, nal::type_name(nal_type), nal.len());
            unit.push(nal);

            if self.rule.is_slice(nal_type) {
                has_slice = true;
                if self.rule == BoundaryRule::SliceNal {
                    return Some(unit);
                }
            }
        }

        if has_slice {
            return Some(unit);
        }
        if !unit.is_empty() {
            tracing::debug!("Dropping {} trailing NAL units without a slice", unit.len());
        }
        None
    }

    fn starts_picture(&self, stream: &RawStream, nal: &NalUnit, nal_type: u8) -> bool {
        if nal::is_vcl_slice(nal_type) {
            nal::first_slice_segment_in_pic(stream.nal_bytes(nal)).unwrap_or(true)
        } else {
            nal::opens_access_unit(nal_type)
        }
    }
}
