//! Sequence parameter set geometry
//!
//! Only the leading SPS fields are read: enough to size decode surfaces
//! and reject streams the 8-bit 4:2:0 pipeline cannot handle.

use crate::annexb::NalIter;
use crate::error::{DecodeError, Result};
use crate::nal;

/// Strip emulation prevention bytes (`00 00 03` -> `00 00`).
pub fn unescape_rbsp(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;

    for &byte in data {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.push(byte);
    }

    out
}

/// MSB-first reader with Exp-Golomb support.
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn read_bit(&mut self) -> Result<u32> {
        let byte = *self
            .data
            .get(self.pos / 8)
            .ok_or_else(|| DecodeError::Format("SPS truncated".to_string()))?;
        let bit = (byte >> (7 - self.pos % 8)) & 1;
        self.pos += 1;
        Ok(bit as u32)
    }

    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        let mut val = 0u32;
        for _ in 0..n {
            val = (val << 1) | self.read_bit()?;
        }
        Ok(val)
    }

    pub fn skip_bits(&mut self, n: usize) -> Result<()> {
        if self.pos + n > self.data.len() * 8 {
            return Err(DecodeError::Format("SPS truncated".to_string()));
        }
        self.pos += n;
        Ok(())
    }

    pub fn read_ue(&mut self) -> Result<u32> {
        let mut leading_zeros = 0;
        while self.read_bit()? == 0 {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(DecodeError::Format("invalid Exp-Golomb code".to_string()));
            }
        }
        if leading_zeros == 0 {
            return Ok(0);
        }
        let suffix = self.read_bits(leading_zeros)?;
        Ok(((1u64 << leading_zeros) - 1 + suffix as u64) as u32)
    }
}

/// Fields of an SPS that matter before surface allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpsInfo {
    pub sps_id: u32,
    pub chroma_format_idc: u32,
    pub separate_colour_plane: bool,
    pub width: u32,
    pub height: u32,
    pub bit_depth_luma: u32,
    pub bit_depth_chroma: u32,
}

impl SpsInfo {
    /// The pipeline submits 8-bit 4:2:0 only.
    pub fn ensure_supported(&self) -> Result<()> {
        if self.chroma_format_idc != 1 || self.separate_colour_plane {
            return Err(DecodeError::Format(format!(
                "unsupported chroma_format_idc {} (only 4:2:0)",
                self.chroma_format_idc
            )));
        }
        if self.bit_depth_luma != 8 || self.bit_depth_chroma != 8 {
            return Err(DecodeError::Format(format!(
                "unsupported bit depth {}/{} (only 8-bit)",
                self.bit_depth_luma, self.bit_depth_chroma
            )));
        }
        Ok(())
    }
}

fn skip_profile_tier_level(reader: &mut BitReader, max_sub_layers_minus1: u32) -> Result<()> {
    // general profile space..level_idc
    reader.skip_bits(96)?;

    let mut profile_present = [false; 8];
    let mut level_present = [false; 8];
    for i in 0..max_sub_layers_minus1 as usize {
        profile_present[i] = reader.read_bit()? != 0;
        level_present[i] = reader.read_bit()? != 0;
    }
    if max_sub_layers_minus1 > 0 {
        for _ in max_sub_layers_minus1..8 {
            reader.skip_bits(2)?;
        }
    }
    for i in 0..max_sub_layers_minus1 as usize {
        if profile_present[i] {
            reader.skip_bits(88)?;
        }
        if level_present[i] {
            reader.skip_bits(8)?;
        }
    }
    Ok(())
}

/// Parse an SPS NAL unit (header included, start code excluded).
pub fn parse_sps(nal: &[u8]) -> Result<SpsInfo> {
    if nal.len() < 3 || nal::nal_type(nal[0]) != nal::SPS_NUT {
        return Err(DecodeError::Format("not an SPS NAL unit".to_string()));
    }

    let rbsp = unescape_rbsp(&nal[2..]);
    let mut reader = BitReader::new(&rbsp);

    let _vps_id = reader.read_bits(4)?;
    let max_sub_layers_minus1 = reader.read_bits(3)?;
    if max_sub_layers_minus1 > 6 {
        return Err(DecodeError::Format(format!(
            "sps_max_sub_layers_minus1 {} out of range",
            max_sub_layers_minus1
        )));
    }
    let _temporal_id_nesting = reader.read_bit()?;
    skip_profile_tier_level(&mut reader, max_sub_layers_minus1)?;

    let sps_id = reader.read_ue()?;
    let chroma_format_idc = reader.read_ue()?;
    let separate_colour_plane = chroma_format_idc == 3 && reader.read_bit()? != 0;
    let width = reader.read_ue()?;
    let height = reader.read_ue()?;

    if reader.read_bit()? != 0 {
        // conformance window offsets; the surface keeps the coded size
        for _ in 0..4 {
            reader.read_ue()?;
        }
    }

    let bit_depth_luma = reader.read_ue()? + 8;
    let bit_depth_chroma = reader.read_ue()? + 8;

    if width == 0 || height == 0 {
        return Err(DecodeError::Format(format!("invalid SPS geometry {}x{}", width, height)));
    }

    Ok(SpsInfo {
        sps_id,
        chroma_format_idc,
        separate_colour_plane,
        width,
        height,
        bit_depth_luma,
        bit_depth_chroma,
    })
}

/// Parse the first SPS found in an Annex B stream.
pub fn find_sps(stream: &[u8]) -> Option<Result<SpsInfo>> {
    NalIter::new(stream)
        .find(|nal| nal.nal_type == Some(nal::SPS_NUT))
        .map(|nal| parse_sps(&stream[nal.start..nal.end]))
}
