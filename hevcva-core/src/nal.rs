//! HEVC NAL unit header helpers
//!
//! Two-byte header: forbidden_zero_bit (1) | nal_unit_type (6) |
//! nuh_layer_id (6) | nuh_temporal_id_plus1 (3).

pub const VPS_NUT: u8 = 32;
pub const SPS_NUT: u8 = 33;
pub const PPS_NUT: u8 = 34;
pub const AUD_NUT: u8 = 35;
pub const PREFIX_SEI_NUT: u8 = 39;

/// `nal_unit_type` of a header byte. Always in `0..=63`.
pub fn nal_type(header: u8) -> u8 {
    (header >> 1) & 0x3F
}

/// How the submission pipeline treats a NAL unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalClass {
    /// Carries slice segment data; gets slice parameters plus slice data.
    Slice,
    /// VPS/SPS/PPS; submitted as slice data only.
    ParameterSet,
    /// Not submitted.
    Other,
}

/// Slice-segment NAL types the legacy framing recognises.
pub fn is_legacy_slice(nal_type: u8) -> bool {
    nal_type <= 9
}

/// Every VCL type defined by H.265: trailing/leading pictures plus IRAP.
pub fn is_vcl_slice(nal_type: u8) -> bool {
    nal_type <= 9 || (16..=21).contains(&nal_type)
}

pub fn is_parameter_set(nal_type: u8) -> bool {
    (VPS_NUT..=PPS_NUT).contains(&nal_type)
}

/// Non-VCL types that may only appear before the first slice of a picture.
pub fn opens_access_unit(nal_type: u8) -> bool {
    matches!(nal_type, VPS_NUT..=AUD_NUT | PREFIX_SEI_NUT | 41..=44 | 48..=55)
}

/// `first_slice_segment_in_pic_flag`, the first bit after the NAL header.
pub fn first_slice_segment_in_pic(nal: &[u8]) -> Option<bool> {
    nal.get(2).map(|b| b & 0x80 != 0)
}

pub fn type_name(nal_type: u8) -> &'static str {
    match nal_type {
        0 => "TRAIL_N",
        1 => "TRAIL_R",
        2 => "TSA_N",
        3 => "TSA_R",
        4 => "STSA_N",
        5 => "STSA_R",
        6 => "RADL_N",
        7 => "RADL_R",
        8 => "RASL_N",
        9 => "RASL_R",
        16 => "BLA_W_LP",
        17 => "BLA_W_RADL",
        18 => "BLA_N_LP",
        19 => "IDR_W_RADL",
        20 => "IDR_N_LP",
        21 => "CRA_NUT",
        VPS_NUT => "VPS",
        SPS_NUT => "SPS",
        PPS_NUT => "PPS",
        AUD_NUT => "AUD",
        36 => "EOS",
        37 => "EOB",
        38 => "FD",
        PREFIX_SEI_NUT => "PREFIX_SEI",
        40 => "SUFFIX_SEI",
        _ => "RESERVED",
    }
}
