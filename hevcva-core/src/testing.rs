//! Stream builders shared by the unit tests.

use crate::nal;

/// MSB-first bit writer, the inverse of [`crate::sps::BitReader`].
pub struct BitWriter {
    bytes: Vec<u8>,
    bits: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            bits: 0,
        }
    }

    pub fn put_bit(&mut self, bit: bool) {
        if self.bits % 8 == 0 {
            self.bytes.push(0);
        }
        if bit {
            let last = self.bytes.len() - 1;
            self.bytes[last] |= 0x80 >> (self.bits % 8);
        }
        self.bits += 1;
    }

    pub fn put_bits(&mut self, value: u32, n: u32) {
        for i in (0..n).rev() {
            let bit = i < 32 && (value >> i) & 1 == 1;
            self.put_bit(bit);
        }
    }

    pub fn put_ue(&mut self, value: u32) {
        let code = value as u64 + 1;
        let len = 64 - code.leading_zeros();
        for _ in 0..len - 1 {
            self.put_bit(false);
        }
        for i in (0..len).rev() {
            self.put_bit((code >> i) & 1 == 1);
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }

    /// Append rbsp trailing bits and insert emulation prevention bytes.
    pub fn finish_escaped(mut self) -> Vec<u8> {
        self.put_bit(true);
        while self.bits % 8 != 0 {
            self.put_bit(false);
        }

        let mut out = Vec::with_capacity(self.bytes.len() + 8);
        let mut zeros = 0;
        for byte in self.bytes {
            if zeros >= 2 && byte <= 0x03 {
                out.push(0x03);
                zeros = 0;
            }
            zeros = if byte == 0 { zeros + 1 } else { 0 };
            out.push(byte);
        }
        out
    }
}

/// An 8-bit 4:2:0 SPS NAL unit (header included) for the given geometry.
pub fn sps_nal(width: u32, height: u32) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.put_bits(0, 4); // sps_video_parameter_set_id
    w.put_bits(0, 3); // sps_max_sub_layers_minus1
    w.put_bits(1, 1); // sps_temporal_id_nesting_flag
    w.put_bits(0, 2); // general_profile_space
    w.put_bits(0, 1); // general_tier_flag
    w.put_bits(1, 5); // general_profile_idc = Main
    w.put_bits(0x6000_0000, 32);
    w.put_bits(0, 48);
    w.put_bits(93, 8); // general_level_idc
    w.put_ue(0); // sps_seq_parameter_set_id
    w.put_ue(1); // chroma_format_idc
    w.put_ue(width);
    w.put_ue(height);
    w.put_bits(0, 1); // conformance_window_flag
    w.put_ue(0); // bit_depth_luma_minus8
    w.put_ue(0); // bit_depth_chroma_minus8

    let mut nal = vec![nal::SPS_NUT << 1, 0x01];
    nal.extend(w.finish_escaped());
    nal
}

/// A NAL unit with a two-byte header followed by `payload`.
pub fn nal_unit(nal_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut nal = vec![nal_type << 1, 0x01];
    nal.extend_from_slice(payload);
    nal
}

/// Join NAL units with 4-byte start codes.
pub fn annexb(units: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for unit in units {
        out.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        out.extend_from_slice(unit);
    }
    out
}

/// VPS, SPS and PPS for the given geometry.
pub fn parameter_sets(width: u32, height: u32) -> Vec<Vec<u8>> {
    vec![
        nal_unit(nal::VPS_NUT, &[0x0C, 0x01, 0xFF, 0xFF]),
        sps_nal(width, height),
        nal_unit(nal::PPS_NUT, &[0xC1, 0x72, 0xB4]),
    ]
}

/// Parameter sets followed by `frames` single-slice pictures. Each slice
/// has `first_slice_segment_in_pic_flag` set and a distinct payload.
pub fn intra_stream(width: u32, height: u32, frames: usize) -> Vec<u8> {
    let mut units = parameter_sets(width, height);
    for i in 0..frames {
        units.push(nal_unit(1, &[0x80 | (i as u8 & 0x3F), 0xA5, 0x10 + i as u8, 0x5A]));
    }
    annexb(&units)
}
