// VA-API types (from va/va.h and va/va_dec_hevc.h)
//
// Only what the HEVC VLD path touches. Layouts mirror libva 2.x.

#![allow(non_camel_case_types)]

use std::ffi::c_void;
use std::os::raw::{c_char, c_int, c_uint};

pub type VAStatus = c_int;
pub type VADisplay = *mut c_void;
pub type VAConfigID = c_uint;
pub type VAContextID = c_uint;
pub type VASurfaceID = c_uint;
pub type VABufferID = c_uint;
pub type VAImageID = c_uint;
pub type VAProfile = c_int;
pub type VAEntrypoint = c_int;
pub type VABufferType = c_int;

pub const VA_STATUS_SUCCESS: VAStatus = 0;
pub const VA_STATUS_ERROR_OPERATION_FAILED: VAStatus = 0x01;
pub const VA_STATUS_ERROR_ALLOCATION_FAILED: VAStatus = 0x02;
pub const VA_STATUS_ERROR_INVALID_SURFACE: VAStatus = 0x06;
pub const VA_STATUS_ERROR_UNSUPPORTED_PROFILE: VAStatus = 0x0c;
pub const VA_STATUS_ERROR_UNIMPLEMENTED: VAStatus = 0x14;

pub const VA_INVALID_ID: c_uint = 0xffff_ffff;
pub const VA_INVALID_SURFACE: VASurfaceID = VA_INVALID_ID;

// Profiles / entrypoints
pub const VA_PROFILE_HEVC_MAIN: VAProfile = 17;
pub const VA_ENTRYPOINT_VLD: VAEntrypoint = 1;

// RT formats
pub const VA_RT_FORMAT_YUV420: c_uint = 0x0000_0001;

// Buffer types
pub const VA_PICTURE_PARAMETER_BUFFER_TYPE: VABufferType = 0;
pub const VA_SLICE_PARAMETER_BUFFER_TYPE: VABufferType = 4;
pub const VA_SLICE_DATA_BUFFER_TYPE: VABufferType = 5;

pub const VA_SLICE_DATA_FLAG_ALL: u32 = 0x00;

pub const VA_PICTURE_HEVC_INVALID: u32 = 0x0000_0001;

pub const VA_PROGRESSIVE: c_int = 0x1;
pub const VA_LSB_FIRST: u32 = 1;

// Image formats
pub const VA_FOURCC_NV12: u32 = 0x3231_564E; // 'NV12'
pub const VA_FOURCC_I420: u32 = 0x3032_3449; // 'I420'
pub const VA_FOURCC_YV12: u32 = 0x3231_5659; // 'YV12'

const VA_PADDING_LOW: usize = 4;
const VA_PADDING_MEDIUM: usize = 8;

/// Render a fourcc code as its four ASCII characters.
pub fn fourcc_str(fourcc: u32) -> String {
    fourcc
        .to_le_bytes()
        .iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '?' })
        .collect()
}

// ============================================================================
// VA-API Structures
// ============================================================================

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VAImageFormat {
    pub fourcc: u32,
    pub byte_order: u32,
    pub bits_per_pixel: u32,
    pub depth: u32,
    pub red_mask: u32,
    pub green_mask: u32,
    pub blue_mask: u32,
    pub alpha_mask: u32,
    pub va_reserved: [u32; VA_PADDING_LOW],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VAImage {
    pub image_id: VAImageID,
    pub format: VAImageFormat,
    pub buf: VABufferID,
    pub width: u16,
    pub height: u16,
    pub data_size: u32,
    pub num_planes: u32,
    pub pitches: [u32; 3],
    pub offsets: [u32; 3],
    pub num_palette_entries: i32,
    pub entry_bytes: i32,
    pub component_order: [i8; 4],
    pub va_reserved: [u32; VA_PADDING_LOW],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VAPictureHEVC {
    pub picture_id: VASurfaceID,
    pub pic_order_cnt: i32,
    pub flags: u32,
    pub va_reserved: [u32; VA_PADDING_LOW],
}

impl VAPictureHEVC {
    pub fn invalid() -> Self {
        Self {
            picture_id: VA_INVALID_SURFACE,
            flags: VA_PICTURE_HEVC_INVALID,
            ..Default::default()
        }
    }
}

/// `pic_fields` bit positions.
pub mod pic_fields {
    pub const CHROMA_FORMAT_IDC_SHIFT: u32 = 0;
    pub const CHROMA_FORMAT_IDC_MASK: u32 = 0b11;
    pub const SEPARATE_COLOUR_PLANE_FLAG: u32 = 1 << 2;
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VAPictureParameterBufferHEVC {
    pub curr_pic: VAPictureHEVC,
    pub reference_frames: [VAPictureHEVC; 15],
    pub pic_width_in_luma_samples: u16,
    pub pic_height_in_luma_samples: u16,
    pub pic_fields: u32,
    pub sps_max_dec_pic_buffering_minus1: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub pcm_sample_bit_depth_luma_minus1: u8,
    pub pcm_sample_bit_depth_chroma_minus1: u8,
    pub log2_min_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_luma_coding_block_size: u8,
    pub log2_min_transform_block_size_minus2: u8,
    pub log2_diff_max_min_transform_block_size: u8,
    pub log2_min_pcm_luma_coding_block_size_minus3: u8,
    pub log2_diff_max_min_pcm_luma_coding_block_size: u8,
    pub max_transform_hierarchy_depth_intra: u8,
    pub max_transform_hierarchy_depth_inter: u8,
    pub init_qp_minus26: i8,
    pub diff_cu_qp_delta_depth: u8,
    pub pps_cb_qp_offset: i8,
    pub pps_cr_qp_offset: i8,
    pub log2_parallel_merge_level_minus2: u8,
    pub num_tile_columns_minus1: u8,
    pub num_tile_rows_minus1: u8,
    pub column_width_minus1: [u16; 19],
    pub row_height_minus1: [u16; 21],
    pub slice_parsing_fields: u32,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    pub num_short_term_ref_pic_sets: u8,
    pub num_long_term_ref_pic_sps: u8,
    pub num_ref_idx_l0_default_active_minus1: u8,
    pub num_ref_idx_l1_default_active_minus1: u8,
    pub pps_beta_offset_div2: i8,
    pub pps_tc_offset_div2: i8,
    pub num_extra_slice_header_bits: u8,
    pub st_rps_bits: u32,
    pub va_reserved: [u32; VA_PADDING_MEDIUM],
}

impl Default for VAPictureParameterBufferHEVC {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

impl VAPictureParameterBufferHEVC {
    pub fn chroma_format_idc(&self) -> u32 {
        (self.pic_fields >> pic_fields::CHROMA_FORMAT_IDC_SHIFT) & pic_fields::CHROMA_FORMAT_IDC_MASK
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VASliceParameterBufferHEVC {
    pub slice_data_size: u32,
    pub slice_data_offset: u32,
    pub slice_data_flag: u32,
    pub slice_data_byte_offset: u32,
    pub slice_segment_address: u32,
    pub ref_pic_list: [[u8; 15]; 2],
    pub long_slice_flags: u32,
    pub collocated_ref_idx: u8,
    pub slice_qp_delta: i8,
    pub slice_cb_qp_offset: i8,
    pub slice_cr_qp_offset: i8,
    pub slice_beta_offset_div2: i8,
    pub slice_tc_offset_div2: i8,
    pub luma_log2_weight_denom: u8,
    pub delta_chroma_log2_weight_denom: i8,
    pub delta_luma_weight_l0: [i8; 15],
    pub luma_offset_l0: [i8; 15],
    pub delta_chroma_weight_l0: [[i8; 2]; 15],
    pub chroma_offset_l0: [[i8; 2]; 15],
    pub delta_luma_weight_l1: [i8; 15],
    pub luma_offset_l1: [i8; 15],
    pub delta_chroma_weight_l1: [[i8; 2]; 15],
    pub chroma_offset_l1: [[i8; 2]; 15],
    pub five_minus_max_num_merge_cand: u8,
    pub num_entry_point_offsets: u16,
    pub entry_offset_to_subset_array: u16,
    pub slice_data_num_emu_prevn_bytes: u16,
    pub va_reserved: [u32; VA_PADDING_LOW - 2],
}

impl Default for VASliceParameterBufferHEVC {
    fn default() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

// ============================================================================
// Function Types
// ============================================================================

pub type VaGetDisplayDrmFn = unsafe extern "C" fn(c_int) -> VADisplay;
pub type VaInitializeFn = unsafe extern "C" fn(VADisplay, *mut c_int, *mut c_int) -> VAStatus;
pub type VaTerminateFn = unsafe extern "C" fn(VADisplay) -> VAStatus;
pub type VaMaxNumProfilesFn = unsafe extern "C" fn(VADisplay) -> c_int;
pub type VaMaxNumEntrypointsFn = unsafe extern "C" fn(VADisplay) -> c_int;
pub type VaQueryConfigProfilesFn = unsafe extern "C" fn(VADisplay, *mut VAProfile, *mut c_int) -> VAStatus;
pub type VaQueryConfigEntrypointsFn = unsafe extern "C" fn(VADisplay, VAProfile, *mut VAEntrypoint, *mut c_int) -> VAStatus;
pub type VaCreateConfigFn = unsafe extern "C" fn(VADisplay, VAProfile, VAEntrypoint, *mut c_void, c_int, *mut VAConfigID) -> VAStatus;
pub type VaDestroyConfigFn = unsafe extern "C" fn(VADisplay, VAConfigID) -> VAStatus;
pub type VaCreateSurfacesFn = unsafe extern "C" fn(VADisplay, c_uint, c_uint, c_uint, *mut VASurfaceID, c_uint, *mut c_void, c_uint) -> VAStatus;
pub type VaDestroySurfacesFn = unsafe extern "C" fn(VADisplay, *mut VASurfaceID, c_int) -> VAStatus;
pub type VaCreateContextFn = unsafe extern "C" fn(VADisplay, VAConfigID, c_int, c_int, c_int, *mut VASurfaceID, c_int, *mut VAContextID) -> VAStatus;
pub type VaDestroyContextFn = unsafe extern "C" fn(VADisplay, VAContextID) -> VAStatus;
pub type VaCreateBufferFn = unsafe extern "C" fn(VADisplay, VAContextID, VABufferType, c_uint, c_uint, *mut c_void, *mut VABufferID) -> VAStatus;
pub type VaDestroyBufferFn = unsafe extern "C" fn(VADisplay, VABufferID) -> VAStatus;
pub type VaBeginPictureFn = unsafe extern "C" fn(VADisplay, VAContextID, VASurfaceID) -> VAStatus;
pub type VaRenderPictureFn = unsafe extern "C" fn(VADisplay, VAContextID, *mut VABufferID, c_int) -> VAStatus;
pub type VaEndPictureFn = unsafe extern "C" fn(VADisplay, VAContextID) -> VAStatus;
pub type VaSyncSurfaceFn = unsafe extern "C" fn(VADisplay, VASurfaceID) -> VAStatus;
pub type VaDeriveImageFn = unsafe extern "C" fn(VADisplay, VASurfaceID, *mut VAImage) -> VAStatus;
pub type VaCreateImageFn = unsafe extern "C" fn(VADisplay, *mut VAImageFormat, c_int, c_int, *mut VAImage) -> VAStatus;
pub type VaGetImageFn = unsafe extern "C" fn(VADisplay, VASurfaceID, c_int, c_int, c_uint, c_uint, VAImageID) -> VAStatus;
pub type VaDestroyImageFn = unsafe extern "C" fn(VADisplay, VAImageID) -> VAStatus;
pub type VaMapBufferFn = unsafe extern "C" fn(VADisplay, VABufferID, *mut *mut c_void) -> VAStatus;
pub type VaUnmapBufferFn = unsafe extern "C" fn(VADisplay, VABufferID) -> VAStatus;
pub type VaErrorStrFn = unsafe extern "C" fn(VAStatus) -> *const c_char;
