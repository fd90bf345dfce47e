//! Picture submission pipeline
//!
//! One access unit becomes one VA picture on the target surface:
//!
//! 1. `vaBeginPicture` on the target (fail fast)
//! 2. picture parameters: geometry, 8-bit 4:2:0, no references, POC 0
//! 3. per NAL: slice -> slice parameters + slice data,
//!    parameter set -> slice data only, anything else is skipped
//! 4. `vaEndPicture`, even when step 2 or 3 failed
//! 5. `vaSyncSurface`

use crate::annexb::RawStream;
use crate::assembler::{AccessUnit, BoundaryRule};
use crate::config::Geometry;
use crate::error::{DecodeError, Result};
use crate::nal::{self, NalClass};
use crate::va::ffi::{
    pic_fields, VAPictureHEVC, VAPictureParameterBufferHEVC, VASliceParameterBufferHEVC,
    VA_SLICE_DATA_FLAG_ALL,
};
use crate::va::{ContextId, SurfaceId, VaBackend, VaError};

/// What went into one submitted picture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitSummary {
    pub slices: usize,
    pub parameter_sets: usize,
    pub ignored: usize,
}

/// Intra-only picture parameters for `target`.
pub fn picture_parameters(target: SurfaceId, geometry: Geometry) -> VAPictureParameterBufferHEVC {
    let mut params = VAPictureParameterBufferHEVC::default();

    params.curr_pic = VAPictureHEVC {
        picture_id: target,
        pic_order_cnt: 0,
        flags: 0,
        ..Default::default()
    };
    params.reference_frames = [VAPictureHEVC::invalid(); 15];

    params.pic_width_in_luma_samples = geometry.width as u16;
    params.pic_height_in_luma_samples = geometry.height as u16;

    // 4:2:0, single colour plane
    params.pic_fields = 1 << pic_fields::CHROMA_FORMAT_IDC_SHIFT;
    params.bit_depth_luma_minus8 = 0;
    params.bit_depth_chroma_minus8 = 0;

    params
}

/// Whole-NAL slice parameters: the slice covers the entire data buffer.
pub fn slice_parameters(size: usize) -> VASliceParameterBufferHEVC {
    let mut params = VASliceParameterBufferHEVC::default();
    params.slice_data_size = size as u32;
    params.slice_data_offset = 0;
    params.slice_data_flag = VA_SLICE_DATA_FLAG_ALL;
    params.slice_segment_address = 0;
    params.ref_pic_list = [[0xFF; 15]; 2];
    params
}

fn render_access_unit(
    backend: &mut dyn VaBackend,
    context: ContextId,
    target: SurfaceId,
    geometry: Geometry,
    unit: &AccessUnit,
    stream: &RawStream,
    rule: BoundaryRule,
) -> std::result::Result<SubmitSummary, String> {
    let mut summary = SubmitSummary::default();

    backend
        .render_picture_params(context, &picture_parameters(target, geometry))
        .map_err(|e| format!("picture parameters: {}", e))?;

    for (index, nal) in unit.nals().iter().enumerate() {
        let Some(nal_type) = nal.nal_type else {
            continue;
        };
        let bytes = stream.nal_bytes(nal);
        let step = |what: &str, e: VaError| format!("{} (NAL {}, type {}): {}", what, index, nal_type, e);

        match rule.classify(nal_type) {
            NalClass::Slice => {
                backend
                    .render_slice_params(context, &slice_parameters(bytes.len()))
                    .map_err(|e| step("slice parameters", e))?;
                backend
                    .render_slice_data(context, bytes)
                    .map_err(|e| step("slice data", e))?;
                summary.slices += 1;
            }
            NalClass::ParameterSet => {
                backend
                    .render_slice_data(context, bytes)
                    .map_err(|e| step("parameter set data", e))?;
                summary.parameter_sets += 1;
            }
            NalClass::Other => {
                tracing::warn!("Skipping NAL type {} ({})", nal_type, nal::type_name(nal_type));
                summary.ignored += 1;
            }
        }
    }

    Ok(summary)
}

/// Decode one access unit into `target` and wait for completion.
pub fn submit_access_unit(
    backend: &mut dyn VaBackend,
    context: ContextId,
    target: SurfaceId,
    geometry: Geometry,
    unit: &AccessUnit,
    stream: &RawStream,
    rule: BoundaryRule,
) -> Result<SubmitSummary> {
    if unit.slice_count(rule) == 0 {
        return Err(DecodeError::Submission("access unit carries no slice".to_string()));
    }

    backend
        .begin_picture(context, target)
        .map_err(|e| DecodeError::Submission(format!("begin picture: {}", e)))?;

    let rendered = render_access_unit(backend, context, target, geometry, unit, stream, rule);
    let ended = backend.end_picture(context);

    let summary = match (rendered, ended) {
        (Ok(summary), Ok(())) => summary,
        (Err(e), ended) => {
            if let Err(end_err) = ended {
                tracing::warn!("end picture: {} (after {})", end_err, e);
            }
            return Err(DecodeError::Submission(e));
        }
        (Ok(_), Err(e)) => return Err(DecodeError::Submission(format!("end picture: {}", e))),
    };

    backend
        .sync_surface(target)
        .map_err(|e| DecodeError::Sync(format!("sync surface: {}", e)))?;

    tracing::debug!(
        "Submitted surface {:#x}: {} slices, {} parameter sets, {} skipped",
        target,
        summary.slices,
        summary.parameter_sets,
        summary.ignored
    );
    Ok(summary)
}
