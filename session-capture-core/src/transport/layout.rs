//! Layout of a data region mapping: a `SharedMemoryData` header followed by
//! the payload at a 32-byte aligned offset. Producer and consumer both derive
//! the payload position from these functions.

use std::mem::{offset_of, size_of};

use crate::models::error::CaptureError;

/// Alignment of the payload start.
pub const PAYLOAD_ALIGN: usize = 32;

/// Header at the start of every data region mapping.
///
/// `buffer` is the payload offset relative to the header's own address,
/// never an absolute pointer. `size` counts the valid payload bytes and is
/// only accessed atomically.
#[repr(C)]
#[derive(Debug, Default)]
pub struct SharedMemoryData {
    pub buffer: u64,
    pub size: u64,
}

pub const HEADER_SIZE: usize = size_of::<SharedMemoryData>();
pub const SIZE_FIELD_OFFSET: usize = offset_of!(SharedMemoryData, size);

const _: () = assert!(HEADER_SIZE == 16);
const _: () = assert!(PAYLOAD_ALIGN.is_power_of_two());

pub const fn align_up(value: usize, align: usize) -> usize {
    (value + (align - 1)) & !(align - 1)
}

/// Offset of the payload from a header mapped at `base_addr`.
///
/// The payload address is the first `PAYLOAD_ALIGN` boundary at or after
/// `header_size` bytes past the header; if that leaves less than a full
/// `SharedMemoryData` before the payload, it moves one more boundary.
pub fn payload_offset(base_addr: usize, header_size: usize) -> usize {
    let start = base_addr.wrapping_add(header_size);
    let mut pos = align_up(start, PAYLOAD_ALIGN).wrapping_sub(base_addr);
    if pos < HEADER_SIZE {
        pos += PAYLOAD_ALIGN;
    }
    pos
}

/// Sizing of a data region for one capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSize {
    /// Bytes of audio the heuristic asks for.
    pub requested: usize,
    /// Total mapping size including header and alignment slack.
    pub total: usize,
}

/// Sizes a data region for `seconds` of audio at the negotiated rate.
pub fn region_size(samples_per_sec: u32, block_align: u32, seconds: f64) -> Result<RegionSize, CaptureError> {
    if samples_per_sec == 0 || block_align == 0 {
        return Err(CaptureError::Layout(format!(
            "cannot size region for {samples_per_sec} Hz with block align {block_align}"
        )));
    }
    let bytes_per_sec = samples_per_sec as f64 * block_align as f64;
    let requested = (bytes_per_sec * seconds).ceil();
    if !requested.is_finite() || requested <= 0.0 || requested > u32::MAX as f64 {
        return Err(CaptureError::Layout(format!("invalid region size: {requested} bytes")));
    }
    let requested = requested as usize;

    let header_aligned = align_up(HEADER_SIZE, PAYLOAD_ALIGN);
    let total = header_aligned + align_up(requested, PAYLOAD_ALIGN) + PAYLOAD_ALIGN;
    if u32::try_from(total).is_err() {
        return Err(CaptureError::Layout(format!("region of {total} bytes exceeds mapping limit")));
    }
    Ok(RegionSize { requested, total })
}
