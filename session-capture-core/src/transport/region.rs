//! Producer and consumer views of a data region mapping.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};

use super::layout::{payload_offset, HEADER_SIZE, SIZE_FIELD_OFFSET};
use crate::models::error::CaptureError;
use crate::traits::platform::SharedRegion;

fn check_base(base: *mut u8, len: usize) -> Result<NonNull<u8>, CaptureError> {
    let base = NonNull::new(base).ok_or_else(|| CaptureError::Layout("data region is not mapped".into()))?;
    if base.as_ptr() as usize % std::mem::align_of::<u64>() != 0 {
        return Err(CaptureError::Layout("data region is misaligned".into()));
    }
    if len <= HEADER_SIZE {
        return Err(CaptureError::Layout(format!("data region of {len} bytes has no payload")));
    }
    Ok(base)
}

/// # Safety
/// `base` must be valid, 8-byte aligned and mapped for at least `HEADER_SIZE` bytes.
unsafe fn size_field<'a>(base: NonNull<u8>) -> &'a AtomicU64 {
    &*(base.as_ptr().add(SIZE_FIELD_OFFSET) as *const AtomicU64)
}

/// Writer side of one capture session's data region.
///
/// There is no lock against a concurrent reader: a consumer copying while a
/// block is being written may observe a torn block. The size field is stored
/// with release ordering after the payload, so a reader that loads it with
/// acquire ordering sees at least the bytes of the block it announces.
pub struct DataRegion<R: SharedRegion> {
    region: R,
    map_id: u32,
    base: NonNull<u8>,
    payload_offset: usize,
    capacity: usize,
}

// SAFETY: `base` points into `region`, which is owned and `Send`.
unsafe impl<R: SharedRegion> Send for DataRegion<R> {}

impl<R: SharedRegion> DataRegion<R> {
    /// Writes the header into a freshly created mapping.
    pub fn create(region: R, map_id: u32) -> Result<Self, CaptureError> {
        let len = region.len();
        let base = check_base(region.as_mut_ptr(), len)?;
        let offset = payload_offset(base.as_ptr() as usize, HEADER_SIZE);
        if offset >= len {
            return Err(CaptureError::Layout(format!(
                "payload offset {offset} lies outside a {len} byte region"
            )));
        }

        // SAFETY: base is valid for HEADER_SIZE bytes (checked above) and
        // aligned for u64.
        unsafe {
            ptr::write_volatile(base.as_ptr().cast::<u64>(), offset as u64);
            size_field(base).store(0, Ordering::Release);
        }

        Ok(Self {
            region,
            map_id,
            base,
            payload_offset: offset,
            capacity: len - offset,
        })
    }

    pub fn name(&self) -> &str {
        self.region.name()
    }

    pub fn map_id(&self) -> u32 {
        self.map_id
    }

    pub fn map_size(&self) -> usize {
        self.region.len()
    }

    pub fn payload_offset(&self) -> usize {
        self.payload_offset
    }

    /// Fixed payload capacity; nothing is ever written past it.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copies `block` into the payload and updates the header's size field.
    /// Returns the number of bytes published, at most `capacity()`.
    pub fn publish(&self, block: &[u8]) -> usize {
        let len = block.len().min(self.capacity);
        // SAFETY: the payload spans [payload_offset, payload_offset + capacity)
        // inside the mapping and `len` never exceeds capacity.
        unsafe {
            ptr::copy_nonoverlapping(block.as_ptr(), self.base.as_ptr().add(self.payload_offset), len);
            size_field(self.base).store(len as u64, Ordering::Release);
        }
        len
    }
}

/// Reader side of a data region, as used by a consumer that mapped the
/// region named in `HookInfo`.
#[derive(Debug)]
pub struct DataRegionReader {
    base: NonNull<u8>,
    payload_offset: usize,
    capacity: usize,
}

// SAFETY: the reader only performs volatile/atomic loads and byte copies.
unsafe impl Send for DataRegionReader {}

impl DataRegionReader {
    /// # Safety
    /// `base` must point to `len` bytes of a data region mapping that stay
    /// mapped for the lifetime of the reader.
    pub unsafe fn from_raw(base: *mut u8, len: usize) -> Result<Self, CaptureError> {
        let base = check_base(base, len)?;
        let offset = ptr::read_volatile(base.as_ptr().cast::<u64>());
        let offset = usize::try_from(offset)
            .map_err(|_| CaptureError::Layout(format!("payload offset {offset} out of range")))?;
        if offset < HEADER_SIZE || offset >= len {
            return Err(CaptureError::Layout(format!(
                "payload offset {offset} invalid for a {len} byte region"
            )));
        }
        let expected = payload_offset(base.as_ptr() as usize, HEADER_SIZE);
        if offset != expected {
            log::warn!("data region payload at {offset}, expected {expected}");
        }
        Ok(Self {
            base,
            payload_offset: offset,
            capacity: len - offset,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes of the most recently published block. Always re-read; blocks
    /// do not have a fixed size.
    pub fn valid_len(&self) -> usize {
        // SAFETY: header validated in `from_raw`.
        let size = unsafe { size_field(self.base) }.load(Ordering::Acquire);
        usize::try_from(size).unwrap_or(usize::MAX).min(self.capacity)
    }

    /// Copies the current block into `out`, replacing its contents.
    pub fn read_into(&self, out: &mut Vec<u8>) -> usize {
        let len = self.valid_len();
        out.clear();
        // SAFETY: len <= capacity, so the slice stays inside the payload.
        let payload = unsafe { std::slice::from_raw_parts(self.base.as_ptr().add(self.payload_offset), len) };
        out.extend_from_slice(payload);
        len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HeapRegion;

    #[test]
    fn create_writes_header() {
        let region = HeapRegion::new("buffer", 256);
        let data = DataRegion::create(region.clone(), 1).unwrap();
        assert_eq!(data.payload_offset(), 32);
        assert_eq!(data.capacity(), 256 - 32);

        let reader = unsafe { DataRegionReader::from_raw(region.as_mut_ptr(), region.len()) }.unwrap();
        assert_eq!(reader.capacity(), 224);
        assert_eq!(reader.valid_len(), 0);
    }

    #[test]
    fn published_block_is_visible_to_reader() {
        let region = HeapRegion::new("buffer", 256);
        let data = DataRegion::create(region.clone(), 1).unwrap();
        let reader = unsafe { DataRegionReader::from_raw(region.as_mut_ptr(), region.len()) }.unwrap();

        assert_eq!(data.publish(&[1, 2, 3, 4, 5, 6]), 6);
        let mut out = Vec::new();
        assert_eq!(reader.read_into(&mut out), 6);
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6]);

        // A smaller block shrinks the valid size.
        data.publish(&[9, 9]);
        reader.read_into(&mut out);
        assert_eq!(out, vec![9, 9]);
    }

    #[test]
    fn publish_never_exceeds_capacity() {
        let region = HeapRegion::new("buffer", 64);
        let data = DataRegion::create(region.clone(), 1).unwrap();
        let block = vec![0xAB; 100];
        assert_eq!(data.publish(&block), 32);
        assert_eq!(region.bytes()[63], 0xAB);
    }

    #[test]
    fn region_without_payload_is_rejected() {
        let region = HeapRegion::new("buffer", 16);
        assert!(matches!(DataRegion::create(region, 1), Err(CaptureError::Layout(_))));

        let region = HeapRegion::new("buffer", 32);
        assert!(matches!(DataRegion::create(region, 1), Err(CaptureError::Layout(_))));
    }

    #[test]
    fn reader_rejects_garbage_header() {
        let region = HeapRegion::new("buffer", 128);
        region.write_bytes(0, &4096u64.to_ne_bytes());
        let result = unsafe { DataRegionReader::from_raw(region.as_mut_ptr(), region.len()) };
        assert!(matches!(result, Err(CaptureError::Layout(_))));
    }
}
