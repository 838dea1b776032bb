//! Named file mappings backed by the paging file.

use std::ffi::c_void;

use windows::core::HSTRING;
use windows::Win32::Foundation::INVALID_HANDLE_VALUE;
use windows::Win32::System::Memory::{
    CreateFileMappingW, MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, FILE_MAP_ALL_ACCESS,
    MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE,
};

use crate::kernel_objects::OwnedHandle;
use session_capture_core::models::error::CaptureError;
use session_capture_core::traits::platform::SharedRegion;

/// A mapped view of a named mapping. Unmapped and closed on drop.
#[derive(Debug)]
pub struct MappedRegion {
    name: String,
    _mapping: OwnedHandle,
    view: *mut c_void,
    len: usize,
}

// SAFETY: the view is plain shared memory; concurrent access follows the
// protocol of whatever record lives in it.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Creates a zero-initialized mapping of `len` bytes.
    pub fn create(name: &str, len: usize) -> Result<Self, CaptureError> {
        let size = len as u64;
        let mapping = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                None,
                PAGE_READWRITE,
                (size >> 32) as u32,
                size as u32,
                &HSTRING::from(name),
            )
        }
        .map_err(|e| CaptureError::resource(name, e))?;
        Self::map(name, OwnedHandle::from_raw(mapping), len)
    }

    /// Opens a mapping another process created and maps its first `len` bytes.
    pub fn open(name: &str, len: usize) -> Result<Self, CaptureError> {
        let mapping = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS.0, false, &HSTRING::from(name)) }
            .map_err(|e| CaptureError::resource(name, e))?;
        Self::map(name, OwnedHandle::from_raw(mapping), len)
    }

    fn map(name: &str, mapping: OwnedHandle, len: usize) -> Result<Self, CaptureError> {
        let view = unsafe { MapViewOfFile(mapping.raw(), FILE_MAP_ALL_ACCESS, 0, 0, len) };
        if view.Value.is_null() {
            let reason = windows::core::Error::from_thread();
            return Err(CaptureError::resource(format!("view of {}", name), reason));
        }
        Ok(Self {
            name: name.to_string(),
            _mapping: mapping,
            view: view.Value,
            len,
        })
    }
}

impl SharedRegion for MappedRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_mut_ptr(&self) -> *mut u8 {
        self.view.cast()
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        unsafe {
            let _ = UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS { Value: self.view });
        }
    }
}
