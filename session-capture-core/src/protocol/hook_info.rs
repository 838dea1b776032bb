//! The `HookInfo` record shared between the controller and the hooked
//! process through a per-process named mapping.
//!
//! All fields are fixed width so a 64-bit controller and a 32-bit hooked
//! process agree on every byte offset.

use std::mem::size_of;
use std::ptr::{self, addr_of, addr_of_mut, NonNull};

use crate::models::audio_models::AudioFormat;
use crate::models::config::HookRate;
use crate::models::error::CaptureError;

pub const HOOK_VERSION_MAJOR: u32 = 1;
pub const HOOK_VERSION_MINOR: u32 = 0;

/// Offsets of `IAudioRenderClient::GetBuffer` and `ReleaseBuffer` relative
/// to the base address of the module implementing them. Zero means
/// unresolved.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RenderClientOffsets {
    pub get_buffer: u64,
    pub release_buffer: u64,
}

impl RenderClientOffsets {
    pub fn new(get_buffer: u64, release_buffer: u64) -> Self {
        Self {
            get_buffer,
            release_buffer,
        }
    }

    /// Computes offsets from absolute method addresses inside a module
    /// loaded at `module_base`. An address at or below the base yields 0.
    pub fn from_addresses(module_base: usize, get_buffer: usize, release_buffer: usize) -> Self {
        let relative = |addr: usize| match addr.checked_sub(module_base) {
            Some(offset) if module_base != 0 && offset != 0 => offset as u64,
            _ => 0,
        };
        Self {
            get_buffer: relative(get_buffer),
            release_buffer: relative(release_buffer),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.get_buffer != 0 && self.release_buffer != 0
    }

    /// Relocates both offsets into a module loaded at `module_base`.
    ///
    /// Fails instead of producing an address when the module is missing or
    /// either offset is unresolved: patching a guessed address would corrupt
    /// arbitrary memory in the target.
    pub fn resolve(&self, module_base: usize, module_name: &str) -> Result<HookTargets, CaptureError> {
        if !self.is_resolved() {
            return Err(CaptureError::OffsetsUnresolved);
        }
        if module_base == 0 {
            return Err(CaptureError::ModuleNotLoaded(module_name.to_string()));
        }
        let relocate = |offset: u64| {
            usize::try_from(offset)
                .ok()
                .and_then(|offset| module_base.checked_add(offset))
                .ok_or_else(|| {
                    CaptureError::Layout(format!("offset {offset:#x} does not fit module at {module_base:#x}"))
                })
        };
        Ok(HookTargets {
            module_base,
            get_buffer: relocate(self.get_buffer)?,
            release_buffer: relocate(self.release_buffer)?,
        })
    }
}

/// Absolute entry points of the two render client methods in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookTargets {
    pub module_base: usize,
    pub get_buffer: usize,
    pub release_buffer: usize,
}

/// Fixed-layout record at the start of the hook info mapping.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookInfo {
    pub version_major: u32,
    pub version_minor: u32,

    pub channels: u32,
    pub samples_per_sec: u32,
    pub block_align: u32,

    pub map_id: u32,
    pub map_size: u32,

    /// `HookRate` wire value; also keeps `offsets` naturally aligned.
    pub hook_rate: u32,

    pub offsets: RenderClientOffsets,
}

pub const HOOK_INFO_SIZE: usize = size_of::<HookInfo>();

const _: () = assert!(HOOK_INFO_SIZE == 48);

impl HookInfo {
    pub fn check_version(&self) -> Result<(), CaptureError> {
        if self.version_major != HOOK_VERSION_MAJOR {
            return Err(CaptureError::VersionMismatch {
                expected: HOOK_VERSION_MAJOR,
                found_major: self.version_major,
                found_minor: self.version_minor,
            });
        }
        Ok(())
    }

    pub fn hook_rate(&self) -> HookRate {
        HookRate::from_raw(self.hook_rate)
    }
}

/// Volatile view of a `HookInfo` living in memory shared with another
/// process. Every access goes through the raw pointer; no reference to the
/// shared record is ever held.
#[derive(Debug)]
pub struct HookInfoView {
    ptr: NonNull<HookInfo>,
}

// SAFETY: the view only performs volatile reads/writes of plain integers.
// The other process may write concurrently, which is the documented
// weak-consistency contract of the record.
unsafe impl Send for HookInfoView {}
unsafe impl Sync for HookInfoView {}

impl HookInfoView {
    /// # Safety
    /// `ptr` must point to at least `len` bytes that stay mapped for the
    /// lifetime of the view.
    pub unsafe fn from_raw(ptr: *mut u8, len: usize) -> Result<Self, CaptureError> {
        if len < HOOK_INFO_SIZE {
            return Err(CaptureError::Layout(format!(
                "hook info mapping is {len} bytes, need {HOOK_INFO_SIZE}"
            )));
        }
        if ptr as usize % std::mem::align_of::<HookInfo>() != 0 {
            return Err(CaptureError::Layout("hook info mapping is misaligned".into()));
        }
        let ptr = NonNull::new(ptr.cast::<HookInfo>())
            .ok_or_else(|| CaptureError::Layout("hook info mapping is null".into()))?;
        Ok(Self { ptr })
    }

    pub fn read(&self) -> HookInfo {
        // SAFETY: valid for reads per `from_raw`.
        unsafe { ptr::read_volatile(self.ptr.as_ptr()) }
    }

    pub fn offsets(&self) -> RenderClientOffsets {
        // SAFETY: valid for reads per `from_raw`.
        unsafe { ptr::read_volatile(addr_of!((*self.ptr.as_ptr()).offsets)) }
    }

    /// Controller side: everything the hook needs before "init".
    pub fn write_request(&self, offsets: RenderClientOffsets, format: &AudioFormat, rate: HookRate) {
        let p = self.ptr.as_ptr();
        // SAFETY: valid for writes per `from_raw`.
        unsafe {
            ptr::write_volatile(addr_of_mut!((*p).offsets), offsets);
            ptr::write_volatile(addr_of_mut!((*p).channels), format.channels as u32);
            ptr::write_volatile(addr_of_mut!((*p).samples_per_sec), format.sample_rate);
            ptr::write_volatile(addr_of_mut!((*p).block_align), format.block_align as u32);
            ptr::write_volatile(addr_of_mut!((*p).hook_rate), rate.to_raw());
        }
    }

    /// Hook side: announce which data region mapping is authoritative.
    pub fn publish_mapping(&self, map_id: u32, map_size: u32) {
        let p = self.ptr.as_ptr();
        // SAFETY: valid for writes per `from_raw`.
        unsafe {
            ptr::write_volatile(addr_of_mut!((*p).version_major), HOOK_VERSION_MAJOR);
            ptr::write_volatile(addr_of_mut!((*p).version_minor), HOOK_VERSION_MINOR);
            ptr::write_volatile(addr_of_mut!((*p).map_id), map_id);
            ptr::write_volatile(addr_of_mut!((*p).map_size), map_size);
        }
    }
}
