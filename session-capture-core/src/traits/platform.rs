use std::time::Duration;

use crate::models::error::CaptureError;
use crate::traits::inline_patch::InlinePatch;

/// A named, system-visible auto-reset event.
pub trait NamedSignal: Send + Sync {
    fn set(&self) -> Result<(), CaptureError>;

    /// Non-blocking check. Observing the signal consumes it.
    fn try_wait(&self) -> bool;

    /// Blocks until signalled or `timeout` elapses (None = forever).
    /// Returns whether the signal was observed.
    fn wait(&self, timeout: Option<Duration>) -> bool;
}

/// A named memory mapping shared with another process.
pub trait SharedRegion: Send + Sync {
    fn name(&self) -> &str;

    /// Start of the mapped view. Stays valid while `self` lives.
    fn as_mut_ptr(&self) -> *mut u8;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Operating system services the capture engine needs inside the hooked
/// process.
///
/// Implemented by the Windows backend; tests use an in-memory fake.
pub trait CapturePlatform: Send + Sync + 'static {
    type Signal: NamedSignal;
    type Mutex: Send + Sync;
    type Region: SharedRegion;
    type GetBufferPatch: InlinePatch;
    type ReleaseBufferPatch: InlinePatch;

    fn process_id(&self) -> u32;

    fn create_signal(&self, name: &str) -> Result<Self::Signal, CaptureError>;

    fn create_mutex(&self, name: &str) -> Result<Self::Mutex, CaptureError>;

    /// Creates a zero-initialized mapping of `size` bytes.
    fn create_region(&self, name: &str, size: usize) -> Result<Self::Region, CaptureError>;

    /// Base address of a loaded module, or None when it is not loaded.
    fn module_base(&self, module: &str) -> Option<usize>;

    /// Prepares (without enabling) a patch redirecting `target` to the
    /// get-buffer replacement.
    fn patch_get_buffer(&self, target: usize) -> Result<Self::GetBufferPatch, CaptureError>;

    /// Prepares (without enabling) a patch redirecting `target` to the
    /// release-buffer replacement.
    fn patch_release_buffer(&self, target: usize) -> Result<Self::ReleaseBufferPatch, CaptureError>;
}
