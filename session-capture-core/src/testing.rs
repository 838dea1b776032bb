//! In-memory stand-ins for the platform services, used by unit tests.

use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::models::error::CaptureError;
use crate::protocol::names::Signal;
use crate::traits::inline_patch::InlinePatch;
use crate::traits::platform::{CapturePlatform, NamedSignal, SharedRegion};

const HEAP_ALIGN: usize = 64;

struct HeapBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the block is plain zeroed memory; tests coordinate access the same
// way two processes sharing a mapping would.
unsafe impl Send for HeapBlock {}
unsafe impl Sync for HeapBlock {}

impl Drop for HeapBlock {
    fn drop(&mut self) {
        // SAFETY: allocated in `HeapRegion::new` with this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// Zeroed heap memory standing in for a named mapping. Clones share the
/// same memory, like two views of one mapping.
#[derive(Clone)]
pub struct HeapRegion {
    name: Arc<str>,
    block: Arc<HeapBlock>,
}

impl HeapRegion {
    pub fn new(name: &str, len: usize) -> Self {
        let layout = Layout::from_size_align(len.max(1), HEAP_ALIGN).unwrap();
        // SAFETY: layout has non-zero size.
        let ptr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) }).unwrap();
        Self {
            name: name.into(),
            block: Arc::new(HeapBlock { ptr, layout }),
        }
    }

    /// Snapshot of the whole region.
    pub fn bytes(&self) -> Vec<u8> {
        // SAFETY: the block is valid for `len` bytes.
        unsafe { std::slice::from_raw_parts(self.block.ptr.as_ptr(), self.len()) }.to_vec()
    }

    pub fn write_bytes(&self, offset: usize, data: &[u8]) {
        assert!(offset + data.len() <= self.len());
        // SAFETY: bounds checked above.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), self.block.ptr.as_ptr().add(offset), data.len()) }
    }
}

impl SharedRegion for HeapRegion {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_mut_ptr(&self) -> *mut u8 {
        self.block.ptr.as_ptr()
    }

    fn len(&self) -> usize {
        self.block.layout.size()
    }
}

/// Auto-reset event.
#[derive(Default)]
pub struct FakeSignal {
    state: Mutex<bool>,
    cond: Condvar,
    sets: AtomicUsize,
}

impl FakeSignal {
    /// Number of times the signal has been set.
    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    /// Whether the signal is set, without consuming it.
    pub fn peek(&self) -> bool {
        *self.state.lock()
    }
}

impl NamedSignal for Arc<FakeSignal> {
    fn set(&self) -> Result<(), CaptureError> {
        *self.state.lock() = true;
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.cond.notify_all();
        Ok(())
    }

    fn try_wait(&self) -> bool {
        std::mem::replace(&mut *self.state.lock(), false)
    }

    fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        while !*state {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.cond.wait(&mut state),
            }
        }
        std::mem::replace(&mut *state, false)
    }
}

#[derive(Default)]
struct PatchState {
    target: usize,
    enabled: AtomicBool,
    enables: AtomicUsize,
    disables: AtomicUsize,
    fail_enable: AtomicBool,
}

/// Patch that only records whether it is enabled.
pub struct FakePatch<T> {
    state: Arc<PatchState>,
    original: T,
}

impl<T: Copy> Clone for FakePatch<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            original: self.original,
        }
    }
}

impl<T: Copy> FakePatch<T> {
    pub fn new(target: usize, original: T) -> Self {
        Self {
            state: Arc::new(PatchState {
                target,
                ..PatchState::default()
            }),
            original,
        }
    }

    pub fn target(&self) -> usize {
        self.state.target
    }

    pub fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::SeqCst)
    }

    pub fn enables(&self) -> usize {
        self.state.enables.load(Ordering::SeqCst)
    }

    pub fn disables(&self) -> usize {
        self.state.disables.load(Ordering::SeqCst)
    }

    pub fn fail_enable(&self, fail: bool) {
        self.state.fail_enable.store(fail, Ordering::SeqCst);
    }
}

impl<T: Copy + Send + Sync> InlinePatch for FakePatch<T> {
    type Target = T;

    fn enable(&self) -> Result<(), CaptureError> {
        if self.state.fail_enable.load(Ordering::SeqCst) {
            return Err(CaptureError::Platform("patch rejected".into()));
        }
        self.state.enabled.store(true, Ordering::SeqCst);
        self.state.enables.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn disable(&self) -> Result<(), CaptureError> {
        self.state.enabled.store(false, Ordering::SeqCst);
        self.state.disables.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn original(&self) -> T {
        self.original
    }
}

pub type FakeGetBuffer = fn(client: usize, frames: u32) -> i32;
pub type FakeReleaseBuffer = fn(client: usize, frames: u32, flags: u32) -> i32;

fn original_get_buffer(_client: usize, _frames: u32) -> i32 {
    0
}

fn original_release_buffer(_client: usize, _frames: u32, _flags: u32) -> i32 {
    0
}

#[derive(Default)]
struct FakeState {
    pid: u32,
    signals: Mutex<HashMap<String, Arc<FakeSignal>>>,
    regions: Mutex<HashMap<String, HeapRegion>>,
    module_base: Mutex<Option<usize>>,
    fail_regions: AtomicBool,
    fail_signal: Mutex<Option<String>>,
    get_patches: Mutex<Vec<FakePatch<FakeGetBuffer>>>,
    release_patches: Mutex<Vec<FakePatch<FakeReleaseBuffer>>>,
}

/// Platform backed by heap memory and condition variables. Clones share
/// state so a test can play the controller while the engine owns a copy.
#[derive(Clone)]
pub struct FakePlatform {
    state: Arc<FakeState>,
}

impl FakePlatform {
    pub fn new(pid: u32) -> Self {
        Self {
            state: Arc::new(FakeState {
                pid,
                ..FakeState::default()
            }),
        }
    }

    pub fn signal(&self, signal: Signal) -> Arc<FakeSignal> {
        self.named_signal(&signal.name(self.state.pid))
    }

    fn named_signal(&self, name: &str) -> Arc<FakeSignal> {
        Arc::clone(self.state.signals.lock().entry(name.to_string()).or_default())
    }

    pub fn region(&self, name: &str) -> Option<HeapRegion> {
        self.state.regions.lock().get(name).cloned()
    }

    pub fn set_module_base(&self, base: Option<usize>) {
        *self.state.module_base.lock() = base;
    }

    pub fn fail_regions(&self, fail: bool) {
        self.state.fail_regions.store(fail, Ordering::SeqCst);
    }

    pub fn fail_signal(&self, signal: Signal) {
        *self.state.fail_signal.lock() = Some(signal.name(self.state.pid));
    }

    pub fn get_buffer_patches(&self) -> Vec<FakePatch<FakeGetBuffer>> {
        self.state.get_patches.lock().clone()
    }

    pub fn release_buffer_patches(&self) -> Vec<FakePatch<FakeReleaseBuffer>> {
        self.state.release_patches.lock().clone()
    }
}

impl CapturePlatform for FakePlatform {
    type Signal = Arc<FakeSignal>;
    type Mutex = String;
    type Region = HeapRegion;
    type GetBufferPatch = FakePatch<FakeGetBuffer>;
    type ReleaseBufferPatch = FakePatch<FakeReleaseBuffer>;

    fn process_id(&self) -> u32 {
        self.state.pid
    }

    fn create_signal(&self, name: &str) -> Result<Self::Signal, CaptureError> {
        if self.state.fail_signal.lock().as_deref() == Some(name) {
            return Err(CaptureError::resource(name, "access denied"));
        }
        Ok(self.named_signal(name))
    }

    fn create_mutex(&self, name: &str) -> Result<Self::Mutex, CaptureError> {
        Ok(name.to_string())
    }

    fn create_region(&self, name: &str, size: usize) -> Result<Self::Region, CaptureError> {
        if self.state.fail_regions.load(Ordering::SeqCst) {
            return Err(CaptureError::resource(name, "out of memory"));
        }
        let region = HeapRegion::new(name, size);
        self.state.regions.lock().insert(name.to_string(), region.clone());
        Ok(region)
    }

    fn module_base(&self, _module: &str) -> Option<usize> {
        *self.state.module_base.lock()
    }

    fn patch_get_buffer(&self, target: usize) -> Result<Self::GetBufferPatch, CaptureError> {
        let patch = FakePatch::new(target, original_get_buffer as FakeGetBuffer);
        self.state.get_patches.lock().push(patch.clone());
        Ok(patch)
    }

    fn patch_release_buffer(&self, target: usize) -> Result<Self::ReleaseBufferPatch, CaptureError> {
        let patch = FakePatch::new(target, original_release_buffer as FakeReleaseBuffer);
        self.state.release_patches.lock().push(patch.clone());
        Ok(patch)
    }
}
