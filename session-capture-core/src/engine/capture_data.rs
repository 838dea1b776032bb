use std::ptr::NonNull;

use crate::traits::platform::SharedRegion;
use crate::transport::region::DataRegion;

/// Identity of a render client instance (its interface pointer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub usize);

/// Pointer handed out by the most recent get-buffer call of the adopted
/// client; the bytes behind it are read on the matching release call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Leech(NonNull<u8>);

// SAFETY: the pointer is only dereferenced on the render thread that
// obtained it, between its get-buffer and release-buffer calls.
unsafe impl Send for Leech {}

impl Leech {
    pub(crate) fn new(ptr: *mut u8) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub(crate) fn as_ptr(self) -> *const u8 {
        self.0.as_ptr()
    }
}

/// Scratch buffer for one render block.
///
/// It grows to the exact size requested and never shrinks, so after a few
/// blocks its capacity settles at the largest block seen.
#[derive(Debug, Default)]
pub struct CopyBuffer {
    data: Vec<u8>,
}

impl CopyBuffer {
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    fn ensure(&mut self, size: usize) {
        if size > self.data.len() {
            self.data = vec![0; size];
        }
    }

    /// `size` bytes of silence.
    pub fn zeroed(&mut self, size: usize) -> &[u8] {
        self.ensure(size);
        let block = &mut self.data[..size];
        block.fill(0);
        block
    }

    /// Copies `src` and returns the copy.
    pub fn copy_from(&mut self, src: &[u8]) -> &[u8] {
        self.ensure(src.len());
        let block = &mut self.data[..src.len()];
        block.copy_from_slice(src);
        block
    }
}

/// Mutable per-client capture state, guarded by the engine's data lock.
pub(crate) struct CaptureData<R: SharedRegion> {
    pub client: Option<ClientId>,
    pub samples_per_sec: u32,
    pub block_align: u32,
    pub leech: Option<Leech>,
    pub buffer: CopyBuffer,
    pub region: Option<DataRegion<R>>,
    /// Last mapping id handed out; each activation takes the next one.
    pub map_counter: u32,
    /// A restart was observed but activation has not succeeded yet.
    pub restart_pending: bool,
    pub truncation_warned: bool,
}

impl<R: SharedRegion> Default for CaptureData<R> {
    fn default() -> Self {
        Self {
            client: None,
            samples_per_sec: 0,
            block_align: 0,
            leech: None,
            buffer: CopyBuffer::default(),
            region: None,
            map_counter: 0,
            restart_pending: false,
            truncation_warned: false,
        }
    }
}
