use retour::{Function, GenericDetour};

use session_capture_core::models::error::CaptureError;
use session_capture_core::traits::inline_patch::InlinePatch;

/// Inline patch of a function entry, backed by a `retour` detour.
pub struct DetourPatch<T: Function> {
    detour: GenericDetour<T>,
    name: &'static str,
}

// SAFETY: `GenericDetour` only holds code addresses and its trampoline;
// enable/disable are serialized by `FunctionHook`.
unsafe impl<T: Function> Send for DetourPatch<T> {}
unsafe impl<T: Function> Sync for DetourPatch<T> {}

impl<T: Function> DetourPatch<T> {
    /// Prepares a detour of the function at `target` to `replacement`.
    ///
    /// # Safety
    /// `target` must be the entry of a function with signature `T`.
    pub unsafe fn new(name: &'static str, target: usize, replacement: T) -> Result<Self, CaptureError> {
        let target = T::from_ptr(target as *const ());
        let detour = GenericDetour::new(target, replacement).map_err(|e| CaptureError::HookFailed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { detour, name })
    }

    fn failure(&self, error: retour::Error) -> CaptureError {
        CaptureError::HookFailed {
            name: self.name.to_string(),
            reason: error.to_string(),
        }
    }
}

impl<T: Function + Copy> InlinePatch for DetourPatch<T> {
    type Target = T;

    fn enable(&self) -> Result<(), CaptureError> {
        unsafe { self.detour.enable() }.map_err(|e| self.failure(e))
    }

    fn disable(&self) -> Result<(), CaptureError> {
        unsafe { self.detour.disable() }.map_err(|e| self.failure(e))
    }

    fn original(&self) -> T {
        // SAFETY: the trampoline has the target's signature and stays valid
        // while the detour lives.
        unsafe { T::from_ptr(self.detour.trampoline() as *const ()) }
    }
}
