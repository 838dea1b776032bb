use parking_lot::Mutex;

use crate::models::error::CaptureError;
use crate::traits::inline_patch::InlinePatch;

/// Inline hook on one function: redirect on/off plus a way to run the
/// original body.
///
/// `rehook` and `unhook` are idempotent. Replacement functions forward to the
/// original through `forward`, which removes the redirect for the duration
/// of the call so the original never re-enters the replacement through its
/// patched entry. The pair is serialized by a lock so concurrent render
/// threads cannot interleave their toggles.
pub struct FunctionHook<P: InlinePatch> {
    patch: P,
    name: String,
    hooked: Mutex<bool>,
    forward_lock: Mutex<()>,
}

impl<P: InlinePatch> FunctionHook<P> {
    /// Wraps a prepared patch. Nothing is redirected until `rehook`.
    pub fn new(patch: P, name: impl Into<String>) -> Self {
        Self {
            patch,
            name: name.into(),
            hooked: Mutex::new(false),
            forward_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_hooked(&self) -> bool {
        *self.hooked.lock()
    }

    /// Installs the redirect if it is not already in place.
    pub fn rehook(&self) -> Result<(), CaptureError> {
        let mut hooked = self.hooked.lock();
        if *hooked {
            return Ok(());
        }
        self.patch.enable().map_err(|e| self.failure(e))?;
        *hooked = true;
        log::debug!("hooked {}", self.name);
        Ok(())
    }

    /// Restores the original entry if the redirect is in place.
    pub fn unhook(&self) -> Result<(), CaptureError> {
        let mut hooked = self.hooked.lock();
        if !*hooked {
            return Ok(());
        }
        self.patch.disable().map_err(|e| self.failure(e))?;
        *hooked = false;
        Ok(())
    }

    /// Entry point of the original function.
    pub fn call(&self) -> P::Target {
        self.patch.original()
    }

    /// Runs `f` with the original function while the redirect is
    /// removed: unhook, call, rehook.
    pub fn forward<R>(&self, f: impl FnOnce(P::Target) -> R) -> R {
        let _guard = self.forward_lock.lock();
        if let Err(e) = self.unhook() {
            log::debug!("{e}");
        }
        let result = f(self.call());
        if let Err(e) = self.rehook() {
            log::warn!("{e}");
        }
        result
    }

    fn failure(&self, error: CaptureError) -> CaptureError {
        match error {
            CaptureError::HookFailed { .. } => error,
            other => CaptureError::HookFailed {
                name: self.name.clone(),
                reason: other.to_string(),
            },
        }
    }
}

impl<P: InlinePatch> Drop for FunctionHook<P> {
    fn drop(&mut self) {
        if let Err(e) = self.unhook() {
            log::warn!("{e}");
        }
    }
}
