use crate::models::error::CaptureError;

/// A prepared inline patch on one function entry.
///
/// `enable` writes the redirect to the replacement, `disable` restores the
/// original bytes. `original` returns an entry point that runs the original
/// body; callers still disable the patch around such calls (see
/// `FunctionHook::forward`).
pub trait InlinePatch: Send + Sync {
    /// Function pointer type of the patched function.
    type Target: Copy;

    fn enable(&self) -> Result<(), CaptureError>;

    fn disable(&self) -> Result<(), CaptureError>;

    fn original(&self) -> Self::Target;
}
