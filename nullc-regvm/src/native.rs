pub use nullc_metadata::NativeTrampoline;

/// Seam for dispatching a call to a function with no RegVM body
/// (`FunctionDescriptor::is_external`).
///
/// The C-ABI bridge that resolves a [`NativeTrampoline`] to an actual
/// native function pointer and marshals its arguments is out of scope for
/// the execution core (§1); this is the narrow interface the interpreter
/// needs to hand control to whatever does. Grounded in the teacher's
/// `EcalAccess` seam: rather than the interpreter knowing how to invoke a
/// native function itself, it exposes the byte range holding the call's
/// arguments and lets the handler read/overwrite it.
pub trait NativeHandler {
    /// `args` is the temp-stack byte range holding the call's arguments
    /// (`bytesToPop` bytes, in declaration order, context last). The
    /// handler overwrites the start of this same range with its return
    /// value and reports how many bytes it wrote (`0` for a void return).
    fn call(&mut self, trampoline: NativeTrampoline, args: &mut [u8]) -> Result<u32, String>;
}

/// A [`NativeHandler`] that refuses every call. The default for an
/// interpreter built without host-provided native bindings; any external
/// call traps rather than silently doing nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoNativeCalls;

impl NativeHandler for NoNativeCalls {
    fn call(&mut self, trampoline: NativeTrampoline, _args: &mut [u8]) -> Result<u32, String> {
        Err(format!(
            "no native handler installed (bind {}, call {})",
            trampoline.bind, trampoline.call
        ))
    }
}
