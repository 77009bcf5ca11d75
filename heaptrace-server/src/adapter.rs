//! The narrow capability set the core depends on instead of a concrete
//! Mono or IL2CPP binding. A real embedding resolves these as dynamic
//! symbols in the host runtime at startup; this crate ships only the
//! abstraction plus a synthetic implementation (see [`crate::mock`]) that
//! drives the same trait from a simulated heap, for demos and tests.

/// Runtime-reported origin of a root range. Only `Stack` and
/// `FinalizerQueue` are excluded from the root set — the host runtime
/// documents both as unstable and not safely walkable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootSource {
    Stack,
    FinalizerQueue,
    Handle,
    Other,
    Static,
    ThreadStatic,
    ContextStatic,
    GcHandle,
    External,
}

impl RootSource {
    pub fn is_ignored(self) -> bool {
        matches!(self, RootSource::Stack | RootSource::FinalizerQueue)
    }
}

/// Opaque handle to a runtime class/type, as the adapter would receive it
/// from the host runtime's allocation callback.
pub type ClassId = u64;

/// Host-runtime capability set. Implementations must be safe to call from
/// whichever thread the runtime invokes callbacks on.
pub trait RuntimeAdapter: Send + Sync {
    /// `"Namespace.ClassName"`, or `"<global>.ClassName"` equivalent when
    /// the runtime reports no namespace.
    fn class_name(&self, class: ClassId) -> String;

    /// Declared size in bytes for a fresh instance of `class`.
    fn object_size(&self, class: ClassId) -> u32;

    /// Caller-first method names for the current mutator call stack, most
    /// specific (innermost) call first. An empty return means the stack
    /// could not be walked (recorded as `"<no stack>"` by the caller).
    fn walk_stack(&self) -> Vec<String>;

    /// Fault-safe read of `len` bytes starting at `addr`. Bytes that
    /// cannot be read (because the runtime already freed or unmapped the
    /// memory) are returned as zero rather than causing a fault; this
    /// mirrors the platform-specific guarded read a real embedding would
    /// install around the mark phase's scan.
    fn read_memory(&self, addr: u64, len: usize) -> Vec<u8>;
}
