//! Door attribute flags, carried on the wire in `door_info` and consulted by
//! the accept loop, dispatcher, and reference-counting logic.

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Attributes: u32 {
        /// Reject calls that attempt to pass descriptors (always set; this
        /// runtime never supports descriptor passing, see §4 Non-goals).
        const REFUSE_DESC = 1 << 0;
        /// Invoke the server procedure once, with a synthetic call, whenever
        /// the door's refcount drops to the unreferenced threshold.
        const UNREF = 1 << 1;
        /// Like `UNREF`, but fires on every subsequent drop-to-threshold, not
        /// just the first.
        const UNREF_MULTI = 1 << 2;
        /// Set while an unreferenced-invocation dispatch is outstanding, so a
        /// fresh `acquire()` is needed before it can fire again.
        const IS_UNREF = 1 << 3;
        /// Door was created by this process, not merely looked up.
        const LOCAL = 1 << 4;
        /// Door has been revoked; no further calls will be accepted.
        const REVOKED = 1 << 5;
        /// Door is private: not discoverable by path lookup from other
        /// processes (reserved for future use; no Non-goal lookup path exists
        /// yet to gate).
        const PRIVATE = 1 << 6;
        /// Calls to this door may not be cancelled by client-side disconnect.
        const NO_CANCEL = 1 << 7;
    }
}

impl Default for Attributes {
    fn default() -> Self {
        Attributes::REFUSE_DESC
    }
}
