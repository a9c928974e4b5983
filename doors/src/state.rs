//! Per-door server-side state: the server procedure, its attributes, and the
//! reference count that governs the unreferenced-invocation policy.

use crate::attrs::Attributes;
use crate::error::invariant_violation;
use crate::id::DoorId;
use crate::sock::LocalSocket;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};

/// Server-side representation of a client's call arguments.
///
/// Descriptor passing is out of scope (every door always carries
/// `REFUSE_DESC`), so unlike the kernel-door ABI this has no descriptor
/// array.
#[derive(Clone, Copy)]
pub struct Request<'a> {
    pub cookie: u64,
    pub data: &'a [u8],
}

/// Server-side representation of a door's results.
///
/// Returning a `Response` from [`ServerProcedure::invoke`] *is* "calling
/// `door_return`": the worker thread that invoked the procedure writes this
/// value onto the wire and then exits, which is how this runtime expresses
/// the door semantic of a server procedure that never returns to its caller.
pub struct Response<C: AsRef<[u8]>> {
    pub data: Option<C>,
}

impl<C: AsRef<[u8]>> Response<C> {
    pub fn new(data: C) -> Self {
        Self { data: Some(data) }
    }

    pub fn empty() -> Self {
        Self { data: None }
    }
}

/// A server procedure, invoked once per `door_call` and once more per
/// unreferenced-invocation event (if the door requested one).
pub trait ServerProcedure: Send + Sync {
    fn invoke(&self, cookie: u64, request: Request<'_>) -> Response<Vec<u8>>;
}

impl<F> ServerProcedure for F
where
    F: Fn(u64, Request<'_>) -> Response<Vec<u8>> + Send + Sync,
{
    fn invoke(&self, cookie: u64, request: Request<'_>) -> Response<Vec<u8>> {
        self(cookie, request)
    }
}

struct Inner {
    refcount: u64,
    attributes: Attributes,
    data_min: u64,
    data_max: u64,
    revoked: bool,
    /// Set the first time a plain-`UNREF` (non-`MULTI`) door fires its
    /// unreferenced invocation. Per §4.6/testable property 7, that flavor
    /// fires at most once over the door's whole lifetime, unlike
    /// `UNREF_MULTI` which fires on every idle transition; `IS_UNREF` alone
    /// can't express that, since it is cleared by the next `acquire`.
    was_unref: bool,
}

/// All server-side state associated with one door.
///
/// The table holds its own `Arc<DoorState>` for lookup purposes; that clone
/// is pure Rust-level ownership bookkeeping and is never reflected in
/// `refcount` (see the module-level note on `acquire`/`release` below).
/// `refcount` instead counts the accept loop's own standing self-reference
/// plus one for every dispatcher currently handling a call on this door.
pub struct DoorState {
    pub id: DoorId,
    pub cookie: u64,
    pub path: Mutex<Option<PathBuf>>,
    pub listener: Mutex<Option<Arc<LocalSocket>>>,
    procedure: Box<dyn ServerProcedure>,
    inner: Mutex<Inner>,
    condvar: Condvar,
}

impl DoorState {
    pub fn new(
        id: DoorId,
        cookie: u64,
        attributes: Attributes,
        data_max: u64,
        procedure: Box<dyn ServerProcedure>,
    ) -> Self {
        Self {
            id,
            cookie,
            path: Mutex::new(None),
            listener: Mutex::new(None),
            procedure,
            inner: Mutex::new(Inner {
                refcount: 0,
                attributes,
                data_min: 0,
                data_max,
                revoked: false,
                was_unref: false,
            }),
            condvar: Condvar::new(),
        }
    }

    pub fn procedure(&self) -> &dyn ServerProcedure {
        self.procedure.as_ref()
    }

    pub fn attributes(&self) -> Attributes {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).attributes
    }

    pub fn set_attributes(&self, attrs: Attributes) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).attributes = attrs;
    }

    pub fn data_range(&self) -> (u64, u64) {
        let g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        (g.data_min, g.data_max)
    }

    pub fn set_data_min(&self, v: u64) {
        let mut g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        g.data_min = v;
        g.attributes.remove(Attributes::IS_UNREF);
    }

    pub fn set_data_max(&self, v: u64) {
        let mut g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        g.data_max = v;
        g.attributes.remove(Attributes::IS_UNREF);
    }

    pub fn is_revoked(&self) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).revoked
    }

    /// Mark the door revoked. Idempotent. Does not itself touch `refcount`;
    /// the table's removal of its own `Arc` clone is what releases that
    /// reference, and is handled by the caller via `DoorTable::take`.
    pub fn mark_revoked(&self) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).revoked = true;
        self.condvar.notify_all();
    }

    pub fn refcount(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).refcount
    }

    /// Take a standing reference: the accept loop's own self-reference (its
    /// first action after installing the door), and one per dispatcher that
    /// begins handling a connection for this door.
    pub fn acquire(&self) {
        let mut g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        g.refcount += 1;
        g.attributes.remove(Attributes::IS_UNREF);
    }

    /// Like [`Self::acquire`], but used only by the synthetic worker that
    /// carries out an unreferenced-invocation dispatch. It must not clear
    /// `IS_UNREF`, or its own later `release` would immediately re-satisfy
    /// the firing condition and loop forever.
    pub fn acquire_for_unreferenced_dispatch(&self) {
        let mut g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        g.refcount += 1;
    }

    /// Release a standing reference. Returns `true` if this release should
    /// trigger an unreferenced-invocation dispatch: the count has dropped to
    /// one (meaning only the accept loop's own reference survives), the door
    /// requested `UNREF` or `UNREF_MULTI`, and (per invariant 6) the previous
    /// dispatch is not still outstanding.
    ///
    /// `UNREF_MULTI` takes precedence when both are set and fires every such
    /// transition; plain `UNREF` fires at most once per door, ever.
    pub fn release(&self) -> bool {
        let mut g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if g.refcount == 0 {
            invariant_violation("DoorState::release");
        }
        g.refcount -= 1;
        let is_multi = g.attributes.contains(Attributes::UNREF_MULTI);
        let wants_unref = is_multi || (g.attributes.contains(Attributes::UNREF) && !g.was_unref);
        let should_fire = g.refcount == 1 && !g.attributes.contains(Attributes::IS_UNREF) && wants_unref;
        if should_fire {
            g.attributes.insert(Attributes::IS_UNREF);
            if !is_multi {
                g.was_unref = true;
            }
        }
        self.condvar.notify_all();
        should_fire
    }

    /// Size `sock`'s receive buffer to hold at least one `door_call` frame
    /// at the current `data_max`, per §4.3 ("sets its receive buffer to at
    /// least `data_max + sizeof(door_call header)`").
    pub fn apply_rcvbuf(&self, sock: &LocalSocket) -> std::io::Result<()> {
        let (_, max) = self.data_range();
        let total = (max as usize).saturating_add(crate::wire::CALL_HEADER_LEN);
        sock.set_rcvbuf(total)
    }

    /// Re-apply the receive-buffer sizing to the live listening socket, if
    /// the door is already attached. `setparam(DATA_MAX, ..)` calls this so
    /// S3's "transport receive buffer is >= data_max + header" guarantee
    /// holds after a resize, not just at creation.
    pub fn resize_rcvbuf_if_attached(&self) {
        if let Some(listener) = self.listener.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            if let Err(e) = self.apply_rcvbuf(&listener) {
                log::warn!("failed to resize rcvbuf for door {:?}: {e}", self.id);
            }
        }
    }

    /// Record the listening socket and path established by `attach`, and
    /// wake any accept loop blocked in `wait_for_attached_or_revoked`.
    pub fn set_listener(&self, path: PathBuf, listener: Arc<LocalSocket>) {
        *self.path.lock().unwrap_or_else(|e| e.into_inner()) = Some(path);
        *self.listener.lock().unwrap_or_else(|e| e.into_inner()) = Some(listener);
        self.condvar.notify_all();
    }

    fn is_attached(&self) -> bool {
        self.listener.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Force this door's bookkeeping to the just-destroyed shape, for the
    /// post-fork child. None of the threads that held a standing reference
    /// on this door (the accept loop, any in-flight dispatcher) survive a
    /// `fork()` into the child, so their implicit releases never happen and
    /// `refcount` is left showing whatever it was at the instant of the
    /// fork. Zero it directly here instead of letting the final `Arc` drop
    /// trip `DoorState::drop`'s invariant check, and drop the listening
    /// socket so its descriptor is not leaked into the child's open-file
    /// table (it was never the child's to serve).
    pub fn force_clear_for_fork_child(&self) {
        let mut g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        g.refcount = 0;
        // Force the fd closed directly rather than relying on the `Arc`'s
        // strong count reaching zero: the accept loop's own clone of this
        // same `Arc` was never decremented (its owning thread simply
        // vanished at `fork()`, mid-lifetime, without running its drop
        // glue), so the refcount alone would never reach zero here.
        if let Some(listener) = self.listener.lock().unwrap_or_else(|e| e.into_inner()).take() {
            listener.close_now();
        }
    }

    /// Block the accept loop until the door has either been attached to a
    /// path or revoked before ever being attached.
    pub fn wait_for_attached_or_revoked(&self) {
        let g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_attached() || g.revoked {
            return;
        }
        drop(
            self.condvar
                .wait_while(g, |inner| !inner.revoked && !self.is_attached())
                .unwrap_or_else(|e| e.into_inner()),
        );
    }
}

impl Drop for DoorState {
    /// A door is only dropped once the table has released its slot and every
    /// dispatcher/accept-loop reference has gone away, so the logical
    /// refcount must be zero. A nonzero count here means a dispatcher or the
    /// accept loop leaked a reference somewhere.
    fn drop(&mut self) {
        let count = self.refcount();
        if count != 0 {
            invariant_violation("DoorState::drop");
        }
    }
}
