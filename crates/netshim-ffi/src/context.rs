//! Simulation contexts and the entry-point wrapper.
//!
//! A [`SimContext`] is what an `ns3_sim` names. It owns one engine
//! [`Simulator`], the four handle registries, the error slot, the running
//! flag and the stateful helpers (internet stack installer, IPv4 address
//! allocator). An `ns3_sim` is not the context's address but a token drawn
//! from a counter that never repeats; the process-wide live table maps tokens
//! to boxed contexts. A destroyed token stays unknown even when the allocator
//! hands its memory to a newer context.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use netshim_config::SimConfig;
use netshim_engine::internet::{InternetStackHelper, Ipv4AddressHelper};
use netshim_engine::{Application, FlowMonitor, NetDevice, Node, Simulator};

use crate::abi::{
    ns3_app, ns3_device, ns3_flowmon, ns3_node, ns3_sim, ns3_status, NS3_ERR, NS3_OK,
};
use crate::error::{ErrorSlot, ShimError, FALLBACK};
use crate::handle;
use crate::registry::{HandleKind, Registry};
use crate::trace::PacketTraceAdapter;

/// Exposed context addresses of every simulation created and not yet
/// destroyed, keyed by token.
static LIVE: Mutex<BTreeMap<usize, usize>> = Mutex::new(BTreeMap::new());

/// Next simulation token. Zero is never issued.
static NEXT_SIM: AtomicUsize = AtomicUsize::new(1);

fn live() -> std::sync::MutexGuard<'static, BTreeMap<usize, usize>> {
    LIVE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-simulation state behind an `ns3_sim`.
pub struct SimContext {
    tag: usize,
    pub(crate) sim: Simulator,
    nodes: RefCell<Registry<Rc<Node>>>,
    devices: RefCell<Registry<Rc<dyn NetDevice>>>,
    apps: RefCell<Registry<Rc<dyn Application>>>,
    monitors: RefCell<Registry<Rc<FlowMonitor>>>,
    pub(crate) stack: RefCell<InternetStackHelper>,
    pub(crate) addresses: RefCell<Ipv4AddressHelper>,
    pub(crate) trace_adapters: RefCell<Vec<Rc<PacketTraceAdapter>>>,
    last_error: ErrorSlot,
    running: AtomicBool,
    destroy_pending: Cell<bool>,
}

/// Clears the running flag however the run exits.
pub(crate) struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SimContext {
    fn new(config: SimConfig) -> Self {
        Self {
            tag: handle::next_tag(),
            sim: Simulator::with_config(config),
            nodes: RefCell::new(Registry::new(HandleKind::Node)),
            devices: RefCell::new(Registry::new(HandleKind::Device)),
            apps: RefCell::new(Registry::new(HandleKind::Application)),
            monitors: RefCell::new(Registry::new(HandleKind::FlowMonitor)),
            stack: RefCell::new(InternetStackHelper::new()),
            addresses: RefCell::new(Ipv4AddressHelper::new()),
            trace_adapters: RefCell::new(Vec::new()),
            last_error: ErrorSlot::new(),
            running: AtomicBool::new(false),
            destroy_pending: Cell::new(false),
        }
    }

    /// Boxes a fresh context, marks it live and returns its token.
    pub(crate) fn create(config: SimConfig) -> Result<ns3_sim, ShimError> {
        let token = NEXT_SIM
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| next.checked_add(1))
            .map_err(|_| ShimError::SimulationsExhausted)?;
        let ctx = Box::new(Self::new(config));
        tracing::debug!(
            token,
            tag = ctx.tag,
            seed = ctx.sim.seed(),
            "simulation context created"
        );
        let addr = Box::into_raw(ctx).expose_provenance();
        live().insert(token, addr);
        Ok(ptr::without_provenance_mut(token))
    }

    /// The context behind a live token, or `None` once it is destroyed.
    pub(crate) fn context_ptr(sim: ns3_sim) -> Option<*mut SimContext> {
        live()
            .get(&sim.addr())
            .map(|&addr| ptr::with_exposed_provenance_mut(addr))
    }

    /// Resolves a token to a live context.
    ///
    /// Only [`SimContext::create`] inserts into the live table and only
    /// destruction removes, so a token found there maps to a context that has
    /// not been freed. Contexts are single-threaded; a destroy racing from
    /// another thread is outside the ABI contract.
    pub(crate) fn from_handle<'a>(sim: ns3_sim) -> Result<&'a SimContext, ShimError> {
        if sim.is_null() {
            return Err(ShimError::NullSimulation);
        }
        let ctx = Self::context_ptr(sim).ok_or(ShimError::UnknownSimulation)?;
        // SAFETY: live contexts are allocated and not yet freed, see above.
        Ok(unsafe { &*ctx })
    }

    pub(crate) fn is_live(sim: ns3_sim) -> bool {
        live().contains_key(&sim.addr())
    }

    /// Removes `sim` from the live table and returns its context, or `None`
    /// if the token was not live.
    pub(crate) fn retire(sim: ns3_sim) -> Option<*mut SimContext> {
        live()
            .remove(&sim.addr())
            .map(ptr::with_exposed_provenance_mut)
    }

    /// Frees a context that has already been retired.
    ///
    /// # Safety
    /// `ctx` must belong to a token that has been retired, must not be running
    /// and must not be referenced afterwards.
    pub(crate) unsafe fn free(ctx: *mut SimContext) {
        // SAFETY: caller contract.
        drop(unsafe { Box::from_raw(ctx) });
    }

    pub(crate) fn last_error(&self) -> String {
        self.last_error.get()
    }

    pub(crate) fn fail(&self, op: &'static str, error: &ShimError) {
        self.last_error.fail(op, error);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sets the running flag, failing if it was already set.
    pub(crate) fn enter_run(&self) -> Result<RunningGuard<'_>, ShimError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ShimError::AlreadyRunning);
        }
        Ok(RunningGuard(&self.running))
    }

    pub(crate) fn destroy_pending(&self) -> bool {
        self.destroy_pending.get()
    }

    /// Asks the running event loop to wind down; the context is freed when
    /// `sim_run` returns.
    pub(crate) fn defer_destroy(&self) {
        self.destroy_pending.set(true);
        self.sim.stop_at(self.sim.now());
        tracing::debug!(tag = self.tag, "destroy deferred until run returns");
    }

    // ========================================================================
    // Registries
    // ========================================================================

    fn register<T: Clone, H>(
        &self,
        registry: &RefCell<Registry<T>>,
        entity: T,
    ) -> Result<*mut H, ShimError> {
        let id = registry.borrow_mut().insert(entity)?;
        Ok(handle::encode(self.tag, id))
    }

    fn resolve<T: Clone, H>(
        &self,
        registry: &RefCell<Registry<T>>,
        handle: *mut H,
    ) -> Result<T, ShimError> {
        let registry = registry.borrow();
        let (tag, id) = handle::decode(handle);
        if tag != self.tag {
            return Err(ShimError::InvalidHandle(registry.kind()));
        }
        registry.lookup(id)
    }

    pub(crate) fn register_node(&self, node: Rc<Node>) -> Result<ns3_node, ShimError> {
        self.register(&self.nodes, node)
    }

    pub(crate) fn node(&self, handle: ns3_node) -> Result<Rc<Node>, ShimError> {
        self.resolve(&self.nodes, handle)
    }

    pub(crate) fn register_device(
        &self,
        device: Rc<dyn NetDevice>,
    ) -> Result<ns3_device, ShimError> {
        self.register(&self.devices, device)
    }

    pub(crate) fn device(
        &self,
        handle: ns3_device,
    ) -> Result<Rc<dyn NetDevice>, ShimError> {
        self.resolve(&self.devices, handle)
    }

    pub(crate) fn register_app(
        &self,
        app: Rc<dyn Application>,
    ) -> Result<ns3_app, ShimError> {
        self.register(&self.apps, app)
    }

    pub(crate) fn app(
        &self,
        handle: ns3_app,
    ) -> Result<Rc<dyn Application>, ShimError> {
        self.resolve(&self.apps, handle)
    }

    pub(crate) fn register_monitor(
        &self,
        monitor: Rc<FlowMonitor>,
    ) -> Result<ns3_flowmon, ShimError> {
        self.register(&self.monitors, monitor)
    }

    pub(crate) fn monitor(
        &self,
        handle: ns3_flowmon,
    ) -> Result<Rc<FlowMonitor>, ShimError> {
        self.resolve(&self.monitors, handle)
    }

    /// Registered entities per kind: nodes, devices, applications, monitors.
    pub(crate) fn registered(&self) -> [usize; 4] {
        [
            self.nodes.borrow().len(),
            self.devices.borrow().len(),
            self.apps.borrow().len(),
            self.monitors.borrow().len(),
        ]
    }
}

impl Drop for SimContext {
    fn drop(&mut self) {
        let [nodes, devices, apps, monitors] = self.registered();
        self.nodes.get_mut().drop_all();
        self.devices.get_mut().drop_all();
        self.apps.get_mut().drop_all();
        self.monitors.get_mut().drop_all();
        self.trace_adapters.get_mut().clear();
        self.sim.destroy();
        tracing::debug!(
            tag = self.tag,
            nodes,
            devices,
            apps,
            monitors,
            "simulation context destroyed"
        );
    }
}

/// Runs an entry point body against a live context.
///
/// Null or stale contexts are reported through the fallback slot. Errors and
/// panics raised by `body` are written to the context's slot as
/// `"<op> failed: <message>"`.
pub(crate) fn call<F>(op: &'static str, sim: ns3_sim, body: F) -> ns3_status
where
    F: FnOnce(&SimContext) -> Result<(), ShimError>,
{
    let ctx = match SimContext::from_handle(sim) {
        Ok(ctx) => ctx,
        Err(error) => {
            FALLBACK.fail(op, &error);
            return NS3_ERR;
        }
    };

    match catch_unwind(AssertUnwindSafe(|| body(ctx))) {
        Ok(Ok(())) => NS3_OK,
        Ok(Err(error)) => {
            ctx.fail(op, &error);
            NS3_ERR
        }
        Err(payload) => {
            ctx.fail(op, &ShimError::from_panic(&*payload));
            NS3_ERR
        }
    }
}

/// Same as [`call`] for operations that exist before any context does.
pub(crate) fn call_global<F>(op: &'static str, body: F) -> ns3_status
where
    F: FnOnce() -> Result<(), ShimError>,
{
    let error = match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => return NS3_OK,
        Ok(Err(error)) => error,
        Err(payload) => ShimError::from_panic(&*payload),
    };
    FALLBACK.fail(op, &error);
    NS3_ERR
}
