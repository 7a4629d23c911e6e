//! The discrete-event simulator.
//!
//! A [`Simulator`] owns everything that ns-3 keeps in process-wide singletons:
//! the event queue, the clock, the random stream and the node list. Several
//! simulators can therefore coexist in one process without interfering.
//!
//! All methods take `&self`. Events run with a shared reference to the
//! simulator and may schedule further events, stop the run or reconfigure
//! objects; no interior borrow is held while an event executes.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use netshim_config::SimConfig;
use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::event::{Event, EventId, EventKind, EventQueue};
use crate::node::Node;
use crate::packet::Mac48;
use crate::time::Time;
use crate::EngineError;

/// A single simulation: clock, scheduler, random stream and topology.
pub struct Simulator {
    config: SimConfig,
    now: Cell<Time>,
    queue: RefCell<EventQueue>,
    rng: RefCell<SmallRng>,
    seed: Cell<u32>,
    nodes: RefCell<Vec<Rc<Node>>>,
    running: Cell<bool>,
    next_packet_uid: Cell<u64>,
    next_mac: Cell<u64>,
    next_monitor_id: Cell<u32>,
    events_executed: Cell<u64>,
}

/// Clears the running flag however `run` exits.
struct RunningGuard<'a>(&'a Cell<bool>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Simulator {
    pub fn new() -> Self {
        Self::with_config(SimConfig::default())
    }

    pub fn with_config(config: SimConfig) -> Self {
        let seed = config.simulator.seed;
        Self {
            config,
            now: Cell::new(Time::ZERO),
            queue: RefCell::new(EventQueue::new()),
            rng: RefCell::new(SmallRng::seed_from_u64(u64::from(seed))),
            seed: Cell::new(seed),
            nodes: RefCell::new(Vec::new()),
            running: Cell::new(false),
            next_packet_uid: Cell::new(0),
            next_mac: Cell::new(1),
            next_monitor_id: Cell::new(1),
            events_executed: Cell::new(0),
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    // ========================================================================
    // Clock and scheduling
    // ========================================================================

    /// Current simulation time.
    pub fn now(&self) -> Time {
        self.now.get()
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Schedules `f` to run `delay` after the current time.
    pub fn schedule(&self, delay: Time, f: impl FnOnce(&Simulator) + 'static) -> EventId {
        self.schedule_at(self.now() + delay, f)
    }

    /// Schedules `f` at the current time, after every event already due now.
    pub fn schedule_now(&self, f: impl FnOnce(&Simulator) + 'static) -> EventId {
        self.schedule_at(self.now(), f)
    }

    /// Schedules `f` at an absolute time; past times are clamped to now.
    pub fn schedule_at(&self, at: Time, f: impl FnOnce(&Simulator) + 'static) -> EventId {
        let at = at.max(self.now());
        self.queue
            .borrow_mut()
            .schedule(at, EventKind::Invoke(Box::new(f)))
    }

    /// Cancels a pending event. Returns `false` if it already ran.
    pub fn cancel(&self, id: EventId) -> bool {
        self.queue.borrow_mut().cancel(id)
    }

    /// Terminates the run at absolute time `at`.
    ///
    /// A time in the past stops the run at the next dispatch boundary. When
    /// several stops are pending the earliest wins. Events still queued when
    /// the stop fires are discarded.
    pub fn stop_at(&self, at: Time) -> EventId {
        let at = at.max(self.now());
        tracing::debug!(at = %at, "stop scheduled");
        self.queue.borrow_mut().schedule(at, EventKind::Stop)
    }

    /// Number of events still pending.
    pub fn pending_events(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Number of events executed since creation.
    pub fn events_executed(&self) -> u64 {
        self.events_executed.get()
    }

    fn next_event(&self) -> Option<Event> {
        self.queue.borrow_mut().pop()
    }

    /// Runs the event loop until the queue drains or a stop fires.
    ///
    /// Nodes that have not been initialized yet are initialized first, which
    /// schedules the start and stop of their applications.
    pub fn run(&self) -> Result<(), EngineError> {
        if self.running.replace(true) {
            return Err(EngineError::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.running);

        for node in self.nodes() {
            node.initialize(self);
        }

        tracing::debug!(pending = self.pending_events(), "simulation run started");
        while let Some(event) = self.next_event() {
            self.now.set(event.time.max(self.now()));
            match event.kind {
                EventKind::Invoke(f) => {
                    self.events_executed.set(self.events_executed.get() + 1);
                    f(self);
                }
                EventKind::Stop => {
                    let discarded = self.queue.borrow_mut().drain();
                    tracing::debug!(
                        now = %self.now(),
                        discarded = discarded.len(),
                        "simulation stopped"
                    );
                    drop(discarded);
                    break;
                }
            }
        }
        tracing::debug!(now = %self.now(), "simulation run finished");
        Ok(())
    }

    /// Releases every event, node, device and trace binding and rewinds the
    /// clock. The simulator can be reused afterwards.
    pub fn destroy(&self) {
        let events = self.queue.borrow_mut().drain();
        let nodes = self.nodes.take();
        tracing::debug!(
            events = events.len(),
            nodes = nodes.len(),
            "simulator destroyed"
        );
        drop(events);
        for node in &nodes {
            node.dispose();
        }
        drop(nodes);
        self.now.set(Time::ZERO);
    }

    // ========================================================================
    // Randomness
    // ========================================================================

    /// Reseeds the random stream.
    pub fn set_seed(&self, seed: u32) {
        self.seed.set(seed);
        *self.rng.borrow_mut() = SmallRng::seed_from_u64(u64::from(seed));
        tracing::debug!(seed, "simulator reseeded");
    }

    pub fn seed(&self) -> u32 {
        self.seed.get()
    }

    /// Runs `f` with the simulator's random stream.
    pub fn with_rng<R>(&self, f: impl FnOnce(&mut SmallRng) -> R) -> R {
        f(&mut self.rng.borrow_mut())
    }

    // ========================================================================
    // Topology
    // ========================================================================

    /// Creates `count` nodes with consecutive ids.
    pub fn create_nodes(&self, count: u32) -> Vec<Rc<Node>> {
        let mut nodes = self.nodes.borrow_mut();
        let created: Vec<_> = (0..count)
            .map(|_| {
                let node = Rc::new(Node::new(nodes.len() as u32));
                nodes.push(Rc::clone(&node));
                node
            })
            .collect();
        tracing::debug!(count, total = nodes.len(), "nodes created");
        created
    }

    /// Snapshot of the node list.
    pub fn nodes(&self) -> Vec<Rc<Node>> {
        self.nodes.borrow().clone()
    }

    pub fn node(&self, id: u32) -> Option<Rc<Node>> {
        self.nodes.borrow().get(id as usize).cloned()
    }

    pub fn node_count(&self) -> u32 {
        self.nodes.borrow().len() as u32
    }

    // ========================================================================
    // Identifiers
    // ========================================================================

    pub(crate) fn allocate_packet_uid(&self) -> u64 {
        let uid = self.next_packet_uid.get();
        self.next_packet_uid.set(uid + 1);
        uid
    }

    pub(crate) fn allocate_mac(&self) -> Mac48 {
        let next = self.next_mac.get();
        self.next_mac.set(next + 1);
        Mac48::from_counter(next)
    }

    pub(crate) fn allocate_monitor_id(&self) -> u32 {
        let id = self.next_monitor_id.get();
        self.next_monitor_id.set(id + 1);
        id
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.destroy();
    }
}
