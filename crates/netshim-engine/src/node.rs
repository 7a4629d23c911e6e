//! Nodes: containers for devices, applications, a protocol stack and a
//! mobility model.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::apps::{self, Application};
use crate::device::NetDevice;
use crate::internet::Ipv4L3;
use crate::mobility::ConstantPositionMobility;
use crate::Simulator;

pub struct Node {
    id: u32,
    devices: RefCell<Vec<Rc<dyn NetDevice>>>,
    applications: RefCell<Vec<Rc<dyn Application>>>,
    ipv4: RefCell<Option<Rc<Ipv4L3>>>,
    mobility: RefCell<Option<Rc<ConstantPositionMobility>>>,
    initialized: Cell<bool>,
}

impl Node {
    pub(crate) fn new(id: u32) -> Self {
        Self {
            id,
            devices: RefCell::new(Vec::new()),
            applications: RefCell::new(Vec::new()),
            ipv4: RefCell::new(None),
            mobility: RefCell::new(None),
            initialized: Cell::new(false),
        }
    }

    /// Index in the simulator's node list.
    pub fn id(&self) -> u32 {
        self.id
    }

    // ========================================================================
    // Devices
    // ========================================================================

    /// Attaches a device and returns its interface index on this node.
    pub fn add_device(&self, device: Rc<dyn NetDevice>) -> u32 {
        let mut devices = self.devices.borrow_mut();
        let index = devices.len() as u32;
        device.set_if_index(index);
        devices.push(device);
        index
    }

    pub fn device(&self, index: u32) -> Option<Rc<dyn NetDevice>> {
        self.devices.borrow().get(index as usize).cloned()
    }

    pub fn devices(&self) -> Vec<Rc<dyn NetDevice>> {
        self.devices.borrow().clone()
    }

    pub fn device_count(&self) -> u32 {
        self.devices.borrow().len() as u32
    }

    // ========================================================================
    // Applications
    // ========================================================================

    /// Attaches an application. On a node that already started simulating,
    /// the application's start and stop are scheduled right away.
    pub fn add_application(&self, sim: &Simulator, app: Rc<dyn Application>) {
        self.applications.borrow_mut().push(Rc::clone(&app));
        if self.initialized.get() {
            apps::arm(sim, &app);
        }
    }

    pub fn applications(&self) -> Vec<Rc<dyn Application>> {
        self.applications.borrow().clone()
    }

    pub fn application(&self, index: u32) -> Option<Rc<dyn Application>> {
        self.applications.borrow().get(index as usize).cloned()
    }

    // ========================================================================
    // Aggregated objects
    // ========================================================================

    pub fn ipv4(&self) -> Option<Rc<Ipv4L3>> {
        self.ipv4.borrow().clone()
    }

    pub(crate) fn set_ipv4(&self, ipv4: Rc<Ipv4L3>) {
        *self.ipv4.borrow_mut() = Some(ipv4);
    }

    pub fn mobility(&self) -> Option<Rc<ConstantPositionMobility>> {
        self.mobility.borrow().clone()
    }

    pub fn set_mobility(&self, model: Rc<ConstantPositionMobility>) {
        *self.mobility.borrow_mut() = Some(model);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    /// Schedules every attached application. Runs once per node.
    pub(crate) fn initialize(&self, sim: &Simulator) {
        if self.initialized.replace(true) {
            return;
        }
        for app in self.applications() {
            apps::arm(sim, &app);
        }
        tracing::trace!(node = self.id, "node initialized");
    }

    /// Drops everything attached to the node.
    pub(crate) fn dispose(&self) {
        for device in self.devices.take() {
            device.dispose();
        }
        self.applications.take();
        self.ipv4.take();
        self.mobility.take();
        self.initialized.set(false);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("devices", &self.device_count())
            .field("applications", &self.applications.borrow().len())
            .field("ipv4", &self.ipv4.borrow().is_some())
            .finish_non_exhaustive()
    }
}
