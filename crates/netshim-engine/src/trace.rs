//! Trace sources.
//!
//! A [`TracedCallback`] is a list of sinks invoked in connection order each
//! time the owning object reports an occurrence.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::Simulator;

pub type TraceSink<T> = Rc<dyn Fn(&Simulator, &T)>;

pub struct TracedCallback<T> {
    sinks: RefCell<Vec<TraceSink<T>>>,
}

impl<T> TracedCallback<T> {
    pub fn new() -> Self {
        Self {
            sinks: RefCell::new(Vec::new()),
        }
    }

    pub fn connect(&self, sink: impl Fn(&Simulator, &T) + 'static) {
        self.sinks.borrow_mut().push(Rc::new(sink));
    }

    /// Invokes every sink. Sinks may connect further sinks; those only see
    /// later occurrences.
    pub fn fire(&self, sim: &Simulator, value: &T) {
        let sinks = self.sinks.borrow().clone();
        for sink in sinks {
            sink(sim, value);
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.borrow().is_empty()
    }

    pub fn disconnect_all(&self) {
        self.sinks.take();
    }
}

impl<T> Default for TracedCallback<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TracedCallback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracedCallback")
            .field("sinks", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn fires_in_connection_order() {
        let sim = Simulator::new();
        let trace = TracedCallback::<u32>::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = Rc::clone(&seen);
            trace.connect(move |_, value| seen.borrow_mut().push((tag, *value)));
        }

        trace.fire(&sim, &7);

        assert_eq!(*seen.borrow(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn sinks_may_connect_during_fire() {
        let sim = Simulator::new();
        let trace = Rc::new(TracedCallback::<()>::new());
        let hits = Rc::new(Cell::new(0));
        let weak = Rc::downgrade(&trace);
        let counter = Rc::clone(&hits);
        trace.connect(move |_, ()| {
            counter.set(counter.get() + 1);
            if let Some(trace) = weak.upgrade() {
                trace.connect(|_, ()| {});
            }
        });

        trace.fire(&sim, &());
        assert_eq!(trace.len(), 2);
        assert_eq!(hits.get(), 1);

        trace.disconnect_all();
        assert!(trace.is_empty());
    }
}
