//! Per-kind entity registries.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::ShimError;
use crate::handle::MAX_ID;

/// The four kinds of entity a foreign caller can hold a handle to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Node,
    Device,
    Application,
    FlowMonitor,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandleKind::Node => "node",
            HandleKind::Device => "device",
            HandleKind::Application => "application",
            HandleKind::FlowMonitor => "flow monitor",
        })
    }
}

/// Id to entity map with a monotonic id counter starting at 1.
///
/// Ids are never recycled; entries live until [`Registry::drop_all`].
pub struct Registry<T> {
    kind: HandleKind,
    entries: BTreeMap<u64, T>,
    next_id: u64,
}

impl<T: Clone> Registry<T> {
    pub fn new(kind: HandleKind) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn insert(&mut self, entity: T) -> Result<u64, ShimError> {
        let id = self.next_id;
        if id > MAX_ID {
            return Err(ShimError::RegistryFull(self.kind));
        }
        self.next_id += 1;
        self.entries.insert(id, entity);
        Ok(id)
    }

    pub fn lookup(&self, id: u64) -> Result<T, ShimError> {
        self.entries
            .get(&id)
            .cloned()
            .ok_or(ShimError::InvalidHandle(self.kind))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn drop_all(&mut self) {
        self.entries.clear();
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("len", &self.entries.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ids_start_at_one() {
        let mut registry = Registry::new(HandleKind::Node);
        assert_eq!(registry.insert("a").unwrap(), 1);
        assert_eq!(registry.insert("b").unwrap(), 2);
        assert_eq!(registry.lookup(2).unwrap(), "b");
    }

    #[test]
    fn miss_names_the_kind() {
        let registry: Registry<u8> = Registry::new(HandleKind::FlowMonitor);
        let err = registry.lookup(0).unwrap_err();
        assert_eq!(err.to_string(), "Invalid flow monitor handle");
    }

    #[test]
    fn ids_are_not_recycled_after_drop_all() {
        let mut registry = Registry::new(HandleKind::Device);
        registry.insert(1).unwrap();
        registry.insert(2).unwrap();
        registry.drop_all();
        assert!(registry.is_empty());
        assert!(registry.lookup(1).is_err());
        assert_eq!(registry.insert(3).unwrap(), 3);
    }

    proptest! {
        #[test]
        fn ids_strictly_increase(count in 1usize..200) {
            let mut registry = Registry::new(HandleKind::Application);
            let ids: Vec<u64> = (0..count).map(|i| registry.insert(i).unwrap()).collect();
            prop_assert_eq!(ids[0], 1);
            prop_assert!(ids.windows(2).all(|w| w[1] == w[0] + 1));
            for (i, id) in ids.iter().enumerate() {
                prop_assert_eq!(registry.lookup(*id).unwrap(), i);
            }
            prop_assert_eq!(registry.len(), count);
        }
    }
}
