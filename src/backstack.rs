use std::fmt::Debug;

use crate::instance::{Instance, InstanceId};

/// An ordered, id-unique sequence of instances.
///
/// The last instance is the active one. Two backstacks are equal when they
/// hold the same instance ids in the same order.
#[derive(Clone, Default)]
pub struct Backstack {
    instances: Vec<Instance>,
}

impl Backstack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// The topmost instance.
    pub fn active(&self) -> Option<&Instance> {
        self.instances.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instance> {
        self.instances.iter()
    }

    pub fn as_slice(&self) -> &[Instance] {
        &self.instances
    }

    pub fn ids(&self) -> Vec<&InstanceId> {
        self.instances.iter().map(Instance::id).collect()
    }

    pub fn contains(&self, id: &InstanceId) -> bool {
        self.position(id).is_some()
    }

    pub fn position(&self, id: &InstanceId) -> Option<usize> {
        self.instances.iter().position(|item| item.id() == id)
    }

    pub fn get(&self, id: &InstanceId) -> Option<&Instance> {
        self.instances.iter().find(|item| item.id() == id)
    }

    /// Appends `instance` on top. An instance that is already present is
    /// moved to the top instead of being duplicated; every other instance
    /// keeps its relative order.
    pub fn open(&mut self, instance: Instance) {
        if let Some(index) = self.position(instance.id()) {
            self.instances.remove(index);
        }
        self.instances.push(instance);
    }

    /// Removes the instance with the given id. Closing an absent instance is
    /// a no-op, which keeps replaying operations safe.
    pub fn close(&mut self, id: &InstanceId) -> Option<Instance> {
        let index = self.position(id)?;
        Some(self.instances.remove(index))
    }
}

impl FromIterator<Instance> for Backstack {
    fn from_iter<T: IntoIterator<Item = Instance>>(iter: T) -> Self {
        let mut backstack = Backstack::new();
        for instance in iter {
            backstack.open(instance);
        }
        backstack
    }
}

impl From<Vec<Instance>> for Backstack {
    fn from(value: Vec<Instance>) -> Self {
        value.into_iter().collect()
    }
}

impl<'a> IntoIterator for &'a Backstack {
    type Item = &'a Instance;
    type IntoIter = std::slice::Iter<'a, Instance>;

    fn into_iter(self) -> Self::IntoIter {
        self.instances.iter()
    }
}

impl IntoIterator for Backstack {
    type Item = Instance;
    type IntoIter = std::vec::IntoIter<Instance>;

    fn into_iter(self) -> Self::IntoIter {
        self.instances.into_iter()
    }
}

impl PartialEq for Backstack {
    fn eq(&self, other: &Self) -> bool {
        self.instances.len() == other.instances.len()
            && self
                .instances
                .iter()
                .zip(&other.instances)
                .all(|(a, b)| a.id() == b.id())
    }
}

impl Eq for Backstack {}

impl Debug for Backstack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(&self.instances).finish()
    }
}
