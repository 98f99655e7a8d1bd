use std::fmt::{Debug, Display};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::key::{AnyKey, NavigationKey, SupportsPresent, SupportsPush};
use crate::metadata::{Metadata, MetadataKey};
use crate::results::ResultChannelId;

/// Runtime identity of an [`Instance`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for InstanceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", &self.0)
    }
}

/// How an instance was opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Push,
    Present,
}

/// A runtime-unique occurrence of a [`NavigationKey`].
///
/// Instances are created when a key is opened and compared by id only: two
/// instances wrapping equal keys are still different destinations.
#[derive(Clone)]
pub struct Instance {
    id: InstanceId,
    key: AnyKey,
    direction: Direction,
    metadata: Metadata,
}

impl Instance {
    /// Wraps a key that can be pushed.
    pub fn push<K: SupportsPush>(key: K) -> Self {
        Self::from_parts(InstanceId::new(), AnyKey::new(key), Direction::Push, Metadata::new())
    }

    /// Wraps a key that can be presented.
    pub fn present<K: SupportsPresent>(key: K) -> Self {
        Self::from_parts(
            InstanceId::new(),
            AnyKey::new(key),
            Direction::Present,
            Metadata::new(),
        )
    }

    pub(crate) fn from_parts(
        id: InstanceId,
        key: AnyKey,
        direction: Direction,
        metadata: Metadata,
    ) -> Self {
        Self {
            id,
            key,
            direction,
            metadata,
        }
    }

    /// A fresh instance for `key` which takes over this instance's direction
    /// and result channel. Used when an interceptor substitutes a key.
    pub(crate) fn replacing(&self, key: AnyKey) -> Self {
        let mut metadata = Metadata::new();
        if let Some(channel) = self.metadata.get::<ResultChannelId>() {
            metadata.set::<ResultChannelId>(channel);
        }
        Self::from_parts(InstanceId::new(), key, self.direction, metadata)
    }

    pub fn with_metadata<M: MetadataKey>(mut self, value: M::Value) -> Self {
        self.metadata.set::<M>(value);
        self
    }

    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    pub fn key(&self) -> &AnyKey {
        &self.key
    }

    /// The key as its concrete type, if it is a `K`.
    pub fn key_as<K: NavigationKey>(&self) -> Option<&K> {
        self.key.downcast_ref::<K>()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// The result channel this instance reports to, if it was opened for a
    /// result.
    pub fn result_channel(&self) -> Option<ResultChannelId> {
        self.metadata.get::<ResultChannelId>()
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Instance {}

impl Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}@{:?}", self.key, self.id)
    }
}
