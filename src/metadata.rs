use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::Dynamic;

/// A typed slot in an [`Instance`](crate::Instance)'s metadata table.
///
/// Metadata is not part of the key. It is the place where the engine and its
/// users stash linkage information, such as the result channel an instance
/// reports to or the flow step it was created for.
pub trait MetadataKey: 'static {
    /// Stable name of the entry, used when the metadata is persisted.
    const NAME: &'static str;

    type Value: Clone + Send + Sync + Serialize + DeserializeOwned + 'static;
}

type Encoder = fn(&Dynamic) -> serde_json::Result<Value>;

#[derive(Clone)]
enum Entry {
    /// Set at runtime through [`Metadata::set`].
    Live { value: Dynamic, encode: Encoder },
    /// Restored from a persisted state, decoded on first access.
    Raw(Value),
}

fn encode_entry<M: MetadataKey>(value: &Dynamic) -> serde_json::Result<Value> {
    match value.downcast_ref::<M::Value>() {
        Some(value) => serde_json::to_value(value),
        None => Ok(Value::Null),
    }
}

/// Extensible, typed side-table attached to every instance.
#[derive(Clone, Default)]
pub struct Metadata {
    entries: BTreeMap<String, Entry>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_raw(raw: BTreeMap<String, Value>) -> Self {
        Self {
            entries: raw
                .into_iter()
                .map(|(name, value)| (name, Entry::Raw(value)))
                .collect(),
        }
    }

    pub fn get<M: MetadataKey>(&self) -> Option<M::Value> {
        match self.entries.get(M::NAME)? {
            Entry::Live { value, .. } => value.downcast_ref::<M::Value>().cloned(),
            Entry::Raw(value) => match serde_json::from_value(value.clone()) {
                Ok(value) => Some(value),
                Err(err) => {
                    tracing::debug!("metadata entry {} can't be decoded: {}", M::NAME, err);
                    None
                }
            },
        }
    }

    pub fn set<M: MetadataKey>(&mut self, value: M::Value) {
        self.entries.insert(
            M::NAME.to_string(),
            Entry::Live {
                value: Arc::new(value),
                encode: encode_entry::<M>,
            },
        );
    }

    pub fn remove<M: MetadataKey>(&mut self) -> Option<M::Value> {
        let value = self.get::<M>();
        self.entries.remove(M::NAME);
        value
    }

    pub fn contains<M: MetadataKey>(&self) -> bool {
        self.entries.contains_key(M::NAME)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encodes every entry to JSON for persistence.
    pub(crate) fn encode(&self) -> serde_json::Result<BTreeMap<String, Value>> {
        self.entries
            .iter()
            .map(|(name, entry)| {
                let value = match entry {
                    Entry::Live { value, encode } => encode(value)?,
                    Entry::Raw(value) => value.clone(),
                };
                Ok((name.clone(), value))
            })
            .collect()
    }
}

impl std::fmt::Debug for Metadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}
