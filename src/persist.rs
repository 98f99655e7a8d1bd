//! Saving and restoring backstacks.
//!
//! A [`SavedState`] is plain data: per container, the ordered list of its
//! instances, each with its id, its encoded key and its metadata. It can be
//! stored anywhere serde can write to.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::binding::BindingRegistry;
use crate::engine::ContainerKey;
use crate::error::NavigationError;
use crate::instance::{Direction, Instance, InstanceId};
use crate::metadata::Metadata;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyDescriptor {
    /// Type name of the key, as bound on the blueprint.
    pub name: String,
    pub value: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub id: InstanceId,
    pub key: KeyDescriptor,
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SavedState {
    pub containers: BTreeMap<ContainerKey, Vec<InstanceDescriptor>>,
}

impl SavedState {
    pub fn to_json(&self) -> Result<String, NavigationError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, NavigationError> {
        Ok(serde_json::from_str(text)?)
    }
}

pub(crate) fn describe(
    bindings: &BindingRegistry,
    instance: &Instance,
) -> Result<InstanceDescriptor, NavigationError> {
    let codec = bindings
        .get(instance.key())
        .and_then(|binding| binding.codec)
        .ok_or_else(|| NavigationError::MissingBinding(instance.key().name().to_string()))?;

    Ok(InstanceDescriptor {
        id: instance.id().clone(),
        key: KeyDescriptor {
            name: instance.key().name().to_string(),
            value: (codec.encode)(instance.key())?,
        },
        direction: instance.direction(),
        metadata: instance.metadata().encode()?,
    })
}

pub(crate) fn rebuild(
    bindings: &BindingRegistry,
    descriptor: &InstanceDescriptor,
) -> Result<Instance, NavigationError> {
    let codec = bindings
        .by_name(&descriptor.key.name)
        .and_then(|binding| binding.codec)
        .ok_or_else(|| NavigationError::UnknownKey(descriptor.key.name.clone()))?;

    let key = (codec.decode)(descriptor.key.value.clone())?;

    Ok(Instance::from_parts(
        descriptor.id.clone(),
        key,
        descriptor.direction,
        Metadata::from_raw(descriptor.metadata.clone()),
    ))
}
