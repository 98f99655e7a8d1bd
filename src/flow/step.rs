use std::any::TypeId;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::core::Hash32;
use crate::flow::FlowId;
use crate::instance::{Direction, Instance, InstanceId};
use crate::key::AnyKey;
use crate::metadata::{Metadata, MetadataKey};
use crate::results::ResultChannelId;

/// Identity of a step within its flow: the call site of the step and the
/// type of its key, with a `#n` suffix when the same call site runs more
/// than once in a single evaluation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowStepId(String);

impl FlowStepId {
    pub(crate) fn new(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FlowStepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Links an instance back to the flow step it was created for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStepLink {
    pub flow: FlowId,
    pub step: FlowStepId,
}

impl MetadataKey for FlowStepLink {
    const NAME: &'static str = "waymark.flow-step";
    type Value = FlowStepLink;
}

/// The memoized descriptor of one step, recorded while evaluating a flow.
#[derive(Clone, Debug)]
pub struct FlowStep {
    pub id: FlowStepId,
    pub key: AnyKey,
    pub direction: Direction,
    /// Fingerprint of everything the step depends on.
    pub depends_on: Hash32,
    /// Transient steps are left out of the backstack once another step
    /// follows them.
    pub transient: bool,
    pub(crate) result_type: (TypeId, &'static str),
}

impl FlowStep {
    /// A fresh instance for this step, answering to the flow.
    pub(crate) fn instantiate(&self, flow: FlowId) -> Instance {
        let id = InstanceId::new();
        let mut metadata = Metadata::new();
        metadata.set::<ResultChannelId>(ResultChannelId::new(flow.owner_id(), id.as_str()));
        metadata.set::<FlowStepLink>(FlowStepLink {
            flow,
            step: self.id.clone(),
        });

        Instance::from_parts(id, self.key.clone(), self.direction, metadata)
    }
}
