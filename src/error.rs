use std::thread::ThreadId;

pub use anyhow::Error as RuntimeError;
use thiserror::Error;

use crate::context::ContextId;
use crate::engine::ContainerKey;
use crate::flow::FlowId;
use crate::instance::InstanceId;
use crate::results::ResultChannelId;

#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("Navigation belongs to thread {expected:?}, called from {found:?}")]
    WrongThread { expected: ThreadId, found: ThreadId },

    #[error("No binding registered for key '{0}'")]
    MissingBinding(String),

    #[error("No container accepts {0}")]
    NoContainer(String),

    #[error("Container '{0}' is already registered")]
    DuplicateContainer(ContainerKey),

    #[error("Container '{0}' not found")]
    UnknownContainer(ContainerKey),

    #[error("Context {0:?} not found")]
    UnknownContext(ContextId),

    #[error("Instance {0} is not in any container")]
    Detached(InstanceId),

    #[error("Result channel {channel} expects {expected}, got {found}")]
    ResultType {
        channel: ResultChannelId,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Key '{0}' has no codec and can't be restored")]
    UnknownKey(String),

    #[error("Couldn't encode or decode navigation state.\n{0}")]
    Codec(#[from] serde_json::Error),

    #[error("Flow {0} not found")]
    UnknownFlow(FlowId),

    #[error("No spawner available for async flow steps")]
    NoSpawner,

    #[error("Failed to start the spawner")]
    Spawner(#[from] std::io::Error),

    #[error("Flow {0} is already being updated")]
    FlowBusy(FlowId),

    #[error("Renderer for {0}:\n{1}")]
    Render(InstanceId, RuntimeError),
}

impl NavigationError {
    /// Whether the error comes from how the navigation was configured.
    /// These are the only errors [`Mode::Lenient`](crate::Mode::Lenient)
    /// turns into warnings.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            NavigationError::MissingBinding(_)
                | NavigationError::NoContainer(_)
                | NavigationError::DuplicateContainer(_)
                | NavigationError::UnknownContainer(_)
                | NavigationError::UnknownContext(_)
                | NavigationError::UnknownKey(_)
        )
    }
}
