#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod backstack;
mod binding;
mod blueprint;
mod context;
mod core;
pub mod engine;
mod error;
pub mod flow;
mod instance;
mod key;
mod metadata;
mod navigation;
mod operation;
pub mod persist;
mod plugin;
mod results;
mod utils;

pub use crate::backstack::Backstack;
pub use crate::blueprint::Blueprint;
pub use crate::context::{ContextId, ContextKind, ContextTree};
pub use crate::core::{Dynamic, Hash32, Mode};
pub use crate::engine::{
    ContainerKey, EmptyBehavior, EmptyInterceptor, InterceptContext, InterceptScope,
    InterceptVerdict, Interceptor, InterceptorId, NavigationContainer, NavigationFilter,
    NavigationInterceptor, NavigationTransition,
};
pub use crate::error::*;
pub use crate::flow::{FlowId, FlowInterrupt, FlowScope, FlowStatus};
pub use crate::instance::{Direction, Instance, InstanceId};
pub use crate::key::{AnyKey, AsAny, NavigationKey, SupportsPresent, SupportsPush, WithResult};
pub use crate::metadata::{Metadata, MetadataKey};
pub use crate::navigation::Navigation;
pub use crate::operation::{NavigationResult, Operation, Primitive, SideEffect};
pub use crate::persist::SavedState;
pub use crate::plugin::NavigationPlugin;
pub use crate::results::{NavigationOutcome, ResultChannel, ResultChannelId};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
