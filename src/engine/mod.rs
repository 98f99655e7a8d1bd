//! The execution engine: containers, the operation pipeline they run, and
//! the reconciliation of whole backstacks.

mod container;
mod empty;
mod filter;
mod interceptor;
mod merge;
mod transition;

pub use crate::engine::container::{
    ContainerKey, EmptyInterceptorId, NavigationContainer, ObserverId,
};
pub use crate::engine::empty::{EmptyBehavior, EmptyInterceptor};
pub use crate::engine::filter::NavigationFilter;
pub use crate::engine::interceptor::{
    InterceptContext, InterceptScope, InterceptVerdict, Interceptor, InterceptorId,
    NavigationInterceptor, NavigationInterceptorBuilder,
};
pub use crate::engine::merge::{MergeEntry, MergeState, Reconciliation, merge};
pub use crate::engine::transition::NavigationTransition;

pub(crate) use crate::engine::container::Execution;
