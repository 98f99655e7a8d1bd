use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::backstack::Backstack;
use crate::context::{ContextId, ContextTree};
use crate::engine::empty::{self, EmptyDecision, EmptyInterceptor};
use crate::engine::filter::NavigationFilter;
use crate::engine::interceptor::{self, InterceptContext, Interceptor, InterceptorId};
use crate::engine::transition::NavigationTransition;
use crate::instance::Instance;
use crate::operation::{NavigationResult, Operation, Primitive, SideEffect};

/// Name of a container, unique within a navigation.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerKey(String);

impl ContainerKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ContainerKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ContainerKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Display for ContainerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for ContainerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContainerKey({})", self.0)
    }
}

/// Handle of a backstack observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Handle of an empty interceptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EmptyInterceptorId(u64);

impl EmptyInterceptorId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

type Observer = Arc<dyn Fn(&NavigationTransition) + Send + Sync>;

/// What a single `execute` left behind for the navigation to finish.
#[derive(Debug, Default)]
pub(crate) struct Execution {
    pub transition: Option<NavigationTransition>,
    /// Instances closed without a result, still absent at the end.
    pub closed: Vec<Instance>,
    /// Instances completed, still absent at the end.
    pub completed: Vec<(Instance, Option<NavigationResult>)>,
    /// Side effects to run once everything else is settled.
    pub effects: Vec<SideEffect>,
}

/// Owner of one backstack.
///
/// The container is the only writer of its backstack. Every change goes
/// through [`Navigation::execute`](crate::Navigation::execute), which runs
/// the filter, the interceptor pipeline and the empty policy before the new
/// backstack is committed and published as a single transition.
pub struct NavigationContainer {
    key: ContainerKey,
    context: Option<ContextId>,
    backstack: Backstack,
    filter: NavigationFilter,
    interceptors: Vec<(InterceptorId, Arc<dyn Interceptor>)>,
    empty_interceptors: Vec<(EmptyInterceptorId, Arc<dyn EmptyInterceptor>)>,
    observers: Vec<(ObserverId, Observer)>,
}

impl NavigationContainer {
    pub fn new(key: impl Into<ContainerKey>) -> Self {
        Self {
            key: key.into(),
            context: None,
            backstack: Backstack::new(),
            filter: NavigationFilter::default(),
            interceptors: Vec::new(),
            empty_interceptors: Vec::new(),
            observers: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: NavigationFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_interceptor<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.add_interceptor(interceptor);
        self
    }

    pub fn with_empty_interceptor<E: EmptyInterceptor + 'static>(mut self, interceptor: E) -> Self {
        self.add_empty_interceptor(interceptor);
        self
    }

    /// Initial backstack, installed without interception.
    pub fn with_backstack(mut self, backstack: Backstack) -> Self {
        self.backstack = backstack;
        self
    }

    pub fn key(&self) -> &ContainerKey {
        &self.key
    }

    pub fn context(&self) -> Option<ContextId> {
        self.context
    }

    pub(crate) fn attach(&mut self, context: ContextId) {
        self.context = Some(context);
    }

    pub fn backstack(&self) -> &Backstack {
        &self.backstack
    }

    pub fn active(&self) -> Option<&Instance> {
        self.backstack.active()
    }

    pub fn filter(&self) -> &NavigationFilter {
        &self.filter
    }

    pub fn set_filter(&mut self, filter: NavigationFilter) {
        self.filter = filter;
    }

    pub fn add_interceptor<I: Interceptor + 'static>(&mut self, interceptor: I) -> InterceptorId {
        let id = InterceptorId::next();
        self.interceptors.push((id, Arc::new(interceptor)));
        id
    }

    pub fn remove_interceptor(&mut self, id: InterceptorId) -> bool {
        let before = self.interceptors.len();
        self.interceptors.retain(|(other, _)| *other != id);
        before != self.interceptors.len()
    }

    pub fn add_empty_interceptor<E: EmptyInterceptor + 'static>(
        &mut self,
        interceptor: E,
    ) -> EmptyInterceptorId {
        let id = EmptyInterceptorId::next();
        self.empty_interceptors.push((id, Arc::new(interceptor)));
        id
    }

    pub fn remove_empty_interceptor(&mut self, id: EmptyInterceptorId) -> bool {
        let before = self.empty_interceptors.len();
        self.empty_interceptors.retain(|(other, _)| *other != id);
        before != self.empty_interceptors.len()
    }

    /// Registers a callback invoked once per committed transition.
    pub fn subscribe<F>(&mut self, observer: F) -> ObserverId
    where
        F: Fn(&NavigationTransition) + Send + Sync + 'static,
    {
        let id = ObserverId::next();
        self.observers.push((id, Arc::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(other, _)| *other != id);
        before != self.observers.len()
    }

    /// Whether `operation`, issued from `from`, would be accepted.
    pub fn accepts(&self, tree: &ContextTree, from: ContextId, operation: &Operation) -> bool {
        match operation {
            Operation::Open(instance) => self.accepts_open(tree, from, instance),
            Operation::Close(instance) | Operation::Complete(instance, _) => {
                self.backstack.contains(instance.id())
            }
            Operation::SetBackstack { target, .. } => target
                .iter()
                .all(|instance| self.accepts_open(tree, from, instance)),
            Operation::Aggregate(operations) => operations
                .iter()
                .all(|operation| self.accepts(tree, from, operation)),
            Operation::SideEffect(_) => true,
        }
    }

    fn accepts_open(&self, tree: &ContextTree, from: ContextId, instance: &Instance) -> bool {
        if self.backstack.contains(instance.id()) {
            return true;
        }
        if !self.filter.accepts(instance) {
            return false;
        }
        match (self.filter.is_from_children_only(), self.context) {
            (false, _) => true,
            (true, Some(context)) => tree.is_descendant(from, context),
            (true, None) => false,
        }
    }

    /// Runs `operation` against the backstack.
    ///
    /// With `force` the filter is skipped; interceptors and the empty
    /// policy still apply.
    pub(crate) fn execute(
        &mut self,
        tree: &ContextTree,
        from: ContextId,
        operation: Operation,
        force: bool,
    ) -> Execution {
        let span = tracing::span!(Level::INFO, "container", key = %self.key);
        let _enter = span.enter();

        let primitives: Vec<Primitive> = operation
            .flatten()
            .into_iter()
            .filter(|primitive| match primitive {
                Primitive::Open(instance) if !force && !self.accepts_open(tree, from, instance) => {
                    tracing::debug!("dropped open of {:?}, not accepted", instance);
                    false
                }
                _ => true,
            })
            .collect();

        let primitives = {
            let context = InterceptContext {
                from,
                container: &self.key,
                container_context: self.context,
            };

            let primitives = self
                .interceptors
                .iter()
                .fold(primitives, |primitives, (_, interceptor)| {
                    interceptor.before_intercept(&context, primitives)
                });

            primitives
                .into_iter()
                .flat_map(|primitive| {
                    interceptor::intercept(&self.interceptors, &context, primitive)
                })
                .collect::<Vec<_>>()
        };

        let previous = self.backstack.clone();
        let mut working = previous.clone();
        let mut execution = Execution::default();

        for primitive in primitives {
            match primitive {
                Primitive::Open(instance) => working.open(instance),
                Primitive::Close(instance) => {
                    if let Some(removed) = working.close(instance.id()) {
                        execution.closed.push(removed);
                    }
                }
                Primitive::Complete(instance, result) => {
                    if let Some(removed) = working.close(instance.id()) {
                        execution.completed.push((removed, result));
                    }
                }
                Primitive::SideEffect(effect) => execution.effects.push(effect),
            }
        }

        if working.is_empty() && !previous.is_empty() {
            let transition = NavigationTransition::new(previous.clone(), working.clone());
            let chain = self.empty_interceptors.iter().map(|(_, interceptor)| interceptor);

            if let EmptyDecision::Deny(effect) = empty::resolve(chain, &transition) {
                tracing::debug!("empty backstack denied");
                working = previous.clone();
                execution.closed.clear();
                execution.completed.clear();
                execution.effects.extend(effect);
            }
        }

        execution.closed.retain(|instance| !working.contains(instance.id()));
        execution
            .completed
            .retain(|(instance, _)| !working.contains(instance.id()));

        if working == previous {
            return execution;
        }

        tracing::info!("{:?} -> {:?}", previous, working);
        self.backstack = working.clone();

        let transition = NavigationTransition::new(previous, working);
        self.notify(&transition);
        execution.transition = Some(transition);

        execution
    }

    /// Replaces the backstack wholesale, bypassing the filter, the
    /// interceptors and the empty policy.
    pub(crate) fn set_backstack_direct(
        &mut self,
        backstack: Backstack,
    ) -> Option<NavigationTransition> {
        if backstack == self.backstack {
            return None;
        }

        let previous = std::mem::replace(&mut self.backstack, backstack);
        let transition = NavigationTransition::new(previous, self.backstack.clone());
        self.notify(&transition);

        Some(transition)
    }

    fn notify(&self, transition: &NavigationTransition) {
        for (_, observer) in &self.observers {
            observer(transition);
        }
    }
}

impl std::fmt::Debug for NavigationContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavigationContainer")
            .field("key", &self.key)
            .field("context", &self.context)
            .field("backstack", &self.backstack)
            .field("interceptors", &self.interceptors.len())
            .finish_non_exhaustive()
    }
}
