use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::context::ContextId;
use crate::engine::ContainerKey;
use crate::instance::Instance;
use crate::key::{AnyKey, NavigationKey};
use crate::operation::{NavigationResult, Primitive, SideEffect};
use crate::results::ResultChannelId;

/// What an interceptor decided to do with a primitive.
#[derive(Clone, Debug)]
pub enum InterceptVerdict {
    /// Let the operation (or the current cancellation) through unchanged.
    Continue,
    /// Open this instance instead of, or after, the intercepted one.
    Replace(Instance),
    Cancel,
    CancelAnd(SideEffect),
}

/// Where an intercepted operation comes from and where it goes.
#[derive(Clone, Copy, Debug)]
pub struct InterceptContext<'a> {
    pub from: ContextId,
    pub container: &'a ContainerKey,
    pub container_context: Option<ContextId>,
}

/// The view of one primitive handed to an interceptor hook.
///
/// `K` is the concrete key type for hooks registered through
/// [`NavigationInterceptor::builder`], and [`AnyKey`] otherwise.
pub struct InterceptScope<'a, K: ?Sized = AnyKey> {
    instance: &'a Instance,
    key: &'a K,
    context: &'a InterceptContext<'a>,
    cancelled: bool,
    result: Option<&'a NavigationResult>,
}

impl<'a> InterceptScope<'a> {
    pub(crate) fn new(
        instance: &'a Instance,
        context: &'a InterceptContext<'a>,
        cancelled: bool,
        result: Option<&'a NavigationResult>,
    ) -> Self {
        Self {
            instance,
            key: instance.key(),
            context,
            cancelled,
            result,
        }
    }

    /// Narrows the scope to a concrete key type.
    pub fn downcast<K: NavigationKey>(&self) -> Option<InterceptScope<'a, K>> {
        Some(InterceptScope {
            instance: self.instance,
            key: self.key.downcast_ref::<K>()?,
            context: self.context,
            cancelled: self.cancelled,
            result: self.result,
        })
    }
}

impl<'a, K: ?Sized> InterceptScope<'a, K> {
    pub fn instance(&self) -> &'a Instance {
        self.instance
    }

    pub fn key(&self) -> &'a K {
        self.key
    }

    pub fn from(&self) -> ContextId {
        self.context.from
    }

    pub fn container(&self) -> &'a ContainerKey {
        self.context.container
    }

    pub fn container_context(&self) -> Option<ContextId> {
        self.context.container_context
    }

    /// Whether an earlier interceptor cancelled this operation.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// The result carried by a `Complete`, if it is a `T`.
    pub fn result<T: 'static>(&self) -> Option<&'a T> {
        self.result?.downcast_ref::<T>()
    }

    pub fn continue_with(&self) -> InterceptVerdict {
        InterceptVerdict::Continue
    }

    /// Replaces the intercepted instance with a fresh instance of `key`,
    /// opened in the same direction.
    pub fn replace_with<N: NavigationKey>(&self, key: N) -> InterceptVerdict {
        InterceptVerdict::Replace(self.instance.replacing(AnyKey::new(key)))
    }

    pub fn replace_with_instance(&self, instance: Instance) -> InterceptVerdict {
        InterceptVerdict::Replace(instance)
    }

    pub fn cancel(&self) -> InterceptVerdict {
        InterceptVerdict::Cancel
    }

    pub fn cancel_and<F>(&self, effect: F) -> InterceptVerdict
    where
        F: Fn() + Send + Sync + 'static,
    {
        InterceptVerdict::CancelAnd(SideEffect::new(effect))
    }
}

/// A stage of a container's interceptor pipeline.
///
/// Every method has a pass-through default, implementors override the hooks
/// they care about.
pub trait Interceptor: Send + Sync {
    /// Sees the whole flattened operation list before the per-primitive
    /// hooks, and may rewrite it.
    fn before_intercept(
        &self,
        _context: &InterceptContext<'_>,
        operations: Vec<Primitive>,
    ) -> Vec<Primitive> {
        operations
    }

    fn on_opened(&self, scope: &InterceptScope<'_>) -> InterceptVerdict {
        scope.continue_with()
    }

    fn on_closed(&self, scope: &InterceptScope<'_>) -> InterceptVerdict {
        scope.continue_with()
    }

    fn on_completed(&self, scope: &InterceptScope<'_>) -> InterceptVerdict {
        scope.continue_with()
    }
}

/// Registration handle, used to remove an interceptor from its container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InterceptorId(u64);

impl InterceptorId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

type Hook = Box<dyn Fn(&InterceptScope<'_>) -> Option<InterceptVerdict> + Send + Sync>;
type BeforeHook =
    Box<dyn Fn(&InterceptContext<'_>, Vec<Primitive>) -> Vec<Primitive> + Send + Sync>;

fn erase<K, F>(hook: F) -> Hook
where
    K: NavigationKey,
    F: Fn(&InterceptScope<'_, K>) -> InterceptVerdict + Send + Sync + 'static,
{
    Box::new(move |scope: &InterceptScope<'_>| scope.downcast::<K>().map(|typed| hook(&typed)))
}

/// An [`Interceptor`] assembled from typed closures.
///
/// ```rust,ignore
/// let interceptor = NavigationInterceptor::builder()
///     .on_opened::<Checkout, _>(|scope| match logged_in() {
///         true => scope.continue_with(),
///         false => scope.replace_with(Login),
///     })
///     .build();
/// ```
#[derive(Default)]
pub struct NavigationInterceptor {
    before: Option<BeforeHook>,
    opened: Vec<Hook>,
    closed: Vec<Hook>,
    completed: Vec<Hook>,
}

impl NavigationInterceptor {
    pub fn builder() -> NavigationInterceptorBuilder {
        NavigationInterceptorBuilder {
            inner: NavigationInterceptor::default(),
        }
    }

    /// The first hook whose key type matches decides.
    fn run(hooks: &[Hook], scope: &InterceptScope<'_>) -> InterceptVerdict {
        hooks
            .iter()
            .find_map(|hook| hook(scope))
            .unwrap_or(InterceptVerdict::Continue)
    }
}

impl Interceptor for NavigationInterceptor {
    fn before_intercept(
        &self,
        context: &InterceptContext<'_>,
        operations: Vec<Primitive>,
    ) -> Vec<Primitive> {
        match &self.before {
            Some(hook) => hook(context, operations),
            None => operations,
        }
    }

    fn on_opened(&self, scope: &InterceptScope<'_>) -> InterceptVerdict {
        Self::run(&self.opened, scope)
    }

    fn on_closed(&self, scope: &InterceptScope<'_>) -> InterceptVerdict {
        Self::run(&self.closed, scope)
    }

    fn on_completed(&self, scope: &InterceptScope<'_>) -> InterceptVerdict {
        Self::run(&self.completed, scope)
    }
}

pub struct NavigationInterceptorBuilder {
    inner: NavigationInterceptor,
}

impl NavigationInterceptorBuilder {
    pub fn before_intercept<F>(mut self, hook: F) -> Self
    where
        F: Fn(&InterceptContext<'_>, Vec<Primitive>) -> Vec<Primitive> + Send + Sync + 'static,
    {
        self.inner.before = Some(Box::new(hook));
        self
    }

    pub fn on_opened<K, F>(mut self, hook: F) -> Self
    where
        K: NavigationKey,
        F: Fn(&InterceptScope<'_, K>) -> InterceptVerdict + Send + Sync + 'static,
    {
        self.inner.opened.push(erase(hook));
        self
    }

    pub fn on_closed<K, F>(mut self, hook: F) -> Self
    where
        K: NavigationKey,
        F: Fn(&InterceptScope<'_, K>) -> InterceptVerdict + Send + Sync + 'static,
    {
        self.inner.closed.push(erase(hook));
        self
    }

    pub fn on_completed<K, F>(mut self, hook: F) -> Self
    where
        K: NavigationKey,
        F: Fn(&InterceptScope<'_, K>) -> InterceptVerdict + Send + Sync + 'static,
    {
        self.inner.completed.push(erase(hook));
        self
    }

    pub fn build(self) -> NavigationInterceptor {
        self.inner
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Open,
    Close,
    Complete,
}

/// Runs one primitive through every interceptor, in order.
///
/// The returned list holds the surviving primitive (if any), the instance a
/// `Replace` asked to open after a close or completion, and the side effects
/// contributed by `CancelAnd`.
pub(crate) fn intercept(
    interceptors: &[(InterceptorId, Arc<dyn Interceptor>)],
    context: &InterceptContext<'_>,
    primitive: Primitive,
) -> Vec<Primitive> {
    let (kind, original, result) = match primitive {
        Primitive::Open(instance) => (Kind::Open, instance, None),
        Primitive::Close(instance) => (Kind::Close, instance, None),
        Primitive::Complete(instance, result) => (Kind::Complete, instance, result),
        Primitive::SideEffect(_) => return vec![primitive],
    };

    let mut current = original.clone();
    let mut cancelled = false;
    let mut follow_up: Option<Instance> = None;
    let mut effects = Vec::new();

    for (_, interceptor) in interceptors {
        let verdict = {
            let scope = InterceptScope::new(&current, context, cancelled, result.as_ref());
            match kind {
                Kind::Open => interceptor.on_opened(&scope),
                Kind::Close => interceptor.on_closed(&scope),
                Kind::Complete => interceptor.on_completed(&scope),
            }
        };

        match verdict {
            InterceptVerdict::Continue => {}
            InterceptVerdict::Cancel => {
                cancelled = true;
                follow_up = None;
            }
            InterceptVerdict::CancelAnd(effect) => {
                cancelled = true;
                follow_up = None;
                effects.push(Primitive::SideEffect(effect));
            }
            InterceptVerdict::Replace(replacement) => {
                cancelled = false;
                match kind {
                    Kind::Open => current = inherit_channel(&original, replacement),
                    Kind::Close | Kind::Complete => {
                        follow_up = Some(detach_channel(&original, replacement))
                    }
                }
            }
        }
    }

    let mut output = Vec::with_capacity(2 + effects.len());

    if cancelled {
        tracing::debug!("{} cancelled {:?}", context.container, original);
    } else {
        output.push(match kind {
            Kind::Open => Primitive::Open(current),
            Kind::Close => Primitive::Close(original),
            Kind::Complete => Primitive::Complete(original, result),
        });
        output.extend(follow_up.map(Primitive::Open));
    }

    output.extend(effects);
    output
}

fn inherit_channel(original: &Instance, mut replacement: Instance) -> Instance {
    if let Some(channel) = original.result_channel()
        && !replacement.metadata().contains::<ResultChannelId>()
    {
        replacement.metadata_mut().set::<ResultChannelId>(channel);
    }
    replacement
}

/// A replacement opened after a close must not answer the channel the
/// closed instance already answered.
fn detach_channel(original: &Instance, mut replacement: Instance) -> Instance {
    if original.result_channel().is_some()
        && replacement.result_channel() == original.result_channel()
    {
        replacement.metadata_mut().remove::<ResultChannelId>();
    }
    replacement
}
