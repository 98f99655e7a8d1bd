use std::sync::Arc;

use crate::engine::transition::NavigationTransition;
use crate::operation::SideEffect;

/// The answer of an [`EmptyInterceptor`].
#[derive(Clone, Debug)]
pub enum EmptyBehavior {
    /// No opinion, ask the next interceptor.
    Continue,
    AllowEmpty,
    /// Revert the container to the backstack it had before the transition.
    DenyEmpty,
    /// Revert, then run the side effect.
    DenyEmptyAnd(SideEffect),
}

impl EmptyBehavior {
    pub fn deny_and<F>(effect: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        EmptyBehavior::DenyEmptyAnd(SideEffect::new(effect))
    }
}

/// Consulted when a transition would leave a container empty.
pub trait EmptyInterceptor: Send + Sync {
    fn on_empty(&self, transition: &NavigationTransition) -> EmptyBehavior;
}

impl<F> EmptyInterceptor for F
where
    F: Fn(&NavigationTransition) -> EmptyBehavior + Send + Sync,
{
    fn on_empty(&self, transition: &NavigationTransition) -> EmptyBehavior {
        self(transition)
    }
}

pub(crate) enum EmptyDecision {
    Allow,
    Deny(Option<SideEffect>),
}

/// Runs the chain in order. The first interceptor which denies wins; an
/// explicit allow does not stop the chain and no decision at all allows.
pub(crate) fn resolve<'a, I>(chain: I, transition: &NavigationTransition) -> EmptyDecision
where
    I: IntoIterator<Item = &'a Arc<dyn EmptyInterceptor>>,
{
    for interceptor in chain {
        match interceptor.on_empty(transition) {
            EmptyBehavior::Continue | EmptyBehavior::AllowEmpty => continue,
            EmptyBehavior::DenyEmpty => return EmptyDecision::Deny(None),
            EmptyBehavior::DenyEmptyAnd(effect) => return EmptyDecision::Deny(Some(effect)),
        }
    }

    EmptyDecision::Allow
}
