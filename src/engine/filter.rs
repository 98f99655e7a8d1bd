use std::sync::Arc;

use crate::instance::Instance;
use crate::key::NavigationKey;

type Predicate = Arc<dyn Fn(&Instance) -> bool + Send + Sync>;

/// Decides which instances a container is willing to open.
///
/// Acceptance is a precondition of execution: an `Open` that the filter
/// rejects never reaches the interceptors. Closing or completing an instance
/// which is already in the container ignores the filter.
#[derive(Clone)]
pub struct NavigationFilter {
    predicate: Predicate,
    from_children_only: bool,
}

impl NavigationFilter {
    pub fn accept_all() -> Self {
        Self::accept(|_| true)
    }

    pub fn accept_none() -> Self {
        Self::accept(|_| false)
    }

    /// Accepts instances whose key is a `K`.
    pub fn accept_key<K: NavigationKey>() -> Self {
        Self::accept(|instance| instance.key().is::<K>())
    }

    pub fn accept<F>(predicate: F) -> Self
    where
        F: Fn(&Instance) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            from_children_only: false,
        }
    }

    /// Restricts the filter to operations issued from inside the container,
    /// that is from the container itself or one of its descendants.
    pub fn from_children_only(mut self) -> Self {
        self.from_children_only = true;
        self
    }

    /// Combines two filters; the result accepts what either accepts.
    pub fn or(self, other: NavigationFilter) -> Self {
        let (left, right) = (self.predicate, other.predicate);
        Self {
            predicate: Arc::new(move |instance| left(instance) || right(instance)),
            from_children_only: self.from_children_only || other.from_children_only,
        }
    }

    pub fn is_from_children_only(&self) -> bool {
        self.from_children_only
    }

    pub fn accepts(&self, instance: &Instance) -> bool {
        (self.predicate)(instance)
    }
}

impl Default for NavigationFilter {
    fn default() -> Self {
        Self::accept_all()
    }
}

impl std::fmt::Debug for NavigationFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NavigationFilter")
            .field("from_children_only", &self.from_children_only)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backstack::tests::{Screen, screen};
    use crate::key::SupportsPush;

    #[derive(Debug)]
    struct Dialog;
    impl NavigationKey for Dialog {}
    impl SupportsPush for Dialog {}

    #[test]
    fn test_accept_key() {
        let filter = NavigationFilter::accept_key::<Screen>();
        assert!(filter.accepts(&screen("A")));
        assert!(!filter.accepts(&Instance::push(Dialog)));
    }

    #[test]
    fn test_or() {
        let filter = NavigationFilter::accept_key::<Dialog>()
            .or(NavigationFilter::accept(|i| i.key_as::<Screen>().is_some_and(|s| s.0 == "B")));

        assert!(filter.accepts(&Instance::push(Dialog)));
        assert!(filter.accepts(&screen("B")));
        assert!(!filter.accepts(&screen("A")));
    }

    #[test]
    fn test_from_children_only_flag() {
        assert!(!NavigationFilter::accept_all().is_from_children_only());
        assert!(NavigationFilter::accept_all().from_children_only().is_from_children_only());
        assert!(!NavigationFilter::accept_none().accepts(&screen("A")));
    }
}
