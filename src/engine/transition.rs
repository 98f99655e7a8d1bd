use crate::backstack::Backstack;
use crate::instance::Instance;

/// The change produced by one `execute` call.
#[derive(Clone, Debug)]
pub struct NavigationTransition {
    previous: Backstack,
    current: Backstack,
}

impl NavigationTransition {
    pub(crate) fn new(previous: Backstack, current: Backstack) -> Self {
        Self { previous, current }
    }

    pub fn previous(&self) -> &Backstack {
        &self.previous
    }

    pub fn current(&self) -> &Backstack {
        &self.current
    }

    pub fn is_changed(&self) -> bool {
        self.previous != self.current
    }

    /// The new top, when the top changed.
    pub fn entering(&self) -> Option<&Instance> {
        let current = self.current.active()?;
        match self.previous.active() {
            Some(previous) if previous.id() == current.id() => None,
            _ => Some(current),
        }
    }

    /// The old top, when the top changed.
    pub fn exiting(&self) -> Option<&Instance> {
        let previous = self.previous.active()?;
        match self.current.active() {
            Some(current) if current.id() == previous.id() => None,
            _ => Some(previous),
        }
    }

    /// Whether the previous top was removed, as opposed to covered.
    pub fn is_closing(&self) -> bool {
        self.previous
            .active()
            .is_some_and(|previous| !self.current.contains(previous.id()))
    }

    /// Instances present before and gone now.
    pub fn closed(&self) -> impl Iterator<Item = &Instance> {
        self.previous
            .iter()
            .filter(|instance| !self.current.contains(instance.id()))
    }

    /// Instances which were not present before.
    pub fn opened(&self) -> impl Iterator<Item = &Instance> {
        self.current
            .iter()
            .filter(|instance| !self.previous.contains(instance.id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backstack::tests::screen;

    #[test]
    fn test_push() {
        let (a, b) = (screen("A"), screen("B"));
        let transition = NavigationTransition::new(
            Backstack::from(vec![a.clone()]),
            Backstack::from(vec![a.clone(), b.clone()]),
        );

        assert!(transition.is_changed());
        assert!(!transition.is_closing());
        assert_eq!(transition.entering(), Some(&b));
        assert_eq!(transition.exiting(), Some(&a));
        assert_eq!(transition.opened().collect::<Vec<_>>(), vec![&b]);
        assert_eq!(transition.closed().count(), 0);
    }

    #[test]
    fn test_close_to_empty() {
        let a = screen("A");
        let transition =
            NavigationTransition::new(Backstack::from(vec![a.clone()]), Backstack::new());

        assert!(transition.is_closing());
        assert_eq!(transition.entering(), None);
        assert_eq!(transition.exiting(), Some(&a));
        assert_eq!(transition.closed().collect::<Vec<_>>(), vec![&a]);
    }

    #[test]
    fn test_unchanged() {
        let backstack = Backstack::from(vec![screen("A")]);
        let transition = NavigationTransition::new(backstack.clone(), backstack);

        assert!(!transition.is_changed());
        assert!(transition.entering().is_none());
        assert!(transition.exiting().is_none());
    }
}
