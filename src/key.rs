//! Navigation keys describe *what* should be opened.
//!
//! A key is an immutable value. It has no runtime identity of its own; every
//! time a key is opened it is wrapped in a fresh [`Instance`](crate::Instance).
//!
//! Keys opt into capabilities with marker traits:
//!
//! * [`SupportsPush`] - the key can be pushed onto a backstack.
//! * [`SupportsPresent`] - the key can be presented over the current content.
//! * [`WithResult`] - the key produces a typed result when completed.

use std::any::{Any, TypeId, type_name};
use std::fmt::Debug;
use std::sync::Arc;

/// Blanket helper giving every key access to its concrete type at runtime.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;

    fn key_name(&self) -> &'static str;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn key_name(&self) -> &'static str {
        type_name::<T>()
    }
}

/// A value describing a destination.
///
/// ```rust,ignore
/// #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
/// struct Profile { user: u64 }
///
/// impl NavigationKey for Profile {}
/// impl SupportsPush for Profile {}
/// ```
pub trait NavigationKey: AsAny + Debug + Send + Sync + 'static {}

/// Marker for keys which may be pushed onto a backstack.
pub trait SupportsPush: NavigationKey {}

/// Marker for keys which may be presented (dialogs, sheets, overlays).
pub trait SupportsPresent: NavigationKey {}

/// Marker for keys which complete with a typed result.
pub trait WithResult: NavigationKey {
    type Result: Clone + Send + Sync + 'static;
}

/// A type-erased, cheaply clonable navigation key.
#[derive(Clone)]
pub struct AnyKey(Arc<dyn NavigationKey>);

impl AnyKey {
    pub fn new<K: NavigationKey>(key: K) -> Self {
        Self(Arc::new(key))
    }

    /// Attempts to view the key as a concrete key type.
    pub fn downcast_ref<K: NavigationKey>(&self) -> Option<&K> {
        AsAny::as_any(&*self.0).downcast_ref::<K>()
    }

    pub fn is<K: NavigationKey>(&self) -> bool {
        self.key_type() == TypeId::of::<K>()
    }

    /// The [`TypeId`] of the concrete key.
    pub fn key_type(&self) -> TypeId {
        Any::type_id(AsAny::as_any(&*self.0))
    }

    /// The Rust type name of the concrete key, used in diagnostics and as
    /// the persisted tag of the key.
    pub fn name(&self) -> &'static str {
        AsAny::key_name(&*self.0)
    }
}

impl Debug for AnyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&*self.0, f)
    }
}
