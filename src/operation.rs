use std::any::{Any, TypeId, type_name};
use std::fmt::Debug;
use std::sync::Arc;

use crate::backstack::Backstack;
use crate::core::Dynamic;
use crate::engine::merge;
use crate::instance::Instance;

/// An opaque callback executed by a container without touching its backstack.
#[derive(Clone)]
pub struct SideEffect(Arc<dyn Fn() + Send + Sync>);

impl SideEffect {
    pub fn new<F>(effect: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self(Arc::new(effect))
    }

    pub fn run(&self) {
        (self.0)()
    }
}

impl Debug for SideEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SideEffect")
    }
}

/// A type-erased result value carried by [`Operation::Complete`].
#[derive(Clone)]
pub struct NavigationResult {
    value: Dynamic,
    type_name: &'static str,
}

impl NavigationResult {
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: type_name::<T>(),
        }
    }

    pub(crate) fn from_dynamic(value: Dynamic, type_name: &'static str) -> Self {
        Self { value, type_name }
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn value_type(&self) -> TypeId {
        Any::type_id(&*self.value)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn value(&self) -> &Dynamic {
        &self.value
    }
}

impl Debug for NavigationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NavigationResult<{}>", self.type_name)
    }
}

/// A mutation intent over a backstack.
#[derive(Clone, Debug)]
pub enum Operation {
    /// Insert the instance on top, or move it to the top if present.
    Open(Instance),
    /// Remove the instance if present.
    Close(Instance),
    /// Close the instance and deliver a result to whoever listens for it.
    Complete(Instance, Option<NavigationResult>),
    /// Reconcile `current` into `target`; expands into opens and closes.
    SetBackstack { current: Backstack, target: Backstack },
    /// Ordered composite, applied as one transition.
    Aggregate(Vec<Operation>),
    /// Escape hatch with no backstack mutation.
    SideEffect(SideEffect),
}

impl Operation {
    pub fn open(instance: Instance) -> Self {
        Operation::Open(instance)
    }

    pub fn close(instance: Instance) -> Self {
        Operation::Close(instance)
    }

    pub fn complete(instance: Instance) -> Self {
        Operation::Complete(instance, None)
    }

    pub fn complete_with<T: Send + Sync + 'static>(instance: Instance, result: T) -> Self {
        Operation::Complete(instance, Some(NavigationResult::new(result)))
    }

    pub fn set_backstack(current: Backstack, target: Backstack) -> Self {
        Operation::SetBackstack { current, target }
    }

    pub fn aggregate(operations: impl IntoIterator<Item = Operation>) -> Self {
        Operation::Aggregate(operations.into_iter().collect())
    }

    pub fn side_effect<F>(effect: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Operation::SideEffect(SideEffect::new(effect))
    }

    /// Expands the operation into primitives, in application order.
    pub fn flatten(self) -> Vec<Primitive> {
        let mut primitives = Vec::new();
        self.flatten_into(&mut primitives);
        primitives
    }

    fn flatten_into(self, out: &mut Vec<Primitive>) {
        match self {
            Operation::Open(instance) => out.push(Primitive::Open(instance)),
            Operation::Close(instance) => out.push(Primitive::Close(instance)),
            Operation::Complete(instance, result) => {
                out.push(Primitive::Complete(instance, result))
            }
            Operation::SetBackstack { current, target } => {
                out.extend(merge(&current, &target).operations());
            }
            Operation::Aggregate(operations) => {
                for operation in operations {
                    operation.flatten_into(out);
                }
            }
            Operation::SideEffect(effect) => out.push(Primitive::SideEffect(effect)),
        }
    }
}

/// The operations a container actually applies, after flattening.
#[derive(Clone, Debug)]
pub enum Primitive {
    Open(Instance),
    Close(Instance),
    Complete(Instance, Option<NavigationResult>),
    SideEffect(SideEffect),
}

impl Primitive {
    pub fn instance(&self) -> Option<&Instance> {
        match self {
            Primitive::Open(instance)
            | Primitive::Close(instance)
            | Primitive::Complete(instance, _) => Some(instance),
            Primitive::SideEffect(_) => None,
        }
    }
}

impl From<Primitive> for Operation {
    fn from(value: Primitive) -> Self {
        match value {
            Primitive::Open(instance) => Operation::Open(instance),
            Primitive::Close(instance) => Operation::Close(instance),
            Primitive::Complete(instance, result) => Operation::Complete(instance, result),
            Primitive::SideEffect(effect) => Operation::SideEffect(effect),
        }
    }
}
