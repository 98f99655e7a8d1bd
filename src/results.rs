//! Result correlation.
//!
//! An instance opened for a result carries a [`ResultChannelId`] in its
//! metadata. When it is completed or closed, the outcome is routed to the
//! listener registered for that channel. Listeners are one-shot; an outcome
//! which arrives while nobody listens is parked and handed to the next
//! listener registered on the channel.

use std::any::{TypeId, type_name};
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::ContextId;
use crate::error::NavigationError;
use crate::instance::{Instance, InstanceId};
use crate::key::{SupportsPresent, SupportsPush, WithResult};
use crate::metadata::MetadataKey;
use crate::navigation::Navigation;
use crate::operation::{NavigationResult, Operation};

/// Correlates a result-producing instance with its listener.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResultChannelId {
    pub owner_id: String,
    pub result_id: String,
}

impl ResultChannelId {
    pub fn new(owner_id: impl Into<String>, result_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            result_id: result_id.into(),
        }
    }
}

impl Display for ResultChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner_id, self.result_id)
    }
}

impl MetadataKey for ResultChannelId {
    const NAME: &'static str = "waymark.result-channel";
    type Value = ResultChannelId;
}

/// How a result-producing instance went away.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NavigationOutcome<T> {
    Completed(T),
    /// Closed without producing a result.
    Closed,
}

impl<T> NavigationOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            NavigationOutcome::Completed(value) => Some(value),
            NavigationOutcome::Closed => None,
        }
    }
}

pub(crate) type RawOutcome = NavigationOutcome<NavigationResult>;
pub(crate) type RawCallback = Box<dyn FnOnce(RawOutcome) + Send>;

struct Listener {
    /// `None` accepts a value of any type.
    expected: Option<(TypeId, &'static str)>,
    callback: RawCallback,
}

impl Listener {
    /// A completion without a value reaches listeners expecting `()` as
    /// `()`, and every other listener as `Closed`.
    fn unit_outcome(&self) -> RawOutcome {
        match self.expected {
            Some((expected, _)) if expected != TypeId::of::<()>() => NavigationOutcome::Closed,
            _ => NavigationOutcome::Completed(NavigationResult::new(())),
        }
    }
}

enum Parked {
    Outcome(RawOutcome),
    /// Completed without a value, resolved against the next listener.
    Unit,
}

#[derive(Default)]
pub(crate) struct ResultRegistry {
    listeners: HashMap<ResultChannelId, Listener>,
    pending: HashMap<ResultChannelId, Parked>,
    /// Owners torn down while instances opened for them may still report.
    destroyed: HashSet<String>,
}

impl ResultRegistry {
    /// Registers a typed listener, replacing any previous one on the channel.
    pub fn register<T, F>(
        &mut self,
        channel: ResultChannelId,
        callback: F,
    ) -> Result<(), NavigationError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(NavigationOutcome<T>) + Send + 'static,
    {
        let callback: RawCallback = Box::new(move |outcome| match outcome {
            NavigationOutcome::Closed => callback(NavigationOutcome::Closed),
            NavigationOutcome::Completed(result) => {
                if let Some(value) = result.downcast_ref::<T>() {
                    callback(NavigationOutcome::Completed(value.clone()))
                }
            }
        });

        self.register_raw(channel, Some((TypeId::of::<T>(), type_name::<T>())), callback)
    }

    pub fn register_raw(
        &mut self,
        channel: ResultChannelId,
        expected: Option<(TypeId, &'static str)>,
        callback: RawCallback,
    ) -> Result<(), NavigationError> {
        let listener = Listener { expected, callback };

        match self.pending.remove(&channel) {
            Some(Parked::Outcome(outcome)) => Self::invoke(&channel, listener, outcome),
            Some(Parked::Unit) => {
                let outcome = listener.unit_outcome();
                Self::invoke(&channel, listener, outcome)
            }
            None => {
                self.listeners.insert(channel, listener);
                Ok(())
            }
        }
    }

    /// Hands an outcome to the listener of `channel`, or parks it. A parked
    /// outcome overwrites the previous one.
    pub fn deliver(
        &mut self,
        channel: ResultChannelId,
        outcome: RawOutcome,
    ) -> Result<(), NavigationError> {
        match self.listeners.remove(&channel) {
            Some(listener) => Self::invoke(&channel, listener, outcome),
            None => {
                self.park(channel, Parked::Outcome(outcome));
                Ok(())
            }
        }
    }

    /// Reports a completion which carried no value.
    pub fn deliver_unit(&mut self, channel: ResultChannelId) -> Result<(), NavigationError> {
        match self.listeners.remove(&channel) {
            Some(listener) => {
                let outcome = listener.unit_outcome();
                Self::invoke(&channel, listener, outcome)
            }
            None => {
                self.park(channel, Parked::Unit);
                Ok(())
            }
        }
    }

    fn park(&mut self, channel: ResultChannelId, parked: Parked) {
        if self.destroyed.contains(&channel.owner_id) {
            tracing::debug!("dropping result for {}, its owner is gone", channel);
            return;
        }
        tracing::debug!("parking result for {}", channel);
        self.pending.insert(channel, parked);
    }

    fn invoke(
        channel: &ResultChannelId,
        listener: Listener,
        outcome: RawOutcome,
    ) -> Result<(), NavigationError> {
        if let (Some((expected, expected_name)), NavigationOutcome::Completed(result)) =
            (listener.expected, &outcome)
            && result.value_type() != expected
        {
            return Err(NavigationError::ResultType {
                channel: channel.clone(),
                expected: expected_name,
                found: result.type_name(),
            });
        }

        (listener.callback)(outcome);
        Ok(())
    }

    /// Forgets every listener and parked outcome of a destroyed owner.
    /// Outcomes reported for it later are dropped.
    pub fn drop_owner(&mut self, owner_id: &str) {
        self.listeners.retain(|channel, _| channel.owner_id != owner_id);
        self.pending.retain(|channel, _| channel.owner_id != owner_id);
        self.destroyed.insert(owner_id.to_string());
    }

    /// Forgets destroyed owners no live instance reports to anymore.
    pub fn prune_destroyed(&mut self, referenced: impl Fn(&str) -> bool) {
        self.destroyed.retain(|owner| referenced(owner));
    }

    pub fn has_destroyed(&self) -> bool {
        !self.destroyed.is_empty()
    }

    pub fn is_listening(&self, channel: &ResultChannelId) -> bool {
        self.listeners.contains_key(channel)
    }

    pub fn has_pending(&self, channel: &ResultChannelId) -> bool {
        self.pending.contains_key(channel)
    }
}

/// A typed result channel owned by a destination or any other owner.
///
/// ```rust,ignore
/// let channel = ResultChannel::for_instance(profile.id(), "avatar", |outcome| {
///     if let NavigationOutcome::Completed(image) = outcome { /* ... */ }
/// });
/// channel.open(&mut navigation, from, PickImage)?;
/// ```
pub struct ResultChannel<T> {
    id: ResultChannelId,
    callback: Arc<dyn Fn(NavigationOutcome<T>) + Send + Sync>,
}

impl<T> ResultChannel<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<F>(id: ResultChannelId, callback: F) -> Self
    where
        F: Fn(NavigationOutcome<T>) + Send + Sync + 'static,
    {
        Self {
            id,
            callback: Arc::new(callback),
        }
    }

    /// A channel owned by an instance; it is dropped with the instance.
    pub fn for_instance<F>(owner: &InstanceId, result_id: impl Into<String>, callback: F) -> Self
    where
        F: Fn(NavigationOutcome<T>) + Send + Sync + 'static,
    {
        Self::new(ResultChannelId::new(owner.as_str(), result_id), callback)
    }

    pub fn id(&self) -> &ResultChannelId {
        &self.id
    }

    /// (Re)registers the listener. Any outcome parked while nobody listened
    /// is delivered right away.
    pub fn listen(&self, navigation: &mut Navigation) -> Result<(), NavigationError> {
        let callback = self.callback.clone();
        navigation
            .register_result_listener::<T, _>(self.id.clone(), move |outcome| callback(outcome))
    }

    pub fn open<K>(
        &self,
        navigation: &mut Navigation,
        from: ContextId,
        key: K,
    ) -> Result<InstanceId, NavigationError>
    where
        K: SupportsPush + WithResult<Result = T>,
    {
        self.launch(navigation, from, Instance::push(key))
    }

    pub fn present<K>(
        &self,
        navigation: &mut Navigation,
        from: ContextId,
        key: K,
    ) -> Result<InstanceId, NavigationError>
    where
        K: SupportsPresent + WithResult<Result = T>,
    {
        self.launch(navigation, from, Instance::present(key))
    }

    fn launch(
        &self,
        navigation: &mut Navigation,
        from: ContextId,
        instance: Instance,
    ) -> Result<InstanceId, NavigationError> {
        self.listen(navigation)?;

        let instance = instance.with_metadata::<ResultChannelId>(self.id.clone());
        let id = instance.id().clone();
        navigation.navigate(from, Operation::open(instance))?;

        Ok(id)
    }
}
