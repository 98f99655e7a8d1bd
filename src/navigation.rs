use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::ThreadId;
use std::time::Duration;

use tracing::Level;

use crate::backstack::Backstack;
use crate::binding::BindingRegistry;
use crate::blueprint::Blueprint;
use crate::context::{ContextId, ContextKind, ContextTree};
use crate::core::{Dynamic, Mode};
use crate::engine::{ContainerKey, Execution, NavigationContainer, NavigationTransition};
use crate::error::NavigationError;
use crate::flow::{
    Applied, FlowEntry, FlowId, FlowInterrupt, FlowMessage, FlowScope, FlowStatus, Spawner,
    SpawnerSlot, Update,
};
use crate::instance::{Instance, InstanceId};
use crate::operation::Operation;
use crate::persist::{self, InstanceDescriptor, SavedState};
use crate::plugin::Plugins;
use crate::results::{NavigationOutcome, ResultChannelId, ResultRegistry};

/// The root of a navigation.
///
/// A `Navigation` owns every container, the context tree linking them, the
/// result registry and the registered flows. It is bound to the thread it
/// was created on; every mutating call made from another thread fails with
/// [`NavigationError::WrongThread`].
///
/// Use [`Navigation::design`] to get a [`Blueprint`], configure it, and call
/// [`Blueprint::finish`].
pub struct Navigation {
    mode: Mode,
    thread: ThreadId,
    tree: ContextTree,
    containers: BTreeMap<ContainerKey, NavigationContainer>,
    /// Registration order, used when routing falls back to every container.
    order: Vec<ContainerKey>,
    default_container: Option<ContainerKey>,
    results: ResultRegistry,
    bindings: BindingRegistry,
    plugins: Plugins,
    active: Option<Instance>,
    /// `None` while the flow is being evaluated.
    flows: HashMap<FlowId, Option<FlowEntry>>,
    next_flow: u64,
    flow_tx: Sender<FlowMessage>,
    flow_rx: Receiver<FlowMessage>,
    spawner: SpawnerSlot,
    /// Saved backstacks of containers which are not registered yet.
    pending_restore: BTreeMap<ContainerKey, Vec<InstanceDescriptor>>,
    settling: bool,
}

impl Navigation {
    /// Starts configuring a new navigation.
    pub fn design() -> Blueprint {
        Blueprint::new()
    }

    pub(crate) fn new(
        mode: Mode,
        bindings: BindingRegistry,
        plugins: Plugins,
        spawner: Option<Arc<dyn Spawner>>,
    ) -> Self {
        let (flow_tx, flow_rx) = mpsc::channel();

        Self {
            mode,
            thread: std::thread::current().id(),
            tree: ContextTree::new(),
            containers: BTreeMap::new(),
            order: Vec::new(),
            default_container: None,
            results: ResultRegistry::default(),
            bindings,
            plugins,
            active: None,
            flows: HashMap::new(),
            next_flow: 0,
            flow_tx,
            flow_rx,
            spawner: SpawnerSlot::new(spawner),
            pending_restore: BTreeMap::new(),
            settling: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn tree(&self) -> &ContextTree {
        &self.tree
    }

    /// The context of the navigation itself.
    pub fn root(&self) -> ContextId {
        self.tree.root()
    }

    pub fn container(&self, key: &ContainerKey) -> Option<&NavigationContainer> {
        self.containers.get(key)
    }

    /// Gives access to the structural settings of a container: filter,
    /// interceptors and observers.
    pub fn container_mut(&mut self, key: &ContainerKey) -> Option<&mut NavigationContainer> {
        self.containers.get_mut(key)
    }

    pub fn containers(&self) -> impl Iterator<Item = &NavigationContainer> {
        self.order.iter().filter_map(|key| self.containers.get(key))
    }

    /// The context of a destination, if it is currently in a container.
    pub fn context_of(&self, instance: &InstanceId) -> Option<ContextId> {
        self.tree.destination(instance)
    }

    pub fn instance(&self, id: &InstanceId) -> Option<&Instance> {
        self.containers
            .values()
            .find_map(|container| container.backstack().get(id))
    }

    /// The top instance of the deepest active container.
    pub fn active_instance(&self) -> Option<&Instance> {
        self.active.as_ref()
    }

    /// Registers a container under `parent`, which is the root or the
    /// context of the destination hosting the container.
    ///
    /// The first container registered under the root becomes the default
    /// container, which lenient navigation falls back to.
    pub fn add_container(
        &mut self,
        parent: ContextId,
        mut container: NavigationContainer,
    ) -> Result<ContextId, NavigationError> {
        self.check_thread()?;
        let key = container.key().clone();

        let context = match self.tree.add_container(parent, key.clone()) {
            Ok(context) => context,
            Err(error @ NavigationError::DuplicateContainer(_)) => {
                self.degrade(error)?;
                return self
                    .tree
                    .container(&key)
                    .ok_or(NavigationError::UnknownContainer(key));
            }
            Err(error) => return Err(error),
        };

        container.attach(context);
        for instance in container.backstack() {
            self.tree.add_destination(context, instance.id());
            self.plugins.opened(instance);
        }

        if parent == self.tree.root() && self.default_container.is_none() {
            self.default_container = Some(key.clone());
        }

        tracing::debug!("registered container {}", key);
        self.containers.insert(key.clone(), container);
        self.order.push(key.clone());

        if let Some(descriptors) = self.pending_restore.remove(&key) {
            let backstack = self.rebuild(&descriptors)?;
            self.set_backstack_direct(&key, backstack)?;
        }

        self.refresh_active();
        Ok(context)
    }

    /// Runs `operation` on a given container.
    pub fn execute(
        &mut self,
        key: &ContainerKey,
        from: ContextId,
        operation: Operation,
    ) -> Result<Option<NavigationTransition>, NavigationError> {
        self.check_thread()?;
        self.check_bindings(&operation)?;
        let from = self.origin(from)?;

        if !self.containers.contains_key(key) {
            return Err(NavigationError::UnknownContainer(key.clone()));
        }

        self.dispatch(key, from, operation, false)
    }

    /// Runs `operation` on the container nearest to `from` which accepts it.
    ///
    /// Containers are tried walking up from `from`: an ancestor container
    /// itself, then the containers hosted by an ancestor destination. If none
    /// of them accepts the operation every container is tried in the order
    /// they were registered.
    pub fn navigate(
        &mut self,
        from: ContextId,
        operation: Operation,
    ) -> Result<Option<NavigationTransition>, NavigationError> {
        self.check_thread()?;
        self.check_bindings(&operation)?;
        let from = self.origin(from)?;

        if let Some(key) = self.route(from, &operation) {
            return self.dispatch(&key, from, operation, false);
        }

        let error = NavigationError::NoContainer(describe(&operation));
        match (self.mode, self.default_container.clone()) {
            (Mode::Lenient, Some(key)) => {
                tracing::warn!("{}, using {}", error, key);
                self.dispatch(&key, from, operation, true)
            }
            _ => Err(error),
        }
    }

    /// Whether the container `key` would accept `operation` issued from
    /// `from`.
    pub fn accepts(&self, key: &ContainerKey, from: ContextId, operation: &Operation) -> bool {
        self.containers
            .get(key)
            .is_some_and(|container| container.accepts(&self.tree, from, operation))
    }

    /// Replaces a backstack without running filters, interceptors or the
    /// empty policy. Results are not delivered for removed instances.
    pub fn set_backstack_direct(
        &mut self,
        key: &ContainerKey,
        backstack: Backstack,
    ) -> Result<Option<NavigationTransition>, NavigationError> {
        self.check_thread()?;

        let container = self
            .containers
            .get_mut(key)
            .ok_or_else(|| NavigationError::UnknownContainer(key.clone()))?;

        let Some(transition) = container.set_backstack_direct(backstack) else {
            return Ok(None);
        };

        self.sync_contexts(key, &transition);
        self.refresh_active();
        Ok(Some(transition))
    }

    /// Listens for the outcome reported on `channel`. An outcome which was
    /// reported while nobody listened is delivered right away.
    pub fn register_result_listener<T, F>(
        &mut self,
        channel: ResultChannelId,
        callback: F,
    ) -> Result<(), NavigationError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(NavigationOutcome<T>) + Send + 'static,
    {
        self.check_thread()?;
        self.results.register::<T, F>(channel, callback)
    }

    /// Renders a destination with the renderer bound for its key.
    pub fn render(&self, id: &InstanceId) -> Result<Dynamic, NavigationError> {
        let instance = self
            .instance(id)
            .ok_or_else(|| NavigationError::Detached(id.clone()))?;

        let renderer = self
            .bindings
            .get(instance.key())
            .and_then(|binding| binding.renderer.clone())
            .ok_or_else(|| NavigationError::MissingBinding(instance.key().name().to_string()))?;

        renderer(instance).map_err(|error| NavigationError::Render(id.clone(), error))
    }

    /// Registers a flow showing its steps in `container`, and evaluates it
    /// right away.
    pub fn register_flow<T, F, C>(
        &mut self,
        container: impl Into<ContainerKey>,
        body: F,
        on_complete: C,
    ) -> Result<FlowId, NavigationError>
    where
        T: 'static,
        F: Fn(&mut FlowScope<'_>) -> Result<T, FlowInterrupt> + Send + 'static,
        C: FnMut(anyhow::Result<T>) + Send + 'static,
    {
        self.check_thread()?;

        let container = container.into();
        if !self.containers.contains_key(&container) {
            return Err(NavigationError::UnknownContainer(container));
        }

        let id = FlowId(self.next_flow);
        self.next_flow += 1;

        tracing::debug!("registered {} in {}", id, container);
        self.flows
            .insert(id, Some(FlowEntry::new(container, body, on_complete)));

        self.run_flow(id)?;
        self.settle()?;
        Ok(id)
    }

    /// Evaluates a flow again, typically after state it reads changed.
    pub fn update_flow(&mut self, id: FlowId) -> Result<(), NavigationError> {
        self.check_thread()?;
        self.run_flow(id)?;
        self.settle()
    }

    pub fn flow_status(&self, id: FlowId) -> Option<FlowStatus> {
        self.flows
            .get(&id)?
            .as_ref()
            .map(|entry| entry.state.status())
    }

    /// Handles every flow message received so far. Returns how many there
    /// were.
    pub fn process_pending(&mut self) -> Result<usize, NavigationError> {
        self.check_thread()?;
        self.settle_with(None)
    }

    /// Blocks until a flow message arrives or `timeout` passes, then handles
    /// every message received. Returns whether a message arrived.
    pub fn wait_pending(&mut self, timeout: Duration) -> Result<bool, NavigationError> {
        self.check_thread()?;

        match self.flow_rx.recv_timeout(timeout) {
            Ok(message) => {
                self.settle_with(Some(message))?;
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => Ok(false),
        }
    }

    /// Describes every persistable instance of every container.
    ///
    /// Instances whose key was bound without a codec are left out.
    pub fn save(&self) -> Result<SavedState, NavigationError> {
        let mut state = SavedState::default();

        for (key, container) in &self.containers {
            let mut descriptors = Vec::with_capacity(container.backstack().len());

            for instance in container.backstack() {
                if self
                    .bindings
                    .get(instance.key())
                    .is_some_and(|binding| binding.codec.is_none())
                {
                    tracing::debug!("not saving opaque {:?}", instance);
                    continue;
                }

                match persist::describe(&self.bindings, instance) {
                    Ok(descriptor) => descriptors.push(descriptor),
                    Err(error) => self.degrade(error)?,
                }
            }

            state.containers.insert(key.clone(), descriptors);
        }

        Ok(state)
    }

    /// Restores saved backstacks. Backstacks of containers which are not
    /// registered yet are applied when they are.
    pub fn restore(&mut self, state: &SavedState) -> Result<(), NavigationError> {
        self.check_thread()?;

        for (key, descriptors) in &state.containers {
            if !self.containers.contains_key(key) {
                tracing::debug!("container {} not registered yet, restoring later", key);
                self.pending_restore.insert(key.clone(), descriptors.clone());
                continue;
            }

            let backstack = self.rebuild(descriptors)?;
            self.set_backstack_direct(key, backstack)?;
        }

        Ok(())
    }

    fn rebuild(&self, descriptors: &[InstanceDescriptor]) -> Result<Backstack, NavigationError> {
        let mut instances = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            match persist::rebuild(&self.bindings, descriptor) {
                Ok(instance) => instances.push(instance),
                Err(error) => self.degrade(error)?,
            }
        }

        Ok(Backstack::from(instances))
    }

    fn check_thread(&self) -> Result<(), NavigationError> {
        let found = std::thread::current().id();
        if found != self.thread {
            return Err(NavigationError::WrongThread {
                expected: self.thread,
                found,
            });
        }
        Ok(())
    }

    /// Lets a configuration error through as a warning in lenient mode.
    fn degrade(&self, error: NavigationError) -> Result<(), NavigationError> {
        if self.mode == Mode::Lenient && error.is_configuration() {
            tracing::warn!("{}", error);
            return Ok(());
        }
        Err(error)
    }

    fn origin(&self, from: ContextId) -> Result<ContextId, NavigationError> {
        if self.tree.contains(from) {
            return Ok(from);
        }
        self.degrade(NavigationError::UnknownContext(from))?;
        Ok(self.tree.root())
    }

    fn check_bindings(&self, operation: &Operation) -> Result<(), NavigationError> {
        match operation {
            Operation::Open(instance) => self.check_binding(instance),
            Operation::SetBackstack { target, .. } => target
                .iter()
                .try_for_each(|instance| self.check_binding(instance)),
            Operation::Aggregate(operations) => operations
                .iter()
                .try_for_each(|operation| self.check_bindings(operation)),
            Operation::Close(_) | Operation::Complete(..) | Operation::SideEffect(_) => Ok(()),
        }
    }

    fn check_binding(&self, instance: &Instance) -> Result<(), NavigationError> {
        if self.bindings.is_bound(instance.key()) {
            return Ok(());
        }
        self.degrade(NavigationError::MissingBinding(
            instance.key().name().to_string(),
        ))
    }

    fn route(&self, from: ContextId, operation: &Operation) -> Option<ContainerKey> {
        let accepts = |key: &ContainerKey| self.accepts(key, from, operation);

        let mut cursor = Some(from);
        while let Some(context) = cursor {
            match self.tree.kind(context) {
                Some(ContextKind::Container(key)) => {
                    if accepts(key) {
                        return Some(key.clone());
                    }
                }
                _ => {
                    for child in self.tree.children(context) {
                        if let Some(ContextKind::Container(key)) = self.tree.kind(child)
                            && accepts(key)
                        {
                            return Some(key.clone());
                        }
                    }
                }
            }
            cursor = self.tree.parent(context);
        }

        self.order.iter().find(|key| accepts(key)).cloned()
    }

    fn dispatch(
        &mut self,
        key: &ContainerKey,
        from: ContextId,
        operation: Operation,
        force: bool,
    ) -> Result<Option<NavigationTransition>, NavigationError> {
        let container = self
            .containers
            .get_mut(key)
            .ok_or_else(|| NavigationError::UnknownContainer(key.clone()))?;

        let execution = container.execute(&self.tree, from, operation, force);
        self.finish(key, execution)
    }

    /// Everything that follows a committed transition: contexts, results,
    /// focus, side effects and flows, in that order.
    ///
    /// A failed delivery doesn't stop the others; the first error is
    /// returned once everything else ran.
    fn finish(
        &mut self,
        key: &ContainerKey,
        execution: Execution,
    ) -> Result<Option<NavigationTransition>, NavigationError> {
        let Execution {
            transition,
            closed,
            completed,
            effects,
        } = execution;

        if let Some(transition) = &transition {
            self.sync_contexts(key, transition);
        }

        let mut failure = None;

        for instance in closed {
            if let Some(channel) = instance.result_channel()
                && let Err(error) = self.results.deliver(channel, NavigationOutcome::Closed)
            {
                failure.get_or_insert(error);
            }
        }

        for (instance, result) in completed {
            let Some(channel) = instance.result_channel() else {
                continue;
            };
            let delivered = match result {
                Some(result) => self
                    .results
                    .deliver(channel, NavigationOutcome::Completed(result)),
                None => self.results.deliver_unit(channel),
            };
            if let Err(error) = delivered {
                failure.get_or_insert(error);
            }
        }

        self.prune_destroyed();

        if let Some(transition) = &transition
            && !(transition.is_closing() && transition.current().is_empty())
            && let Some(context) = self.tree.container(key)
        {
            self.tree.activate(context);
        }
        self.refresh_active();

        for effect in effects {
            effect.run();
        }

        let settled = self.settle();
        match failure {
            Some(error) => Err(error),
            None => settled.map(|_| transition),
        }
    }

    /// Forgets destroyed result owners once no instance reports to them.
    fn prune_destroyed(&mut self) {
        if !self.results.has_destroyed() {
            return;
        }

        let referenced: HashSet<String> = self
            .containers
            .values()
            .flat_map(|container| container.backstack().iter())
            .filter_map(|instance| instance.result_channel())
            .map(|channel| channel.owner_id)
            .collect();

        self.results.prune_destroyed(|owner| referenced.contains(owner));
    }

    fn sync_contexts(&mut self, key: &ContainerKey, transition: &NavigationTransition) {
        let Some(context) = self.tree.container(key) else {
            return;
        };

        for instance in transition.closed() {
            self.remove_destination(instance);
        }

        for instance in transition.opened() {
            self.tree.add_destination(context, instance.id());
            self.plugins.opened(instance);
        }
    }

    /// Drops the context of a destination with everything nested in it.
    fn remove_destination(&mut self, instance: &Instance) {
        let Some(context) = self.tree.destination(instance.id()) else {
            return;
        };

        let removed = self.tree.remove_subtree(context);

        let mut instances: HashMap<InstanceId, Instance> = HashMap::new();
        instances.insert(instance.id().clone(), instance.clone());

        for kind in &removed {
            if let ContextKind::Container(key) = kind
                && let Some(container) = self.containers.remove(key)
            {
                tracing::debug!("dropping nested container {}", key);
                self.order.retain(|other| other != key);
                if self.default_container.as_ref() == Some(key) {
                    self.default_container = None;
                }
                for nested in container.backstack() {
                    instances.insert(nested.id().clone(), nested.clone());
                }
            }
        }

        for kind in removed {
            if let ContextKind::Destination(id) = kind {
                self.results.drop_owner(id.as_str());
                if let Some(instance) = instances.get(&id) {
                    self.plugins.closed(instance);
                }
            }
        }
    }

    fn refresh_active(&mut self) {
        let active = self
            .tree
            .active_container()
            .and_then(|key| self.containers.get(key))
            .and_then(|container| container.active())
            .cloned();

        let changed = match (&self.active, &active) {
            (Some(before), Some(after)) => before.id() != after.id(),
            (None, None) => false,
            _ => true,
        };

        if changed {
            self.active = active;
            self.plugins.active(self.active.as_ref());
        }
    }

    fn settle(&mut self) -> Result<(), NavigationError> {
        self.settle_with(None).map(|_| ())
    }

    /// Handles flow messages until there are none left. Nested calls, made
    /// while a flow updates its container, return immediately and leave the
    /// messages to the outermost one.
    fn settle_with(&mut self, first: Option<FlowMessage>) -> Result<usize, NavigationError> {
        if self.settling {
            if let Some(message) = first {
                let _ = self.flow_tx.send(message);
            }
            return Ok(0);
        }

        self.settling = true;
        let result = self.drain(first);
        self.settling = false;
        result
    }

    fn drain(&mut self, first: Option<FlowMessage>) -> Result<usize, NavigationError> {
        let mut count = 0;
        let mut next = first;

        loop {
            let message = match next.take() {
                Some(message) => message,
                None => match self.flow_rx.try_recv() {
                    Ok(message) => message,
                    Err(_) => return Ok(count),
                },
            };
            count += 1;
            self.apply_flow_message(message)?;
        }
    }

    fn apply_flow_message(&mut self, message: FlowMessage) -> Result<(), NavigationError> {
        let id = message.flow();
        let Some(Some(entry)) = self.flows.get_mut(&id) else {
            tracing::debug!("dropping message for {}", id);
            return Ok(());
        };

        match entry.state.apply(message) {
            Applied::Ignored => Ok(()),
            Applied::Cancelled => {
                entry.state.abort_tasks();
                self.results.drop_owner(&id.owner_id());
                tracing::info!("{} cancelled", id);
                Ok(())
            }
            Applied::Changed => self.run_flow(id),
        }
    }

    fn run_flow(&mut self, id: FlowId) -> Result<(), NavigationError> {
        let span = tracing::span!(Level::INFO, "flow", id = %id);
        let _enter = span.enter();

        let mut entry = self
            .flows
            .get_mut(&id)
            .ok_or(NavigationError::UnknownFlow(id))?
            .take()
            .ok_or(NavigationError::FlowBusy(id))?;

        let update = entry.update(id, &mut self.spawner, &self.flow_tx);
        let container = entry.container().clone();

        if let Some(slot) = self.flows.get_mut(&id) {
            *slot = Some(entry);
        }

        match update? {
            Update::Idle => Ok(()),
            Update::Finished => {
                tracing::info!("{} finished", id);
                self.results.drop_owner(&id.owner_id());
                Ok(())
            }
            Update::Pending(plan) => {
                for listener in plan.listeners {
                    let channel = listener.channel.clone();
                    let expected = Some(listener.expected);
                    let callback = listener.callback(id, self.flow_tx.clone());
                    self.results.register_raw(channel, expected, callback)?;
                }

                let Some(target) = plan.target else {
                    return Ok(());
                };

                let current = self
                    .containers
                    .get(&container)
                    .ok_or_else(|| NavigationError::UnknownContainer(container.clone()))?
                    .backstack()
                    .clone();
                let from = self
                    .tree
                    .container(&container)
                    .unwrap_or_else(|| self.tree.root());

                self.dispatch(&container, from, Operation::set_backstack(current, target), true)?;
                Ok(())
            }
        }
    }
}

fn describe(operation: &Operation) -> String {
    match operation {
        Operation::Open(instance)
        | Operation::Close(instance)
        | Operation::Complete(instance, _) => instance.key().name().to_string(),
        Operation::SetBackstack { target, .. } => format!("backstack {target:?}"),
        Operation::Aggregate(operations) => operations
            .iter()
            .map(describe)
            .collect::<Vec<_>>()
            .join(", "),
        Operation::SideEffect(_) => "side effect".to_string(),
    }
}

impl std::fmt::Debug for Navigation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Navigation")
            .field("mode", &self.mode)
            .field("containers", &self.order)
            .field("active", &self.active)
            .field("flows", &self.flows.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::backstack::tests::{Screen, names, screen};
    use crate::engine::NavigationFilter;
    use crate::key::{NavigationKey, SupportsPush, WithResult};
    use crate::plugin::NavigationPlugin;
    use crate::results::ResultChannel;

    fn main() -> ContainerKey {
        ContainerKey::from("main")
    }

    fn navigation() -> Navigation {
        let mut blueprint = Navigation::design();
        blueprint
            .bind_opaque::<Screen>()
            .container(NavigationContainer::new("main"));
        blueprint.finish().unwrap()
    }

    fn top(navigation: &Navigation, key: &str) -> Instance {
        navigation
            .container(&ContainerKey::from(key))
            .and_then(|container| container.active())
            .cloned()
            .unwrap()
    }

    fn is_modal(instance: &Instance) -> bool {
        instance
            .key_as::<Screen>()
            .is_some_and(|screen| screen.0.starts_with("modal"))
    }

    fn routed(mode: Mode) -> Navigation {
        let mut blueprint = Navigation::design();
        blueprint
            .mode(mode)
            .bind_opaque::<Screen>()
            .container(
                NavigationContainer::new("main")
                    .with_filter(NavigationFilter::accept(|instance| !is_modal(instance))),
            )
            .container(
                NavigationContainer::new("modals").with_filter(NavigationFilter::accept(is_modal)),
            );
        blueprint.finish().unwrap()
    }

    #[test]
    fn test_routes_to_accepting_container() {
        let mut navigation = routed(Mode::Strict);
        let root = navigation.root();

        navigation.navigate(root, Operation::open(screen("home"))).unwrap();
        navigation.navigate(root, Operation::open(screen("modal-share"))).unwrap();

        assert_eq!(names(navigation.container(&main()).unwrap().backstack()), vec!["home"]);
        assert_eq!(
            names(navigation.container(&"modals".into()).unwrap().backstack()),
            vec!["modal-share"]
        );
        assert_eq!(
            navigation.active_instance().map(|i| i.key_as::<Screen>().unwrap().0),
            Some("modal-share")
        );
    }

    #[test]
    fn test_no_container() {
        let mut blueprint = Navigation::design();
        blueprint
            .bind_opaque::<Screen>()
            .container(
                NavigationContainer::new("main").with_filter(NavigationFilter::accept_none()),
            );
        let mut navigation = blueprint.finish().unwrap();
        let root = navigation.root();

        let err = navigation.navigate(root, Operation::open(screen("A"))).unwrap_err();
        assert!(matches!(err, NavigationError::NoContainer(_)));
    }

    #[test]
    fn test_lenient_falls_back_to_default() {
        let mut blueprint = Navigation::design();
        blueprint
            .lenient()
            .bind_opaque::<Screen>()
            .container(
                NavigationContainer::new("main").with_filter(NavigationFilter::accept_none()),
            );
        let mut navigation = blueprint.finish().unwrap();
        let root = navigation.root();

        navigation.navigate(root, Operation::open(screen("A"))).unwrap();
        assert_eq!(names(navigation.container(&main()).unwrap().backstack()), vec!["A"]);
    }

    #[test]
    fn test_missing_binding() {
        let mut blueprint = Navigation::design();
        blueprint.container(NavigationContainer::new("main"));
        let mut navigation = blueprint.finish().unwrap();
        let root = navigation.root();

        let err = navigation
            .execute(&main(), root, Operation::open(screen("A")))
            .unwrap_err();
        assert!(matches!(err, NavigationError::MissingBinding(_)));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_wrong_thread() {
        let navigation = navigation();
        let root = navigation.root();

        let err = std::thread::spawn(move || {
            let mut navigation = navigation;
            navigation
                .navigate(root, Operation::open(screen("A")))
                .unwrap_err()
        })
        .join()
        .unwrap();

        assert!(matches!(err, NavigationError::WrongThread { .. }));
    }

    #[test]
    fn test_routing_prefers_nearest_container() {
        let mut navigation = navigation();
        let root = navigation.root();

        navigation.navigate(root, Operation::open(screen("host"))).unwrap();
        let host = top(&navigation, "main");
        let host_context = navigation.context_of(host.id()).unwrap();
        navigation
            .add_container(host_context, NavigationContainer::new("tabs"))
            .unwrap();

        navigation.navigate(host_context, Operation::open(screen("tab"))).unwrap();

        assert_eq!(names(navigation.container(&"tabs".into()).unwrap().backstack()), vec!["tab"]);
        assert_eq!(names(navigation.container(&main()).unwrap().backstack()), vec!["host"]);
        assert_eq!(navigation.tree().active_container(), Some(&ContainerKey::from("tabs")));
    }

    #[test]
    fn test_duplicate_container() {
        let mut navigation = navigation();
        let root = navigation.root();

        let err = navigation
            .add_container(root, NavigationContainer::new("main"))
            .unwrap_err();
        assert!(matches!(err, NavigationError::DuplicateContainer(_)));
    }

    #[derive(Debug)]
    struct PickName;
    impl NavigationKey for PickName {}
    impl SupportsPush for PickName {}
    impl WithResult for PickName {
        type Result = String;
    }

    #[test]
    fn test_result_channel() {
        let mut blueprint = Navigation::design();
        blueprint
            .bind_opaque::<Screen>()
            .bind_opaque::<PickName>()
            .container(NavigationContainer::new("main"));
        let mut navigation = blueprint.finish().unwrap();
        let root = navigation.root();

        navigation.navigate(root, Operation::open(screen("profile"))).unwrap();
        let profile = top(&navigation, "main");
        let from = navigation.context_of(profile.id()).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let channel = ResultChannel::<String>::for_instance(profile.id(), "name", move |outcome| {
            record.lock().unwrap().push(outcome)
        });

        channel.open(&mut navigation, from, PickName).unwrap();
        let picker = top(&navigation, "main");
        assert!(picker.key().is::<PickName>());

        navigation
            .navigate(from, Operation::complete_with(picker, String::from("Ada")))
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![NavigationOutcome::Completed(String::from("Ada"))]);
        assert_eq!(top(&navigation, "main"), profile);
    }

    #[test]
    fn test_result_type_mismatch() {
        let mut blueprint = Navigation::design();
        blueprint
            .bind_opaque::<Screen>()
            .bind_opaque::<PickName>()
            .container(NavigationContainer::new("main"));
        let mut navigation = blueprint.finish().unwrap();
        let root = navigation.root();

        navigation.navigate(root, Operation::open(screen("profile"))).unwrap();
        let profile = top(&navigation, "main");
        let from = navigation.context_of(profile.id()).unwrap();

        let channel = ResultChannel::<String>::for_instance(profile.id(), "name", |_| {});
        channel.open(&mut navigation, from, PickName).unwrap();
        let picker = top(&navigation, "main");
        let picker_id = picker.id().clone();

        let err = navigation
            .navigate(from, Operation::complete_with(picker, 7u32))
            .unwrap_err();
        assert!(matches!(err, NavigationError::ResultType { .. }));
        assert!(navigation.instance(&picker_id).is_none());
        assert_eq!(navigation.active_instance(), Some(&profile));
    }

    #[test]
    fn test_result_dropped_with_its_owner() {
        let mut blueprint = Navigation::design();
        blueprint
            .bind_opaque::<Screen>()
            .bind_opaque::<PickName>()
            .container(NavigationContainer::new("main"));
        let mut navigation = blueprint.finish().unwrap();
        let root = navigation.root();

        navigation.navigate(root, Operation::open(screen("profile"))).unwrap();
        let profile = top(&navigation, "main");
        let channel = ResultChannelId::new(profile.id().as_str(), "name");
        let picker = Instance::push(PickName).with_metadata::<ResultChannelId>(channel.clone());
        navigation.navigate(root, Operation::open(picker.clone())).unwrap();

        let operation = Operation::aggregate([
            Operation::close(profile),
            Operation::complete_with(picker, String::from("Ada")),
        ]);
        navigation.navigate(root, operation).unwrap();

        assert!(!navigation.results.has_pending(&channel));
        assert!(!navigation.results.has_destroyed());
    }

    #[test]
    fn test_result_dropped_after_owner_closed_earlier() {
        let mut blueprint = Navigation::design();
        blueprint
            .bind_opaque::<Screen>()
            .bind_opaque::<PickName>()
            .container(NavigationContainer::new("main"));
        let mut navigation = blueprint.finish().unwrap();
        let root = navigation.root();

        navigation.navigate(root, Operation::open(screen("profile"))).unwrap();
        let profile = top(&navigation, "main");
        let channel = ResultChannelId::new(profile.id().as_str(), "name");
        let picker = Instance::push(PickName).with_metadata::<ResultChannelId>(channel.clone());
        navigation.navigate(root, Operation::open(picker.clone())).unwrap();

        navigation.navigate(root, Operation::close(profile)).unwrap();
        assert!(navigation.results.has_destroyed());

        navigation
            .navigate(root, Operation::complete_with(picker, String::from("Ada")))
            .unwrap();

        assert!(!navigation.results.has_pending(&channel));
        assert!(!navigation.results.has_destroyed());
    }

    #[test]
    fn test_complete_without_value_closes_typed_channel() {
        let mut blueprint = Navigation::design();
        blueprint
            .bind_opaque::<Screen>()
            .bind_opaque::<PickName>()
            .container(NavigationContainer::new("main"));
        let mut navigation = blueprint.finish().unwrap();
        let root = navigation.root();

        navigation.navigate(root, Operation::open(screen("profile"))).unwrap();
        let profile = top(&navigation, "main");
        let from = navigation.context_of(profile.id()).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let channel = ResultChannel::<String>::for_instance(profile.id(), "name", move |outcome| {
            record.lock().unwrap().push(outcome)
        });
        channel.open(&mut navigation, from, PickName).unwrap();
        let picker = top(&navigation, "main");

        navigation.navigate(from, Operation::complete(picker)).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![NavigationOutcome::Closed]);
        assert_eq!(top(&navigation, "main"), profile);
    }

    #[derive(Default)]
    struct Journal(Mutex<Vec<String>>);

    impl Journal {
        fn push(&self, event: &str, instance: Option<&Instance>) {
            let name = instance
                .and_then(|instance| instance.key_as::<Screen>())
                .map_or("-", |screen| screen.0);
            self.0.lock().unwrap().push(format!("{event} {name}"));
        }
    }

    impl NavigationPlugin for Journal {
        fn on_opened(&self, instance: &Instance) {
            self.push("opened", Some(instance));
        }

        fn on_closed(&self, instance: &Instance) {
            self.push("closed", Some(instance));
        }

        fn on_active(&self, instance: Option<&Instance>) {
            self.push("active", instance);
        }
    }

    #[test]
    fn test_plugins_follow_lifecycle() {
        let journal = Arc::new(Journal::default());
        let mut blueprint = Navigation::design();
        blueprint
            .bind_opaque::<Screen>()
            .plugin_arc(journal.clone())
            .container(NavigationContainer::new("main"));
        let mut navigation = blueprint.finish().unwrap();
        let root = navigation.root();

        navigation.navigate(root, Operation::open(screen("A"))).unwrap();
        navigation.navigate(root, Operation::open(screen("B"))).unwrap();
        let b = top(&navigation, "main");
        navigation.navigate(root, Operation::close(b)).unwrap();

        assert_eq!(
            *journal.0.lock().unwrap(),
            vec![
                "opened A",
                "active A",
                "opened B",
                "active B",
                "closed B",
                "active A",
            ]
        );
    }

    #[test]
    fn test_closing_host_drops_nested_container() {
        let journal = Arc::new(Journal::default());
        let mut blueprint = Navigation::design();
        blueprint
            .bind_opaque::<Screen>()
            .plugin_arc(journal.clone())
            .container(NavigationContainer::new("main"));
        let mut navigation = blueprint.finish().unwrap();
        let root = navigation.root();

        navigation.navigate(root, Operation::open(screen("host"))).unwrap();
        let host = top(&navigation, "main");
        let host_context = navigation.context_of(host.id()).unwrap();
        navigation
            .add_container(host_context, NavigationContainer::new("tabs"))
            .unwrap();
        navigation
            .execute(&"tabs".into(), host_context, Operation::open(screen("tab")))
            .unwrap();
        let tab = top(&navigation, "tabs");

        navigation.execute(&main(), root, Operation::close(host)).unwrap();

        assert!(navigation.container(&"tabs".into()).is_none());
        assert!(navigation.context_of(tab.id()).is_none());
        let events = journal.0.lock().unwrap();
        assert!(events.contains(&"closed tab".to_string()));
        assert!(events.contains(&"closed host".to_string()));
        assert_eq!(events.last().map(String::as_str), Some("active -"));
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Article {
        slug: String,
    }
    impl NavigationKey for Article {}
    impl SupportsPush for Article {}

    fn library() -> Navigation {
        let mut blueprint = Navigation::design();
        blueprint
            .bind::<Article>()
            .bind_opaque::<Screen>()
            .container(NavigationContainer::new("main"));
        blueprint.finish().unwrap()
    }

    #[test]
    fn test_save_and_restore() {
        let mut navigation = library();
        let root = navigation.root();
        for slug in ["rust", "serde"] {
            let article = Instance::push(Article { slug: slug.into() });
            navigation.navigate(root, Operation::open(article)).unwrap();
        }
        navigation.navigate(root, Operation::open(screen("opaque"))).unwrap();

        let saved = navigation.save().unwrap();
        let text = saved.to_json().unwrap();

        let mut restored = library();
        restored.restore(&SavedState::from_json(&text).unwrap()).unwrap();

        let ids = |navigation: &Navigation| -> Vec<InstanceId> {
            let backstack = navigation.container(&main()).unwrap().backstack();
            backstack.ids().into_iter().cloned().collect()
        };
        let before: Vec<_> = ids(&navigation).into_iter().take(2).collect();
        let after = ids(&restored);
        assert_eq!(before, after);

        let slugs: Vec<_> = restored
            .container(&main())
            .unwrap()
            .backstack()
            .iter()
            .filter_map(|instance| instance.key_as::<Article>())
            .map(|article| article.slug.as_str())
            .collect();
        assert_eq!(slugs, vec!["rust", "serde"]);
        assert!(restored.context_of(&after[1]).is_some());
    }

    #[test]
    fn test_restore_waits_for_container() {
        let mut navigation = library();
        let root = navigation.root();
        let article = Instance::push(Article { slug: "later".into() });
        let id = article.id().clone();

        let mut saved = SavedState::default();
        saved.containers.insert(
            ContainerKey::from("later"),
            vec![persist::describe(&navigation.bindings, &article).unwrap()],
        );

        navigation.restore(&saved).unwrap();
        assert!(navigation.instance(&id).is_none());

        navigation
            .add_container(root, NavigationContainer::new("later"))
            .unwrap();
        assert!(navigation.instance(&id).is_some());
    }

    #[test]
    fn test_restore_unknown_key() {
        let json = r#"{"containers":{"main":[
            {"id":"a","key":{"name":"gone::Key","value":null},"direction":"Push"}
        ]}}"#;
        let saved = SavedState::from_json(json).unwrap();

        let mut strict = library();
        assert!(matches!(
            strict.restore(&saved).unwrap_err(),
            NavigationError::UnknownKey(_)
        ));

        let mut blueprint = Navigation::design();
        blueprint
            .lenient()
            .bind::<Article>()
            .container(NavigationContainer::new("main"));
        let mut lenient = blueprint.finish().unwrap();
        lenient.restore(&saved).unwrap();
        assert!(lenient.container(&main()).unwrap().backstack().is_empty());
    }

    #[test]
    fn test_render() {
        let mut blueprint = Navigation::design();
        blueprint
            .bind_with_renderer::<Article, _, _>(|_, article| {
                Ok(format!("<h1>{}</h1>", article.slug))
            })
            .container(NavigationContainer::new("main"));
        let mut navigation = blueprint.finish().unwrap();
        let root = navigation.root();

        let article = Instance::push(Article { slug: "rust".into() });
        let id = article.id().clone();
        navigation.navigate(root, Operation::open(article)).unwrap();

        let rendered = navigation.render(&id).unwrap();
        assert_eq!(rendered.downcast_ref::<String>().map(String::as_str), Some("<h1>rust</h1>"));
        assert!(matches!(
            navigation.render(&InstanceId::from("nowhere")),
            Err(NavigationError::Detached(_))
        ));
    }

    #[derive(Debug)]
    struct AskName;
    impl NavigationKey for AskName {}
    impl SupportsPush for AskName {}
    impl WithResult for AskName {
        type Result = String;
    }

    #[derive(Debug)]
    struct AskAge;
    impl NavigationKey for AskAge {}
    impl SupportsPush for AskAge {}
    impl WithResult for AskAge {
        type Result = u32;
    }

    fn wizard() -> Navigation {
        let mut blueprint = Navigation::design();
        blueprint
            .bind_opaque::<AskName>()
            .bind_opaque::<AskAge>()
            .container(NavigationContainer::new("wizard"));
        blueprint.finish().unwrap()
    }

    type Outcomes<T> = Arc<Mutex<Vec<Result<T, String>>>>;

    fn recorder<T: Send + 'static>()
    -> (Outcomes<T>, impl FnMut(anyhow::Result<T>) + Send + 'static) {
        let outcomes: Outcomes<T> = Arc::default();
        let record = outcomes.clone();
        (outcomes, move |outcome: anyhow::Result<T>| {
            record.lock().unwrap().push(outcome.map_err(|error| error.to_string()))
        })
    }

    fn complete_top<T: Send + Sync + 'static>(navigation: &mut Navigation, value: T) {
        let step = top(navigation, "wizard");
        let root = navigation.root();
        navigation
            .execute(&"wizard".into(), root, Operation::complete_with(step, value))
            .unwrap();
    }

    #[test]
    fn test_flow_walks_through_steps() {
        let mut navigation = wizard();
        let (outcomes, on_complete) = recorder::<(String, u32)>();

        let flow = navigation
            .register_flow(
                "wizard",
                |scope: &mut FlowScope<'_>| {
                    let name = scope.open(AskName)?;
                    let age = scope.step(AskAge).depends_on(&name).open()?;
                    Ok((name, age))
                },
                on_complete,
            )
            .unwrap();

        assert!(top(&navigation, "wizard").key().is::<AskName>());
        complete_top(&mut navigation, String::from("Ada"));

        let backstack = navigation.container(&"wizard".into()).unwrap().backstack().clone();
        assert_eq!(backstack.len(), 2);
        assert!(backstack.active().unwrap().key().is::<AskAge>());

        complete_top(&mut navigation, 36u32);
        assert_eq!(*outcomes.lock().unwrap(), vec![Ok((String::from("Ada"), 36))]);
        assert_eq!(navigation.flow_status(flow), Some(FlowStatus::Completed));
    }

    #[test]
    fn test_flow_back_navigation() {
        let mut navigation = wizard();
        let (outcomes, on_complete) = recorder::<(String, u32)>();
        let root = navigation.root();

        let flow = navigation
            .register_flow(
                "wizard",
                |scope: &mut FlowScope<'_>| {
                    let name = scope.open(AskName)?;
                    let age = scope.open(AskAge)?;
                    Ok((name, age))
                },
                on_complete,
            )
            .unwrap();

        let first = top(&navigation, "wizard");
        complete_top(&mut navigation, String::from("Ada"));

        let age = top(&navigation, "wizard");
        navigation
            .execute(&"wizard".into(), root, Operation::close(age))
            .unwrap();
        assert_eq!(top(&navigation, "wizard"), first);

        navigation
            .execute(&"wizard".into(), root, Operation::close(first))
            .unwrap();
        assert_eq!(navigation.flow_status(flow), Some(FlowStatus::Cancelled));
        assert!(outcomes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_flow_invalidation() {
        let mut navigation = wizard();
        let (_, on_complete) = recorder::<(String, u32)>();
        let version = Arc::new(AtomicU32::new(0));
        let read = version.clone();

        let flow = navigation
            .register_flow(
                "wizard",
                move |scope: &mut FlowScope<'_>| {
                    let version = read.load(Ordering::SeqCst);
                    let name = scope.scoped(&version, |scope| scope.open(AskName))?;
                    let age = scope.open(AskAge)?;
                    Ok((name, age))
                },
                on_complete,
            )
            .unwrap();

        let first = top(&navigation, "wizard");
        complete_top(&mut navigation, String::from("Ada"));
        assert!(top(&navigation, "wizard").key().is::<AskAge>());

        version.store(1, Ordering::SeqCst);
        navigation.update_flow(flow).unwrap();

        let backstack = navigation.container(&"wizard".into()).unwrap().backstack().clone();
        assert_eq!(backstack.len(), 1);
        assert!(backstack.active().unwrap().key().is::<AskName>());
        assert_ne!(backstack.active().unwrap(), &first);
        assert_eq!(navigation.flow_status(flow), Some(FlowStatus::Running));
    }

    #[test]
    fn test_unknown_flow() {
        let mut navigation = wizard();
        assert!(matches!(
            navigation.update_flow(FlowId(42)),
            Err(NavigationError::UnknownFlow(_))
        ));
    }

    #[cfg(feature = "tokio")]
    #[test]
    fn test_async_step_completes() {
        let mut navigation = wizard();
        let (outcomes, on_complete) = recorder::<String>();

        let flow = navigation
            .register_flow(
                "wizard",
                |scope: &mut FlowScope<'_>| {
                    let name = scope.open(AskName)?;
                    let greeting = scope.run_async(&name, || {
                        let name = name.clone();
                        async move { Ok::<_, anyhow::Error>(format!("hello {name}")) }
                    })?;
                    Ok(greeting)
                },
                on_complete,
            )
            .unwrap();

        complete_top(&mut navigation, String::from("Ada"));
        while navigation.flow_status(flow) == Some(FlowStatus::Running) {
            assert!(navigation.wait_pending(Duration::from_secs(5)).unwrap());
        }

        assert_eq!(*outcomes.lock().unwrap(), vec![Ok(String::from("hello Ada"))]);
    }

    #[cfg(feature = "tokio")]
    #[test]
    fn test_async_step_restarts_on_new_dependency() {
        let mut navigation = wizard();
        let (outcomes, on_complete) = recorder::<u32>();
        let version = Arc::new(AtomicU32::new(0));
        let read = version.clone();

        let flow = navigation
            .register_flow(
                "wizard",
                move |scope: &mut FlowScope<'_>| {
                    let version = read.load(Ordering::SeqCst);
                    scope.run_async(&version, move || async move {
                        if version == 0 {
                            tokio::time::sleep(Duration::from_secs(30)).await;
                        }
                        Ok::<_, anyhow::Error>(version)
                    })
                },
                on_complete,
            )
            .unwrap();

        version.store(1, Ordering::SeqCst);
        navigation.update_flow(flow).unwrap();
        while navigation.flow_status(flow) == Some(FlowStatus::Running) {
            assert!(navigation.wait_pending(Duration::from_secs(5)).unwrap());
        }

        assert_eq!(*outcomes.lock().unwrap(), vec![Ok(1)]);
    }

    #[cfg(feature = "tokio")]
    #[test]
    fn test_async_failure_reaches_on_complete() {
        let mut navigation = wizard();
        let (outcomes, on_complete) = recorder::<u32>();

        let flow = navigation
            .register_flow(
                "wizard",
                |scope: &mut FlowScope<'_>| {
                    scope.run_async(&(), || async { Err::<u32, _>(anyhow::anyhow!("offline")) })
                },
                on_complete,
            )
            .unwrap();

        while navigation.flow_status(flow) == Some(FlowStatus::Running) {
            assert!(navigation.wait_pending(Duration::from_secs(5)).unwrap());
        }

        assert_eq!(*outcomes.lock().unwrap(), vec![Err(String::from("offline"))]);
        assert_eq!(navigation.flow_status(flow), Some(FlowStatus::Failed));
    }
}
