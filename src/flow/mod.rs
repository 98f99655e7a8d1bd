//! Multi-step flows.
//!
//! A flow is a plain function which opens its steps one after another and
//! returns once every step produced a result:
//!
//! ```rust,ignore
//! navigation.register_flow("signup", |scope| {
//!     let name = scope.open(AskName)?;
//!     let age = scope.step(AskAge).depends_on(&name).open()?;
//!     Ok((name, age))
//! }, |outcome| println!("{outcome:?}"))?;
//! ```
//!
//! The function is evaluated again whenever one of its steps completes,
//! closes, or an async step finishes. Each evaluation records the steps it
//! went through; the recorded steps become the backstack of the flow's
//! container, so the step on top is always the first one without a result.

mod scope;
mod step;
mod task;

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::mpsc::Sender;

use serde::{Deserialize, Serialize};

use crate::backstack::Backstack;
use crate::core::{Dynamic, Hash32};
use crate::engine::ContainerKey;
use crate::error::NavigationError;
use crate::instance::{Instance, InstanceId};
use crate::operation::NavigationResult;
use crate::results::{NavigationOutcome, RawCallback, ResultChannelId};

pub use self::scope::{FlowInterrupt, FlowScope, FlowStepBuilder};
use self::scope::Interrupt;
pub use self::step::{FlowStep, FlowStepId, FlowStepLink};
pub(crate) use self::task::SpawnerSlot;
#[cfg(feature = "tokio")]
pub use self::task::TokioSpawner;
pub use self::task::{BoxFuture, Spawner, TaskHandle};

/// Identity of a registered flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(pub(crate) u64);

impl FlowId {
    /// The owner id used by the result channels of the flow's steps.
    pub fn owner_id(self) -> String {
        format!("flow:{}", self.0)
    }
}

impl Display for FlowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "flow:{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowStatus {
    Running,
    Completed,
    /// The first step was closed by the user.
    Cancelled,
    Failed,
}

/// Sent to the navigation thread whenever something a flow waits for
/// happens.
pub(crate) enum FlowMessage {
    Completed {
        flow: FlowId,
        step: FlowStepId,
        instance: InstanceId,
        value: NavigationResult,
    },
    Closed {
        flow: FlowId,
        step: FlowStepId,
        instance: InstanceId,
    },
    Async {
        flow: FlowId,
        step: FlowStepId,
        generation: u64,
        result: anyhow::Result<Dynamic>,
    },
}

impl FlowMessage {
    pub fn flow(&self) -> FlowId {
        match self {
            FlowMessage::Completed { flow, .. }
            | FlowMessage::Closed { flow, .. }
            | FlowMessage::Async { flow, .. } => *flow,
        }
    }
}

struct StoredResult {
    depends_on: Hash32,
    value: Dynamic,
}

pub(crate) struct AsyncTask {
    depends_on: Hash32,
    generation: u64,
    handle: TaskHandle,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Applied {
    Changed,
    Cancelled,
    Ignored,
}

/// Everything a flow remembers between two evaluations.
pub(crate) struct FlowState {
    results: HashMap<FlowStepId, StoredResult>,
    /// The instance shown for a step, with the fingerprint it was made for.
    instances: HashMap<FlowStepId, (Hash32, Instance)>,
    tasks: HashMap<FlowStepId, AsyncTask>,
    failures: HashMap<FlowStepId, anyhow::Error>,
    generation: u64,
    /// The steps of the last backstack the flow asked for, bottom first.
    last_target: Vec<(FlowStepId, InstanceId)>,
    status: FlowStatus,
}

impl FlowState {
    fn new() -> Self {
        Self {
            results: HashMap::new(),
            instances: HashMap::new(),
            tasks: HashMap::new(),
            failures: HashMap::new(),
            generation: 0,
            last_target: Vec::new(),
            status: FlowStatus::Running,
        }
    }

    /// The stored result of a step, if it was computed for `depends_on`.
    /// A result computed for anything else is stale and is dropped.
    fn cached<T: Clone + 'static>(&mut self, step: &FlowStepId, depends_on: Hash32) -> Option<T> {
        let stored = self.results.get(step)?;
        if stored.depends_on != depends_on {
            tracing::debug!("dropping stale result of {}", step);
            self.results.remove(step);
            return None;
        }
        stored.value.downcast_ref::<T>().cloned()
    }

    pub fn apply(&mut self, message: FlowMessage) -> Applied {
        if self.status != FlowStatus::Running {
            return Applied::Ignored;
        }

        match message {
            FlowMessage::Completed {
                step,
                instance,
                value,
                ..
            } => {
                let Some((depends_on, _)) = self
                    .instances
                    .get(&step)
                    .filter(|(_, current)| current.id() == &instance)
                else {
                    return Applied::Ignored;
                };

                self.results.insert(
                    step,
                    StoredResult {
                        depends_on: *depends_on,
                        value: value.value().clone(),
                    },
                );
                Applied::Changed
            }
            FlowMessage::Closed { step, instance, .. } => {
                let Some(index) = self
                    .last_target
                    .iter()
                    .position(|(id, shown)| *id == step && *shown == instance)
                else {
                    return Applied::Ignored;
                };

                if index == 0 {
                    self.status = FlowStatus::Cancelled;
                    return Applied::Cancelled;
                }

                // Going back from a step reopens the one before it.
                let (previous, _) = &self.last_target[index - 1];
                self.results.remove(previous);
                self.instances.remove(&step);
                self.results.remove(&step);
                Applied::Changed
            }
            FlowMessage::Async {
                step,
                generation,
                result,
                ..
            } => {
                let Some(task) = self
                    .tasks
                    .get(&step)
                    .filter(|task| task.generation == generation)
                else {
                    tracing::debug!("ignoring stale completion of {}", step);
                    return Applied::Ignored;
                };

                let depends_on = task.depends_on;
                self.tasks.remove(&step);

                match result {
                    Ok(value) => {
                        self.results.insert(step, StoredResult { depends_on, value });
                    }
                    Err(error) => {
                        self.failures.insert(step, error);
                    }
                }
                Applied::Changed
            }
        }
    }

    pub fn abort_tasks(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.handle.abort();
        }
    }

    pub fn status(&self) -> FlowStatus {
        self.status
    }
}

enum Evaluation {
    Completed,
    Failed,
    Interrupted,
}

/// A flow body with its output type erased.
trait ErasedFlow: Send {
    fn evaluate(&mut self, scope: &mut FlowScope<'_>) -> Result<Evaluation, NavigationError>;
}

struct TypedFlow<T, F, C> {
    body: F,
    on_complete: C,
    _phantom: PhantomData<fn() -> T>,
}

impl<T, F, C> ErasedFlow for TypedFlow<T, F, C>
where
    T: 'static,
    F: Fn(&mut FlowScope<'_>) -> Result<T, FlowInterrupt> + Send,
    C: FnMut(anyhow::Result<T>) + Send,
{
    fn evaluate(&mut self, scope: &mut FlowScope<'_>) -> Result<Evaluation, NavigationError> {
        match (self.body)(scope) {
            Ok(value) => {
                (self.on_complete)(Ok(value));
                Ok(Evaluation::Completed)
            }
            Err(FlowInterrupt(Interrupt::Pending)) => Ok(Evaluation::Interrupted),
            Err(FlowInterrupt(Interrupt::Failed(error))) => {
                (self.on_complete)(Err(error));
                Ok(Evaluation::Failed)
            }
            Err(FlowInterrupt(Interrupt::Fatal(error))) => Err(error),
        }
    }
}

/// A registered flow: where it shows its steps, its body and its memory.
pub(crate) struct FlowEntry {
    container: ContainerKey,
    body: Box<dyn ErasedFlow>,
    pub state: FlowState,
}

pub(crate) enum Update {
    /// The flow returned or failed; it will not be evaluated again.
    Finished,
    Pending(Plan),
    /// The flow is no longer running.
    Idle,
}

/// What a pending flow wants shown, and the result channels to listen on.
pub(crate) struct Plan {
    pub target: Option<Backstack>,
    pub listeners: Vec<StepListener>,
}

pub(crate) struct StepListener {
    pub channel: ResultChannelId,
    pub expected: (std::any::TypeId, &'static str),
    step: FlowStepId,
    instance: InstanceId,
}

impl StepListener {
    /// Forwards the outcome of the step's instance to the navigation thread.
    pub fn callback(self, flow: FlowId, sender: Sender<FlowMessage>) -> RawCallback {
        let StepListener { step, instance, .. } = self;
        Box::new(move |outcome| {
            let message = match outcome {
                NavigationOutcome::Completed(value) => FlowMessage::Completed {
                    flow,
                    step,
                    instance,
                    value,
                },
                NavigationOutcome::Closed => FlowMessage::Closed {
                    flow,
                    step,
                    instance,
                },
            };
            let _ = sender.send(message);
        })
    }
}

impl FlowEntry {
    pub fn new<T, F, C>(container: ContainerKey, body: F, on_complete: C) -> Self
    where
        T: 'static,
        F: Fn(&mut FlowScope<'_>) -> Result<T, FlowInterrupt> + Send + 'static,
        C: FnMut(anyhow::Result<T>) + Send + 'static,
    {
        Self {
            container,
            body: Box::new(TypedFlow {
                body,
                on_complete,
                _phantom: PhantomData,
            }),
            state: FlowState::new(),
        }
    }

    pub fn container(&self) -> &ContainerKey {
        &self.container
    }

    /// Evaluates the flow once.
    pub fn update(
        &mut self,
        id: FlowId,
        spawner: &mut SpawnerSlot,
        sender: &Sender<FlowMessage>,
    ) -> Result<Update, NavigationError> {
        if self.state.status != FlowStatus::Running {
            return Ok(Update::Idle);
        }

        let mut scope = FlowScope::new(id, &mut self.state, spawner, sender);
        let evaluation = self.body.evaluate(&mut scope);
        let steps = scope.finish();

        match evaluation? {
            Evaluation::Completed => {
                self.state.status = FlowStatus::Completed;
                self.state.abort_tasks();
                Ok(Update::Finished)
            }
            Evaluation::Failed => {
                self.state.status = FlowStatus::Failed;
                self.state.abort_tasks();
                Ok(Update::Finished)
            }
            Evaluation::Interrupted => Ok(Update::Pending(self.plan(id, steps))),
        }
    }

    fn plan(&mut self, id: FlowId, steps: Vec<FlowStep>) -> Plan {
        let recorded: HashSet<&FlowStepId> = steps.iter().map(|step| &step.id).collect();
        self.state.instances.retain(|step, _| recorded.contains(step));

        let last = steps.len().saturating_sub(1);
        let mut target = Vec::with_capacity(steps.len());
        let mut listeners = Vec::with_capacity(steps.len());
        let mut last_target = Vec::with_capacity(steps.len());

        for (index, step) in steps.iter().enumerate() {
            if step.transient && index != last {
                continue;
            }

            let instance = match self.state.instances.get(&step.id) {
                Some((depends_on, instance)) if *depends_on == step.depends_on => instance.clone(),
                _ => {
                    let instance = step.instantiate(id);
                    self.state
                        .instances
                        .insert(step.id.clone(), (step.depends_on, instance.clone()));
                    instance
                }
            };

            if let Some(channel) = instance.result_channel() {
                listeners.push(StepListener {
                    channel,
                    expected: step.result_type,
                    step: step.id.clone(),
                    instance: instance.id().clone(),
                });
            }

            last_target.push((step.id.clone(), instance.id().clone()));
            target.push(instance);
        }

        self.state.last_target = last_target;

        Plan {
            target: (!target.is_empty()).then(|| Backstack::from(target)),
            listeners,
        }
    }
}
