use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::panic::Location;
use std::sync::Arc;
use std::sync::mpsc::Sender;

use crate::core::{Blake3Hasher, Dynamic, Hash32};
use crate::error::NavigationError;
use crate::flow::step::{FlowStep, FlowStepId};
use crate::flow::task::SpawnerSlot;
use crate::flow::{AsyncTask, FlowId, FlowMessage, FlowState};
use crate::instance::Direction;
use crate::key::{AnyKey, SupportsPresent, SupportsPush, WithResult};

#[derive(Debug)]
pub(crate) enum Interrupt {
    /// A step has no result yet.
    Pending,
    /// The flow gave up; its completion callback receives the error.
    Failed(anyhow::Error),
    /// The navigation itself failed.
    Fatal(NavigationError),
}

/// Stops the evaluation of a flow.
///
/// Returned by steps which have no result yet; propagate it with `?`. It can
/// also be built from any error to make the flow fail.
#[derive(Debug)]
pub struct FlowInterrupt(pub(crate) Interrupt);

impl FlowInterrupt {
    pub(crate) fn pending() -> Self {
        Self(Interrupt::Pending)
    }

    pub(crate) fn fatal(error: NavigationError) -> Self {
        Self(Interrupt::Fatal(error))
    }

    pub fn fail(error: impl Into<anyhow::Error>) -> Self {
        Self(Interrupt::Failed(error.into()))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.0, Interrupt::Pending)
    }
}

impl From<anyhow::Error> for FlowInterrupt {
    fn from(error: anyhow::Error) -> Self {
        Self::fail(error)
    }
}

/// The handle a flow body uses to declare its steps.
///
/// The body is evaluated again every time something it depends on changes.
/// Steps which already have a result for the current dependencies return it
/// immediately; the first step without one interrupts the evaluation, and
/// the flow shows it.
pub struct FlowScope<'a> {
    flow: FlowId,
    state: &'a mut FlowState,
    spawner: &'a mut SpawnerSlot,
    sender: &'a Sender<FlowMessage>,
    chain: Vec<Hash32>,
    steps: Vec<FlowStep>,
    visits: HashMap<String, usize>,
}

impl<'a> FlowScope<'a> {
    pub(crate) fn new(
        flow: FlowId,
        state: &'a mut FlowState,
        spawner: &'a mut SpawnerSlot,
        sender: &'a Sender<FlowMessage>,
    ) -> Self {
        Self {
            flow,
            state,
            spawner,
            sender,
            chain: Vec::new(),
            steps: Vec::new(),
            visits: HashMap::new(),
        }
    }

    pub(crate) fn finish(self) -> Vec<FlowStep> {
        self.steps
    }

    pub fn flow(&self) -> FlowId {
        self.flow
    }

    /// Pushes `key` as the next step and returns its result once it has one.
    #[track_caller]
    pub fn open<K>(&mut self, key: K) -> Result<K::Result, FlowInterrupt>
    where
        K: SupportsPush + WithResult,
    {
        let key = AnyKey::new(key);
        self.resolve::<K::Result>(Location::caller(), key, Direction::Push, Vec::new(), false)
    }

    /// Presents `key` as the next step and returns its result once it has one.
    #[track_caller]
    pub fn present<K>(&mut self, key: K) -> Result<K::Result, FlowInterrupt>
    where
        K: SupportsPresent + WithResult,
    {
        let key = AnyKey::new(key);
        self.resolve::<K::Result>(Location::caller(), key, Direction::Present, Vec::new(), false)
    }

    /// Starts a step with explicit dependencies or options.
    ///
    /// ```rust,ignore
    /// let address = scope.step(Address).depends_on(&cart.id).transient().open()?;
    /// ```
    #[track_caller]
    pub fn step<K: WithResult>(&mut self, key: K) -> FlowStepBuilder<'_, 'a, K> {
        FlowStepBuilder {
            scope: self,
            key,
            location: Location::caller(),
            dependencies: Vec::new(),
            transient: false,
        }
    }

    /// Evaluates `body` with `dependency` added to the dependencies of every
    /// step inside it.
    pub fn scoped<D, R>(&mut self, dependency: &D, body: impl FnOnce(&mut Self) -> R) -> R
    where
        D: Hash + ?Sized,
    {
        self.chain.push(Hash32::of(dependency));
        let result = body(self);
        self.chain.pop();
        result
    }

    /// Runs a future as a step. The future is started once per distinct
    /// `dependencies`; when they change, the one in flight is aborted.
    #[track_caller]
    pub fn run_async<D, F, Fut, T>(
        &mut self,
        dependencies: &D,
        factory: F,
    ) -> Result<T, FlowInterrupt>
    where
        D: Hash + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let id = self.step_id(Location::caller(), "async");
        let depends_on = self.fingerprint([Hash32::of(dependencies)]);

        if let Some(error) = self.state.failures.remove(&id) {
            return Err(FlowInterrupt::fail(error));
        }
        if let Some(value) = self.state.cached::<T>(&id, depends_on) {
            return Ok(value);
        }
        if self
            .state
            .tasks
            .get(&id)
            .is_some_and(|task| task.depends_on == depends_on)
        {
            return Err(FlowInterrupt::pending());
        }
        if let Some(stale) = self.state.tasks.remove(&id) {
            tracing::debug!("aborting async step {}", id);
            stale.handle.abort();
        }

        let spawner = self.spawner.get().map_err(FlowInterrupt::fatal)?;
        self.state.generation += 1;

        let generation = self.state.generation;
        let sender = self.sender.clone();
        let flow = self.flow;
        let step = id.clone();
        let future = factory();

        let handle = spawner.spawn(Box::pin(async move {
            let result = future.await.map(|value| Arc::new(value) as Dynamic);
            let _ = sender.send(FlowMessage::Async {
                flow,
                step,
                generation,
                result,
            });
        }));

        self.state.tasks.insert(
            id,
            AsyncTask {
                depends_on,
                generation,
                handle,
            },
        );

        Err(FlowInterrupt::pending())
    }

    fn resolve<R>(
        &mut self,
        location: &'static Location<'static>,
        key: AnyKey,
        direction: Direction,
        dependencies: Vec<Hash32>,
        transient: bool,
    ) -> Result<R, FlowInterrupt>
    where
        R: Clone + Send + Sync + 'static,
    {
        let id = self.step_id(location, key.name());
        let depends_on = self.fingerprint(dependencies);

        self.steps.push(FlowStep {
            id: id.clone(),
            key,
            direction,
            depends_on,
            transient,
            result_type: (TypeId::of::<R>(), type_name::<R>()),
        });

        self.state
            .cached::<R>(&id, depends_on)
            .ok_or_else(FlowInterrupt::pending)
    }

    fn step_id(&mut self, location: &Location<'_>, name: &str) -> FlowStepId {
        let base = format!(
            "{}:{}:{}/{}",
            location.file(),
            location.line(),
            location.column(),
            name
        );

        let visits = self.visits.entry(base.clone()).or_insert(0);
        let id = match *visits {
            0 => base,
            n => format!("{base}#{n}"),
        };
        *visits += 1;

        FlowStepId::new(id)
    }

    fn fingerprint(&self, extra: impl IntoIterator<Item = Hash32>) -> Hash32 {
        let mut hasher = Blake3Hasher::default();
        for hash in self.chain.iter().copied().chain(extra) {
            hash.hash(&mut hasher);
        }
        hasher.into()
    }
}

pub struct FlowStepBuilder<'s, 'a, K> {
    scope: &'s mut FlowScope<'a>,
    key: K,
    location: &'static Location<'static>,
    dependencies: Vec<Hash32>,
    transient: bool,
}

impl<K: WithResult> FlowStepBuilder<'_, '_, K> {
    pub fn depends_on<D: Hash + ?Sized>(mut self, dependency: &D) -> Self {
        self.dependencies.push(Hash32::of(dependency));
        self
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn open(self) -> Result<K::Result, FlowInterrupt>
    where
        K: SupportsPush,
    {
        self.scope.resolve::<K::Result>(
            self.location,
            AnyKey::new(self.key),
            Direction::Push,
            self.dependencies,
            self.transient,
        )
    }

    pub fn present(self) -> Result<K::Result, FlowInterrupt>
    where
        K: SupportsPresent,
    {
        self.scope.resolve::<K::Result>(
            self.location,
            AnyKey::new(self.key),
            Direction::Present,
            self.dependencies,
            self.transient,
        )
    }
}
