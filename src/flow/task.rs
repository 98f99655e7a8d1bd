//! Execution of asynchronous flow steps.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::NavigationError;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Runs the futures of asynchronous flow steps somewhere off the
/// navigation thread.
pub trait Spawner: Send + Sync {
    fn spawn(&self, future: BoxFuture) -> TaskHandle;
}

/// Aborts a spawned future.
pub struct TaskHandle(Box<dyn Fn() + Send + Sync>);

impl TaskHandle {
    pub fn new<F>(abort: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self(Box::new(abort))
    }

    pub fn abort(&self) {
        (self.0)()
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TaskHandle(*)")
    }
}

/// A current-thread Tokio runtime driven by a background thread.
#[cfg(feature = "tokio")]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

#[cfg(feature = "tokio")]
impl TokioSpawner {
    pub fn new() -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        let (shutdown, signal) = tokio::sync::oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("waymark-flows".into())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = signal.await;
                });
            })?;

        Ok(Self {
            handle,
            shutdown: Some(shutdown),
            thread: Some(thread),
        })
    }
}

#[cfg(feature = "tokio")]
impl Spawner for TokioSpawner {
    fn spawn(&self, future: BoxFuture) -> TaskHandle {
        let task = self.handle.spawn(future);
        let abort = task.abort_handle();
        TaskHandle::new(move || abort.abort())
    }
}

#[cfg(feature = "tokio")]
impl Drop for TokioSpawner {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::error!("flow runtime thread panicked");
        }
    }
}

/// The spawner of a navigation, created on first use unless one was given.
#[derive(Default)]
pub(crate) struct SpawnerSlot(Option<Arc<dyn Spawner>>);

impl SpawnerSlot {
    pub fn new(spawner: Option<Arc<dyn Spawner>>) -> Self {
        Self(spawner)
    }

    pub fn get(&mut self) -> Result<Arc<dyn Spawner>, NavigationError> {
        if let Some(spawner) = &self.0 {
            return Ok(spawner.clone());
        }

        let spawner = default_spawner()?;
        self.0 = Some(spawner.clone());
        Ok(spawner)
    }
}

#[cfg(feature = "tokio")]
fn default_spawner() -> Result<Arc<dyn Spawner>, NavigationError> {
    tracing::debug!("starting the flow runtime");
    Ok(Arc::new(TokioSpawner::new()?))
}

#[cfg(not(feature = "tokio"))]
fn default_spawner() -> Result<Arc<dyn Spawner>, NavigationError> {
    Err(NavigationError::NoSpawner)
}
