use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::binding::BindingRegistry;
use crate::core::Mode;
use crate::engine::NavigationContainer;
use crate::error::NavigationError;
use crate::flow::Spawner;
use crate::instance::Instance;
use crate::key::NavigationKey;
use crate::navigation::Navigation;
use crate::plugin::{NavigationPlugin, Plugins};

/// The blueprint of a navigation.
///
/// `Blueprint` collects everything a [`Navigation`] needs to know up front:
/// the key types it may open, the root containers, plugins and how it
/// reacts to configuration errors. Once configured, convert it into a
/// [`Navigation`] with [`Blueprint::finish`].
///
/// # Example
///
/// ```rust,ignore
/// use waymark::{Navigation, NavigationContainer};
///
/// let mut blueprint = Navigation::design();
/// blueprint
///     .bind::<Home>()
///     .bind_opaque::<Settings>()
///     .container(NavigationContainer::new("main"));
///
/// let navigation = blueprint.finish()?;
/// ```
pub struct Blueprint {
    mode: Mode,
    bindings: BindingRegistry,
    plugins: Plugins,
    containers: Vec<NavigationContainer>,
    spawner: Option<Arc<dyn Spawner>>,
}

impl Blueprint {
    pub fn new() -> Self {
        Self {
            mode: Mode::default(),
            bindings: BindingRegistry::default(),
            plugins: Plugins::default(),
            containers: Vec::new(),
            spawner: None,
        }
    }

    pub fn finish(self) -> Result<Navigation, NavigationError> {
        let mut navigation = Navigation::new(self.mode, self.bindings, self.plugins, self.spawner);
        let root = navigation.root();

        for container in self.containers {
            navigation.add_container(root, container)?;
        }

        Ok(navigation)
    }

    pub fn mode(&mut self, mode: Mode) -> &mut Self {
        self.mode = mode;
        self
    }

    /// Shorthand for `mode(Mode::Lenient)`.
    pub fn lenient(&mut self) -> &mut Self {
        self.mode(Mode::Lenient)
    }

    /// Binds a key type which can be saved and restored.
    pub fn bind<K>(&mut self) -> &mut Self
    where
        K: NavigationKey + Serialize + DeserializeOwned,
    {
        self.bindings.bind::<K>();
        self
    }

    /// Binds a key type which can be opened but is left out of saved state.
    pub fn bind_opaque<K: NavigationKey>(&mut self) -> &mut Self {
        self.bindings.bind_opaque::<K>();
        self
    }

    /// Binds a key type together with the function which renders it, see
    /// [`Navigation::render`].
    pub fn bind_with_renderer<K, F, R>(&mut self, render: F) -> &mut Self
    where
        K: NavigationKey + Serialize + DeserializeOwned,
        F: Fn(&Instance, &K) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        self.bindings.bind::<K>();
        self.bindings.set_renderer::<K, F, R>(render);
        self
    }

    pub fn plugin<P: NavigationPlugin + 'static>(&mut self, plugin: P) -> &mut Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    /// Registers a plugin the caller keeps a handle to.
    pub fn plugin_arc<P: NavigationPlugin + 'static>(&mut self, plugin: Arc<P>) -> &mut Self {
        self.plugins.push(plugin);
        self
    }

    /// Adds a container under the root. The first one is the default
    /// container.
    pub fn container(&mut self, container: NavigationContainer) -> &mut Self {
        self.containers.push(container);
        self
    }

    /// Replaces the spawner used by async flow steps.
    pub fn spawner<S: Spawner + 'static>(&mut self, spawner: S) -> &mut Self {
        self.spawner = Some(Arc::new(spawner));
        self
    }
}

impl Default for Blueprint {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Blueprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph TD")?;
        writeln!(f, "    root((root))")?;

        for (index, container) in self.containers.iter().enumerate() {
            let name = container.key().as_str().replace('"', "\\\"");
            writeln!(f, "    c{index}[\"{name}\"]")?;
            writeln!(f, "    root --> c{index}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::backstack::tests::Screen;
    use crate::engine::ContainerKey;
    use crate::flow::{BoxFuture, FlowId, FlowScope, FlowStatus, TaskHandle};

    #[test]
    fn test_first_container_is_default() {
        let mut blueprint = Blueprint::new();
        blueprint
            .lenient()
            .bind_opaque::<Screen>()
            .container(NavigationContainer::new("main"))
            .container(NavigationContainer::new("side"))
            .container(NavigationContainer::new("main"));

        // The duplicate is dropped with a warning.
        let navigation = blueprint.finish().unwrap();
        let keys: Vec<_> = navigation.containers().map(|c| c.key().clone()).collect();
        assert_eq!(keys, vec![ContainerKey::from("main"), ContainerKey::from("side")]);
    }

    #[test]
    fn test_strict_rejects_duplicates() {
        let mut blueprint = Blueprint::new();
        blueprint
            .container(NavigationContainer::new("main"))
            .container(NavigationContainer::new("main"));

        assert!(matches!(
            blueprint.finish(),
            Err(NavigationError::DuplicateContainer(_))
        ));
    }

    #[test]
    fn test_mermaid() {
        let mut blueprint = Blueprint::new();
        blueprint.container(NavigationContainer::new("main"));

        assert_eq!(
            blueprint.to_string(),
            "graph TD\n    root((root))\n    c0[\"main\"]\n    root --> c0\n"
        );
    }

    struct Counting(Arc<AtomicUsize>);

    impl Spawner for Counting {
        fn spawn(&self, _future: BoxFuture) -> TaskHandle {
            self.0.fetch_add(1, Ordering::SeqCst);
            TaskHandle::new(|| {})
        }
    }

    #[test]
    fn test_custom_spawner() {
        let spawned = Arc::new(AtomicUsize::new(0));
        let mut blueprint = Blueprint::new();
        blueprint
            .spawner(Counting(spawned.clone()))
            .container(NavigationContainer::new("main"));
        let mut navigation = blueprint.finish().unwrap();

        navigation
            .register_flow(
                "main",
                |scope: &mut FlowScope<'_>| {
                    scope.run_async(&(), || async { Ok::<_, anyhow::Error>(1u8) })
                },
                |_: anyhow::Result<u8>| {},
            )
            .unwrap();

        assert_eq!(spawned.load(Ordering::SeqCst), 1);
        assert_eq!(navigation.flow_status(FlowId(0)), Some(FlowStatus::Running));
    }
}
