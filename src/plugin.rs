use std::sync::Arc;

use crate::instance::Instance;

/// Observer of destination lifecycles.
///
/// Plugins are told when a destination gets a context, when it loses it, and
/// when the active destination of the whole navigation changes.
pub trait NavigationPlugin: Send + Sync {
    fn on_opened(&self, _instance: &Instance) {}

    fn on_closed(&self, _instance: &Instance) {}

    fn on_active(&self, _instance: Option<&Instance>) {}
}

#[derive(Clone, Default)]
pub(crate) struct Plugins(Vec<Arc<dyn NavigationPlugin>>);

impl Plugins {
    pub fn push(&mut self, plugin: Arc<dyn NavigationPlugin>) {
        self.0.push(plugin);
    }

    pub fn opened(&self, instance: &Instance) {
        for plugin in &self.0 {
            plugin.on_opened(instance);
        }
    }

    pub fn closed(&self, instance: &Instance) {
        for plugin in &self.0 {
            plugin.on_closed(instance);
        }
    }

    pub fn active(&self, instance: Option<&Instance>) {
        for plugin in &self.0 {
            plugin.on_active(instance);
        }
    }
}
