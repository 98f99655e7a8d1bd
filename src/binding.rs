//! Bindings tell the navigation which key types exist, how to persist them
//! and how to render them.

use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::Dynamic;
use crate::instance::Instance;
use crate::key::{AnyKey, NavigationKey};

type Encode = fn(&AnyKey) -> serde_json::Result<Value>;
type Decode = fn(Value) -> serde_json::Result<AnyKey>;
type Renderer = Arc<dyn Fn(&Instance) -> anyhow::Result<Dynamic> + Send + Sync>;

#[derive(Clone, Copy)]
pub(crate) struct Codec {
    pub encode: Encode,
    pub decode: Decode,
}

#[derive(Clone)]
pub(crate) struct Binding {
    pub name: &'static str,
    pub codec: Option<Codec>,
    pub renderer: Option<Renderer>,
}

fn encode<K: NavigationKey + Serialize>(key: &AnyKey) -> serde_json::Result<Value> {
    match key.downcast_ref::<K>() {
        Some(key) => serde_json::to_value(key),
        None => Err(serde::ser::Error::custom(format!(
            "key {} is not a {}",
            key.name(),
            type_name::<K>()
        ))),
    }
}

fn decode<K: NavigationKey + DeserializeOwned>(value: Value) -> serde_json::Result<AnyKey> {
    serde_json::from_value::<K>(value).map(AnyKey::new)
}

/// Every key type the navigation knows about.
#[derive(Clone, Default)]
pub(crate) struct BindingRegistry {
    by_type: HashMap<TypeId, Binding>,
    by_name: HashMap<&'static str, TypeId>,
}

impl BindingRegistry {
    /// A key which can be persisted.
    pub fn bind<K>(&mut self)
    where
        K: NavigationKey + Serialize + DeserializeOwned,
    {
        self.insert::<K>(Some(Codec {
            encode: encode::<K>,
            decode: decode::<K>,
        }));
    }

    /// A key which can be opened but not persisted.
    pub fn bind_opaque<K: NavigationKey>(&mut self) {
        self.insert::<K>(None);
    }

    pub fn set_renderer<K, F, R>(&mut self, render: F)
    where
        K: NavigationKey,
        F: Fn(&Instance, &K) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        if !self.by_type.contains_key(&TypeId::of::<K>()) {
            self.bind_opaque::<K>();
        }

        let renderer: Renderer = Arc::new(move |instance| {
            let key = instance
                .key_as::<K>()
                .ok_or_else(|| anyhow::anyhow!("{:?} is not a {}", instance, type_name::<K>()))?;
            Ok(Arc::new(render(instance, key)?) as Dynamic)
        });

        if let Some(binding) = self.by_type.get_mut(&TypeId::of::<K>()) {
            binding.renderer = Some(renderer);
        }
    }

    fn insert<K: NavigationKey>(&mut self, codec: Option<Codec>) {
        let name = type_name::<K>();
        let renderer = self
            .by_type
            .remove(&TypeId::of::<K>())
            .and_then(|binding| binding.renderer);

        self.by_type.insert(
            TypeId::of::<K>(),
            Binding {
                name,
                codec,
                renderer,
            },
        );
        self.by_name.insert(name, TypeId::of::<K>());
    }

    pub fn get(&self, key: &AnyKey) -> Option<&Binding> {
        self.by_type.get(&key.key_type())
    }

    pub fn by_name(&self, name: &str) -> Option<&Binding> {
        self.by_type.get(self.by_name.get(name)?)
    }

    pub fn is_bound(&self, key: &AnyKey) -> bool {
        self.by_type.contains_key(&key.key_type())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::key::SupportsPush;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Article {
        slug: String,
    }
    impl NavigationKey for Article {}
    impl SupportsPush for Article {}

    #[derive(Debug)]
    struct Opaque;
    impl NavigationKey for Opaque {}
    impl SupportsPush for Opaque {}

    #[test]
    fn test_codec() {
        let mut registry = BindingRegistry::default();
        registry.bind::<Article>();

        let key = AnyKey::new(Article { slug: "rust".into() });
        let binding = registry.get(&key).unwrap();
        let codec = binding.codec.unwrap();

        let value = (codec.encode)(&key).unwrap();
        let back = (registry.by_name(binding.name).unwrap().codec.unwrap().decode)(value).unwrap();

        assert_eq!(back.downcast_ref::<Article>(), Some(&Article { slug: "rust".into() }));
    }

    #[test]
    fn test_opaque() {
        let mut registry = BindingRegistry::default();
        registry.bind_opaque::<Opaque>();

        let key = AnyKey::new(Opaque);
        assert!(registry.is_bound(&key));
        assert!(registry.get(&key).unwrap().codec.is_none());
        assert!(!registry.is_bound(&AnyKey::new(Article { slug: String::new() })));
    }

    #[test]
    fn test_renderer_survives_rebinding() {
        let mut registry = BindingRegistry::default();
        registry.set_renderer::<Article, _, _>(|_, article| Ok(article.slug.to_uppercase()));
        registry.bind::<Article>();

        let instance = Instance::push(Article { slug: "rust".into() });
        let binding = registry.get(instance.key()).unwrap();
        let rendered = (binding.renderer.as_ref().unwrap())(&instance).unwrap();

        assert!(binding.codec.is_some());
        assert_eq!(rendered.downcast_ref::<String>().map(String::as_str), Some("RUST"));
    }
}
