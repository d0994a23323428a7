//! Node context store
//!
//! Every node keeps two named contexts in a [`ContextManager`]:
//! - `ROOT`, durable for the node's lifetime, which also holds the
//!   [`NodeData`] itself under `__NodeData__`
//! - `__TEMP__`, a child of ROOT whose entries expire after a TTL
//!
//! Lookups in a child context fall back to its parent. The self reference
//! in ROOT is weak, so dropping the last `Arc<NodeData>` frees the store.

use dashmap::DashMap;
use grid_config::NodeDataSettings;
use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const ROOT: &str = "ROOT";
pub const TEMP: &str = "__TEMP__";
pub const NODE_DATA_KEY: &str = "__NodeData__";

type SharedValue = Arc<dyn Any + Send + Sync>;

enum Slot {
    Strong(SharedValue),
    Weak(Weak<dyn Any + Send + Sync>),
}

struct ContextEntry {
    slot: Slot,
    inserted_at: Instant,
}

/// Named, typed key/value scope
pub struct Context {
    name: String,
    parent: Option<Arc<Context>>,
    entries: DashMap<String, ContextEntry>,
    ttl: Option<Duration>,
}

impl Context {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            entries: DashMap::new(),
            ttl: None,
        }
    }

    /// Context whose lookups fall back to `parent`
    pub fn child(name: impl Into<String>, parent: Arc<Context>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::new(name)
        }
    }

    /// Entries older than `ttl` are removed by [`evict_expired`](Self::evict_expired)
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<Context>> {
        self.parent.as_ref()
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.set_shared(key, Arc::new(value));
    }

    pub fn set_shared<T: Any + Send + Sync>(&self, key: impl Into<String>, value: Arc<T>) {
        let value: SharedValue = value;
        self.insert(key.into(), Slot::Strong(value));
    }

    /// Store a reference that does not keep its target alive
    pub fn set_weak(&self, key: impl Into<String>, value: Weak<dyn Any + Send + Sync>) {
        self.insert(key.into(), Slot::Weak(value));
    }

    fn insert(&self, key: String, slot: Slot) {
        self.entries.insert(
            key,
            ContextEntry {
                slot,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Look `key` up here, then in the parent chain
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.get_local(key)
            .or_else(|| self.parent.as_ref().and_then(|parent| parent.get(key)))
    }

    /// Look `key` up in this context only
    pub fn get_local<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = {
            let entry = self.entries.get(key)?;
            match &entry.slot {
                Slot::Strong(value) => value.clone(),
                Slot::Weak(value) => value.upgrade()?,
            }
        };
        value.downcast::<T>().ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    /// Remove entries that outlived the TTL at `now`, and dead weak entries
    pub fn evict_expired_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;

        self.entries.retain(|_, entry| {
            let alive = match &entry.slot {
                Slot::Strong(_) => true,
                Slot::Weak(value) => value.strong_count() > 0,
            };
            let fresh = ttl.map_or(true, |ttl| now.saturating_duration_since(entry.inserted_at) < ttl);
            alive && fresh
        });

        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!(context = %self.name, evicted, "Evicted expired entries");
        }
        evicted
    }
}

/// Contexts by name
#[derive(Default)]
pub struct ContextManager {
    contexts: DashMap<String, Arc<Context>>,
}

impl ContextManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, context: Arc<Context>) {
        self.contexts.insert(context.name().to_string(), context);
    }

    pub fn get(&self, name: &str) -> Option<Arc<Context>> {
        self.contexts.get(name).map(|c| c.value().clone())
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Context>> {
        self.contexts.remove(name).map(|(_, c)| c)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.contexts.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn clear(&self) {
        self.contexts.clear();
    }
}

/// Per-node context store
pub struct NodeData {
    contexts: ContextManager,
    root: Arc<Context>,
    temp: Arc<Context>,
}

impl NodeData {
    pub fn new(settings: &NodeDataSettings) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<NodeData>| {
            let root = Arc::new(Context::new(ROOT));
            let self_ref: Weak<dyn Any + Send + Sync> = this.clone();
            root.set_weak(NODE_DATA_KEY, self_ref);

            let temp = Arc::new(Context::child(TEMP, root.clone()).with_ttl(settings.temp_ttl()));

            let contexts = ContextManager::new();
            contexts.register(root.clone());
            contexts.register(temp.clone());

            info!(temp_ttl_secs = settings.temp_ttl_secs, "Node context store ready");
            NodeData {
                contexts,
                root,
                temp,
            }
        })
    }

    /// Find the store a ROOT context belongs to
    pub fn from_root(root: &Context) -> Option<Arc<NodeData>> {
        root.get_local::<NodeData>(NODE_DATA_KEY)
    }

    pub fn root(&self) -> &Arc<Context> {
        &self.root
    }

    pub fn temp(&self) -> &Arc<Context> {
        &self.temp
    }

    pub fn context(&self, name: &str) -> Option<Arc<Context>> {
        self.contexts.get(name)
    }

    pub fn contexts(&self) -> &ContextManager {
        &self.contexts
    }

    pub fn evict_temp(&self) -> usize {
        self.temp.evict_expired()
    }

    /// Drop every entry and context
    pub fn shutdown(&self) {
        self.temp.clear();
        self.root.clear();
        self.contexts.clear();
        info!("Node context store shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(ttl_secs: u64) -> NodeDataSettings {
        NodeDataSettings {
            temp_ttl_secs: ttl_secs,
        }
    }

    #[test]
    fn test_root_holds_node_data() {
        let data = NodeData::new(&settings(60));

        let found = NodeData::from_root(data.root()).unwrap();
        assert!(Arc::ptr_eq(&found, &data));
        assert_eq!(data.contexts().names(), vec![ROOT.to_string(), TEMP.to_string()]);
        assert!(Arc::ptr_eq(&data.context(TEMP).unwrap(), data.temp()));
    }

    #[test]
    fn test_self_reference_does_not_leak() {
        let data = NodeData::new(&settings(60));
        let weak = Arc::downgrade(&data);
        let root = data.root().clone();

        drop(data);
        assert!(weak.upgrade().is_none());
        assert!(NodeData::from_root(&root).is_none());
    }

    #[test]
    fn test_temp_falls_back_to_root() {
        let data = NodeData::new(&settings(60));
        data.root().set("shared", 5u32);
        data.temp().set("scratch", "tmp".to_string());

        assert_eq!(*data.temp().get::<u32>("shared").unwrap(), 5);
        assert!(data.temp().get_local::<u32>("shared").is_none());
        assert!(data.root().get::<String>("scratch").is_none());

        // Wrong type is a miss
        assert!(data.temp().get::<String>("shared").is_none());
    }

    #[test]
    fn test_temp_entries_expire() {
        let data = NodeData::new(&settings(30));
        data.temp().set("a", 1u8);
        data.temp().set("b", 2u8);
        data.root().set("durable", 3u8);

        assert_eq!(data.temp().evict_expired_at(Instant::now()), 0);

        let later = Instant::now() + Duration::from_secs(31);
        assert_eq!(data.temp().evict_expired_at(later), 2);
        assert!(data.temp().is_empty());

        // ROOT has no TTL
        assert_eq!(data.root().evict_expired_at(later), 0);
        assert!(data.root().contains("durable"));
    }

    #[test]
    fn test_shutdown_clears_everything() {
        let data = NodeData::new(&settings(60));
        data.temp().set("k", 1u8);
        data.shutdown();

        assert!(data.temp().is_empty());
        assert!(data.root().is_empty());
        assert!(data.context(ROOT).is_none());
    }

    #[test]
    fn test_context_keys_and_remove() {
        let ctx = Context::new("scratch");
        ctx.set_shared("b", Arc::new(2i64));
        ctx.set("a", 1i64);

        assert_eq!(ctx.keys(), vec!["a".to_string(), "b".to_string()]);
        assert!(ctx.remove("a"));
        assert!(!ctx.remove("a"));
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.ttl(), None);
    }
}
