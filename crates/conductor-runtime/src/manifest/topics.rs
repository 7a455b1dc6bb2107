//! Topics manifest: topic → fan-out routes plus an optional perf policy

use conductor_types::{TopicDef, TopicsCatalog};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Resolved topic definitions
#[derive(Clone, Debug, Default)]
pub struct TopicsManifest {
    version: Option<String>,
    topics: HashMap<String, TopicDef>,
}

impl TopicsManifest {
    /// Merge `catalogs` in order, then `overrides` in order. An override
    /// replaces the whole definition of its topic.
    pub fn build(catalogs: &[TopicsCatalog], overrides: &[BTreeMap<String, TopicDef>]) -> Self {
        let mut version = None;
        let mut topics = HashMap::new();

        for catalog in catalogs {
            if catalog.version.is_some() {
                version = catalog.version.clone();
            }
            for (topic, def) in &catalog.topics {
                topics.insert(topic.clone(), def.clone());
            }
        }

        for layer in overrides {
            for (topic, def) in layer {
                topics.insert(topic.clone(), def.clone());
            }
        }

        for (topic, def) in &topics {
            if def.perf.as_ref().is_some_and(|p| p.has_conflicting_rate_limits()) {
                warn!(
                    topic = %topic,
                    "Topic sets both debounceMs and throttleMs; throttle is ignored"
                );
            }
        }

        tracing::info!(topics = topics.len(), "Topics manifest built");
        Self { version, topics }
    }

    /// Definition for `topic`, or `None` when no plugin declares it.
    pub fn get(&self, topic: &str) -> Option<&TopicDef> {
        self.topics.get(topic)
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.keys().map(String::as_str)
    }
}
