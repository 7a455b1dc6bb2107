//! Manifest catalog types: interaction routes and topic definitions
//!
//! Catalogs are the raw inputs; the runtime merges ordered lists of them (plus
//! override maps) into resolved manifests.

use crate::{CatalogError, PluginId, SequenceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Target of an interaction or topic: one mounted sequence
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub plugin_id: PluginId,
    pub sequence_id: SequenceId,
}

impl Route {
    pub fn new(plugin_id: impl Into<String>, sequence_id: impl Into<String>) -> Self {
        Self {
            plugin_id: PluginId::new(plugin_id),
            sequence_id: SequenceId::new(sequence_id),
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.plugin_id, self.sequence_id)
    }
}

/// Rate-shaping applied to a topic before fan-out
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_window_ms: Option<u64>,
}

impl PerfPolicy {
    pub fn throttle(ms: u64) -> Self {
        Self {
            throttle_ms: Some(ms),
            ..Default::default()
        }
    }

    pub fn debounce(ms: u64) -> Self {
        Self {
            debounce_ms: Some(ms),
            ..Default::default()
        }
    }

    pub fn dedupe(ms: u64) -> Self {
        Self {
            dedupe_window_ms: Some(ms),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.throttle_ms.is_none() && self.debounce_ms.is_none() && self.dedupe_window_ms.is_none()
    }

    /// True when debounce and throttle are both configured; debounce wins.
    pub fn has_conflicting_rate_limits(&self) -> bool {
        self.debounce_ms.is_some() && self.throttle_ms.is_some()
    }
}

/// Who may publish or observe a topic
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicVisibility {
    #[default]
    Public,
    Internal,
}

/// Resolution of a topic: fan-out routes and an optional perf policy
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicDef {
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub visibility: TopicVisibility,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_keys: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perf: Option<PerfPolicy>,
}

impl TopicDef {
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            routes,
            ..Default::default()
        }
    }

    pub fn with_perf(mut self, perf: PerfPolicy) -> Self {
        self.perf = Some(perf);
        self
    }
}

/// Interaction manifest document: `{version, routes: {key: Route}}`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionCatalog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub routes: BTreeMap<String, Route>,
}

impl InteractionCatalog {
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_route(mut self, key: impl Into<String>, route: Route) -> Self {
        self.routes.insert(key.into(), route);
        self
    }
}

/// Topics manifest document: `{version, topics: {topic: TopicDef}}`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicsCatalog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub topics: BTreeMap<String, TopicDef>,
}

impl TopicsCatalog {
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_topic(mut self, topic: impl Into<String>, def: TopicDef) -> Self {
        self.topics.insert(topic.into(), def);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interaction_catalog_json() {
        let json = r#"{
            "version": "1.0.0",
            "routes": {
                "canvas.component.select": {"pluginId": "CanvasPlugin", "sequenceId": "select"}
            }
        }"#;
        let catalog = InteractionCatalog::from_json(json).unwrap();
        assert_eq!(catalog.version.as_deref(), Some("1.0.0"));
        assert_eq!(
            catalog.routes["canvas.component.select"],
            Route::new("CanvasPlugin", "select")
        );
    }

    #[test]
    fn test_topics_catalog_json() {
        let json = r#"{
            "version": "1.0.0",
            "topics": {
                "canvas.component.drag.move": {
                    "routes": [
                        {"pluginId": "CanvasPlugin", "sequenceId": "drag-move"},
                        {"pluginId": "ControlPanel", "sequenceId": "sync-position"}
                    ],
                    "visibility": "internal",
                    "correlationKeys": ["id"],
                    "perf": {"throttleMs": 16}
                },
                "app.ready": {}
            }
        }"#;
        let catalog = TopicsCatalog::from_json(json).unwrap();
        let drag = &catalog.topics["canvas.component.drag.move"];
        assert_eq!(drag.routes.len(), 2);
        assert_eq!(drag.visibility, TopicVisibility::Internal);
        assert_eq!(drag.perf, Some(PerfPolicy::throttle(16)));
        assert_eq!(drag.correlation_keys.as_deref(), Some(&["id".to_string()][..]));

        let ready = &catalog.topics["app.ready"];
        assert!(ready.routes.is_empty());
        assert_eq!(ready.visibility, TopicVisibility::Public);
        assert!(ready.perf.is_none());
    }

    #[test]
    fn test_perf_conflicts() {
        let perf = PerfPolicy {
            throttle_ms: Some(10),
            debounce_ms: Some(20),
            dedupe_window_ms: None,
        };
        assert!(perf.has_conflicting_rate_limits());
        assert!(!PerfPolicy::dedupe(5).has_conflicting_rate_limits());
        assert!(PerfPolicy::default().is_empty());
    }
}
