//! Interaction manifest: interaction key → exactly one route

use crate::error::ConductorError;
use conductor_types::{InteractionCatalog, Route};
use std::collections::{BTreeMap, HashMap};

/// Resolved interaction routes
#[derive(Clone, Debug, Default)]
pub struct InteractionManifest {
    version: Option<String>,
    routes: HashMap<String, Route>,
}

impl InteractionManifest {
    /// Merge `catalogs` in order, then `overrides` in order.
    pub fn build(catalogs: &[InteractionCatalog], overrides: &[BTreeMap<String, Route>]) -> Self {
        let mut version = None;
        let mut routes = HashMap::new();

        for catalog in catalogs {
            if catalog.version.is_some() {
                version = catalog.version.clone();
            }
            for (key, route) in &catalog.routes {
                routes.insert(key.clone(), route.clone());
            }
        }

        for layer in overrides {
            for (key, route) in layer {
                routes.insert(key.clone(), route.clone());
            }
        }

        tracing::info!(routes = routes.len(), "Interaction manifest built");
        Self { version, routes }
    }

    /// Look up the route for `key`. Unknown keys are a caller error.
    pub fn resolve(&self, key: &str) -> Result<&Route, ConductorError> {
        self.routes
            .get(key)
            .ok_or_else(|| ConductorError::RouteNotFound(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.routes.contains_key(key)
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}
