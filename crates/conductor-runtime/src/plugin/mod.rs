//! Plugin registration and sequence catalog loading
//!
//! A [`PluginModule`] bundles a plugin's handlers with the source of its
//! sequence catalogs. Registering it against a [`Conductor`] mounts every
//! catalogued sequence exactly once per conductor, however many times (or
//! concurrently) `register` is called.

use crate::engine::{Conductor, HandlerMap};
use crate::error::ConductorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_types::{CatalogError, PluginId, SequenceCatalog, SequenceId};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Where a plugin's raw sequence catalog documents come from
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Raw JSON documents for `plugin_id`. An unknown plugin yields no
    /// documents rather than an error.
    async fn load(&self, plugin_id: &PluginId) -> Result<Vec<String>, CatalogError>;
}

/// Catalog documents held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticCatalogSource {
    documents: HashMap<PluginId, Vec<String>>,
}

impl StaticCatalogSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(
        mut self,
        plugin_id: impl Into<PluginId>,
        json: impl Into<String>,
    ) -> Self {
        self.documents.entry(plugin_id.into()).or_default().push(json.into());
        self
    }
}

#[async_trait]
impl CatalogSource for StaticCatalogSource {
    async fn load(&self, plugin_id: &PluginId) -> Result<Vec<String>, CatalogError> {
        Ok(self.documents.get(plugin_id).cloned().unwrap_or_default())
    }
}

/// Record of a completed plugin registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRegistration {
    pub plugin_id: PluginId,
    pub sequences: BTreeSet<SequenceId>,
    pub registered_at: DateTime<Utc>,
}

/// Result of [`PluginModule::register`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// This call performed the mounts
    Registered(PluginRegistration),
    /// Another call already did; nothing was mounted again
    AlreadyRegistered(PluginRegistration),
}

impl RegistrationOutcome {
    pub fn registration(&self) -> &PluginRegistration {
        match self {
            RegistrationOutcome::Registered(r) | RegistrationOutcome::AlreadyRegistered(r) => r,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, RegistrationOutcome::Registered(_))
    }
}

/// A plugin's handlers plus where its sequences are described
pub struct PluginModule {
    id: PluginId,
    handlers: HandlerMap,
    source: Arc<dyn CatalogSource>,
}

impl PluginModule {
    pub fn new(
        id: impl Into<PluginId>,
        handlers: HandlerMap,
        source: Arc<dyn CatalogSource>,
    ) -> Self {
        Self {
            id: id.into(),
            handlers,
            source,
        }
    }

    pub fn id(&self) -> &PluginId {
        &self.id
    }

    pub fn handlers(&self) -> &HandlerMap {
        &self.handlers
    }

    /// Mount this plugin's sequences on `conductor`.
    ///
    /// Idempotent per conductor: concurrent callers wait for the first one
    /// and observe its result. A failed registration leaves no marker, so
    /// the next call tries again.
    pub async fn register(
        &self,
        conductor: &Conductor,
    ) -> Result<RegistrationOutcome, ConductorError> {
        let slot = conductor.registration_slot(&self.id);
        let flag = AtomicBool::new(false);
        let performed = &flag;

        let registration = slot
            .get_or_try_init(|| async move {
                performed.store(true, Ordering::SeqCst);
                self.mount_catalogs(conductor).await
            })
            .await?
            .clone();

        if flag.load(Ordering::SeqCst) {
            Ok(RegistrationOutcome::Registered(registration))
        } else {
            info!(plugin_id = %self.id, "Plugin already registered; skipping");
            Ok(RegistrationOutcome::AlreadyRegistered(registration))
        }
    }

    async fn mount_catalogs(
        &self,
        conductor: &Conductor,
    ) -> Result<PluginRegistration, ConductorError> {
        let documents = self.source.load(&self.id).await?;
        let mut sequences = BTreeSet::new();

        for (index, document) in documents.iter().enumerate() {
            let parsed = match SequenceCatalog::parse(document) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(
                        plugin_id = %self.id,
                        document = index,
                        error = %e,
                        "Skipping unparseable sequence catalog"
                    );
                    continue;
                }
            };

            for sequence in parsed {
                let id = sequence.id.clone();
                conductor.mount(sequence, &self.handlers, self.id.clone())?;
                sequences.insert(id);
            }
        }

        info!(plugin_id = %self.id, sequences = sequences.len(), "Plugin registered");
        Ok(PluginRegistration {
            plugin_id: self.id.clone(),
            sequences,
            registered_at: Utc::now(),
        })
    }
}

impl std::fmt::Debug for PluginModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginModule")
            .field("id", &self.id)
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

/// A catalog (or one sequence of it) that bulk loading passed over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedCatalog {
    pub plugin_id: PluginId,
    pub reason: String,
}

/// Summary of [`load_json_sequence_catalogs`]
#[derive(Debug, Clone, Default)]
pub struct CatalogLoadReport {
    pub mounted: Vec<(PluginId, SequenceId)>,
    pub skipped: Vec<SkippedCatalog>,
}

impl CatalogLoadReport {
    fn skip(&mut self, plugin_id: &PluginId, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(plugin_id = %plugin_id, reason = %reason, "Sequence catalog skipped");
        self.skipped.push(SkippedCatalog {
            plugin_id: plugin_id.clone(),
            reason,
        });
    }
}

/// Load and mount the sequence catalogs of every plugin in `plugin_ids`.
///
/// Each plugin mounts with its entry in `handlers`. Failures never abort the
/// whole load: an unavailable source, an unparseable document, or a sequence
/// whose handlers are missing is skipped with a warning and recorded in the
/// report.
pub async fn load_json_sequence_catalogs(
    conductor: &Conductor,
    plugin_ids: &[PluginId],
    source: &dyn CatalogSource,
    handlers: &HashMap<PluginId, HandlerMap>,
) -> CatalogLoadReport {
    let mut report = CatalogLoadReport::default();
    let empty = HandlerMap::new();

    for plugin_id in plugin_ids {
        let documents = match source.load(plugin_id).await {
            Ok(documents) => documents,
            Err(e) => {
                report.skip(plugin_id, e.to_string());
                continue;
            }
        };
        let plugin_handlers = handlers.get(plugin_id).unwrap_or(&empty);

        for document in &documents {
            let sequences = match SequenceCatalog::parse(document) {
                Ok(sequences) => sequences,
                Err(e) => {
                    report.skip(plugin_id, e.to_string());
                    continue;
                }
            };

            for sequence in sequences {
                let id = sequence.id.clone();
                match conductor.mount(sequence, plugin_handlers, plugin_id.clone()) {
                    Ok(()) => report.mounted.push((plugin_id.clone(), id)),
                    Err(e) => report.skip(plugin_id, e.to_string()),
                }
            }
        }
    }

    info!(
        mounted = report.mounted.len(),
        skipped = report.skipped.len(),
        "Sequence catalogs loaded"
    );
    report
}
