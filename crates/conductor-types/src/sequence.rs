//! Sequence definitions: the declarative description of an interaction
//!
//! A sequence is an ordered list of movements, each an ordered list of beats.
//! Array position is authoritative for execution order; the `beat` number is
//! advisory metadata for logs and tests.

use crate::{CatalogError, SequenceId};
use serde::{Deserialize, Serialize};

// ── Beat ─────────────────────────────────────────────────────────────

/// Classification of a beat's access to external resources
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BeatKind {
    /// Payload transform only; never sees a live IO capability
    #[default]
    Pure,
    /// May reach external resources (storage, DOM, network) through `io`
    #[serde(alias = "stageCrew", alias = "stage_crew")]
    StageCrew,
}

impl BeatKind {
    pub fn may_access_io(&self) -> bool {
        matches!(self, BeatKind::StageCrew)
    }
}

impl std::fmt::Display for BeatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BeatKind::Pure => write!(f, "pure"),
            BeatKind::StageCrew => write!(f, "stage-crew"),
        }
    }
}

/// One step of a sequence: an event bound to a named handler
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Beat {
    /// Human-facing beat number; never used for ordering
    #[serde(default)]
    pub beat: u32,
    /// Event name announced by this beat
    pub event: String,
    /// Handler name, resolved against the plugin's handler map at mount time
    pub handler: String,
    /// Omitted kinds default to `pure`
    #[serde(default)]
    pub kind: BeatKind,
}

impl Beat {
    pub fn new(
        beat: u32,
        event: impl Into<String>,
        handler: impl Into<String>,
        kind: BeatKind,
    ) -> Self {
        Self {
            beat,
            event: event.into(),
            handler: handler.into(),
            kind,
        }
    }

    pub fn pure(beat: u32, event: impl Into<String>, handler: impl Into<String>) -> Self {
        Self::new(beat, event, handler, BeatKind::Pure)
    }

    pub fn stage_crew(beat: u32, event: impl Into<String>, handler: impl Into<String>) -> Self {
        Self::new(beat, event, handler, BeatKind::StageCrew)
    }
}

// ── Movement ─────────────────────────────────────────────────────────

/// An ordered grouping of beats
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub beats: Vec<Beat>,
}

impl Movement {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            beats: Vec::new(),
        }
    }

    pub fn with_beat(mut self, beat: Beat) -> Self {
        self.beats.push(beat);
        self
    }
}

// ── Sequence ─────────────────────────────────────────────────────────

/// Event names a sequence listens for and announces
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SequenceEvents {
    /// Bus topics that start this sequence when published
    #[serde(default)]
    pub triggers: Vec<String>,
    /// Topics the sequence's handlers are expected to publish
    #[serde(default)]
    pub emits: Vec<String>,
}

/// A named, ordered workflow of movements and beats
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub id: SequenceId,
    #[serde(default)]
    pub name: String,
    /// Display metadata only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub movements: Vec<Movement>,
    #[serde(default)]
    pub events: SequenceEvents,
}

impl Sequence {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: SequenceId::new(id),
            name: name.into(),
            version: None,
            movements: Vec::new(),
            events: SequenceEvents::default(),
        }
    }

    pub fn with_movement(mut self, movement: Movement) -> Self {
        self.movements.push(movement);
        self
    }

    pub fn with_trigger(mut self, topic: impl Into<String>) -> Self {
        self.events.triggers.push(topic.into());
        self
    }

    /// All beats in execution order (movement order, then beat order)
    pub fn beats(&self) -> impl Iterator<Item = &Beat> {
        self.movements.iter().flat_map(|m| m.beats.iter())
    }

    pub fn beat_count(&self) -> usize {
        self.movements.iter().map(|m| m.beats.len()).sum()
    }

    /// Kind of the first beat to run, if any
    pub fn first_kind(&self) -> Option<BeatKind> {
        self.beats().next().map(|b| b.kind)
    }
}

// ── Catalog ──────────────────────────────────────────────────────────

/// On-the-wire shapes accepted for a plugin's sequence catalog
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum SequenceCatalog {
    Wrapped { sequences: Vec<Sequence> },
    Many(Vec<Sequence>),
    One(Sequence),
}

impl SequenceCatalog {
    /// Decode a catalog document and flatten it to its sequences.
    pub fn parse(json: &str) -> Result<Vec<Sequence>, CatalogError> {
        let catalog: SequenceCatalog = serde_json::from_str(json)?;
        let sequences = catalog.into_sequences();

        for (index, sequence) in sequences.iter().enumerate() {
            if sequence.id.0.trim().is_empty() {
                return Err(CatalogError::EmptySequenceId { index });
            }
        }

        Ok(sequences)
    }

    pub fn into_sequences(self) -> Vec<Sequence> {
        match self {
            SequenceCatalog::Wrapped { sequences } | SequenceCatalog::Many(sequences) => sequences,
            SequenceCatalog::One(sequence) => vec![sequence],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_defaults_to_pure() {
        let beat: Beat =
            serde_json::from_str(r#"{"beat": 1, "event": "show", "handler": "select"}"#).unwrap();
        assert_eq!(beat.kind, BeatKind::Pure);
        assert!(!beat.kind.may_access_io());
    }

    #[test]
    fn test_stage_crew_spellings() {
        for spelling in ["stage-crew", "stageCrew", "stage_crew"] {
            let json = format!(
                r#"{{"beat": 2, "event": "e", "handler": "h", "kind": "{spelling}"}}"#
            );
            let beat: Beat = serde_json::from_str(&json).unwrap();
            assert_eq!(beat.kind, BeatKind::StageCrew);
        }
        assert_eq!(
            serde_json::to_string(&BeatKind::StageCrew).unwrap(),
            "\"stage-crew\""
        );
    }

    #[test]
    fn test_parse_single_sequence_without_movement_ids() {
        let json = r#"{
            "id": "sel",
            "movements": [{"beats": [
                {"beat": 1, "event": "show", "handler": "select", "kind": "pure"},
                {"beat": 2, "event": "hide", "handler": "finalize", "kind": "pure"}
            ]}]
        }"#;
        let sequences = SequenceCatalog::parse(json).unwrap();
        assert_eq!(sequences.len(), 1);
        assert_eq!(sequences[0].beat_count(), 2);
        assert_eq!(sequences[0].movements[0].id, "");
        assert_eq!(sequences[0].first_kind(), Some(BeatKind::Pure));
    }

    #[test]
    fn test_parse_array_and_wrapped_catalogs() {
        let array = r#"[{"id": "a", "movements": []}, {"id": "b", "movements": []}]"#;
        assert_eq!(SequenceCatalog::parse(array).unwrap().len(), 2);

        let wrapped = r#"{"sequences": [{"id": "c", "name": "C", "movements": []}]}"#;
        let sequences = SequenceCatalog::parse(wrapped).unwrap();
        assert_eq!(sequences[0].id, SequenceId::new("c"));
        assert_eq!(sequences[0].name, "C");
    }

    #[test]
    fn test_parse_rejects_empty_id_and_garbage() {
        let result = SequenceCatalog::parse(r#"[{"id": " ", "movements": []}]"#);
        assert!(matches!(result, Err(CatalogError::EmptySequenceId { index: 0 })));

        let result = SequenceCatalog::parse("{not json");
        assert!(matches!(result, Err(CatalogError::Malformed(_))));
    }

    #[test]
    fn test_beats_iterate_in_array_order_not_beat_number() {
        let seq = Sequence::new("s", "S")
            .with_movement(
                Movement::new("m1")
                    .with_beat(Beat::pure(9, "first", "h1"))
                    .with_beat(Beat::pure(1, "second", "h2")),
            )
            .with_movement(Movement::new("m2").with_beat(Beat::stage_crew(0, "third", "h3")));

        let events: Vec<&str> = seq.beats().map(|b| b.event.as_str()).collect();
        assert_eq!(events, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_events_block() {
        let json = r#"{"id": "drag", "movements": [],
            "events": {"triggers": ["canvas:drag:start"], "emits": ["canvas:drag:end"]}}"#;
        let seq = &SequenceCatalog::parse(json).unwrap()[0];
        assert_eq!(seq.events.triggers, vec!["canvas:drag:start"]);
        assert_eq!(seq.events.emits, vec!["canvas:drag:end"]);
    }
}
