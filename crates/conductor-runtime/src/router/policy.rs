//! Per-topic perf policy state

use conductor_types::{Payload, PerfPolicy};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

pub(crate) type Fingerprint = [u8; 32];

/// Content hash of a publish payload. Object keys serialize sorted, so equal
/// payloads hash equal regardless of construction order.
///
/// With `keys`, only those top-level fields of an object payload count.
pub(crate) fn fingerprint(payload: &Value, keys: Option<&[String]>) -> Fingerprint {
    let bytes = match (keys, payload) {
        (Some(keys), Value::Object(map)) if !keys.is_empty() => {
            let subset: Payload = keys
                .iter()
                .filter_map(|k| map.get(k).map(|v| (k.clone(), v.clone())))
                .collect();
            serde_json::to_vec(&subset)
        }
        _ => serde_json::to_vec(payload),
    }
    .unwrap_or_default();
    *blake3::hash(&bytes).as_bytes()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Dispatch,
    Deduplicated,
    Throttled,
    Debounce(Duration),
}

#[derive(Debug, Default)]
pub(crate) struct TopicState {
    seen: VecDeque<(Fingerprint, Instant)>,
    last_dispatch: Option<Instant>,
    pub(crate) debounce_generation: u64,
    pub(crate) pending: Option<Value>,
}

impl TopicState {
    /// Dedupe first, then debounce, then throttle. Debounce wins when a
    /// topic sets both debounce and throttle.
    pub(crate) fn evaluate(
        &mut self,
        policy: &PerfPolicy,
        fingerprint: Fingerprint,
        now: Instant,
        capacity: usize,
    ) -> Decision {
        if let Some(window_ms) = policy.dedupe_window_ms {
            let window = Duration::from_millis(window_ms);
            while let Some(&(_, at)) = self.seen.front() {
                if now.duration_since(at) >= window {
                    self.seen.pop_front();
                } else {
                    break;
                }
            }

            // Suppressed duplicates do not refresh the window.
            if self.seen.iter().any(|(seen, _)| *seen == fingerprint) {
                return Decision::Deduplicated;
            }

            self.seen.push_back((fingerprint, now));
            while self.seen.len() > capacity.max(1) {
                self.seen.pop_front();
            }
        }

        if let Some(debounce_ms) = policy.debounce_ms {
            return Decision::Debounce(Duration::from_millis(debounce_ms));
        }

        if let Some(throttle_ms) = policy.throttle_ms {
            if let Some(last) = self.last_dispatch {
                if now.duration_since(last) < Duration::from_millis(throttle_ms) {
                    return Decision::Throttled;
                }
            }
            self.last_dispatch = Some(now);
        }

        Decision::Dispatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": 2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y": 2, "x": 1}"#).unwrap();
        assert_eq!(fingerprint(&a, None), fingerprint(&b, None));
        assert_ne!(fingerprint(&a, None), fingerprint(&json!({"x": 2, "y": 2}), None));
    }

    #[test]
    fn test_fingerprint_restricted_to_correlation_keys() {
        let keys = vec!["id".to_string()];
        let first = json!({"id": "c1", "ts": 1});
        let second = json!({"id": "c1", "ts": 2});
        assert_eq!(fingerprint(&first, Some(&keys)), fingerprint(&second, Some(&keys)));
        assert_ne!(fingerprint(&first, None), fingerprint(&second, None));
        assert_ne!(
            fingerprint(&first, Some(&keys)),
            fingerprint(&json!({"id": "c2", "ts": 1}), Some(&keys))
        );
    }

    #[test]
    fn test_dedupe_window() {
        let mut state = TopicState::default();
        let policy = PerfPolicy::dedupe(100);
        let fp = fingerprint(&json!({"id": "e1"}), None);
        let other = fingerprint(&json!({"id": "e2"}), None);
        let t0 = Instant::now();

        assert_eq!(state.evaluate(&policy, fp, t0, 16), Decision::Dispatch);
        assert_eq!(state.evaluate(&policy, fp, t0 + ms(50), 16), Decision::Deduplicated);
        assert_eq!(state.evaluate(&policy, other, t0 + ms(60), 16), Decision::Dispatch);
        // Window measured from the first accepted publish.
        assert_eq!(state.evaluate(&policy, fp, t0 + ms(100), 16), Decision::Dispatch);
    }

    #[test]
    fn test_dedupe_capacity_evicts_oldest() {
        let mut state = TopicState::default();
        let policy = PerfPolicy::dedupe(10_000);
        let t0 = Instant::now();
        let first = fingerprint(&json!(1), None);

        assert_eq!(state.evaluate(&policy, first, t0, 2), Decision::Dispatch);
        state.evaluate(&policy, fingerprint(&json!(2), None), t0, 2);
        state.evaluate(&policy, fingerprint(&json!(3), None), t0, 2);
        assert_eq!(state.evaluate(&policy, first, t0, 2), Decision::Dispatch);
    }

    #[test]
    fn test_throttle_is_leading_edge() {
        let mut state = TopicState::default();
        let policy = PerfPolicy::throttle(16);
        let fp = fingerprint(&json!({}), None);
        let t0 = Instant::now();

        assert_eq!(state.evaluate(&policy, fp, t0, 16), Decision::Dispatch);
        assert_eq!(state.evaluate(&policy, fp, t0 + ms(5), 16), Decision::Throttled);
        assert_eq!(state.evaluate(&policy, fp, t0 + ms(15), 16), Decision::Throttled);
        assert_eq!(state.evaluate(&policy, fp, t0 + ms(16), 16), Decision::Dispatch);
        assert_eq!(state.evaluate(&policy, fp, t0 + ms(20), 16), Decision::Throttled);
    }

    #[test]
    fn test_debounce_outranks_throttle() {
        let mut state = TopicState::default();
        let policy = PerfPolicy {
            throttle_ms: Some(10),
            debounce_ms: Some(50),
            dedupe_window_ms: None,
        };
        let fp = fingerprint(&json!({}), None);
        let t0 = Instant::now();

        assert_eq!(state.evaluate(&policy, fp, t0, 16), Decision::Debounce(ms(50)));
        assert_eq!(state.evaluate(&policy, fp, t0 + ms(1), 16), Decision::Debounce(ms(50)));
    }
}
