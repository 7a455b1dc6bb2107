//! Payload objects threaded through sequence execution

use serde_json::{Map, Value};

/// A JSON object. Beats read it, return fragments of it, and the engine folds
/// those fragments into the running payload of an invocation.
pub type Payload = Map<String, Value>;

/// Shallow-merge `source` into `target`; keys in `source` win.
pub fn merge_into(target: &mut Payload, source: Payload) {
    for (key, value) in source {
        target.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    #[test]
    fn test_merge_overrides_and_keeps_existing() {
        let mut target = obj(json!({"a": 1, "b": {"x": 1}}));
        merge_into(&mut target, obj(json!({"b": {"y": 2}, "c": 3})));

        assert_eq!(Value::Object(target), json!({"a": 1, "b": {"y": 2}, "c": 3}));
    }
}
