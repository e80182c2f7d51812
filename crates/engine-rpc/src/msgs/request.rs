use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::handle::Handle;

/// Unique identifier assigned to a request within one socket connection.
///
/// Monotonically increasing from 1, reset to 0 at each successful `open()`
/// (and therefore at each successful `resume()`, which re-opens the
/// socket).
pub type RequestId = u64;

/// A caller-supplied request, before id assignment and key filtering.
///
/// Deserializing a `RequestDraft` from an arbitrary JSON object (as
/// `send()` accepts) silently drops any field that isn't one of the ones
/// named below — this is what "unknown keys are stripped" means in
/// practice for a statically-typed request shape, rather than a runtime
/// allow-list walk over a loose map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestDraft {
    pub method: String,
    pub handle: Handle,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cont: Option<Value>,
    #[serde(default, rename = "return_empty", skip_serializing_if = "Option::is_none")]
    pub return_empty: Option<bool>,
}

impl RequestDraft {
    pub fn new(method: impl Into<String>, handle: Handle, params: Value) -> Self {
        Self {
            method: method.into(),
            handle,
            params,
            delta: None,
            cont: None,
            return_empty: None,
        }
    }

    pub fn delta(mut self, delta: bool) -> Self {
        self.delta = Some(delta);
        self
    }

    pub fn cont(mut self, cont: Value) -> Self {
        self.cont = Some(cont);
        self
    }

    pub fn return_empty(mut self, return_empty: bool) -> Self {
        self.return_empty = Some(return_empty);
        self
    }

    /// Parses a loosely-typed request, e.g. one a caller assembled as a
    /// `serde_json::json!` literal complete with fields this library
    /// doesn't know about. Unrecognized fields are dropped, not rejected.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// A request ready to go on the wire: the enumerated keys from the wire
/// protocol, nothing else, with an id assigned.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub method: String,
    pub handle: Handle,
    pub params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cont: Option<Value>,
    #[serde(rename = "return_empty", skip_serializing_if = "Option::is_none")]
    pub return_empty: Option<bool>,
    pub id: RequestId,
    pub jsonrpc: &'static str,
}

impl Request {
    pub(crate) fn from_draft(draft: RequestDraft, id: RequestId) -> Self {
        Self {
            method: draft.method,
            handle: draft.handle,
            params: draft.params,
            delta: draft.delta,
            cont: draft.cont,
            return_empty: draft.return_empty,
            id,
            jsonrpc: "2.0",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_keys_are_dropped_on_parse() {
        let draft = RequestDraft::from_value(json!({
            "method": "a",
            "handle": 1,
            "params": [],
            "delta": true,
            "xyz": "z",
        }))
        .unwrap();

        assert_eq!(draft.method, "a");
        assert_eq!(draft.handle, Handle(1));
        assert_eq!(draft.delta, Some(true));
    }

    #[test]
    fn wire_frame_has_exactly_the_enumerated_keys() {
        let draft = RequestDraft::new("a", Handle(1), json!([])).delta(true);
        let request = Request::from_draft(draft, 1);
        let value = serde_json::to_value(&request).unwrap();

        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec!["delta", "handle", "id", "jsonrpc", "method", "params"]
        );
    }
}
