//! Wire format of the bridge.
//!
//! Frames on the channel:
//!
//! - call: `{layer, method, args, id}` plus `fnNonce` when the caller subscribed to events;
//! - reply: `{id, response}` or `{id, error}`;
//! - event: `{fnNonce, fnResponse}`;
//! - unsubscribe: `{unsubscribe: fnNonce}`, sent when the caller stops listening.
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEnvelope {
    pub layer: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fn_nonce: Option<String>,
}

impl CallEnvelope {
    /// Positional arguments. Callers must have validated that `args` is an array.
    pub fn arg_list(&self) -> Vec<Value> {
        match &self.args {
            Some(Value::Array(args)) => args.clone(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplyEnvelope {
    pub id: String,
    pub outcome: Result<Value, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub fn_nonce: String,
    #[serde(default)]
    pub fn_response: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Call(CallEnvelope),
    Reply(ReplyEnvelope),
    Event(EventEnvelope),
    Unsubscribe(String),
}

impl Frame {
    /// Classifies a raw frame. Anything that is not a well-formed bridge frame yields `None`,
    /// since the channel may carry unrelated traffic.
    pub fn from_value(value: Value) -> Option<Frame> {
        let Value::Object(obj) = value else {
            return None;
        };

        if obj.contains_key("layer") {
            return serde_json::from_value(Value::Object(obj)).ok().map(Frame::Call);
        }
        if obj.contains_key("fnNonce") {
            return serde_json::from_value(Value::Object(obj)).ok().map(Frame::Event);
        }
        if let Some(nonce) = obj.get("unsubscribe") {
            return nonce.as_str().map(|n| Frame::Unsubscribe(n.to_string()));
        }
        Self::reply(obj).map(Frame::Reply)
    }

    fn reply(mut obj: Map<String, Value>) -> Option<ReplyEnvelope> {
        let id = match obj.remove("id")? {
            Value::String(id) => id,
            _ => return None,
        };

        let outcome = if let Some(response) = obj.remove("response") {
            Ok(response)
        } else {
            match obj.remove("error")? {
                Value::String(msg) => Err(msg),
                other => Err(other.to_string()),
            }
        };

        Some(ReplyEnvelope { id, outcome })
    }

    pub fn into_value(self) -> Value {
        match self {
            Frame::Call(call) => serde_json::to_value(call).unwrap_or(Value::Null),
            Frame::Reply(ReplyEnvelope { id, outcome: Ok(response) }) => json!({"id": id, "response": response}),
            Frame::Reply(ReplyEnvelope { id, outcome: Err(error) }) => json!({"id": id, "error": error}),
            Frame::Event(event) => serde_json::to_value(event).unwrap_or(Value::Null),
            Frame::Unsubscribe(nonce) => json!({"unsubscribe": nonce}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_classified_by_shape() {
        let call = Frame::from_value(json!({"layer": "courses", "method": "all", "args": [], "id": "1"}));
        assert!(matches!(call, Some(Frame::Call(c)) if c.layer == "courses" && c.fn_nonce.is_none()));

        let reply = Frame::from_value(json!({"id": "1", "response": null}));
        assert_eq!(
            reply,
            Some(Frame::Reply(ReplyEnvelope { id: "1".into(), outcome: Ok(Value::Null) }))
        );

        let error = Frame::from_value(json!({"id": "2", "error": "nope"}));
        assert!(matches!(error, Some(Frame::Reply(ReplyEnvelope { outcome: Err(e), .. })) if e == "nope"));

        let event = Frame::from_value(json!({"fnNonce": "n", "fnResponse": {"a": 1}}));
        assert!(matches!(event, Some(Frame::Event(e)) if e.fn_response["a"] == 1));

        let stop = Frame::from_value(json!({"unsubscribe": "n"}));
        assert_eq!(stop, Some(Frame::Unsubscribe("n".into())));
        assert_eq!(Frame::Unsubscribe("n".into()).into_value(), json!({"unsubscribe": "n"}));
    }

    #[test]
    fn foreign_traffic_is_not_a_frame() {
        assert_eq!(Frame::from_value(json!("hello")), None);
        assert_eq!(Frame::from_value(json!({"type": "ping"})), None);
        assert_eq!(Frame::from_value(json!({"id": 3, "response": 1})), None);
        assert_eq!(Frame::from_value(json!({"layer": "courses"})), None);
        assert_eq!(Frame::from_value(json!({"unsubscribe": 7})), None);
    }

    #[test]
    fn call_serializes_without_empty_fields() {
        let call = CallEnvelope {
            layer: "users".into(),
            method: "me".into(),
            args: None,
            id: "x".into(),
            fn_nonce: None,
        };
        assert_eq!(
            Frame::Call(call).into_value(),
            json!({"layer": "users", "method": "me", "id": "x"})
        );
    }
}
