//! JSON-RPC envelopes.
//!
//! On the wire every message is one flat object whose role is implied by
//! which optional fields are present. That shape is decided once, when the
//! body is decoded, and the rest of the crate only sees [`Message`].
use lsp_types::NumberOrString;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Error object carried by a failed response.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,
}

impl std::fmt::Display for ResponseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ResponseError {}

/// A method invocation that expects a reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: NumberOrString,
    pub method: String,
    pub params: Value,
}

/// A method invocation with no reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// `None` when the peer sent no id, a null id or a zero id.
    pub id: Option<NumberOrString>,
    pub outcome: Result<Value, ResponseError>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Envelope")]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

impl Message {
    pub fn request(id: i32, method: impl Into<String>, params: Value) -> Self {
        Message::Request(Request {
            id: NumberOrString::Number(id),
            method: method.into(),
            params,
        })
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Message::Notification(Notification {
            method: method.into(),
            params,
        })
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(r) => Some(&r.method),
            Message::Notification(n) => Some(&n.method),
            Message::Response(_) => None,
        }
    }
}

/// A message the peer started on its own: what the event feed carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Request(Request),
    Notification(Notification),
}

impl Event {
    pub fn method(&self) -> &str {
        match self {
            Event::Request(r) => &r.method,
            Event::Notification(n) => &n.method,
        }
    }

    pub fn params(&self) -> &Value {
        match self {
            Event::Request(r) => &r.params,
            Event::Notification(n) => &n.params,
        }
    }
}

/// Inbound wire shape, before the role is decided.
#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<NumberOrString>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default, deserialize_with = "present")]
    params: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ResponseError>,
}

/// Outbound wire shape, borrowed from a [`Message`]. Calls always carry
/// `params`, as `null` when there are none, so every call we send is
/// recognizable as one by its fields alone.
#[derive(Serialize)]
struct EnvelopeRef<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a NumberOrString>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ResponseError>,
}

impl TryFrom<Envelope> for Message {
    type Error = String;

    fn try_from(env: Envelope) -> Result<Self, Self::Error> {
        // A zero id means "no reply expected", same as an absent one.
        let id = env.id.filter(|id| *id != NumberOrString::Number(0));
        let method = env.method.filter(|m| !m.is_empty());
        let is_response = env.result.is_some() || env.error.is_some();

        if env.params.is_some() || (method.is_some() && !is_response) {
            let method = method.ok_or_else(|| "call without a method".to_string())?;
            let params = env.params.unwrap_or(Value::Null);
            return Ok(match id {
                Some(id) => Message::Request(Request { id, method, params }),
                None => Message::Notification(Notification { method, params }),
            });
        }

        // A peer error wins over a result if both are present.
        if let Some(error) = env.error {
            return Ok(Message::Response(Response {
                id,
                outcome: Err(error),
            }));
        }
        if let Some(result) = env.result {
            return Ok(Message::Response(Response {
                id,
                outcome: Ok(result),
            }));
        }
        Err("envelope is neither a call nor a response".to_string())
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut env = EnvelopeRef {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        };
        match self {
            Message::Request(r) => {
                env.id = Some(&r.id);
                env.method = Some(&r.method);
                env.params = Some(&r.params);
            }
            Message::Notification(n) => {
                env.method = Some(&n.method);
                env.params = Some(&n.params);
            }
            Message::Response(r) => {
                env.id = r.id.as_ref();
                match &r.outcome {
                    Ok(result) => env.result = Some(result),
                    Err(error) => env.error = Some(error),
                }
            }
        }
        env.serialize(serializer)
    }
}

/// Keeps an explicit `null` as `Some(Value::Null)` instead of folding it
/// into "absent"; `"result": null` is a successful reply.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}
