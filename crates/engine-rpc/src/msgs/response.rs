use serde::Deserialize;
use serde_json::Value;

use crate::handle::Handle;
use crate::msgs::request::RequestId;

/// The error body of a JSON-RPC error response.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub parameter: Option<Value>,
}

/// The raw shape of a frame the socket delivered in response to one of our
/// requests: either a `result` or an `error`, never both, with `change`/
/// `close` riding along as optional side bands of changed/closed handles.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseFrame {
    pub id: RequestId,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
    #[serde(default)]
    pub change: Vec<Handle>,
    #[serde(default)]
    pub close: Vec<Handle>,
}

/// A response frame, validated to have exactly one of a result or an error.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: RequestId,
    pub body: ResponseBody,
    pub change: Vec<Handle>,
    pub close: Vec<Handle>,
}

#[derive(Debug, Clone)]
pub enum ResponseBody {
    Result(Value),
    Error(RpcErrorBody),
}

impl TryFrom<ResponseFrame> for Response {
    type Error = crate::error::DecodeError;

    fn try_from(frame: ResponseFrame) -> Result<Self, Self::Error> {
        let body = match (frame.result, frame.error) {
            (Some(result), None) => ResponseBody::Result(result),
            (None, Some(error)) => ResponseBody::Error(error),
            (None, None) => return Err(crate::error::DecodeError::MissingResultAndError),
            (Some(result), Some(_)) => ResponseBody::Result(result),
        };
        Ok(Response {
            id: frame.id,
            body,
            change: frame.change,
            close: frame.close,
        })
    }
}

/// A standalone server-initiated notification: no id, not correlated with
/// any in-flight request.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}
