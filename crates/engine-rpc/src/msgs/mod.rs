//! Wire-format types: the JSON-RPC request/response/notification shapes
//! exchanged over the socket, independent of how they're sent or routed.

mod request;
mod response;

pub use request::{Request, RequestDraft, RequestId};
pub use response::{Notification, Response, ResponseBody, ResponseFrame, RpcErrorBody};

use std::ops::Deref;

use serde_json::Value;

/// What a successful [`crate::session::Session::send`] resolves to: the
/// interceptor-resolved value, tagged with the id the request was sent
/// under.
///
/// Rust futures have no `.then`-chaining to decorate the way a JS promise
/// does, so the id rides along on the resolved value itself instead —
/// `Reply` derefs to the underlying [`Value`] so callers that don't care
/// about the id can mostly ignore this wrapper exists.
#[derive(Debug, Clone)]
pub struct Reply {
    pub request_id: RequestId,
    pub value: Value,
}

impl Deref for Reply {
    type Target = Value;

    fn deref(&self) -> &Value {
        &self.value
    }
}

impl PartialEq<Value> for Reply {
    fn eq(&self, other: &Value) -> bool {
        self.value == *other
    }
}
