use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use serde_json::Value;

use crate::error::Error;
use crate::handle::Handle;
use crate::msgs::{RequestDraft, RequestId, Response, ResponseBody};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Runs before a request is handed to the socket, with the chance to
/// rewrite it — e.g. to set the default `delta` flag.
///
/// A trait rather than a plain closure so a stateful interceptor (one
/// that tracks baselines, say) can hold its own fields; object-safety via
/// boxed futures rather than `async_trait` keeps the dependency list
/// unchanged from what the rest of this crate already pulls in.
pub trait RequestInterceptor: Send + Sync {
    fn intercept<'a>(&'a self, request_id: RequestId, draft: &'a mut RequestDraft) -> BoxFuture<'a, Result<(), Error>>;
}

/// Runs on a response on its way to becoming the value a caller of
/// `send()` actually sees.
///
/// Interceptors run in registration order, each consuming the previous
/// one's [`ResponseStage`] and producing the next. The built-in chain is
/// delta application, then error-to-exception mapping, then result
/// extraction — see [`default_response_chain`].
pub trait ResponseInterceptor: Send + Sync {
    fn intercept<'a>(
        &'a self,
        handle: Handle,
        stage: ResponseStage,
    ) -> BoxFuture<'a, Result<ResponseStage, Error>>;
}

/// The state a response is in partway through the interceptor chain.
#[derive(Debug, Clone)]
pub enum ResponseStage {
    /// Not yet processed by any interceptor.
    Raw(Response),
    /// Already reduced to the value a caller should see.
    Value(Value),
}

/// Sets `delta: true` on every outgoing request unless the caller
/// explicitly opted out with `delta: false` — the "delta blacklist" rule,
/// where an explicit `false` always wins over the protocol default.
pub struct DefaultDeltaRequestInterceptor {
    pub default_delta: bool,
}

impl RequestInterceptor for DefaultDeltaRequestInterceptor {
    fn intercept<'a>(&'a self, _request_id: RequestId, draft: &'a mut RequestDraft) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            if draft.delta.is_none() {
                draft.delta = Some(self.default_delta);
            }
            Ok(())
        })
    }
}

/// Merges a response's `result` into the running baseline for its
/// handle when the request asked for deltas, so callers always see a
/// complete value regardless of how much of it the server actually sent.
///
/// The merge is a shallow object overlay: object keys present in the
/// delta replace the same keys in the baseline, everything else from the
/// baseline is kept. Non-object results (arrays, scalars) are treated as
/// complete replacements, since there's no well-defined partial merge for
/// them.
pub struct DeltaApplicationInterceptor {
    baselines: Mutex<HashMap<Handle, Value>>,
}

impl DeltaApplicationInterceptor {
    pub fn new() -> Self {
        Self { baselines: Mutex::new(HashMap::new()) }
    }
}

impl Default for DeltaApplicationInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseInterceptor for DeltaApplicationInterceptor {
    fn intercept<'a>(
        &'a self,
        handle: Handle,
        stage: ResponseStage,
    ) -> BoxFuture<'a, Result<ResponseStage, Error>> {
        Box::pin(async move {
            let ResponseStage::Raw(response) = stage else {
                return Ok(stage);
            };
            let ResponseBody::Result(ref value) = response.body else {
                return Ok(ResponseStage::Raw(response));
            };

            let mut baselines = self.baselines.lock().expect("poisoned");
            let merged = match (baselines.get(&handle), value) {
                (Some(Value::Object(baseline)), Value::Object(delta)) => {
                    let mut merged = baseline.clone();
                    for (key, delta_value) in delta {
                        merged.insert(key.clone(), delta_value.clone());
                    }
                    Value::Object(merged)
                }
                _ => value.clone(),
            };
            baselines.insert(handle, merged.clone());
            Ok(ResponseStage::Value(merged))
        })
    }
}

/// Turns a JSON-RPC error body into `Err(Error::Rpc { .. })`.
pub struct ErrorToExceptionInterceptor;

impl ResponseInterceptor for ErrorToExceptionInterceptor {
    fn intercept<'a>(
        &'a self,
        _handle: Handle,
        stage: ResponseStage,
    ) -> BoxFuture<'a, Result<ResponseStage, Error>> {
        Box::pin(async move {
            match stage {
                ResponseStage::Raw(response) => match response.body {
                    ResponseBody::Error(error) => Err(Error::Rpc {
                        code: error.code,
                        message: error.message,
                        parameter: error.parameter,
                    }),
                    ResponseBody::Result(value) => Ok(ResponseStage::Value(value)),
                },
                ResponseStage::Value(value) => Ok(ResponseStage::Value(value)),
            }
        })
    }
}

/// The last step of the default chain: asserts the pipeline actually
/// reduced to a value. A seam for implementations that need to unwrap
/// one more layer of envelope before callers see a result.
pub struct ResultExtractionInterceptor;

impl ResponseInterceptor for ResultExtractionInterceptor {
    fn intercept<'a>(
        &'a self,
        _handle: Handle,
        stage: ResponseStage,
    ) -> BoxFuture<'a, Result<ResponseStage, Error>> {
        Box::pin(async move { Ok(stage) })
    }
}

/// The chain this crate ships by default: delta application, then error
/// mapping, then result extraction, matching the order a response needs
/// to be processed in (you can't merge a delta into an error, so error
/// mapping has to see the pre-merge stage untouched when there's nothing
/// to merge).
pub fn default_response_chain() -> Vec<Box<dyn ResponseInterceptor>> {
    vec![
        Box::new(DeltaApplicationInterceptor::new()),
        Box::new(ErrorToExceptionInterceptor),
        Box::new(ResultExtractionInterceptor),
    ]
}

/// Runs a response through a chain of [`ResponseInterceptor`]s,
/// short-circuiting on the first error.
pub async fn run_response_chain(
    chain: &[Box<dyn ResponseInterceptor>],
    handle: Handle,
    response: Response,
) -> Result<Value, Error> {
    let mut stage = ResponseStage::Raw(response);
    for interceptor in chain {
        stage = interceptor.intercept(handle, stage).await?;
    }
    match stage {
        ResponseStage::Value(value) => Ok(value),
        ResponseStage::Raw(response) => match response.body {
            ResponseBody::Result(value) => Ok(value),
            ResponseBody::Error(error) => Err(Error::Rpc {
                code: error.code,
                message: error.message,
                parameter: error.parameter,
            }),
        },
    }
}

/// Runs a request draft through a chain of [`RequestInterceptor`]s in
/// order, before it's handed to [`crate::rpc::Rpc::send`].
pub async fn run_request_chain(
    chain: &[Box<dyn RequestInterceptor>],
    request_id: RequestId,
    draft: &mut RequestDraft,
) -> Result<(), Error> {
    for interceptor in chain {
        interceptor.intercept(request_id, draft).await?;
    }
    Ok(())
}
