//! gRPC interceptors for cross-cutting concerns.

use tonic::{Request, Status};
use uuid::Uuid;

/// gRPC metadata key for W3C traceparent header.
pub const TRACEPARENT_KEY: &str = "traceparent";

/// gRPC metadata key for request ID.
pub const REQUEST_ID_KEY: &str = "x-request-id";

/// Request id attached to every intercepted call, taken from `x-request-id`
/// or freshly generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Interceptor that picks up trace context and the request id from incoming
/// metadata and stores the id as a [`RequestId`] extension for handlers.
#[allow(clippy::result_large_err)]
pub fn trace_context_interceptor(mut request: Request<()>) -> Result<Request<()>, Status> {
    if let Some(traceparent) = extract_traceparent(&request) {
        tracing::debug!(traceparent = %traceparent, "Received trace context");
    }

    let request_id = extract_request_id(&request).unwrap_or_else(|| Uuid::new_v4().to_string());
    tracing::Span::current().record("request_id", request_id.as_str());
    request.extensions_mut().insert(RequestId(request_id));

    Ok(request)
}

/// Extract trace context from incoming gRPC request metadata.
pub fn extract_traceparent<T>(request: &Request<T>) -> Option<String> {
    request
        .metadata()
        .get(TRACEPARENT_KEY)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Extract request ID from incoming gRPC request metadata.
pub fn extract_request_id<T>(request: &Request<T>) -> Option<String> {
    request
        .metadata()
        .get(REQUEST_ID_KEY)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}
