//! gRPC utilities shared by the millwork services.
//!
//! - Error conversion between `AppError` and `tonic::Status`
//! - Interceptors for request id and trace context propagation

pub mod error;
pub mod interceptors;

pub use error::{GrpcResult, IntoStatus};
pub use interceptors::{RequestId, extract_request_id, extract_traceparent, trace_context_interceptor};

// Re-export commonly used tonic types
pub use tonic::{Code, Request, Response, Status};
