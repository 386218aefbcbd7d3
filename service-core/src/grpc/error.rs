//! Error conversion utilities between `AppError` and `tonic::Status`.
//!
//! | AppError | gRPC Status |
//! |----------|-------------|
//! | `ValidationError`, `BadRequest` | `INVALID_ARGUMENT` |
//! | `NotFound` | `NOT_FOUND` |
//! | `Forbidden` | `PERMISSION_DENIED` |
//! | `Conflict` | `ALREADY_EXISTS` |
//! | `PreconditionFailed` | `FAILED_PRECONDITION` |
//! | `Contention` | `ABORTED` |
//! | `InternalError`, `DatabaseError`, `ConfigError` | `INTERNAL` |
//! | `ServiceUnavailable` | `UNAVAILABLE` |

use tonic::{Code, Status};

use crate::error::AppError;

/// Extension trait for converting types into `tonic::Status`.
pub trait IntoStatus {
    /// Convert into a `tonic::Status`.
    fn into_status(self) -> Status;
}

impl IntoStatus for AppError {
    fn into_status(self) -> Status {
        match self {
            AppError::ValidationError(err) => {
                Status::invalid_argument(format!("Validation error: {}", err))
            }
            AppError::BadRequest(err) => Status::invalid_argument(err.to_string()),
            AppError::NotFound(err) => Status::not_found(err.to_string()),
            AppError::Forbidden(err) => Status::permission_denied(err.to_string()),
            AppError::Conflict(err) => Status::already_exists(err.to_string()),
            AppError::PreconditionFailed(err) => Status::failed_precondition(err.to_string()),
            AppError::Contention(err) => {
                tracing::warn!(error = %err, "Contention, caller should retry");
                Status::aborted(err.to_string())
            }
            AppError::InternalError(err) => {
                // Log the full error but don't expose it to clients
                tracing::error!(error = %err, "Internal error");
                Status::internal("Internal server error")
            }
            AppError::ServiceUnavailable => Status::unavailable("Service unavailable"),
            AppError::DatabaseError(err) => {
                tracing::error!(error = %err, "Database error");
                Status::internal("Database error")
            }
            AppError::ConfigError(err) => {
                tracing::error!(error = %err, "Configuration error");
                Status::internal("Configuration error")
            }
        }
    }
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        err.into_status()
    }
}

/// Convert a `tonic::Status` back to an `AppError`.
impl From<Status> for AppError {
    fn from(status: Status) -> Self {
        match status.code() {
            Code::InvalidArgument | Code::OutOfRange => {
                AppError::BadRequest(anyhow::anyhow!("{}", status.message()))
            }
            Code::NotFound => AppError::NotFound(anyhow::anyhow!("{}", status.message())),
            Code::PermissionDenied | Code::Unauthenticated => {
                AppError::Forbidden(anyhow::anyhow!("{}", status.message()))
            }
            Code::AlreadyExists => AppError::Conflict(anyhow::anyhow!("{}", status.message())),
            Code::FailedPrecondition => {
                AppError::PreconditionFailed(anyhow::anyhow!("{}", status.message()))
            }
            Code::Aborted | Code::ResourceExhausted => {
                AppError::Contention(anyhow::anyhow!("{}", status.message()))
            }
            Code::Unavailable => AppError::ServiceUnavailable,
            Code::Ok => AppError::InternalError(anyhow::anyhow!("Unexpected OK status as error")),
            _ => AppError::InternalError(anyhow::anyhow!("{}", status.message())),
        }
    }
}

/// Result type alias for gRPC handlers.
pub type GrpcResult<T> = Result<tonic::Response<T>, Status>;
