//! AWS error classification
//!
//! Errors from the autoscaling and load balancing APIs are sorted by their
//! error code so the capacity waiter knows which ones to retry.

use aws_sdk_autoscaling::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use thiserror::Error;

/// Classified control-plane error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// Rate limit exceeded (retryable)
    #[error("Rate limit exceeded: {message}")]
    Throttled { message: String },

    /// Service could not be reached or answered with a server fault (retryable)
    #[error("Service unavailable: {message}")]
    Unavailable { message: String },

    /// Credentials lack permission for the call
    #[error("Access denied: {message}")]
    AccessDenied { message: String },

    /// The load balancer or target group does not exist
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Any other AWS error
    #[error("AWS error{}: {message}", code.as_deref().map(|c| format!(" ({})", c)).unwrap_or_default())]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl ApiError {
    /// Whether the call may succeed if simply repeated
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Throttled { .. } | ApiError::Unavailable { .. })
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "RequestThrottled",
    "ResourceContention",
];

const UNAVAILABLE_CODES: &[&str] = &[
    "ServiceUnavailable",
    "ServiceUnavailableException",
    "InternalFailure",
    "InternalError",
    "RequestTimeout",
    "RequestTimeoutException",
];

const ACCESS_DENIED_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "UnauthorizedOperation",
    "AuthFailure",
    "InvalidClientTokenId",
    "ExpiredToken",
    "ExpiredTokenException",
    "UnrecognizedClientException",
];

const NOT_FOUND_CODES: &[&str] = &[
    "LoadBalancerNotFound",
    "TargetGroupNotFound",
    "InvalidInstance",
];

/// Classify an AWS error by its code
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> ApiError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if THROTTLING_CODES.contains(&c) => ApiError::Throttled { message },
        Some(c) if UNAVAILABLE_CODES.contains(&c) => ApiError::Unavailable { message },
        Some(c) if ACCESS_DENIED_CODES.contains(&c) => ApiError::AccessDenied { message },
        Some(c) if NOT_FOUND_CODES.contains(&c) => ApiError::NotFound { message },
        _ => ApiError::Sdk {
            code: code.map(|c| c.to_string()),
            message,
        },
    }
}

/// Classify an SDK error returned by any of the AWS clients
///
/// Timeouts and dispatch failures never reached the service and are treated
/// as transient.
pub fn classify_sdk_error<E, R>(err: &SdkError<E, R>) -> ApiError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => ApiError::Unavailable {
            message: DisplayErrorContext(err).to_string(),
        },
        _ => match err.as_service_error() {
            Some(service_err) => classify_aws_error(
                service_err.code(),
                Some(
                    service_err
                        .message()
                        .map(str::to_string)
                        .unwrap_or_else(|| DisplayErrorContext(err).to_string())
                        .as_str(),
                ),
            ),
            None => ApiError::Sdk {
                code: None,
                message: DisplayErrorContext(err).to_string(),
            },
        },
    }
}
