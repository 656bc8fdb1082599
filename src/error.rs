//! # Error Handling
//!
//! Two layers live here:
//! - [`ServiceError`]: the domain taxonomy returned by the orchestrator, flattened to
//!   `{code, message, fields}` with a stable machine-readable `code`.
//! - [`ApiError`]: the problem+json HTTP response the transport layer renders, with
//!   trace ID propagation.

use std::collections::BTreeMap;

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::telemetry;

/// Stable error codes exposed to callers.
pub mod codes {
    pub const EMPTY_DATA: &str = "empty_data";
    pub const INCORRECT_PAGE_SIZE: &str = "incorrect_page_size";
    pub const PRODUCT_ID_REQUIRED: &str = "product_id_required";
    pub const PROVIDER_ID_REQUIRED: &str = "provider_id_required";
    pub const ORDER_ID_REQUIRED: &str = "order_id_required";
    pub const CUSTOMER_PHONE_REQUIRED: &str = "customer_phone_required";
    pub const VALUE_REQUIRED: &str = "value_required";
    pub const INVALID_PHONE: &str = "invalid_phone";
    pub const INVALID_PROVIDER_ID: &str = "invalid_provider_id";
    pub const INVALID_REQUEST: &str = "invalid_request";
    pub const OBJECT_NOT_FOUND: &str = "object_not_found";
    pub const PRODUCT_NOT_FOUND: &str = "product_not_found";
    pub const PROVIDER_NOT_CONNECTED: &str = "provider_not_connected";
    pub const NO_POOLED_KEY: &str = "no_pooled_key";
    pub const ALREADY_ACTIVATED: &str = "already_activated";
    pub const ALREADY_CANCELLED: &str = "already_cancelled";
    pub const ORDER_ALREADY_EXISTS: &str = "order_already_exists";
    pub const KEY_VALUE_CONFLICT: &str = "key_value_conflict";
    pub const MDM_NOT_AVAILABLE: &str = "mdm_not_available";
    pub const PROVIDER_NOT_AVAILABLE: &str = "provider_not_available";
    pub const METHOD_NOT_SUPPORTED: &str = "method_not_supported";
    pub const INTERNAL: &str = "internal_error";
}

/// Error kinds distinguishing retryable from terminal outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or malformed input; nothing was changed
    Validation,
    /// Key, vendor, routing or pooled key absent
    NotFound,
    /// State already advanced (already activated / cancelled)
    Conflict,
    /// Vendor or catalog lookup failed; the caller may retry
    UpstreamUnavailable,
    /// The vendor adapter lacks the requested capability
    UnsupportedOperation,
    /// Persistence or other internal failure
    Internal,
}

impl ErrorKind {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::UnsupportedOperation => StatusCode::NOT_IMPLEMENTED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::UpstreamUnavailable)
    }
}

/// Domain error returned by the key service and orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ServiceError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
    pub fields: BTreeMap<String, String>,
}

impl ServiceError {
    pub fn new<S: Into<String>>(kind: ErrorKind, code: &'static str, message: S) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn validation<S: Into<String>>(code: &'static str, message: S) -> Self {
        Self::new(ErrorKind::Validation, code, message)
    }

    pub fn not_found<S: Into<String>>(code: &'static str, message: S) -> Self {
        Self::new(ErrorKind::NotFound, code, message)
    }

    pub fn conflict<S: Into<String>>(code: &'static str, message: S) -> Self {
        Self::new(ErrorKind::Conflict, code, message)
    }

    pub fn upstream_unavailable<S: Into<String>>(code: &'static str, message: S) -> Self {
        Self::new(ErrorKind::UpstreamUnavailable, code, message)
    }

    pub fn unsupported<S: Into<String>>(message: S) -> Self {
        Self::new(
            ErrorKind::UnsupportedOperation,
            codes::METHOD_NOT_SUPPORTED,
            message,
        )
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Internal, codes::INTERNAL, message)
    }

    /// Attach a field-level detail (e.g. the offending input name).
    pub fn with_field<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

impl From<sea_orm::DbErr> for ServiceError {
    fn from(error: sea_orm::DbErr) -> Self {
        tracing::error!(error = %error, "Database operation failed");
        ServiceError::internal("database operation failed")
    }
}

/// Returns true when the database reports a unique constraint violation.
pub(crate) fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::{RuntimeErr, SqlErr};

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    if matches!(error.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
        return true;
    }

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    db_error.is_unique_violation()
        || db_error.code().is_some_and(|code| {
            let code = code.as_ref();
            code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code)
        })
}

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error kind, distinguishing retryable from terminal outcomes
    pub kind: ErrorKind,
    /// Stable error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Field-level details (optional)
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error of the given kind
    pub fn new<S: Into<String>>(kind: ErrorKind, code: S, message: S) -> Self {
        Self {
            status: kind.status_code(),
            kind,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            fields: BTreeMap::new(),
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add field details to the error
    pub fn with_fields(mut self, fields: BTreeMap<String, String>) -> Self {
        self.fields = fields;
        self
    }

    /// Extract current trace ID from the active request (falls back to a generated correlation ID)
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]).into_boxed_str())
            })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        ApiError::new(error.kind, error.code.to_string(), error.message).with_fields(error.fields)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(
            ErrorKind::Validation,
            codes::INVALID_REQUEST.to_string(),
            message,
        )
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(
            ErrorKind::Validation,
            codes::INVALID_REQUEST.to_string(),
            format!("Invalid query string: {}", rejection.body_text()),
        )
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::new(
            ErrorKind::Validation,
            codes::INVALID_REQUEST.to_string(),
            format!("Invalid path parameter: {}", rejection.body_text()),
        )
    }
}
