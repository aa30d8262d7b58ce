//! Error taxonomy for the request pipeline.
//!
//! Client faults (parse, validation, path, translation) are reported with the
//! offending token; storage faults surface as server errors; cancellation
//! aborts in-flight work without a response body.

use serde::Serialize;
use thiserror::Error;

use crate::model::{EntityType, Id};

/// A malformed query option or request body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid query option {option}: {reason}")]
    QueryOption { option: String, reason: String },

    #[error("invalid query option {option}: property not found: {property} on {entity_type}")]
    PropertyNotFound {
        option: String,
        property: String,
        entity_type: EntityType,
    },

    #[error("unable to parse {entity_type}: {}", describe_body(.field, .reason))]
    Body {
        entity_type: EntityType,
        field: Option<String>,
        reason: String,
    },
}

impl ParseError {
    pub fn option(option: &str, reason: impl Into<String>) -> Self {
        Self::QueryOption {
            option: option.to_string(),
            reason: reason.into(),
        }
    }

    pub fn body(entity_type: EntityType, field: Option<&str>, reason: impl Into<String>) -> Self {
        Self::Body {
            entity_type,
            field: field.map(str::to_string),
            reason: reason.into(),
        }
    }
}

fn describe_body(field: &Option<String>, reason: &str) -> String {
    match field {
        Some(field) => format!("field '{}' {}", field, reason),
        None => reason.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValidationErrorType {
    MissingMandatory,
    InvalidValue,
}

/// One missing or invalid entity field. Always reported in batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{entity_type}: {message}")]
pub struct ValidationError {
    pub entity_type: EntityType,
    pub field: String,
    pub error_type: ValidationErrorType,
    pub message: String,
}

impl ValidationError {
    pub fn missing(entity_type: EntityType, field: &str) -> Self {
        Self {
            entity_type,
            field: field.to_string(),
            error_type: ValidationErrorType::MissingMandatory,
            message: format!("missing mandatory parameter: {}.{}", entity_type, field),
        }
    }

    pub fn invalid(entity_type: EntityType, field: &str, message: impl Into<String>) -> Self {
        Self {
            entity_type,
            field: field.to_string(),
            error_type: ValidationErrorType::InvalidValue,
            message: message.into(),
        }
    }
}

/// An unresolvable request path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("unknown entity set: {0}")]
    UnknownEntitySet(String),

    #[error("unknown navigation segment {segment} on {entity_type}")]
    UnknownSegment {
        entity_type: EntityType,
        segment: String,
    },

    #[error("invalid id '{id}' in segment {segment}")]
    InvalidId { segment: String, id: String },

    #[error("invalid path: {0}")]
    Malformed(String),

    #[error("path addresses no entity set")]
    Empty,
}

/// A parsed request that cannot be turned into data-access operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    #[error("expand depth {depth} exceeds the maximum of {max}")]
    ExpandTooDeep { depth: usize, max: usize },

    #[error("{0}")]
    InvalidTarget(String),
}

/// Failure of the backing store. Never retried by the core.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("referenced {entity_type} with id {id} does not exist")]
    UnknownReference { entity_type: EntityType, id: Id },

    #[error("unsupported by this store: {0}")]
    Unsupported(String),

    #[error("stored {entity_type}({id}) is unreadable: {reason}")]
    Corrupt {
        entity_type: EntityType,
        id: Id,
        reason: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Inconsistent navigation graph. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("edge {from}/{segment} has no declared inverse")]
    MissingInverse {
        from: EntityType,
        segment: &'static str,
    },

    #[error("edge {from}/{segment} is {cardinality} but its inverse is {inverse}")]
    CardinalityMismatch {
        from: EntityType,
        segment: &'static str,
        cardinality: String,
        inverse: String,
    },

    #[error("segment {segment} declared twice on {from}")]
    DuplicateSegment {
        from: EntityType,
        segment: &'static str,
    },

    #[error("segment {segment} on {from} should be named {expected}")]
    SegmentName {
        from: EntityType,
        segment: &'static str,
        expected: &'static str,
    },
}

/// Raised when a client disconnect or deadline aborts in-flight work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CancellationError {
    #[error("request cancelled")]
    Cancelled,
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

/// Outbound classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    ClientError,
    NotFound,
    ServerError,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("{} validation error(s)", .0.len())]
    Validation(Vec<ValidationError>),

    #[error(transparent)]
    Path(#[from] PathError),

    /// Everything wrong with a read request: its path and its query options.
    #[error("{}", describe_query(.path, .options))]
    Query {
        path: Option<PathError>,
        options: Vec<ParseError>,
    },

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Cancelled(#[from] CancellationError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    MethodNotAllowed(String),
}

impl ApiError {
    pub fn classify(&self) -> ErrorClass {
        match self {
            ApiError::Parse(_)
            | ApiError::Validation(_)
            | ApiError::Translate(_)
            | ApiError::MethodNotAllowed(_) => ErrorClass::ClientError,
            ApiError::Path(_) | ApiError::NotFound(_) => ErrorClass::NotFound,
            ApiError::Query { path: Some(_), .. } => ErrorClass::NotFound,
            ApiError::Query { path: None, .. } => ErrorClass::ClientError,
            ApiError::Storage(StorageError::UnknownReference { .. }) => ErrorClass::ClientError,
            ApiError::Storage(_) => ErrorClass::ServerError,
            ApiError::Cancelled(_) => ErrorClass::Cancelled,
        }
    }

    /// Every violation found, not just the first.
    pub fn details(&self) -> Vec<String> {
        match self {
            ApiError::Validation(errors) => errors.iter().map(|e| e.to_string()).collect(),
            ApiError::Query { path, options } => path
                .iter()
                .map(|e| e.to_string())
                .chain(options.iter().map(|e| e.to_string()))
                .collect(),
            other => vec![other.to_string()],
        }
    }

    /// A rejected query string on an otherwise valid path.
    pub fn query(options: Vec<ParseError>) -> Self {
        ApiError::Query { path: None, options }
    }
}

fn describe_query(path: &Option<PathError>, options: &[ParseError]) -> String {
    path.iter()
        .map(|e| e.to_string())
        .chain(options.iter().map(|e| e.to_string()))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ErrorClass {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorClass::ClientError => 400,
            ErrorClass::NotFound => 404,
            ErrorClass::ServerError => 500,
            // nginx-style "client closed request"
            ErrorClass::Cancelled => 499,
        }
    }
}
