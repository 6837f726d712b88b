//! Typed errors and HTTP mapping.

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Body text of every unstructured error response.
pub const INTERNAL_MESSAGE: &str = "Internal Server Error";

/// Boot-time failures. Any of these aborts application startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid primary key: model {model} has no property '{column}'")]
    InvalidPrimaryKey { model: String, column: String },
    #[error("duplicate model: {0}")]
    DuplicateModel(String),
    #[error("duplicate table: {0}")]
    DuplicateTable(String),
    #[error("unknown capability: {0}")]
    UnknownCapability(String),
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error(transparent)]
    Relation(#[from] RelationError),
    #[error(transparent)]
    Schema(#[from] SchemaCompileError),
}

/// Relation compile failures and invalid eager expressions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelationError {
    #[error("Unrecognized relation: {0}")]
    UnrecognizedKind(String),
    #[error("Unknown model: {0}")]
    UnknownModel(String),
    #[error("Unsupported through join on {kind} relation '{name}'")]
    UnsupportedThrough { kind: String, name: String },
    #[error("Missing through join on many-to-many relation '{0}'")]
    MissingThrough(String),
    #[error("Invalid join reference: {0}")]
    InvalidReference(String),
    #[error("Invalid child expression: {0}")]
    InvalidChild(String),
    #[error("Unknown eager modifier '{name}' on {model}")]
    UnknownModifier { model: String, name: String },
    #[error("Invalid relation expression: {0}")]
    Parse(String),
}

/// Failures while compiling a schema: keyword configuration that violates its
/// meta-schema, or a macro that cannot be expanded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaCompileError {
    #[error("invalid '{keyword}' configuration: {message}")]
    InvalidKeyword { keyword: String, message: String },
    #[error("can't resolve reference {0}")]
    MissingReference(String),
    #[error("unknown validator function: {0}")]
    UnknownFunction(String),
}

/// One raw validator error, as produced by core or custom keywords.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaError {
    pub keyword: String,
    #[serde(default)]
    pub data_path: String,
    pub message: String,
    #[serde(default)]
    pub params: Value,
}

impl SchemaError {
    pub fn new(keyword: &str, data_path: &str, message: impl Into<String>) -> Self {
        SchemaError {
            keyword: keyword.to_string(),
            data_path: data_path.to_string(),
            message: message.into(),
            params: Value::Object(Map::new()),
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// 400 error carrying validator errors keyed by data path.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationError {
    pub message: String,
    pub details: Map<String, Value>,
}

impl ValidationError {
    /// Group raw errors by data path. Errors without a path are keyed by the
    /// missing or additional property name, else by their sequential index.
    pub fn from_errors(message: impl Into<String>, errors: Vec<SchemaError>) -> Self {
        let mut details = Map::new();
        for (index, err) in errors.into_iter().enumerate() {
            let property = err
                .params
                .get("missingProperty")
                .or_else(|| err.params.get("additionalProperty"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let path = err.data_path.trim_start_matches('.').to_string();
            let key = match (path.is_empty(), property) {
                (false, Some(prop)) => format!("{}.{}", path, prop),
                (false, None) => path,
                (true, Some(prop)) => prop,
                (true, None) => index.to_string(),
            };
            let entry = serde_json::json!({
                "message": err.message,
                "keyword": err.keyword,
                "params": err.params,
            });
            match details.entry(key).or_insert_with(|| Value::Array(Vec::new())) {
                Value::Array(list) => list.push(entry),
                other => *other = Value::Array(vec![entry]),
            }
        }
        ValidationError {
            message: message.into(),
            details,
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Structured error with an explicit status and machine-readable payload.
#[derive(Clone, Debug)]
pub struct ResponseError {
    pub status: StatusCode,
    pub error: String,
    pub details: Option<Value>,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("method not allowed")]
    MethodNotAllowed { allowed: Vec<Method> },
    #[error("{0}")]
    Validation(ValidationError),
    #[error("invalid response: {0}")]
    InvalidResponse(ValidationError),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("request timed out after {0} ms")]
    Timeout(u64),
    #[error("{}", .0.error)]
    Response(ResponseError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Relation(#[from] RelationError),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Serialize)]
pub struct MessageBody {
    pub message: String,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Response(e) => e.status,
            AppError::Db(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            AppError::InvalidResponse(_)
            | AppError::Config(_)
            | AppError::Relation(_)
            | AppError::Db(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Structured errors serialize through their own representation; the rest
    /// collapse into a generic message envelope.
    pub fn is_structured(&self) -> bool {
        !matches!(
            self,
            AppError::Config(_) | AppError::Relation(_) | AppError::Db(_) | AppError::Internal(_)
        )
    }

    /// JSON body: `{error, details?}` for structured errors, a generic `{message}` otherwise.
    pub fn to_json(&self) -> Value {
        let body = if self.is_structured() {
            let details = match self {
                AppError::Validation(v) | AppError::InvalidResponse(v) => Some(Value::Object(v.details.clone())),
                AppError::MethodNotAllowed { allowed } => Some(serde_json::json!({
                    "allowed": allowed.iter().map(Method::as_str).collect::<Vec<_>>()
                })),
                AppError::Response(e) => e.details.clone(),
                _ => None,
            };
            serde_json::to_value(ErrorBody {
                error: self.to_string(),
                details,
            })
        } else {
            // Unstructured errors carry driver or config text; it goes to the log, not the client.
            serde_json::to_value(MessageBody {
                message: INTERNAL_MESSAGE.to_string(),
            })
        };
        body.unwrap_or(Value::Null)
    }

    /// Value for the `Allow` header, only computed for 405 responses.
    pub fn allow_header(&self) -> Option<HeaderValue> {
        match self {
            AppError::MethodNotAllowed { allowed } => {
                let joined = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
                HeaderValue::from_str(&joined).ok()
            }
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.to_json())).into_response();
        if let Some(allow) = self.allow_header() {
            response.headers_mut().insert(header::ALLOW, allow);
        }
        response
    }
}
