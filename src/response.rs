//! Standard response envelopes and the pipeline's reply type.

use crate::error::AppError;
use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
pub struct SuccessOne<T> {
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

#[derive(Serialize)]
pub struct SuccessMany<T> {
    pub data: Vec<T>,
    pub meta: MetaCount,
}

#[derive(Serialize)]
pub struct MetaCount {
    pub count: u64,
}

/// Outcome of the pipeline, turned into an HTTP response at the transport boundary.
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl Reply {
    pub fn new(status: StatusCode, body: Option<Value>) -> Self {
        Reply {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    /// Wrap an action result: arrays as `{ data, meta: { count } }`, other values as `{ data }`,
    /// `null` as an empty body.
    pub fn envelope(status: StatusCode, data: Value) -> Self {
        let body = match data {
            Value::Null => None,
            Value::Array(items) => {
                let count = items.len() as u64;
                serde_json::to_value(SuccessMany {
                    data: items,
                    meta: MetaCount { count },
                })
                .ok()
            }
            other => serde_json::to_value(SuccessOne { data: other, meta: None }).ok(),
        };
        let status = if body.is_none() && status == StatusCode::OK {
            StatusCode::NO_CONTENT
        } else {
            status
        };
        Reply::new(status, body)
    }

    /// Error envelope, with the `Allow` header computed only for 405.
    pub fn from_error(err: &AppError) -> Self {
        let mut reply = Reply::new(err.status(), Some(err.to_json()));
        if let Some(allow) = err.allow_header() {
            reply.headers.insert(header::ALLOW, allow);
        }
        reply
    }

    pub fn header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let mut response = match self.body {
            Some(body) => (self.status, Json(body)).into_response(),
            None => self.status.into_response(),
        };
        response.headers_mut().extend(self.headers);
        response
    }
}
