//! Error types for request construction and lifecycle misuse.
//!
//! # Design
//! Construction failures (`EmptyPath`, `UnknownMethod`, `Serialization`) are
//! returned to the caller building a request. `AffinityConflict`,
//! `CreationAlreadyFired` and `AlreadyCompleted` signal a bug in whoever
//! drives the request (usually the host transport) and are reported instead
//! of being silently tolerated.
//! Network failures never show up here; they arrive as data inside a
//! `TransportResponse`.

use thiserror::Error;
use uuid::Uuid;

use crate::http::TaskIdentifier;
use crate::session::SessionAffinity;

/// Errors returned by `TransportRequest` constructors and lifecycle calls.
#[derive(Debug, Error)]
pub enum RequestError {
    /// A request was constructed with an empty path.
    #[error("request path must not be empty")]
    EmptyPath,

    /// A method token that is not one of GET, DELETE, PUT, POST or HEAD.
    #[error("unknown request method: {0}")]
    UnknownMethod(String),

    /// The request is already pinned to a different session class.
    #[error("session affinity already forced to {current}, refusing {requested}")]
    AffinityConflict {
        current: SessionAffinity,
        requested: SessionAffinity,
    },

    /// `fire_creation` was called a second time for the same request.
    #[error("task creation already fired for request {request_id} ({task})")]
    CreationAlreadyFired { request_id: Uuid, task: TaskIdentifier },

    /// `fire_creation` was called after the request had completed.
    #[error("request {request_id} already completed, refusing {task}")]
    AlreadyCompleted { request_id: Uuid, task: TaskIdentifier },

    /// A metadata dictionary could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type RequestResult<T> = Result<T, RequestError>;
