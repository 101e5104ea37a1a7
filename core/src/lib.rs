//! Request descriptors for a host-driven network transport.
//!
//! # Overview
//! A `TransportRequest` describes one outbound operation: method, path, body,
//! auth and accept policies, session affinity and deadline. Application code
//! builds it and registers handlers; the host transport executes it and
//! drives the lifecycle (task created → progress* → exactly one completion).
//! The core never touches the network.
//!
//! # Design
//! - Construction captures method, path and body once; they are immutable.
//! - Mutable configuration and lifecycle state sit behind one lock per request.
//! - Handlers are bound to a `GroupQueue` and always run there, never on the
//!   thread that fired the event.
//! - Completion is idempotent and retained, so late handlers still see it.
//! - Expiry is stored, not enforced; the host turns it into a local failure.

pub mod body;
pub mod debug;
pub mod error;
pub mod expiration;
pub mod handler;
pub mod http;
pub mod request;
pub mod session;

pub use body::{BodyKind, ContentDisposition, MultipartBody, MultipartItem};
pub use debug::DebugInfo;
pub use error::{RequestError, RequestResult};
pub use expiration::{Expiration, DEFAULT_EXPIRATION_INTERVAL};
pub use handler::{
    clamp_progress, CompletionHandler, GroupQueue, Handler, ProgressHandler, SerialQueue,
    TaskCreatedHandler,
};
pub use http::{
    AcceptPolicy, AuthPolicy, FailureKind, RequestMethod, TaskIdentifier, TransportResponse,
};
pub use request::TransportRequest;
pub use session::SessionAffinity;
