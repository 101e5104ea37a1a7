//! The request descriptor handed from application code to the host transport.
//!
//! # Design
//! Method, path, body and the auth/accept/compression policies are captured
//! at construction and never change. Everything the host or the application
//! may still touch after submission (headers, deadline, session affinity,
//! handlers, lifecycle state) lives behind a single per-request lock.
//!
//! Lifecycle events are explicit states rather than flags:
//! creation is `Pending` or `Fired(task)`, completion is `Pending` or
//! `Completed(response)`. Firing enqueues handler callbacks on their queues
//! while the lock is held, so deliveries for one request keep the order of
//! the firing calls, but no callback ever runs under the lock. The retained
//! task identifier and response let late registrants still observe the event.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::body::{
    sniff_image_content_type, BodyKind, ContentDisposition, MultipartBody, MultipartItem,
    METADATA_CONTENT_TYPE,
};
use crate::debug::DebugInfo;
use crate::error::{RequestError, RequestResult};
use crate::expiration::{Expiration, DEFAULT_EXPIRATION_INTERVAL};
use crate::handler::{CompletionHandler, ProgressHandler, TaskCreatedHandler};
use crate::http::{AcceptPolicy, AuthPolicy, RequestMethod, TaskIdentifier, TransportResponse};
use crate::session::SessionAffinity;

#[derive(Debug, Clone, PartialEq)]
enum CreationState {
    Pending,
    Fired(TaskIdentifier),
}

#[derive(Debug, Clone, PartialEq)]
enum CompletionState {
    Pending,
    Completed(TransportResponse),
}

#[derive(Debug)]
struct RequestState {
    headers: BTreeMap<String, String>,
    expiration: Expiration,
    affinity: SessionAffinity,
    should_fail_instead_of_retry: bool,
    does_not_follow_redirects: bool,
    creation: CreationState,
    completion: CompletionState,
    task_created_handlers: Vec<TaskCreatedHandler>,
    progress_handlers: Vec<ProgressHandler>,
    completion_handlers: Vec<CompletionHandler>,
}

/// A single outbound network operation.
///
/// Share it as `Arc<TransportRequest>` between the code that builds it and
/// the host that executes it; every method takes `&self`.
#[derive(Debug)]
pub struct TransportRequest {
    id: Uuid,
    method: RequestMethod,
    path: String,
    body: BodyKind,
    auth: AuthPolicy,
    accept: AcceptPolicy,
    should_compress: bool,
    state: Mutex<RequestState>,
    debug: Mutex<DebugInfo>,
}

impl TransportRequest {
    fn build(
        path: String,
        method: RequestMethod,
        body: BodyKind,
        auth: AuthPolicy,
        accept: AcceptPolicy,
        should_compress: bool,
    ) -> RequestResult<Self> {
        if path.is_empty() {
            return Err(RequestError::EmptyPath);
        }
        // File uploads always travel on the background session.
        let affinity = match body {
            BodyKind::FileUpload { .. } => SessionAffinity::BackgroundOnly,
            _ => SessionAffinity::Default,
        };
        Ok(Self {
            id: Uuid::new_v4(),
            method,
            path,
            body,
            auth,
            accept,
            should_compress,
            state: Mutex::new(RequestState {
                headers: BTreeMap::new(),
                expiration: Expiration::Never,
                affinity,
                should_fail_instead_of_retry: false,
                does_not_follow_redirects: false,
                creation: CreationState::Pending,
                completion: CompletionState::Pending,
                task_created_handlers: Vec::new(),
                progress_handlers: Vec::new(),
                completion_handlers: Vec::new(),
            }),
            debug: Mutex::new(DebugInfo::default()),
        })
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Request with an optional JSON payload that needs an access token.
    pub fn new(
        path: impl Into<String>,
        method: RequestMethod,
        payload: Option<serde_json::Value>,
    ) -> RequestResult<Self> {
        Self::with_authentication(path, method, payload, AuthPolicy::NeedsAccessToken)
    }

    pub fn with_authentication(
        path: impl Into<String>,
        method: RequestMethod,
        payload: Option<serde_json::Value>,
        auth: AuthPolicy,
    ) -> RequestResult<Self> {
        Self::build(
            path.into(),
            method,
            payload_body(payload),
            auth,
            AcceptPolicy::StructuredData,
            false,
        )
    }

    pub fn with_compression(
        path: impl Into<String>,
        method: RequestMethod,
        payload: Option<serde_json::Value>,
        should_compress: bool,
    ) -> RequestResult<Self> {
        Self::build(
            path.into(),
            method,
            payload_body(payload),
            AuthPolicy::NeedsAccessToken,
            AcceptPolicy::StructuredData,
            should_compress,
        )
    }

    /// Request whose body is raw bytes of the given content type.
    pub fn binary(
        path: impl Into<String>,
        method: RequestMethod,
        data: impl Into<Bytes>,
        content_type: impl Into<String>,
        content_disposition: ContentDisposition,
    ) -> RequestResult<Self> {
        Self::binary_compressed(path, method, data, content_type, content_disposition, false)
    }

    pub fn binary_compressed(
        path: impl Into<String>,
        method: RequestMethod,
        data: impl Into<Bytes>,
        content_type: impl Into<String>,
        content_disposition: ContentDisposition,
        should_compress: bool,
    ) -> RequestResult<Self> {
        let body = BodyKind::BinaryData {
            data: data.into(),
            content_type: content_type.into(),
            content_disposition,
        };
        Self::build(
            path.into(),
            method,
            body,
            AuthPolicy::NeedsAccessToken,
            AcceptPolicy::StructuredData,
            should_compress,
        )
    }

    /// POST that streams `file` from disk. Pinned to the background session.
    pub fn upload_file(
        path: impl Into<String>,
        file: impl Into<PathBuf>,
        content_type: impl Into<String>,
    ) -> RequestResult<Self> {
        let body = BodyKind::FileUpload {
            file: file.into(),
            content_type: content_type.into(),
        };
        Self::build(
            path.into(),
            RequestMethod::Post,
            body,
            AuthPolicy::NeedsAccessToken,
            AcceptPolicy::StructuredData,
            false,
        )
    }

    pub fn get(path: impl Into<String>) -> RequestResult<Self> {
        Self::new(path, RequestMethod::Get, None)
    }

    pub fn compressed_get(path: impl Into<String>) -> RequestResult<Self> {
        Self::with_compression(path, RequestMethod::Get, None, true)
    }

    /// PUT with an empty JSON object as payload.
    pub fn empty_put(path: impl Into<String>) -> RequestResult<Self> {
        Self::new(
            path,
            RequestMethod::Put,
            Some(serde_json::Value::Object(serde_json::Map::new())),
        )
    }

    /// GET that expects an image back.
    pub fn image_get(path: impl Into<String>) -> RequestResult<Self> {
        Self::build(
            path.into(),
            RequestMethod::Get,
            BodyKind::Empty,
            AuthPolicy::NeedsAccessToken,
            AcceptPolicy::Image,
            false,
        )
    }

    /// POST of image bytes; the content type is sniffed from the data.
    pub fn image_post(
        path: impl Into<String>,
        image_data: impl Into<Bytes>,
        content_disposition: ContentDisposition,
    ) -> RequestResult<Self> {
        let data = image_data.into();
        let content_type = sniff_image_content_type(&data);
        Self::binary(path, RequestMethod::Post, data, content_type, content_disposition)
    }

    /// Multipart POST of an image and a JSON metadata dictionary.
    pub fn multipart_image(
        path: impl Into<String>,
        image_data: impl Into<Bytes>,
        metadata: &serde_json::Map<String, serde_json::Value>,
    ) -> RequestResult<Self> {
        let data = image_data.into();
        let media_type = sniff_image_content_type(&data);
        Self::multipart_image_with_media_type(path, data, metadata, media_type)
    }

    pub fn multipart_image_with_media_type(
        path: impl Into<String>,
        image_data: impl Into<Bytes>,
        metadata: &serde_json::Map<String, serde_json::Value>,
        media_content_type: &str,
    ) -> RequestResult<Self> {
        let metadata = serde_json::to_vec(metadata)?;
        Self::multipart(
            path,
            image_data,
            metadata,
            METADATA_CONTENT_TYPE,
            media_content_type,
        )
    }

    /// Multipart POST: image part first, metadata part second.
    pub fn multipart(
        path: impl Into<String>,
        image_data: impl Into<Bytes>,
        metadata: impl Into<Bytes>,
        metadata_content_type: &str,
        media_content_type: &str,
    ) -> RequestResult<Self> {
        let body = MultipartBody::image_with_metadata(
            image_data.into(),
            metadata.into(),
            metadata_content_type,
            media_content_type,
        );
        Self::build(
            path.into(),
            RequestMethod::Post,
            BodyKind::Multipart(body),
            AuthPolicy::NeedsAccessToken,
            AcceptPolicy::StructuredData,
            false,
        )
    }

    // ------------------------------------------------------------------
    // Fixed properties
    // ------------------------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn method(&self) -> RequestMethod {
        self.method
    }

    pub fn method_as_string(&self) -> &'static str {
        self.method.as_str()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> &BodyKind {
        &self.body
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        match &self.body {
            BodyKind::StructuredPayload(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn binary_data(&self) -> Option<&Bytes> {
        match &self.body {
            BodyKind::BinaryData { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Content type of binary or file-upload bodies.
    pub fn binary_data_type(&self) -> Option<&str> {
        match &self.body {
            BodyKind::BinaryData { content_type, .. } | BodyKind::FileUpload { content_type, .. } => {
                Some(content_type)
            }
            _ => None,
        }
    }

    pub fn file_upload_url(&self) -> Option<&Path> {
        match &self.body {
            BodyKind::FileUpload { file, .. } => Some(file),
            _ => None,
        }
    }

    pub fn content_disposition(&self) -> Option<&ContentDisposition> {
        match &self.body {
            BodyKind::BinaryData {
                content_disposition,
                ..
            } => Some(content_disposition),
            _ => None,
        }
    }

    pub fn multipart_body(&self) -> Option<&MultipartBody> {
        match &self.body {
            BodyKind::Multipart(multipart) => Some(multipart),
            _ => None,
        }
    }

    /// Parts of a multipart body in serialization order; empty otherwise.
    pub fn multipart_body_items(&self) -> &[MultipartItem] {
        self.multipart_body().map(MultipartBody::parts).unwrap_or_default()
    }

    pub fn auth(&self) -> AuthPolicy {
        self.auth
    }

    pub fn needs_authentication(&self) -> bool {
        self.auth.needs_authentication()
    }

    pub fn response_will_contain_access_token(&self) -> bool {
        self.auth.response_will_contain_access_token()
    }

    pub fn response_will_contain_cookie(&self) -> bool {
        self.auth.response_will_contain_cookie()
    }

    pub fn accepted_response_media_types(&self) -> AcceptPolicy {
        self.accept
    }

    pub fn should_compress(&self) -> bool {
        self.should_compress
    }

    /// False when a PUT or POST has nothing to send.
    pub fn has_required_payload(&self) -> bool {
        !self.method.requires_payload() || !self.body.is_empty()
    }

    /// Value equality over method, path, body and additional headers.
    /// Handlers, lifecycle state, deadline, affinity and debug data are ignored.
    pub fn is_equal_to(&self, other: &TransportRequest) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        self.method == other.method
            && self.path == other.path
            && self.body == other.body
            && self.additional_headers() == other.additional_headers()
    }

    // ------------------------------------------------------------------
    // Mutable configuration
    // ------------------------------------------------------------------

    /// Set an additional header; a later value for the same field wins.
    pub fn add_value(&self, value: impl Into<String>, header_field: impl Into<String>) {
        self.state.lock().headers.insert(header_field.into(), value.into());
    }

    pub fn additional_headers(&self) -> BTreeMap<String, String> {
        self.state.lock().headers.clone()
    }

    pub fn expire_after(&self, interval: Duration) {
        self.state.lock().expiration = Expiration::after(interval);
    }

    pub fn expire_at(&self, date: DateTime<Utc>) {
        self.state.lock().expiration = Expiration::at(date);
    }

    pub fn expire_after_default(&self) {
        self.expire_after(DEFAULT_EXPIRATION_INTERVAL);
    }

    pub fn expiration(&self) -> Expiration {
        self.state.lock().expiration
    }

    pub fn expiration_date(&self) -> Option<DateTime<Utc>> {
        self.expiration().deadline()
    }

    pub fn is_expired(&self) -> bool {
        self.expiration().is_expired()
    }

    pub fn force_to_background_session(&self) -> RequestResult<()> {
        self.force_session(SessionAffinity::BackgroundOnly)
    }

    pub fn force_to_voip_session(&self) -> RequestResult<()> {
        self.force_session(SessionAffinity::VoipOnly)
    }

    fn force_session(&self, target: SessionAffinity) -> RequestResult<()> {
        let mut state = self.state.lock();
        state.affinity.narrow(target).inspect_err(|err| {
            warn!(request_id = %self.id, path = %self.path, %err, "session affinity conflict");
        })
    }

    pub fn session_affinity(&self) -> SessionAffinity {
        self.state.lock().affinity
    }

    pub fn should_use_only_background_session(&self) -> bool {
        self.session_affinity() == SessionAffinity::BackgroundOnly
    }

    pub fn should_use_voip_session(&self) -> bool {
        self.session_affinity() == SessionAffinity::VoipOnly
    }

    pub fn should_fail_instead_of_retry(&self) -> bool {
        self.state.lock().should_fail_instead_of_retry
    }

    pub fn set_should_fail_instead_of_retry(&self, value: bool) {
        self.state.lock().should_fail_instead_of_retry = value;
    }

    pub fn does_not_follow_redirects(&self) -> bool {
        self.state.lock().does_not_follow_redirects
    }

    pub fn set_does_not_follow_redirects(&self, value: bool) {
        self.state.lock().does_not_follow_redirects = value;
    }

    // ------------------------------------------------------------------
    // Handlers and lifecycle
    // ------------------------------------------------------------------

    /// Register a creation handler. If the task already exists the handler
    /// is dispatched right away with the retained identifiers.
    pub fn add_task_created_handler(&self, handler: TaskCreatedHandler) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match &state.creation {
            CreationState::Fired(task) => handler.dispatch(task.clone()),
            CreationState::Pending => state.task_created_handlers.push(handler),
        }
    }

    /// Register a progress handler. Ignored once the request has completed.
    pub fn add_progress_handler(&self, handler: ProgressHandler) {
        let mut state = self.state.lock();
        if matches!(state.completion, CompletionState::Completed(_)) {
            trace!(request_id = %self.id, "progress handler added after completion, dropping");
            return;
        }
        state.progress_handlers.push(handler);
    }

    /// Register a completion handler. If the request already completed the
    /// handler is dispatched right away with the retained response.
    pub fn add_completion_handler(&self, handler: CompletionHandler) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match &state.completion {
            CompletionState::Completed(response) => handler.dispatch(response.clone()),
            CompletionState::Pending => state.completion_handlers.push(handler),
        }
    }

    /// Called once by the host when the transport-level task exists, before
    /// completion.
    pub fn fire_creation(
        &self,
        identifier: u64,
        session_identifier: impl Into<String>,
    ) -> RequestResult<()> {
        let task = TaskIdentifier::new(identifier, session_identifier);
        let mut state = self.state.lock();
        if let CompletionState::Completed(_) = state.completion {
            error!(request_id = %self.id, attempted = %task, "task creation fired after completion");
            return Err(RequestError::AlreadyCompleted {
                request_id: self.id,
                task,
            });
        }
        if let CreationState::Fired(existing) = &state.creation {
            error!(
                request_id = %self.id,
                existing = %existing,
                attempted = %task,
                "task creation fired twice"
            );
            return Err(RequestError::CreationAlreadyFired {
                request_id: self.id,
                task: existing.clone(),
            });
        }
        debug!(request_id = %self.id, method = %self.method, path = %self.path, %task, "task created");
        let handlers = std::mem::take(&mut state.task_created_handlers);
        for handler in &handlers {
            handler.dispatch(task.clone());
        }
        state.creation = CreationState::Fired(task);
        Ok(())
    }

    /// Report upload/download progress. No-op after completion.
    pub fn fire_progress(&self, progress: f32) {
        let state = self.state.lock();
        if matches!(state.completion, CompletionState::Completed(_)) {
            trace!(request_id = %self.id, progress, "progress after completion, ignoring");
            return;
        }
        trace!(request_id = %self.id, progress, "progress");
        for handler in &state.progress_handlers {
            handler.dispatch(progress);
        }
    }

    /// Complete the request. Only the first call has an effect; it returns
    /// `true`, every later call returns `false` without dispatching.
    pub fn fire_completion(&self, response: TransportResponse) -> bool {
        let mut state = self.state.lock();
        if let CompletionState::Completed(_) = state.completion {
            debug!(
                request_id = %self.id,
                status = response.status,
                "request already completed, ignoring response"
            );
            return false;
        }
        debug!(
            request_id = %self.id,
            method = %self.method,
            path = %self.path,
            status = response.status,
            failure = ?response.failure,
            "request completed"
        );
        let handlers = std::mem::take(&mut state.completion_handlers);
        for handler in &handlers {
            handler.dispatch(response.clone());
        }
        state.progress_handlers.clear();
        state.completion = CompletionState::Completed(response);
        true
    }

    pub fn task_identifier(&self) -> Option<TaskIdentifier> {
        match &self.state.lock().creation {
            CreationState::Fired(task) => Some(task.clone()),
            CreationState::Pending => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.state.lock().completion, CompletionState::Completed(_))
    }

    /// The response the request completed with, if any.
    pub fn response(&self) -> Option<TransportResponse> {
        match &self.state.lock().completion {
            CompletionState::Completed(response) => Some(response.clone()),
            CompletionState::Pending => None,
        }
    }

    // ------------------------------------------------------------------
    // Debugging
    // ------------------------------------------------------------------

    pub fn set_debug_transcoder(&self, transcoder: impl Into<String>) {
        self.debug.lock().transcoder = Some(transcoder.into());
    }

    pub fn set_debug_state(&self, state: impl Into<String>) {
        self.debug.lock().state = Some(state.into());
    }

    pub fn append_debug_information(&self, information: impl Into<String>) {
        self.debug.lock().append(information);
    }

    /// Marks the start of the upload time point.
    pub fn mark_start_of_upload_timestamp(&self) {
        self.debug.lock().start_of_upload = Some(Utc::now());
    }

    pub fn start_of_upload_timestamp(&self) -> Option<DateTime<Utc>> {
        self.debug.lock().start_of_upload
    }

    pub fn debug_information(&self) -> DebugInfo {
        self.debug.lock().clone()
    }
}

fn payload_body(payload: Option<serde_json::Value>) -> BodyKind {
    match payload {
        None | Some(serde_json::Value::Null) => BodyKind::Empty,
        Some(value) => BodyKind::StructuredPayload(value),
    }
}

impl PartialEq for TransportRequest {
    fn eq(&self, other: &Self) -> bool {
        self.is_equal_to(other)
    }
}

impl fmt::Display for TransportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{} {} {} auth={:?} session={}> {}",
            self.id,
            self.method,
            self.path,
            self.auth,
            self.session_affinity(),
            &*self.debug.lock()
        )
    }
}
