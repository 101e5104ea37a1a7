use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// PNG signature followed by a few filler bytes; enough for content sniffing.
pub const ASSET_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub name: String,
    pub archived: bool,
}

#[derive(Deserialize)]
pub struct CreateConversation {
    pub name: String,
}

#[derive(Deserialize)]
pub struct Login {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartSummary {
    pub content_type: String,
    pub size: usize,
}

/// What the server saw of an uploaded asset.
#[derive(Debug, Serialize, Deserialize)]
pub struct AssetReceipt {
    pub id: Uuid,
    pub content_type: String,
    pub size: usize,
    pub disposition: Option<String>,
    pub parts: Vec<PartSummary>,
}

#[derive(Clone, Default)]
pub struct AppState {
    conversations: Arc<RwLock<HashMap<Uuid, Conversation>>>,
    tokens: Arc<RwLock<HashSet<String>>>,
}

/// Runtime settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            log_filter: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Reads `PORT` and `RUST_LOG`, falling back to the defaults.
    pub fn from_env() -> Result<Self, std::io::Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, std::io::Error> {
        let defaults = Self::default();
        let port = match lookup("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("invalid PORT {raw:?}: {e}"),
                )
            })?,
            None => defaults.port,
        };
        Ok(Self {
            port,
            log_filter: lookup("RUST_LOG").unwrap_or(defaults.log_filter),
        })
    }

    pub fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }
}

pub fn app() -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/self", get(get_self))
        .route("/conversations", get(list_conversations).post(create_conversation))
        .route(
            "/conversations/{id}",
            get(get_conversation).delete(delete_conversation),
        )
        .route("/conversations/{id}/archived", put(archive_conversation))
        .route("/assets", post(upload_asset))
        .route("/assets/{id}", get(download_asset))
        .route("/redirect", get(redirect))
        .with_state(AppState::default())
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;
    if state.tokens.read().await.contains(token) {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

async fn login(State(state): State<AppState>, Json(input): Json<Login>) -> Response {
    let token = Uuid::new_v4().simple().to_string();
    state.tokens.write().await.insert(token.clone());
    info!(email = %input.email, "issued access token");
    let cookie = format!("zuid={}; Path=/; HttpOnly", Uuid::new_v4().simple());
    (
        [(header::SET_COOKIE, cookie)],
        Json(AccessToken {
            access_token: token,
            token_type: "Bearer".to_string(),
            expires_in: 900,
        }),
    )
        .into_response()
}

async fn get_self(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, StatusCode> {
    authorize(&state, &headers).await?;
    Ok(Json(serde_json::json!({"name": "mock user"})))
}

async fn list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Conversation>>, StatusCode> {
    authorize(&state, &headers).await?;
    let conversations = state.conversations.read().await;
    Ok(Json(conversations.values().cloned().collect()))
}

async fn create_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<CreateConversation>,
) -> Result<(StatusCode, Json<Conversation>), StatusCode> {
    authorize(&state, &headers).await?;
    let conversation = Conversation {
        id: Uuid::new_v4(),
        name: input.name,
        archived: false,
    };
    state
        .conversations
        .write()
        .await
        .insert(conversation.id, conversation.clone());
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn get_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Conversation>, StatusCode> {
    authorize(&state, &headers).await?;
    let conversations = state.conversations.read().await;
    conversations.get(&id).cloned().map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn archive_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Conversation>, StatusCode> {
    authorize(&state, &headers).await?;
    let mut conversations = state.conversations.write().await;
    let conversation = conversations.get_mut(&id).ok_or(StatusCode::NOT_FOUND)?;
    conversation.archived = true;
    Ok(Json(conversation.clone()))
}

async fn delete_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    authorize(&state, &headers).await?;
    let mut conversations = state.conversations.write().await;
    conversations
        .remove(&id)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn upload_asset(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<AssetReceipt>), StatusCode> {
    authorize(&state, &headers).await?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let disposition = headers
        .get(header::CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let parts = if content_type.starts_with("multipart/") {
        multipart_parts(&content_type, &body).ok_or(StatusCode::BAD_REQUEST)?
    } else {
        Vec::new()
    };
    debug!(%content_type, size = body.len(), parts = parts.len(), "asset received");
    Ok((
        StatusCode::CREATED,
        Json(AssetReceipt {
            id: Uuid::new_v4(),
            content_type,
            size: body.len(),
            disposition,
            parts,
        }),
    ))
}

async fn download_asset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(_id): Path<Uuid>,
) -> Result<Response, StatusCode> {
    authorize(&state, &headers).await?;
    let accepts_image = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("image/") || accept.contains("*/*"));
    if !accepts_image {
        return Err(StatusCode::NOT_ACCEPTABLE);
    }
    Ok(([(header::CONTENT_TYPE, "image/png")], ASSET_BYTES).into_response())
}

async fn redirect() -> Response {
    (StatusCode::SEE_OTHER, [(header::LOCATION, "/conversations")]).into_response()
}

/// Split a `multipart/*` body into per-part summaries.
pub fn multipart_parts(content_type: &str, body: &[u8]) -> Option<Vec<PartSummary>> {
    let boundary = content_type
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("boundary="))?;
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    for chunk in split_on(body, delimiter.as_bytes()).into_iter().skip(1) {
        if chunk.starts_with(b"--") {
            break;
        }
        let chunk = chunk.strip_prefix(b"\r\n")?;
        let header_end = find(chunk, b"\r\n\r\n")?;
        let head = std::str::from_utf8(&chunk[..header_end]).ok()?;
        let data = &chunk[header_end + 4..];
        let data = data.strip_suffix(b"\r\n").unwrap_or(data);
        let content_type = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.trim().to_string())
            .unwrap_or_default();
        parts.push(PartSummary {
            content_type,
            size: data.len(),
        });
    }
    Some(parts)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn split_on<'a>(mut haystack: &'a [u8], needle: &[u8]) -> Vec<&'a [u8]> {
    let mut pieces = Vec::new();
    while let Some(at) = find(haystack, needle) {
        pieces.push(&haystack[..at]);
        haystack = &haystack[at + needle.len()..];
    }
    pieces.push(haystack);
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_serializes_to_json() {
        let conversation = Conversation {
            id: Uuid::nil(),
            name: "Weekend".to_string(),
            archived: false,
        };
        let json = serde_json::to_value(&conversation).unwrap();
        assert_eq!(json["id"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(json["name"], "Weekend");
        assert_eq!(json["archived"], false);
    }

    #[test]
    fn create_conversation_rejects_missing_name() {
        let result: Result<CreateConversation, _> = serde_json::from_str(r#"{"title":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn config_defaults_without_environment() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.addr(), "127.0.0.1:3000");
    }

    #[test]
    fn config_reads_port_and_filter() {
        let config = ServerConfig::from_lookup(|key| match key {
            "PORT" => Some("8080".to_string()),
            "RUST_LOG" => Some("debug".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_filter, "debug");
    }

    #[test]
    fn config_rejects_bad_port() {
        let err = ServerConfig::from_lookup(|key| (key == "PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[test]
    fn multipart_parts_reports_each_part() {
        let body = b"--b1\r\nContent-Type: image/jpeg\r\nContent-Length: 3\r\n\r\nabc\r\n--b1\r\nContent-Type: application/json\r\n\r\n{}\r\n--b1--\r\n";
        let parts = multipart_parts("multipart/mixed; boundary=b1", body).unwrap();
        assert_eq!(
            parts,
            vec![
                PartSummary {
                    content_type: "image/jpeg".to_string(),
                    size: 3
                },
                PartSummary {
                    content_type: "application/json".to_string(),
                    size: 2
                },
            ]
        );
    }

    #[test]
    fn multipart_parts_needs_boundary() {
        assert!(multipart_parts("multipart/mixed", b"").is_none());
    }
}
