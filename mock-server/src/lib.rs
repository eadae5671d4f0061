//! In-memory mock of the upstream API.
//!
//! Implements the token grant plus a handful of endpoints covering each body
//! encoding: JSON (`menu/create`), multipart uploads (`media/upload`,
//! `material/add_material`) and binary downloads (`media/get`). Like the real
//! service, business errors are answered with HTTP 200 and an
//! `{"errcode","errmsg"}` envelope.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::{
    body::Bytes,
    extract::{Multipart, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::info;
use uuid::Uuid;

pub const DEFAULT_APP_ID: &str = "wx-mock-app";
pub const DEFAULT_APP_SECRET: &str = "mock-secret";
pub const TOKEN_TTL_SECS: u64 = 7200;

#[derive(Clone, Debug)]
pub struct StoredMedia {
    pub kind: String,
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
    /// Text fields sent alongside the file, e.g. a material description.
    pub fields: HashMap<String, String>,
}

#[derive(Default)]
struct Inner {
    issued: u64,
    /// token -> still valid
    tokens: HashMap<String, bool>,
    menu: Option<Value>,
    media: HashMap<String, StoredMedia>,
}

/// Shared server state. Clones share the same store.
#[derive(Clone)]
pub struct MockState {
    app_id: String,
    app_secret: String,
    inner: Arc<Mutex<Inner>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self::new(DEFAULT_APP_ID, DEFAULT_APP_SECRET)
    }
}

impl MockState {
    pub fn new(app_id: &str, app_secret: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            app_secret: app_secret.to_string(),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark every issued token as expired.
    pub fn expire_tokens(&self) {
        for valid in self.lock().tokens.values_mut() {
            *valid = false;
        }
    }

    /// Number of tokens handed out so far.
    pub fn tokens_issued(&self) -> u64 {
        self.lock().issued
    }

    pub fn media(&self, media_id: &str) -> Option<StoredMedia> {
        self.lock().media.get(media_id).cloned()
    }

    fn check_token(&self, token: Option<&str>) -> Result<(), Response> {
        let inner = self.lock();
        match token.map(|t| inner.tokens.get(t)) {
            None => Err(api_error(41001, "access_token missing")),
            Some(None) => Err(api_error(40001, "invalid credential")),
            Some(Some(false)) => Err(api_error(42001, "access_token expired")),
            Some(Some(true)) => Ok(()),
        }
    }
}

fn api_error(code: i64, message: &str) -> Response {
    Json(json!({"errcode": code, "errmsg": message})).into_response()
}

fn ok() -> Response {
    Json(json!({"errcode": 0, "errmsg": "ok"})).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiQuery {
    pub access_token: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub media_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub grant_type: String,
    pub appid: String,
    pub secret: String,
}

pub fn app() -> Router {
    app_with_state(MockState::default())
}

pub fn app_with_state(state: MockState) -> Router {
    Router::new()
        .route("/cgi-bin/token", get(issue_token))
        .route("/cgi-bin/menu/create", post(create_menu))
        .route("/cgi-bin/menu/get", get(get_menu))
        .route("/cgi-bin/media/upload", post(upload_media))
        .route("/cgi-bin/media/get", get(get_media))
        .route("/cgi-bin/material/add_material", post(add_material))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with_state(listener, MockState::default()).await
}

pub async fn run_with_state(listener: TcpListener, state: MockState) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(state)).await
}

async fn issue_token(State(state): State<MockState>, Query(q): Query<TokenQuery>) -> Response {
    if q.grant_type != "client_credential" {
        return api_error(40002, "invalid grant_type");
    }
    if q.appid != state.app_id || q.secret != state.app_secret {
        return api_error(40125, "invalid appsecret");
    }
    let mut inner = state.lock();
    inner.issued += 1;
    let token = format!("mock-token-{}", inner.issued);
    inner.tokens.insert(token.clone(), true);
    info!(token = %token, "issued access token");
    Json(json!({"access_token": token, "expires_in": TOKEN_TTL_SECS})).into_response()
}

async fn create_menu(
    State(state): State<MockState>,
    Query(q): Query<ApiQuery>,
    body: Bytes,
) -> Response {
    if let Err(resp) = state.check_token(q.access_token.as_deref()) {
        return resp;
    }
    let menu: Value = match serde_json::from_slice(&body) {
        Ok(menu) => menu,
        Err(_) => return api_error(40016, "invalid button size"),
    };
    if !menu.get("button").is_some_and(Value::is_array) {
        return api_error(40016, "invalid button size");
    }
    state.lock().menu = Some(menu);
    ok()
}

async fn get_menu(State(state): State<MockState>, Query(q): Query<ApiQuery>) -> Response {
    if let Err(resp) = state.check_token(q.access_token.as_deref()) {
        return resp;
    }
    match state.lock().menu.clone() {
        Some(menu) => Json(json!({"menu": menu})).into_response(),
        None => api_error(46003, "menu no exist"),
    }
}

struct Upload {
    file: Option<(String, String, Vec<u8>)>,
    fields: HashMap<String, String>,
}

async fn read_upload(multipart: &mut Multipart) -> Result<Upload, Response> {
    let mut upload = Upload {
        file: None,
        fields: HashMap::new(),
    };
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err((StatusCode::BAD_REQUEST, e.to_string()).into_response()),
        };
        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().map(str::to_string);
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()).into_response())?;
        match filename {
            Some(filename) if name == "media" => {
                upload.file = Some((filename, content_type, data.to_vec()));
            }
            _ => {
                upload
                    .fields
                    .insert(name, String::from_utf8_lossy(&data).into_owned());
            }
        }
    }
    Ok(upload)
}

fn store(state: &MockState, kind: String, upload: Upload) -> Result<String, Response> {
    let (filename, content_type, data) = upload
        .file
        .ok_or_else(|| api_error(41005, "media data missing"))?;
    let media_id = Uuid::new_v4().simple().to_string();
    state.lock().media.insert(
        media_id.clone(),
        StoredMedia {
            kind,
            filename,
            content_type,
            data,
            fields: upload.fields,
        },
    );
    Ok(media_id)
}

async fn upload_media(
    State(state): State<MockState>,
    Query(q): Query<ApiQuery>,
    mut multipart: Multipart,
) -> Response {
    if let Err(resp) = state.check_token(q.access_token.as_deref()) {
        return resp;
    }
    let Some(kind) = q.kind else {
        return api_error(40004, "invalid media type");
    };
    let result = match read_upload(&mut multipart).await {
        Ok(upload) => store(&state, kind.clone(), upload),
        Err(resp) => return resp,
    };
    match result {
        Ok(media_id) => {
            Json(json!({"type": kind, "media_id": media_id, "created_at": 1_700_000_000u64}))
                .into_response()
        }
        Err(resp) => resp,
    }
}

async fn add_material(
    State(state): State<MockState>,
    Query(q): Query<ApiQuery>,
    mut multipart: Multipart,
) -> Response {
    if let Err(resp) = state.check_token(q.access_token.as_deref()) {
        return resp;
    }
    let kind = q.kind.unwrap_or_else(|| "image".to_string());
    let upload = match read_upload(&mut multipart).await {
        Ok(upload) => upload,
        Err(resp) => return resp,
    };
    if kind == "video" && !upload.fields.contains_key("description") {
        return api_error(40007, "description required for video");
    }
    match store(&state, kind, upload) {
        Ok(media_id) => Json(json!({
            "media_id": media_id,
            "url": format!("http://mmbiz.example/{media_id}"),
        }))
        .into_response(),
        Err(resp) => resp,
    }
}

async fn get_media(State(state): State<MockState>, Query(q): Query<ApiQuery>) -> Response {
    if let Err(resp) = state.check_token(q.access_token.as_deref()) {
        return resp;
    }
    let media = q.media_id.as_deref().and_then(|id| state.media(id));
    match media {
        Some(media) => (
            [
                (header::CONTENT_TYPE, media.content_type),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", media.filename),
                ),
            ],
            media.data,
        )
            .into_response(),
        None => api_error(40007, "invalid media_id"),
    }
}
