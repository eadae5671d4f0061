//! End-to-end tests against the live mock upstream.
//!
//! # Design
//! Starts the mock server on a random port, then drives every body encoding
//! through `Executor` over real HTTP with `ReqwestTransport`, using the real
//! token grant and cache.

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use mock_server::{MockState, DEFAULT_APP_ID, DEFAULT_APP_SECRET};
use serde::{Deserialize, Serialize};
use wxapi_core::{
    ApiError, ApiStatus, AppSecretSource, Arg, ArgKind, BodyMode, CachedCredential, ClientConfig,
    Executor, FileKind, HttpMethod, ParameterBinding, ReqwestTransport, RequestDescriptor,
    ReturnType, Transport,
};

fn start_server(state: MockState) -> SocketAddr {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run_with_state(listener, state).await
        })
        .unwrap();
    });
    addr
}

fn config(addr: SocketAddr, secret: &str) -> ClientConfig {
    ClientConfig::new(&format!("http://{addr}")).with_app_credentials(DEFAULT_APP_ID, secret)
}

fn executor_with(config: &ClientConfig) -> Executor {
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(config.timeout).unwrap());
    let source = AppSecretSource::new(config, Arc::clone(&transport)).unwrap();
    let credentials = Arc::new(CachedCredential::new(source, config.token_refresh_margin));
    Executor::new(config, credentials, transport)
}

fn start() -> (MockState, Executor) {
    let state = MockState::default();
    let addr = start_server(state.clone());
    (state, executor_with(&config(addr, DEFAULT_APP_SECRET)))
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

fn menu_create() -> RequestDescriptor {
    RequestDescriptor::builder(HttpMethod::Post, "/cgi-bin/menu/create")
        .name("menu.create")
        .body_mode(BodyMode::Json)
        .param(ParameterBinding::json_body(0, ArgKind::Complex))
        .build()
        .unwrap()
}

fn menu_get() -> RequestDescriptor {
    RequestDescriptor::builder(HttpMethod::Get, "/cgi-bin/menu/get")
        .name("menu.get")
        .build()
        .unwrap()
}

fn media_upload() -> RequestDescriptor {
    RequestDescriptor::builder(HttpMethod::Post, "/cgi-bin/media/upload?type={type}")
        .name("media.upload")
        .body_mode(BodyMode::Form)
        .param(ParameterBinding::query(0, "type"))
        .param(ParameterBinding::form_file(1, FileKind::Path).ident("media"))
        .build()
        .unwrap()
}

fn media_get() -> RequestDescriptor {
    RequestDescriptor::builder(HttpMethod::Get, "/cgi-bin/media/get")
        .name("media.get")
        .param(ParameterBinding::query(0, "media_id"))
        .returns(ReturnType::Stream)
        .build()
        .unwrap()
}

fn add_material() -> RequestDescriptor {
    RequestDescriptor::builder(HttpMethod::Post, "/cgi-bin/material/add_material")
        .name("material.add")
        .body_mode(BodyMode::Form)
        .param(ParameterBinding::query(0, "type"))
        .param(ParameterBinding::form_file(1, FileKind::Chars).named("media"))
        .param(ParameterBinding::form_field(2, ArgKind::Complex).ident("description"))
        .build()
        .unwrap()
}

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Button {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Menu {
    button: Vec<Button>,
}

#[derive(Debug, Deserialize)]
struct MenuInfo {
    menu: Menu,
}

#[derive(Debug, Deserialize)]
struct UploadedMedia {
    #[serde(rename = "type")]
    kind: String,
    media_id: String,
}

#[derive(Debug, Serialize)]
struct VideoDescription {
    title: String,
    introduction: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn menu_lifecycle() {
    let (state, exec) = start();

    // No menu yet: a 2xx error envelope.
    let err = exec.execute(&menu_get(), Vec::new()).unwrap_err();
    assert!(matches!(err, ApiError::Api { code: 46003, .. }));

    let menu = Menu {
        button: vec![Button {
            kind: "click".to_string(),
            name: "Today".to_string(),
            key: "V1001_TODAY".to_string(),
        }],
    };
    let status: ApiStatus = exec
        .execute_as(&menu_create(), vec![Arg::complex(menu.clone())])
        .unwrap();
    assert_eq!(status.errcode, 0);

    let info: MenuInfo = exec.execute_as(&menu_get(), Vec::new()).unwrap();
    assert_eq!(info.menu, menu);

    // The token was fetched once and reused.
    assert_eq!(state.tokens_issued(), 1);
}

#[test]
fn media_upload_from_path_then_download() {
    let (state, exec) = start();

    let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
    let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    file.write_all(&content).unwrap();

    let uploaded: UploadedMedia = exec
        .execute_as(
            &media_upload(),
            vec![Arg::str("image"), Arg::path(file.path())],
        )
        .unwrap();
    assert_eq!(uploaded.kind, "image");
    let stored = state.media(&uploaded.media_id).unwrap();
    assert_eq!(stored.content_type, "image/png");
    assert!(stored.filename.ends_with(".png"));

    let mut body = exec
        .execute(&media_get(), vec![Arg::str(uploaded.media_id.clone())])
        .unwrap()
        .into_stream()
        .unwrap();
    let mut downloaded = Vec::new();
    body.read_to_end(&mut downloaded).unwrap();
    assert_eq!(downloaded, content);
}

#[test]
fn unknown_media_download_is_api_error() {
    let (_state, exec) = start();
    let err = exec
        .execute(&media_get(), vec![Arg::str("missing")])
        .unwrap_err();
    assert!(matches!(err, ApiError::Api { code: 40007, .. }));
}

#[test]
fn material_with_text_stream_and_description() {
    let (state, exec) = start();
    let media_id = exec
        .execute_as::<serde_json::Value>(
            &add_material(),
            vec![
                Arg::str("video"),
                Arg::chars("字幕 subtitles".chars()),
                Arg::complex(VideoDescription {
                    title: "Launch".to_string(),
                    introduction: "Day one".to_string(),
                }),
            ],
        )
        .unwrap()["media_id"]
        .as_str()
        .unwrap()
        .to_string();
    let stored = state.media(&media_id).unwrap();
    assert_eq!(stored.data, "字幕 subtitles".as_bytes());
    let description: serde_json::Value =
        serde_json::from_str(&stored.fields["description"]).unwrap();
    assert_eq!(description["title"], "Launch");
}

#[test]
fn expired_token_is_refreshed_and_retried_once() {
    let (state, exec) = start();
    exec.execute(&menu_create(), vec![Arg::complex(Menu { button: Vec::new() })])
        .unwrap();
    assert_eq!(state.tokens_issued(), 1);

    state.expire_tokens();
    let err = exec.execute(&menu_get(), Vec::new()).unwrap_err();
    assert!(err.is_credential_expired());

    let info: MenuInfo = exec
        .execute_with_retry(&menu_get(), Vec::new)
        .unwrap()
        .into_json()
        .unwrap();
    assert!(info.menu.button.is_empty());
    assert_eq!(state.tokens_issued(), 2);
}

#[test]
fn stream_arguments_are_rebuilt_on_retry() {
    let (state, exec) = start();
    exec.execute(&menu_get(), Vec::new()).ok();
    state.expire_tokens();

    let result = exec
        .execute_with_retry(&add_material(), || {
            vec![
                Arg::str("image"),
                Arg::chars("pixels".chars()),
                Arg::Null,
            ]
        })
        .unwrap()
        .into_json::<serde_json::Value>()
        .unwrap();
    let stored = state.media(result["media_id"].as_str().unwrap()).unwrap();
    assert_eq!(stored.data, b"pixels");
}

#[test]
fn unknown_route_is_response_error() {
    let (_state, exec) = start();
    let d = RequestDescriptor::builder(HttpMethod::Get, "/cgi-bin/does/not/exist")
        .build()
        .unwrap();
    let err = exec.execute(&d, Vec::new()).unwrap_err();
    assert!(err.is_not_found());
    assert!(!err.is_credential_expired());
}

#[test]
fn bad_app_secret_surfaces_token_error() {
    let addr = start_server(MockState::default());
    let exec = executor_with(&config(addr, "wrong-secret"));
    let err = exec.execute(&menu_get(), Vec::new()).unwrap_err();
    assert!(matches!(err, ApiError::Api { code: 40125, .. }));
}
