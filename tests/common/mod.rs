//! Local stand-ins for the Telegram Bot API, DeepSeek and the transcription API.
//!
//! Each mock is a real axum server on an ephemeral port, so the production
//! teloxide and reqwest clients are exercised end to end. Responses can be
//! scripted per method; anything unscripted gets a plausible success.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    body::{Bytes, to_bytes},
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{
        HeaderMap, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Map, Value, json};
use tokio::net::TcpListener;
use url::Url;

use joyrelay::deepseek::{CompletionSettings, DeepSeekClient};
use joyrelay::relay::TelegramClient;
use joyrelay::transcription::WhisperClient;

pub const BOT_TOKEN: &str = "123456789:ABCdefGHIjklMNOpqrsTUVwxyz";

async fn spawn(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[derive(Clone, Default)]
pub struct MockTelegram {
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    scripted: Arc<Mutex<HashMap<String, VecDeque<(StatusCode, Value)>>>>,
    scripted_raw: Arc<Mutex<HashMap<String, VecDeque<(StatusCode, String)>>>>,
    /// file_id -> (file_path, contents)
    files: Arc<Mutex<HashMap<String, (String, Vec<u8>)>>>,
    downloads: Arc<Mutex<Vec<String>>>,
    next_message_id: Arc<Mutex<i64>>,
    pub base_url: String,
}

impl MockTelegram {
    pub async fn start() -> Self {
        let mut mock = Self::default();
        let router = Router::new()
            .route("/{*path}", get(telegram_file).post(telegram_method))
            .with_state(mock.clone());
        mock.base_url = spawn(router).await;
        mock
    }

    /// Queue a raw response for the next call of `method`.
    pub fn script(&self, method: &str, status: StatusCode, body: Value) {
        self.scripted
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back((status, body));
    }

    /// Queue a non-JSON response, as a proxy in front of the API would send.
    pub fn script_text(&self, method: &str, status: StatusCode, body: &str) {
        self.scripted_raw
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back((status, body.to_string()));
    }

    pub fn script_rate_limit(&self, method: &str, retry_after: u64) {
        self.script(
            method,
            StatusCode::TOO_MANY_REQUESTS,
            json!({
                "ok": false,
                "error_code": 429,
                "description": format!("Too Many Requests: retry after {retry_after}"),
                "parameters": { "retry_after": retry_after }
            }),
        );
    }

    pub fn script_unauthorized(&self, method: &str) {
        self.script(
            method,
            StatusCode::UNAUTHORIZED,
            json!({ "ok": false, "error_code": 401, "description": "Unauthorized" }),
        );
    }

    /// Make `contents` downloadable under `file_id`.
    pub fn add_file(&self, file_id: &str, contents: &[u8]) {
        self.files.lock().unwrap().insert(
            file_id.to_string(),
            (format!("voice/{file_id}.oga"), contents.to_vec()),
        );
    }

    /// File paths fetched through the file endpoint.
    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }

    /// Bodies of every call made to `method`, in order.
    pub fn calls(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub fn client(&self, webhook_secret: Option<&str>) -> TelegramClient {
        self.client_with_timeout(webhook_secret, Duration::from_secs(5))
    }

    pub fn client_with_timeout(&self, webhook_secret: Option<&str>, timeout: Duration) -> TelegramClient {
        TelegramClient::new(BOT_TOKEN, timeout, webhook_secret.map(String::from))
            .unwrap()
            .with_api_url(Url::parse(&self.base_url).unwrap())
    }

    pub async fn wait_for(&self, method: &str, count: usize) -> Vec<Value> {
        for _ in 0..300 {
            let calls = self.calls(method);
            if calls.len() >= count {
                return calls;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} call(s) to {method}");
    }

    fn default_response(&self, method: &str, params: &Value) -> (StatusCode, Value) {
        let result = match method {
            "sendMessage" => {
                let mut next = self.next_message_id.lock().unwrap();
                *next += 1;
                json!({
                    "message_id": 100 + *next,
                    "date": 1_700_000_000,
                    "chat": { "id": params["chat_id"], "type": "private", "first_name": "Mia" },
                    "from": { "id": 123456789, "is_bot": true, "first_name": "Joy Girl", "username": "joy_girl_bot" },
                    "text": params["text"]
                })
            }
            "getWebhookInfo" => {
                let url = self
                    .calls("setWebhook")
                    .last()
                    .map(|p| p["url"].clone())
                    .unwrap_or(json!(""));
                json!({
                    "url": url,
                    "has_custom_certificate": false,
                    "pending_update_count": 2
                })
            }
            "getMe" => json!({
                "id": 123456789,
                "is_bot": true,
                "first_name": "Joy Girl",
                "username": "joy_girl_bot",
                "can_join_groups": true,
                "can_read_all_group_messages": false,
                "supports_inline_queries": false,
                "can_connect_to_business": false,
                "has_main_web_app": false
            }),
            "getFile" => {
                let file_id = params["file_id"].as_str().unwrap_or_default();
                let files = self.files.lock().unwrap();
                let Some((path, contents)) = files.get(file_id) else {
                    return (
                        StatusCode::BAD_REQUEST,
                        json!({ "ok": false, "error_code": 400, "description": "Bad Request: invalid file_id" }),
                    );
                };
                json!({
                    "file_id": file_id,
                    "file_unique_id": format!("u-{file_id}"),
                    "file_size": contents.len(),
                    "file_path": path
                })
            }
            _ => json!(true),
        };
        (StatusCode::OK, json!({ "ok": true, "result": result }))
    }
}

/// `SendMessage` -> `sendMessage`. teloxide capitalises method names.
fn method_name(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or_default();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Request parameters as JSON, whether sent as a JSON body or multipart form.
async fn read_params(request: Request) -> Value {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    if !is_multipart {
        let body = to_bytes(request.into_body(), usize::MAX).await.unwrap();
        return serde_json::from_slice(&body).unwrap_or(Value::Null);
    }

    let mut multipart = Multipart::from_request(request, &()).await.unwrap();
    let mut params = Map::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        let text = field.text().await.unwrap();
        // Non-string values are JSON encoded in the form
        let value = serde_json::from_str(&text).unwrap_or(Value::String(text));
        params.insert(name, value);
    }
    Value::Object(params)
}

async fn telegram_method(
    State(mock): State<MockTelegram>,
    Path(path): Path<String>,
    request: Request,
) -> Response {
    let method = method_name(&path);
    let params = read_params(request).await;
    mock.calls.lock().unwrap().push((method.clone(), params.clone()));

    let raw = mock
        .scripted_raw
        .lock()
        .unwrap()
        .get_mut(&method)
        .and_then(|q| q.pop_front());
    if let Some((status, body)) = raw {
        return (status, body).into_response();
    }

    let scripted = mock
        .scripted
        .lock()
        .unwrap()
        .get_mut(&method)
        .and_then(|q| q.pop_front());
    let (status, body) = scripted.unwrap_or_else(|| mock.default_response(&method, &params));
    (status, Json(body)).into_response()
}

/// `GET /file/bot<token>/<file_path>`
async fn telegram_file(State(mock): State<MockTelegram>, Path(path): Path<String>) -> Response {
    let Some((_, file_path)) = path
        .strip_prefix("file/")
        .and_then(|rest| rest.split_once('/'))
    else {
        return StatusCode::NOT_FOUND.into_response();
    };
    mock.downloads.lock().unwrap().push(file_path.to_string());

    let files = mock.files.lock().unwrap();
    match files.values().find(|(p, _)| p == file_path) {
        Some((_, contents)) => (StatusCode::OK, contents.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Clone, Default)]
pub struct MockDeepSeek {
    requests: Arc<Mutex<Vec<(Option<String>, Value)>>>,
    scripted: Arc<Mutex<VecDeque<(StatusCode, String)>>>,
    delay: Arc<Mutex<Option<Duration>>>,
    pub base_url: String,
}

impl MockDeepSeek {
    pub async fn start() -> Self {
        let mut mock = Self::default();
        let router = Router::new()
            .route("/v1/chat/completions", post(completions))
            .with_state(mock.clone());
        mock.base_url = format!("{}/v1", spawn(router).await);
        mock
    }

    pub fn script(&self, status: StatusCode, body: impl Into<String>) {
        self.scripted.lock().unwrap().push_back((status, body.into()));
    }

    pub fn script_reply(&self, content: &str) {
        self.script(StatusCode::OK, completion_body(content));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// `(authorization header, request body)` for every call.
    pub fn requests(&self) -> Vec<(Option<String>, Value)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn client(&self, settings: CompletionSettings, timeout: Duration) -> DeepSeekClient {
        DeepSeekClient::new("sk-test".into(), self.base_url.clone(), settings, timeout).unwrap()
    }
}

pub fn completion_body(content: &str) -> String {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    })
    .to_string()
}

async fn completions(
    State(mock): State<MockDeepSeek>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let auth = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    mock.requests.lock().unwrap().push((auth, request));

    let delay = *mock.delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let scripted = mock.scripted.lock().unwrap().pop_front();
    scripted.unwrap_or_else(|| (StatusCode::OK, completion_body("hi there")))
}

/// Transcription endpoint that "hears" the uploaded audio bytes as UTF-8.
#[derive(Clone, Default)]
pub struct MockWhisper {
    uploads: Arc<Mutex<Vec<Upload>>>,
    scripted: Arc<Mutex<VecDeque<(StatusCode, String)>>>,
    pub base_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub authorization: Option<String>,
    pub model: Option<String>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub audio: Vec<u8>,
}

impl MockWhisper {
    pub async fn start() -> Self {
        let mut mock = Self::default();
        let router = Router::new()
            .route("/v1/audio/transcriptions", post(transcriptions))
            .with_state(mock.clone());
        mock.base_url = format!("{}/v1", spawn(router).await);
        mock
    }

    pub fn script(&self, status: StatusCode, body: impl Into<String>) {
        self.scripted.lock().unwrap().push_back((status, body.into()));
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn client(&self, timeout: Duration) -> WhisperClient {
        WhisperClient::new("sk-whisper".into(), self.base_url.clone(), "whisper-1", timeout).unwrap()
    }
}

async fn transcriptions(
    State(mock): State<MockWhisper>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> (StatusCode, String) {
    let mut upload = Upload {
        authorization: headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        ..Default::default()
    };
    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name() {
            Some("model") => upload.model = field.text().await.ok(),
            Some("file") => {
                upload.file_name = field.file_name().map(String::from);
                upload.content_type = field.content_type().map(String::from);
                upload.audio = field.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
            }
            _ => {}
        }
    }
    let heard = String::from_utf8_lossy(&upload.audio).into_owned();
    mock.uploads.lock().unwrap().push(upload);

    let scripted = mock.scripted.lock().unwrap().pop_front();
    scripted.unwrap_or_else(|| (StatusCode::OK, json!({ "text": heard }).to_string()))
}
