use crate::config::{EndpointConfig, ResolvedConfig};
use chrono::Utc;
use rand::Rng as _;
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use url::Url;
use uuid::Uuid;

/// RPC verbs that mark a call as targeting the generative-language surface.
const GENERATIVE_VERBS: [&str; 3] = ["generateContent", "streamGenerateContent", "countTokens"];

const REQUEST_ID_PREFIX: &str = "agent";
const SESSION_ID_MAX_EXCLUSIVE: i64 = 9_000_000_000_000_000_000;

/// A fetch-like call as issued by the host.
#[derive(Debug, Clone)]
pub struct HostRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl HostRequest {
    pub fn post_json(url: Url, body: Value) -> Self {
        Self {
            method: Method::POST,
            url,
            headers: HeaderMap::new(),
            body: Some(body),
        }
    }
}

/// One host call rewritten to target a specific endpoint with a specific
/// access token and project.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub streaming: bool,
    pub requested_model: Option<String>,
    pub effective_model: Option<String>,
    pub project_id: String,
    pub endpoint: String,
}

/// True when the URL targets the generative-language surface: the final path
/// segment carries one of the `v1internal:`-style RPC verbs.
pub fn is_generative_request(url: &Url) -> bool {
    let Some(last) = url.path().rsplit('/').next() else {
        return false;
    };
    match last.rsplit_once(':') {
        Some((_, verb)) => GENERATIVE_VERBS.contains(&verb),
        None => false,
    }
}

/// Rewrite a generative-language call for one endpoint attempt.
///
/// Pure: the same inputs always yield the same request, apart from the
/// stamped `requestId`. The original URL's path and query are kept; only the
/// base moves to the endpoint under trial.
pub fn prepare(
    original: &HostRequest,
    access_token: &str,
    project_id: &str,
    endpoint: &EndpointConfig,
    cfg: &ResolvedConfig,
) -> PreparedRequest {
    let mut url = endpoint.base_url.clone();
    url.set_path(original.url.path());
    url.set_query(original.url.query());

    let mut headers = original.headers.clone();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {access_token}"))
            .expect("access token must be a valid header value"),
    );
    if let Ok(agent) = HeaderValue::from_str(&cfg.user_agent) {
        headers.insert(USER_AGENT, agent);
    }

    let requested_model = original
        .body
        .as_ref()
        .and_then(|b| b.get("model"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let effective_model = requested_model
        .as_ref()
        .map(|m| cfg.model_aliases.get(m).cloned().unwrap_or_else(|| m.clone()));

    let body = original.body.clone().map(|mut body| {
        if let Some(map) = body.as_object_mut() {
            map.insert("project".to_string(), Value::String(project_id.to_string()));
            map.entry("requestId".to_string())
                .or_insert_with(|| Value::String(generate_request_id()));
            map.entry("sessionId".to_string())
                .or_insert_with(|| Value::String(generate_session_id()));
            if let Some(model) = &effective_model {
                map.insert("model".to_string(), Value::String(model.clone()));
            }
        }
        body
    });

    let streaming = original.url.path().contains("streamGenerateContent")
        || original
            .url
            .query_pairs()
            .any(|(k, v)| k == "alt" && v == "sse");

    PreparedRequest {
        method: original.method.clone(),
        url,
        headers,
        body,
        streaming,
        requested_model,
        effective_model,
        project_id: project_id.to_string(),
        endpoint: endpoint.label.clone(),
    }
}

fn request_id_from_parts(timestamp_ms: i64, request_uuid: Uuid) -> String {
    format!("{REQUEST_ID_PREFIX}/{timestamp_ms}/{request_uuid}")
}

fn generate_request_id() -> String {
    request_id_from_parts(Utc::now().timestamp_millis(), Uuid::new_v4())
}

fn session_id_from_int(value: i64) -> String {
    format!("-{value}")
}

fn generate_session_id() -> String {
    let value = rand::rng().random_range(0..SESSION_ID_MAX_EXCLUSIVE);
    session_id_from_int(value)
}
