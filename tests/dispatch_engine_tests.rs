use antigravity_auth::accounts::{AccountStore, PoolHandle};
use antigravity_auth::config::{Config, EndpointConfig, ResolvedConfig};
use antigravity_auth::dispatch::{DispatchEngine, HostRequest};
use antigravity_auth::error::AntigravityError;
use antigravity_auth::plugin::HostCredentials;
use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use url::Url;

#[derive(Clone, Default)]
struct CaptureState {
    reqs: Arc<Mutex<Vec<Captured>>>,
}

#[derive(Debug, Clone)]
struct Captured {
    path: String,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl CaptureState {
    fn calls(&self, path: &str) -> Vec<Captured> {
        self.reqs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    fn total(&self) -> usize {
        self.reqs.lock().unwrap().len()
    }
}

struct TestHost {
    cleared: Arc<AtomicBool>,
}

#[async_trait]
impl HostCredentials for TestHost {
    async fn get(&self) -> Option<antigravity_auth::AuthRecord> {
        None
    }
    async fn set(&self, _auth: antigravity_auth::AuthRecord) {}
    async fn clear(&self) {
        self.cleared.store(true, Ordering::SeqCst);
    }
}

fn unique_accounts_path(prefix: &str) -> std::path::PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX_EPOCH")
        .as_nanos();
    let mut temp_path = std::env::temp_dir();
    temp_path.push(format!(
        "antigravity-{prefix}-{}-{nanos}.json",
        std::process::id()
    ));
    temp_path
}

async fn spawn_test_server(app: Router) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    let base = Url::parse(&format!("http://{addr}")).expect("valid base url");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server run");
    });
    base
}

/// Token endpoint: refresh tokens prefixed `revoked` get `invalid_grant`,
/// everything else gets an access token derived from the refresh token.
async fn token_handler(
    State(state): State<CaptureState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> (StatusCode, Json<Value>) {
    state.reqs.lock().unwrap().push(Captured {
        path: "/token".to_string(),
        headers,
        body: body.to_vec(),
    });

    let form: std::collections::HashMap<String, String> =
        url::form_urlencoded::parse(&body).into_owned().collect();
    match form.get("grant_type").map(String::as_str) {
        Some("refresh_token") => {
            let refresh = form.get("refresh_token").cloned().unwrap_or_default();
            if refresh.starts_with("revoked") {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "invalid_grant" })),
                )
            } else {
                (
                    StatusCode::OK,
                    Json(json!({
                        "access_token": format!("at-{refresh}"),
                        "token_type": "bearer",
                        "expires_in": 3600
                    })),
                )
            }
        }
        other => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "unsupported_grant_type", "grant_type": other })),
        ),
    }
}

async fn spawn_token_server(captured: CaptureState) -> Url {
    let app = Router::new()
        .route("/token", post(token_handler))
        .with_state(captured);
    spawn_test_server(app).await
}

type Script = Arc<dyn Fn(&HeaderMap, usize) -> (StatusCode, HeaderMap, Value) + Send + Sync>;

/// One scripted generative endpoint; the script sees the request headers and
/// how many calls this endpoint has already served.
async fn spawn_endpoint(captured: CaptureState, script: Script) -> Url {
    let app = Router::new()
        .route(
            "/v1internal:generateContent",
            post(
                move |State(state): State<CaptureState>, headers: HeaderMap, body: axum::body::Bytes| {
                    let script = script.clone();
                    async move {
                        let seen = {
                            let mut reqs = state.reqs.lock().unwrap();
                            let seen = reqs
                                .iter()
                                .filter(|r| r.path == "/v1internal:generateContent")
                                .count();
                            reqs.push(Captured {
                                path: "/v1internal:generateContent".to_string(),
                                headers: headers.clone(),
                                body: body.to_vec(),
                            });
                            seen
                        };
                        let (status, extra_headers, value) = script(&headers, seen);
                        (status, extra_headers, Json(value))
                    }
                },
            ),
        )
        .with_state(captured);
    spawn_test_server(app).await
}

fn always(status: StatusCode, body: Value) -> Script {
    Arc::new(move |_, _| (status, HeaderMap::new(), body.clone()))
}

fn accounts_doc(accounts: &[Value]) -> Value {
    json!({ "version": 1, "accounts": accounts, "activeIndex": 0 })
}

fn account_json(refresh: &str, project: &str) -> Value {
    json!({
        "email": format!("{refresh}@example.com"),
        "refreshToken": refresh,
        "projectId": project,
        "addedAt": 1,
        "lastUsed": 1,
        "isRateLimited": false,
        "rateLimitResetTime": 0
    })
}

struct Harness {
    engine: DispatchEngine,
    pool: PoolHandle,
    cleared: Arc<AtomicBool>,
    accounts_path: std::path::PathBuf,
}

async fn harness(
    prefix: &str,
    doc: Value,
    endpoints: Vec<(&str, Url)>,
    token_url: Url,
) -> Harness {
    let accounts_path = unique_accounts_path(prefix);
    tokio::fs::write(&accounts_path, serde_json::to_vec_pretty(&doc).unwrap())
        .await
        .unwrap();

    let mut cfg: ResolvedConfig = Config::default().resolve();
    cfg.accounts_path = accounts_path.clone();
    cfg.endpoints = endpoints
        .into_iter()
        .map(|(label, base_url)| EndpointConfig {
            label: label.to_string(),
            base_url,
        })
        .collect();
    cfg.oauth_token_url = token_url.join("/token").unwrap();

    let store = AccountStore::new(accounts_path.clone());
    let pool = PoolHandle::spawn(store, None).await.expect("spawn pool");
    let cleared = Arc::new(AtomicBool::new(false));
    let host = Arc::new(TestHost {
        cleared: cleared.clone(),
    });
    let engine = DispatchEngine::new(
        Arc::new(cfg),
        pool.clone(),
        reqwest::Client::new(),
        host,
    );
    Harness {
        engine,
        pool,
        cleared,
        accounts_path,
    }
}

fn generate_request() -> HostRequest {
    HostRequest::post_json(
        Url::parse("https://cloudcode-pa.googleapis.com/v1internal:generateContent").unwrap(),
        json!({ "model": "gemini-3-flash", "request": { "contents": [] } }),
    )
}

#[tokio::test]
async fn happy_path_single_account_hits_one_endpoint() {
    let upstream = CaptureState::default();
    let tokens = CaptureState::default();
    let e1 = spawn_endpoint(upstream.clone(), always(StatusCode::OK, json!({"ok": "e1"}))).await;
    let e2 = spawn_endpoint(CaptureState::default(), always(StatusCode::OK, json!({"ok": "e2"})))
        .await;
    let token_url = spawn_token_server(tokens.clone()).await;

    let h = harness(
        "happy",
        accounts_doc(&[account_json("tok-a", "proj-a")]),
        vec![("daily", e1), ("autopush", e2)],
        token_url,
    )
    .await;

    let response = h.engine.fetch(generate_request()).await.expect("response");
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.endpoint, "daily");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ok"], "e1");

    let calls = upstream.calls("/v1internal:generateContent");
    assert_eq!(calls.len(), 1, "exactly one upstream call");
    let auth = calls[0].headers.get(header::AUTHORIZATION).unwrap();
    assert_eq!(auth, "Bearer at-tok-a");
    let sent: Value = serde_json::from_slice(&calls[0].body).unwrap();
    assert_eq!(sent["project"], "proj-a");
    assert!(sent["requestId"].as_str().unwrap().starts_with("agent/"));

    let doc = h.pool.snapshot().await.unwrap();
    assert!(doc.accounts[0].last_used > 1, "lastUsed advanced");
    let _ = tokio::fs::remove_file(&h.accounts_path).await;
}

#[tokio::test]
async fn endpoint_fallback_on_server_error() {
    let first = CaptureState::default();
    let second = CaptureState::default();
    let e1 = spawn_endpoint(
        first.clone(),
        always(StatusCode::SERVICE_UNAVAILABLE, json!({"error": "down"})),
    )
    .await;
    let e2 = spawn_endpoint(second.clone(), always(StatusCode::OK, json!({"ok": "e2"}))).await;
    let token_url = spawn_token_server(CaptureState::default()).await;

    let h = harness(
        "fallback",
        accounts_doc(&[account_json("tok-a", "proj-a")]),
        vec![("daily", e1), ("autopush", e2)],
        token_url,
    )
    .await;

    let response = h.engine.fetch(generate_request()).await.expect("response");
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.endpoint, "autopush");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ok"], "e2");

    assert_eq!(first.calls("/v1internal:generateContent").len(), 1);
    assert_eq!(second.calls("/v1internal:generateContent").len(), 1);
    let _ = tokio::fs::remove_file(&h.accounts_path).await;
}

#[tokio::test]
async fn rate_limit_cools_account_and_rotates_to_the_next() {
    let upstream = CaptureState::default();
    // Account A (bearer at-tok-a) gets a 429 with an explicit wait; everyone
    // else succeeds.
    let script: Script = Arc::new(|headers: &HeaderMap, _| {
        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if auth == "Bearer at-tok-a" {
            let mut h = HeaderMap::new();
            h.insert("retry-after-ms", "5000".parse().unwrap());
            (StatusCode::TOO_MANY_REQUESTS, h, json!({"error": "slow down"}))
        } else {
            (StatusCode::OK, HeaderMap::new(), json!({"ok": "b"}))
        }
    });
    let e1 = spawn_endpoint(upstream.clone(), script).await;
    let token_url = spawn_token_server(CaptureState::default()).await;

    let before = chrono_now_ms();
    let h = harness(
        "ratelimit",
        accounts_doc(&[
            account_json("tok-a", "proj-a"),
            account_json("tok-b", "proj-b"),
        ]),
        vec![("daily", e1)],
        token_url,
    )
    .await;

    let response = h.engine.fetch(generate_request()).await.expect("response");
    assert_eq!(response.status, StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ok"], "b");
    assert_eq!(upstream.calls("/v1internal:generateContent").len(), 2);

    let doc = h.pool.snapshot().await.unwrap();
    let a = doc
        .accounts
        .iter()
        .find(|acc| acc.refresh_token == "tok-a")
        .unwrap();
    assert!(a.is_rate_limited);
    assert!(
        a.rate_limit_reset_time >= before + 5000,
        "cooldown honors retry-after-ms: {} vs {}",
        a.rate_limit_reset_time,
        before
    );
    let _ = tokio::fs::remove_file(&h.accounts_path).await;
}

#[tokio::test]
async fn all_accounts_cooled_fails_without_any_http_call() {
    let upstream = CaptureState::default();
    let tokens = CaptureState::default();
    let e1 = spawn_endpoint(upstream.clone(), always(StatusCode::OK, json!({}))).await;
    let token_url = spawn_token_server(tokens.clone()).await;

    let now = chrono_now_ms();
    let mut a = account_json("tok-a", "proj-a");
    a["isRateLimited"] = json!(true);
    a["rateLimitResetTime"] = json!(now + 10_000);
    let mut b = account_json("tok-b", "proj-b");
    b["isRateLimited"] = json!(true);
    b["rateLimitResetTime"] = json!(now + 3_000);

    let h = harness(
        "cooled",
        accounts_doc(&[a, b]),
        vec![("daily", e1)],
        token_url,
    )
    .await;

    let err = h.engine.fetch(generate_request()).await.unwrap_err();
    let AntigravityError::AllAccountsCooled { wait_ms, accounts } = err else {
        panic!("expected AllAccountsCooled, got {err:?}");
    };
    assert_eq!(accounts, 2);
    assert!(wait_ms > 0 && wait_ms <= 3_000, "wait_ms={wait_ms}");

    assert_eq!(upstream.total(), 0, "no upstream calls");
    assert_eq!(tokens.total(), 0, "no token calls");
    let _ = tokio::fs::remove_file(&h.accounts_path).await;
}

#[tokio::test]
async fn invalid_grant_evicts_account_and_continues_with_the_next() {
    let upstream = CaptureState::default();
    let e1 = spawn_endpoint(upstream.clone(), always(StatusCode::OK, json!({"ok": true}))).await;
    let token_url = spawn_token_server(CaptureState::default()).await;

    let h = harness(
        "evict",
        accounts_doc(&[
            account_json("revoked-a", "proj-a"),
            account_json("tok-b", "proj-b"),
        ]),
        vec![("daily", e1)],
        token_url,
    )
    .await;

    let response = h.engine.fetch(generate_request()).await.expect("response");
    assert_eq!(response.status, StatusCode::OK);

    let doc = h.pool.snapshot().await.unwrap();
    assert_eq!(doc.accounts.len(), 1);
    assert_eq!(doc.accounts[0].refresh_token, "tok-b");
    assert!(!h.cleared.load(Ordering::SeqCst));

    // Eviction was persisted.
    let on_disk: Value = serde_json::from_slice(
        &tokio::fs::read(&h.accounts_path).await.unwrap(),
    )
    .unwrap();
    assert_eq!(on_disk["accounts"].as_array().unwrap().len(), 1);
    let _ = tokio::fs::remove_file(&h.accounts_path).await;
}

#[tokio::test]
async fn total_revocation_clears_host_credentials() {
    let upstream = CaptureState::default();
    let e1 = spawn_endpoint(upstream.clone(), always(StatusCode::OK, json!({}))).await;
    let token_url = spawn_token_server(CaptureState::default()).await;

    let h = harness(
        "revoked",
        accounts_doc(&[
            account_json("revoked-a", "proj-a"),
            account_json("revoked-b", "proj-b"),
        ]),
        vec![("daily", e1)],
        token_url,
    )
    .await;

    let err = h.engine.fetch(generate_request()).await.unwrap_err();
    assert!(matches!(err, AntigravityError::Reauthenticate), "{err:?}");
    assert!(h.cleared.load(Ordering::SeqCst), "host credentials cleared");
    assert_eq!(h.pool.count().await.unwrap(), 0);
    assert_eq!(upstream.total(), 0);
    let _ = tokio::fs::remove_file(&h.accounts_path).await;
}

#[tokio::test]
async fn empty_pool_raises_no_accounts_without_http() {
    let upstream = CaptureState::default();
    let tokens = CaptureState::default();
    let e1 = spawn_endpoint(upstream.clone(), always(StatusCode::OK, json!({}))).await;
    let token_url = spawn_token_server(tokens.clone()).await;

    let h = harness(
        "empty",
        accounts_doc(&[]),
        vec![("daily", e1)],
        token_url,
    )
    .await;

    let err = h.engine.fetch(generate_request()).await.unwrap_err();
    assert!(matches!(err, AntigravityError::NoAccounts), "{err:?}");
    assert!(err.to_string().contains("opencode auth login"));
    assert_eq!(upstream.total(), 0);
    assert_eq!(tokens.total(), 0);
    let _ = tokio::fs::remove_file(&h.accounts_path).await;
}

#[tokio::test]
async fn missing_project_is_discovered_and_written_back() {
    let upstream = CaptureState::default();
    let token_url = spawn_token_server(CaptureState::default()).await;

    // Endpoint serves both project discovery and generation.
    let app = Router::new()
        .route(
            "/v1internal:loadCodeAssist",
            post(
                |State(state): State<CaptureState>, headers: HeaderMap, body: axum::body::Bytes| async move {
                    state.reqs.lock().unwrap().push(Captured {
                        path: "/v1internal:loadCodeAssist".to_string(),
                        headers,
                        body: body.to_vec(),
                    });
                    Json(json!({ "cloudaicompanionProject": "managed-1", "allowedTiers": [] }))
                },
            ),
        )
        .route(
            "/v1internal:generateContent",
            post(
                |State(state): State<CaptureState>, headers: HeaderMap, body: axum::body::Bytes| async move {
                    state.reqs.lock().unwrap().push(Captured {
                        path: "/v1internal:generateContent".to_string(),
                        headers,
                        body: body.to_vec(),
                    });
                    Json(json!({ "ok": true }))
                },
            ),
        )
        .with_state(upstream.clone());
    let e1 = spawn_test_server(app).await;

    let mut account = account_json("tok-a", "");
    account.as_object_mut().unwrap().remove("projectId");
    let h = harness(
        "discover",
        accounts_doc(&[account]),
        vec![("daily", e1)],
        token_url,
    )
    .await;

    let response = h.engine.fetch(generate_request()).await.expect("response");
    assert_eq!(response.status, StatusCode::OK);

    assert_eq!(upstream.calls("/v1internal:loadCodeAssist").len(), 1);
    let gen_calls = upstream.calls("/v1internal:generateContent");
    let sent: Value = serde_json::from_slice(&gen_calls[0].body).unwrap();
    assert_eq!(sent["project"], "managed-1");

    let doc = h.pool.snapshot().await.unwrap();
    assert_eq!(
        doc.accounts[0].managed_project_id.as_deref(),
        Some("managed-1")
    );
    let _ = tokio::fs::remove_file(&h.accounts_path).await;
}

#[tokio::test]
async fn non_generative_requests_pass_through_untouched() {
    let other = CaptureState::default();
    let tokens = CaptureState::default();
    let app = Router::new()
        .route(
            "/api/other",
            post(
                |State(state): State<CaptureState>, headers: HeaderMap, body: axum::body::Bytes| async move {
                    state.reqs.lock().unwrap().push(Captured {
                        path: "/api/other".to_string(),
                        headers,
                        body: body.to_vec(),
                    });
                    Json(json!({ "plain": true }))
                },
            ),
        )
        .with_state(other.clone());
    let base = spawn_test_server(app).await;
    let token_url = spawn_token_server(tokens.clone()).await;

    let h = harness(
        "passthrough",
        accounts_doc(&[account_json("tok-a", "proj-a")]),
        vec![("daily", base.clone())],
        token_url,
    )
    .await;

    let request = HostRequest::post_json(base.join("/api/other").unwrap(), json!({"q": 1}));
    let response = h.engine.fetch(request).await.expect("response");
    assert_eq!(response.status, StatusCode::OK);

    let calls = other.calls("/api/other");
    assert_eq!(calls.len(), 1);
    assert!(
        calls[0].headers.get(header::AUTHORIZATION).is_none(),
        "no injected auth on passthrough"
    );
    let sent: Value = serde_json::from_slice(&calls[0].body).unwrap();
    assert_eq!(sent, json!({"q": 1}), "body forwarded unchanged");
    assert_eq!(tokens.total(), 0);
    let _ = tokio::fs::remove_file(&h.accounts_path).await;
}

fn chrono_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX_EPOCH")
        .as_millis() as i64
}
