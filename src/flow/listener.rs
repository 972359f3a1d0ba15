use crate::error::AntigravityError;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, info};
use url::Url;

pub const CALLBACK_PATH: &str = "/oauth-callback";

/// Code and state captured from the provider redirect.
#[derive(Debug, Clone)]
pub struct RedirectQuery {
    pub code: String,
    pub state: Option<String>,
}

type CaptureSlot = Arc<Mutex<Option<oneshot::Sender<RedirectQuery>>>>;

/// One-shot loopback listener for the headful OAuth redirect.
///
/// Binds an ephemeral 127.0.0.1 port and resolves on the first redirect that
/// carries an authorization code. The server task is shut down on every exit
/// path: resolution, error, and drop.
pub struct LoopbackListener {
    redirect_uri: Url,
    result_rx: oneshot::Receiver<RedirectQuery>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: tokio::task::JoinHandle<()>,
}

impl LoopbackListener {
    pub async fn bind() -> Result<Self, AntigravityError> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let redirect_uri = Url::parse(&format!("http://localhost:{}{CALLBACK_PATH}", addr.port()))?;

        let (result_tx, result_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let slot: CaptureSlot = Arc::new(Mutex::new(Some(result_tx)));

        let app = Router::new()
            .route(CALLBACK_PATH, get(capture_redirect))
            .with_state(slot);

        let server = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                debug!(error = %e, "loopback listener exited with error");
            }
        });

        info!(port = addr.port(), "loopback OAuth listener bound");
        Ok(Self {
            redirect_uri,
            result_rx,
            shutdown_tx: Some(shutdown_tx),
            server,
        })
    }

    /// The redirect URI the authorization URL must carry.
    pub fn redirect_uri(&self) -> Url {
        self.redirect_uri.clone()
    }

    /// Resolve on the first matching redirect, then close the listener.
    pub async fn wait(mut self) -> Result<RedirectQuery, AntigravityError> {
        let result = (&mut self.result_rx).await;
        self.close();
        result.map_err(|_| {
            AntigravityError::Unexpected("loopback listener closed before a redirect arrived".to_string())
        })
    }

    fn close(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for LoopbackListener {
    fn drop(&mut self) {
        self.close();
        // Graceful shutdown needs the task to be polled again; aborting is
        // the deterministic fallback when the flow is cancelled mid-wait.
        self.server.abort();
    }
}

async fn capture_redirect(
    State(slot): State<CaptureSlot>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let code = params
        .get("code")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let state = params
        .get("state")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let Some(code) = code else {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };

    let sender = slot.lock().ok().and_then(|mut guard| guard.take());
    match sender {
        Some(sender) => {
            let _ = sender.send(RedirectQuery { code, state });
            (
                StatusCode::OK,
                "Antigravity sign-in complete. You can close this window.",
            )
                .into_response()
        }
        // A second redirect raced the first; the flow already resolved.
        None => (StatusCode::GONE, "Authorization already completed").into_response(),
    }
}
