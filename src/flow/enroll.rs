use super::listener::LoopbackListener;
use super::manual::resolve_pasted_input;
use super::{FlowState, PendingAuthorization, is_headless};
use crate::accounts::{EnrolledAccount, PoolHandle};
use crate::config::ResolvedConfig;
use crate::error::AntigravityError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

/// Interactive CLI enrollment: authorize accounts one at a time, up to the
/// configured cap, prompting for an optional project id per iteration.
pub async fn login(
    cfg: &ResolvedConfig,
    pool: &PoolHandle,
    http_client: &reqwest::Client,
) -> Result<(), AntigravityError> {
    let mut enrolled = 0usize;
    loop {
        let project_id = prompt("Google Cloud project id (leave blank for a managed project): ")
            .await?
            .trim()
            .to_string();
        let project_id = (!project_id.is_empty()).then_some(project_id);

        match authorize_interactively(cfg, project_id, http_client).await {
            Ok(account) => {
                let total = pool.enroll(account.clone()).await?;
                enrolled += 1;
                println!(
                    "Signed in as {} ({total} account(s) in the pool).",
                    display_email(&account)
                );
            }
            Err(e) => {
                warn!(error = %e, "account authorization failed");
                println!("Authorization failed: {e}");
            }
        }

        if enrolled >= cfg.max_accounts {
            println!("Reached the {} account limit.", cfg.max_accounts);
            break;
        }
        let again = prompt("Add another account? [y/N]: ").await?;
        if !matches!(again.trim(), "y" | "Y" | "yes" | "Yes") {
            break;
        }
    }

    if enrolled == 0 {
        println!("No accounts were added.");
    }
    Ok(())
}

/// Single-account connect: the same machinery without the project prompt.
pub async fn connect(
    cfg: &ResolvedConfig,
    pool: &PoolHandle,
    http_client: &reqwest::Client,
) -> Result<EnrolledAccount, AntigravityError> {
    let account = authorize_interactively(cfg, None, http_client).await?;
    pool.enroll(account.clone()).await?;
    info!(email = %account.email, "account connected");
    Ok(account)
}

/// Drive one authorization through the flow states, picking the callback
/// source from the environment: a loopback redirect when a browser is
/// reachable, pasted input otherwise.
async fn authorize_interactively(
    cfg: &ResolvedConfig,
    project_id: Option<String>,
    http_client: &reqwest::Client,
) -> Result<EnrolledAccount, AntigravityError> {
    if is_headless() {
        let mut pending =
            PendingAuthorization::begin(cfg, cfg.oauth_manual_redirect_url.clone(), project_id)?;
        println!("\nOpen this URL in a browser to authorize:\n\n  {}\n", pending.url);
        pending.advance(FlowState::AwaitingCallback);

        let input = prompt("Paste the redirect URL (or just the authorization code): ").await?;
        let pasted = resolve_pasted_input(&input)?;
        return Ok(pending
            .exchange(&pasted.code, pasted.state.as_deref(), cfg, http_client)
            .await?);
    }

    let listener = LoopbackListener::bind().await?;
    let mut pending = PendingAuthorization::begin(cfg, listener.redirect_uri(), project_id)?;

    println!("\nOpening your browser to sign in with Google...");
    if !open_browser(pending.url.as_str()) {
        println!("Could not open a browser. Visit:\n\n  {}\n", pending.url);
    }
    pending.advance(FlowState::AwaitingCallback);

    let redirect = listener.wait().await?;
    Ok(pending
        .exchange(&redirect.code, redirect.state.as_deref(), cfg, http_client)
        .await?)
}

fn display_email(account: &EnrolledAccount) -> &str {
    if account.email.is_empty() {
        "<unknown account>"
    } else {
        &account.email
    }
}

/// Write a prompt and read one line from the terminal. The stdin handle is
/// released between prompts.
async fn prompt(message: &str) -> Result<String, AntigravityError> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(message.as_bytes()).await?;
    stdout.flush().await?;

    let mut line = String::new();
    let mut reader = BufReader::new(tokio::io::stdin());
    reader.read_line(&mut line).await?;
    Ok(line)
}

fn open_browser(url: &str) -> bool {
    #[cfg(target_os = "macos")]
    let launcher = "open";
    #[cfg(target_os = "windows")]
    let launcher = "explorer";
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let launcher = "xdg-open";

    std::process::Command::new(launcher)
        .arg(url)
        .spawn()
        .is_ok()
}
