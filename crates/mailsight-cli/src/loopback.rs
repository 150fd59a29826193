//! Loopback HTTP listener that catches the authorization redirect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use mailsight_auth_bridge::CallbackParams;
use tiny_http::{Header, Request, Response, Server};
use tracing::debug;

pub struct CallbackListener {
    server: Arc<Server>,
    path: String,
}

/// A redirect that has arrived but not been answered yet.
pub struct PendingCallback {
    request: Request,
    pub params: CallbackParams,
}

impl CallbackListener {
    pub fn bind(addr: &str, path: &str) -> Result<Self> {
        let server = Server::http(addr)
            .map_err(|e| anyhow!("Failed to start callback server on {}: {}", addr, e))?;
        Ok(Self {
            server: Arc::new(server),
            path: path.to_string(),
        })
    }

    /// Wait for the redirect. Anything else that hits the listener gets a 404.
    pub async fn wait(&self, timeout: Duration) -> Result<PendingCallback> {
        let server = self.server.clone();
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || {
            let deadline = Instant::now() + timeout;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    bail!("No callback received within {}s", timeout.as_secs());
                }
                let Some(request) = server
                    .recv_timeout(remaining)
                    .context("Callback server failed")?
                else {
                    continue;
                };

                let target = request.url().to_string();
                let request_path = target.split('?').next().unwrap_or("");
                if request_path != path {
                    debug!(path = request_path, "ignoring unrelated request");
                    let _ = request.respond(Response::from_string("Not found").with_status_code(404));
                    continue;
                }

                let params = CallbackParams::parse(&target)
                    .with_context(|| format!("Unreadable callback: {}", target))?;
                return Ok(PendingCallback { request, params });
            }
        })
        .await
        .context("Callback listener task failed")?
    }
}

impl PendingCallback {
    /// Answer the browser with a small page.
    pub fn respond(self, outcome: Result<&str, &str>) {
        let (title, detail) = match outcome {
            Ok(detail) => ("Connected", detail),
            Err(detail) => ("Sign-in failed", detail),
        };
        let body = format!(
            "<html><body><h1>{}</h1><p>{}</p><p>You can close this window and return to the terminal.</p></body></html>",
            escape_html(title),
            escape_html(detail)
        );
        let mut response = Response::from_string(body);
        if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..]) {
            response = response.with_header(header);
        }
        let _ = self.request.respond(response);
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
