//! Session transport over the Chrome DevTools Protocol (CDP).
//!
//! The reasoning session is a chat page open in a Chromium instance started
//! with `--remote-debugging-port`. Prompts are typed into the page's input and
//! sent by clicking its send button; replies are read back as the inner text
//! of the last assistant message.
//!
//! ```text
//!   SessionLease
//!       │
//!       ▼
//!   BrowserTransport   ← finds the chat tab, builds page scripts
//!       │
//!       └── CdpClient  ← /json/list over HTTP, Runtime.evaluate over WebSocket
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tether_config::schema::SessionConfig;
use tether_core::TetherError;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::transport::SessionTransport;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const READY_CHECKS: u32 = 20;
const READY_INTERVAL: Duration = Duration::from_millis(500);

fn cdp_err(context: &str, e: impl std::fmt::Display) -> TetherError {
    TetherError::SessionCrash(format!("{context}: {e}"))
}

// ─── CDP Client ──────────────────────────────────────────────────

/// One debuggable page as listed by `/json/list`.
#[derive(Debug, Clone, Deserialize)]
struct PageTarget {
    id: String,
    #[serde(default)]
    url: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    ws_url: Option<String>,
}

/// Low-level CDP client: HTTP for discovery, one WebSocket per command.
struct CdpClient {
    base_url: String,
    http: reqwest::Client,
}

impl CdpClient {
    fn new(port: u16) -> Self {
        Self {
            base_url: format!("http://127.0.0.1:{port}"),
            http: reqwest::Client::new(),
        }
    }

    async fn list_pages(&self) -> tether_core::Result<Vec<PageTarget>> {
        let url = format!("{}/json/list", self.base_url);
        let targets: Vec<PageTarget> = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| cdp_err("CDP list tabs failed", e))?
            .json()
            .await
            .map_err(|e| cdp_err("CDP parse tabs failed", e))?;
        Ok(targets.into_iter().filter(|t| t.kind == "page").collect())
    }

    /// Send one CDP command and wait for the response with the same id.
    async fn send_command(
        &self,
        ws_url: &str,
        method: &str,
        params: Value,
    ) -> tether_core::Result<Value> {
        let message = json!({ "id": 1, "method": method, "params": params });
        let (mut ws, _) = connect_async(ws_url)
            .await
            .map_err(|e| cdp_err("WebSocket connect failed", e))?;

        ws.send(Message::Text(message.to_string().into()))
            .await
            .map_err(|e| cdp_err("WebSocket send failed", e))?;

        // Chrome may send event notifications before our response.
        let result = tokio::time::timeout(COMMAND_TIMEOUT, async {
            while let Some(msg) = ws.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Ok(resp) = serde_json::from_str::<Value>(&text)
                            && resp.get("id").and_then(Value::as_i64) == Some(1)
                        {
                            return Ok(resp);
                        }
                    }
                    Ok(_) => continue,
                    Err(e) => return Err(cdp_err("WebSocket read error", e)),
                }
            }
            Err(TetherError::SessionCrash(
                "WebSocket closed before response received".into(),
            ))
        })
        .await;

        let _ = ws.close(None).await;

        match result {
            Ok(Ok(resp)) => {
                if let Some(err) = resp.get("error") {
                    return Err(cdp_err(&format!("CDP {method} failed"), err));
                }
                Ok(resp["result"].clone())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TetherError::SessionCrash(format!(
                "CDP {method} timed out ({}s)",
                COMMAND_TIMEOUT.as_secs()
            ))),
        }
    }
}

// ─── Page scripts ────────────────────────────────────────────────

/// JSON string literals are valid JavaScript string literals.
fn js_str(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn submit_script(input: &str, send: &str, prompt: &str) -> String {
    format!(
        r#"(() => {{
  const input = document.querySelector({input});
  if (!input) return "missing-input";
  const text = {prompt};
  if (input.isContentEditable) {{
    input.innerText = text;
  }} else {{
    const desc = Object.getOwnPropertyDescriptor(Object.getPrototypeOf(input), "value");
    if (desc && desc.set) {{ desc.set.call(input, text); }} else {{ input.value = text; }}
  }}
  input.dispatchEvent(new Event("input", {{ bubbles: true }}));
  const button = document.querySelector({send});
  if (!button) return "missing-send";
  button.click();
  return "ok";
}})()"#,
        input = js_str(input),
        send = js_str(send),
        prompt = js_str(prompt),
    )
}

fn snapshot_script(transcript: &str) -> String {
    format!(
        r#"(() => {{
  const nodes = document.querySelectorAll({sel});
  if (!nodes.length) return null;
  return nodes[nodes.length - 1].innerText;
}})()"#,
        sel = js_str(transcript),
    )
}

fn count_script(transcript: &str) -> String {
    format!("document.querySelectorAll({}).length", js_str(transcript))
}

fn ready_script(input: &str) -> String {
    format!("!!document.querySelector({})", js_str(input))
}

// ─── Transport ───────────────────────────────────────────────────

/// Drives a chat page in a running Chromium over CDP.
pub struct BrowserTransport {
    cdp: CdpClient,
    settings: SessionConfig,
    ws_url: Mutex<Option<String>>,
}

impl BrowserTransport {
    pub fn new(settings: SessionConfig) -> Self {
        Self {
            cdp: CdpClient::new(settings.cdp_port),
            settings,
            ws_url: Mutex::new(None),
        }
    }

    /// WebSocket URL of the chat tab, located on first use.
    async fn page(&self) -> tether_core::Result<String> {
        if let Some(url) = self.ws_url.lock().clone() {
            return Ok(url);
        }
        let pages = self.cdp.list_pages().await?;
        let tab = pages
            .into_iter()
            .find(|p| p.url.contains(&self.settings.page_url_match))
            .ok_or_else(|| {
                TetherError::SessionCrash(format!(
                    "no open tab matches '{}'",
                    self.settings.page_url_match
                ))
            })?;
        let url = tab
            .ws_url
            .ok_or_else(|| TetherError::SessionCrash(format!("tab {} has no debugger URL", tab.id)))?;
        info!(tab = %tab.id, page = %tab.url, "attached to session tab");
        *self.ws_url.lock() = Some(url.clone());
        Ok(url)
    }

    async fn evaluate(&self, expression: String) -> tether_core::Result<Value> {
        let ws_url = self.page().await?;
        let result = self
            .cdp
            .send_command(
                &ws_url,
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await;
        let result = match result {
            Ok(r) => r,
            Err(e) => {
                // The tab may have been closed or replaced; look it up again next time.
                *self.ws_url.lock() = None;
                return Err(e);
            }
        };
        if let Some(details) = result.get("exceptionDetails") {
            let text = details["exception"]["description"]
                .as_str()
                .or_else(|| details["text"].as_str())
                .unwrap_or("script exception");
            return Err(TetherError::SessionCrash(format!("page script failed: {text}")));
        }
        Ok(result["result"]["value"].clone())
    }
}

#[async_trait]
impl SessionTransport for BrowserTransport {
    fn name(&self) -> &str {
        "browser"
    }

    async fn submit(&self, prompt: &str) -> tether_core::Result<()> {
        let script = submit_script(
            &self.settings.input_selector,
            &self.settings.send_selector,
            prompt,
        );
        match self.evaluate(script).await?.as_str() {
            Some("ok") => Ok(()),
            Some(other) => Err(TetherError::SessionCrash(format!("submit failed: {other}"))),
            None => Err(TetherError::SessionCrash("submit returned no status".into())),
        }
    }

    async fn snapshot(&self) -> tether_core::Result<Option<String>> {
        let value = self
            .evaluate(snapshot_script(&self.settings.transcript_selector))
            .await?;
        Ok(value.as_str().map(String::from))
    }

    async fn message_count(&self) -> tether_core::Result<Option<usize>> {
        let value = self
            .evaluate(count_script(&self.settings.transcript_selector))
            .await?;
        Ok(value.as_u64().map(|n| n as usize))
    }

    async fn recover(&self) -> tether_core::Result<()> {
        *self.ws_url.lock() = None;
        let ws_url = self.page().await?;
        self.cdp
            .send_command(&ws_url, "Page.reload", json!({ "ignoreCache": true }))
            .await?;
        debug!("session page reloading");

        for _ in 0..READY_CHECKS {
            tokio::time::sleep(READY_INTERVAL).await;
            match self.evaluate(ready_script(&self.settings.input_selector)).await {
                Ok(Value::Bool(true)) => return Ok(()),
                Ok(_) => continue,
                Err(e) => warn!(error = %e, "session page not ready yet"),
            }
        }
        Err(TetherError::SessionCrash(
            "session page did not become ready after reload".into(),
        ))
    }
}
