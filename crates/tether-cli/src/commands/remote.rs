//! Commands that talk to a running relay over its HTTP API.

use anyhow::{Context, anyhow};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{Value, json};
use uuid::Uuid;

use tether_config::TetherConfig;
use tether_core::TetherError;

use super::PatchAction;

struct RelayClient {
    client: Client,
    base: String,
    api_key: Option<String>,
}

impl RelayClient {
    fn new(config: &TetherConfig) -> Self {
        Self {
            client: Client::builder().tcp_keepalive(None).build().unwrap_or_default(),
            base: format!("http://{}", config.server.listen),
            api_key: config.server.api_key.clone(),
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn get(&self, path: &str) -> tether_core::Result<Value> {
        let req = self.authorized(self.client.get(format!("{}{path}", self.base)));
        self.send(req).await
    }

    async fn post(&self, path: &str, body: Option<Value>) -> tether_core::Result<Value> {
        let mut req = self.client.post(format!("{}{path}", self.base));
        if let Some(body) = body {
            req = req.json(&body);
        }
        self.send(self.authorized(req)).await
    }

    async fn send(&self, req: RequestBuilder) -> tether_core::Result<Value> {
        let resp = req
            .send()
            .await
            .with_context(|| format!("relay is not reachable at {}", self.base))?;
        decode(resp).await
    }
}

async fn decode(resp: Response) -> tether_core::Result<Value> {
    let status = resp.status();
    let body: Value = resp
        .json()
        .await
        .unwrap_or_else(|_| json!({ "error": status.to_string() }));
    if status.is_success() {
        return Ok(body);
    }
    let message = body["error"].as_str().unwrap_or("request failed");
    Err(TetherError::Other(anyhow!("{status}: {message}")))
}

fn print_json(value: &Value) -> tether_core::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(super) async fn cmd_status(config: &TetherConfig) -> tether_core::Result<()> {
    let client = RelayClient::new(config);
    let status = client.get("/api/v1/status").await?;
    print_json(&status)
}

pub(super) async fn cmd_send(config: &TetherConfig, message: &str) -> tether_core::Result<()> {
    let client = RelayClient::new(config);
    let resp = client
        .post("/api/v1/chat", Some(json!({ "message": message })))
        .await?;

    if let Some(replies) = resp["replies"].as_array() {
        for reply in replies.iter().filter_map(Value::as_str) {
            println!("{reply}\n");
        }
    }
    if let Some(documents) = resp["documents"].as_array() {
        for doc in documents.iter().filter_map(Value::as_str) {
            println!("[document] {doc}");
        }
    }
    if let Some(outcomes) = resp["outcomes"].as_array() {
        for outcome in outcomes.iter().filter(|o| o["is_error"] == true) {
            eprintln!(
                "[tool {}] {}",
                outcome["tool_name"].as_str().unwrap_or("?"),
                outcome["content"].as_str().unwrap_or("")
            );
        }
    }
    if resp["degraded"] == true {
        eprintln!("(response did not follow the action protocol; shown as plain text)");
    }
    Ok(())
}

pub(super) async fn cmd_patch(config: &TetherConfig, action: PatchAction) -> tether_core::Result<()> {
    let client = RelayClient::new(config);
    match action {
        PatchAction::List => {
            let patches = client.get("/api/v1/patches").await?;
            print_json(&patches)
        }
        PatchAction::Deploy { id } => {
            let id = parse_id(&id)?;
            let patch = client
                .post(&format!("/api/v1/patches/{id}/deploy"), None)
                .await?;
            println!("deployed {} to {}", id, patch["target_path"].as_str().unwrap_or("?"));
            Ok(())
        }
        PatchAction::Drop { id } => {
            let id = parse_id(&id)?;
            client.post(&format!("/api/v1/patches/{id}/drop"), None).await?;
            println!("dropped {id}");
            Ok(())
        }
    }
}

fn parse_id(raw: &str) -> tether_core::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| TetherError::Parse(format!("invalid patch id {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id_rejects_garbage() {
        assert!(matches!(parse_id("nope"), Err(TetherError::Parse(_))));
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_client_targets_listen_address() {
        let mut config = TetherConfig::default();
        config.server.listen = "127.0.0.1:9999".into();
        config.server.api_key = Some("k".into());
        let client = RelayClient::new(&config);
        assert_eq!(client.base, "http://127.0.0.1:9999");
        assert_eq!(client.api_key.as_deref(), Some("k"));
    }
}
