use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Delivery options for a reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyOptions {
    /// Platform message ID to reply to, if any.
    #[serde(default)]
    pub reply_to: Option<String>,
    /// Whether the text carries markdown the platform should render.
    #[serde(default)]
    pub markdown: bool,
}

impl ReplyOptions {
    pub fn markdown() -> Self {
        Self {
            reply_to: None,
            markdown: true,
        }
    }
}

/// The capability set an inbound origin hands to the relay. Implemented by
/// bot adapters, the HTTP surface, and the system context for self-originated
/// requests.
#[async_trait]
pub trait OriginContext: Send + Sync {
    /// Deliver reply text to the origin.
    async fn reply(&self, text: &str, options: ReplyOptions) -> crate::Result<()>;

    /// Deliver a document from the local filesystem.
    async fn send_document(&self, path: &Path) -> crate::Result<()>;

    /// Show a typing indicator. Best effort.
    async fn send_typing(&self) -> crate::Result<()>;

    /// Whether this origin may run tools outside the allow-list.
    fn is_privileged(&self) -> bool;

    /// Platform identifier (e.g. "telegram", "http", "system").
    fn platform_id(&self) -> &str;
}
