use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tether_core::{OriginContext, ReplyOptions};
use tracing::info;

/// The origin of system-initiated turns (wake-ups, due tasks).
///
/// Privileged. Replies go to the configured outreach target when there is
/// one, otherwise they are only logged.
#[derive(Clone, Default)]
pub struct SystemContext {
    outreach: Option<Arc<dyn OriginContext>>,
}

impl SystemContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outreach(outreach: Arc<dyn OriginContext>) -> Self {
        Self {
            outreach: Some(outreach),
        }
    }
}

#[async_trait]
impl OriginContext for SystemContext {
    async fn reply(&self, text: &str, options: ReplyOptions) -> tether_core::Result<()> {
        match &self.outreach {
            Some(target) => target.reply(text, options).await,
            None => {
                info!(reply = text, "system turn reply");
                Ok(())
            }
        }
    }

    async fn send_document(&self, path: &Path) -> tether_core::Result<()> {
        match &self.outreach {
            Some(target) => target.send_document(path).await,
            None => {
                info!(path = %path.display(), "system turn document");
                Ok(())
            }
        }
    }

    async fn send_typing(&self) -> tether_core::Result<()> {
        Ok(())
    }

    fn is_privileged(&self) -> bool {
        true
    }

    fn platform_id(&self) -> &str {
        "system"
    }
}
