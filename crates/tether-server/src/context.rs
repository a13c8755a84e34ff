use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tether_core::{OriginContext, ReplyOptions};

/// Origin context for one HTTP chat request. Collects whatever the turn
/// delivers so the handler can return it in the response body.
pub struct HttpContext {
    privileged: bool,
    replies: Mutex<Vec<String>>,
    documents: Mutex<Vec<PathBuf>>,
}

impl HttpContext {
    pub fn new(privileged: bool) -> Self {
        Self {
            privileged,
            replies: Mutex::new(Vec::new()),
            documents: Mutex::new(Vec::new()),
        }
    }

    pub fn replies(&self) -> Vec<String> {
        self.replies.lock().clone()
    }

    pub fn documents(&self) -> Vec<PathBuf> {
        self.documents.lock().clone()
    }
}

#[async_trait]
impl OriginContext for HttpContext {
    async fn reply(&self, text: &str, _options: ReplyOptions) -> tether_core::Result<()> {
        self.replies.lock().push(text.to_string());
        Ok(())
    }

    async fn send_document(&self, path: &Path) -> tether_core::Result<()> {
        self.documents.lock().push(path.to_path_buf());
        Ok(())
    }

    async fn send_typing(&self) -> tether_core::Result<()> {
        Ok(())
    }

    fn is_privileged(&self) -> bool {
        self.privileged
    }

    fn platform_id(&self) -> &str {
        "http"
    }
}
