use async_trait::async_trait;

/// Raw access to the reasoning session. Only [`crate::SessionLease`] calls
/// these methods; nothing else may reach the session directly.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Submit a prompt to the session. Returns once the prompt is accepted,
    /// not when the reply is finished.
    async fn submit(&self, prompt: &str) -> tether_core::Result<()>;

    /// Text of the latest reply as currently rendered, if any.
    async fn snapshot(&self) -> tether_core::Result<Option<String>>;

    /// How many replies the transcript holds, when the transport can tell.
    /// A rise after submit marks the new reply even when its text matches
    /// the previous one.
    async fn message_count(&self) -> tether_core::Result<Option<usize>> {
        Ok(None)
    }

    /// Bring a crashed or wedged session back to a usable state.
    async fn recover(&self) -> tether_core::Result<()>;
}
