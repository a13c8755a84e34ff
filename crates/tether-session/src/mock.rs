//! Scripted session transport for tests.
//!
//! Each submitted prompt consumes the next script: a list of snapshot frames
//! the transcript shows while the reply "streams". The last frame stays on
//! screen until the next prompt.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use tether_core::TetherError;

use crate::transport::SessionTransport;

#[derive(Default)]
struct State {
    scripts: VecDeque<Vec<String>>,
    frames: Vec<String>,
    cursor: usize,
    displayed: Option<String>,
    messages: usize,
    prompts: Vec<String>,
    failing_submits: u32,
    failing_recoveries: u32,
    recover_calls: u32,
}

/// A [`SessionTransport`] that plays back canned transcript frames.
#[derive(Default)]
pub struct ScriptedTransport {
    state: Mutex<State>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the frames shown for the next unanswered prompt.
    pub fn script<I, S>(&self, frames: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let frames = frames.into_iter().map(Into::into).collect();
        self.state.lock().scripts.push_back(frames);
        self
    }

    /// Queue a reply that appears in one piece.
    pub fn reply(&self, text: impl Into<String>) -> &Self {
        self.script([text.into()])
    }

    /// Text already on screen before the first prompt.
    pub fn with_transcript(self, text: impl Into<String>) -> Self {
        let mut state = self.state.lock();
        state.displayed = Some(text.into());
        state.messages = 1;
        drop(state);
        self
    }

    /// Make the next `n` submits fail as if the page had crashed.
    pub fn fail_submits(&self, n: u32) {
        self.state.lock().failing_submits = n;
    }

    /// Make the next `n` recovery attempts fail.
    pub fn fail_recoveries(&self, n: u32) {
        self.state.lock().failing_recoveries = n;
    }

    /// Prompts submitted so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.state.lock().prompts.clone()
    }

    pub fn recover_calls(&self) -> u32 {
        self.state.lock().recover_calls
    }

    /// Scripts not yet consumed.
    pub fn remaining_scripts(&self) -> usize {
        self.state.lock().scripts.len()
    }
}

#[async_trait]
impl SessionTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn submit(&self, prompt: &str) -> tether_core::Result<()> {
        let mut state = self.state.lock();
        if state.failing_submits > 0 {
            state.failing_submits -= 1;
            return Err(TetherError::SessionCrash("scripted page crash".into()));
        }
        state.prompts.push(prompt.to_string());
        // Without a script the session stays silent.
        state.frames = state.scripts.pop_front().unwrap_or_default();
        state.cursor = 0;
        Ok(())
    }

    async fn snapshot(&self) -> tether_core::Result<Option<String>> {
        let mut state = self.state.lock();
        if state.cursor < state.frames.len() {
            let frame = state.frames[state.cursor].clone();
            if state.cursor == 0 {
                state.messages += 1;
            }
            state.cursor += 1;
            state.displayed = Some(frame);
        }
        Ok(state.displayed.clone())
    }

    async fn message_count(&self) -> tether_core::Result<Option<usize>> {
        Ok(Some(self.state.lock().messages))
    }

    async fn recover(&self) -> tether_core::Result<()> {
        let mut state = self.state.lock();
        state.recover_calls += 1;
        if state.failing_recoveries > 0 {
            state.failing_recoveries -= 1;
            return Err(TetherError::SessionCrash("scripted reload failed".into()));
        }
        state.frames.clear();
        state.cursor = 0;
        Ok(())
    }
}
