//! # Session output protocol
//!
//! The session answers in free text that may carry up to three independent
//! blocks, in any order and any subset:
//!
//! ```text
//! <reply>Text for the person who asked.</reply>
//! <actions>[{"tool": "memory_recall", "args": {"query": "birthday"}}]</actions>
//! <memory>["Prefers short answers"]</memory>
//! ```
//!
//! Without a reply block, whatever text sits outside the other blocks is the
//! reply. A malformed action plan gets one repair pass (code fences and
//! trailing commas stripped); if that still fails the whole output is treated
//! as a plain reply and nothing else is dispatched.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tether_core::ToolInvocation;
use tracing::warn;

static REPLY_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<reply>(.*?)</reply>").expect("valid regex"));
static ACTIONS_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<actions>(.*?)</actions>").expect("valid regex"));
static MEMORY_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<memory>(.*?)</memory>").expect("valid regex"));
static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*\s*(.*?)\s*```$").expect("valid regex"));
static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[\]}])").expect("valid regex"));

/// One entry destined for the memory collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryImprint {
    pub text: String,
    pub tags: Vec<String>,
}

/// The three streams separated out of one raw session output.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProtocolEnvelope {
    pub reply: Option<String>,
    pub actions: Vec<ToolInvocation>,
    pub memories: Vec<MemoryImprint>,
    /// The action plan could not be parsed; `reply` holds the raw output.
    pub degraded: bool,
}

impl ProtocolEnvelope {
    fn reply_only(text: &str) -> Self {
        Self {
            reply: Some(text.to_string()).filter(|t| !t.trim().is_empty()),
            ..Default::default()
        }
    }
}

pub fn parse(raw: &str) -> ProtocolEnvelope {
    let replies: Vec<&str> = captures(&REPLY_BLOCK, raw);
    let action_blocks: Vec<&str> = captures(&ACTIONS_BLOCK, raw);
    let memory_blocks: Vec<&str> = captures(&MEMORY_BLOCK, raw);

    if replies.is_empty() && action_blocks.is_empty() && memory_blocks.is_empty() {
        return ProtocolEnvelope::reply_only(raw.trim());
    }

    let mut actions = Vec::new();
    for block in &action_blocks {
        match parse_plan(block) {
            Ok(mut items) => actions.append(&mut items),
            Err(reason) => {
                warn!(%reason, "action plan unparseable, delivering output as plain reply");
                let mut envelope = ProtocolEnvelope::reply_only(raw);
                envelope.degraded = true;
                return envelope;
            }
        }
    }

    let memories = memory_blocks
        .iter()
        .flat_map(|block| parse_memory(block))
        .collect();

    let reply = if replies.is_empty() {
        let outside = ACTIONS_BLOCK.replace_all(raw, "");
        let outside = MEMORY_BLOCK.replace_all(&outside, "");
        Some(outside.trim().to_string())
    } else {
        Some(
            replies
                .iter()
                .map(|r| r.trim())
                .filter(|r| !r.is_empty())
                .collect::<Vec<_>>()
                .join("\n\n"),
        )
    }
    .filter(|r| !r.is_empty());

    ProtocolEnvelope {
        reply,
        actions,
        memories,
        degraded: false,
    }
}

fn captures<'a>(re: &Regex, raw: &'a str) -> Vec<&'a str> {
    re.captures_iter(raw)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

/// Parse an action plan, with one repair attempt on failure.
fn parse_plan(block: &str) -> Result<Vec<ToolInvocation>, String> {
    let body = block.trim();
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let value = match serde_json::from_str::<Value>(body) {
        Ok(v) => v,
        Err(first) => serde_json::from_str::<Value>(&repair(body))
            .map_err(|e| format!("{first}; after repair: {e}"))?,
    };

    match value {
        Value::Array(items) => items.into_iter().map(plan_item).collect(),
        item @ Value::Object(_) => Ok(vec![plan_item(item)?]),
        other => Err(format!("action plan must be a list, got {other}")),
    }
}

fn repair(body: &str) -> String {
    let unfenced = match CODE_FENCE.captures(body) {
        Some(c) => c.get(1).map(|m| m.as_str()).unwrap_or(body).to_string(),
        None => body.to_string(),
    };
    TRAILING_COMMA.replace_all(&unfenced, "$1").into_owned()
}

fn plan_item(item: Value) -> Result<ToolInvocation, String> {
    let Value::Object(mut obj) = item else {
        return Err("action item is not an object".into());
    };
    let name = obj
        .get("tool")
        .or_else(|| obj.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or("action item has no tool name")?;
    let args = obj
        .remove("args")
        .or_else(|| obj.remove("arguments"))
        .unwrap_or_else(|| Value::Object(Default::default()));
    Ok(ToolInvocation::new(name, args))
}

/// A JSON list of strings or `{text, tags}` objects, else one entry per line.
fn parse_memory(block: &str) -> Vec<MemoryImprint> {
    let body = block.trim();
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(body) {
        return items.into_iter().filter_map(memory_item).collect();
    }
    body.lines()
        .map(|l| l.trim().trim_start_matches(['-', '*']).trim())
        .filter(|l| !l.is_empty())
        .map(|l| MemoryImprint {
            text: l.to_string(),
            tags: Vec::new(),
        })
        .collect()
}

fn memory_item(item: Value) -> Option<MemoryImprint> {
    match item {
        Value::String(s) if !s.trim().is_empty() => Some(MemoryImprint {
            text: s.trim().to_string(),
            tags: Vec::new(),
        }),
        Value::Object(obj) => {
            let text = obj.get("text")?.as_str()?.trim().to_string();
            if text.is_empty() {
                return None;
            }
            let tags = obj
                .get("tags")
                .and_then(Value::as_array)
                .map(|t| {
                    t.iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default();
            Some(MemoryImprint { text, tags })
        }
        _ => None,
    }
}
