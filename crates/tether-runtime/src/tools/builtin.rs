use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tether_autonomy::PatchPipeline;
use tether_core::{TetherError, ToolSpec};
use tether_memory::Memory;
use tracing::info;

use super::registry::{ToolContext, ToolHandler, ToolOutput, ToolRegistry};

const SHELL_STDOUT_LIMIT: usize = 10_000;
const SHELL_STDERR_LIMIT: usize = 5_000;

/// Collaborators the built-in tools reach into.
#[derive(Clone)]
pub struct BuiltinServices {
    pub memory: Arc<dyn Memory>,
    pub patches: Arc<PatchPipeline>,
    pub recall_limit: usize,
    pub shell_timeout: Duration,
}

pub fn register_builtins(registry: &mut ToolRegistry, services: &BuiltinServices) {
    registry.register(Arc::new(CurrentTime));
    registry.register(Arc::new(MemoryRecall {
        memory: Arc::clone(&services.memory),
        default_limit: services.recall_limit.max(1),
    }));
    registry.register(Arc::new(ScheduleTask {
        memory: Arc::clone(&services.memory),
    }));
    registry.register(Arc::new(SendDocument));
    registry.register(Arc::new(ProposePatch {
        patches: Arc::clone(&services.patches),
    }));
    registry.register(Arc::new(ShellExec {
        timeout: services.shell_timeout,
    }));
}

fn execution_error(tool: &str, reason: impl Into<String>) -> TetherError {
    TetherError::ToolExecution {
        tool: tool.into(),
        reason: reason.into(),
    }
}

fn argument_error(tool: &str, reason: impl Into<String>) -> TetherError {
    TetherError::ToolArguments {
        tool: tool.into(),
        reason: reason.into(),
    }
}

// ── current_time ───────────────────────────────────────────────

pub struct CurrentTime;

#[async_trait]
impl ToolHandler for CurrentTime {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "current_time".into(),
            description: "Current date and time in UTC (RFC 3339).".into(),
            parameters: json!({ "type": "object", "properties": {} }),
            privileged_only: false,
            needs_feedback: true,
        }
    }

    async fn call(&self, _args: Value, _ctx: ToolContext) -> tether_core::Result<ToolOutput> {
        let now = Utc::now();
        Ok(ToolOutput::text(now.to_rfc3339()).with_data(json!({ "unix": now.timestamp() })))
    }
}

// ── memory_recall ──────────────────────────────────────────────

pub struct MemoryRecall {
    memory: Arc<dyn Memory>,
    default_limit: usize,
}

#[async_trait]
impl ToolHandler for MemoryRecall {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "memory_recall".into(),
            description: "Recall stored memories relevant to a query, best match first.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "What to look for" },
                    "limit": { "type": "integer", "description": "Maximum results" }
                },
                "required": ["query"]
            }),
            privileged_only: false,
            needs_feedback: true,
        }
    }

    async fn call(&self, args: Value, _ctx: ToolContext) -> tether_core::Result<ToolOutput> {
        let query = args["query"].as_str().unwrap_or_default();
        let limit = args["limit"]
            .as_u64()
            .map(|l| l as usize)
            .unwrap_or(self.default_limit);
        let found = self.memory.recall(query, limit).await?;

        let content = if found.is_empty() {
            format!("No memories found for \"{query}\".")
        } else {
            found
                .iter()
                .map(|r| format!("- {} (relevance {:.0}%)", r.text, r.score * 100.0))
                .collect::<Vec<_>>()
                .join("\n")
        };
        Ok(ToolOutput::text(content).with_data(json!({ "count": found.len() })))
    }
}

// ── schedule_task ──────────────────────────────────────────────

pub struct ScheduleTask {
    memory: Arc<dyn Memory>,
}

#[async_trait]
impl ToolHandler for ScheduleTask {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "schedule_task".into(),
            description: "Schedule a task to be brought back up later. Give either due_at \
                          (RFC 3339) or delay_minutes."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "task": { "type": "string" },
                    "due_at": { "type": "string" },
                    "delay_minutes": { "type": "integer" }
                },
                "required": ["task"]
            }),
            privileged_only: false,
            needs_feedback: false,
        }
    }

    async fn call(&self, args: Value, _ctx: ToolContext) -> tether_core::Result<ToolOutput> {
        let task = args["task"].as_str().unwrap_or_default().trim();
        if task.is_empty() {
            return Err(argument_error("schedule_task", "task is empty"));
        }
        let due_at = match (args["due_at"].as_str(), args["delay_minutes"].as_i64()) {
            (Some(at), _) => DateTime::parse_from_rfc3339(at)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| argument_error("schedule_task", format!("bad due_at: {e}")))?,
            (None, Some(minutes)) if minutes >= 0 => Utc::now() + chrono::Duration::minutes(minutes),
            _ => {
                return Err(argument_error(
                    "schedule_task",
                    "one of due_at or a non-negative delay_minutes is required",
                ));
            }
        };

        let id = self.memory.add_schedule(task, due_at).await?;
        info!(schedule_id = %id, %due_at, "task scheduled");
        Ok(
            ToolOutput::text(format!("Scheduled for {}", due_at.to_rfc3339()))
                .with_data(json!({ "schedule_id": id, "due_at": due_at })),
        )
    }
}

// ── send_document ──────────────────────────────────────────────

pub struct SendDocument;

#[async_trait]
impl ToolHandler for SendDocument {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "send_document".into(),
            description: "Send a local file to the person who asked.".into(),
            parameters: json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"]
            }),
            privileged_only: false,
            needs_feedback: false,
        }
    }

    async fn call(&self, args: Value, ctx: ToolContext) -> tether_core::Result<ToolOutput> {
        let path = PathBuf::from(args["path"].as_str().unwrap_or_default());
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| execution_error("send_document", format!("{}: {e}", path.display())))?;
        if !meta.is_file() {
            return Err(execution_error(
                "send_document",
                format!("{} is not a file", path.display()),
            ));
        }
        ctx.origin_context.send_document(&path).await?;
        Ok(ToolOutput::text(format!("Sent {}", path.display())))
    }
}

// ── propose_patch ──────────────────────────────────────────────

pub struct ProposePatch {
    patches: Arc<PatchPipeline>,
}

#[async_trait]
impl ToolHandler for ProposePatch {
    fn spec(&self) -> ToolSpec {
        let targets = self.patches.targets().join(", ");
        ToolSpec {
            name: "propose_patch".into(),
            description: format!(
                "Propose new full content for one configurable file. The change is held for \
                 operator approval. Targets: {targets}."
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "target": { "type": "string" },
                    "content": { "type": "string" },
                    "description": { "type": "string" }
                },
                "required": ["target", "content", "description"]
            }),
            privileged_only: true,
            needs_feedback: false,
        }
    }

    async fn call(&self, args: Value, ctx: ToolContext) -> tether_core::Result<ToolOutput> {
        if !ctx.origin.is_reflection() {
            return Err(TetherError::PermissionDenied {
                tool: "propose_patch".into(),
                reason: "patches may only be proposed during self-reflection".into(),
            });
        }
        let target = args["target"].as_str().unwrap_or_default();
        let content = args["content"].as_str().unwrap_or_default();
        let description = args["description"].as_str().unwrap_or_default();

        let proposal = self.patches.propose(target, content, description).await?;
        Ok(ToolOutput::text(format!(
            "Proposal {} for '{}' is pending operator approval.",
            proposal.id, proposal.target_id
        ))
        .with_data(json!({ "patch_id": proposal.id })))
    }
}

// ── shell_exec ─────────────────────────────────────────────────

pub struct ShellExec {
    timeout: Duration,
}

#[async_trait]
impl ToolHandler for ShellExec {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "shell_exec".into(),
            description: "Run a short non-interactive shell command and return its output. \
                          Stdin is /dev/null."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string" },
                    "working_dir": { "type": "string" }
                },
                "required": ["command"]
            }),
            privileged_only: true,
            needs_feedback: true,
        }
    }

    async fn call(&self, args: Value, _ctx: ToolContext) -> tether_core::Result<ToolOutput> {
        let command = args["command"].as_str().unwrap_or_default();
        info!(command, "executing shell command");

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd.stdin(std::process::Stdio::null());
        cmd.kill_on_drop(true);
        if let Some(dir) = args["working_dir"].as_str() {
            cmd.current_dir(dir);
        }

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| TetherError::ToolTimeout {
                tool: "shell_exec".into(),
                timeout_secs: self.timeout.as_secs(),
            })?
            .map_err(|e| execution_error("shell_exec", e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);
        let content = format!(
            "Exit code: {exit_code}\n\nSTDOUT:\n{}\n\nSTDERR:\n{}",
            stdout.chars().take(SHELL_STDOUT_LIMIT).collect::<String>(),
            stderr.chars().take(SHELL_STDERR_LIMIT).collect::<String>(),
        );

        if output.status.success() {
            Ok(ToolOutput::text(content).with_data(json!({ "exit_code": exit_code })))
        } else {
            Err(execution_error("shell_exec", content))
        }
    }
}
