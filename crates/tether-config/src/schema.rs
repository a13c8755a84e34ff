use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Root configuration, maps to `tether.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub session: SessionConfig,
    pub queue: QueueConfig,
    pub tools: ToolsConfig,
    pub autonomy: AutonomyConfig,
    pub patch: PatchConfig,
    pub memory: MemoryConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

// ── Session ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Chrome DevTools port of the browser hosting the reasoning session.
    pub cdp_port: u16,
    /// Substring of the tab URL that identifies the session page.
    pub page_url_match: String,
    /// CSS selector of the prompt input element.
    pub input_selector: String,
    /// CSS selector of the send button.
    pub send_selector: String,
    /// CSS selector matching rendered assistant messages (last one wins).
    pub transcript_selector: String,
    /// Interval between transcript polls.
    pub poll_interval_ms: u64,
    /// Give up waiting for a stable response after this long.
    pub response_timeout_secs: u64,
    /// Consecutive unchanged comparisons required to declare completion.
    pub min_stable_polls: u32,
    /// Recovery attempts after a session crash before the turn is abandoned.
    pub recovery_attempts: u32,
    /// Linear backoff between recovery attempts.
    pub recovery_backoff_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cdp_port: 9222,
            page_url_match: "chat".into(),
            input_selector: "textarea".into(),
            send_selector: "button[type=submit]".into(),
            transcript_selector: "[data-role=assistant]".into(),
            poll_interval_ms: 500,
            response_timeout_secs: 180,
            min_stable_polls: 2,
            recovery_attempts: 3,
            recovery_backoff_secs: 5,
        }
    }
}

// ── Queue ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Optional cap on waiting requests. None = unbounded.
    pub capacity: Option<usize>,
    /// Maximum tool-result follow-up hops per originating request.
    pub max_follow_up_hops: u8,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            max_follow_up_hops: 3,
        }
    }
}

// ── Tools ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Tools any origin may run.
    pub allowlist: Vec<String>,
    /// Tools no origin may run, privileged or not.
    pub denylist: Vec<String>,
    /// Per-invocation timeout.
    pub timeout_secs: u64,
    /// Maximum concurrent tool executions within one turn.
    pub max_parallel: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allowlist: vec!["current_time".into(), "memory_recall".into()],
            denylist: vec![],
            timeout_secs: 30,
            max_parallel: 4,
        }
    }
}

// ── Autonomy ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutonomyConfig {
    /// Enable the wake timer and the due-task watcher.
    pub enabled: bool,
    /// Lower bound of the randomized wake interval.
    pub wake_min_hours: f64,
    /// Upper bound of the randomized wake interval.
    pub wake_max_hours: f64,
    /// Local hour (0-23) at which quiet hours begin.
    pub quiet_start_hour: u8,
    /// Local hour (0-23) at which quiet hours end.
    pub quiet_end_hour: u8,
    /// Offset of local time from UTC, used to evaluate quiet hours.
    pub utc_offset_hours: i32,
    pub reflection_weight: f64,
    pub outreach_weight: f64,
    pub passive_weight: f64,
    /// How often the due-task watcher asks memory for due schedule entries.
    pub due_task_interval_secs: u64,
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wake_min_hours: 3.0,
            wake_max_hours: 6.0,
            quiet_start_hour: 23,
            quiet_end_hour: 7,
            utc_offset_hours: 0,
            reflection_weight: 0.2,
            outreach_weight: 0.3,
            passive_weight: 0.5,
            due_task_interval_secs: 60,
        }
    }
}

// ── Patch ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    /// Directory where proposal clones are materialized.
    pub clone_dir: PathBuf,
    /// Patchable targets: target id → live file path.
    pub targets: HashMap<String, PathBuf>,
    /// Upper bound on clone validation.
    pub validation_timeout_secs: u64,
    /// Reject proposals larger than this.
    pub max_content_bytes: usize,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            clone_dir: PathBuf::from("patches"),
            targets: HashMap::new(),
            validation_timeout_secs: 10,
            max_content_bytes: 256 * 1024,
        }
    }
}

// ── Memory ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Path to the SQLite database.
    pub db_path: PathBuf,
    /// Default number of recollections returned by `memory_recall`.
    pub recall_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("memory.db"),
            recall_limit: 5,
        }
    }
}

// ── Server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Start the operator HTTP surface.
    pub enabled: bool,
    /// Listen address.
    pub listen: String,
    /// Bearer token. When set, authenticated chat requests are privileged.
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "127.0.0.1:3710".into(),
            api_key: None,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "[{}] {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

impl ConfigWarning {
    fn error(field: &str, message: impl Into<String>, hint: Option<&str>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: WarningSeverity::Error,
            hint: hint.map(String::from),
        }
    }

    fn warning(field: &str, message: impl Into<String>, hint: Option<&str>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: WarningSeverity::Warning,
            hint: hint.map(String::from),
        }
    }

    fn info(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: WarningSeverity::Info,
            hint: None,
        }
    }
}

impl TetherConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Session ───
        let s = &self.session;
        if s.poll_interval_ms == 0 {
            warnings.push(ConfigWarning::error(
                "session.poll_interval_ms",
                "poll interval is 0",
                Some("Set to e.g. 500"),
            ));
        }
        if s.response_timeout_secs == 0 {
            warnings.push(ConfigWarning::error(
                "session.response_timeout_secs",
                "response timeout is 0: every turn would time out",
                Some("Set to e.g. 180"),
            ));
        } else if s.response_timeout_secs * 1000 < s.poll_interval_ms * 3 {
            warnings.push(ConfigWarning::warning(
                "session.response_timeout_secs",
                "timeout is shorter than three poll intervals",
                Some("Stability needs at least min_stable_polls + 1 polls"),
            ));
        }
        if s.min_stable_polls == 0 {
            warnings.push(ConfigWarning::error(
                "session.min_stable_polls",
                "min_stable_polls is 0: completion would be declared on the first poll",
                Some("Use 2 or more"),
            ));
        }
        if s.transcript_selector.is_empty() || s.input_selector.is_empty() {
            warnings.push(ConfigWarning::error(
                "session",
                "input_selector and transcript_selector must not be empty",
                None,
            ));
        }

        // ── Queue ───
        if self.queue.capacity == Some(0) {
            warnings.push(ConfigWarning::error(
                "queue.capacity",
                "capacity 0 would reject every request",
                Some("Remove the key for an unbounded queue"),
            ));
        }
        if self.queue.max_follow_up_hops > 3 {
            warnings.push(ConfigWarning::warning(
                "queue.max_follow_up_hops",
                format!(
                    "{} follow-up hops per request: tool loops hold the session longer",
                    self.queue.max_follow_up_hops
                ),
                Some("3 or fewer is typical"),
            ));
        }

        // ── Tools ───
        if self.tools.timeout_secs == 0 {
            warnings.push(ConfigWarning::error(
                "tools.timeout_secs",
                "tool timeout is 0",
                Some("Set to e.g. 30"),
            ));
        }
        if self.tools.max_parallel == 0 {
            warnings.push(ConfigWarning::error(
                "tools.max_parallel",
                "max_parallel is 0: no tool could run",
                None,
            ));
        }
        for name in &self.tools.allowlist {
            if self.tools.denylist.contains(name) {
                warnings.push(ConfigWarning::warning(
                    "tools.allowlist",
                    format!("'{name}' is on both lists; the denylist wins"),
                    None,
                ));
            }
        }

        // ── Autonomy ───
        let a = &self.autonomy;
        if a.wake_min_hours <= 0.0 || a.wake_min_hours > a.wake_max_hours {
            warnings.push(ConfigWarning::error(
                "autonomy.wake_min_hours",
                format!(
                    "wake interval [{}, {}] is invalid",
                    a.wake_min_hours, a.wake_max_hours
                ),
                Some("Require 0 < wake_min_hours <= wake_max_hours"),
            ));
        }
        if a.quiet_start_hour > 23 || a.quiet_end_hour > 23 {
            warnings.push(ConfigWarning::error(
                "autonomy.quiet_start_hour",
                "quiet hours must be between 0 and 23",
                None,
            ));
        } else if a.quiet_start_hour == a.quiet_end_hour {
            warnings.push(ConfigWarning::info(
                "autonomy.quiet_start_hour",
                "quiet start equals quiet end: no quiet window",
            ));
        }
        if !(-12..=14).contains(&a.utc_offset_hours) {
            warnings.push(ConfigWarning::error(
                "autonomy.utc_offset_hours",
                format!("offset {} is out of range", a.utc_offset_hours),
                Some("Valid offsets are -12 to 14"),
            ));
        }
        let weights = [a.reflection_weight, a.outreach_weight, a.passive_weight];
        if weights.iter().any(|w| *w < 0.0) {
            warnings.push(ConfigWarning::error(
                "autonomy.reflection_weight",
                "wake action weights must not be negative",
                None,
            ));
        } else if a.enabled && weights.iter().sum::<f64>() <= 0.0 {
            warnings.push(ConfigWarning::error(
                "autonomy.reflection_weight",
                "all wake action weights are zero",
                Some("Disable autonomy instead"),
            ));
        }
        if a.due_task_interval_secs == 0 {
            warnings.push(ConfigWarning::error(
                "autonomy.due_task_interval_secs",
                "due-task interval is 0",
                Some("Set to e.g. 60"),
            ));
        }

        // ── Patch ───
        if self.patch.targets.is_empty() {
            warnings.push(ConfigWarning::info(
                "patch.targets",
                "no patch targets configured: self-modification proposals will be rejected",
            ));
        }
        if self.patch.validation_timeout_secs == 0 {
            warnings.push(ConfigWarning::error(
                "patch.validation_timeout_secs",
                "validation timeout is 0",
                Some("Set to e.g. 10"),
            ));
        }

        // ── Server ───
        if self.server.enabled {
            if self.server.listen.is_empty() {
                warnings.push(ConfigWarning::error(
                    "server.listen",
                    "listen address is empty",
                    Some("Set to e.g. '127.0.0.1:3710'"),
                ));
            } else if self.server.listen.starts_with("0.0.0.0") && self.server.api_key.is_none()
            {
                warnings.push(ConfigWarning::warning(
                    "server.api_key",
                    "no API key set while the operator surface is network-accessible",
                    Some("Set server.api_key or bind to 127.0.0.1"),
                ));
            }
        }

        // ── Logging ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
