use std::collections::HashSet;

use tether_config::schema::ToolsConfig;
use tether_core::{Authorization, OriginContext, ToolInvocation, ToolSpec};
use tracing::{debug, info, warn};

/// A single authorization rule, consulted before the allow-list.
pub trait SecurityRule: Send + Sync {
    fn name(&self) -> &str;

    /// `spec` is `None` when no tool with that name is registered.
    fn evaluate(
        &self,
        spec: Option<&ToolSpec>,
        invocation: &ToolInvocation,
        privileged: bool,
    ) -> Authorization;
}

/// Deny-by-default authorization of tool invocations.
///
/// Order of evaluation: the denylist, then every rule, then the allow-list or
/// a privileged context. Anything else is denied.
pub struct SecurityGate {
    rules: Vec<Box<dyn SecurityRule>>,
    allowlist: HashSet<String>,
    denylist: HashSet<String>,
}

impl SecurityGate {
    pub fn new(allowlist: Vec<String>, denylist: Vec<String>) -> Self {
        let mut gate = Self {
            rules: Vec::new(),
            allowlist: allowlist.into_iter().collect(),
            denylist: denylist.into_iter().collect(),
        };
        gate.add_rule(Box::new(PrivilegedOnlyRule));
        gate.add_rule(Box::new(ExfiltrationRule));
        gate
    }

    pub fn from_config(config: &ToolsConfig) -> Self {
        Self::new(config.allowlist.clone(), config.denylist.clone())
    }

    pub fn add_rule(&mut self, rule: Box<dyn SecurityRule>) {
        self.rules.push(rule);
    }

    pub fn is_allow_listed(&self, tool: &str) -> bool {
        self.allowlist.contains(tool)
    }

    pub fn authorize(
        &self,
        spec: Option<&ToolSpec>,
        invocation: &ToolInvocation,
        context: &dyn OriginContext,
    ) -> Authorization {
        let tool = invocation.tool_name.as_str();
        let privileged = context.is_privileged();

        if self.denylist.contains(tool) {
            warn!(tool, platform = context.platform_id(), "tool is on denylist");
            return Authorization::Deny {
                reason: format!("tool '{tool}' is on the denylist"),
            };
        }

        for rule in &self.rules {
            if let verdict @ Authorization::Deny { .. } = rule.evaluate(spec, invocation, privileged)
            {
                info!(rule = rule.name(), tool, "security rule denied invocation");
                return verdict;
            }
        }

        if self.allowlist.contains(tool) || privileged {
            debug!(tool, privileged, "invocation authorized");
            return Authorization::Allow;
        }

        info!(tool, platform = context.platform_id(), "tool not allow-listed for this origin");
        Authorization::Deny {
            reason: format!(
                "tool '{tool}' is not on the allow-list and origin '{}' is not privileged",
                context.platform_id()
            ),
        }
    }
}

// ── Built-in rules ─────────────────────────────────────────────

/// Tools flagged `privileged_only` never run for ordinary origins, even when
/// allow-listed.
struct PrivilegedOnlyRule;

impl SecurityRule for PrivilegedOnlyRule {
    fn name(&self) -> &str {
        "privileged_only"
    }

    fn evaluate(
        &self,
        spec: Option<&ToolSpec>,
        invocation: &ToolInvocation,
        privileged: bool,
    ) -> Authorization {
        match spec {
            Some(spec) if spec.privileged_only && !privileged => Authorization::Deny {
                reason: format!(
                    "tool '{}' requires a privileged origin",
                    invocation.tool_name
                ),
            },
            _ => Authorization::Allow,
        }
    }
}

/// Shell commands that pipe local files to the network.
struct ExfiltrationRule;

impl SecurityRule for ExfiltrationRule {
    fn name(&self) -> &str {
        "network_exfiltration"
    }

    fn evaluate(
        &self,
        _spec: Option<&ToolSpec>,
        invocation: &ToolInvocation,
        _privileged: bool,
    ) -> Authorization {
        if invocation.tool_name != "shell_exec" {
            return Authorization::Allow;
        }
        let Some(cmd) = invocation.arguments.get("command").and_then(|v| v.as_str()) else {
            return Authorization::Allow;
        };
        let suspicious = cmd.contains("curl")
            && (cmd.contains("cat ") || cmd.contains("< /") || cmd.contains("@/"))
            || cmd.contains("wget") && cmd.contains("--post-file");
        if suspicious {
            Authorization::Deny {
                reason: "command may be exfiltrating data via network".into(),
            }
        } else {
            Authorization::Allow
        }
    }
}
