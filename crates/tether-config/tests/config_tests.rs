#[cfg(test)]
mod tests {
    use std::io::Write;
    use tether_config::ConfigLoader;
    use tether_config::schema::*;

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.cdp_port, 9222);
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.response_timeout_secs, 180);
        assert_eq!(config.min_stable_polls, 2);
        assert_eq!(config.recovery_attempts, 3);
    }

    #[test]
    fn test_queue_config_defaults() {
        let config = QueueConfig::default();
        assert!(config.capacity.is_none());
        assert_eq!(config.max_follow_up_hops, 3);
    }

    #[test]
    fn test_tools_config_defaults() {
        let config = ToolsConfig::default();
        assert!(config.allowlist.contains(&"current_time".to_string()));
        assert!(config.allowlist.contains(&"memory_recall".to_string()));
        assert!(!config.allowlist.contains(&"shell_exec".to_string()));
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_autonomy_config_defaults() {
        let config = AutonomyConfig::default();
        assert!(config.enabled);
        assert_eq!(config.wake_min_hours, 3.0);
        assert_eq!(config.wake_max_hours, 6.0);
        assert_eq!(config.quiet_start_hour, 23);
        assert_eq!(config.quiet_end_hour, 7);
        assert_eq!(config.due_task_interval_secs, 60);
    }

    #[test]
    fn test_server_and_logging_defaults() {
        let config = TetherConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:3710");
        assert!(config.server.api_key.is_none());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_default_config_is_valid() {
        let warnings = TetherConfig::default().validate().unwrap();
        // Empty patch targets are reported, not rejected.
        assert!(warnings.iter().any(|w| w.field == "patch.targets"));
        assert!(
            warnings
                .iter()
                .all(|w| w.severity != WarningSeverity::Error)
        );
    }

    // ── TOML tests ─────────────────────────────────────────────

    #[test]
    fn test_config_toml_roundtrip() {
        let config = TetherConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let restored: TetherConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(restored.session.cdp_port, config.session.cdp_port);
        assert_eq!(restored.server.listen, config.server.listen);
    }

    #[test]
    fn test_partial_toml_applies_defaults() {
        let toml_str = r#"
[session]
poll_interval_ms = 250

[queue]
capacity = 32

[patch.targets]
persona = "persona.toml"
"#;
        let config: TetherConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.session.poll_interval_ms, 250);
        assert_eq!(config.queue.capacity, Some(32));
        assert_eq!(
            config.patch.targets["persona"],
            std::path::PathBuf::from("persona.toml")
        );
        // Defaults should fill in
        assert_eq!(config.session.min_stable_polls, 2);
        assert_eq!(config.queue.max_follow_up_hops, 3);
        assert_eq!(config.tools.timeout_secs, 30);
    }

    // ── Validation tests ───────────────────────────────────────

    #[test]
    fn test_zero_stable_polls_is_error() {
        let mut config = TetherConfig::default();
        config.session.min_stable_polls = 0;
        let err = config.validate().unwrap_err();
        assert!(err.contains("session.min_stable_polls"));
    }

    #[test]
    fn test_inverted_wake_interval_is_error() {
        let mut config = TetherConfig::default();
        config.autonomy.wake_min_hours = 8.0;
        config.autonomy.wake_max_hours = 2.0;
        assert!(config.validate().unwrap_err().contains("wake"));
    }

    #[test]
    fn test_zero_weights_only_error_when_enabled() {
        let mut config = TetherConfig::default();
        config.autonomy.reflection_weight = 0.0;
        config.autonomy.outreach_weight = 0.0;
        config.autonomy.passive_weight = 0.0;
        assert!(config.validate().is_err());
        config.autonomy.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_queue_capacity_zero_is_error() {
        let mut config = TetherConfig::default();
        config.queue.capacity = Some(0);
        assert!(config.validate().unwrap_err().contains("queue.capacity"));
    }

    #[test]
    fn test_allow_and_deny_overlap_warns() {
        let mut config = TetherConfig::default();
        config.tools.denylist = vec!["current_time".into()];
        let warnings = config.validate().unwrap();
        assert!(warnings.iter().any(|w| {
            w.field == "tools.allowlist" && w.severity == WarningSeverity::Warning
        }));
    }

    #[test]
    fn test_exposed_server_without_key_warns() {
        let mut config = TetherConfig::default();
        config.server.listen = "0.0.0.0:3710".into();
        let warnings = config.validate().unwrap();
        assert!(warnings.iter().any(|w| w.field == "server.api_key"));
    }

    #[test]
    fn test_warning_display() {
        let mut config = TetherConfig::default();
        config.logging.format = "xml".into();
        let warnings = config.validate().unwrap();
        let w = warnings
            .iter()
            .find(|w| w.field == "logging.format")
            .unwrap();
        let rendered = w.to_string();
        assert!(rendered.contains("[warning]"));
        assert!(rendered.contains("xml"));
    }

    // ── ConfigLoader tests ─────────────────────────────────────

    #[test]
    fn test_config_loader_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tether.toml");
        let mut f = std::fs::File::create(&config_path).unwrap();
        writeln!(
            f,
            r#"
[session]
page_url_match = "assistant.example"
response_timeout_secs = 90

[autonomy]
enabled = false
"#
        )
        .unwrap();

        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        let config = loader.get();
        assert_eq!(config.session.page_url_match, "assistant.example");
        assert!(!config.autonomy.enabled);
        assert_eq!(loader.path(), config_path.as_path());
    }

    #[test]
    fn test_config_loader_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::load(Some(dir.path().join("absent.toml").as_path())).unwrap();
        assert_eq!(loader.get().session.min_stable_polls, 2);
    }

    #[test]
    fn test_config_loader_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tether.toml");
        std::fs::write(&config_path, "[session]\nmin_stable_polls = 0\n").unwrap();
        assert!(ConfigLoader::load(Some(config_path.as_path())).is_err());
    }

    #[test]
    fn test_config_loader_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("tether.toml");
        std::fs::write(&config_path, "[memory]\nrecall_limit = 3\n").unwrap();

        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        assert_eq!(loader.get().memory.recall_limit, 3);

        std::fs::write(&config_path, "[memory]\nrecall_limit = 9\n").unwrap();
        loader.reload().unwrap();
        assert_eq!(loader.get().memory.recall_limit, 9);
        assert_eq!(loader.shared().read().memory.recall_limit, 9);
    }

    // ── JSON roundtrip ─────────────────────────────────────────

    #[test]
    fn test_config_json_roundtrip() {
        let config = TetherConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let restored: TetherConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.tools.allowlist, config.tools.allowlist);
    }
}
