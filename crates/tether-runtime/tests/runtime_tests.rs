#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use tether_config::TetherConfig;
    use tether_core::{
        Event, EventBus, OriginContext, ReplyOptions, RequestOrigin, SystemTrigger, TetherError,
        ToolErrorKind, ToolSpec,
    };
    use tether_memory::{Memory, SqliteMemory};
    use tether_runtime::protocol::parse;
    use tether_runtime::{
        RequestQueue, Runtime, RuntimeHandle, SystemContext, ToolContext, ToolHandler, ToolOutput,
    };
    use tether_session::mock::ScriptedTransport;
    use tokio::sync::broadcast;
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;

    // ── Fixtures ───────────────────────────────────────────────

    #[derive(Default)]
    struct TestContext {
        privileged: bool,
        replies: Mutex<Vec<String>>,
        documents: Mutex<Vec<PathBuf>>,
    }

    impl TestContext {
        fn ordinary() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn privileged() -> Arc<Self> {
            Arc::new(Self {
                privileged: true,
                ..Default::default()
            })
        }

        fn replies(&self) -> Vec<String> {
            self.replies.lock().clone()
        }
    }

    #[async_trait]
    impl OriginContext for TestContext {
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
            "test"
        }
    }

    /// Counts calls; optionally asks for feedback or panics.
    struct CountingTool {
        name: &'static str,
        feedback: bool,
        explode: bool,
        calls: Arc<AtomicUsize>,
    }

    impl CountingTool {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                feedback: false,
                explode: false,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn boxed(self) -> Arc<dyn ToolHandler> {
            Arc::new(self)
        }
    }

    #[async_trait]
    impl ToolHandler for CountingTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.name.into(),
                description: "counts its calls".into(),
                parameters: json!({ "type": "object", "properties": {} }),
                privileged_only: false,
                needs_feedback: self.feedback,
            }
        }

        async fn call(&self, _args: Value, _ctx: ToolContext) -> tether_core::Result<ToolOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.explode {
                panic!("tool exploded");
            }
            Ok(ToolOutput::text(format!("{} ran", self.name)))
        }
    }

    struct Harness {
        handle: RuntimeHandle,
        transport: Arc<ScriptedTransport>,
        memory: Arc<SqliteMemory>,
        cancel: CancellationToken,
        task: JoinHandle<()>,
        events: broadcast::Receiver<Event>,
        _dir: tempfile::TempDir,
    }

    fn test_config(dir: &Path) -> TetherConfig {
        let mut config = TetherConfig::default();
        config.autonomy.enabled = false;
        config.session.poll_interval_ms = 100;
        config.session.response_timeout_secs = 5;
        config.session.recovery_backoff_secs = 1;
        config.patch.clone_dir = dir.join("clones");
        config
    }

    fn start(
        transport: ScriptedTransport,
        tweak: impl FnOnce(&mut TetherConfig),
        tools: Vec<Arc<dyn ToolHandler>>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        tweak(&mut config);

        let transport = Arc::new(transport);
        let memory = Arc::new(SqliteMemory::open_in_memory().unwrap());
        let mut runtime = Runtime::new(config, transport.clone(), memory.clone()).unwrap();
        for tool in tools {
            runtime.register_tool(tool);
        }
        let handle = runtime.handle();
        let events = handle.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(runtime.run(cancel.clone()));
        Harness {
            handle,
            transport,
            memory,
            cancel,
            task,
            events,
            _dir: dir,
        }
    }

    impl Harness {
        async fn stop(self) {
            self.cancel.cancel();
            self.task.await.unwrap();
        }
    }

    fn inbound() -> RequestOrigin {
        RequestOrigin::inbound("test")
    }

    // ── Protocol parsing ───────────────────────────────────────

    mod protocol {
        use super::*;

        #[test]
        fn reply_marker_only() {
            let envelope = parse("<reply>Hello there</reply>");
            assert_eq!(envelope.reply.as_deref(), Some("Hello there"));
            assert!(envelope.actions.is_empty());
            assert!(envelope.memories.is_empty());
            assert!(!envelope.degraded);
        }

        #[test]
        fn unmarked_text_is_the_reply() {
            let envelope = parse("  just words  ");
            assert_eq!(envelope.reply.as_deref(), Some("just words"));
            assert!(envelope.actions.is_empty());
        }

        #[test]
        fn text_outside_blocks_is_the_reply() {
            let envelope = parse(
                "Sure thing.\n<actions>[{\"tool\": \"current_time\"}]</actions>",
            );
            assert_eq!(envelope.reply.as_deref(), Some("Sure thing."));
            assert_eq!(envelope.actions.len(), 1);
            assert_eq!(envelope.actions[0].tool_name, "current_time");
            assert_eq!(envelope.actions[0].arguments, json!({}));
        }

        #[test]
        fn all_three_streams_in_any_order() {
            let envelope = parse(
                "<memory>[\"likes tea\", {\"text\": \"lives by the sea\", \"tags\": [\"home\"]}]</memory>\
                 <actions>[{\"tool\": \"memory_recall\", \"args\": {\"query\": \"tea\"}}, \
                           {\"name\": \"send_document\", \"arguments\": {\"path\": \"/tmp/a\"}}]</actions>\
                 <reply>ok</reply>",
            );
            assert_eq!(envelope.reply.as_deref(), Some("ok"));
            let names: Vec<_> = envelope.actions.iter().map(|a| a.tool_name.as_str()).collect();
            assert_eq!(names, ["memory_recall", "send_document"]);
            assert_eq!(envelope.actions[0].arguments["query"], "tea");
            assert_eq!(envelope.memories.len(), 2);
            assert_eq!(envelope.memories[1].tags, vec!["home".to_string()]);
        }

        #[test]
        fn single_object_plan() {
            let envelope = parse("<actions>{\"tool\": \"current_time\", \"args\": {}}</actions>");
            assert_eq!(envelope.actions.len(), 1);
            assert!(envelope.reply.is_none());
        }

        #[test]
        fn repair_strips_fences_and_trailing_commas() {
            let envelope = parse(
                "<reply>hi</reply><actions>```json\n[{\"tool\": \"current_time\", \"args\": {},},]\n```</actions>",
            );
            assert!(!envelope.degraded);
            assert_eq!(envelope.actions.len(), 1);
        }

        #[test]
        fn unrepairable_plan_degrades_to_raw_reply() {
            let raw = "<reply>hi</reply><actions>[{tool: oops</actions><memory>[\"x\"]</memory>";
            let envelope = parse(raw);
            assert!(envelope.degraded);
            assert_eq!(envelope.reply.as_deref(), Some(raw));
            assert!(envelope.actions.is_empty());
            assert!(envelope.memories.is_empty());
        }

        #[test]
        fn memory_lines_fallback() {
            let envelope = parse("<reply>ok</reply><memory>\n- first\n* second\n\n</memory>");
            let texts: Vec<_> = envelope.memories.iter().map(|m| m.text.as_str()).collect();
            assert_eq!(texts, ["first", "second"]);
        }
    }

    // ── Request queue ──────────────────────────────────────────

    mod queue {
        use super::*;

        #[tokio::test]
        async fn preserves_submission_order() {
            let (queue, mut rx) = RequestQueue::new(None, EventBus::default());
            let ctx = TestContext::ordinary();
            for prompt in ["one", "two", "three"] {
                queue.enqueue(ctx.clone(), inbound(), prompt).unwrap();
            }
            queue
                .enqueue(
                    ctx.clone(),
                    RequestOrigin::system(tether_core::SystemTrigger::Outreach),
                    "four",
                )
                .unwrap();
            assert_eq!(queue.depth(), 4);

            let mut seen = Vec::new();
            for _ in 0..4 {
                seen.push(rx.recv().await.unwrap().request.prompt);
            }
            assert_eq!(seen, ["one", "two", "three", "four"]);
            assert_eq!(queue.depth(), 0);
        }

        #[tokio::test]
        async fn rejects_when_full() {
            let (queue, _rx) = RequestQueue::new(Some(1), EventBus::default());
            let ctx = TestContext::ordinary();
            queue.enqueue(ctx.clone(), inbound(), "first").unwrap();
            let err = queue.enqueue(ctx, inbound(), "second").unwrap_err();
            assert!(matches!(
                err,
                TetherError::QueueFull {
                    depth: 1,
                    capacity: 1
                }
            ));
            assert_eq!(queue.depth(), 1);
        }

        #[tokio::test]
        async fn closed_queue_rejects() {
            let (queue, rx) = RequestQueue::new(None, EventBus::default());
            drop(rx);
            let err = queue
                .enqueue(TestContext::ordinary(), inbound(), "late")
                .unwrap_err();
            assert!(matches!(err, TetherError::QueueClosed));
            assert_eq!(queue.depth(), 0);
        }

        #[tokio::test]
        async fn dropped_request_resolves_closed() {
            let (queue, rx) = RequestQueue::new(None, EventBus::default());
            let handle = queue
                .enqueue(TestContext::ordinary(), inbound(), "never served")
                .unwrap();
            drop(rx);
            assert!(matches!(handle.wait().await, Err(TetherError::QueueClosed)));
        }
    }

    // ── Turns ──────────────────────────────────────────────────

    mod turns {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn two_requests_run_one_after_the_other() {
            let transport = ScriptedTransport::new();
            transport.reply("<reply>one</reply>");
            transport.reply("<reply>two</reply>");
            let mut h = start(transport, |_| {}, vec![]);

            let ctx_a = TestContext::ordinary();
            let ctx_b = TestContext::ordinary();
            let a = h.handle.submit(ctx_a.clone(), inbound(), "hi").unwrap();
            let b = h.handle.submit(ctx_b.clone(), inbound(), "hello").unwrap();
            let (a_id, b_id) = (a.request_id(), b.request_id());

            let report_a = a.wait().await.unwrap();
            let report_b = b.wait().await.unwrap();
            assert_eq!(report_a.reply.as_deref(), Some("one"));
            assert_eq!(report_b.reply.as_deref(), Some("two"));
            assert_eq!(h.transport.prompts(), ["hi", "hello"]);
            assert_eq!(ctx_a.replies(), ["one"]);
            assert_eq!(ctx_b.replies(), ["two"]);

            let mut order = Vec::new();
            while let Ok(event) = h.events.try_recv() {
                match event {
                    Event::TurnStarted { request_id, .. } => order.push(("start", request_id)),
                    Event::TurnCompleted { request_id, .. } => order.push(("done", request_id)),
                    _ => {}
                }
            }
            assert_eq!(
                order,
                [("start", a_id), ("done", a_id), ("start", b_id), ("done", b_id)]
            );
            h.stop().await;
        }

        #[tokio::test(start_paused = true)]
        async fn lease_is_held_by_one_turn_at_a_time() {
            let transport = ScriptedTransport::new();
            for i in 0..4 {
                transport.reply(format!("<reply>reply {i}</reply>"));
            }
            let mut h = start(transport, |_| {}, vec![]);
            let ctx = TestContext::ordinary();
            let handles: Vec<_> = (0..4)
                .map(|i| h.handle.submit(ctx.clone(), inbound(), format!("p{i}")).unwrap())
                .collect();
            for handle in handles {
                handle.wait().await.unwrap();
            }

            let mut held = 0i32;
            while let Ok(event) = h.events.try_recv() {
                match event {
                    Event::LeaseAcquired { .. } => {
                        held += 1;
                        assert_eq!(held, 1, "two leases were live at once");
                    }
                    Event::LeaseReleased { .. } => held -= 1,
                    _ => {}
                }
            }
            assert_eq!(held, 0);
            h.stop().await;
        }

        #[tokio::test(start_paused = true)]
        async fn reply_only_turn_dispatches_nothing_else() {
            let transport = ScriptedTransport::new();
            transport.reply("<reply>just this</reply>");
            let h = start(transport, |_| {}, vec![]);

            let report = h
                .handle
                .submit(TestContext::ordinary(), inbound(), "hey")
                .unwrap()
                .wait()
                .await
                .unwrap();
            assert_eq!(report.reply.as_deref(), Some("just this"));
            assert!(report.outcomes.is_empty());
            assert_eq!(report.memories_stored, 0);
            assert_eq!(report.follow_ups, 0);
            assert_eq!(h.memory.memory_count().unwrap(), 0);
            h.stop().await;
        }

        #[tokio::test(start_paused = true)]
        async fn degraded_plan_delivers_raw_text() {
            let raw = "<reply>hi</reply><actions>[{tool: broken</actions>";
            let transport = ScriptedTransport::new();
            transport.reply(raw);
            let counter = CountingTool::new("counter");
            let calls = counter.calls.clone();
            let h = start(
                transport,
                |c| c.tools.allowlist.push("counter".into()),
                vec![counter.boxed()],
            );

            let ctx = TestContext::ordinary();
            let report = h
                .handle
                .submit(ctx.clone(), inbound(), "hey")
                .unwrap()
                .wait()
                .await
                .unwrap();
            assert!(report.degraded);
            assert!(report.outcomes.is_empty());
            assert_eq!(ctx.replies(), [raw]);
            assert_eq!(calls.load(Ordering::SeqCst), 0);
            h.stop().await;
        }

        #[tokio::test(start_paused = true)]
        async fn memories_are_imprinted() {
            let transport = ScriptedTransport::new();
            transport.reply("<reply>noted</reply><memory>[\"prefers green tea\"]</memory>");
            let h = start(transport, |_| {}, vec![]);

            let report = h
                .handle
                .submit(TestContext::ordinary(), inbound(), "I like green tea")
                .unwrap()
                .wait()
                .await
                .unwrap();
            assert_eq!(report.memories_stored, 1);
            let recalled = h.memory.recall("green tea", 5).await.unwrap();
            assert_eq!(recalled.len(), 1);
            assert_eq!(recalled[0].source, "session");
            h.stop().await;
        }
    }

    // ── Tools ──────────────────────────────────────────────────

    mod tools {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn unlisted_tool_is_denied_without_side_effect() {
            let transport = ScriptedTransport::new();
            transport.reply("<reply>trying</reply><actions>[{\"tool\": \"counter\"}]</actions>");
            let counter = CountingTool::new("counter");
            let calls = counter.calls.clone();
            let mut h = start(transport, |_| {}, vec![counter.boxed()]);

            let report = h
                .handle
                .submit(TestContext::ordinary(), inbound(), "do it")
                .unwrap()
                .wait()
                .await
                .unwrap();
            assert_eq!(report.outcomes.len(), 1);
            assert!(report.outcomes[0].is_error);
            assert_eq!(report.outcomes[0].error_kind, Some(ToolErrorKind::Permission));
            assert_eq!(calls.load(Ordering::SeqCst), 0);

            let mut denied = false;
            while let Ok(event) = h.events.try_recv() {
                if let Event::ToolDenied { tool_name, .. } = event {
                    denied = tool_name == "counter";
                }
            }
            assert!(denied);
            h.stop().await;
        }

        #[tokio::test(start_paused = true)]
        async fn privileged_origin_may_run_unlisted_tool() {
            let transport = ScriptedTransport::new();
            transport.reply("<reply>ok</reply><actions>[{\"tool\": \"counter\"}]</actions>");
            let counter = CountingTool::new("counter");
            let calls = counter.calls.clone();
            let h = start(transport, |_| {}, vec![counter.boxed()]);

            let report = h
                .handle
                .submit(TestContext::privileged(), inbound(), "do it")
                .unwrap()
                .wait()
                .await
                .unwrap();
            assert!(!report.outcomes[0].is_error);
            assert_eq!(report.outcomes[0].content, "counter ran");
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            h.stop().await;
        }

        #[tokio::test(start_paused = true)]
        async fn failing_tool_does_not_block_siblings() {
            let transport = ScriptedTransport::new();
            transport.reply(
                "<reply>go</reply><actions>[{\"tool\": \"boom\"}, {\"tool\": \"missing\"}, {\"tool\": \"counter\"}]</actions>",
            );
            let boom = CountingTool {
                explode: true,
                ..CountingTool::new("boom")
            };
            let counter = CountingTool::new("counter");
            let calls = counter.calls.clone();
            let h = start(
                transport,
                |c| {
                    c.tools
                        .allowlist
                        .extend(["boom", "counter", "missing"].map(String::from));
                },
                vec![boom.boxed(), counter.boxed()],
            );

            let report = h
                .handle
                .submit(TestContext::ordinary(), inbound(), "go")
                .unwrap()
                .wait()
                .await
                .unwrap();
            let kinds: Vec<_> = report.outcomes.iter().map(|o| o.error_kind).collect();
            assert_eq!(
                kinds,
                [
                    Some(ToolErrorKind::Execution),
                    Some(ToolErrorKind::NotFound),
                    None
                ]
            );
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            h.stop().await;
        }

        #[tokio::test(start_paused = true)]
        async fn invalid_arguments_are_reported() {
            let transport = ScriptedTransport::new();
            transport.reply(
                "<reply>looking</reply><actions>[{\"tool\": \"memory_recall\", \"args\": {\"limit\": 2}}]</actions>",
            );
            transport.reply("<reply>let me ask differently</reply>");
            let h = start(transport, |_| {}, vec![]);

            let report = h
                .handle
                .submit(TestContext::ordinary(), inbound(), "recall")
                .unwrap()
                .wait()
                .await
                .unwrap();
            assert_eq!(
                report.outcomes[0].error_kind,
                Some(ToolErrorKind::InvalidArguments)
            );
            assert!(report.outcomes[0].content.contains("query"));
            // The error goes back to the session like any other result.
            assert_eq!(report.follow_ups, 1);
            h.stop().await;
        }

        #[tokio::test(start_paused = true)]
        async fn feedback_runs_a_follow_up_inside_the_turn() {
            let transport = ScriptedTransport::new();
            transport.reply(
                "<reply>checking</reply><actions>[{\"tool\": \"memory_recall\", \"args\": {\"query\": \"tea\"}}]</actions>",
            );
            transport.reply("<reply>nothing on file</reply>");
            let h = start(transport, |_| {}, vec![]);

            let ctx = TestContext::ordinary();
            let report = h
                .handle
                .submit(ctx.clone(), inbound(), "what tea do I like?")
                .unwrap()
                .wait()
                .await
                .unwrap();
            assert_eq!(report.follow_ups, 1);
            assert_eq!(ctx.replies(), ["checking", "nothing on file"]);
            let prompts = h.transport.prompts();
            assert_eq!(prompts.len(), 2);
            assert!(prompts[1].starts_with("[tool results]"));
            assert!(prompts[1].contains("memory_recall"));
            h.stop().await;
        }

        #[tokio::test(start_paused = true)]
        async fn follow_ups_are_bounded() {
            let transport = ScriptedTransport::new();
            for hop in 0..5 {
                transport.reply(format!(
                    "<reply>hop {hop}</reply><actions>[{{\"tool\": \"loop\"}}]</actions>"
                ));
            }
            let looping = CountingTool {
                feedback: true,
                ..CountingTool::new("loop")
            };
            let calls = looping.calls.clone();
            let h = start(
                transport,
                |c| {
                    c.tools.allowlist.push("loop".into());
                    c.queue.max_follow_up_hops = 2;
                },
                vec![looping.boxed()],
            );

            let report = h
                .handle
                .submit(TestContext::ordinary(), inbound(), "start")
                .unwrap()
                .wait()
                .await
                .unwrap();
            assert_eq!(report.follow_ups, 2);
            assert_eq!(h.transport.prompts().len(), 3);
            assert_eq!(calls.load(Ordering::SeqCst), 3);
            assert_eq!(h.transport.remaining_scripts(), 2);
            h.stop().await;
        }

        #[tokio::test(start_paused = true)]
        async fn schedule_task_lands_in_memory() {
            let transport = ScriptedTransport::new();
            transport.reply(
                "<reply>will do</reply><actions>[{\"tool\": \"schedule_task\", \"args\": {\"task\": \"water plants\", \"delay_minutes\": 30}}]</actions>",
            );
            let h = start(
                transport,
                |c| c.tools.allowlist.push("schedule_task".into()),
                vec![],
            );

            let report = h
                .handle
                .submit(TestContext::ordinary(), inbound(), "remind me")
                .unwrap()
                .wait()
                .await
                .unwrap();
            assert!(!report.outcomes[0].is_error);
            let pending = h.memory.pending_schedules().unwrap();
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].task, "water plants");
            h.stop().await;
        }

        #[tokio::test(start_paused = true)]
        async fn propose_patch_is_refused_outside_reflection() {
            let transport = ScriptedTransport::new();
            transport.reply(
                "<reply>patching</reply><actions>[{\"tool\": \"propose_patch\", \"args\": {\"target\": \"persona\", \"content\": \"x\", \"description\": \"d\"}}]</actions>",
            );
            let h = start(transport, |_| {}, vec![]);

            let report = h
                .handle
                .submit(TestContext::privileged(), inbound(), "change yourself")
                .unwrap()
                .wait()
                .await
                .unwrap();
            assert_eq!(report.outcomes[0].error_kind, Some(ToolErrorKind::Permission));
            assert!(h.handle.patches().pending().await.is_none());
            h.stop().await;
        }

        #[tokio::test]
        async fn reflection_turn_yields_a_single_proposal() {
            let targets = tempfile::tempdir().unwrap();
            let live = targets.path().join("persona.md");
            std::fs::write(&live, "live").unwrap();

            let transport = ScriptedTransport::new();
            transport.reply(
                "<reply>two ideas</reply><actions>[\
                 {\"tool\": \"propose_patch\", \"args\": {\"target\": \"persona\", \"content\": \"revision one\", \"description\": \"one\"}},\
                 {\"tool\": \"propose_patch\", \"args\": {\"target\": \"persona\", \"content\": \"revision two\", \"description\": \"two\"}}\
                 ]</actions>",
            );
            let target = live.clone();
            let h = start(
                transport,
                move |c| {
                    c.patch.targets.insert("persona".into(), target);
                },
                vec![],
            );

            let report = h
                .handle
                .submit(
                    Arc::new(SystemContext::new()),
                    RequestOrigin::system(SystemTrigger::Reflection),
                    "reflect",
                )
                .unwrap()
                .wait()
                .await
                .unwrap();

            assert_eq!(report.outcomes.len(), 2);
            assert!(!report.outcomes[0].is_error, "{}", report.outcomes[0].content);
            assert!(report.outcomes[0].content.contains("pending operator approval"));
            assert!(report.outcomes[1].is_error);
            assert_eq!(report.outcomes[1].error_kind, Some(ToolErrorKind::Execution));
            assert!(report.outcomes[1].content.contains("already pending"));

            let pending = h.handle.patches().pending().await.unwrap();
            assert_eq!(pending.description, "one");
            assert_eq!(std::fs::read_to_string(&pending.clone_path).unwrap(), "revision one");
            assert_eq!(std::fs::read_to_string(&live).unwrap(), "live");
            assert!(h.handle.patches().history().await.is_empty());
            h.stop().await;
        }
    }

    // ── Failures and shutdown ──────────────────────────────────

    mod lifecycle {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn timeout_fails_the_turn_and_frees_the_session() {
            let transport = ScriptedTransport::new();
            let h = start(transport, |_| {}, vec![]);

            let ctx = TestContext::ordinary();
            let first = h.handle.submit(ctx.clone(), inbound(), "anyone?").unwrap();
            let err = first.wait().await.unwrap_err();
            assert!(matches!(err, TetherError::SessionTimeout { .. }));
            assert_eq!(ctx.replies().len(), 1);
            assert!(!h.handle.status().await.session.held);

            h.transport.reply("<reply>back</reply>");
            let report = h
                .handle
                .submit(ctx.clone(), inbound(), "now?")
                .unwrap()
                .wait()
                .await
                .unwrap();
            assert_eq!(report.reply.as_deref(), Some("back"));
            h.stop().await;
        }

        #[tokio::test(start_paused = true)]
        async fn crash_triggers_recovery_and_queue_continues() {
            let transport = ScriptedTransport::new();
            transport.fail_submits(1);
            transport.reply("<reply>recovered</reply>");
            let h = start(transport, |_| {}, vec![]);

            let ctx = TestContext::ordinary();
            let first = h.handle.submit(ctx.clone(), inbound(), "one").unwrap();
            let second = h.handle.submit(ctx.clone(), inbound(), "two").unwrap();
            assert!(matches!(
                first.wait().await,
                Err(TetherError::SessionCrash(_))
            ));
            let report = second.wait().await.unwrap();
            assert_eq!(report.reply.as_deref(), Some("recovered"));
            assert_eq!(h.transport.recover_calls(), 1);
            h.stop().await;
        }

        #[tokio::test(start_paused = true)]
        async fn shutdown_finishes_the_in_flight_turn() {
            let transport = ScriptedTransport::new();
            transport.script((1..=10).map(|n| format!("<reply>{}</reply>", "word ".repeat(n))));
            let mut h = start(transport, |_| {}, vec![]);

            let ctx = TestContext::ordinary();
            let running = h.handle.submit(ctx.clone(), inbound(), "long one").unwrap();
            let queued = h.handle.submit(ctx.clone(), inbound(), "never").unwrap();
            let running_id = running.request_id();

            loop {
                if let Event::TurnStarted { request_id, .. } = h.events.recv().await.unwrap() {
                    if request_id == running_id {
                        break;
                    }
                }
            }
            h.cancel.cancel();

            let report = running.wait().await.unwrap();
            assert!(report.reply.unwrap().starts_with("word word"));
            assert!(matches!(queued.wait().await, Err(TetherError::QueueClosed)));
            h.task.await.unwrap();
            assert_eq!(h.transport.prompts(), ["long one"]);
        }

        #[tokio::test(start_paused = true)]
        async fn status_reports_queue_and_session() {
            let h = start(ScriptedTransport::new(), |c| c.queue.capacity = Some(8), vec![]);
            let status = h.handle.status().await;
            assert_eq!(status.queue_depth, 0);
            assert_eq!(status.queue_capacity, Some(8));
            assert!(!status.session.held);
            assert_eq!(status.session.transport, "scripted");
            assert!(status.pending_patch.is_none());
            h.stop().await;
        }

        #[tokio::test(start_paused = true)]
        async fn shutdown_event_is_published() {
            let mut h = start(ScriptedTransport::new(), |_| {}, vec![]);
            h.cancel.cancel();
            tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    if let Ok(Event::Shutdown) = h.events.recv().await {
                        break;
                    }
                }
            })
            .await
            .unwrap();
            h.task.await.unwrap();
        }
    }
}
