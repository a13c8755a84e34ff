use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tether_autonomy::{AutonomyScheduler, PatchPipeline, PatchProposal, SecurityGate};
use tether_config::TetherConfig;
use tether_core::{
    Event, EventBus, OriginContext, RequestOrigin, RequestSink, TetherError, TurnHandle,
};
use tether_memory::Memory;
use tether_session::{GateStatus, SessionGate, SessionTransport};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::SystemContext;
use crate::dispatch::ProtocolDispatcher;
use crate::events::spawn_event_logger;
use crate::queue::{QueueReceiver, RequestQueue};
use crate::runner::TurnRunner;
use crate::tools::{BuiltinServices, ToolExecutor, ToolHandler, ToolRegistry, register_builtins};

/// The assembled relay, ready to run.
pub struct Runtime {
    config: TetherConfig,
    events: EventBus,
    queue: RequestQueue,
    receiver: QueueReceiver,
    gate: SessionGate,
    memory: Arc<dyn Memory>,
    patches: Arc<PatchPipeline>,
    registry: ToolRegistry,
    system_context: Arc<dyn OriginContext>,
    started_at: Instant,
}

impl Runtime {
    pub fn new(
        config: TetherConfig,
        transport: Arc<dyn SessionTransport>,
        memory: Arc<dyn Memory>,
    ) -> tether_core::Result<Self> {
        config.validate().map_err(TetherError::Config)?;

        let events = EventBus::default();
        let (queue, receiver) = RequestQueue::new(config.queue.capacity, events.clone());
        let gate = SessionGate::new(transport, config.session.clone(), events.clone());
        let patches = Arc::new(PatchPipeline::new(config.patch.clone(), events.clone()));

        let mut registry = ToolRegistry::new();
        register_builtins(
            &mut registry,
            &BuiltinServices {
                memory: Arc::clone(&memory),
                patches: Arc::clone(&patches),
                recall_limit: config.memory.recall_limit,
                shell_timeout: Duration::from_secs(config.tools.timeout_secs),
            },
        );

        Ok(Self {
            config,
            events,
            queue,
            receiver,
            gate,
            memory,
            patches,
            registry,
            system_context: Arc::new(SystemContext::new()),
            started_at: Instant::now(),
        })
    }

    /// Route system-turn replies to `context` instead of the log.
    pub fn with_outreach(mut self, context: Arc<dyn OriginContext>) -> Self {
        self.system_context = Arc::new(SystemContext::with_outreach(context));
        self
    }

    /// Add or replace a tool before the runtime starts.
    pub fn register_tool(&mut self, handler: Arc<dyn ToolHandler>) {
        self.registry.register(handler);
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            queue: self.queue.clone(),
            gate: self.gate.clone(),
            patches: Arc::clone(&self.patches),
            events: self.events.clone(),
            started_at: self.started_at,
        }
    }

    /// Run until `cancel` fires. Producers stop first; the in-flight turn,
    /// if any, finishes before this returns.
    pub async fn run(self, cancel: CancellationToken) {
        let logger = spawn_event_logger(&self.events);

        let executor = ToolExecutor::new(
            self.registry,
            Duration::from_secs(self.config.tools.timeout_secs),
            self.events.clone(),
        );
        let dispatcher = Arc::new(ProtocolDispatcher::new(
            Arc::new(SecurityGate::from_config(&self.config.tools)),
            executor,
            Arc::clone(&self.memory),
            self.events.clone(),
            self.config.tools.max_parallel,
        ));
        let runner = TurnRunner::new(
            self.gate.clone(),
            dispatcher,
            self.events.clone(),
            self.config.queue.max_follow_up_hops,
        );

        let scheduler = Arc::new(AutonomyScheduler::new(
            self.config.autonomy.clone(),
            Arc::new(self.queue.clone()),
            Arc::clone(&self.memory),
            Arc::clone(&self.system_context),
            self.events.clone(),
        ));
        let wake = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            let cancel = cancel.clone();
            async move { scheduler.run_wake_loop(cancel).await }
        });
        let due = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            let cancel = cancel.clone();
            async move { scheduler.run_due_watcher(cancel).await }
        });

        info!(transport = %self.gate.status().transport, "runtime started");
        runner.run(self.receiver, cancel).await;

        for (name, task) in [("wake timer", wake), ("due-task watcher", due)] {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "background task ended abnormally");
            }
        }

        self.events.publish(Event::Shutdown);
        if let Err(e) = logger.await {
            warn!(error = %e, "event logger ended abnormally");
        }
        info!("runtime stopped");
    }
}

/// Point-in-time view for the operator surface.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub queue_depth: usize,
    pub queue_capacity: Option<usize>,
    pub session: GateStatus,
    pub pending_patch: Option<PatchProposal>,
    pub uptime_secs: u64,
}

/// Cheap, cloneable access to a running [`Runtime`].
#[derive(Clone)]
pub struct RuntimeHandle {
    queue: RequestQueue,
    gate: SessionGate,
    patches: Arc<PatchPipeline>,
    events: EventBus,
    started_at: Instant,
}

impl RuntimeHandle {
    pub fn submit(
        &self,
        context: Arc<dyn OriginContext>,
        origin: RequestOrigin,
        prompt: impl Into<String>,
    ) -> tether_core::Result<TurnHandle> {
        self.queue.enqueue(context, origin, prompt)
    }

    pub async fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            queue_depth: self.queue.depth(),
            queue_capacity: self.queue.capacity(),
            session: self.gate.status(),
            pending_patch: self.patches.pending().await,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    pub fn patches(&self) -> &PatchPipeline {
        &self.patches
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}

impl RequestSink for RuntimeHandle {
    fn submit(
        &self,
        context: Arc<dyn OriginContext>,
        origin: RequestOrigin,
        prompt: String,
    ) -> tether_core::Result<TurnHandle> {
        self.queue.enqueue(context, origin, prompt)
    }
}
