//! In-process task scheduler for detached pipeline work.
//!
//! Every submitted task runs on its own tokio task, gated by a per-kind
//! semaphore and wrapped in an error boundary: handler failures, timeouts,
//! and panics all become [`TaskOutcome::Failed`] and are logged here. A
//! handler that times out is cancelled, not left running, and gets an
//! [`TaskHandler::on_abandoned`] callback to repair any state it left behind.
//! The returned [`TaskTicket`] can be awaited to rejoin the task or dropped
//! to let it run on its own.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::{oneshot, Notify, RwLock, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use clearview_core::{defaults, Error, EventBus, Result, ServerEvent};

/// Kinds of background work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// The full notification sequence for one call.
    NotificationPipeline,
    /// One video generation run.
    VideoGeneration,
}

impl TaskKind {
    pub const ALL: [TaskKind; 2] = [TaskKind::NotificationPipeline, TaskKind::VideoGeneration];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotificationPipeline => "notification_pipeline",
            Self::VideoGeneration => "video_generation",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context handed to a task handler.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: Uuid,
    pub kind: TaskKind,
    pub call_id: Uuid,
    pub payload: JsonValue,
}

/// What a handler reports.
#[derive(Debug)]
pub enum TaskResult {
    Success(Option<JsonValue>),
    Failed(String),
}

/// What a ticket resolves to after the error boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed(Option<JsonValue>),
    Failed(String),
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Result data of a completed task.
    pub fn data(&self) -> Option<&JsonValue> {
        match self {
            Self::Completed(data) => data.as_ref(),
            Self::Failed(_) => None,
        }
    }
}

/// Handler for one task kind.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn kind(&self) -> TaskKind;

    async fn execute(&self, ctx: TaskContext) -> TaskResult;

    /// Called after `execute` panicked or was cancelled by the task timeout.
    async fn on_abandoned(&self, _ctx: &TaskContext, _reason: &str) {}
}

/// Handle to a submitted task.
#[derive(Debug)]
pub struct TaskTicket {
    pub task_id: Uuid,
    pub kind: TaskKind,
    rx: oneshot::Receiver<TaskOutcome>,
}

impl TaskTicket {
    /// Wait for the task to finish.
    pub async fn join(self) -> TaskOutcome {
        self.rx
            .await
            .unwrap_or_else(|_| TaskOutcome::Failed("task dropped before completion".to_string()))
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Whether tasks are accepted at all.
    pub enabled: bool,
    pub pipeline_concurrency: usize,
    pub video_concurrency: usize,
    pub task_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pipeline_concurrency: defaults::PIPELINE_MAX_CONCURRENT,
            video_concurrency: defaults::VIDEO_MAX_CONCURRENT,
            task_timeout: Duration::from_secs(defaults::TASK_TIMEOUT_SECS),
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TASK_WORKER_ENABLED` | `true` | Accept background tasks |
    /// | `PIPELINE_MAX_CONCURRENT` | `8` | Concurrent notification pipelines |
    /// | `VIDEO_MAX_CONCURRENT` | `4` | Concurrent video generation runs |
    /// | `TASK_TIMEOUT_SECS` | `900` | Upper bound on one task |
    pub fn from_env() -> Self {
        let enabled = std::env::var("TASK_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let env_usize = |name: &str, default: usize| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(default)
                .max(1)
        };

        let task_timeout = std::env::var("TASK_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::TASK_TIMEOUT_SECS);

        Self {
            enabled,
            pipeline_concurrency: env_usize(
                "PIPELINE_MAX_CONCURRENT",
                defaults::PIPELINE_MAX_CONCURRENT,
            ),
            video_concurrency: env_usize("VIDEO_MAX_CONCURRENT", defaults::VIDEO_MAX_CONCURRENT),
            task_timeout: Duration::from_secs(task_timeout),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_concurrency(mut self, kind: TaskKind, max: usize) -> Self {
        match kind {
            TaskKind::NotificationPipeline => self.pipeline_concurrency = max.max(1),
            TaskKind::VideoGeneration => self.video_concurrency = max.max(1),
        }
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    fn concurrency(&self, kind: TaskKind) -> usize {
        match kind {
            TaskKind::NotificationPipeline => self.pipeline_concurrency,
            TaskKind::VideoGeneration => self.video_concurrency,
        }
    }
}

struct Lane {
    permits: Arc<Semaphore>,
    running: AtomicUsize,
}

struct Inner {
    config: SchedulerConfig,
    handlers: RwLock<HashMap<TaskKind, Arc<dyn TaskHandler>>>,
    lanes: HashMap<TaskKind, Lane>,
    events: EventBus,
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// In-process scheduler. Cheap to clone.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig, events: EventBus) -> Self {
        let lanes = TaskKind::ALL
            .iter()
            .map(|kind| {
                (
                    *kind,
                    Lane {
                        permits: Arc::new(Semaphore::new(config.concurrency(*kind))),
                        running: AtomicUsize::new(0),
                    },
                )
            })
            .collect();
        let accepting = AtomicBool::new(config.enabled);
        Self {
            inner: Arc::new(Inner {
                config,
                handlers: RwLock::new(HashMap::new()),
                lanes,
                events,
                accepting,
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Register the handler for a task kind, replacing any previous one.
    pub async fn register_handler<H: TaskHandler + 'static>(&self, handler: H) {
        let kind = handler.kind();
        self.inner
            .handlers
            .write()
            .await
            .insert(kind, Arc::new(handler));
        debug!(subsystem = "jobs", component = "scheduler", %kind, "Registered task handler");
    }

    /// Submit a task. Fails when the scheduler is disabled or shutting down.
    pub async fn submit(
        &self,
        kind: TaskKind,
        call_id: Uuid,
        payload: JsonValue,
    ) -> Result<TaskTicket> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(Error::Task(format!(
                "scheduler is not accepting {} tasks",
                kind
            )));
        }

        let handler = self.inner.handlers.read().await.get(&kind).cloned();
        let Some(handler) = handler else {
            return Err(Error::Task(format!("no handler registered for {}", kind)));
        };

        let task_id = Uuid::now_v7();
        let (tx, rx) = oneshot::channel();
        let ctx = TaskContext {
            task_id,
            kind,
            call_id,
            payload,
        };

        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        self.inner.events.emit(ServerEvent::TaskQueued {
            task_id,
            task_kind: kind.to_string(),
            call_id,
        });
        debug!(
            subsystem = "jobs",
            component = "scheduler",
            %task_id,
            task_kind = %kind,
            %call_id,
            "Task queued"
        );

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let outcome = inner.run_task(handler, ctx).await;
            // Receiver may have been dropped (fire-and-forget).
            let _ = tx.send(outcome);
            if inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                inner.idle.notify_waiters();
            }
        });

        Ok(TaskTicket { task_id, kind, rx })
    }

    /// Tasks of this kind currently holding a permit.
    pub fn running(&self, kind: TaskKind) -> usize {
        self.inner
            .lanes
            .get(&kind)
            .map(|lane| lane.running.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Running task counts keyed by kind name.
    pub fn running_counts(&self) -> HashMap<&'static str, usize> {
        TaskKind::ALL
            .iter()
            .map(|kind| (kind.as_str(), self.running(*kind)))
            .collect()
    }

    /// Submitted tasks that have not finished, queued or running.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// Stop accepting tasks and wait up to `grace` for in-flight ones.
    /// Returns the number still running when the wait ended.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.inner.accepting.store(false, Ordering::SeqCst);
        info!(
            subsystem = "jobs",
            component = "scheduler",
            in_flight = self.in_flight(),
            "Task scheduler shutting down"
        );

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let notified = self.inner.idle.notified();
            if self.in_flight() == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        let remaining = self.in_flight();
        if remaining > 0 {
            warn!(
                subsystem = "jobs",
                component = "scheduler",
                remaining,
                "Shutdown grace elapsed with tasks still running"
            );
        } else {
            info!(subsystem = "jobs", component = "scheduler", "Task scheduler stopped");
        }
        remaining
    }
}

impl Inner {
    async fn run_task(&self, handler: Arc<dyn TaskHandler>, ctx: TaskContext) -> TaskOutcome {
        let TaskContext {
            task_id,
            kind,
            call_id,
            ..
        } = ctx;

        let Some(lane) = self.lanes.get(&kind) else {
            return TaskOutcome::Failed(format!("no lane for {}", kind));
        };
        let _permit = match lane.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return TaskOutcome::Failed("scheduler closed".to_string()),
        };
        lane.running.fetch_add(1, Ordering::SeqCst);

        let start = Instant::now();
        info!(
            subsystem = "jobs",
            component = "scheduler",
            %task_id,
            task_kind = %kind,
            %call_id,
            "Task started"
        );
        self.events.emit(ServerEvent::TaskStarted {
            task_id,
            task_kind: kind.to_string(),
            call_id,
        });

        // Run the handler on its own task so a panic surfaces as a JoinError.
        // The timeout wraps the handler inside that task, so expiry drops
        // the handler future instead of detaching it.
        let timeout = self.config.task_timeout;
        let runner = handler.clone();
        let task_ctx = ctx.clone();
        let join =
            tokio::spawn(async move { tokio::time::timeout(timeout, runner.execute(task_ctx)).await });
        let (outcome, abandoned) = match join.await {
            Ok(Ok(TaskResult::Success(data))) => (TaskOutcome::Completed(data), false),
            Ok(Ok(TaskResult::Failed(error))) => (TaskOutcome::Failed(error), false),
            Ok(Err(_elapsed)) => (
                TaskOutcome::Failed(format!(
                    "task exceeded timeout of {}s",
                    timeout.as_secs()
                )),
                true,
            ),
            Err(join_error) if join_error.is_panic() => {
                error!(
                    subsystem = "jobs",
                    component = "scheduler",
                    %task_id,
                    task_kind = %kind,
                    "Task panicked"
                );
                (TaskOutcome::Failed("task panicked".to_string()), true)
            }
            Err(join_error) => (
                TaskOutcome::Failed(format!("task aborted: {}", join_error)),
                true,
            ),
        };

        if abandoned {
            if let TaskOutcome::Failed(reason) = &outcome {
                handler.on_abandoned(&ctx, reason).await;
            }
        }

        lane.running.fetch_sub(1, Ordering::SeqCst);
        let duration_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            TaskOutcome::Completed(_) => {
                info!(
                    subsystem = "jobs",
                    component = "scheduler",
                    %task_id,
                    task_kind = %kind,
                    %call_id,
                    duration_ms,
                    "Task completed"
                );
                self.events.emit(ServerEvent::TaskCompleted {
                    task_id,
                    task_kind: kind.to_string(),
                    call_id,
                    duration_ms,
                });
            }
            TaskOutcome::Failed(error) => {
                warn!(
                    subsystem = "jobs",
                    component = "scheduler",
                    %task_id,
                    task_kind = %kind,
                    %call_id,
                    %error,
                    duration_ms,
                    "Task failed"
                );
                self.events.emit(ServerEvent::TaskFailed {
                    task_id,
                    task_kind: kind.to_string(),
                    call_id,
                    error: error.clone(),
                });
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoHandler(TaskKind);

    #[async_trait]
    impl TaskHandler for EchoHandler {
        fn kind(&self) -> TaskKind {
            self.0
        }

        async fn execute(&self, ctx: TaskContext) -> TaskResult {
            TaskResult::Success(Some(ctx.payload))
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl TaskHandler for FailingHandler {
        fn kind(&self) -> TaskKind {
            TaskKind::VideoGeneration
        }

        async fn execute(&self, _ctx: TaskContext) -> TaskResult {
            TaskResult::Failed("boom".to_string())
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl TaskHandler for PanickingHandler {
        fn kind(&self) -> TaskKind {
            TaskKind::NotificationPipeline
        }

        async fn execute(&self, _ctx: TaskContext) -> TaskResult {
            panic!("handler bug");
        }
    }

    struct SlowHandler(Duration);

    #[async_trait]
    impl TaskHandler for SlowHandler {
        fn kind(&self) -> TaskKind {
            TaskKind::VideoGeneration
        }

        async fn execute(&self, _ctx: TaskContext) -> TaskResult {
            tokio::time::sleep(self.0).await;
            TaskResult::Success(None)
        }
    }

    fn scheduler() -> TaskScheduler {
        TaskScheduler::new(SchedulerConfig::default(), EventBus::default())
    }

    #[test]
    fn test_task_kind_names() {
        assert_eq!(TaskKind::NotificationPipeline.to_string(), "notification_pipeline");
        assert_eq!(TaskKind::VideoGeneration.as_str(), "video_generation");
    }

    #[test]
    fn test_config_builders() {
        let config = SchedulerConfig::default()
            .with_enabled(false)
            .with_concurrency(TaskKind::VideoGeneration, 0)
            .with_task_timeout(Duration::from_secs(5));
        assert!(!config.enabled);
        assert_eq!(config.video_concurrency, 1);
        assert_eq!(config.task_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_submit_and_join() {
        let scheduler = scheduler();
        scheduler
            .register_handler(EchoHandler(TaskKind::NotificationPipeline))
            .await;

        let ticket = scheduler
            .submit(TaskKind::NotificationPipeline, Uuid::nil(), json!({"n": 1}))
            .await
            .unwrap();
        assert_eq!(ticket.kind, TaskKind::NotificationPipeline);
        assert_eq!(ticket.join().await, TaskOutcome::Completed(Some(json!({"n": 1}))));
    }

    #[tokio::test]
    async fn test_failed_result_is_contained() {
        let scheduler = scheduler();
        scheduler.register_handler(FailingHandler).await;
        let outcome = scheduler
            .submit(TaskKind::VideoGeneration, Uuid::nil(), JsonValue::Null)
            .await
            .unwrap()
            .join()
            .await;
        assert_eq!(outcome, TaskOutcome::Failed("boom".to_string()));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let scheduler = scheduler();
        scheduler.register_handler(PanickingHandler).await;
        let outcome = scheduler
            .submit(TaskKind::NotificationPipeline, Uuid::nil(), JsonValue::Null)
            .await
            .unwrap()
            .join()
            .await;
        assert_eq!(outcome, TaskOutcome::Failed("task panicked".to_string()));
        assert_eq!(scheduler.running(TaskKind::NotificationPipeline), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_failure() {
        let scheduler = TaskScheduler::new(
            SchedulerConfig::default().with_task_timeout(Duration::from_secs(1)),
            EventBus::default(),
        );
        scheduler
            .register_handler(SlowHandler(Duration::from_secs(60)))
            .await;
        let outcome = scheduler
            .submit(TaskKind::VideoGeneration, Uuid::nil(), JsonValue::Null)
            .await
            .unwrap()
            .join()
            .await;
        assert!(matches!(outcome, TaskOutcome::Failed(msg) if msg.contains("timeout")));
    }

    /// Sleeps past the timeout, then records that it resumed.
    struct FlagAfterSleep {
        sleep: Duration,
        resumed: Arc<AtomicBool>,
        abandoned: Arc<std::sync::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl TaskHandler for FlagAfterSleep {
        fn kind(&self) -> TaskKind {
            TaskKind::NotificationPipeline
        }

        async fn execute(&self, _ctx: TaskContext) -> TaskResult {
            tokio::time::sleep(self.sleep).await;
            self.resumed.store(true, Ordering::SeqCst);
            TaskResult::Success(None)
        }

        async fn on_abandoned(&self, _ctx: &TaskContext, reason: &str) {
            self.abandoned.lock().unwrap().push(reason.to_string());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_handler_is_cancelled() {
        let scheduler = TaskScheduler::new(
            SchedulerConfig::default().with_task_timeout(Duration::from_secs(5)),
            EventBus::default(),
        );
        let resumed = Arc::new(AtomicBool::new(false));
        let abandoned = Arc::new(std::sync::Mutex::new(Vec::new()));
        scheduler
            .register_handler(FlagAfterSleep {
                sleep: Duration::from_secs(60),
                resumed: resumed.clone(),
                abandoned: abandoned.clone(),
            })
            .await;

        let outcome = scheduler
            .submit(TaskKind::NotificationPipeline, Uuid::nil(), JsonValue::Null)
            .await
            .unwrap()
            .join()
            .await;
        assert_eq!(
            outcome,
            TaskOutcome::Failed("task exceeded timeout of 5s".to_string())
        );
        assert_eq!(scheduler.running(TaskKind::NotificationPipeline), 0);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!resumed.load(Ordering::SeqCst), "handler kept running after timeout");
        assert_eq!(
            *abandoned.lock().unwrap(),
            vec!["task exceeded timeout of 5s".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_handler_is_not_abandoned() {
        let scheduler = scheduler();
        let resumed = Arc::new(AtomicBool::new(false));
        let abandoned = Arc::new(std::sync::Mutex::new(Vec::new()));
        scheduler
            .register_handler(FlagAfterSleep {
                sleep: Duration::from_secs(1),
                resumed: resumed.clone(),
                abandoned: abandoned.clone(),
            })
            .await;

        let outcome = scheduler
            .submit(TaskKind::NotificationPipeline, Uuid::nil(), JsonValue::Null)
            .await
            .unwrap()
            .join()
            .await;
        assert!(outcome.is_completed());
        assert!(resumed.load(Ordering::SeqCst));
        assert!(abandoned.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_handler_rejected() {
        let scheduler = scheduler();
        let err = scheduler
            .submit(TaskKind::VideoGeneration, Uuid::nil(), JsonValue::Null)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no handler"));
    }

    #[tokio::test]
    async fn test_disabled_scheduler_rejects() {
        let scheduler = TaskScheduler::new(
            SchedulerConfig::default().with_enabled(false),
            EventBus::default(),
        );
        scheduler.register_handler(FailingHandler).await;
        assert!(!scheduler.is_accepting());
        assert!(scheduler
            .submit(TaskKind::VideoGeneration, Uuid::nil(), JsonValue::Null)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_events_emitted_in_order() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let scheduler = TaskScheduler::new(SchedulerConfig::default(), events);
        scheduler
            .register_handler(EchoHandler(TaskKind::VideoGeneration))
            .await;
        scheduler
            .submit(TaskKind::VideoGeneration, Uuid::nil(), JsonValue::Null)
            .await
            .unwrap()
            .join()
            .await;

        let types: Vec<String> = (0..3)
            .map(|_| rx.try_recv().unwrap().event_type)
            .collect();
        assert_eq!(types, vec!["task.queued", "task.started", "task.completed"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit_per_kind() {
        let scheduler = TaskScheduler::new(
            SchedulerConfig::default().with_concurrency(TaskKind::VideoGeneration, 1),
            EventBus::default(),
        );
        scheduler
            .register_handler(SlowHandler(Duration::from_secs(10)))
            .await;

        let first = scheduler
            .submit(TaskKind::VideoGeneration, Uuid::nil(), JsonValue::Null)
            .await
            .unwrap();
        let second = scheduler
            .submit(TaskKind::VideoGeneration, Uuid::nil(), JsonValue::Null)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(scheduler.running(TaskKind::VideoGeneration), 1);
        assert_eq!(scheduler.in_flight(), 2);

        assert!(first.join().await.is_completed());
        assert!(second.join().await.is_completed());
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight() {
        let scheduler = scheduler();
        scheduler
            .register_handler(SlowHandler(Duration::from_secs(5)))
            .await;
        let ticket = scheduler
            .submit(TaskKind::VideoGeneration, Uuid::nil(), JsonValue::Null)
            .await
            .unwrap();
        drop(ticket);

        let remaining = scheduler.shutdown(Duration::from_secs(30)).await;
        assert_eq!(remaining, 0);
        assert!(scheduler
            .submit(TaskKind::VideoGeneration, Uuid::nil(), JsonValue::Null)
            .await
            .is_err());
    }
}
