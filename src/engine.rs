//! Scheduling engine.
//!
//! A [`Scheduler`] is a cheap handle to a single actor task that owns all
//! run state. The actor multiplexes four sources on one `select!` loop:
//! caller commands, the dispatch timer, the validation (watchdog) timer,
//! and completions of the at-most-one in-flight poster call and liveness
//! check. Every state mutation therefore happens on the actor task and no
//! lock guards engine state.
//!
//! Callers observe the engine through a `watch` snapshot and a `broadcast`
//! stream of [`EngineEvent`]s.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{PksError, Result};
use crate::hierarchy::ProcessHierarchyResolver;
use crate::poster::{Dispatch, EventPoster};
use crate::step::KeyStep;
use crate::window::WindowDescriptor;

pub const DEFAULT_VALIDATION_PERIOD: Duration = Duration::from_secs(3);
pub const DEFAULT_LOG_CAPACITY: usize = 500;
const DEFAULT_INTERVAL_MS: u64 = 1000;
const EVENT_CAPACITY: usize = 256;
const COMMAND_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendingState {
    #[default]
    Idle,
    Running,
    Paused,
}

impl fmt::Display for SendingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Key,
    State,
    Error,
    Warn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: LogKind,
    pub message: String,
}

impl LogEntry {
    pub fn new(kind: LogKind, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            message: message.into(),
        }
    }
}

/// Append-only log with oldest-first eviction.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
            capacity,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// Notifications emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    CountChanged(u64),
    StateChanged(SendingState),
    CycleCompleted(u64),
    Error(String),
    /// The watchdog found the target gone and paused the run.
    WindowInvalid,
    Log(LogEntry),
}

/// Read-only view of the engine, refreshed after every mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub state: SendingState,
    pub send_count: u64,
    pub cycles_completed: u64,
    pub interval_ms: u64,
    pub repeat_count: u32,
    pub target: Option<WindowDescriptor>,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            state: SendingState::Idle,
            send_count: 0,
            cycles_completed: 0,
            interval_ms: DEFAULT_INTERVAL_MS,
            repeat_count: 0,
            target: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Period of the target liveness check.
    pub validation_period: Duration,
    /// Number of log entries retained.
    pub log_capacity: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            validation_period: DEFAULT_VALIDATION_PERIOD,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

enum Command {
    Start {
        target: WindowDescriptor,
        steps: Vec<KeyStep>,
        interval_ms: u64,
        repeat_count: u32,
        reply: oneshot::Sender<Result<()>>,
    },
    Pause(oneshot::Sender<()>),
    Resume(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
    SetInterval(u64, oneshot::Sender<Result<()>>),
    Logs(oneshot::Sender<Vec<LogEntry>>),
}

/// Handle to a running scheduling engine.
///
/// Must be created inside a Tokio runtime. Dropping the handle tears the
/// engine down: both timers are cancelled without a stop log entry.
pub struct Scheduler {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<EngineSnapshot>,
    events: broadcast::Sender<EngineEvent>,
    task: JoinHandle<()>,
}

impl Scheduler {
    pub fn new(poster: Arc<dyn EventPoster>, resolver: ProcessHierarchyResolver) -> Self {
        Self::with_settings(poster, resolver, SchedulerSettings::default())
    }

    pub fn with_settings(
        poster: Arc<dyn EventPoster>,
        resolver: ProcessHierarchyResolver,
        settings: SchedulerSettings,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (snapshot_tx, snapshot) = watch::channel(EngineSnapshot::default());

        let engine = Engine::new(poster, resolver, settings, events.clone(), snapshot_tx);
        let task = tokio::spawn(engine.run(command_rx));

        Self {
            commands,
            snapshot,
            events,
            task,
        }
    }

    /// Begin a run from `Idle`.
    ///
    /// `steps` is copied; later edits to the caller's list do not affect
    /// the run. `repeat_count == 0` loops until stopped.
    pub async fn start(
        &self,
        target: WindowDescriptor,
        steps: &[KeyStep],
        interval_ms: u64,
        repeat_count: u32,
    ) -> Result<()> {
        let steps = steps.to_vec();
        self.request(|reply| Command::Start {
            target,
            steps,
            interval_ms,
            repeat_count,
            reply,
        })
        .await?
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.request(Command::Resume).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    /// Change the dispatch interval. A running timer is restarted at the
    /// new period; a paused run picks it up on resume.
    pub async fn set_interval(&self, interval_ms: u64) -> Result<()> {
        self.request(|reply| Command::SetInterval(interval_ms, reply))
            .await?
    }

    pub async fn log_entries(&self) -> Result<Vec<LogEntry>> {
        self.request(Command::Logs).await
    }

    pub fn state(&self) -> SendingState {
        self.snapshot.borrow().state
    }

    pub fn send_count(&self) -> u64 {
        self.snapshot.borrow().send_count
    }

    pub fn cycles_completed(&self) -> u64 {
        self.snapshot.borrow().cycles_completed
    }

    pub fn interval_ms(&self) -> u64 {
        self.snapshot.borrow().interval_ms
    }

    pub fn repeat_count(&self) -> u32 {
        self.snapshot.borrow().repeat_count
    }

    pub fn target(&self) -> Option<WindowDescriptor> {
        self.snapshot.borrow().target.clone()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| PksError::SchedulerClosed)?;
        response.await.map_err(|_| PksError::SchedulerClosed)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct InFlight {
    generation: u64,
    handle: JoinHandle<Result<bool>>,
}

struct Validation {
    generation: u64,
    handle: JoinHandle<bool>,
}

/// Actor-owned run state.
struct Engine {
    poster: Arc<dyn EventPoster>,
    resolver: ProcessHierarchyResolver,
    settings: SchedulerSettings,
    events: broadcast::Sender<EngineEvent>,
    snapshot: watch::Sender<EngineSnapshot>,
    log: LogBuffer,

    state: SendingState,
    target: Option<WindowDescriptor>,
    steps: Vec<KeyStep>,
    cursor: usize,
    send_count: u64,
    cycles_completed: u64,
    interval: Duration,
    repeat_count: u32,

    // Bumped whenever a run ends so late completions can be recognised.
    generation: u64,
    dispatch_timer: Option<Interval>,
    validation_timer: Option<Interval>,
    // Reentrancy guard: a tick is dropped while this is set.
    in_flight: Option<InFlight>,
    validating: Option<Validation>,
}

impl Engine {
    fn new(
        poster: Arc<dyn EventPoster>,
        resolver: ProcessHierarchyResolver,
        settings: SchedulerSettings,
        events: broadcast::Sender<EngineEvent>,
        snapshot: watch::Sender<EngineSnapshot>,
    ) -> Self {
        let log = LogBuffer::new(settings.log_capacity);
        Self {
            poster,
            resolver,
            settings,
            events,
            snapshot,
            log,
            state: SendingState::Idle,
            target: None,
            steps: Vec::new(),
            cursor: 0,
            send_count: 0,
            cycles_completed: 0,
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            repeat_count: 0,
            generation: 0,
            dispatch_timer: None,
            validation_timer: None,
            in_flight: None,
            validating: None,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = next_tick(self.dispatch_timer.as_mut()) => self.on_dispatch_tick(),
                _ = next_tick(self.validation_timer.as_mut()) => self.on_validation_tick(),
                outcome = join(self.in_flight.as_mut().map(|f| &mut f.handle)) => {
                    self.on_dispatch_complete(outcome);
                }
                outcome = join(self.validating.as_mut().map(|v| &mut v.handle)) => {
                    self.on_validation_complete(outcome);
                }
            }
            self.publish();
        }
        debug!("scheduler handle dropped, engine exiting");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Start {
                target,
                steps,
                interval_ms,
                repeat_count,
                reply,
            } => {
                let result = self.start(target, steps, interval_ms, repeat_count);
                self.publish();
                let _ = reply.send(result);
            }
            Command::Pause(reply) => {
                self.pause();
                self.publish();
                let _ = reply.send(());
            }
            Command::Resume(reply) => {
                self.resume();
                self.publish();
                let _ = reply.send(());
            }
            Command::Stop(reply) => {
                self.stop();
                self.publish();
                let _ = reply.send(());
            }
            Command::SetInterval(interval_ms, reply) => {
                let result = self.set_interval(interval_ms);
                self.publish();
                let _ = reply.send(result);
            }
            Command::Logs(reply) => {
                let _ = reply.send(self.log.entries());
            }
        }
    }

    fn start(
        &mut self,
        target: WindowDescriptor,
        steps: Vec<KeyStep>,
        interval_ms: u64,
        repeat_count: u32,
    ) -> Result<()> {
        if self.state != SendingState::Idle {
            return Err(PksError::InvalidTransition {
                operation: "start",
                state: self.state,
            });
        }
        if steps.is_empty() {
            return Err(PksError::configuration("step sequence is empty"));
        }
        if interval_ms == 0 {
            return Err(PksError::configuration("interval must be greater than zero"));
        }

        let repeat = match repeat_count {
            0 => "looping".to_string(),
            n => format!("{n} cycle(s)"),
        };
        let message = format!(
            "Started: {} step(s) to {} every {} ms, {}",
            steps.len(),
            target.display_name(),
            interval_ms,
            repeat
        );

        self.generation += 1;
        self.steps = steps;
        self.target = Some(target);
        self.cursor = 0;
        self.send_count = 0;
        self.cycles_completed = 0;
        self.interval = Duration::from_millis(interval_ms);
        self.repeat_count = repeat_count;
        self.dispatch_timer = Some(periodic(self.interval));
        self.validation_timer = Some(periodic(self.settings.validation_period));

        self.emit(EngineEvent::CountChanged(0));
        self.set_state(SendingState::Running, message);
        Ok(())
    }

    fn pause(&mut self) {
        if self.state != SendingState::Running {
            return;
        }
        // The watchdog keeps running while paused.
        self.dispatch_timer = None;
        self.set_state(SendingState::Paused, "Paused");
    }

    fn resume(&mut self) {
        if self.state != SendingState::Paused {
            return;
        }
        self.dispatch_timer = Some(periodic(self.interval));
        self.set_state(
            SendingState::Running,
            format!("Resumed every {} ms", self.interval.as_millis()),
        );
    }

    fn stop(&mut self) {
        if self.state == SendingState::Idle {
            return;
        }
        let sent = self.send_count;
        self.end_run();
        self.send_count = 0;
        self.cycles_completed = 0;
        self.emit(EngineEvent::CountChanged(0));
        self.set_state(SendingState::Idle, format!("Stopped after {sent} send(s)"));
    }

    /// Finite repeat reached. Counters are kept for inspection.
    fn finish(&mut self) {
        self.end_run();
        let message = format!(
            "Completed {} cycle(s), {} send(s)",
            self.cycles_completed, self.send_count
        );
        self.set_state(SendingState::Idle, message);
    }

    fn end_run(&mut self) {
        self.dispatch_timer = None;
        self.validation_timer = None;
        // A pending liveness check is detached; an in-flight send keeps the
        // guard until it resolves and is then discarded by generation.
        self.validating = None;
        self.generation += 1;
        self.cursor = 0;
    }

    fn set_interval(&mut self, interval_ms: u64) -> Result<()> {
        if interval_ms == 0 {
            return Err(PksError::configuration("interval must be greater than zero"));
        }
        self.interval = Duration::from_millis(interval_ms);
        if self.state == SendingState::Running {
            self.dispatch_timer = Some(periodic(self.interval));
        }
        debug!("dispatch interval set to {} ms", interval_ms);
        Ok(())
    }

    fn on_dispatch_tick(&mut self) {
        if self.state != SendingState::Running {
            return;
        }
        if self.in_flight.is_some() {
            debug!("previous dispatch still in flight, dropping tick");
            return;
        }
        let Some(pid) = self.target.as_ref().map(|t| t.pid) else {
            return;
        };
        let Some(step) = self.steps.get(self.cursor) else {
            return;
        };

        let dispatch = match Dispatch::from_step(step, self.cursor) {
            Ok(dispatch) => dispatch,
            Err(e) => {
                self.report_error(e);
                return;
            }
        };

        let poster = Arc::clone(&self.poster);
        let handle = tokio::spawn(async move { dispatch.post(poster.as_ref(), pid).await });
        self.in_flight = Some(InFlight {
            generation: self.generation,
            handle,
        });
    }

    fn on_dispatch_complete(&mut self, outcome: std::result::Result<Result<bool>, JoinError>) {
        let Some(flight) = self.in_flight.take() else {
            return;
        };
        if flight.generation != self.generation || self.state == SendingState::Idle {
            debug!("discarding dispatch result from a finished run");
            return;
        }

        let label = self
            .steps
            .get(self.cursor)
            .map(KeyStep::label)
            .unwrap_or_default();
        let target = self.target_name();

        match outcome {
            Ok(Ok(true)) => self.record_send(&label, &target),
            Ok(Ok(false)) => {
                self.report_error(PksError::poster_failure(label, target, "poster reported failure"))
            }
            Ok(Err(e)) => self.report_error(PksError::poster_failure(label, target, e.to_string())),
            Err(e) => self.report_error(PksError::poster_failure(label, target, e.to_string())),
        }
    }

    fn record_send(&mut self, label: &str, target: &str) {
        self.send_count += 1;
        self.emit(EngineEvent::CountChanged(self.send_count));
        self.append(LogKind::Key, format!("Sent {label} to {target}"));

        self.cursor = (self.cursor + 1) % self.steps.len();
        if self.cursor != 0 {
            return;
        }

        self.cycles_completed += 1;
        self.emit(EngineEvent::CycleCompleted(self.cycles_completed));
        if self.repeat_count > 0 && self.cycles_completed >= u64::from(self.repeat_count) {
            self.finish();
        }
    }

    fn on_validation_tick(&mut self) {
        if self.state == SendingState::Idle {
            return;
        }
        let Some((window_id, pid)) = self.target.as_ref().map(|t| (t.window_id, t.pid)) else {
            return;
        };
        if self.validating.is_some() {
            debug!("previous liveness check still running, skipping");
            return;
        }

        let resolver = self.resolver.clone();
        let handle =
            tokio::task::spawn_blocking(move || resolver.check_target_valid(window_id, Some(pid)));
        self.validating = Some(Validation {
            generation: self.generation,
            handle,
        });
    }

    fn on_validation_complete(&mut self, outcome: std::result::Result<bool, JoinError>) {
        let Some(check) = self.validating.take() else {
            return;
        };
        if check.generation != self.generation || self.state == SendingState::Idle {
            return;
        }

        let valid = match outcome {
            Ok(valid) => valid,
            Err(e) => {
                warn!("liveness check task failed: {}", e);
                return;
            }
        };
        if valid {
            return;
        }

        let Some(target) = self.target.as_ref() else {
            return;
        };
        let lost = PksError::target_lost(&target.owner_name, target.pid);
        self.append(LogKind::Warn, lost.to_string());
        self.pause();
        self.emit(EngineEvent::WindowInvalid);
    }

    fn report_error(&mut self, err: PksError) {
        let message = err.to_string();
        self.append(LogKind::Error, message.clone());
        self.emit(EngineEvent::Error(message));
    }

    fn set_state(&mut self, state: SendingState, message: impl Into<String>) {
        self.state = state;
        self.append(LogKind::State, message);
        self.emit(EngineEvent::StateChanged(state));
    }

    fn append(&mut self, kind: LogKind, message: impl Into<String>) {
        let entry = LogEntry::new(kind, message);
        match kind {
            LogKind::Key | LogKind::State => info!("{}", entry.message),
            LogKind::Warn => warn!("{}", entry.message),
            LogKind::Error => error!("{}", entry.message),
        }
        self.log.push(entry.clone());
        self.emit(EngineEvent::Log(entry));
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn target_name(&self) -> String {
        self.target
            .as_ref()
            .map(WindowDescriptor::display_name)
            .unwrap_or_default()
    }

    fn publish(&self) {
        let next = EngineSnapshot {
            state: self.state,
            send_count: self.send_count,
            cycles_completed: self.cycles_completed,
            interval_ms: self.interval.as_millis() as u64,
            repeat_count: self.repeat_count,
            target: self.target.clone(),
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

/// Periodic timer whose first tick is one period from now.
fn periodic(period: Duration) -> Interval {
    let mut timer = time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer
}

async fn next_tick(timer: Option<&mut Interval>) -> Instant {
    match timer {
        Some(timer) => timer.tick().await,
        None => std::future::pending().await,
    }
}

async fn join<T>(handle: Option<&mut JoinHandle<T>>) -> std::result::Result<T, JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::WindowSource;
    use crate::keymap::{KeyCode, Modifiers};
    use crate::window::{ProcessEntry, WindowRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio::time::sleep;

    const PID: u32 = 4242;
    const WINDOW_ID: u64 = 77;

    struct RecordingPoster {
        calls: Mutex<Vec<Dispatch>>,
        delay: Duration,
        succeed: bool,
    }

    impl RecordingPoster {
        fn new() -> Arc<Self> {
            Self::with(Duration::ZERO, true)
        }

        fn with(delay: Duration, succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                delay,
                succeed,
            })
        }

        fn calls(&self) -> Vec<Dispatch> {
            self.calls.lock().unwrap().clone()
        }

        async fn record(&self, dispatch: Dispatch) -> Result<bool> {
            self.calls.lock().unwrap().push(dispatch);
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            Ok(self.succeed)
        }
    }

    #[async_trait]
    impl EventPoster for RecordingPoster {
        async fn post_key(&self, _pid: u32, key: KeyCode, modifiers: Modifiers) -> Result<bool> {
            self.record(Dispatch::Key { key, modifiers }).await
        }

        async fn post_text(&self, _pid: u32, text: &str, append_enter: bool) -> Result<bool> {
            self.record(Dispatch::Text {
                text: text.to_string(),
                append_enter,
            })
            .await
        }

        async fn post_combo(
            &self,
            _pid: u32,
            text: &str,
            prefix: Option<KeyCode>,
            suffix: Option<KeyCode>,
        ) -> Result<bool> {
            self.record(Dispatch::Combo {
                text: text.to_string(),
                prefix,
                suffix,
            })
            .await
        }
    }

    struct FakeSource {
        window_present: AtomicBool,
        process_alive: AtomicBool,
    }

    impl FakeSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                window_present: AtomicBool::new(true),
                process_alive: AtomicBool::new(true),
            })
        }
    }

    impl WindowSource for FakeSource {
        fn list_windows(&self) -> Result<Vec<WindowRecord>> {
            if !self.window_present.load(Ordering::SeqCst) {
                return Ok(Vec::new());
            }
            Ok(vec![WindowRecord {
                window_id: WINDOW_ID,
                owner_name: "Target".to_string(),
                window_name: "main".to_string(),
                pid: PID,
                layer: 0,
                on_screen: true,
            }])
        }

        fn list_processes(&self) -> Result<Vec<ProcessEntry>> {
            Ok(vec![ProcessEntry { pid: PID, ppid: 1 }])
        }

        fn is_process_alive(&self, pid: u32) -> bool {
            pid == PID && self.process_alive.load(Ordering::SeqCst)
        }
    }

    fn target() -> WindowDescriptor {
        let mut target = WindowDescriptor::for_process(PID, 1, "Target");
        target.window_id = WINDOW_ID;
        target
    }

    fn scheduler(poster: Arc<RecordingPoster>, source: Arc<FakeSource>) -> Scheduler {
        Scheduler::new(poster, ProcessHierarchyResolver::new(source))
    }

    fn two_steps() -> Vec<KeyStep> {
        vec![KeyStep::key("Return"), KeyStep::text("hi", false)]
    }

    fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_finite_repeat_stops_after_cycles() {
        let poster = RecordingPoster::new();
        let engine = scheduler(poster.clone(), FakeSource::new());

        engine.start(target(), &two_steps(), 100, 2).await.unwrap();
        assert_eq!(engine.state(), SendingState::Running);

        sleep(Duration::from_millis(450)).await;

        assert_eq!(engine.send_count(), 4);
        assert_eq!(engine.cycles_completed(), 2);
        assert_eq!(engine.state(), SendingState::Idle);

        let calls = poster.calls();
        assert_eq!(calls.len(), 4);
        assert!(matches!(calls[0], Dispatch::Key { key: KeyCode::Enter, .. }));
        assert!(matches!(calls[1], Dispatch::Text { ref text, append_enter: false } if text == "hi"));
        assert_eq!(calls[0], calls[2]);
        assert_eq!(calls[1], calls[3]);

        sleep(Duration::from_millis(500)).await;
        assert_eq!(poster.calls().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_infinite_repeat_keeps_cycling() {
        let poster = RecordingPoster::new();
        let engine = scheduler(poster.clone(), FakeSource::new());
        let steps = vec![KeyStep::key("a"), KeyStep::key("b"), KeyStep::key("c")];

        engine.start(target(), &steps, 100, 0).await.unwrap();
        sleep(Duration::from_millis(950)).await;

        assert_eq!(engine.send_count(), 9);
        assert_eq!(engine.cycles_completed(), 3);
        assert_eq!(engine.state(), SendingState::Running);

        let keys: Vec<KeyCode> = poster
            .calls()
            .into_iter()
            .map(|call| match call {
                Dispatch::Key { key, .. } => key,
                other => panic!("unexpected dispatch {other:?}"),
            })
            .collect();
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(*key, [KeyCode::KeyA, KeyCode::KeyB, KeyCode::KeyC][i % 3]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_key_never_sends() {
        let poster = RecordingPoster::new();
        let engine = scheduler(poster.clone(), FakeSource::new());

        engine
            .start(target(), &[KeyStep::key("Retrun")], 100, 0)
            .await
            .unwrap();
        sleep(Duration::from_millis(550)).await;

        assert_eq!(engine.send_count(), 0);
        assert_eq!(engine.state(), SendingState::Running);
        assert!(poster.calls().is_empty());

        let errors: Vec<LogEntry> = engine
            .log_entries()
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == LogKind::Error)
            .collect();
        assert_eq!(errors.len(), 5);
        assert!(errors.iter().all(|e| e.message.contains("Retrun")));

        engine.stop().await.unwrap();
        assert_eq!(engine.state(), SendingState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_poster_drops_overlapping_ticks() {
        let poster = RecordingPoster::with(Duration::from_millis(250), true);
        let engine = scheduler(poster.clone(), FakeSource::new());

        engine.start(target(), &two_steps(), 100, 0).await.unwrap();

        // Ticks at 200 and 300 fire while the 100 ms dispatch is pending.
        sleep(Duration::from_millis(320)).await;
        assert_eq!(poster.calls().len(), 1);
        assert_eq!(engine.send_count(), 0);

        sleep(Duration::from_millis(60)).await;
        assert_eq!(engine.send_count(), 1);
        assert_eq!(poster.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_transitions_are_noops() {
        let engine = scheduler(RecordingPoster::new(), FakeSource::new());
        let mut events = engine.subscribe();

        engine.pause().await.unwrap();
        engine.resume().await.unwrap();
        engine.stop().await.unwrap();
        assert!(engine.log_entries().await.unwrap().is_empty());
        assert!(drain(&mut events).is_empty());

        engine.start(target(), &two_steps(), 1000, 0).await.unwrap();
        let baseline = engine.log_entries().await.unwrap().len();

        engine.pause().await.unwrap();
        engine.pause().await.unwrap();
        assert_eq!(engine.state(), SendingState::Paused);
        assert_eq!(engine.log_entries().await.unwrap().len(), baseline + 1);

        engine.resume().await.unwrap();
        engine.resume().await.unwrap();
        assert_eq!(engine.state(), SendingState::Running);
        assert_eq!(engine.log_entries().await.unwrap().len(), baseline + 2);

        engine.stop().await.unwrap();
        engine.stop().await.unwrap();
        assert_eq!(engine.state(), SendingState::Idle);
        assert_eq!(engine.log_entries().await.unwrap().len(), baseline + 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejects_bad_configuration() {
        let engine = scheduler(RecordingPoster::new(), FakeSource::new());

        let err = engine.start(target(), &[], 100, 0).await.unwrap_err();
        assert!(matches!(err, PksError::Configuration(_)));
        let err = engine.start(target(), &two_steps(), 0, 0).await.unwrap_err();
        assert!(matches!(err, PksError::Configuration(_)));
        assert_eq!(engine.state(), SendingState::Idle);
        assert!(engine.log_entries().await.unwrap().is_empty());

        engine.start(target(), &two_steps(), 100, 0).await.unwrap();
        let err = engine.start(target(), &two_steps(), 100, 0).await.unwrap_err();
        assert!(matches!(
            err,
            PksError::InvalidTransition {
                operation: "start",
                state: SendingState::Running
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_pauses_on_lost_target() {
        let poster = RecordingPoster::new();
        let source = FakeSource::new();
        let engine = scheduler(poster.clone(), source.clone());
        let mut events = engine.subscribe();

        engine.start(target(), &two_steps(), 500, 0).await.unwrap();

        // Window hidden but process alive: still valid.
        source.window_present.store(false, Ordering::SeqCst);
        sleep(Duration::from_millis(3100)).await;
        assert_eq!(engine.state(), SendingState::Running);

        source.process_alive.store(false, Ordering::SeqCst);
        sleep(Duration::from_millis(3000)).await;
        assert_eq!(engine.state(), SendingState::Paused);

        let events = drain(&mut events);
        assert!(events.contains(&EngineEvent::WindowInvalid));
        let logs = engine.log_entries().await.unwrap();
        let warn = logs.iter().find(|e| e.kind == LogKind::Warn).unwrap();
        assert!(warn.message.contains("pid 4242"));

        let sent = engine.send_count();
        sleep(Duration::from_millis(2000)).await;
        assert_eq!(engine.send_count(), sent);
        assert_eq!(engine.state(), SendingState::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_keeps_checking_while_user_paused() {
        let poster = RecordingPoster::new();
        let source = FakeSource::new();
        let engine = scheduler(poster.clone(), source.clone());

        engine.start(target(), &two_steps(), 500, 0).await.unwrap();
        sleep(Duration::from_millis(600)).await;
        engine.pause().await.unwrap();
        assert_eq!(engine.send_count(), 1);

        let mut events = engine.subscribe();
        source.window_present.store(false, Ordering::SeqCst);
        source.process_alive.store(false, Ordering::SeqCst);
        sleep(Duration::from_millis(9100)).await;

        assert_eq!(engine.state(), SendingState::Paused);
        assert_eq!(engine.send_count(), 1);
        assert_eq!(poster.calls().len(), 1);

        let events = drain(&mut events);
        let invalid = events
            .iter()
            .filter(|e| **e == EngineEvent::WindowInvalid)
            .count();
        assert_eq!(invalid, 3);
        assert!(!events.contains(&EngineEvent::StateChanged(SendingState::Running)));

        let logs = engine.log_entries().await.unwrap();
        assert_eq!(logs.iter().filter(|e| e.kind == LogKind::Warn).count(), 3);
        assert!(!logs.iter().any(|e| e.message.starts_with("Resumed")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_result() {
        let poster = RecordingPoster::with(Duration::from_millis(250), true);
        let engine = scheduler(poster.clone(), FakeSource::new());

        engine.start(target(), &two_steps(), 100, 0).await.unwrap();
        sleep(Duration::from_millis(150)).await;
        assert_eq!(poster.calls().len(), 1);

        engine.stop().await.unwrap();
        sleep(Duration::from_millis(300)).await;

        assert_eq!(engine.send_count(), 0);
        assert_eq!(engine.state(), SendingState::Idle);
        let logs = engine.log_entries().await.unwrap();
        assert!(logs.iter().all(|e| e.kind != LogKind::Key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_applies_on_resume() {
        let poster = RecordingPoster::new();
        let engine = scheduler(poster.clone(), FakeSource::new());

        engine.start(target(), &two_steps(), 100, 0).await.unwrap();
        sleep(Duration::from_millis(250)).await;
        assert_eq!(engine.send_count(), 2);

        engine.pause().await.unwrap();
        engine.set_interval(300).await.unwrap();
        assert_eq!(engine.interval_ms(), 300);
        sleep(Duration::from_millis(500)).await;
        assert_eq!(engine.send_count(), 2);

        engine.resume().await.unwrap();
        sleep(Duration::from_millis(650)).await;
        assert_eq!(engine.send_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poster_failure_keeps_running() {
        let poster = RecordingPoster::with(Duration::ZERO, false);
        let engine = scheduler(poster.clone(), FakeSource::new());

        engine.start(target(), &two_steps(), 100, 1).await.unwrap();
        sleep(Duration::from_millis(350)).await;

        assert_eq!(engine.state(), SendingState::Running);
        assert_eq!(engine.send_count(), 0);
        // The cursor stays on the failing step.
        assert_eq!(poster.calls().len(), 3);
        assert!(poster
            .calls()
            .iter()
            .all(|call| matches!(call, Dispatch::Key { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_event_follows_last_send() {
        let engine = scheduler(RecordingPoster::new(), FakeSource::new());
        let mut events = engine.subscribe();

        engine.start(target(), &two_steps(), 100, 1).await.unwrap();
        sleep(Duration::from_millis(250)).await;

        let events = drain(&mut events);
        let last_count = events
            .iter()
            .position(|e| *e == EngineEvent::CountChanged(2))
            .unwrap();
        let cycle = events
            .iter()
            .position(|e| *e == EngineEvent::CycleCompleted(1))
            .unwrap();
        let idle = events
            .iter()
            .position(|e| *e == EngineEvent::StateChanged(SendingState::Idle))
            .unwrap();
        assert!(last_count < cycle);
        assert!(cycle < idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_steps_are_copied_at_start() {
        let poster = RecordingPoster::new();
        let engine = scheduler(poster.clone(), FakeSource::new());

        let mut steps = vec![KeyStep::key("a")];
        engine.start(target(), &steps, 100, 0).await.unwrap();
        steps[0].key_name = "b".to_string();

        sleep(Duration::from_millis(150)).await;
        assert!(matches!(poster.calls()[0], Dispatch::Key { key: KeyCode::KeyA, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_timers() {
        let poster = RecordingPoster::new();
        let engine = scheduler(poster.clone(), FakeSource::new());

        engine.start(target(), &two_steps(), 100, 0).await.unwrap();
        drop(engine);
        sleep(Duration::from_millis(500)).await;

        assert!(poster.calls().is_empty());
    }

    #[test]
    fn test_log_buffer_evicts_oldest() {
        let mut log = LogBuffer::new(DEFAULT_LOG_CAPACITY);
        for i in 0..510 {
            log.push(LogEntry::new(LogKind::Key, format!("entry {i}")));
        }
        assert_eq!(log.len(), DEFAULT_LOG_CAPACITY);
        let entries = log.entries();
        assert_eq!(entries[0].message, "entry 10");
        assert_eq!(entries[499].message, "entry 509");
    }
}
