//! Background worker tests: rule synchronization, rotation and control.
//!
//! Run with: cargo test --test background_test

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::executor::{block_on, LocalPool};
use futures::lock::Mutex;
use futures::task::LocalSpawnExt;
use futures::StreamExt;

use fingerprint_poisoner::background::control::{handle_control, parse_request, ControlRequest};
use fingerprint_poisoner::background::rules::{HeaderRule, RuleUpdate, MANAGED_RULE_IDS};
use fingerprint_poisoner::background::{
    HeaderRuleSynchronizer, HeaderSource, RotationScheduler, RotationTask, RuleEngine, Sleeper, SyncStats,
};
use fingerprint_poisoner::{HeaderProfile, PoisonError, Result, RotationWindow, SessionRng};

// ===== Fakes =====

/// Yields to the executor exactly once.
struct YieldOnce(bool);

impl Future for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0 {
            Poll::Ready(())
        } else {
            self.0 = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

#[derive(Default)]
struct FakeRuleEngine {
    rules: RefCell<Vec<HeaderRule>>,
    fail_next: Cell<bool>,
    calls: Cell<usize>,
    in_flight: Cell<usize>,
    max_in_flight: Cell<usize>,
}

#[async_trait(?Send)]
impl RuleEngine for FakeRuleEngine {
    async fn update_dynamic_rules(&self, update: &RuleUpdate) -> Result<()> {
        self.calls.set(self.calls.get() + 1);
        self.in_flight.set(self.in_flight.get() + 1);
        self.max_in_flight.set(self.max_in_flight.get().max(self.in_flight.get()));
        YieldOnce(false).await;
        self.in_flight.set(self.in_flight.get() - 1);

        if self.fail_next.replace(false) {
            return Err(PoisonError::RuleSync("rule quota exceeded".into()));
        }
        let mut rules = self.rules.borrow_mut();
        rules.retain(|rule| !update.remove_rule_ids.contains(&rule.id));
        rules.extend(update.add_rules.iter().cloned());
        Ok(())
    }

    async fn dynamic_rules(&self) -> Result<Vec<HeaderRule>> {
        Ok(self.rules.borrow().clone())
    }
}

/// Numbered header identities: `Agent/1`, `Agent/2`, ...
#[derive(Default)]
struct SequenceSource {
    next: Cell<u32>,
}

impl HeaderSource for SequenceSource {
    fn next_headers(&self) -> HeaderProfile {
        let n = self.next.get() + 1;
        self.next.set(n);
        HeaderProfile {
            user_agent: format!("Agent/{}", n),
            accept_language: "en-US,en;q=0.9".into(),
            accept: "*/*".into(),
        }
    }
}

/// Sleeps until the test sends a tick, recording each requested delay.
struct ManualSleeper {
    ticks: Mutex<UnboundedReceiver<()>>,
    requested: RefCell<Vec<Duration>>,
}

impl ManualSleeper {
    fn new() -> (Rc<Self>, UnboundedSender<()>) {
        let (tx, rx) = unbounded();
        let sleeper = Rc::new(Self {
            ticks: Mutex::new(rx),
            requested: RefCell::new(Vec::new()),
        });
        (sleeper, tx)
    }
}

#[async_trait(?Send)]
impl Sleeper for ManualSleeper {
    async fn sleep(&self, duration: Duration) {
        self.requested.borrow_mut().push(duration);
        self.ticks.lock().await.next().await;
    }
}

#[derive(Default)]
struct CountingTask {
    runs: Cell<u32>,
}

#[async_trait(?Send)]
impl RotationTask for CountingTask {
    async fn rotate(&self) -> Result<()> {
        self.runs.set(self.runs.get() + 1);
        Ok(())
    }
}

fn synchronizer() -> Rc<HeaderRuleSynchronizer<FakeRuleEngine>> {
    Rc::new(HeaderRuleSynchronizer::new(
        FakeRuleEngine::default(),
        Box::new(SequenceSource::default()),
    ))
}

fn user_agent_of(rules: &[HeaderRule]) -> Option<String> {
    rules
        .iter()
        .find(|rule| rule.id == 1)
        .and_then(|rule| rule.header_value())
        .map(|(_, value)| value.to_string())
}

// ===== Synchronizer =====

#[test]
fn test_update_installs_three_rules() {
    let sync = synchronizer();
    block_on(sync.update_rules()).unwrap();

    let rules = block_on(sync.installed_rules()).unwrap();
    let mut ids: Vec<_> = rules.iter().map(|r| r.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, MANAGED_RULE_IDS);
    assert_eq!(user_agent_of(&rules).as_deref(), Some("Agent/1"));
    assert_eq!(sync.engine().calls.get(), 1, "one engine call per update");
}

#[test]
fn test_update_replaces_previous_rules() {
    let sync = synchronizer();
    block_on(sync.update_rules()).unwrap();
    block_on(sync.update_rules()).unwrap();

    let rules = block_on(sync.installed_rules()).unwrap();
    assert_eq!(rules.len(), 3);
    assert_eq!(user_agent_of(&rules).as_deref(), Some("Agent/2"));
    assert_eq!(sync.stats(), SyncStats { applied: 2, failed: 0 });
}

#[test]
fn test_failed_update_keeps_prior_rules() {
    let sync = synchronizer();
    block_on(sync.update_rules()).unwrap();

    sync.engine().fail_next.set(true);
    let err = block_on(sync.update_rules()).unwrap_err();
    assert!(matches!(err, PoisonError::RuleSync(_)));
    assert!(err.is_retryable());

    let rules = block_on(sync.installed_rules()).unwrap();
    assert_eq!(rules.len(), 3);
    assert_eq!(user_agent_of(&rules).as_deref(), Some("Agent/1"));
    assert_eq!(sync.current_headers().unwrap().user_agent, "Agent/1");
    assert_eq!(sync.stats(), SyncStats { applied: 1, failed: 1 });
}

#[test]
fn test_updates_are_serialized() {
    let sync = synchronizer();
    block_on(futures::future::join3(sync.update_rules(), sync.update_rules(), sync.update_rules()));

    assert_eq!(sync.engine().calls.get(), 3);
    assert_eq!(sync.engine().max_in_flight.get(), 1);
    assert_eq!(block_on(sync.installed_rules()).unwrap().len(), 3);
}

#[test]
fn test_foreign_rules_not_reported() {
    let sync = synchronizer();
    sync.engine()
        .rules
        .borrow_mut()
        .push(HeaderRule::set_header(42, "X-Other", "kept"));
    block_on(sync.update_rules()).unwrap();

    assert_eq!(block_on(sync.installed_rules()).unwrap().len(), 3);
    assert_eq!(sync.engine().rules.borrow().len(), 4);
}

// ===== Rotation =====

#[test]
fn test_rotation_runs_after_each_sleep() {
    let mut pool = LocalPool::new();
    let sync = synchronizer();
    let (sleeper, ticks) = ManualSleeper::new();
    let window = RotationWindow::default();

    let (handle, rotation) = RotationScheduler::new(window, SessionRng::seeded(11)).start_with(sync.clone(), sleeper.clone());
    pool.spawner().spawn_local(rotation).unwrap();

    pool.run_until_stalled();
    assert_eq!(handle.rotations(), 0, "first rotation waits for the delay");

    for expected in 1..=3 {
        ticks.unbounded_send(()).unwrap();
        pool.run_until_stalled();
        assert_eq!(handle.rotations(), expected);
    }
    assert_eq!(sync.stats().applied, 3);

    for delay in sleeper.requested.borrow().iter() {
        assert!(*delay >= window.min() && *delay <= window.max(), "delay {:?}", delay);
    }
}

#[test]
fn test_failed_rotation_keeps_schedule() {
    let mut pool = LocalPool::new();
    let sync = synchronizer();
    let (sleeper, ticks) = ManualSleeper::new();

    let (handle, rotation) =
        RotationScheduler::new(RotationWindow::default(), SessionRng::seeded(12)).start_with(sync.clone(), sleeper);
    pool.spawner().spawn_local(rotation).unwrap();

    sync.engine().fail_next.set(true);
    ticks.unbounded_send(()).unwrap();
    pool.run_until_stalled();
    ticks.unbounded_send(()).unwrap();
    pool.run_until_stalled();

    assert_eq!(handle.rotations(), 2);
    assert_eq!(sync.stats(), SyncStats { applied: 1, failed: 1 });
}

#[test]
fn test_stop_ends_rotation() {
    let mut pool = LocalPool::new();
    let task = Rc::new(CountingTask::default());
    let (sleeper, ticks) = ManualSleeper::new();

    let (handle, rotation) =
        RotationScheduler::new(RotationWindow::default(), SessionRng::seeded(13)).start_with(task.clone(), sleeper);
    pool.spawner().spawn_local(rotation).unwrap();

    ticks.unbounded_send(()).unwrap();
    pool.run_until_stalled();
    assert_eq!(task.runs.get(), 1);

    handle.stop();
    assert!(handle.is_stopped());
    ticks.unbounded_send(()).unwrap();
    pool.run();
    assert_eq!(task.runs.get(), 1);

    // Stopping twice is harmless
    handle.stop();
}

#[test]
fn test_drop_ends_rotation() {
    let mut pool = LocalPool::new();
    let task = Rc::new(CountingTask::default());
    let (sleeper, ticks) = ManualSleeper::new();

    let (handle, rotation) =
        RotationScheduler::new(RotationWindow::default(), SessionRng::seeded(14)).start_with(task.clone(), sleeper);
    pool.spawner().spawn_local(rotation).unwrap();
    pool.run_until_stalled();

    drop(handle);
    ticks.unbounded_send(()).unwrap();
    pool.run();
    assert_eq!(task.runs.get(), 0);
}

// ===== Control channel =====

#[test]
fn test_control_update_headers() {
    let sync = synchronizer();
    let request = parse_request(&serde_json::json!({ "action": "updateHeaders" })).unwrap();
    let response = block_on(handle_control(request, sync.as_ref()));

    assert!(response.success);
    assert_eq!(response.error, None);
    assert_eq!(sync.current_headers().unwrap().user_agent, "Agent/1");
}

#[test]
fn test_control_reports_failure() {
    let sync = synchronizer();
    sync.engine().fail_next.set(true);
    let response = block_on(handle_control(ControlRequest::UpdateHeaders, sync.as_ref()));

    assert!(!response.success);
    assert!(response.error.unwrap().contains("rule quota exceeded"));
}
