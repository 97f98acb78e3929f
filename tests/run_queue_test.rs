//! 运行队列与调度器测试

mod common;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use common::{test_config, FakeAgent, FakeDriver, FakeSessionFactory, PAGE_URL};
use tiered_step_runner::config::Config;
use tiered_step_runner::error::TierErrorKind;
use tiered_step_runner::models::{ActionKind, QueuedRun, RunOutcome, RunReport, RunState, Step, Tier};
use tiered_step_runner::orchestrator::{process_run, RunExecutor};
use tiered_step_runner::services::{AiAgent, LocatorCache};
use tiered_step_runner::workflow::FallbackOrchestrator;
use tiered_step_runner::App;

/// 轮询直到条件成立
async fn eventually(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("等待超时: {}", what);
}

fn config_with_slots(max: usize) -> Config {
    Config {
        max_concurrent_runs: max,
        ..test_config()
    }
}

fn click(locator: &str) -> Step {
    Step::new(ActionKind::Click).with_locator(locator)
}

/// 开始执行时登记优先级，然后等待放行
struct GatedExecutor {
    gate: Semaphore,
    started: Mutex<Vec<i64>>,
    active: AtomicUsize,
    max_seen: AtomicUsize,
}

impl GatedExecutor {
    fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            started: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
        }
    }

    fn started(&self) -> Vec<i64> {
        self.started.lock().clone()
    }

    fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }
}

#[async_trait]
impl RunExecutor for GatedExecutor {
    async fn execute(&self, run: QueuedRun) -> RunReport {
        self.started.lock().push(run.priority);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);

        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        RunReport::new(run.id, RunOutcome::Passed, Vec::new(), 0)
    }
}

/// 优先级为 666 的运行直接 panic
struct PanickyExecutor;

#[async_trait]
impl RunExecutor for PanickyExecutor {
    async fn execute(&self, run: QueuedRun) -> RunReport {
        if run.priority == 666 {
            panic!("执行器崩溃");
        }
        RunReport::new(run.id, RunOutcome::Passed, Vec::new(), 0)
    }
}

#[tokio::test]
async fn test_run_passes_end_to_end() {
    let sessions = Arc::new(FakeSessionFactory::new(&[("#pay", "Pay now")]));
    let agent = Arc::new(FakeAgent::new());
    let app = App::with_collaborators(test_config(), sessions.clone(), agent);

    let submission = app
        .submit_run(vec![Step::navigate(PAGE_URL), click("#pay")], 10, "alice", "checkout")
        .unwrap();
    assert_eq!(submission.position, 1);

    assert!(app.start());
    assert!(app.wait_idle(Duration::from_secs(5)).await);
    app.stop().await;

    let report = app.run_report(submission.run_id).unwrap();
    assert_eq!(report.outcome, RunOutcome::Passed);
    assert_eq!(report.steps.len(), 2);
    assert!(report.steps.iter().all(|s| s.final_tier == Some(Tier::Direct)));

    let opened = sessions.opened();
    assert_eq!(opened.len(), 1);
    assert!(opened[0].is_closed());
    assert_eq!(opened[0].actions(), vec![format!("navigate {}", PAGE_URL), "click #pay".to_string()]);

    assert_eq!(app.outcome_counts(), (1, 0));
    assert_eq!(app.tier_summary().steps, 2);
    assert!(app.query_status().runs.is_empty());
}

#[tokio::test]
async fn test_stop_on_step_failure_controls_remaining_steps() {
    for (stop, expected_steps) in [(true, 1), (false, 2)] {
        let config = Config {
            stop_on_step_failure: stop,
            ..test_config()
        };
        let sessions = Arc::new(FakeSessionFactory::new(&[("#pay", "Pay now")]));
        let app = App::with_collaborators(config, sessions.clone(), Arc::new(FakeAgent::new()));

        let submission = app
            .submit_run(vec![click("#missing"), click("#pay")], 10, "bob", "checkout")
            .unwrap();
        app.start();
        assert!(app.wait_idle(Duration::from_secs(5)).await);
        app.stop().await;

        let report = app.run_report(submission.run_id).unwrap();
        assert_eq!(report.outcome, RunOutcome::Failed { step_index: 0 });
        assert_eq!(report.steps.len(), expected_steps);
        assert_eq!(
            report.steps[0].error.as_ref().unwrap().kind,
            TierErrorKind::AllTiersExhausted
        );
        assert!(sessions.opened()[0].is_closed());
    }
}

#[tokio::test]
async fn test_submit_rejects_invalid_runs() {
    let app = App::with_run_executor(test_config(), Arc::new(GatedExecutor::new()));

    assert!(app.submit_run(Vec::new(), 1, "o", "s").is_err());
    assert!(app
        .submit_run(vec![Step::new(ActionKind::Click)], 1, "o", "s")
        .is_err());
    assert!(app
        .submit_run(vec![Step::new(ActionKind::UploadFile).with_locator("#f")], 1, "o", "s")
        .is_err());
    assert_eq!(app.query_status().queued_count, 0);
}

#[tokio::test]
async fn test_session_failure_is_reported_as_crash() {
    let app = App::with_collaborators(
        test_config(),
        Arc::new(FakeSessionFactory::failing()),
        Arc::new(FakeAgent::new()),
    );

    let submission = app.submit_run(vec![click("#pay")], 10, "o", "s").unwrap();
    app.start();
    assert!(app.wait_idle(Duration::from_secs(5)).await);
    app.stop().await;

    let report = app.run_report(submission.run_id).unwrap();
    assert!(matches!(report.outcome, RunOutcome::Crashed { .. }));
    assert_eq!(app.outcome_counts(), (0, 1));
}

#[tokio::test]
async fn test_cancel_queued_run() {
    let app = App::with_run_executor(test_config(), Arc::new(GatedExecutor::new()));

    let submission = app.submit_run(vec![click("#pay")], 10, "o", "s").unwrap();
    assert_eq!(app.query_status().queued_count, 1);

    assert!(app.cancel_run(submission.run_id));
    assert!(!app.cancel_run(submission.run_id));
    assert_eq!(app.query_status().queued_count, 0);
    assert_eq!(app.run_report(submission.run_id).unwrap().outcome, RunOutcome::Cancelled);
}

#[tokio::test]
async fn test_cancel_active_run_signals_token() {
    let executor = Arc::new(GatedExecutor::new());
    let app = App::with_run_executor(config_with_slots(1), executor.clone());

    let submission = app.submit_run(vec![click("#pay")], 10, "o", "s").unwrap();
    app.start();
    eventually("运行开始", || executor.started().len() == 1).await;

    assert!(app.cancel_run(submission.run_id));
    let status = app.query_status();
    assert_eq!(status.runs[0].state, RunState::Active);

    executor.release(1);
    assert!(app.wait_idle(Duration::from_secs(5)).await);
    app.stop().await;
}

#[tokio::test]
async fn test_cancelled_run_stops_at_step_boundary() {
    let config = test_config();
    let cache = Arc::new(LocatorCache::new(config.cache_ttl(), config.cache_failure_threshold));
    let agent: Arc<dyn AiAgent> = Arc::new(FakeAgent::new());
    let orchestrator = FallbackOrchestrator::new(&config, cache, agent);
    let driver = FakeDriver::new(PAGE_URL).with_element("#pay", "Pay now");

    let run = QueuedRun::new(vec![click("#pay"), click("#pay")], 1, "o", "s");
    run.cancel.cancel();

    let report = process_run(&orchestrator, &driver, &run, true, &[]).await;
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.steps.len(), 1);
    assert_eq!(
        report.steps[0].error.as_ref().unwrap().kind,
        TierErrorKind::Cancelled
    );
    assert!(driver.actions().is_empty());
}

#[tokio::test]
async fn test_priority_admission_while_running() {
    let executor = Arc::new(GatedExecutor::new());
    let app = App::with_run_executor(config_with_slots(2), executor.clone());
    app.start();

    app.submit_run(vec![click("#a")], 10, "o", "s").unwrap();
    eventually("优先级 10 开始", || executor.started().len() == 1).await;
    app.submit_run(vec![click("#b")], 1, "o", "s").unwrap();
    eventually("优先级 1 开始", || executor.started().len() == 2).await;
    app.submit_run(vec![click("#c")], 5, "o", "s").unwrap();

    sleep(Duration::from_millis(100)).await;
    assert_eq!(executor.started(), vec![10, 1]);
    let status = app.query_status();
    assert_eq!(status.active_count, 2);
    assert_eq!(status.queued_count, 1);
    let queued: Vec<_> = status.runs.iter().filter(|r| r.state == RunState::Queued).collect();
    assert_eq!(queued[0].priority, 5);
    assert_eq!(queued[0].position, Some(1));

    executor.release(1);
    eventually("优先级 5 开始", || executor.started().len() == 3).await;
    assert_eq!(executor.started()[2], 5);

    executor.release(2);
    assert!(app.wait_idle(Duration::from_secs(5)).await);
    app.stop().await;
}

#[tokio::test]
async fn test_lower_priority_value_is_served_first() {
    let executor = Arc::new(GatedExecutor::new());
    let app = App::with_run_executor(config_with_slots(2), executor.clone());

    for priority in [10, 1, 5] {
        app.submit_run(vec![click("#x")], priority, "o", "s").unwrap();
    }
    app.start();

    eventually("两个运行开始", || executor.started().len() == 2).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(executor.started(), vec![1, 5]);

    executor.release(3);
    assert!(app.wait_idle(Duration::from_secs(5)).await);
    assert_eq!(executor.started(), vec![1, 5, 10]);
    app.stop().await;
}

#[tokio::test]
async fn test_active_runs_never_exceed_limit() {
    let executor = Arc::new(GatedExecutor::new());
    let app = App::with_run_executor(config_with_slots(2), executor.clone());

    for i in 0..6 {
        app.submit_run(vec![click("#x")], i, "o", "s").unwrap();
    }
    app.start();

    for done in 0..6 {
        eventually("下一个运行开始", || executor.started().len() > done).await;
        assert!(app.query_status().active_count <= 2);
        executor.release(1);
    }

    assert!(app.wait_idle(Duration::from_secs(5)).await);
    app.stop().await;
    assert!(executor.max_seen.load(Ordering::SeqCst) <= 2);
    assert_eq!(app.outcome_counts(), (6, 0));
}

#[tokio::test]
async fn test_panicking_run_releases_slot() {
    let app = App::with_run_executor(config_with_slots(1), Arc::new(PanickyExecutor));

    let crashing = app.submit_run(vec![click("#x")], 666, "o", "s").unwrap();
    let healthy = app.submit_run(vec![click("#x")], 1000, "o", "s").unwrap();
    app.start();

    assert!(app.wait_idle(Duration::from_secs(5)).await);
    app.stop().await;

    assert!(matches!(
        app.run_report(crashing.run_id).unwrap().outcome,
        RunOutcome::Crashed { .. }
    ));
    assert_eq!(app.run_report(healthy.run_id).unwrap().outcome, RunOutcome::Passed);
    assert_eq!(app.query_status().active_count, 0);
}

#[tokio::test]
async fn test_dispatcher_start_is_idempotent_and_stop_joins() {
    let app = App::with_run_executor(test_config(), Arc::new(PanickyExecutor));

    assert!(app.start());
    assert!(!app.start());
    app.stop().await;

    // 停止后可以重新启动
    assert!(app.start());
    let submission = app.submit_run(vec![click("#x")], 1, "o", "s").unwrap();
    assert!(app.wait_idle(Duration::from_secs(5)).await);
    assert_eq!(app.run_report(submission.run_id).unwrap().outcome, RunOutcome::Passed);
    app.stop().await;
}

#[tokio::test]
#[ignore = "需要本地 Chrome 和大模型 API"]
async fn test_live_browser_run() {
    let config = Config::from_env();
    let app = App::new(config);
    let submission = app
        .submit_run(vec![Step::navigate("https://example.com")], 1, "live", "smoke")
        .unwrap();
    app.start();
    assert!(app.wait_idle(Duration::from_secs(120)).await);
    app.stop().await;
    assert!(app.run_report(submission.run_id).unwrap().outcome.is_passed());
}
