//! 执行队列 - 编排层
//!
//! 排队中的运行和活跃槽位放在同一把锁后面：
//! - 排队：`BTreeMap<(priority, seq), QueuedRun>`，priority 越小越先，同优先级先进先出
//! - 活跃：`HashMap<RunId, ActiveRun>`，数量不超过 `max_active`
//!
//! 任何时刻一个运行要么在排队，要么在活跃，不会同时出现在两边。

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::{QueuedRun, RunId, RunSnapshot, RunState, StatusSnapshot};

type QueueKey = (i64, u64);

/// 已准入运行的登记信息
#[derive(Debug, Clone)]
struct ActiveRun {
    priority: i64,
    owner_id: String,
    subject_id: String,
    enqueued_at: DateTime<Utc>,
    admitted_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl ActiveRun {
    fn admitted(run: &QueuedRun) -> Self {
        Self {
            priority: run.priority,
            owner_id: run.owner_id.clone(),
            subject_id: run.subject_id.clone(),
            enqueued_at: run.enqueued_at,
            admitted_at: Utc::now(),
            cancel: run.cancel.clone(),
        }
    }
}

#[derive(Default)]
struct QueueState {
    queued: BTreeMap<QueueKey, QueuedRun>,
    index: HashMap<RunId, QueueKey>,
    active: HashMap<RunId, ActiveRun>,
    next_seq: u64,
}

impl QueueState {
    fn insert(&mut self, run: QueuedRun) {
        let key = (run.priority, run.seq);
        self.index.insert(run.id, key);
        self.queued.insert(key, run);
    }

    fn position_of(&self, key: &QueueKey) -> usize {
        self.queued.range(..key).count() + 1
    }
}

/// 执行队列
pub struct ExecutionQueue {
    state: Mutex<QueueState>,
    max_active: usize,
    notify: Arc<Notify>,
}

impl ExecutionQueue {
    pub fn new(max_active: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            max_active: max_active.max(1),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }

    /// 入队/释放时被唤醒
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// 新运行入队，返回近似排队位置（从 1 开始）
    pub fn enqueue(&self, mut run: QueuedRun) -> AppResult<usize> {
        let position = {
            let mut state = self.state.lock();
            if state.index.contains_key(&run.id) || state.active.contains_key(&run.id) {
                return Err(AppError::Queue(format!("运行 {} 已存在", run.id)));
            }
            state.next_seq += 1;
            run.seq = state.next_seq;
            let key = (run.priority, run.seq);
            state.insert(run);
            state.position_of(&key)
        };
        self.notify.notify_one();
        Ok(position)
    }

    /// 把未能准入的运行放回原位，保持原来的优先级和序号
    pub fn requeue(&self, run: QueuedRun) {
        debug!("运行 {} 重新入队 (priority={}, seq={})", run.id.short(), run.priority, run.seq);
        self.state.lock().insert(run);
    }

    /// 取出最靠前的运行
    pub fn dequeue_next(&self) -> Option<QueuedRun> {
        let mut state = self.state.lock();
        let (_, run) = state.queued.pop_first()?;
        state.index.remove(&run.id);
        Some(run)
    }

    /// 检查容量并登记为活跃，两步在同一临界区内完成
    pub fn try_admit(&self, run: &QueuedRun) -> bool {
        let mut state = self.state.lock();
        if state.active.len() >= self.max_active
            || state.active.contains_key(&run.id)
            || state.index.contains_key(&run.id)
        {
            return false;
        }
        state.active.insert(run.id, ActiveRun::admitted(run));
        true
    }

    /// 取出最靠前的运行并登记为活跃，两步在同一临界区内完成
    ///
    /// 没有空闲槽位或队列为空时返回 None。运行始终处于排队或活跃之一，
    /// 因此 `cancel` 在任何时刻都能找到它。
    pub fn admit_next(&self) -> Option<QueuedRun> {
        let mut state = self.state.lock();
        if state.active.len() >= self.max_active {
            return None;
        }
        let (_, run) = state.queued.pop_first()?;
        state.index.remove(&run.id);
        state.active.insert(run.id, ActiveRun::admitted(&run));
        Some(run)
    }

    /// 释放活跃槽位；重复释放返回 false
    pub fn release(&self, run_id: RunId) -> bool {
        let released = self.state.lock().active.remove(&run_id).is_some();
        if released {
            self.notify.notify_one();
        }
        released
    }

    /// 取消运行，返回取消时所处的状态
    ///
    /// 排队中的运行直接移出队列；活跃运行只发出取消信号，由执行方在步骤边界响应。
    pub fn cancel(&self, run_id: RunId) -> Option<RunState> {
        let mut state = self.state.lock();
        if let Some(key) = state.index.remove(&run_id) {
            if let Some(run) = state.queued.remove(&key) {
                run.cancel.cancel();
            }
            return Some(RunState::Queued);
        }
        state.active.get(&run_id).map(|active| {
            active.cancel.cancel();
            RunState::Active
        })
    }

    pub fn has_capacity(&self) -> bool {
        self.state.lock().active.len() < self.max_active
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    pub fn queued_count(&self) -> usize {
        self.state.lock().queued.len()
    }

    /// 队列和活跃槽位都为空
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.active.is_empty() && state.queued.is_empty()
    }

    /// 状态快照（不修改队列）
    pub fn peek_status(&self) -> StatusSnapshot {
        let state = self.state.lock();

        let mut active: Vec<RunSnapshot> = state
            .active
            .iter()
            .map(|(id, run)| RunSnapshot {
                run_id: *id,
                state: RunState::Active,
                priority: run.priority,
                owner_id: run.owner_id.clone(),
                subject_id: run.subject_id.clone(),
                enqueued_at: run.enqueued_at,
                admitted_at: Some(run.admitted_at),
                position: None,
            })
            .collect();
        active.sort_by_key(|r| r.admitted_at);

        let queued = state.queued.values().enumerate().map(|(i, run)| RunSnapshot {
            run_id: run.id,
            state: RunState::Queued,
            priority: run.priority,
            owner_id: run.owner_id.clone(),
            subject_id: run.subject_id.clone(),
            enqueued_at: run.enqueued_at,
            admitted_at: None,
            position: Some(i + 1),
        });

        StatusSnapshot {
            active_count: state.active.len(),
            queued_count: state.queued.len(),
            max_active: self.max_active,
            runs: active.into_iter().chain(queued).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Step;

    fn run(priority: i64) -> QueuedRun {
        QueuedRun::new(vec![Step::navigate("https://example.com")], priority, "owner", "subject")
    }

    #[test]
    fn test_lower_priority_first_then_fifo() {
        let queue = ExecutionQueue::new(2);
        let late = run(5);
        let first = run(1);
        let second = run(5);
        let (late_id, first_id, second_id) = (late.id, first.id, second.id);

        assert_eq!(queue.enqueue(late).unwrap(), 1);
        assert_eq!(queue.enqueue(first).unwrap(), 1);
        assert_eq!(queue.enqueue(second).unwrap(), 3);

        assert_eq!(queue.dequeue_next().unwrap().id, first_id);
        assert_eq!(queue.dequeue_next().unwrap().id, late_id);
        assert_eq!(queue.dequeue_next().unwrap().id, second_id);
        assert!(queue.dequeue_next().is_none());
    }

    #[test]
    fn test_duplicate_enqueue_is_rejected() {
        let queue = ExecutionQueue::new(1);
        let r = run(1);
        queue.enqueue(r.clone()).unwrap();
        assert!(queue.enqueue(r).is_err());
    }

    #[test]
    fn test_admission_respects_capacity_and_release_is_idempotent() {
        let queue = ExecutionQueue::new(1);
        let (a, b) = (run(1), run(1));

        assert!(queue.try_admit(&a));
        assert!(!queue.has_capacity());
        assert!(!queue.try_admit(&b));
        assert!(!queue.try_admit(&a));

        assert!(queue.release(a.id));
        assert!(!queue.release(a.id));
        assert!(queue.try_admit(&b));
        assert_eq!(queue.active_count(), 1);
    }

    #[test]
    fn test_requeue_keeps_original_place() {
        let queue = ExecutionQueue::new(1);
        queue.enqueue(run(3)).unwrap();
        let taken = queue.dequeue_next().unwrap();
        let taken_id = taken.id;
        queue.enqueue(run(3)).unwrap();

        queue.requeue(taken);
        assert_eq!(queue.dequeue_next().unwrap().id, taken_id);
    }

    #[test]
    fn test_peek_status_is_non_destructive() {
        let queue = ExecutionQueue::new(1);
        let active = run(1);
        queue.try_admit(&active);
        queue.enqueue(run(2)).unwrap();
        queue.enqueue(run(1)).unwrap();

        let first = queue.peek_status();
        let second = queue.peek_status();
        assert_eq!(first.active_count, 1);
        assert_eq!(first.queued_count, 2);
        assert_eq!(first.runs.len(), 3);
        assert_eq!(first.runs[0].state, RunState::Active);
        assert_eq!(first.runs[1].priority, 1);
        assert_eq!(first.runs[2].position, Some(2));
        assert_eq!(
            first.runs.iter().map(|r| r.run_id).collect::<Vec<_>>(),
            second.runs.iter().map(|r| r.run_id).collect::<Vec<_>>()
        );
        assert_eq!(queue.queued_count(), 2);
    }

    #[test]
    fn test_cancel_queued_and_active() {
        let queue = ExecutionQueue::new(1);
        let queued = run(1);
        let queued_token = queued.cancel.clone();
        let queued_id = queued.id;
        queue.enqueue(queued).unwrap();

        let active = run(1);
        queue.try_admit(&active);

        assert_eq!(queue.cancel(queued_id), Some(RunState::Queued));
        assert!(queued_token.is_cancelled());
        assert_eq!(queue.queued_count(), 0);

        assert_eq!(queue.cancel(active.id), Some(RunState::Active));
        assert!(active.cancel.is_cancelled());
        assert_eq!(queue.active_count(), 1);

        assert_eq!(queue.cancel(RunId::new()), None);
    }

    #[test]
    fn test_admit_next_respects_priority_and_capacity() {
        let queue = ExecutionQueue::new(2);
        let (low, high, mid) = (run(10), run(1), run(5));
        let (high_id, mid_id) = (high.id, mid.id);
        queue.enqueue(low).unwrap();
        queue.enqueue(high).unwrap();
        queue.enqueue(mid).unwrap();

        assert_eq!(queue.admit_next().unwrap().id, high_id);
        assert_eq!(queue.admit_next().unwrap().id, mid_id);
        assert!(queue.admit_next().is_none());
        assert_eq!(queue.active_count(), 2);
        assert_eq!(queue.queued_count(), 1);

        assert!(queue.release(high_id));
        assert_eq!(queue.admit_next().unwrap().priority, 10);
    }

    #[test]
    fn test_cancel_always_finds_run_during_admission() {
        let queue = Arc::new(ExecutionQueue::new(64));
        let runs: Vec<QueuedRun> = (0..64).map(run).collect();
        let ids: Vec<RunId> = runs.iter().map(|r| r.id).collect();
        for r in runs {
            queue.enqueue(r).unwrap();
        }

        let admitter = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                let mut admitted = Vec::new();
                while let Some(run) = queue.admit_next() {
                    admitted.push(run);
                }
                admitted
            })
        };
        let canceller = {
            let queue = queue.clone();
            std::thread::spawn(move || ids.iter().map(|id| queue.cancel(*id)).collect::<Vec<_>>())
        };

        let admitted = admitter.join().unwrap();
        let states = canceller.join().unwrap();

        assert!(states.iter().all(Option::is_some));
        assert!(admitted.iter().all(|r| r.cancel.is_cancelled()));
        let cancelled_in_queue = states.iter().filter(|s| **s == Some(RunState::Queued)).count();
        assert_eq!(admitted.len() + cancelled_in_queue, 64);
    }

    #[test]
    fn test_concurrent_admission_never_exceeds_capacity() {
        let queue = Arc::new(ExecutionQueue::new(3));
        let runs: Vec<QueuedRun> = (0..64).map(|_| run(1)).collect();

        let handles: Vec<_> = runs
            .chunks(8)
            .map(|chunk| {
                let queue = queue.clone();
                let chunk = chunk.to_vec();
                std::thread::spawn(move || {
                    chunk
                        .iter()
                        .filter(|r| {
                            let admitted = queue.try_admit(r);
                            assert!(queue.active_count() <= 3);
                            admitted
                        })
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 3);
        assert_eq!(queue.active_count(), 3);
    }
}
