use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Запрос, отправленный в пул
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<P> {
    pub id: u64,
    pub payload: P,
}

impl<P> Request<P> {
    pub fn new(id: u64, payload: P) -> Self {
        Self { id, payload }
    }
}

/// Результат обработки одного [`Request`] с id исходного запроса
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response<R> {
    pub id: u64,
    pub payload: R,
}

impl<R> Response<R> {
    pub fn new(id: u64, payload: R) -> Self {
        Self { id, payload }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

impl PoolState {
    fn as_u8(self) -> u8 {
        match self {
            PoolState::Created => 0,
            PoolState::Running => 1,
            PoolState::ShuttingDown => 2,
            PoolState::Stopped => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => PoolState::Created,
            1 => PoolState::Running,
            2 => PoolState::ShuttingDown,
            _ => PoolState::Stopped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Processing,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolMetrics {
    pub workers: usize,
    pub live_workers: usize,
    pub busy_workers: usize,
    pub faulted_workers: usize,
    pub submitted: usize,
    pub queued: usize,
    pub handled: usize,
    pub processed: usize,
    pub expected: usize,
}

impl PoolMetrics {
    /// Доля живых воркеров, занятых обработчиком
    pub fn utilization(&self) -> f64 {
        if self.live_workers == 0 {
            return 0.0;
        }
        self.busy_workers as f64 / self.live_workers as f64
    }

    /// Доля ожидаемых ответов, уже прошедших агрегацию
    pub fn progress(&self) -> f64 {
        if self.expected == 0 {
            return 1.0;
        }
        self.processed as f64 / self.expected as f64
    }

    pub fn is_complete(&self) -> bool {
        self.processed >= self.expected
    }

    /// Число воркеров в состоянии `state`
    pub fn workers_in(&self, state: WorkerState) -> usize {
        match state {
            WorkerState::Idle => self.live_workers.saturating_sub(self.busy_workers),
            WorkerState::Processing => self.busy_workers,
            WorkerState::Terminated => self.workers.saturating_sub(self.live_workers),
        }
    }
}

/// Итог работы пула после остановки всех задач
#[derive(Debug)]
pub struct PoolReport<R> {
    pub responses: Vec<Response<R>>,
    pub metrics: PoolMetrics,
}

impl<R> PoolReport<R> {
    pub fn response_ids(&self) -> Vec<u64> {
        self.responses.iter().map(|r| r.id).collect()
    }
}

/// Счетчики задач пула для снимков [`PoolMetrics`]
///
/// `processed` пишет только агрегатор.
#[derive(Debug)]
pub(crate) struct Stats {
    workers: usize,
    expected: usize,
    state: AtomicU8,
    pub(crate) live_workers: AtomicUsize,
    pub(crate) busy_workers: AtomicUsize,
    pub(crate) faulted_workers: AtomicUsize,
    pub(crate) submitted: AtomicUsize,
    pub(crate) queued: AtomicUsize,
    pub(crate) handled: AtomicUsize,
    pub(crate) processed: AtomicUsize,
}

impl Stats {
    pub(crate) fn new(workers: usize, expected: usize) -> Self {
        Self {
            workers,
            expected,
            state: AtomicU8::new(PoolState::Created.as_u8()),
            live_workers: AtomicUsize::new(0),
            busy_workers: AtomicUsize::new(0),
            faulted_workers: AtomicUsize::new(0),
            submitted: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            handled: AtomicUsize::new(0),
            processed: AtomicUsize::new(0),
        }
    }

    pub(crate) fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: PoolState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Переход `from` -> `to`; false, если пул был в другом состоянии
    pub(crate) fn transition(&self, from: PoolState, to: PoolState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn snapshot(&self) -> PoolMetrics {
        PoolMetrics {
            workers: self.workers,
            live_workers: self.live_workers.load(Ordering::Relaxed),
            busy_workers: self.busy_workers.load(Ordering::Relaxed),
            faulted_workers: self.faulted_workers.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Acquire),
            expected: self.expected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(live: usize, busy: usize, processed: usize, expected: usize) -> PoolMetrics {
        PoolMetrics {
            workers: live,
            live_workers: live,
            busy_workers: busy,
            faulted_workers: 0,
            submitted: expected,
            queued: 0,
            handled: processed,
            processed,
            expected,
        }
    }

    #[test]
    fn utilization_and_progress() {
        let m = metrics(4, 1, 5, 10);
        assert_eq!(m.utilization(), 0.25);
        assert_eq!(m.progress(), 0.5);
        assert!(!m.is_complete());

        assert_eq!(m.workers_in(WorkerState::Idle), 3);
        assert_eq!(m.workers_in(WorkerState::Processing), 1);
        assert_eq!(m.workers_in(WorkerState::Terminated), 0);

        let m = metrics(0, 0, 10, 10);
        assert_eq!(m.utilization(), 0.0);
        assert!(m.is_complete());
    }

    #[test]
    fn state_transitions_are_checked() {
        let stats = Stats::new(2, 4);
        assert_eq!(stats.state(), PoolState::Created);

        stats.set_state(PoolState::Running);
        assert!(stats.transition(PoolState::Running, PoolState::ShuttingDown));
        assert!(!stats.transition(PoolState::Running, PoolState::ShuttingDown));
        assert_eq!(stats.state(), PoolState::ShuttingDown);

        stats.set_state(PoolState::Stopped);
        assert_eq!(stats.snapshot().workers, 2);
        assert_eq!(stats.snapshot().expected, 4);
    }
}
