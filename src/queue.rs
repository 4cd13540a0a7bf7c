use super::{
    errors::PoolError,
    model::{Request, Stats},
    result::PoolResult,
};
use std::sync::{atomic::Ordering, Arc};
use crossbeam::deque::{Injector, Steal};
use tokio::sync::{Notify, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;


/// Общая ограниченная очередь запросов
///
/// Запросы лежат в lock-free injector, семафор хранит по permit на каждое
/// свободное место. Отправители ждут, когда в очереди `capacity` запросов.
pub(crate) struct RequestQueue<P> {
    inject: Injector<Request<P>>,
    notify: Notify,
    slots: Semaphore,
    capacity: usize,
    stats: Arc<Stats>,
}

impl<P> RequestQueue<P> {
    pub(crate) fn new(capacity: usize, stats: Arc<Stats>) -> Self {
        Self {
            inject: Injector::new(),
            notify: Notify::new(),
            slots: Semaphore::new(capacity),
            capacity,
            stats,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ставит запрос в очередь, ожидая места, пока не отменен `token`
    pub(crate) async fn push(&self, request: Request<P>, token: &CancellationToken) -> PoolResult<()> {
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(PoolError::Cancelled),
            permit = self.slots.acquire() => permit.map_err(|_| PoolError::Cancelled)?,
        };
        // место возвращается в `pop`
        permit.forget();
        self.enqueue(request);
        Ok(())
    }

    pub(crate) fn try_push(&self, request: Request<P>, token: &CancellationToken) -> PoolResult<()> {
        if token.is_cancelled() {
            return Err(PoolError::Cancelled);
        }
        match self.slots.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(TryAcquireError::NoPermits) => {
                return Err(PoolError::QueueFull { capacity: self.capacity })
            }
            Err(TryAcquireError::Closed) => return Err(PoolError::Cancelled),
        }
        self.enqueue(request);
        Ok(())
    }

    #[inline(always)]
    fn enqueue(&self, request: Request<P>) {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        self.stats.queued.fetch_add(1, Ordering::Relaxed);
        self.inject.push(request);
        self.notify.notify_one();
    }

    pub(crate) fn pop(&self) -> Option<Request<P>> {
        loop {
            match self.inject.steal() {
                Steal::Success(request) => {
                    self.stats.queued.fetch_sub(1, Ordering::Relaxed);
                    self.slots.add_permits(1);
                    return Some(request);
                }
                Steal::Empty => return None,
                Steal::Retry => std::hint::spin_loop(),
            }
        }
    }

    /// Ждет следующий запрос; `None` после отмены `token`
    ///
    /// Отмена проверяется перед каждым извлечением: после нее из очереди
    /// ничего не забирается.
    pub(crate) async fn next(&self, token: &CancellationToken) -> Option<Request<P>> {
        loop {
            if token.is_cancelled() {
                return None;
            }
            if let Some(request) = self.pop() {
                return Some(request);
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inject.len()
    }
}
