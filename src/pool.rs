use super::{
    aggregator::Aggregator,
    errors::PoolError,
    handle::Completion,
    model::{PoolMetrics, PoolReport, PoolState, Request, Response, Stats},
    queue::RequestQueue,
    result::PoolResult,
    worker::Worker,
};
use std::sync::Arc;
use futures::future::join_all;
use tokio::{
    sync::{mpsc, oneshot, Semaphore},
    task::JoinHandle,
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};


/// Конфигурация пула
///
/// `expected_requests` задает и число ответов для сигнала завершения,
/// и емкость очередей запросов и ответов.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub workers: usize,
    pub expected_requests: usize,
}

impl Config {
    pub fn new(workers: usize, expected_requests: usize) -> Self {
        Self {
            workers,
            expected_requests,
        }
    }

    pub fn cpu_bound(expected_requests: usize) -> Self {
        Self::new(num_cpus::get(), expected_requests)
    }

    /// Для I/O-bound обработчиков: воркеров вдвое больше, чем CPU
    pub fn io_bound(expected_requests: usize) -> Self {
        Self::new(num_cpus::get() * 2, expected_requests)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.workers == 0 {
            return Err(PoolError::InvalidConfig("workers must be greater than zero".into()));
        }
        if self.expected_requests == 0 {
            return Err(PoolError::InvalidConfig(
                "expected_requests must be greater than zero".into(),
            ));
        }
        if self.expected_requests > Semaphore::MAX_PERMITS {
            return Err(PoolError::InvalidConfig(format!(
                "expected_requests must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        Ok(())
    }
}


/// Пул фиксированного размера для заранее известного числа запросов
///
/// Запросы из [`add_request`](Self::add_request) забирает любой свободный
/// воркер. Воркер вызывает обработчик запроса и передает ответ единственному
/// агрегатору. Агрегатор вызывает обработчик ответа и срабатывает
/// [`Completion`], когда набралось `expected_requests` ответов.
///
/// Ответы приходят в порядке завершения, а не отправки.
///
/// ```no_run
/// # async fn demo() -> request_pool::result::PoolResult<()> {
/// use request_pool::RequestPool;
/// use tokio_util::sync::CancellationToken;
///
/// let (pool, completion) = RequestPool::new(
///     &CancellationToken::new(),
///     3,
///     |x: u64| x * 2,
///     5,
///     |doubled: &u64| println!("{doubled}"),
/// )?;
/// for i in 0..5 {
///     pool.add_request(i, i).await?;
/// }
/// completion.await?;
/// let report = pool.shutdown().await?;
/// assert_eq!(report.responses.len(), 5);
/// # Ok(())
/// # }
/// ```
pub struct RequestPool<P, R> {
    requests: Arc<RequestQueue<P>>,
    cancellation_token: CancellationToken,
    shutdown_trigger: CancellationToken,
    stats: Arc<Stats>,
    workers: Vec<JoinHandle<()>>,
    aggregator: Option<JoinHandle<Vec<Response<R>>>>,
    supervisor: Option<JoinHandle<()>>,
}

impl<P, R> RequestPool<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    /// Запускает `workers` воркеров и агрегатор
    ///
    /// Токен пула дочерний к `parent`: отмена `parent` останавливает пул
    /// так же, как [`close`](Self::close).
    pub fn new<F, H>(
        parent: &CancellationToken,
        workers: usize,
        request_handler: F,
        expected_requests: usize,
        response_handler: H,
    ) -> PoolResult<(Self, Completion)>
    where
        F: Fn(P) -> R + Send + Sync + 'static,
        H: FnMut(&R) + Send + 'static,
    {
        Self::with_config(
            parent,
            Config::new(workers, expected_requests),
            request_handler,
            response_handler,
        )
    }

    pub fn with_config<F, H>(
        parent: &CancellationToken,
        config: Config,
        request_handler: F,
        response_handler: H,
    ) -> PoolResult<(Self, Completion)>
    where
        F: Fn(P) -> R + Send + Sync + 'static,
        H: FnMut(&R) + Send + 'static,
    {
        config.validate()?;

        let capacity = config.expected_requests;
        let stats = Arc::new(Stats::new(config.workers, capacity));
        let requests = Arc::new(RequestQueue::new(capacity, stats.clone()));
        let (response_tx, response_rx) = mpsc::channel::<Response<R>>(capacity);
        let (done_tx, done_rx) = oneshot::channel();
        let cancellation_token = parent.child_token();
        let shutdown_trigger = CancellationToken::new();
        let request_handler = Arc::new(request_handler);

        stats.set_state(PoolState::Running);

        let workers = (0..config.workers)
            .map(|id| {
                Worker::new(
                    id,
                    requests.clone(),
                    response_tx.clone(),
                    request_handler.clone(),
                    stats.clone(),
                )
                .start(cancellation_token.clone())
            })
            .collect();
        // очередь ответов закроется, когда завершатся все воркеры
        drop(response_tx);

        let aggregator = Aggregator::new(response_rx, response_handler, capacity, done_tx, stats.clone());
        let aggregator = tokio::spawn(aggregator.run(cancellation_token.clone()));

        let supervisor = tokio::spawn(supervise(
            shutdown_trigger.clone(),
            cancellation_token.clone(),
            stats.clone(),
        ));

        info!(
            workers = config.workers,
            capacity = requests.capacity(),
            "request pool started"
        );

        let pool = Self {
            requests,
            cancellation_token,
            shutdown_trigger,
            stats,
            workers,
            aggregator: Some(aggregator),
            supervisor: Some(supervisor),
        };
        Ok((pool, Completion::new(done_rx)))
    }
}

impl<P, R> RequestPool<P, R> {
    /// Ставит запрос в очередь, ожидая свободного места
    ///
    /// Пул не отклоняет запросы сверх `expected_requests`, лишние могут
    /// ждать бесконечно. После отмены пула возвращает [`PoolError::Cancelled`].
    pub async fn add_request(&self, id: u64, payload: P) -> PoolResult<()> {
        self.requests
            .push(Request::new(id, payload), &self.cancellation_token)
            .await
    }

    /// Как [`add_request`](Self::add_request), но без ожидания:
    /// при заполненной очереди возвращает [`PoolError::QueueFull`]
    pub fn try_add_request(&self, id: u64, payload: P) -> PoolResult<()> {
        self.requests
            .try_push(Request::new(id, payload), &self.cancellation_token)
    }

    /// Клонируемый handle для отправки запросов из нескольких задач
    pub fn submitter(&self) -> Submitter<P> {
        Submitter {
            requests: self.requests.clone(),
            cancellation_token: self.cancellation_token.clone(),
        }
    }

    /// Запрос остановки. Идемпотентен, не блокирует.
    pub fn close(&self) {
        self.shutdown_trigger.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    #[inline]
    pub fn state(&self) -> PoolState {
        self.stats.state()
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        self.stats.snapshot()
    }

    /// Закрывает пул и ждет завершения всех задач
    ///
    /// Воркер, занятый обработчиком, сначала доводит вызов до конца.
    /// Состояние всегда становится `Stopped`, даже при ошибке join.
    pub async fn shutdown(mut self) -> PoolResult<PoolReport<R>> {
        self.close();

        let mut failure = None;
        for joined in join_all(std::mem::take(&mut self.workers)).await {
            if let Err(join_err) = joined {
                error!(error = %join_err, "worker task failed to join");
                failure.get_or_insert(PoolError::JoinFailed(join_err.to_string()));
            }
        }
        if let Some(supervisor) = self.supervisor.take() {
            if let Err(join_err) = supervisor.await {
                failure.get_or_insert(PoolError::JoinFailed(join_err.to_string()));
            }
        }
        let responses = match self.aggregator.take() {
            Some(aggregator) => aggregator.await.unwrap_or_else(|join_err| {
                error!(error = %join_err, "aggregator task failed to join");
                failure.get_or_insert(PoolError::JoinFailed(join_err.to_string()));
                Vec::new()
            }),
            None => Vec::new(),
        };

        self.stats.set_state(PoolState::Stopped);
        debug!(responses = responses.len(), "request pool stopped");

        if let Some(err) = failure {
            return Err(err);
        }
        Ok(PoolReport {
            responses,
            metrics: self.stats.snapshot(),
        })
    }

    /// Мониторинг метрик с callback раз в `interval`
    /// ВАЖНО: Вызовите token.cancel() для остановки мониторинга (или закройте пул)
    pub fn start_monitoring<F>(&self, interval: Duration, callback: F) -> CancellationToken
    where
        F: Fn(PoolMetrics) + Send + 'static,
    {
        let stats = Arc::clone(&self.stats);
        let token = self.cancellation_token.child_token();
        let token_clone = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => callback(stats.snapshot()),
                    _ = token_clone.cancelled() => break,
                }
            }
        });

        token
    }
}

impl<P, R> Drop for RequestPool<P, R> {
    fn drop(&mut self) {
        self.close();
    }
}


/// Клонируемая сторона отправки [`RequestPool`]
pub struct Submitter<P> {
    requests: Arc<RequestQueue<P>>,
    cancellation_token: CancellationToken,
}

impl<P> Clone for Submitter<P> {
    fn clone(&self) -> Self {
        Self {
            requests: self.requests.clone(),
            cancellation_token: self.cancellation_token.clone(),
        }
    }
}

impl<P> Submitter<P> {
    pub async fn add_request(&self, id: u64, payload: P) -> PoolResult<()> {
        self.requests
            .push(Request::new(id, payload), &self.cancellation_token)
            .await
    }

    pub fn try_add_request(&self, id: u64, payload: P) -> PoolResult<()> {
        self.requests
            .try_push(Request::new(id, payload), &self.cancellation_token)
    }
}


/// Ждет close() или отмены родителя, затем отменяет пул
async fn supervise(shutdown_trigger: CancellationToken, token: CancellationToken, stats: Arc<Stats>) {
    tokio::select! {
        _ = shutdown_trigger.cancelled() => debug!("shutdown requested"),
        _ = token.cancelled() => debug!("parent token cancelled"),
    }
    stats.transition(PoolState::Running, PoolState::ShuttingDown);
    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation() {
        assert!(Config::new(2, 4).validate().is_ok());
        assert!(matches!(Config::new(0, 4).validate(), Err(PoolError::InvalidConfig(_))));
        assert!(matches!(Config::new(2, 0).validate(), Err(PoolError::InvalidConfig(_))));
    }

    #[test]
    fn presets_scale_with_cpus() {
        let cpus = num_cpus::get();
        assert_eq!(Config::cpu_bound(10).workers, cpus);
        assert_eq!(Config::io_bound(10).workers, cpus * 2);
        assert_eq!(Config::io_bound(10).with_workers(3), Config::new(3, 10));
    }

    #[test]
    fn expected_requests_above_semaphore_limit_are_rejected() {
        assert!(Config::new(2, Semaphore::MAX_PERMITS).validate().is_ok());
        assert!(matches!(
            Config::new(2, Semaphore::MAX_PERMITS + 1).validate(),
            Err(PoolError::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::new(2, usize::MAX).validate(),
            Err(PoolError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn oversized_pool_is_rejected_without_panicking() {
        let result = RequestPool::<u32, u32>::new(&CancellationToken::new(), 2, |x| x, usize::MAX >> 2, |_| {});
        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn huge_expected_count_does_not_preallocate_history() {
        let (pool, completion) =
            RequestPool::<u32, u32>::new(&CancellationToken::new(), 2, |x| x, 1 << 40, |_| {}).unwrap();
        pool.add_request(0, 5).await.unwrap();

        while pool.metrics().processed < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        drop(completion);

        let report = pool.shutdown().await.unwrap();
        assert_eq!(report.response_ids(), vec![0]);
        assert_eq!(report.metrics.expected, 1 << 40);
    }

    #[tokio::test]
    async fn shutdown_reports_aggregator_join_failure_and_still_stops() {
        let (pool, _completion) =
            RequestPool::<u32, u32>::new(&CancellationToken::new(), 2, |x| x, 2, |_| {}).unwrap();
        let stats = pool.stats.clone();
        pool.workers[0].abort();
        if let Some(aggregator) = pool.aggregator.as_ref() {
            aggregator.abort();
        }

        let result = pool.shutdown().await;
        assert!(matches!(result, Err(PoolError::JoinFailed(_))));
        assert_eq!(stats.state(), PoolState::Stopped);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_spawning() {
        let result = RequestPool::<u32, u32>::new(&CancellationToken::new(), 0, |x| x, 1, |_| {});
        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (pool, completion) =
            RequestPool::<u32, u32>::new(&CancellationToken::new(), 2, |x| x, 2, |_| {}).unwrap();
        pool.close();
        pool.close();
        assert_eq!(completion.await, Err(PoolError::Cancelled));
        assert!(pool.is_cancelled());
        pool.close();

        let report = pool.shutdown().await.unwrap();
        assert!(report.responses.is_empty());
        assert_eq!(report.metrics.live_workers, 0);
    }

    #[tokio::test]
    async fn parent_cancellation_stops_the_pool() {
        let parent = CancellationToken::new();
        let (pool, completion) = RequestPool::<u32, u32>::new(&parent, 1, |x| x, 3, |_| {}).unwrap();
        assert_eq!(pool.state(), PoolState::Running);

        parent.cancel();
        assert_eq!(completion.await, Err(PoolError::Cancelled));
        assert_eq!(pool.add_request(0, 0).await, Err(PoolError::Cancelled));

        let report = pool.shutdown().await.unwrap();
        assert!(report.responses.is_empty());
    }
}
