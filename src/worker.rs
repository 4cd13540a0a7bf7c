use super::{
    errors::{panic_message, PoolError},
    model::{Request, Response, Stats},
    queue::RequestQueue,
    result::PoolResult,
};
use std::{
    backtrace::Backtrace,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{atomic::Ordering, Arc},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};


/// Забирает запросы из общей очереди и отдает ответы агрегатору
///
/// Между запросами воркер состояния не хранит. Останавливается при отмене
/// токена или закрытии агрегатора. Паника обработчика завершает воркер
/// навсегда, ошибка логируется вместе с backtrace.
pub(crate) struct Worker<P, R, F> {
    id: usize,
    requests: Arc<RequestQueue<P>>,
    responses: mpsc::Sender<Response<R>>,
    handler: Arc<F>,
    stats: Arc<Stats>,
}

impl<P, R, F> Worker<P, R, F>
where
    P: Send + 'static,
    R: Send + 'static,
    F: Fn(P) -> R + Send + Sync + 'static,
{
    pub(crate) fn new(
        id: usize,
        requests: Arc<RequestQueue<P>>,
        responses: mpsc::Sender<Response<R>>,
        handler: Arc<F>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            id,
            requests,
            responses,
            handler,
            stats,
        }
    }

    pub(crate) fn start(self, token: CancellationToken) -> JoinHandle<()> {
        self.stats.live_workers.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move { self.run(token).await })
    }

    async fn run(self, token: CancellationToken) {
        debug!(worker_id = self.id, "worker started");

        let outcome = self.work_loop(&token).await;
        self.stats.live_workers.fetch_sub(1, Ordering::Relaxed);

        match outcome {
            Ok(()) => debug!(worker_id = self.id, "worker stopped"),
            Err(err) => {
                self.stats.faulted_workers.fetch_add(1, Ordering::Relaxed);
                // стек места паники печатает panic hook (RUST_BACKTRACE)
                error!(
                    worker_id = self.id,
                    error = %err,
                    backtrace = %Backtrace::force_capture(),
                    "worker terminated by handler fault"
                );
            }
        }
    }

    async fn work_loop(&self, token: &CancellationToken) -> PoolResult<()> {
        while let Some(request) = self.requests.next(token).await {
            let response = self.handle(request).await?;

            let sent = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                sent = self.responses.send(response) => sent,
            };
            if sent.is_err() {
                trace!(worker_id = self.id, "response queue closed");
                break;
            }
        }
        Ok(())
    }

    /// Обработчик выполняется в blocking pool, async-потоки runtime не блокируются
    async fn handle(&self, request: Request<P>) -> PoolResult<Response<R>> {
        let Request { id, payload } = request;
        trace!(worker_id = self.id, request_id = id, "handling request");

        self.stats.busy_workers.fetch_add(1, Ordering::Relaxed);
        let handler = Arc::clone(&self.handler);
        let joined = tokio::task::spawn_blocking(move || {
            catch_unwind(AssertUnwindSafe(|| handler(payload)))
        })
        .await;
        self.stats.busy_workers.fetch_sub(1, Ordering::Relaxed);

        match joined {
            Ok(Ok(payload)) => {
                self.stats.handled.fetch_add(1, Ordering::Relaxed);
                Ok(Response::new(id, payload))
            }
            Ok(Err(panic_info)) => Err(PoolError::Panic(panic_message(panic_info.as_ref()))),
            Err(join_err) => {
                if join_err.is_panic() {
                    Err(PoolError::Panic(panic_message(join_err.into_panic().as_ref())))
                } else {
                    Err(PoolError::JoinFailed(join_err.to_string()))
                }
            }
        }
    }
}
