use super::{
    errors::panic_message,
    model::{Response, Stats},
};
use std::{
    backtrace::Backtrace,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{atomic::Ordering, Arc},
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

// историю не аллоцируем заранее целиком: expected может быть огромным
const HISTORY_PREALLOC: usize = 1024;

/// Единственный потребитель очереди ответов
///
/// Владеет историей ответов и счетчиком processed, больше их никто не пишет.
/// История возвращается результатом задачи после остановки.
pub(crate) struct Aggregator<R, H> {
    responses: mpsc::Receiver<Response<R>>,
    handler: H,
    expected: usize,
    completion: Option<oneshot::Sender<()>>,
    stats: Arc<Stats>,
}

impl<R, H> Aggregator<R, H>
where
    R: Send + 'static,
    H: FnMut(&R) + Send + 'static,
{
    pub(crate) fn new(
        responses: mpsc::Receiver<Response<R>>,
        handler: H,
        expected: usize,
        completion: oneshot::Sender<()>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            responses,
            handler,
            expected,
            completion: Some(completion),
            stats,
        }
    }

    pub(crate) async fn run(mut self, token: CancellationToken) -> Vec<Response<R>> {
        debug!(expected = self.expected, "aggregator started");
        let mut history: Vec<Response<R>> = Vec::with_capacity(self.expected.min(HISTORY_PREALLOC));
        let mut processed = 0usize;

        loop {
            let response = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                response = self.responses.recv() => match response {
                    Some(response) => response,
                    None => break,
                },
            };
            trace!(request_id = response.id, "aggregating response");
            history.push(response);

            let handler = &mut self.handler;
            let payload = &history[history.len() - 1].payload;
            if let Err(panic_info) = catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                error!(
                    processed,
                    error = %panic_message(panic_info.as_ref()),
                    backtrace = %Backtrace::force_capture(),
                    "aggregator terminated by response handler fault"
                );
                break;
            }

            processed += 1;
            self.stats.processed.store(processed, Ordering::Release);

            if processed == self.expected {
                if let Some(done) = self.completion.take() {
                    let _ = done.send(());
                    info!(processed, "all expected responses processed");
                }
            }
        }

        // необработанные ответы в очереди дропаются вместе с receiver
        debug!(processed, expected = self.expected, "aggregator stopped");
        history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fires_completion_once_expected_count_is_reached() {
        let stats = Arc::new(Stats::new(1, 2));
        let (tx, rx) = mpsc::channel(2);
        let (done_tx, mut done_rx) = oneshot::channel();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let handler = move |p: &u32| {
            let _ = seen_tx.send(*p);
        };
        let task = tokio::spawn(Aggregator::new(rx, handler, 2, done_tx, stats.clone()).run(token.clone()));

        tx.send(Response::new(0, 10)).await.unwrap();
        assert_eq!(seen_rx.recv().await, Some(10));
        assert!(done_rx.try_recv().is_err());

        tx.send(Response::new(1, 11)).await.unwrap();
        assert_eq!(seen_rx.recv().await, Some(11));
        done_rx.await.unwrap();

        token.cancel();
        let history = task.await.unwrap();
        assert_eq!(history, vec![Response::new(0, 10), Response::new(1, 11)]);
        assert_eq!(stats.snapshot().processed, 2);
    }

    #[tokio::test]
    async fn handler_panic_stops_aggregation_and_drops_completion() {
        let stats = Arc::new(Stats::new(1, 3));
        let (tx, rx) = mpsc::channel(3);
        let (done_tx, done_rx) = oneshot::channel();
        let handler = |p: &u32| {
            if *p == 1 {
                panic!("bad response");
            }
        };
        let task = tokio::spawn(Aggregator::new(rx, handler, 3, done_tx, stats.clone()).run(CancellationToken::new()));

        tx.send(Response::new(0, 0)).await.unwrap();
        tx.send(Response::new(1, 1)).await.unwrap();

        let history = task.await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(stats.snapshot().processed, 1);
        assert!(done_rx.await.is_err());
    }
}
