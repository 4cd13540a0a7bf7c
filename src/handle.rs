use super::{
    errors::PoolError,
    result::PoolResult,
};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll}
};
use tokio::{
    sync::oneshot,
    time::Duration,
};


/// Одноразовый сигнал завершения из [`RequestPool::new`](crate::RequestPool::new)
///
/// `Ok(())`, когда агрегатор обработал заявленное число ответов. Если
/// агрегатор остановился раньше (close, отмена или паника обработчика
/// ответов), возвращает [`PoolError::Cancelled`].
pub struct Completion {
    receiver: oneshot::Receiver<()>,
    fired: bool,
}

impl Completion {
    pub(crate) fn new(receiver: oneshot::Receiver<()>) -> Self {
        Self {
            receiver,
            fired: false,
        }
    }

    /// Неблокирующая проверка, сработал ли сигнал
    pub fn is_complete(&mut self) -> bool {
        if !self.fired && self.receiver.try_recv().is_ok() {
            self.fired = true;
        }
        self.fired
    }

    pub async fn wait_timeout(self, timeout: Duration) -> PoolResult<()> {
        match tokio::time::timeout(timeout, self).await {
            Ok(result) => result,
            Err(_) => Err(PoolError::Timeout),
        }
    }
}

impl Future for Completion {
    type Output = PoolResult<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.fired {
            return Poll::Ready(Ok(()));
        }
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(())) => {
                this.fired = true;
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(_)) => Poll::Ready(Err(PoolError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}
