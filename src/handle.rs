use super::{
    errors::{panic_message, TaskError, TaskResult},
    queue::Task,
};
use futures::channel::oneshot;
use std::{
    fmt,
    future::Future,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    task::{Context, Poll},
};
use tokio_util::sync::CancellationToken;


/// Handle на задачу с поддержкой отмены.
///
/// Можно дождаться как future или блокирующе через `wait`. Если задача была
/// выброшена из очереди при shutdown, результат `TaskError::Discarded`.
pub struct TaskHandle<T> {
    cancel_token: CancellationToken,
    receiver: oneshot::Receiver<TaskResult<T>>,
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish()
    }
}

impl<T> TaskHandle<T> {

    pub(crate) fn new
    (
        cancel_token: CancellationToken,
        receiver: oneshot::Receiver<TaskResult<T>>,
    ) -> Self {
        Self {
            cancel_token,
            receiver
        }
    }

    /// Отменяет задачу, если она ещё не начала выполняться
    #[inline]
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn wait(self) -> TaskResult<T> {
        futures::executor::block_on(self)
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = TaskResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(res) => Poll::Ready(res.unwrap_or(Err(TaskError::Discarded))),
            Poll::Pending => Poll::Pending,
        }
    }
}


/// Заворачивает замыкание в задачу очереди и отдаёт handle на её результат.
///
/// Паника задачи сначала уходит в handle, затем пробрасывается дальше,
/// чтобы воркер учёл её в метриках.
pub(crate) fn task_pair<T, F>(f: F) -> (Task, TaskHandle<T>)
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = oneshot::channel::<TaskResult<T>>();
    let cancel_token = CancellationToken::new();
    let ct = cancel_token.clone();

    let task: Task = Box::new(move || {
        if ct.is_cancelled() {
            let _ = tx.send(Err(TaskError::Cancelled));
            return;
        }

        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => {
                let _ = tx.send(Ok(value));
            }
            Err(payload) => {
                let _ = tx.send(Err(TaskError::Panic(panic_message(&*payload))));
                panic::resume_unwind(payload);
            }
        }
    });

    (task, TaskHandle::new(cancel_token, rx))
}
