use super::{
    errors::panic_message,
    model::WorkerState,
    queue::{Job, WorkQueue},
};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::{
    cell::RefCell,
    io,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle, ThreadId},
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};


thread_local! {
    static CURRENT_TOKEN: RefCell<Option<CancellationToken>> = const { RefCell::new(None) };
}

/// Токен отмены воркера, на котором выполняется текущая задача.
///
/// Отменяется, когда принудительный shutdown бросает поток по таймауту.
/// Долгие задачи могут проверять его и выходить сами. Вне воркера `None`.
pub fn current_cancellation() -> Option<CancellationToken> {
    CURRENT_TOKEN.with(|token| token.borrow().clone())
}


/// Счётчики, общие для пула и всех его воркеров
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub threads: AtomicUsize,
    pub idle: AtomicUsize,
    pub completed: AtomicUsize,
    pub failed: AtomicUsize,
}

/// Живёт до конца потока: уменьшает счётчик и закрывает канал `exited`,
/// даже если цикл воркера раскрутился паникой.
struct ExitGuard {
    counters: Arc<Counters>,
    _exited: Sender<()>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.counters.threads.fetch_sub(1, Ordering::AcqRel);
    }
}


/// Владелец одного потока-воркера
pub(crate) struct WorkerHandle {
    name: String,
    thread_id: ThreadId,
    thread: Option<JoinHandle<()>>,
    exited: Receiver<()>,
    cancel: CancellationToken,
    state: WorkerState,
}

impl WorkerHandle {
    pub fn spawn(
        name: String,
        queue: Arc<WorkQueue>,
        counters: Arc<Counters>,
        stack_size: Option<usize>,
    ) -> io::Result<Self> {
        let (exited_tx, exited_rx) = channel::bounded::<()>(0);
        let cancel = CancellationToken::new();

        let mut builder = thread::Builder::new().name(name.clone());
        if let Some(size) = stack_size {
            builder = builder.stack_size(size);
        }

        counters.threads.fetch_add(1, Ordering::AcqRel);
        let guard = ExitGuard {
            counters: counters.clone(),
            _exited: exited_tx,
        };
        let token = cancel.clone();

        // При ошибке spawn guard уничтожается вместе с замыканием
        let thread = builder.spawn(move || {
            let _guard = guard;
            worker_loop(&queue, &counters, token);
        })?;

        Ok(Self {
            name,
            thread_id: thread.thread().id(),
            thread: Some(thread),
            exited: exited_rx,
            cancel,
            state: WorkerState::Running,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Ожидание без ограничения по времени
    pub fn join(&mut self) -> WorkerState {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(thread = %self.name, "worker thread terminated by panic");
            }
            self.state = WorkerState::Exited;
        }
        self.state
    }

    /// Ожидание не дольше `timeout`. Если поток не вышел, токен отменяется,
    /// а `JoinHandle` отпускается: поток помечается `Killed`.
    pub fn join_timeout(&mut self, timeout: Duration) -> WorkerState {
        if self.thread.is_none() {
            return self.state;
        }

        match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => self.join(),
            Err(RecvTimeoutError::Timeout) => {
                self.cancel.cancel();
                drop(self.thread.take());
                self.state = WorkerState::Killed;
                self.state
            }
        }
    }
}


fn worker_loop(queue: &WorkQueue, counters: &Counters, cancel: CancellationToken) {
    CURRENT_TOKEN.with(|slot| *slot.borrow_mut() = Some(cancel.clone()));
    trace!("worker started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        counters.idle.fetch_add(1, Ordering::AcqRel);
        let job = queue.pop();
        counters.idle.fetch_sub(1, Ordering::AcqRel);

        let task = match job {
            Job::Stop => break,
            Job::Run(task) => task,
        };

        if cancel.is_cancelled() {
            debug!("worker cancelled, dropping dequeued task");
            break;
        }

        match panic::catch_unwind(AssertUnwindSafe(task)) {
            Ok(()) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                error!("task panicked: {}", panic_message(&*payload));
            }
        }
    }

    trace!("worker stopped");
}
