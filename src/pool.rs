use super::{
    errors::{lock, panic_message, PoolError},
    handle::{task_pair, TaskHandle},
    model::{PoolMetrics, ShutdownOptions, ShutdownReport, WorkerState},
    queue::{Job, Placement, Task, WorkQueue},
    registry::PoolManager,
    worker::{Counters, WorkerHandle},
};
use std::{
    fmt,
    future::Future,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, Weak,
    },
    thread,
};
use tracing::{debug, error, info, warn};


/// Конфигурация пула потоков
#[derive(Debug, Clone)]
pub struct Config {
    pub min_workers: usize,
    pub max_workers: usize,
    pub name: Option<String>,
    pub stack_size: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_workers: 5,
            max_workers: 20,
            name: None,
            stack_size: None,
        }
    }
}

impl Config {
    pub fn new(min_workers: usize, max_workers: usize) -> Self {
        Self {
            min_workers,
            max_workers,
            ..Default::default()
        }
    }

    pub fn cpu_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self::new(num_cpus, num_cpus)
    }

    pub fn io_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self::new(num_cpus, num_cpus * 4) // Для I/O-bound задач
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.min_workers == 0 || self.min_workers > self.max_workers {
            return Err(PoolError::Configuration {
                min: self.min_workers,
                max: self.max_workers,
            });
        }
        Ok(())
    }
}


pub type ThreadPool = Arc<ThreadPoolInner>;

type ShutdownCallback = Box<dyn FnOnce() + Send + 'static>;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Всё, что меняется под одной блокировкой: submit и shutdown
/// сериализуются через неё.
#[derive(Default)]
struct PoolState {
    /// Первый shutdown уже забрал колбэки
    closing: bool,
    terminated: bool,
    callbacks: Vec<ShutdownCallback>,
    threads: Vec<WorkerHandle>,
    /// Воркеры, которым ещё не отправлен стоп-сентинел
    known_workers: usize,
    spawned_total: usize,
}

/// Пул потоков с управляемым завершением.
///
/// Пока пул жив, он зарегистрирован в `PoolManager`: выход процесса или
/// прерывание останавливают его автоматически.
pub struct ThreadPoolInner {
    id: u64,
    name: String,
    config: Config,
    queue: Arc<WorkQueue>,
    counters: Arc<Counters>,
    total_submitted: AtomicUsize,
    terminated: AtomicBool,
    state: Mutex<PoolState>,
    manager: Weak<PoolManager>,
}

impl fmt::Debug for ThreadPoolInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPoolInner")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("config", &self.config)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

impl ThreadPoolInner {
    /// Создаёт и сразу запускает пул в глобальном `PoolManager`.
    ///
    /// Первый пул процесса ставит обработчики выхода и SIGINT.
    pub fn new(
        min_workers: usize,
        max_workers: usize,
        name: Option<&str>,
    ) -> Result<ThreadPool, PoolError> {
        let mut config = Config::new(min_workers, max_workers);
        config.name = name.map(str::to_owned);
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> Result<ThreadPool, PoolError> {
        Self::with_manager(config, PoolManager::global())
    }

    pub fn with_manager(
        config: Config,
        manager: &Arc<PoolManager>,
    ) -> Result<ThreadPool, PoolError> {
        config.validate()?;

        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| format!("pool-{id}"));

        let pool = Arc::new(ThreadPoolInner {
            id,
            name,
            config,
            queue: Arc::new(WorkQueue::new()),
            counters: Arc::new(Counters::default()),
            total_submitted: AtomicUsize::new(0),
            terminated: AtomicBool::new(false),
            state: Mutex::new(PoolState::default()),
            manager: Arc::downgrade(manager),
        });

        let started = pool.start_workers().and_then(|()| manager.register(&pool));
        if let Err(e) = started {
            pool.shutdown(ShutdownOptions::default());
            return Err(e);
        }

        info!(
            pool = %pool.name,
            min = pool.config.min_workers,
            max = pool.config.max_workers,
            "thread pool started"
        );
        Ok(pool)
    }

    fn start_workers(&self) -> Result<(), PoolError> {
        let mut state = lock(&self.state);
        for _ in 0..self.config.min_workers {
            self.spawn_worker(&mut state)?;
        }
        Ok(())
    }

    fn spawn_worker(&self, state: &mut PoolState) -> Result<(), PoolError> {
        let name = format!("{}-worker-{}", self.name, state.spawned_total);
        state.spawned_total += 1;

        let worker = WorkerHandle::spawn(
            name,
            self.queue.clone(),
            self.counters.clone(),
            self.config.stack_size,
        )?;
        debug!(pool = %self.name, thread = %worker.name(), "worker spawned");

        state.threads.push(worker);
        state.known_workers += 1;
        Ok(())
    }

    fn enqueue(&self, task: Task) -> Result<(), PoolError> {
        let mut state = lock(&self.state);
        if state.terminated {
            return Err(PoolError::Terminated {
                name: self.name.clone(),
            });
        }

        self.total_submitted.fetch_add(1, Ordering::Relaxed);
        self.queue.push_back(Job::Run(task));

        // Все заняты: добавляем воркер, пока не упёрлись в max
        if self.counters.idle.load(Ordering::Acquire) == 0
            && state.known_workers < self.config.max_workers
        {
            if let Err(e) = self.spawn_worker(&mut state) {
                warn!(pool = %self.name, error = %e, "failed to grow pool");
            }
        }
        Ok(())
    }

    /// Ставит задачу в очередь
    pub fn submit<F>(&self, f: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Box::new(f))
    }

    /// Ставит задачу в очередь вместе с аргументами
    pub fn submit_with<A, F>(&self, f: F, args: A) -> Result<(), PoolError>
    where
        A: Send + 'static,
        F: FnOnce(A) + Send + 'static,
    {
        self.submit(move || f(args))
    }

    pub fn spawn<T, F>(&self, f: F) -> Result<TaskHandle<T>, PoolError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (task, handle) = task_pair(f);
        self.enqueue(task)?;
        Ok(handle)
    }

    /// Выполняет future до конца на одном из воркеров
    pub fn spawn_future<T, Fut>(&self, fut: Fut) -> Result<TaskHandle<T>, PoolError>
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.spawn(move || futures::executor::block_on(fut))
    }

    /// Добавляет колбэк, который выполнится до остановки воркеров.
    ///
    /// Колбэки вызываются в порядке регистрации, не более одного раза.
    /// Удобно для остановки бесконечных циклов, крутящихся внутри задач.
    /// После начала shutdown (в том числе из другого колбэка) регистрация
    /// игнорируется.
    pub fn register_on_shutdown<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = lock(&self.state);
        if state.closing {
            warn!(pool = %self.name, "pool is shutting down, shutdown callback ignored");
            return;
        }
        state.callbacks.push(Box::new(f));
    }

    /// Останавливает пул.
    ///
    /// 1. Выполняет колбэки и очищает их список.
    /// 2. Помечает пул остановленным: дальше `submit` возвращает ошибку.
    /// 3. Ставит по одному стоп-сентинелу на каждый известный воркер:
    ///    в голову очереди, если `drain_pending == false` (ожидающие задачи
    ///    выбрасываются), иначе в хвост.
    /// 4. Ждёт каждый поток; при `forceful` не дольше `timeout` на поток,
    ///    после чего поток отменяется и бросается.
    /// 5. Удаляет пул из `PoolManager`.
    ///
    /// Повторный вызов безопасен и возвращается сразу. Принудительная
    /// остановка не прерывает уже начатую задачу: её побочные эффекты
    /// остаются на совести вызывающего.
    pub fn shutdown(&self, options: ShutdownOptions) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        let callbacks = {
            let mut state = lock(&self.state);
            state.closing = true;
            std::mem::take(&mut state.callbacks)
        };
        for callback in callbacks {
            report.callbacks_run += 1;
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                error!(
                    pool = %self.name,
                    "shutdown callback panicked: {}",
                    panic_message(&*payload)
                );
            }
        }

        let threads = {
            let mut state = lock(&self.state);
            report.already_terminated = state.terminated;
            state.terminated = true;
            self.terminated.store(true, Ordering::Release);

            let threads = std::mem::take(&mut state.threads);
            let placement = if options.drain_pending {
                Placement::Back
            } else {
                Placement::Front
            };
            while state.known_workers > 0 {
                self.queue.push(Job::Stop, placement);
                state.known_workers -= 1;
                report.sentinels_sent += 1;
            }
            threads
        };

        let current = thread::current().id();
        let mut skipped_self = false;

        for mut worker in threads {
            if worker.thread_id() == current {
                debug!(pool = %self.name, thread = %worker.name(), "shutdown called from own worker, not joining it");
                skipped_self = true;
                continue;
            }

            let state = if options.forceful {
                worker.join_timeout(options.timeout)
            } else {
                worker.join()
            };

            if state == WorkerState::Killed {
                warn!(
                    pool = %self.name,
                    thread = %worker.name(),
                    thread_id = ?worker.thread_id(),
                    timeout_ms = options.timeout.as_millis() as u64,
                    "failed to join with thread since the timeout was exceeded; it was killed"
                );
                report.killed.push(worker.name().to_string());
            } else {
                report.joined += 1;
            }
        }

        // Недошедшие задачи не будут запущены никогда
        if !options.drain_pending || (!report.killed.is_empty() && !skipped_self) {
            report.discarded = self.queue.discard_tasks();
        }

        if let Some(manager) = self.manager.upgrade() {
            manager.deregister(self.id);
        }

        if !report.already_terminated {
            info!(
                pool = %self.name,
                joined = report.joined,
                killed = report.killed.len(),
                discarded = report.discarded,
                "thread pool stopped"
            );
        }
        report
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Число живых потоков, включая брошенные по таймауту и ещё не вышедшие
    pub fn worker_count(&self) -> usize {
        self.counters.threads.load(Ordering::Acquire)
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            workers: self.counters.threads.load(Ordering::Relaxed),
            idle_workers: self.counters.idle.load(Ordering::Relaxed),
            queued_tasks: self.queue.len(),
            total_submitted: self.total_submitted.load(Ordering::Relaxed),
            completed_tasks: self.counters.completed.load(Ordering::Relaxed),
            failed_tasks: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}
