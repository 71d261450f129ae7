use std::time::Duration;


pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Параметры `shutdown`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownOptions {
    /// Выполнить всё, что уже стоит в очереди, прежде чем остановить воркеры
    pub drain_pending: bool,
    /// Ждать каждый поток не дольше `timeout`, затем бросить его
    pub forceful: bool,
    pub timeout: Duration,
}

impl Default for ShutdownOptions {
    fn default() -> Self {
        Self {
            drain_pending: false,
            forceful: false,
            timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }
}

impl ShutdownOptions {
    pub fn drain(mut self) -> Self {
        self.drain_pending = true;
        self
    }

    pub fn forceful(mut self, timeout: Duration) -> Self {
        self.forceful = true;
        self.timeout = timeout;
        self
    }
}


/// Итог одного вызова `shutdown`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub callbacks_run: usize,
    pub sentinels_sent: usize,
    pub joined: usize,
    /// Имена потоков, не уложившихся в таймаут
    pub killed: Vec<String>,
    /// Задачи, выброшенные из очереди без запуска
    pub discarded: usize,
    /// Пул уже был остановлен до этого вызова
    pub already_terminated: bool,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.killed.is_empty()
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Exited,
    Killed,
}


#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub workers: usize,
    pub idle_workers: usize,
    pub queued_tasks: usize,
    pub total_submitted: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
}

impl PoolMetrics {
    pub fn utilization(&self) -> f64 {
        if self.workers == 0 {
            return 0.0;
        }
        let busy = self.workers.saturating_sub(self.idle_workers);
        busy as f64 / self.workers as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.completed_tasks + self.failed_tasks;
        if total == 0 {
            return 1.0;
        }
        self.completed_tasks as f64 / total as f64
    }
}
