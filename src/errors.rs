use std::{
    any::Any,
    io,
    sync::{Mutex, MutexGuard, PoisonError},
};
use thiserror::Error;

/// Ошибки жизненного цикла пула
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid worker bounds: min={min}, max={max} (need 0 < min <= max)")]
    Configuration { min: usize, max: usize },
    #[error("pool '{name}' is terminated")]
    Terminated { name: String },
    #[error("failed to spawn worker thread: {0}")]
    SpawnThread(#[from] io::Error),
    #[error("failed to install process hooks: {0}")]
    HookInstall(String),
}

/// Ошибки отдельной задачи, видимые через `TaskHandle`
#[derive(Debug, PartialEq, Eq, Clone, Error)]
pub enum TaskError {
    #[error("task panicked: {0}")]
    Panic(String),
    #[error("task was cancelled before it started")]
    Cancelled,
    #[error("task was discarded by pool shutdown")]
    Discarded,
}

pub type TaskResult<T> = Result<T, TaskError>;


/// Текст паники из payload `catch_unwind`
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Shutdown обязан доходить до конца и после паники в колбэке,
/// поэтому отравленный мьютекс просто забираем.
#[inline]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
