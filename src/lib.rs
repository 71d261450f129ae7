//! Пул потоков с координированным завершением процесса
//!
//! # Features
//! - Ограниченный набор воркеров (min..max) с FIFO очередью
//! - Колбэки перед остановкой, в порядке регистрации
//! - Shutdown с выбросом или выполнением ожидающих задач
//! - Ожидание потоков с таймаутом и принудительным отказом от зависших
//! - Перехват SIGINT и выхода процесса: все живые пулы останавливаются сами
//!
//! Создание первого пула в `PoolManager::global()` ставит глобальные
//! обработчики SIGINT и `atexit`.

pub mod errors;
pub mod handle;
pub mod model;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod signals;
pub mod worker;

pub use errors::{PoolError, TaskError, TaskResult};
pub use handle::TaskHandle;
pub use model::{PoolMetrics, ShutdownOptions, ShutdownReport};
pub use pool::{Config, ThreadPool, ThreadPoolInner};
pub use registry::{HookInstaller, OriginalHooks, PoolManager};
pub use signals::ProcessHooks;
pub use worker::current_cancellation;

/// Останавливает все пулы процесса и завершает его с кодом `code`
pub fn exit(code: i32) -> ! {
    PoolManager::global().exit(code);
    std::process::exit(code)
}
