//! Реестр живых пулов и координированное завершение процесса.
//!
//! `PoolManager` хранит пулы в порядке создания и исходное поведение
//! процесса на выход и прерывание. Первый зарегистрированный пул ставит
//! перехватчики через `HookInstaller`; снимаются они никогда, только
//! передают управление сохранённым исходным обработчикам.

use super::{
    errors::{lock, panic_message, PoolError},
    model::ShutdownOptions,
    pool::ThreadPool,
    signals::ProcessHooks,
};
use once_cell::sync::Lazy;
use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Weak,
    },
};
use tracing::{debug, error, info};


pub type ExitFn = Arc<dyn Fn(i32) + Send + Sync>;
pub type SignalFn = Arc<dyn Fn(i32) + Send + Sync>;

/// Поведение процесса, действовавшее до установки перехватчиков
#[derive(Clone)]
pub struct OriginalHooks {
    pub exit: ExitFn,
    pub signal: SignalFn,
}

impl fmt::Debug for OriginalHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OriginalHooks").finish_non_exhaustive()
    }
}

/// Ставит перехватчики выхода и прерывания, которые ведут в `manager`,
/// и возвращает то, что было до них.
pub trait HookInstaller: Send + Sync {
    fn install(&self, manager: Weak<PoolManager>) -> Result<OriginalHooks, PoolError>;
}


static GLOBAL: Lazy<Arc<PoolManager>> = Lazy::new(|| PoolManager::new(ProcessHooks::default()));

pub struct PoolManager {
    pools: Mutex<Vec<ThreadPool>>,
    originals: Mutex<Option<OriginalHooks>>,
    installer: Box<dyn HookInstaller>,
    exit_intercepted: AtomicBool,
    teardown: Mutex<ShutdownOptions>,
    self_ref: Weak<PoolManager>,
}

impl fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolManager")
            .field("pools", &self.len())
            .field("hooks_installed", &self.hooks_installed())
            .finish()
    }
}

impl PoolManager {
    pub fn new(installer: impl HookInstaller + 'static) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            pools: Mutex::new(Vec::new()),
            originals: Mutex::new(None),
            installer: Box::new(installer),
            exit_intercepted: AtomicBool::new(false),
            teardown: Mutex::new(ShutdownOptions::default()),
            self_ref: self_ref.clone(),
        })
    }

    /// Менеджер процесса: SIGINT и `atexit`
    pub fn global() -> &'static Arc<PoolManager> {
        &GLOBAL
    }

    pub(crate) fn register(&self, pool: &ThreadPool) -> Result<(), PoolError> {
        let mut pools = lock(&self.pools);
        if pools.is_empty() {
            self.install_hooks_once()?;
        }
        pools.push(pool.clone());
        debug!(pool = %pool.name(), live = pools.len(), "pool registered");
        Ok(())
    }

    fn install_hooks_once(&self) -> Result<(), PoolError> {
        let mut originals = lock(&self.originals);
        if originals.is_some() {
            return Ok(());
        }

        let hooks = self.installer.install(self.self_ref.clone())?;
        *originals = Some(hooks);
        self.exit_intercepted.store(true, Ordering::SeqCst);
        debug!("exit and interrupt hooks installed");
        Ok(())
    }

    pub(crate) fn deregister(&self, pool_id: u64) {
        lock(&self.pools).retain(|pool| pool.id() != pool_id);
    }

    pub fn hooks_installed(&self) -> bool {
        lock(&self.originals).is_some()
    }

    /// Снимок живых пулов в порядке создания
    pub fn pools(&self) -> Vec<ThreadPool> {
        lock(&self.pools).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.pools).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.pools).is_empty()
    }

    pub fn teardown_options(&self) -> ShutdownOptions {
        *lock(&self.teardown)
    }

    /// Параметры, с которыми пулы останавливаются при выходе и прерывании
    pub fn set_teardown_options(&self, options: ShutdownOptions) {
        *lock(&self.teardown) = options;
    }

    /// Останавливает все пулы снимка по порядку. Паника при остановке
    /// одного пула не мешает остальным. Возвращает размер снимка.
    pub fn shutdown_all(&self) -> usize {
        let snapshot = self.pools();
        let options = self.teardown_options();

        for pool in &snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| pool.shutdown(options)));
            if let Err(payload) = outcome {
                error!(
                    pool = %pool.name(),
                    "pool shutdown panicked: {}",
                    panic_message(&*payload)
                );
                self.deregister(pool.id());
            }
        }
        snapshot.len()
    }

    /// Останавливает пулы и передаёт `code` исходной функции выхода.
    ///
    /// Перехват срабатывает один раз: последующие вызовы идут сразу
    /// в исходную функцию.
    pub fn exit(&self, code: i32) {
        if self.exit_intercepted.swap(false, Ordering::SeqCst) {
            info!(code, "exit requested, shutting down pools");
            self.shutdown_all();
        }

        let original = lock(&self.originals).as_ref().map(|hooks| hooks.exit.clone());
        match original {
            Some(exit) => exit(code),
            None => std::process::exit(code),
        }
    }

    /// Останавливает пулы, затем вызывает исходный обработчик сигнала
    pub fn handle_signal(&self, signal: i32) {
        info!(signal, "interrupt received, shutting down pools");
        self.shutdown_all();

        let original = lock(&self.originals).as_ref().map(|hooks| hooks.signal.clone());
        if let Some(handler) = original {
            handler(signal);
        }
    }
}
