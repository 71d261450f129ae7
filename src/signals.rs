//! Перехват SIGINT и нормального выхода процесса.
//!
//! Сигналы принимает отдельный поток через `signal-hook`, поэтому остановка
//! пулов (с блокирующими join) никогда не выполняется в контексте
//! обработчика сигнала. Нормальный выход ловится через `libc::atexit`.
//!
//! Это глобальный побочный эффект: его включает создание первого пула
//! в `PoolManager::global()`.

use super::{
    errors::{lock, PoolError},
    registry::{HookInstaller, OriginalHooks, PoolManager},
};
use once_cell::sync::OnceCell;
use signal_hook::{consts::SIGINT, iterator::Signals, low_level};
use std::{
    io, mem, process, ptr,
    sync::{Arc, Mutex, Weak},
    thread,
};
use tracing::{debug, error};


static AT_EXIT_REGISTERED: OnceCell<()> = OnceCell::new();
static AT_EXIT_MANAGERS: Mutex<Vec<Weak<PoolManager>>> = Mutex::new(Vec::new());

/// Что делал сигнал до установки перехватчика
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    Default,
    Ignore,
    /// Пользовательский обработчик: signal-hook вызывает его сам
    Handler,
}

pub(crate) fn current_disposition(signal: i32) -> Result<Disposition, PoolError> {
    let mut old: libc::sigaction = unsafe { mem::zeroed() };
    let rc = unsafe { libc::sigaction(signal, ptr::null(), &mut old) };
    if rc != 0 {
        return Err(PoolError::HookInstall(format!(
            "sigaction({signal}): {}",
            io::Error::last_os_error()
        )));
    }

    Ok(match old.sa_sigaction {
        libc::SIG_DFL => Disposition::Default,
        libc::SIG_IGN => Disposition::Ignore,
        _ => Disposition::Handler,
    })
}


#[derive(Debug, Clone)]
pub struct ProcessHooks {
    signals: Vec<i32>,
}

impl Default for ProcessHooks {
    fn default() -> Self {
        Self {
            signals: vec![SIGINT],
        }
    }
}

impl ProcessHooks {
    /// Перехватывать указанные сигналы вместо одного SIGINT
    pub fn with_signals(signals: &[i32]) -> Self {
        Self {
            signals: signals.to_vec(),
        }
    }
}

impl HookInstaller for ProcessHooks {
    fn install(&self, manager: Weak<PoolManager>) -> Result<OriginalHooks, PoolError> {
        // Снимаем исходное поведение до того, как signal-hook его заменит
        let previous = self
            .signals
            .iter()
            .map(|&signal| current_disposition(signal).map(|d| (signal, d)))
            .collect::<Result<Vec<_>, _>>()?;
        let previous = Arc::new(previous);

        register_at_exit(manager.clone())?;

        let mut signals = Signals::new(&self.signals)
            .map_err(|e| PoolError::HookInstall(format!("signal registration: {e}")))?;

        let fallback = previous.clone();
        thread::Builder::new()
            .name("pool-signal-listener".into())
            .spawn(move || {
                for signal in signals.forever() {
                    match manager.upgrade() {
                        Some(manager) => manager.handle_signal(signal),
                        None => chain_previous(&fallback, signal),
                    }
                }
            })
            .map_err(|e| PoolError::HookInstall(format!("signal listener: {e}")))?;

        Ok(OriginalHooks {
            exit: Arc::new(|code| {
                process::exit(code);
            }),
            signal: Arc::new(move |signal| chain_previous(&previous, signal)),
        })
    }
}

fn chain_previous(previous: &[(i32, Disposition)], signal: i32) {
    let disposition = previous
        .iter()
        .find(|(s, _)| *s == signal)
        .map_or(Disposition::Default, |(_, d)| *d);

    match disposition {
        Disposition::Default => {
            if let Err(e) = low_level::emulate_default_handler(signal) {
                error!(signal, error = %e, "failed to run default signal action");
            }
        }
        Disposition::Ignore => debug!(signal, "signal was ignored before hooks, nothing to chain"),
        Disposition::Handler => debug!(signal, "previous handler already invoked by signal-hook"),
    }
}

fn register_at_exit(manager: Weak<PoolManager>) -> Result<(), PoolError> {
    // Слот atexit один на процесс, менеджеров может быть несколько
    AT_EXIT_REGISTERED.get_or_try_init(|| {
        let rc = unsafe { libc::atexit(run_at_exit) };
        if rc != 0 {
            return Err(PoolError::HookInstall(format!("atexit returned {rc}")));
        }
        Ok(())
    })?;

    let mut managers = lock(&AT_EXIT_MANAGERS);
    managers.retain(|m| m.strong_count() > 0);
    managers.push(manager);
    Ok(())
}

extern "C" fn run_at_exit() {
    let managers = lock(&AT_EXIT_MANAGERS).clone();
    for manager in managers.iter().filter_map(Weak::upgrade) {
        manager.shutdown_all();
    }
}
