#![allow(dead_code)]

use guarded_pool::{HookInstaller, OriginalHooks, PoolError, PoolManager};
use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, Weak,
    },
};
use tracing::{
    field::{Field, Visit},
    Event, Level, Subscriber,
};
use tracing_subscriber::layer::{Context, Layer};


/// Записывает вызовы исходных обработчиков вместо выхода из процесса
#[derive(Clone, Default)]
pub struct RecordingHooks {
    pub installs: Arc<AtomicUsize>,
    pub exits: Arc<Mutex<Vec<i32>>>,
    pub signals: Arc<Mutex<Vec<i32>>>,
}

impl HookInstaller for RecordingHooks {
    fn install(&self, _manager: Weak<PoolManager>) -> Result<OriginalHooks, PoolError> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        let exits = self.exits.clone();
        let signals = self.signals.clone();
        Ok(OriginalHooks {
            exit: Arc::new(move |code| exits.lock().unwrap().push(code)),
            signal: Arc::new(move |signal| signals.lock().unwrap().push(signal)),
        })
    }
}

pub struct FailingHooks;

impl HookInstaller for FailingHooks {
    fn install(&self, _manager: Weak<PoolManager>) -> Result<OriginalHooks, PoolError> {
        Err(PoolError::HookInstall("refused".into()))
    }
}

pub fn test_manager() -> (Arc<PoolManager>, RecordingHooks) {
    let hooks = RecordingHooks::default();
    (PoolManager::new(hooks.clone()), hooks)
}


#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub level: Level,
    pub fields: BTreeMap<String, String>,
}

impl RecordedEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

struct FieldMap<'a>(&'a mut BTreeMap<String, String>);

impl Visit for FieldMap<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}

/// Слой tracing, который складывает события в память
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl EventRecorder {
    pub fn at_level(&self, level: Level) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.level == level)
            .cloned()
            .collect()
    }
}

impl<S: Subscriber> Layer<S> for EventRecorder {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = BTreeMap::new();
        event.record(&mut FieldMap(&mut fields));
        self.events.lock().unwrap().push(RecordedEvent {
            level: *event.metadata().level(),
            fields,
        });
    }
}
