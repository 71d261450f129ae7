use crossbeam::{
    channel::{self, Receiver, Select, Sender},
    sync::ShardedLock,
};
use std::{fmt, sync::PoisonError};


pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Элемент очереди: задача или стоп-сентинел для одного воркера
pub enum Job {
    Run(Task),
    Stop,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Run(_) => f.write_str("Job::Run"),
            Job::Stop => f.write_str("Job::Stop"),
        }
    }
}

/// Куда ставить элемент в очереди
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Front,
    Back,
}

/// FIFO очередь воркеров с явными `push_front` / `push_back`.
///
/// Внутри две crossbeam-линии: приоритетная и обычная. Воркер всегда
/// сначала вычерпывает приоритетную, поэтому элемент, поставленный через
/// `push_front`, забирается раньше любой уже ожидающей задачи.
///
/// Проверка обеих линий в `try_pop` идёт под `gate` на чтение, а
/// `push_front` берёт его на запись: извлечение либо целиком завершается
/// до постановки в голову, либо видит поставленный элемент.
pub struct WorkQueue {
    front: (Sender<Job>, Receiver<Job>),
    back: (Sender<Job>, Receiver<Job>),
    gate: ShardedLock<()>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("front", &self.front.1.len())
            .field("back", &self.back.1.len())
            .finish()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            front: channel::unbounded(),
            back: channel::unbounded(),
            gate: ShardedLock::new(()),
        }
    }

    #[inline]
    pub fn push(&self, job: Job, placement: Placement) {
        // Receiver живёт в самой очереди, send не может провалиться
        match placement {
            Placement::Front => {
                let _gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);
                let _ = self.front.0.send(job);
            }
            Placement::Back => {
                let _ = self.back.0.send(job);
            }
        }
    }

    #[inline]
    pub fn push_back(&self, job: Job) {
        self.push(job, Placement::Back);
    }

    #[inline]
    pub fn push_front(&self, job: Job) {
        self.push(job, Placement::Front);
    }

    pub fn try_pop(&self) -> Option<Job> {
        let _gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        self.front
            .1
            .try_recv()
            .or_else(|_| self.back.1.try_recv())
            .ok()
    }

    /// Блокирующее извлечение. Приоритетная линия проверяется первой
    /// после каждого пробуждения.
    pub fn pop(&self) -> Job {
        loop {
            if let Some(job) = self.try_pop() {
                return job;
            }

            let mut sel = Select::new();
            sel.recv(&self.front.1);
            sel.recv(&self.back.1);
            sel.ready();
        }
    }

    /// Выбрасывает все ожидающие задачи, сентинелы остаются в голове очереди.
    /// Возвращает число выброшенных задач.
    pub fn discard_tasks(&self) -> usize {
        let mut discarded = 0;
        let mut sentinels = 0;
        while let Some(job) = self.try_pop() {
            match job {
                Job::Run(_) => discarded += 1,
                Job::Stop => sentinels += 1,
            }
        }
        for _ in 0..sentinels {
            self.push_front(Job::Stop);
        }
        discarded
    }

    pub fn len(&self) -> usize {
        self.front.1.len() + self.back.1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.front.1.is_empty() && self.back.1.is_empty()
    }
}
