use guarded_pool::{Config, ShutdownOptions, ThreadPoolInner};
use std::{
    hint::black_box,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use tracing_subscriber::EnvFilter;


fn main(){
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_thread_names(true)
        .init();

    let now = Instant::now();
    let cpu = ThreadPoolInner::with_config(Config::cpu_bound().with_name("cpu")).unwrap();
    let io = ThreadPoolInner::new(1, 4, Some("io")).unwrap();

    let done = Arc::new(AtomicUsize::new(0));
    for i in 0..500_000u64 {
        let done = done.clone();
        cpu.submit_with(move |n: u64| {
            black_box(n.wrapping_mul(n));
            done.fetch_add(1, Ordering::Relaxed);
        }, i).unwrap();
    }

    // Бесконечный цикл, который останавливает только колбэк
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    io.submit(move || {
        while flag.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(10));
        }
    }).unwrap();
    io.register_on_shutdown(move || running.store(false, Ordering::Release));

    let report = cpu.shutdown(ShutdownOptions::default().drain());
    println!("cpu: {} tasks, {:?}, elapsed: {:?}", done.load(Ordering::Relaxed), report, now.elapsed());

    // io остановится при координированном выходе
    guarded_pool::exit(0);
}
