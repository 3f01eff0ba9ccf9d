use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lockfree_ipc_queue::{LockFreeQueueOps, MpmcLockFreeQueue, MpmcResizeableLockFreeQueue, SpscFifo};
use std::sync::Arc;
use std::thread;

// Queue capacity for benchmarks
const CAPACITY: usize = 1024;
// Number of ping-pong operations per benchmark
const PING_PONGS: usize = 100_000;

fn pop_spinning<Q: LockFreeQueueOps<u32>>(queue: &Q) -> u32 {
    loop {
        if let Some(value) = queue.pop() {
            return value;
        }
        std::hint::spin_loop();
    }
}

fn push_spinning<Q: LockFreeQueueOps<u32>>(queue: &Q, mut value: u32) {
    while let Err(rejected) = queue.try_push(value) {
        value = rejected;
        std::hint::spin_loop();
    }
}

/// Bounces one value back and forth between two threads through two queues
fn ping_pong<Q>(make_queue: fn() -> Q)
where
    Q: LockFreeQueueOps<u32> + Send + Sync + 'static,
{
    let q1 = Arc::new(make_queue());
    let q2 = Arc::new(make_queue());

    // Ping thread
    let q1_ping = q1.clone();
    let q2_ping = q2.clone();
    let ping_thread = thread::spawn(move || {
        for i in 0..PING_PONGS {
            push_spinning(&*q1_ping, black_box(i as u32));
            black_box(pop_spinning(&*q2_ping));
        }
    });

    // Pong thread
    let pong_thread = thread::spawn(move || {
        for _ in 0..PING_PONGS {
            let value = pop_spinning(&*q1);
            push_spinning(&*q2, black_box(value));
        }
    });

    ping_thread.join().unwrap();
    pong_thread.join().unwrap();
}

fn bench_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("latency");
    group.sample_size(10);

    if num_cpus::get() < 2 {
        return;
    }

    group.bench_function(BenchmarkId::new("MpmcLockFreeQueue", "ping-pong"), |b| {
        b.iter(|| ping_pong(MpmcLockFreeQueue::<u32, CAPACITY>::new))
    });

    group.bench_function(BenchmarkId::new("MpmcResizeableLockFreeQueue", "ping-pong"), |b| {
        b.iter(|| ping_pong(MpmcResizeableLockFreeQueue::<u32, CAPACITY>::new))
    });

    group.bench_function(BenchmarkId::new("SpscFifo", "ping-pong"), |b| {
        b.iter(|| {
            let mut ping = Box::new(SpscFifo::<u32, CAPACITY>::new());
            let mut pong = Box::new(SpscFifo::<u32, CAPACITY>::new());
            let (mut ping_tx, mut ping_rx) = ping.split();
            let (mut pong_tx, mut pong_rx) = pong.split();

            thread::scope(|s| {
                s.spawn(move || {
                    for i in 0..PING_PONGS {
                        let mut value = black_box(i as u32);
                        while let Err(rejected) = ping_tx.push(value) {
                            value = rejected;
                            std::hint::spin_loop();
                        }
                        while pong_rx.pop().is_none() {
                            std::hint::spin_loop();
                        }
                    }
                });
                s.spawn(move || {
                    for _ in 0..PING_PONGS {
                        let value = loop {
                            if let Some(value) = ping_rx.pop() {
                                break value;
                            }
                            std::hint::spin_loop();
                        };
                        let mut value = black_box(value);
                        while let Err(rejected) = pong_tx.push(value) {
                            value = rejected;
                            std::hint::spin_loop();
                        }
                    }
                });
            });
        })
    });

    group.finish();
}

criterion_group!(benches, bench_latency);
criterion_main!(benches);
