use lockfree_ipc_queue::{init_tracing, MpmcLockFreeQueue, MpmcResizeableLockFreeQueue, SpscSofi};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

fn main() {
    init_tracing();

    println!("Lock-free IPC queue example");
    println!("---------------------------\n");

    // Configuration
    const PRODUCERS: usize = 2; // Number of producer threads
    const CONSUMERS: usize = 2; // Number of consumer threads
    const N: u32 = 1_000_000; // Each producer pushes this many elements into the queue
    const CAPACITY: usize = 1024; // Queue capacity

    // Create a queue object shared between all producers and consumers
    let queue = Arc::new(MpmcLockFreeQueue::<u32, CAPACITY>::new());

    println!("Starting {} producers and {} consumers", PRODUCERS, CONSUMERS);
    println!("Each producer will push {} elements", N);
    println!("Queue capacity: {}\n", CAPACITY);

    let start_time = Instant::now();

    // Start the consumers; each stops at the first 0 (termination signal)
    let consumer_threads: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let q = queue.clone();
            thread::spawn(move || {
                let mut local_sum = 0u64;
                loop {
                    match q.pop() {
                        Some(0) => break,
                        Some(n) => local_sum += n as u64,
                        None => std::hint::spin_loop(),
                    }
                }
                local_sum
            })
        })
        .collect();

    // Start the producers; try_push never overwrites, so retry while full
    let producer_threads: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let q = queue.clone();
            thread::spawn(move || {
                for n in (1..=N).rev() {
                    let mut value = n;
                    while let Err(rejected) = q.try_push(value) {
                        value = rejected;
                        std::hint::spin_loop();
                    }
                }
            })
        })
        .collect();

    for handle in producer_threads {
        handle.join().unwrap();
    }

    // Tell consumers to terminate by pushing one 0 for each consumer
    for _ in 0..CONSUMERS {
        while queue.try_push(0).is_err() {
            std::hint::spin_loop();
        }
    }

    let sums: Vec<u64> = consumer_threads.into_iter().map(|h| h.join().unwrap()).collect();
    let total_sum: u64 = sums.iter().sum();

    // The expected sum is N*(N+1)/2 * PRODUCERS
    let expected_sum: u64 = (N as u64 * (N as u64 + 1) / 2) * PRODUCERS as u64;

    println!("Execution time: {:?}", start_time.elapsed());
    println!("Total sum: {}", total_sum);
    println!("Expected sum: {}", expected_sum);

    if total_sum != expected_sum {
        println!("ERROR: Sum mismatch! Difference: {}", total_sum as i64 - expected_sum as i64);
    } else {
        println!("SUCCESS: All elements were correctly processed.");
    }

    for (i, &sum) in sums.iter().enumerate() {
        println!("Consumer {}: sum = {}", i, sum);
    }

    // Overflowing push hands back the oldest element
    println!("\nEvicting push:");
    let history = MpmcLockFreeQueue::<&str, 2>::new();
    for event in ["boot", "connect", "ready"] {
        if let Some(evicted) = history.push(event) {
            println!("  pushed {:?}, evicted {:?}", event, evicted);
        }
    }

    // Shrinking a resizeable queue evicts its oldest elements
    println!("\nResizing:");
    let resizeable = MpmcResizeableLockFreeQueue::<u32, 10>::new();
    for i in 0..10 {
        let _ = resizeable.try_push(i);
    }
    let mut evicted = Vec::new();
    match resizeable.set_capacity_with(3, |value| evicted.push(value)) {
        Ok(()) => println!("  capacity 10 -> 3, evicted {:?}", evicted),
        Err(err) => println!("  resize failed: {}", err),
    }

    // The sofi keeps the newest samples when the reader falls behind
    println!("\nSafely overflowing SPSC:");
    let mut sofi = SpscSofi::<u32, 3>::new();
    let (mut producer, mut consumer) = sofi.split();
    for sample in 0..5 {
        if let Some(lost) = producer.push(sample) {
            println!("  sample {} dropped to make room for {}", lost, sample);
        }
    }
    let remaining: Vec<u32> = std::iter::from_fn(|| consumer.pop()).collect();
    println!("  reader sees {:?}", remaining);
}
