use rdiag::core::threadpool::TokenStatus;
use rdiag::core::ThreadPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_workers_stay_within_hard_limit() {
    let pool = ThreadPool::new(2, 4);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tokens: Vec<_> = (0..12)
        .map(|i| {
            let running = running.clone();
            let peak = peak.clone();
            pool.add_task(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(40));
                running.fetch_sub(1, Ordering::SeqCst);
                i * 2
            })
        })
        .collect();

    for _ in 0..10 {
        assert!(pool.get_total_workers_count() <= pool.hard_limit());
        thread::sleep(Duration::from_millis(15));
    }

    let mut results = Vec::new();
    for token in &tokens {
        assert_eq!(token.wait(None), TokenStatus::Finished);
        results.push(token.take_result().unwrap());
    }
    assert_eq!(results, (0..12).map(|i| i * 2).collect::<Vec<_>>());
    assert!(peak.load(Ordering::SeqCst) <= 4);
    assert!(pool.get_total_workers_count() >= pool.soft_limit());
}

#[test]
fn test_limits_are_normalised() {
    let pool = ThreadPool::new(10, 3);
    assert_eq!(pool.hard_limit(), 3);
    assert_eq!(pool.soft_limit(), 3);

    let pool = ThreadPool::new(0, 0);
    assert_eq!(pool.hard_limit(), 1);
    assert_eq!(pool.soft_limit(), 1);
}
