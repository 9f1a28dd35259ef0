#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use taskqueue::{Config, TaskQueue, TaskStatus};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    fn measure<T>(name: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        println!("✓ {}: {:?}", name, start.elapsed());
        result
    }

    /// Relay invocations trail registry removal by a moment; poll for them.
    fn eventually(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn load_test_1_many_small_tasks() {
        println!("\n=== LOAD TEST 1: 2k small tasks across 8 workers ===");
        init_tracing();

        let completions = Arc::new(AtomicUsize::new(0));
        let queue = {
            let completions = completions.clone();
            TaskQueue::builder()
                .max_workers(8)
                .on_completion(move |_| {
                    completions.fetch_add(1, Ordering::SeqCst);
                })
                .build()
        };

        let sum = Arc::new(AtomicUsize::new(0));
        measure("2k submissions", || {
            for i in 0..2_000usize {
                let sum = sum.clone();
                queue.submit_with(
                    move || i * 2,
                    move |v: usize| {
                        sum.fetch_add(v, Ordering::SeqCst);
                    },
                );
            }
        });

        assert!(queue.wait_idle_timeout(Duration::from_secs(30)));
        assert!(eventually(|| completions.load(Ordering::SeqCst) == 2_000));
        let expected: usize = (0..2_000usize).map(|i| i * 2).sum();
        assert_eq!(sum.load(Ordering::SeqCst), expected);
        println!("  delivered sum: {}", expected);
    }

    #[test]
    fn load_test_2_mixed_panics() {
        println!("\n=== LOAD TEST 2: 500 tasks, every 10th panics ===");
        init_tracing();
        let prev_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));

        let failed = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        let queue = {
            let failed = failed.clone();
            let done = done.clone();
            TaskQueue::builder()
                .config(Config::cpu_bound())
                .on_completion(move |task| match task.status() {
                    TaskStatus::Failed => {
                        failed.fetch_add(1, Ordering::SeqCst);
                    }
                    _ => {
                        done.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .build()
        };

        for i in 0..500usize {
            queue.submit(move || -> usize {
                if i % 10 == 0 {
                    panic!("scripted failure");
                }
                i
            });
        }

        assert!(queue.wait_idle_timeout(Duration::from_secs(30)));
        assert!(eventually(
            || failed.load(Ordering::SeqCst) + done.load(Ordering::SeqCst) == 500
        ));
        assert_eq!(failed.load(Ordering::SeqCst), 50);
        assert_eq!(done.load(Ordering::SeqCst), 450);
        println!(
            "  failed: {}, succeeded: {}",
            failed.load(Ordering::SeqCst),
            done.load(Ordering::SeqCst)
        );

        std::panic::set_hook(prev_hook);
    }

    #[test]
    fn load_test_3_submit_cancel_storm() {
        println!("\n=== LOAD TEST 3: concurrent submit + cancel_all storm ===");
        init_tracing();

        let statuses = Arc::new(Mutex::new(Vec::new()));
        let queue = {
            let statuses = statuses.clone();
            Arc::new(
                TaskQueue::builder()
                    .max_workers(4)
                    .on_completion(move |task| {
                        statuses.lock().unwrap().push(task.status());
                    })
                    .build(),
            )
        };

        let submitters: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        queue.submit(|| thread::sleep(Duration::from_millis(1)));
                    }
                })
            })
            .collect();

        for _ in 0..20 {
            queue.cancel_all();
            thread::sleep(Duration::from_millis(2));
        }
        for handle in submitters {
            handle.join().unwrap();
        }

        assert!(queue.wait_idle_timeout(Duration::from_secs(30)));
        assert_eq!(queue.in_flight(), 0);

        assert!(
            eventually(|| statuses.lock().unwrap().len() == 400),
            "relay fired once per task"
        );
        let statuses = statuses.lock().unwrap();
        assert!(
            statuses.iter().all(|s| s.is_terminal()),
            "every relayed task was terminal"
        );
        let cancelled = statuses.iter().filter(|s| **s == TaskStatus::Cancelled).count();
        println!("  cancelled {} of {} tasks", cancelled, statuses.len());
    }

    #[test]
    fn load_test_4_shutdown_drains_queued_work() {
        println!("\n=== LOAD TEST 4: shutdown waits for queued tasks ===");
        init_tracing();

        let completions = Arc::new(AtomicUsize::new(0));
        let queue = {
            let completions = completions.clone();
            TaskQueue::builder()
                .max_workers(1)
                .on_completion(move |_| {
                    completions.fetch_add(1, Ordering::SeqCst);
                })
                .build()
        };

        let tasks: Vec<_> = (0..10)
            .map(|i| {
                queue.submit(move || {
                    thread::sleep(Duration::from_millis(5));
                    i
                })
            })
            .collect();

        measure("shutdown with 10 queued tasks", || queue.shutdown());

        assert_eq!(completions.load(Ordering::SeqCst), 10);
        for task in &tasks {
            assert_eq!(task.status(), TaskStatus::ExecutionDone);
        }
        println!("  all queued work ran to completion before join");
    }
}
