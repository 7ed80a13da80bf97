//! Worker-mode tests: many messages, few threads.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use gamelink_dispatch::Dispatcher;
use gamelink_protocol::{Envelope, FirstTestRequest, UserLoginRequest};

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn test_workers_dispatch_each_message_exactly_once() {
    const MESSAGES: usize = 5_000;
    const WORKERS: usize = 4;

    let dispatcher = Dispatcher::<usize>::new();
    let seen = Arc::new(Mutex::new(HashSet::new()));
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let seen = Arc::clone(&seen);
        let calls = Arc::clone(&calls);
        dispatcher.subscribe::<FirstTestRequest, _>(move |sender, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            seen.lock().unwrap().insert(*sender);
            Ok(())
        });
    }

    assert_eq!(dispatcher.start(WORKERS).unwrap(), WORKERS);
    for i in 0..MESSAGES {
        dispatcher.publish(
            i,
            Envelope::from(FirstTestRequest {
                helloworld: format!("msg {i}"),
            }),
        );
    }

    assert!(wait_until(Duration::from_secs(10), || {
        calls.load(Ordering::SeqCst) >= MESSAGES
    }));
    dispatcher.stop();

    assert_eq!(calls.load(Ordering::SeqCst), MESSAGES);
    assert_eq!(seen.lock().unwrap().len(), MESSAGES);
    assert_eq!(dispatcher.stats().dispatched, MESSAGES as u64);
}

#[test]
fn test_workers_survive_failing_and_panicking_handlers() {
    let dispatcher = Dispatcher::<u32>::new();
    let ok = Arc::new(AtomicUsize::new(0));
    dispatcher.subscribe::<UserLoginRequest, _>(|_, req| {
        if req.user == "panic" {
            panic!("handler blew up");
        }
        Err("always fails".into())
    });
    {
        let ok = Arc::clone(&ok);
        dispatcher.subscribe::<UserLoginRequest, _>(move |_, _| {
            ok.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    dispatcher.start(2).unwrap();
    for user in ["a", "panic", "b", "panic", "c"] {
        dispatcher.publish(
            0,
            Envelope::from(UserLoginRequest {
                user: user.into(),
                password: String::new(),
            }),
        );
    }

    assert!(wait_until(Duration::from_secs(5), || {
        ok.load(Ordering::SeqCst) == 5
    }));
    assert_eq!(dispatcher.active_workers(), 2);
    dispatcher.stop();
    assert_eq!(dispatcher.stats().handler_failures, 5);
}

#[test]
fn test_stop_discards_queued_items_and_joins_workers() {
    let dispatcher = Dispatcher::<u32>::new();
    let gate = Arc::new(Mutex::new(()));
    let started = Arc::new(AtomicUsize::new(0));
    {
        let gate = Arc::clone(&gate);
        let started = Arc::clone(&started);
        dispatcher.subscribe::<FirstTestRequest, _>(move |_, _| {
            started.fetch_add(1, Ordering::SeqCst);
            let _held = gate.lock().unwrap();
            Ok(())
        });
    }

    // Hold the gate so the single worker blocks on its first item.
    let held = gate.lock().unwrap();
    dispatcher.start(1).unwrap();
    for _ in 0..10 {
        dispatcher.publish(
            0,
            Envelope::from(FirstTestRequest {
                helloworld: String::new(),
            }),
        );
    }
    assert!(wait_until(Duration::from_secs(5), || {
        started.load(Ordering::SeqCst) == 1
    }));
    assert_eq!(dispatcher.queue_len(), 9);

    let dispatcher = Arc::new(dispatcher);
    let stopper = {
        let dispatcher = Arc::clone(&dispatcher);
        std::thread::spawn(move || dispatcher.stop())
    };
    assert!(wait_until(Duration::from_secs(5), || dispatcher.queue_len() == 0));
    drop(held);
    stopper.join().unwrap();

    assert_eq!(dispatcher.active_workers(), 0);
    assert_eq!(started.load(Ordering::SeqCst), 1);
}
