// This file is part of strand, a stackful fiber runtime.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
extern crate strand;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use strand::{Distributor, DistributorError};

#[test]
fn every_submitted_item_is_processed() {
    let total = Arc::new(AtomicUsize::new(0));
    {
        let total = total.clone();
        let distributor = Distributor::new(
            move |n: usize| {
                total.fetch_add(n, Ordering::SeqCst);
            },
            8,
            2,
        )
        .unwrap();
        for _ in 0..100 {
            distributor.submit(1);
        }
        // Dropping the distributor drains the queue and joins the workers.
    }
    assert_eq!(total.load(Ordering::SeqCst), 100);
}

#[test]
fn zero_concurrency_is_rejected() {
    let result = Distributor::new(|_: usize| {}, 8, 0);
    assert!(matches!(result, Err(DistributorError::ZeroConcurrency)));
}

#[test]
fn concurrency_defaults_to_available_parallelism() {
    let count = Arc::new(AtomicUsize::new(0));
    {
        let count = count.clone();
        let distributor = Distributor::with_available_parallelism(
            move |_: ()| {
                count.fetch_add(1, Ordering::SeqCst);
            },
            8,
        )
        .unwrap();
        for _ in 0..10 {
            distributor.submit(());
        }
    }
    assert_eq!(count.load(Ordering::SeqCst), 10);
}

#[test]
fn wakeups_reach_both_producers_and_workers() {
    let total = Arc::new(AtomicUsize::new(0));
    {
        // A one-slot-per-worker queue under two producers keeps both sides
        // of the shared condition variable blocking and waking constantly;
        // a wakeup swallowed by the wrong side shows up here as a hang.
        let distributor = {
            let total = total.clone();
            Arc::new(
                Distributor::new(
                    move |n: usize| {
                        total.fetch_add(n, Ordering::SeqCst);
                    },
                    1,
                    2,
                )
                .unwrap(),
            )
        };
        let producers: Vec<_> = (0..2)
            .map(|_| {
                let distributor = distributor.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        distributor.submit(1);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
    }
    assert_eq!(total.load(Ordering::SeqCst), 1000);
}

#[test]
fn submit_blocks_while_the_queue_is_at_capacity() {
    let gate = Arc::new((Mutex::new(false), Condvar::new()));
    let opened = Arc::new(AtomicBool::new(false));

    // One worker, one queue slot. The worker pins itself on the first item
    // until the gate opens, so the third submit has to block.
    let distributor = {
        let gate = gate.clone();
        Distributor::new(
            move |_: usize| {
                let (lock, signal) = &*gate;
                let mut open = lock.lock().unwrap();
                while !*open {
                    open = signal.wait(open).unwrap();
                }
            },
            1,
            1,
        )
        .unwrap()
    };

    distributor.submit(1);
    distributor.submit(2);

    let opener = {
        let gate = gate.clone();
        let opened = opened.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            opened.store(true, Ordering::SeqCst);
            let (lock, signal) = &*gate;
            *lock.lock().unwrap() = true;
            signal.notify_all();
        })
    };

    // Cannot complete until the opener has run and the worker has made
    // room in the queue.
    distributor.submit(3);
    assert!(opened.load(Ordering::SeqCst));

    drop(distributor);
    opener.join().unwrap();
}
