// This file is part of strand, a stackful fiber runtime.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
extern crate strand;
use std::cell::Cell;
use std::rc::Rc;

use strand::{Condition, Exec, Fiber, Status};

#[test]
fn wait_parks_until_signalled() {
    let main = Exec::main();
    let condition = Rc::new(Condition::new());
    let fiber = {
        let condition = condition.clone();
        Fiber::new(move |exec| condition.wait(exec)).unwrap()
    };

    assert_eq!(condition.count(), 0);
    assert!(fiber.resume(&main).is_suspended());
    assert_eq!(condition.count(), 1);

    condition.signal(&main);
    assert_eq!(condition.count(), 0);
    assert_eq!(fiber.status(), Status::Finished);
}

#[test]
fn signal_wakes_every_waiter() {
    let main = Exec::main();
    let condition = Rc::new(Condition::new());
    let woken = Rc::new(Cell::new(0u32));

    let fibers: Vec<Fiber> = (0..5)
        .map(|_| {
            let condition = condition.clone();
            let woken = woken.clone();
            Fiber::new(move |exec| {
                condition.wait(exec);
                woken.set(woken.get() + 1);
            })
            .unwrap()
        })
        .collect();
    for fiber in &fibers {
        assert!(fiber.resume(&main).is_suspended());
    }
    assert_eq!(condition.count(), 5);
    assert_eq!(woken.get(), 0);

    condition.signal(&main);
    assert_eq!(condition.count(), 0);
    assert_eq!(woken.get(), 5);
    for fiber in &fibers {
        assert_eq!(fiber.status(), Status::Finished);
    }
}

#[test]
fn stale_waiters_are_skipped() {
    let main = Exec::main();
    let condition = Rc::new(Condition::new());
    let woken = Rc::new(Cell::new(0u32));

    let make_waiter = || {
        let condition = condition.clone();
        let woken = woken.clone();
        Fiber::new(move |exec| {
            condition.wait(exec);
            woken.set(woken.get() + 1);
        })
        .unwrap()
    };
    let stopped = make_waiter();
    let live = make_waiter();
    assert!(stopped.resume(&main).is_suspended());
    assert!(live.resume(&main).is_suspended());
    assert_eq!(condition.count(), 2);

    // Stopping a parked waiter finishes it but leaves its queue entry
    // behind; the signal steps over it.
    stopped.stop(&main);
    assert_eq!(stopped.status(), Status::Finished);
    assert_eq!(condition.count(), 2);

    condition.signal(&main);
    assert_eq!(condition.count(), 0);
    assert_eq!(woken.get(), 1);
    assert_eq!(live.status(), Status::Finished);
}

#[test]
fn dropping_a_condition_stops_its_waiters() {
    let main = Exec::main();
    let condition = Box::new(Condition::new());
    let condition_ptr: *const Condition = &*condition;

    let unwound = Rc::new(Cell::new(false));
    let continued = Rc::new(Cell::new(false));
    let fiber = {
        let unwound = unwound.clone();
        let continued = continued.clone();
        Fiber::new(move |exec| {
            struct SetOnDrop(Rc<Cell<bool>>);
            impl Drop for SetOnDrop {
                fn drop(&mut self) {
                    self.0.set(true);
                }
            }
            let _guard = SetOnDrop(unwound);
            // The condition outlives the park: its destructor is what
            // resumes this fiber, and the unwind never touches it again.
            unsafe { &*condition_ptr }.wait(exec);
            continued.set(true);
        })
        .unwrap()
    };

    assert!(fiber.resume(&main).is_suspended());
    drop(condition);

    assert_eq!(fiber.status(), Status::Finished);
    assert!(unwound.get());
    assert!(!continued.get());
}
