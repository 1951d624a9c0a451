// This file is part of strand, a stackful fiber runtime.
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
extern crate strand;
use std::cell::RefCell;
use std::rc::Rc;

use strand::{Exec, Fiber};

// Contract violations on the switching operations. Violations raised from
// inside a fiber come back as captured faults, so each test re-raises them
// with `propagate` to surface the assertion message.

// A late-bound self-reference: the fiber's callable needs a handle to the
// `Fiber` that owns it, which does not exist yet when the callable is built.
type Slot = Rc<RefCell<Option<Rc<Fiber>>>>;

#[test]
#[should_panic(expected = "cannot resume a finished fiber")]
fn resuming_a_finished_fiber_is_fatal() {
    let main = Exec::main();
    let fiber = Fiber::new(|_| {}).unwrap();
    assert!(fiber.resume(&main).is_finished());
    let _ = fiber.resume(&main);
}

#[test]
#[should_panic(expected = "cannot resume itself")]
fn self_resume_is_fatal() {
    let main = Exec::main();
    let slot: Slot = Rc::new(RefCell::new(None));
    let fiber = {
        let slot = slot.clone();
        Rc::new(
            Fiber::new(move |exec| {
                let me = slot.borrow().clone().unwrap();
                let _ = me.resume(exec);
            })
            .unwrap(),
        )
    };
    *slot.borrow_mut() = Some(fiber.clone());

    let _ = fiber.resume(&main).propagate();
}

#[test]
#[should_panic(expected = "already has a resume outstanding")]
fn resuming_a_fiber_mid_resume_is_fatal() {
    let main = Exec::main();
    let slot: Slot = Rc::new(RefCell::new(None));
    let outer = {
        let slot = slot.clone();
        Rc::new(
            Fiber::new(move |exec| {
                // The outer fiber's caller link is still set for the whole
                // inner run; resuming it again from in there must trip.
                let me = slot.borrow().clone().unwrap();
                let inner = Fiber::new(move |inner_exec| {
                    let _ = me.resume(inner_exec);
                })
                .unwrap();
                let _ = inner.resume(exec).propagate();
            })
            .unwrap(),
        )
    };
    *slot.borrow_mut() = Some(outer.clone());

    let _ = outer.resume(&main).propagate();
}

#[test]
#[should_panic(expected = "cannot stop itself")]
fn self_stop_is_fatal() {
    let main = Exec::main();
    let slot: Slot = Rc::new(RefCell::new(None));
    let fiber = {
        let slot = slot.clone();
        Rc::new(
            Fiber::new(move |exec| {
                let me = slot.borrow().clone().unwrap();
                me.stop(exec);
            })
            .unwrap(),
        )
    };
    *slot.borrow_mut() = Some(fiber.clone());

    let _ = fiber.resume(&main).propagate();
}

#[test]
#[should_panic(expected = "cannot wait on itself")]
fn waiting_on_self_is_fatal() {
    let main = Exec::main();
    let slot: Slot = Rc::new(RefCell::new(None));
    let fiber = {
        let slot = slot.clone();
        Rc::new(
            Fiber::new(move |exec| {
                let me = slot.borrow().clone().unwrap();
                me.wait(exec);
            })
            .unwrap(),
        )
    };
    *slot.borrow_mut() = Some(fiber.clone());

    let _ = fiber.resume(&main).propagate();
}

#[test]
#[should_panic(expected = "no caller")]
fn yielding_from_the_main_context_is_fatal() {
    Exec::main().yield_now();
}
