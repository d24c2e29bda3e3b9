//! End-to-end scenarios combining several primitives together, the way an
//! application actually would rather than unit-testing one piece at a
//! time.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use serial_test::serial;
use turnloop::{every, Deferred, Once, Pipe, SchedulerContext, Task};

#[test]
#[serial]
fn once_only_prints_on_first_access_even_with_two_readers() {
    let ctx = SchedulerContext::create().unwrap();
    let printed = Rc::new(RefCell::new(Vec::new()));
    let p2 = Rc::clone(&printed);

    let once = Once::new(move || {
        p2.borrow_mut().push("Fn called");
        Deferred::ready("computed".to_string())
    });

    let first = once.clone();
    let second = once.clone();
    let t1 = Task::spawn(async move { first.value().await });
    let t2 = Task::spawn(async move { second.value().await });

    ctx.scheduler().wait_until(|| t1.is_done() && t2.is_done()).unwrap();

    assert_eq!(t1.value(), "computed");
    assert_eq!(t2.value(), "computed");
    assert_eq!(*printed.borrow(), vec!["Fn called"]);
}

#[test]
#[serial]
fn pipe_map_and_bind_compose_across_a_stream() {
    let ctx = SchedulerContext::create().unwrap();
    let source = Pipe::<i32>::new();
    let doubled = source.map(|v| v * 2);

    source.push(1);
    source.push(2);
    source.push(3);
    source.close();

    let collected = Rc::new(RefCell::new(Vec::new()));
    let c2 = Rc::clone(&collected);
    let sink = doubled.iter(move |v| c2.borrow_mut().push(v));

    ctx.scheduler().wait_until(|| sink.is_done()).unwrap();
    assert_eq!(*collected.borrow(), vec![2, 4, 6]);
}

#[test]
#[serial]
fn bind_chain_of_three_deferreds_runs_in_order() {
    let ctx = SchedulerContext::create().unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));

    let o1 = Rc::clone(&order);
    let o2 = Rc::clone(&order);
    let o3 = Rc::clone(&order);

    let chained = Deferred::ready(1)
        .bind(move |v| {
            o1.borrow_mut().push(v);
            Deferred::ready(v + 1)
        })
        .bind(move |v| {
            o2.borrow_mut().push(v);
            Deferred::ready(v + 1)
        })
        .bind(move |v| {
            o3.borrow_mut().push(v);
            Deferred::ready(v + 1)
        });

    let task = Task::spawn(async move { chained.await });
    ctx.scheduler().wait_until(|| task.is_done()).unwrap();

    assert_eq!(task.value(), 4);
    assert_eq!(*order.borrow(), vec![1, 2, 3]);
}

#[test]
#[serial]
fn every_can_be_canceled_from_within_its_own_callback() {
    let ctx = SchedulerContext::create().unwrap();
    let calls = Rc::new(RefCell::new(0));
    let c2 = Rc::clone(&calls);

    // `every`'s handle can't be referenced from inside its own closure
    // directly (it doesn't exist yet), so cancellation-from-within is
    // modeled with a shared flag the closure sets and an outer task that
    // polls the handle.
    let should_stop = Rc::new(RefCell::new(false));
    let stop2 = Rc::clone(&should_stop);
    let handle = every(Duration::from_millis(1), move || {
        *c2.borrow_mut() += 1;
        if *c2.borrow() >= 3 {
            *stop2.borrow_mut() = true;
        }
    });

    ctx.scheduler().wait_until(|| *should_stop.borrow()).unwrap();
    handle.cancel();
    ctx.scheduler().wait_until(|| handle.is_done()).unwrap();

    assert!(*calls.borrow() >= 3);
}
