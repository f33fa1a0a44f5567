//! Sleep queue acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - Sleepers wake at their wake tick, earliest first, ties in call order
//! - Sleeps of zero or negative ticks return without suspending
//! - Millisecond sleeps convert to whole ticks at the configured rate
//! - Sub-tick sleeps are absorbed by a busy-wait and never queue
//! - Timed sleeps with interrupts disabled are fatal

use super::common::{FixedRateClock, Rig, WAIT};
use ktimer_common::{ContextState, TIMER_VECTOR};
use ktimer_core::{InterruptControl, HANDLER_NAME};

#[test]
fn test_sleepers_wake_in_tick_order() {
    let rig = Rig::boot(100);

    let a = rig.spawn_sleeper("A", 5);
    let b = rig.spawn_sleeper("B", 3);
    let c = rig.spawn_sleeper("C", 5);
    let (a_id, b_id, c_id) = (a.id(), b.id(), c.id());

    assert_eq!(rig.queue_order(), vec![(b_id, 3), (a_id, 5), (c_id, 5)]);
    assert_eq!(rig.timer.next_wakeup(), Some(3));

    rig.tick(2);
    assert!(rig.machine.wake_log().is_empty());

    rig.tick(1);
    assert_eq!(rig.machine.wake_log(), vec![b_id]);
    b.join().unwrap();
    assert_eq!(rig.machine.context_state(a_id), Some(ContextState::Queued));

    rig.tick(1);
    assert_eq!(rig.machine.wake_log(), vec![b_id]);

    rig.tick(1);
    assert_eq!(rig.machine.wake_log(), vec![b_id, a_id, c_id]);
    a.join().unwrap();
    c.join().unwrap();

    for id in [a_id, b_id, c_id] {
        assert_eq!(rig.machine.context_state(id), Some(ContextState::Running));
    }
    assert_eq!(rig.timer.sleepers(), 0);

    let stats = rig.timer.stats();
    assert_eq!(stats.ticks, 5);
    assert_eq!(stats.wakeups, 3);
    assert_eq!(stats.peak_queue_depth, 3);
}

#[test]
fn test_nonpositive_sleep_returns_immediately() {
    let rig = Rig::boot(100);

    let handle = rig.spawn("eager", |timer| {
        timer.sleep(0);
        timer.sleep(-5);
    });
    let id = handle.id();
    handle.join().unwrap();

    let info = rig
        .machine
        .contexts()
        .into_iter()
        .find(|c| c.id == id)
        .unwrap();
    assert_eq!(info.state, ContextState::Running);
    assert_eq!(info.wakeups, 0);
    assert_eq!(rig.timer.stats().noop_sleeps, 2);
    assert_eq!(rig.timer.ticks(), 0);
}

#[test]
fn test_one_second_sleep_is_frequency_ticks() {
    let rig = Rig::boot(100);

    let handle = rig.spawn("sleeper", |timer| timer.sleep_ms(1000));
    rig.wait_queued(handle.id());
    assert_eq!(rig.queue_order(), vec![(handle.id(), 100)]);

    rig.tick(99);
    assert_eq!(
        rig.machine.context_state(handle.id()),
        Some(ContextState::Queued)
    );

    rig.tick(1);
    let id = handle.id();
    handle.join().unwrap();
    assert_eq!(rig.machine.wake_log(), vec![id]);
}

#[test]
fn test_sleep_relative_to_current_tick() {
    let rig = Rig::boot(1000);
    rig.tick(40);

    let handle = rig.spawn_sleeper("late", 10);
    assert_eq!(rig.queue_order(), vec![(handle.id(), 50)]);

    rig.tick(10);
    handle.join().unwrap();
}

#[test]
fn test_sub_tick_sleep_spins_without_queueing() {
    let rig = Rig::boot(100);
    assert_eq!(
        rig.timer.calibrate_with(&FixedRateClock::new(10_000, 3)),
        3332
    );

    let handle = rig.spawn("spinner", |timer| {
        timer.sleep_us(5_000);
        timer.sleep_ns(900);
    });
    handle.join().unwrap();

    let stats = rig.timer.stats();
    assert_eq!(stats.spin_sleeps, 2);
    assert_eq!(stats.queued_sleeps, 0);
    assert_eq!(stats.spin_loops, 1666);
    assert!(rig.machine.wake_log().is_empty());
}

#[test]
fn test_interrupt_path_bookkeeping() {
    let rig = Rig::boot(100);

    assert_eq!(
        rig.machine.port_log(),
        vec![(0x43, 0x36), (0x40, 0x9c), (0x40, 0x2e)]
    );
    assert_eq!(rig.machine.pit_divisor(), Some(11_932));
    assert_eq!(rig.machine.handler_name(TIMER_VECTOR), Some(HANDLER_NAME));

    rig.tick(7);
    assert_eq!(rig.timer.ticks(), 7);
    assert_eq!(rig.machine.tick_hooks(), 7);
    assert_eq!(rig.machine.interrupts(), 7);

    rig.timer.uninstall(&*rig.machine);
    assert!(!rig.machine.raise(TIMER_VECTOR));
    assert_eq!(rig.timer.ticks(), 7);
}

#[test]
fn test_timed_sleep_with_interrupts_disabled_is_fatal() {
    let rig = Rig::boot(100);
    let machine = std::sync::Arc::clone(&rig.machine);

    let handle = rig.spawn("careless", move |timer| {
        machine.disable();
        timer.sleep_ms(10);
    });
    assert!(handle.join().is_err());
}

#[test]
fn test_wakeups_with_live_clock() {
    let rig = Rig::boot(1000);
    rig.machine.start_clock(TIMER_VECTOR).unwrap();

    let handles: Vec<_> = [("short", 5), ("medium", 10), ("long", 20)]
        .into_iter()
        .map(|(name, ms)| {
            rig.spawn(name, move |timer| {
                let start = timer.ticks();
                timer.sleep_ms(ms);
                assert!(timer.elapsed(start) >= ms);
            })
        })
        .collect();

    let deadline = std::time::Instant::now() + WAIT;
    while !handles.iter().all(|h| h.is_finished()) {
        assert!(std::time::Instant::now() < deadline, "sleepers never woke");
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    rig.machine.power_off();

    assert_eq!(rig.timer.stats().wakeups, 3);
}
