// Scheduler behavior through the embedder surface, on the virtual
// clock: ordering, ties, cancellation, ticker re-insertion.

use std::time::Duration;

use quill::{VMTask, Value};

use crate::common::{clear_recorded, record_fn, recorded, test_vm};

#[test]
fn test_timers_fire_in_deadline_order() {
    clear_recorded();
    let mut vm = test_vm();
    let record = record_fn(&mut vm);
    let now = vm.now();

    vm.register_timer(now + Duration::from_millis(30), VMTask::callback(record, &[Value::int(3)]));
    vm.register_timer(now + Duration::from_millis(10), VMTask::callback(record, &[Value::int(1)]));
    vm.register_timer(now + Duration::from_millis(20), VMTask::callback(record, &[Value::int(2)]));

    vm.start_runtime().unwrap();
    assert_eq!(recorded(), vec![1, 2, 3]);
}

#[test]
fn test_equal_deadlines_fire_in_registration_order() {
    clear_recorded();
    let mut vm = test_vm();
    let record = record_fn(&mut vm);
    let fire_at = vm.now() + Duration::from_millis(10);

    for n in 1..=4 {
        vm.register_timer(fire_at, VMTask::callback(record, &[Value::int(n)]));
    }

    vm.start_runtime().unwrap();
    assert_eq!(recorded(), vec![1, 2, 3, 4]);
}

#[test]
fn test_timer_ids_are_distinct_handles() {
    let mut vm = test_vm();
    let record = record_fn(&mut vm);
    let now = vm.now();
    let a = vm.register_timer(now + Duration::from_millis(5), VMTask::callback(record, &[Value::int(1)]));
    let b = vm.register_timer(now + Duration::from_millis(5), VMTask::callback(record, &[Value::int(2)]));
    let c = vm.register_ticker(Duration::from_millis(5), VMTask::callback(record, &[Value::int(3)]));
    assert_ne!(a, b);
    assert_ne!(b, c);
    // Leave nothing pending
    vm.clear_timer(a);
    vm.clear_timer(b);
    vm.clear_ticker(c);
    clear_recorded();
    vm.start_runtime().unwrap();
    assert_eq!(recorded(), Vec::<i64>::new());
}

#[test]
fn test_clear_timer_cancels_pending() {
    clear_recorded();
    let mut vm = test_vm();
    let record = record_fn(&mut vm);
    let now = vm.now();

    let doomed = vm.register_timer(now + Duration::from_millis(10), VMTask::callback(record, &[Value::int(1)]));
    vm.register_timer(now + Duration::from_millis(20), VMTask::callback(record, &[Value::int(2)]));
    vm.clear_timer(doomed);

    vm.start_runtime().unwrap();
    assert_eq!(recorded(), vec![2]);
}

#[test]
fn test_clear_timer_after_fired_is_noop() {
    clear_recorded();
    let mut vm = test_vm();
    let record = record_fn(&mut vm);
    let now = vm.now();

    let id = vm.register_timer(now + Duration::from_millis(10), VMTask::callback(record, &[Value::int(1)]));
    vm.start_runtime().unwrap();
    assert_eq!(recorded(), vec![1]);

    // Already fired: success, never an error, never a double firing
    vm.clear_timer(id);
    vm.clear_timer(id);
    vm.clear_timer(9999);
    vm.start_runtime().unwrap();
    assert_eq!(recorded(), vec![1]);
}

#[test]
fn test_task_queue_is_fifo() {
    clear_recorded();
    let mut vm = test_vm();
    let record = record_fn(&mut vm);
    for n in 1..=3 {
        vm.register_task(VMTask::callback(record, &[Value::int(n)]));
    }
    vm.start_runtime().unwrap();
    assert_eq!(recorded(), vec![1, 2, 3]);
}

#[test]
fn test_task_serviced_before_elapsed_timer() {
    clear_recorded();
    let mut vm = test_vm();
    let record = record_fn(&mut vm);

    // The timer is already due; the plain task still wins the tie
    vm.register_timer(vm.now(), VMTask::callback(record, &[Value::int(2)]));
    vm.register_task(VMTask::callback(record, &[Value::int(1)]));

    vm.start_runtime().unwrap();
    assert_eq!(recorded(), vec![1, 2]);
}

#[test]
fn test_ticker_fires_periodically_until_cleared() {
    clear_recorded();
    let mut vm = test_vm();
    let record = record_fn(&mut vm);
    let clear_sym = vm.symbols.encode_string("clear_ticker_native");
    let clear_native = vm.get_global(clear_sym).unwrap();
    let now = vm.now();

    let ticker = vm.register_ticker(Duration::from_millis(10), VMTask::callback(record, &[Value::int(7)]));
    // Fires at 10, 20, 30; the clear at 35 stops everything after
    vm.register_timer(
        now + Duration::from_millis(35),
        VMTask::callback(clear_native, &[Value::number(ticker as i64)]),
    );

    vm.start_runtime().unwrap();
    assert_eq!(recorded(), vec![7, 7, 7]);
}

#[test]
fn test_ticker_interleaves_with_timers() {
    clear_recorded();
    let mut vm = test_vm();
    let record = record_fn(&mut vm);
    let clear_sym = vm.symbols.encode_string("clear_ticker_native");
    let clear_native = vm.get_global(clear_sym).unwrap();
    let now = vm.now();

    let ticker = vm.register_ticker(Duration::from_millis(10), VMTask::callback(record, &[Value::int(7)]));
    vm.register_timer(now + Duration::from_millis(25), VMTask::callback(record, &[Value::int(9)]));
    vm.register_timer(
        now + Duration::from_millis(35),
        VMTask::callback(clear_native, &[Value::number(ticker as i64)]),
    );

    vm.start_runtime().unwrap();
    assert_eq!(recorded(), vec![7, 7, 9, 7]);
}

#[test]
fn test_cleared_ticker_never_refires() {
    clear_recorded();
    let mut vm = test_vm();
    let record = record_fn(&mut vm);

    let ticker = vm.register_ticker(Duration::from_millis(10), VMTask::callback(record, &[Value::int(7)]));
    vm.clear_ticker(ticker);
    vm.clear_ticker(ticker); // repeated clear is a no-op

    vm.start_runtime().unwrap();
    assert_eq!(recorded(), Vec::<i64>::new());
}

#[test]
fn test_idle_machine_terminates() {
    let mut vm = test_vm();
    // Nothing registered: the loop exits immediately
    vm.start_runtime().unwrap();
}
