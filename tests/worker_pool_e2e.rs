//! Worker pool end-to-end verification.
//!
//! Test Coverage:
//! - Submission: results, FIFO on a single worker, backpressure
//! - Shutdown: drain vs discard, idempotence, rejection afterwards, drop
//! - Task handles: cancel before and during a run, continuations, chaining,
//!   async join
//! - Parallel loops: coverage and failure reporting
//! - Stats bookkeeping

#[macro_use]
mod common;

use common::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use threadsync::{
    Cancelled, CountdownLatch, ErrorKind, ManualResetEvent, PoolState, TaskError, WorkerPool,
    WorkerPoolBuilder,
};

fn init_test(test_name: &str) {
    init_test_logging();
    test_phase!(test_name);
}

/// Occupies every worker of `pool` until the returned event is set.
fn occupy_workers(pool: &WorkerPool) -> Arc<ManualResetEvent> {
    let release = Arc::new(ManualResetEvent::new(false));
    let entered = Arc::new(CountdownLatch::new(pool.worker_count()));
    for _ in 0..pool.worker_count() {
        let release = Arc::clone(&release);
        let entered = Arc::clone(&entered);
        pool.submit(move || {
            entered.signal().expect("one signal per worker");
            release.wait();
        })
        .expect("submit blocker");
    }
    entered.wait();
    release
}

#[test]
fn single_worker_runs_in_submission_order() {
    init_test("single_worker_runs_in_submission_order");
    let pool = WorkerPoolBuilder::single_worker().build().expect("pool");
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let handles: Vec<_> = (0..50)
        .map(|i| {
            let order = Arc::clone(&order);
            pool.submit(move || order.lock().push(i)).expect("submit")
        })
        .collect();
    for handle in handles {
        handle.join().expect("task ok");
    }
    let order = order.lock().clone();
    let expected: Vec<i32> = (0..50).collect();
    assert_with_log!(order == expected, "FIFO order", expected, order);
    test_complete!("single_worker_runs_in_submission_order");
}

#[test]
fn drain_shutdown_runs_everything_exactly_once() {
    init_test("drain_shutdown_runs_everything_exactly_once");
    let pool = Arc::new(
        WorkerPool::builder()
            .worker_threads(4)
            .queue_capacity(256)
            .build()
            .expect("pool"),
    );
    let release = occupy_workers(&pool);
    let counts = Arc::new((0..200).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>());
    for i in 0..200 {
        let counts = Arc::clone(&counts);
        pool.submit(move || {
            counts[i].fetch_add(1, Ordering::SeqCst);
        })
        .expect("submit");
    }
    assert_with_log!(pool.pending_count() == 200, "all queued", 200usize, pool.pending_count());

    let stopper = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.shutdown(true))
    };
    assert!(wait_until(PATIENCE, || pool.state() == PoolState::Draining));
    assert_err_kind!(pool.submit(|| ()), ErrorKind::Rejected);
    release.set();
    stopper.join().expect("shutdown panicked");

    let exact = counts.iter().all(|c| c.load(Ordering::SeqCst) == 1);
    assert_with_log!(exact, "every task ran exactly once", true, exact);
    let stats = pool.stats();
    assert_with_log!(stats.completed == 204, "completed count", 204u64, stats.completed);
    assert_with_log!(stats.pending == 0, "queue empty", 0usize, stats.pending);
    assert_with_log!(pool.state() == PoolState::Stopped, "stopped", PoolState::Stopped, pool.state());
    test_complete!("drain_shutdown_runs_everything_exactly_once");
}

#[test]
fn discard_shutdown_reports_discarded_handles() {
    init_test("discard_shutdown_reports_discarded_handles");
    let pool = Arc::new(WorkerPool::new(2).expect("pool"));
    let release = occupy_workers(&pool);
    let ran = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..10)
        .map(|_| {
            let ran = Arc::clone(&ran);
            pool.submit(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            })
            .expect("submit")
        })
        .collect();

    let stopper = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.shutdown(false))
    };
    assert!(wait_until(PATIENCE, || pool.is_shutdown_requested()));
    release.set();
    stopper.join().expect("shutdown panicked");

    for handle in handles {
        let result = handle.join();
        assert_with_log!(result == Err(TaskError::Discarded), "discarded", "Discarded", result);
    }
    assert_with_log!(ran.load(Ordering::SeqCst) == 0, "none ran", 0usize, ran.load(Ordering::SeqCst));
    assert_with_log!(pool.stats().discarded == 10, "stats", 10u64, pool.stats().discarded);

    test_section!("submit after discard");
    assert_err_kind!(pool.submit(|| ()), ErrorKind::Rejected);
    assert_err_kind!(pool.try_submit(|| ()), ErrorKind::Rejected);
    test_complete!("discard_shutdown_reports_discarded_handles");
}

#[test]
fn concurrent_shutdown_callers_all_wait_for_stop() {
    init_test("concurrent_shutdown_callers_all_wait_for_stop");
    let pool = Arc::new(WorkerPool::new(2).expect("pool"));
    let release = occupy_workers(&pool);

    let callers: Vec<_> = (0..3)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                pool.shutdown(true);
                pool.state()
            })
        })
        .collect();
    settle();
    assert_with_log!(pool.state() == PoolState::Draining, "blocked on running tasks", PoolState::Draining, pool.state());
    release.set();
    for caller in callers {
        let state = caller.join().expect("caller panicked");
        assert_with_log!(state == PoolState::Stopped, "returned after stop", PoolState::Stopped, state);
    }
    test_complete!("concurrent_shutdown_callers_all_wait_for_stop");
}

#[test]
fn full_queue_blocks_submit_until_space() {
    init_test("full_queue_blocks_submit_until_space");
    let pool = Arc::new(
        WorkerPool::builder()
            .worker_threads(1)
            .queue_capacity(2)
            .build()
            .expect("pool"),
    );
    let release = occupy_workers(&pool);
    pool.submit(|| ()).expect("slot 1");
    pool.submit(|| ()).expect("slot 2");
    assert_err_kind!(pool.try_submit(|| ()), ErrorKind::Rejected);

    let submitter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.submit(|| 99).map(|h| h.join()))
    };
    settle();
    assert_with_log!(!submitter.is_finished(), "submit is blocked", false, submitter.is_finished());
    release.set();
    let result = submitter.join().expect("submitter panicked").expect("accepted");
    assert_with_log!(result == Ok(99), "ran after space freed", "Ok(99)", result);
    test_complete!("full_queue_blocks_submit_until_space");
}

#[test]
fn cancel_before_start_and_continuations() {
    init_test("cancel_before_start_and_continuations");
    let pool = WorkerPool::new(1).expect("pool");
    let release = occupy_workers(&pool);

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let cancelled = pool.submit(|| 1).expect("submit");
    let kept = pool.submit(|| 2).expect("submit");
    for handle in [&cancelled, &kept] {
        let seen = Arc::clone(&seen);
        handle.on_complete(move |result| seen.lock().push(result.clone()));
    }
    cancelled.cancel();
    release.set();

    let skipped = cancelled.join();
    assert_with_log!(skipped == Err(TaskError::Cancelled), "skipped", "Cancelled", skipped);
    let kept = kept.join();
    assert_with_log!(kept == Ok(2), "kept", "Ok(2)", kept);
    let seen = seen.lock().clone();
    assert_with_log!(
        seen == vec![Err(TaskError::Cancelled), Ok(2)],
        "continuations saw results in order",
        "[Cancelled, Ok(2)]",
        seen
    );
    let stats = pool.stats();
    assert_with_log!(stats.cancelled == 1, "cancel counted", 1u64, stats.cancelled);
    test_complete!("cancel_before_start_and_continuations");
}

#[test]
fn running_task_stops_cancelled_through_checkpoint() {
    init_test("running_task_stops_cancelled_through_checkpoint");
    let pool = WorkerPool::new(1).expect("pool");
    let started = Arc::new(ManualResetEvent::new(false));
    let handle = {
        let started = Arc::clone(&started);
        pool.submit_cancellable(move |ctx| -> Result<u64, Cancelled> {
            started.set();
            loop {
                ctx.checkpoint()?;
                thread::sleep(Duration::from_millis(1));
            }
        })
        .expect("submit")
    };
    started.wait();
    handle.cancel();

    let result = handle.join();
    assert_with_log!(result == Err(TaskError::Cancelled), "awaiter sees cancellation", "Cancelled", result);
    let follow_up = pool.submit(|| "worker still serves").expect("submit").join();
    assert_with_log!(follow_up == Ok("worker still serves"), "worker reused", "Ok", follow_up);

    let stats = pool.stats();
    assert_with_log!(stats.cancelled == 1, "counted as cancelled", 1u64, stats.cancelled);
    assert_with_log!(stats.completed == 1, "only the follow-up completed", 1u64, stats.completed);
    test_complete!("running_task_stops_cancelled_through_checkpoint");
}

#[test]
fn chained_tasks_carry_each_result_forward() {
    init_test("chained_tasks_carry_each_result_forward");
    let pool = WorkerPool::new(2).expect("pool");

    let chained = pool
        .submit(|| 5_u32)
        .expect("submit")
        .then(|r| r.map(|v| v * 2))
        .then(|r| match r {
            Ok(Ok(v)) => format!("value {v}"),
            other => format!("unexpected {other:?}"),
        });
    let text = chained.join();
    assert_with_log!(text == Ok("value 10".to_string()), "chain result", "value 10", text);

    test_section!("failure flows through the chain");
    let recovered = pool
        .submit(|| -> u32 { panic!("first step failed") })
        .expect("submit")
        .then(|r| match r {
            Err(TaskError::Panicked(_)) => 0,
            Ok(v) => v,
            Err(_) => u32::MAX,
        })
        .join();
    assert_with_log!(recovered == Ok(0), "recovered in continuation", "Ok(0)", recovered);
    test_complete!("chained_tasks_carry_each_result_forward");
}

#[test]
fn conditional_continuations_follow_outcome() {
    init_test("conditional_continuations_follow_outcome");
    let pool = WorkerPool::new(1).expect("pool");
    let release = occupy_workers(&pool);
    let successes = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let failures = Arc::new(AtomicUsize::new(0));

    let good = pool.submit(|| 7_u32).expect("submit");
    let bad = pool.submit(|| -> u32 { panic!("faulted") }).expect("submit");
    for handle in [&good, &bad] {
        let successes = Arc::clone(&successes);
        let failures = Arc::clone(&failures);
        handle.on_success(move |v| successes.lock().push(*v));
        handle.on_failure(move |err| {
            assert!(matches!(err, TaskError::Panicked(_)), "unexpected failure: {err}");
            failures.fetch_add(1, Ordering::SeqCst);
        });
    }
    release.set();
    good.wait();
    bad.wait();

    let successes = successes.lock().clone();
    let failures = failures.load(Ordering::SeqCst);
    assert_with_log!(successes == vec![7], "only the success ran on_success", vec![7u32], successes);
    assert_with_log!(failures == 1, "only the fault ran on_failure", 1usize, failures);
    test_complete!("conditional_continuations_follow_outcome");
}

#[test]
fn handle_can_be_awaited() {
    init_test("handle_can_be_awaited");
    let pool = WorkerPool::new(2).expect("pool");
    let handle = pool.submit(|| "from worker").expect("submit");
    let result = futures_lite::future::block_on(handle);
    assert_with_log!(result == Ok("from worker"), "future output", "Ok", result);
    test_complete!("handle_can_be_awaited");
}

#[test]
fn parallel_for_visits_each_index_once() {
    init_test("parallel_for_visits_each_index_once");
    let pool = WorkerPool::new(4).expect("pool");
    let sum = Arc::new(AtomicUsize::new(0));
    {
        let sum = Arc::clone(&sum);
        pool.parallel_for(1..1001, move |i| {
            sum.fetch_add(i, Ordering::Relaxed);
        })
        .expect("loop ok");
    }
    assert_with_log!(sum.load(Ordering::SeqCst) == 500_500, "gauss", 500_500usize, sum.load(Ordering::SeqCst));

    pool.parallel_for(5..5, |_| panic!("empty range runs nothing"))
        .expect("empty range");

    let err = pool
        .parallel_for_each(0..8, |i| assert!(i % 4 != 3, "item {i} rejected"))
        .expect_err("two items fail");
    assert_with_log!(err.kind() == ErrorKind::TaskFailed, "kind", ErrorKind::TaskFailed, err.kind());
    let text = err.to_string();
    assert_with_log!(text.contains("2 of 8"), "failure count in message", "2 of 8", text);
    test_complete!("parallel_for_visits_each_index_once");
}

#[test]
fn drop_drains_by_default_and_discards_when_configured() {
    init_test("drop_drains_by_default_and_discards_when_configured");
    for drain in [true, false] {
        test_section!(if drain { "drain" } else { "discard" });
        let ran = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::builder()
            .worker_threads(1)
            .drain_on_drop(drain)
            .build()
            .expect("pool");
        let release = occupy_workers(&pool);
        for _ in 0..5 {
            let ran = Arc::clone(&ran);
            pool.submit(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            })
            .expect("submit");
        }
        let dropper = thread::spawn(move || drop(pool));
        settle();
        release.set();
        dropper.join().expect("drop panicked");

        let expected = if drain { 5 } else { 0 };
        let got = ran.load(Ordering::SeqCst);
        assert_with_log!(got == expected, "queued tasks after drop", expected, got);
    }
    test_complete!("drop_drains_by_default_and_discards_when_configured");
}

#[test]
fn context_reports_worker_identity() {
    init_test("context_reports_worker_identity");
    let pool = WorkerPool::new(3).expect("pool");
    let handles: Vec<_> = (0..30)
        .map(|_| pool.submit_with_context(|ctx| (ctx.worker_index(), ctx.task_id().is_some())))
        .collect::<Result<_, _>>()
        .expect("submit");
    for handle in handles {
        let (index, has_id) = handle.join().expect("task ok");
        assert_with_log!(index < 3, "index in range", "< 3", index);
        assert_with_log!(has_id, "task id visible", true, has_id);
    }
    pool.shutdown(true);
    let stopped = pool.wait_stopped(Duration::ZERO);
    assert_with_log!(stopped, "stopped", true, stopped);
    test_complete!("context_reports_worker_identity");
}
