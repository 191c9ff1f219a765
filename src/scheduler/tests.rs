use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::Ordering;

use futures::Future;

use common::id::WorkerId;
use common::value::Value;
use graph::thunk::{ThunkFlags, ThunkInput, ThunkRef};
use logging::{EventKind, MemoryLogger};
use worker::registry::{TaskContext, TaskFuture, TaskResult};
use super::state::DEBUG_CHECK_STATE;
use super::Session;

type Counts = Rc<RefCell<HashMap<String, usize>>>;

fn setup(nworkers: usize) -> (Session, Rc<RefCell<MemoryLogger>>, Counts) {
    let _ = ::env_logger::try_init();
    DEBUG_CHECK_STATE.store(true, Ordering::Relaxed);
    let mut session = Session::local(nworkers).unwrap();
    let logger = Rc::new(RefCell::new(MemoryLogger::new()));
    session.set_logger(logger.clone());
    let counts: Counts = Default::default();
    (session, logger, counts)
}

/// Register a summing function that counts its executions under `name`.
fn register_counted_sum(session: &Session, counts: &Counts, name: &'static str) {
    let registry = session.cluster().registry();
    let c = counts.clone();
    registry.borrow_mut().register_sync(name, move |args| {
        *c.borrow_mut().entry(name.to_string()).or_insert(0) += 1;
        let mut total = 0;
        for a in args {
            total += a.as_int()?;
        }
        Ok(Value::Int(total))
    });
}

fn count(counts: &Counts, name: &str) -> usize {
    counts.borrow().get(name).cloned().unwrap_or(0)
}

fn total_live_chunks(session: &Session) -> usize {
    session
        .cluster()
        .workers()
        .iter()
        .map(|w| w.get().store.live_len())
        .sum()
}

fn compute_started(logger: &Rc<RefCell<MemoryLogger>>) -> Vec<(i64, WorkerId)> {
    logger
        .borrow()
        .events()
        .iter()
        .filter_map(|e| match e.event {
            EventKind::ComputeStarted(ref ev) => Some((ev.thunk, ev.worker)),
            _ => None,
        })
        .collect()
}

fn val(v: i64) -> ThunkInput {
    ThunkInput::Value(Value::Int(v))
}

fn dep(t: &ThunkRef) -> ThunkInput {
    ThunkInput::Thunk(t.clone())
}

#[test]
fn linear_chain() {
    let (mut session, _logger, counts) = setup(2);
    for &name in &["fa", "fb", "fc"] {
        register_counted_sum(&session, &counts, name);
    }
    let a = ThunkRef::new("fa", vec![val(1)]);
    let b = ThunkRef::new("fb", vec![dep(&a), val(10)]);
    let c = ThunkRef::new("fc", vec![dep(&b), val(100)]);

    assert_eq!(session.compute(&c).unwrap(), Value::Int(111));
    assert_eq!(count(&counts, "fa"), 1);
    assert_eq!(count(&counts, "fb"), 1);
    assert_eq!(count(&counts, "fc"), 1);
    // intermediate results were freed, only the root remains held
    assert_eq!(total_live_chunks(&session), 1);
}

#[test]
fn diamond_fires_join_once_and_frees_the_source() {
    let (mut session, _logger, counts) = setup(2);
    for &name in &["fa", "fb", "fc", "fd"] {
        register_counted_sum(&session, &counts, name);
    }
    let a = ThunkRef::new("fa", vec![val(1)]);
    let b = ThunkRef::new("fb", vec![dep(&a), val(10)]);
    let c = ThunkRef::new("fc", vec![dep(&a), val(20)]);
    let d = ThunkRef::new("fd", vec![dep(&b), dep(&c)]);

    assert_eq!(session.compute(&d).unwrap(), Value::Int(32));
    for &name in &["fa", "fb", "fc", "fd"] {
        assert_eq!(count(&counts, name), 1, "{} fired more than once", name);
    }
    assert_eq!(total_live_chunks(&session), 1);
}

#[test]
fn meta_thunk_runs_in_the_scheduler() {
    let (mut session, logger, counts) = setup(2);
    register_counted_sum(&session, &counts, "leaf");
    let a = ThunkRef::new("leaf", vec![val(1)]);
    let b = ThunkRef::new("leaf", vec![val(2)]);
    let mut flags = ThunkFlags::default();
    flags.meta = true;
    let t = ThunkRef::with_flags("sum", vec![dep(&a), dep(&b)], flags);

    assert_eq!(session.compute(&t).unwrap(), Value::Int(3));
    // only the two leaves ever reached a worker
    let started = compute_started(&logger);
    assert_eq!(started.len(), 2);
    assert!(started.iter().all(|&(tid, _)| tid != t.get_id()));
}

#[test]
fn single_leaf_never_touches_the_completion_channel() {
    let (mut session, logger, _counts) = setup(1);
    let mut flags = ThunkFlags::default();
    flags.meta = true;
    let leaf = ThunkRef::with_flags("identity", vec![val(5)], flags);

    assert_eq!(session.compute(&leaf).unwrap(), Value::Int(5));
    assert_eq!(logger.borrow().count_of("SchedulerTurn"), 0);
}

#[test]
fn remote_leaf_completes() {
    let (mut session, logger, _counts) = setup(1);
    let leaf = ThunkRef::new("identity", vec![val(5)]);
    assert_eq!(session.compute(&leaf).unwrap(), Value::Int(5));
    assert!(logger.borrow().count_of("SchedulerTurn") >= 1);
}

#[test]
fn sleep_suspends_and_resumes() {
    let (mut session, _logger, _counts) = setup(1);
    let s = ThunkRef::new("sleep", vec![val(20)]);
    let r = ThunkRef::new("sum", vec![dep(&s), val(1)]);
    assert_eq!(session.compute(&r).unwrap(), Value::Int(21));
}

#[test]
fn cached_thunk_is_not_recomputed_on_the_second_run() {
    let (mut session, _logger, counts) = setup(1);
    register_counted_sum(&session, &counts, "fx");
    register_counted_sum(&session, &counts, "fy");
    let mut flags = ThunkFlags::default();
    flags.cache = true;
    let x = ThunkRef::with_flags("fx", vec![val(7)], flags);
    let y = ThunkRef::new("fy", vec![dep(&x), val(5)]);

    let first = session.compute(&y).unwrap();
    assert_eq!(first, Value::Int(12));
    assert_eq!(count(&counts, "fx"), 1);
    assert!(x.cache_ref().is_some());

    let second = session.compute(&y).unwrap();
    assert_eq!(second, first);
    // the consumer re-ran, the cached leaf was revived instead of fired
    assert_eq!(count(&counts, "fx"), 1);
    assert_eq!(count(&counts, "fy"), 2);
}

#[test]
fn rerunning_a_plain_dag_gives_equal_results() {
    let (mut session, _logger, counts) = setup(2);
    register_counted_sum(&session, &counts, "fa");
    register_counted_sum(&session, &counts, "fb");
    let a = ThunkRef::new("fa", vec![val(3)]);
    let b = ThunkRef::new("fb", vec![dep(&a), val(4)]);

    let first = session.compute(&b).unwrap();
    let second = session.compute(&b).unwrap();
    assert_eq!(first, second);
    assert_eq!(count(&counts, "fa"), 2);
}

#[test]
fn persist_keeps_the_result_on_the_worker() {
    let (mut session, _logger, counts) = setup(1);
    register_counted_sum(&session, &counts, "fx");
    let mut flags = ThunkFlags::default();
    flags.persist = true;
    let x = ThunkRef::with_flags("fx", vec![val(1)], flags);
    let y = ThunkRef::new("sum", vec![dep(&x), val(1)]);

    assert_eq!(session.compute(&y).unwrap(), Value::Int(2));
    // both the pinned result and the root are still held
    assert_eq!(total_live_chunks(&session), 2);
}

#[test]
fn single_option_confines_dispatches() {
    let (mut session, logger, counts) = setup(2);
    for &name in &["fa", "fb", "fc"] {
        register_counted_sum(&session, &counts, name);
    }
    session.options.single = Some(WorkerId(2));
    let a = ThunkRef::new("fa", vec![val(1)]);
    let b = ThunkRef::new("fb", vec![dep(&a), val(1)]);
    let c = ThunkRef::new("fc", vec![dep(&b), val(1)]);

    assert_eq!(session.compute(&c).unwrap(), Value::Int(3));
    let started = compute_started(&logger);
    assert!(!started.is_empty());
    assert!(started.iter().all(|&(_, w)| w == WorkerId(2)));
}

#[test]
fn worker_death_replans_lost_ancestors() {
    let (mut session, logger, counts) = setup(2);
    for &name in &["fa", "fb", "fc", "fd"] {
        register_counted_sum(&session, &counts, name);
    }
    // the first worker dies after completing one task
    session
        .cluster()
        .get_worker(WorkerId(1))
        .unwrap()
        .fail_after(1);

    let a = ThunkRef::new("fa", vec![val(1)]);
    let b = ThunkRef::new("fb", vec![dep(&a), val(10)]);
    let c = ThunkRef::new("fc", vec![dep(&b), val(100)]);
    let d = ThunkRef::new("fd", vec![dep(&c), val(1000)]);

    assert_eq!(session.compute(&d).unwrap(), Value::Int(1111));
    // the first result died with its worker and was recomputed
    assert_eq!(count(&counts, "fa"), 2);
    assert_eq!(count(&counts, "fb"), 1);
    assert_eq!(count(&counts, "fc"), 1);
    assert_eq!(count(&counts, "fd"), 1);
    assert_eq!(session.cluster().len(), 1);
    assert_eq!(logger.borrow().count_of("WorkerRemoved"), 1);
}

#[test]
fn all_workers_dead_fails_fast() {
    let (mut session, _logger, _counts) = setup(1);
    session
        .cluster()
        .get_worker(WorkerId(1))
        .unwrap()
        .fail_after(0);
    let a = ThunkRef::new("identity", vec![val(1)]);
    let err = session.compute(&a).unwrap_err();
    assert!(!err.is_recoverable());
}

#[test]
fn thunk_error_surfaces_to_the_caller() {
    let (mut session, _logger, _counts) = setup(1);
    session
        .cluster()
        .registry()
        .borrow_mut()
        .register_sync("boom", |_args| bail!("boom exploded"));
    let a = ThunkRef::new("boom", vec![val(1)]);
    let err = session.compute(&a).unwrap_err();
    assert!(err.to_string().contains("boom exploded"));

    // the session survives a failed run
    let b = ThunkRef::new("identity", vec![val(2)]);
    assert_eq!(session.compute(&b).unwrap(), Value::Int(2));
}

fn halting_task(ctx: &mut TaskContext, _args: Vec<Value>) -> TaskResult {
    let handle = ctx.scheduler()?.clone();
    let fut: Box<TaskFuture> = Box::new(handle.halt().map(|()| Value::Unit));
    Ok(fut)
}

#[test]
fn dynamic_halt_stops_the_run() {
    let (mut session, _logger, _counts) = setup(2);
    session
        .cluster()
        .registry()
        .borrow_mut()
        .register("halter", halting_task);
    let mut flags = ThunkFlags::default();
    flags.dynamic = true;
    let h = ThunkRef::with_flags("halter", vec![], flags);

    let err = session.compute(&h).unwrap_err();
    assert!(err.is_halt());

    // channels of the halted run are gone; a fresh run still works
    let b = ThunkRef::new("identity", vec![val(3)]);
    assert_eq!(session.compute(&b).unwrap(), Value::Int(3));
}

fn dag_query_task(ctx: &mut TaskContext, _args: Vec<Value>) -> TaskResult {
    let handle = ctx.scheduler()?.clone();
    let fut: Box<TaskFuture> = Box::new(
        handle
            .get_dag_ids()
            .map(|map| Value::Int(map.len() as i64)),
    );
    Ok(fut)
}

#[test]
fn dynamic_thunk_queries_the_dag() {
    let (mut session, _logger, _counts) = setup(1);
    session
        .cluster()
        .registry()
        .borrow_mut()
        .register("dagq", dag_query_task);
    let a = ThunkRef::new("identity", vec![val(1)]);
    let mut flags = ThunkFlags::default();
    flags.dynamic = true;
    flags.get_result = true;
    let q = ThunkRef::with_flags("dagq", vec![dep(&a)], flags);

    assert_eq!(session.compute(&q).unwrap(), Value::Int(2));
}
