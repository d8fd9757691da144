//! End-to-end tests for the action queue and event expiration.
//!
//! Each test builds its own working memory on a pseudo clock (or a tokio
//! runtime for the worker and realtime tests) and records what the network
//! doubles see.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::json;

use memflow_action::{
    ActionError, Delete, EntryPoint, EventWindow, ExpirationDecision, FactHandle, JobStatus,
    ObjectTypeConf, PropagationContext, PropagationError, PropagationTarget, PseudoClockTimer,
    QueueWorker, RealtimeTimer, Rendezvous, RendezvousError, SkipReason, TimerService,
    WorkingMemory, NEVER_EXPIRES,
};
use memflow_core::types::{ConsumerMode, TargetId, Timestamp};

// =============================================================================
// Helpers
// =============================================================================

type Log = Arc<Mutex<Vec<String>>>;

/// A network node that tracks which facts it currently holds.
struct Node {
    id: TargetId,
    offset: i64,
    log: Log,
    held: Mutex<HashMap<String, usize>>,
}

impl Node {
    fn new(name: &str, offset: i64, log: &Log) -> Arc<Self> {
        Arc::new(Self {
            id: TargetId::new(name),
            offset,
            log: Arc::clone(log),
            held: Mutex::new(HashMap::new()),
        })
    }

    fn holds(&self, handle: &FactHandle) -> bool {
        self.held.lock().unwrap().contains_key(&handle.to_string())
    }
}

impl PropagationTarget for Node {
    fn id(&self) -> &TargetId {
        &self.id
    }

    fn expiration_offset(&self) -> i64 {
        self.offset
    }

    fn assert_propagation(
        &self,
        handle: &Arc<FactHandle>,
        _context: &PropagationContext,
        _wm: &WorkingMemory,
    ) -> Result<(), PropagationError> {
        *self.held.lock().unwrap().entry(handle.to_string()).or_default() += 1;
        self.log.lock().unwrap().push(format!("{} +{}", self.id, handle));
        Ok(())
    }

    fn expire_propagation(
        &self,
        handle: &Arc<FactHandle>,
        _context: &PropagationContext,
        _wm: &WorkingMemory,
    ) -> Result<(), PropagationError> {
        self.held.lock().unwrap().remove(&handle.to_string());
        self.log.lock().unwrap().push(format!("{} -{}", self.id, handle));
        Ok(())
    }
}

/// Entry point that logs retractions and modifications.
struct Partition {
    name: String,
    log: Log,
}

impl EntryPoint for Partition {
    fn name(&self) -> &str {
        &self.name
    }

    fn modify_propagation(
        &self,
        handle: &Arc<FactHandle>,
        _context: &PropagationContext,
        _type_conf: &ObjectTypeConf,
        _wm: &WorkingMemory,
    ) -> Result<(), PropagationError> {
        self.log.lock().unwrap().push(format!("{} ~{}", self.name, handle));
        Ok(())
    }

    fn retract_propagation(
        &self,
        handle: &Arc<FactHandle>,
        context: &PropagationContext,
        _type_conf: &ObjectTypeConf,
        _wm: &WorkingMemory,
    ) -> Result<(), PropagationError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{} -{} ({})", self.name, handle, context.kind()));
        Ok(())
    }
}

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Passive working memory on a pseudo clock with a "default" partition.
fn pseudo_session(start_ms: i64, log: &Log) -> (WorkingMemory, Arc<PseudoClockTimer>) {
    let timer = Arc::new(PseudoClockTimer::new(Timestamp(start_ms)));
    let wm = WorkingMemory::new(Arc::clone(&timer) as Arc<dyn TimerService>, ConsumerMode::Passive);
    wm.register_entry_point(Arc::new(Partition {
        name: "default".to_string(),
        log: Arc::clone(log),
    }));
    (wm, timer)
}

fn tick(name: &str, start: i64) -> Arc<FactHandle> {
    Arc::new(FactHandle::new_event(
        "default",
        json!(name),
        EventWindow::point(Timestamp(start)),
    ))
}

// =============================================================================
// Expiration scheduling
// =============================================================================

#[test]
fn test_future_deadline_fires_at_exact_time() {
    let log = new_log();
    let (wm, timer) = pseudo_session(1200, &log);
    let node = Node::new("A", 500, &log);
    let conf = Arc::new(ObjectTypeConf::new("Tick").event().with_concrete_target(node.clone()));
    let handle = tick("t1", 1000);

    let report = wm
        .insert(Arc::clone(&handle), PropagationContext::insertion(), conf)
        .unwrap();
    assert!(matches!(
        report.decision_for(Some("A")),
        Some(ExpirationDecision::Scheduled { deadline: Timestamp(1500), .. })
    ));
    wm.flush().unwrap();
    assert!(node.holds(&handle));

    timer.advance_time(299);
    assert_eq!(wm.flush().unwrap(), 0);
    assert!(node.holds(&handle));

    timer.advance_time(1);
    assert_eq!(wm.flush().unwrap(), 1);
    assert!(!node.holds(&handle));
    assert!(handle.is_expired());
    assert_eq!(entries(&log), vec![r#"A +"t1""#, r#"A -"t1""#]);
}

#[test]
fn test_past_deadline_expires_without_job() {
    let log = new_log();
    let (wm, timer) = pseudo_session(1200, &log);
    let node = Node::new("A", 100, &log);
    let conf = Arc::new(ObjectTypeConf::new("Tick").event().with_concrete_target(node));
    let handle = tick("t1", 1000);

    let report = wm
        .insert(Arc::clone(&handle), PropagationContext::insertion(), conf)
        .unwrap();
    assert_eq!(report.immediate(), 1);
    assert_eq!(timer.pending_jobs(), 0);

    assert_eq!(wm.flush().unwrap(), 2);
    assert_eq!(entries(&log), vec![r#"A +"t1""#, r#"A -"t1""#]);
}

#[test]
fn test_overflowing_deadline_never_fires() {
    let log = new_log();
    let (wm, timer) = pseudo_session(0, &log);
    let node = Node::new("A", 1_000, &log);
    let conf = Arc::new(ObjectTypeConf::new("Tick").event().with_concrete_target(node));
    let handle = tick("late", i64::MAX - 10);

    let report = wm
        .insert(Arc::clone(&handle), PropagationContext::insertion(), conf)
        .unwrap();
    assert_eq!(
        report.decision_for(Some("A")).and_then(|d| d.deadline()),
        Some(Timestamp::MAX)
    );

    timer.advance_time(u64::MAX / 2);
    wm.flush().unwrap();
    assert!(!handle.is_expired());
    assert_eq!(handle.pending_jobs(), 1);
}

#[test]
fn test_unbounded_and_unset_offsets_schedule_nothing() {
    let log = new_log();
    let (wm, timer) = pseudo_session(0, &log);
    let never = Node::new("never", NEVER_EXPIRES, &log);
    let unset = Node::new("unset", -1, &log);
    let conf = Arc::new(
        ObjectTypeConf::new("Tick")
            .event()
            .with_concrete_target(never)
            .with_target(unset),
    );

    let report = wm
        .insert(tick("t", 0), PropagationContext::insertion(), conf)
        .unwrap();
    assert_eq!(report.skipped(), 2);
    assert_eq!(
        report.decision_for(Some("never")),
        Some(ExpirationDecision::Skipped(SkipReason::NeverExpires))
    );
    assert_eq!(timer.pending_jobs(), 0);
}

#[test]
fn test_restoring_session_leaves_timers_alone() {
    let log = new_log();
    let (wm, timer) = pseudo_session(0, &log);
    let node = Node::new("A", 10, &log);
    let conf = Arc::new(ObjectTypeConf::new("Tick").event().with_concrete_target(node));

    let report = wm
        .insert(tick("t", 0), PropagationContext::insertion().restoring(), conf)
        .unwrap();
    assert_eq!(
        report.decision_for(Some("A")),
        Some(ExpirationDecision::Skipped(SkipReason::Restoring))
    );
    assert_eq!(timer.pending_jobs(), 0);
}

#[test]
fn test_type_default_retracts_through_entry_point() {
    let log = new_log();
    let (wm, timer) = pseudo_session(0, &log);
    let node = Node::new("A", -1, &log);
    let conf = Arc::new(
        ObjectTypeConf::new("Tick")
            .event()
            .with_target(node)
            .with_expiration_offset(250),
    );
    let handle = tick("t", 100);

    let report = wm
        .insert(Arc::clone(&handle), PropagationContext::insertion(), conf)
        .unwrap();
    assert_eq!(report.scheduled(), 1);
    assert_eq!(
        report.decision_for(None).and_then(|d| d.deadline()),
        Some(Timestamp(350))
    );

    timer.set_time(Timestamp(350));
    wm.flush().unwrap();
    assert!(handle.is_retracted());
    assert_eq!(
        entries(&log),
        vec![r#"A +"t""#.to_string(), r#"default -"t" (expiration)"#.to_string()]
    );
}

#[test]
fn test_each_target_gets_its_own_job() {
    let log = new_log();
    let (wm, timer) = pseudo_session(0, &log);
    let short = Node::new("short", 100, &log);
    let long = Node::new("long", 400, &log);
    let conf = Arc::new(
        ObjectTypeConf::new("Tick")
            .event()
            .with_concrete_target(short.clone())
            .with_target(long.clone()),
    );
    let handle = tick("t", 0);

    let report = wm
        .insert(Arc::clone(&handle), PropagationContext::insertion(), conf)
        .unwrap();
    assert_eq!(report.scheduled(), 2);
    assert_eq!(handle.pending_jobs(), 2);

    timer.advance_time(100);
    wm.flush().unwrap();
    assert!(!short.holds(&handle));
    assert!(long.holds(&handle));

    timer.advance_time(300);
    wm.flush().unwrap();
    assert!(!long.holds(&handle));
    assert_eq!(handle.pending_jobs(), 0);
}

// =============================================================================
// Cancellation
// =============================================================================

#[test]
fn test_delete_cancels_expiration() {
    let log = new_log();
    let (wm, timer) = pseudo_session(0, &log);
    let node = Node::new("A", 100, &log);
    let conf = Arc::new(ObjectTypeConf::new("Tick").event().with_concrete_target(node));
    let handle = tick("t", 0);

    wm.insert(Arc::clone(&handle), PropagationContext::insertion(), Arc::clone(&conf))
        .unwrap();
    wm.delete(Arc::clone(&handle), PropagationContext::deletion(), conf)
        .unwrap();
    wm.flush().unwrap();

    assert!(handle.is_retracted());
    assert!(handle.jobs().iter().all(|j| j.status() == JobStatus::Cancelled));
    assert_eq!(timer.advance_time(1_000), 0);
    assert_eq!(wm.flush().unwrap(), 0);
    assert_eq!(
        entries(&log),
        vec![r#"A +"t""#.to_string(), r#"default -"t" (deletion)"#.to_string()]
    );
}

#[test]
fn test_double_cancel_and_cancel_after_fire() {
    let log = new_log();
    let (wm, timer) = pseudo_session(0, &log);
    let node = Node::new("A", 100, &log);
    let conf = Arc::new(ObjectTypeConf::new("Tick").event().with_concrete_target(node));
    let first = tick("first", 0);
    let second = tick("second", 0);

    wm.insert(Arc::clone(&first), PropagationContext::insertion(), Arc::clone(&conf))
        .unwrap();
    wm.insert(Arc::clone(&second), PropagationContext::insertion(), conf)
        .unwrap();

    let job = first.jobs().remove(0);
    assert!(timer.remove_job(&job));
    assert!(!timer.remove_job(&job));

    timer.advance_time(100);
    let fired = second.jobs().remove(0);
    assert_eq!(fired.status(), JobStatus::Fired);
    assert!(!timer.remove_job(&fired));

    wm.flush().unwrap();
    let expirations = entries(&log).iter().filter(|e| e.starts_with("A -")).count();
    assert_eq!(expirations, 1);
    assert!(!first.is_expired());
    assert!(second.is_expired());
}

#[test]
fn test_expire_after_delete_is_ignored() {
    let log = new_log();
    let (wm, timer) = pseudo_session(0, &log);
    let node = Node::new("A", 100, &log);
    let conf = Arc::new(ObjectTypeConf::new("Tick").event().with_concrete_target(node));
    let handle = tick("t", 0);

    wm.insert(Arc::clone(&handle), PropagationContext::insertion(), Arc::clone(&conf))
        .unwrap();
    wm.flush().unwrap();

    // The job fires and queues its Expire; a rule consequence then deletes
    // the fact inline, ahead of the queued Expire.
    timer.advance_time(100);
    assert_eq!(wm.pending_actions(), 1);
    let partition = wm.entry_point("default").unwrap();
    let (delete, done) = Rendezvous::wrap(
        Delete::new(partition, Arc::clone(&handle), PropagationContext::deletion(), conf).into(),
    );
    wm.submit(delete.from_rhs().into()).unwrap();
    assert_eq!(done.try_result(), Some(Ok(())));
    wm.flush().unwrap();

    assert!(handle.is_retracted());
    assert!(!handle.is_expired());
    assert!(!entries(&log).iter().any(|e| e.starts_with("A -")));
}

// =============================================================================
// Marshalling
// =============================================================================

#[test]
fn test_marshalling_replay() {
    struct Observer {
        id: TargetId,
        seen: Mutex<Vec<bool>>,
    }

    impl PropagationTarget for Observer {
        fn id(&self) -> &TargetId {
            &self.id
        }

        fn assert_propagation(
            &self,
            _handle: &Arc<FactHandle>,
            context: &PropagationContext,
            _wm: &WorkingMemory,
        ) -> Result<(), PropagationError> {
            self.seen.lock().unwrap().push(context.is_marshalling());
            Ok(())
        }

        fn expire_propagation(
            &self,
            _handle: &Arc<FactHandle>,
            _context: &PropagationContext,
            _wm: &WorkingMemory,
        ) -> Result<(), PropagationError> {
            Ok(())
        }
    }

    let log = new_log();
    let (wm, _timer) = pseudo_session(0, &log);
    let observer = Arc::new(Observer {
        id: TargetId::new("observer"),
        seen: Mutex::new(Vec::new()),
    });
    let conf = Arc::new(ObjectTypeConf::new("Order").with_target(observer.clone()));

    wm.insert(
        Arc::new(FactHandle::new("default", json!(1))),
        PropagationContext::insertion(),
        Arc::clone(&conf),
    )
    .unwrap();
    wm.flush_for_marshalling().unwrap();

    wm.insert(
        Arc::new(FactHandle::new("default", json!(2))),
        PropagationContext::insertion(),
        conf,
    )
    .unwrap();
    wm.flush().unwrap();

    assert_eq!(*observer.seen.lock().unwrap(), vec![true, false]);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_producers_keep_fifo_order() {
    const PRODUCERS: usize = 8;
    const PER_PRODUCER: usize = 50;

    let log = new_log();
    let (wm, _timer) = pseudo_session(0, &log);
    let wm = Arc::new(wm);
    let node = Node::new("A", -1, &log);
    let conf = Arc::new(ObjectTypeConf::new("Order").with_target(node));
    let submitted = Arc::new(Mutex::new(Vec::new()));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let wm = Arc::clone(&wm);
            let conf = Arc::clone(&conf);
            let submitted = Arc::clone(&submitted);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let label = format!("p{p}-{i}");
                    let handle = Arc::new(FactHandle::new("default", json!(label)));
                    // Holding the lock across submit pins the enqueue order.
                    let mut order = submitted.lock().unwrap();
                    wm.insert(handle, PropagationContext::insertion(), Arc::clone(&conf))
                        .unwrap();
                    order.push(format!("A +\"{label}\""));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert_eq!(wm.pending_actions(), PRODUCERS * PER_PRODUCER);
    assert_eq!(wm.flush().unwrap(), PRODUCERS * PER_PRODUCER);
    assert_eq!(entries(&log), *submitted.lock().unwrap());
}

#[test]
fn test_concurrent_rendezvous_apply_in_queue_order() {
    let timer = Arc::new(PseudoClockTimer::default());
    let wm = Arc::new(
        WorkingMemory::new(timer as Arc<dyn TimerService>, ConsumerMode::Worker)
            .with_rendezvous_timeout(Some(Duration::from_secs(5))),
    );
    let applied = Arc::new(Mutex::new(Vec::new()));

    let callers: Vec<_> = (1..=3u64)
        .map(|n| {
            let wm = Arc::clone(&wm);
            let applied = Arc::clone(&applied);
            thread::spawn(move || {
                wm.call(format!("square {n}"), move |_wm| {
                    applied.lock().unwrap().push(format!("square {n}"));
                    Ok(n * n)
                })
            })
        })
        .collect();

    while wm.pending_actions() < 3 {
        thread::sleep(Duration::from_millis(1));
    }
    let queued = wm.queue().pending_descriptions();
    assert_eq!(wm.flush().unwrap(), 3);

    let results: Vec<u64> = callers
        .into_iter()
        .map(|c| c.join().unwrap().unwrap())
        .collect();
    assert_eq!(results, vec![1, 4, 9]);
    assert_eq!(*applied.lock().unwrap(), queued);
}

#[test]
fn test_rule_consequence_inserts_run_later_in_same_flush() {
    let log = new_log();
    let (wm, _timer) = pseudo_session(0, &log);
    let node = Node::new("A", -1, &log);
    let conf = Arc::new(ObjectTypeConf::new("Order").with_target(node));

    let (rule, handle) = Rendezvous::new("rule fires", {
        let conf = Arc::clone(&conf);
        move |wm: &WorkingMemory| {
            wm.insert(
                Arc::new(FactHandle::new("default", json!("derived"))),
                PropagationContext::insertion().caused_by("derive", 1),
                conf,
            )?;
            Ok(wm.pending_actions())
        }
    });
    wm.insert(
        Arc::new(FactHandle::new("default", json!("seed"))),
        PropagationContext::insertion(),
        conf,
    )
    .unwrap();
    wm.submit(rule.into()).unwrap();

    assert_eq!(handle.get_result(), Ok(1));
    assert_eq!(wm.pending_actions(), 0);
    assert_eq!(entries(&log), vec![r#"A +"seed""#, r#"A +"derived""#]);
}

#[test]
fn test_failed_propagation_reaches_flusher() {
    struct Rejecting {
        id: TargetId,
    }

    impl PropagationTarget for Rejecting {
        fn id(&self) -> &TargetId {
            &self.id
        }

        fn assert_propagation(
            &self,
            _handle: &Arc<FactHandle>,
            _context: &PropagationContext,
            _wm: &WorkingMemory,
        ) -> Result<(), PropagationError> {
            Err(PropagationError::failed(self.id.as_str(), "no room"))
        }

        fn expire_propagation(
            &self,
            _handle: &Arc<FactHandle>,
            _context: &PropagationContext,
            _wm: &WorkingMemory,
        ) -> Result<(), PropagationError> {
            Ok(())
        }
    }

    let log = new_log();
    let (wm, _timer) = pseudo_session(0, &log);
    let conf = Arc::new(ObjectTypeConf::new("Order").with_target(Arc::new(Rejecting {
        id: TargetId::new("full"),
    })));

    wm.insert(Arc::new(FactHandle::new("default", json!(1))), PropagationContext::insertion(), conf)
        .unwrap();
    let err = wm.flush().unwrap_err();
    assert!(matches!(err, ActionError::Propagation(PropagationError::Failed { .. })));
    assert!(err.to_string().contains("no room"));
}

#[test]
fn test_unflushed_rendezvous_times_out() {
    let wm = WorkingMemory::new(Arc::new(PseudoClockTimer::default()), ConsumerMode::Worker);
    let handle = wm.submit_call("stuck", |_wm| Ok(())).unwrap();
    assert_eq!(
        handle.get_result_timeout(Duration::from_millis(20)),
        Err(RendezvousError::Timeout(Duration::from_millis(20)))
    );
}

// =============================================================================
// Worker mode
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_applies_concurrent_calls() {
    let log = new_log();
    let wm = Arc::new(
        WorkingMemory::new(Arc::new(PseudoClockTimer::default()), ConsumerMode::Worker)
            .with_rendezvous_timeout(Some(Duration::from_secs(5))),
    );
    let node = Node::new("A", -1, &log);
    let conf = Arc::new(ObjectTypeConf::new("Order").with_target(node));
    let worker = QueueWorker::spawn(Arc::clone(&wm));

    let mut tasks = Vec::new();
    for n in 0..4 {
        let wm = Arc::clone(&wm);
        let conf = Arc::clone(&conf);
        tasks.push(tokio::task::spawn_blocking(move || {
            wm.insert(
                Arc::new(FactHandle::new("default", json!(n))),
                PropagationContext::insertion(),
                conf,
            )?;
            wm.call(format!("ack {n}"), move |_wm| Ok(n))
        }));
    }
    for (n, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await.unwrap().unwrap(), n as i32);
    }

    assert_eq!(entries(&log).len(), 4);
    worker.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_realtime_expiration_with_worker() {
    let log = new_log();
    let timer = Arc::new(RealtimeTimer::from_current().unwrap());
    let wm = Arc::new(WorkingMemory::new(timer, ConsumerMode::Worker));
    let node = Node::new("A", 30, &log);
    let conf = Arc::new(ObjectTypeConf::new("Tick").event().with_concrete_target(node.clone()));
    let worker = QueueWorker::spawn(Arc::clone(&wm));

    let handle = Arc::new(FactHandle::new_event(
        "default",
        json!("live"),
        EventWindow::point(wm.current_time()),
    ));
    let report = wm
        .insert(Arc::clone(&handle), PropagationContext::insertion(), conf)
        .unwrap();
    assert_eq!(report.scheduled(), 1);

    tokio::time::timeout(Duration::from_secs(5), async {
        while !handle.is_expired() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("event should expire");
    assert!(!node.holds(&handle));

    worker.stop().await.unwrap();
}
