//! Event-stream simulation on the configured clock.
//!
//! A pseudo clock is stepped by hand, so runs are deterministic. A realtime
//! clock is followed by sleeping, and expirations fire from tokio tasks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;

use memflow_action::{
    ActionError, ConfiguredTimer, EntryPoint, EventWindow, FactHandle, ObjectTypeConf,
    PropagationContext, PropagationError, PropagationTarget, QueueWorker, TimerService,
    WorkingMemory,
};
use memflow_core::config::MemflowConfig;
use memflow_core::types::{ConsumerMode, TargetId, Timestamp};

use crate::cli::SimulateArgs;

/// Totals printed at the end of a simulation.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationReport {
    pub events: u32,
    pub asserted: usize,
    pub expired: usize,
    pub retracted: usize,
    pub scheduled: usize,
    pub immediate: usize,
    pub skipped: usize,
    pub pending_jobs: usize,
    pub final_time_ms: i64,
}

#[derive(Default)]
struct Counters {
    asserted: AtomicUsize,
    expired: AtomicUsize,
    retracted: AtomicUsize,
}

struct CountingNode {
    id: TargetId,
    offset: i64,
    counters: Arc<Counters>,
}

impl PropagationTarget for CountingNode {
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
        wm: &WorkingMemory,
    ) -> Result<(), PropagationError> {
        self.counters.asserted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(target_node = %self.id, fact = %handle, now = %wm.current_time(), "Asserted");
        Ok(())
    }

    fn expire_propagation(
        &self,
        handle: &Arc<FactHandle>,
        _context: &PropagationContext,
        wm: &WorkingMemory,
    ) -> Result<(), PropagationError> {
        self.counters.expired.fetch_add(1, Ordering::Relaxed);
        tracing::info!(target_node = %self.id, fact = %handle, now = %wm.current_time(), "Expired");
        Ok(())
    }
}

struct CountingPartition {
    counters: Arc<Counters>,
}

impl EntryPoint for CountingPartition {
    fn name(&self) -> &str {
        "default"
    }

    fn modify_propagation(
        &self,
        _handle: &Arc<FactHandle>,
        _context: &PropagationContext,
        _type_conf: &ObjectTypeConf,
        _wm: &WorkingMemory,
    ) -> Result<(), PropagationError> {
        Ok(())
    }

    fn retract_propagation(
        &self,
        handle: &Arc<FactHandle>,
        context: &PropagationContext,
        _type_conf: &ObjectTypeConf,
        _wm: &WorkingMemory,
    ) -> Result<(), PropagationError> {
        self.counters.retracted.fetch_add(1, Ordering::Relaxed);
        tracing::info!(fact = %handle, kind = %context.kind(), "Retracted");
        Ok(())
    }
}

/// Run a simulation synchronously. A realtime clock or worker mode needs the
/// caller to be inside a multi-threaded tokio runtime: timer jobs run as
/// tasks and the worker drains on the blocking pool while this thread waits.
pub fn run(config: &MemflowConfig, args: &SimulateArgs) -> Result<SimulationReport, ActionError> {
    let timer = ConfiguredTimer::from_config(&config.timer)?;
    let clock = timer.service();
    let wm = Arc::new(WorkingMemory::from_config(&config.queue, Arc::clone(&clock)));
    let counters = Arc::new(Counters::default());
    wm.register_entry_point(Arc::new(CountingPartition {
        counters: Arc::clone(&counters),
    }));

    let worker = match wm.consumer_mode() {
        ConsumerMode::Worker => Some(QueueWorker::spawn(Arc::clone(&wm))),
        ConsumerMode::Passive => None,
    };

    let conf = Arc::new(type_conf(args, &counters));
    let mut report = SimulationReport {
        events: args.events,
        ..SimulationReport::default()
    };
    let start = clock.current_time();

    tracing::info!(
        events = args.events,
        step_ms = args.step_ms,
        offset_ms = args.offset_ms,
        targets = args.targets,
        mode = %wm.consumer_mode(),
        clock = %clock.clock_type(),
        "Simulation started"
    );

    for i in 0..args.events {
        let at = start.saturating_offset(i64::from(i).saturating_mul(args.step_ms as i64));
        move_to(&timer, at);
        let handle = Arc::new(FactHandle::new_event(
            "default",
            json!({ "seq": i }),
            EventWindow {
                start: at,
                duration_ms: args.duration_ms,
            },
        ));
        let decisions = wm.insert(handle, PropagationContext::insertion(), Arc::clone(&conf))?;
        report.scheduled += decisions.scheduled();
        report.immediate += decisions.immediate();
        report.skipped += decisions.skipped();
        settle(&wm)?;
    }

    // Walk the clock forward until every finite deadline has passed. The
    // extra step leaves a realtime job room to fire after its deadline.
    let step = args.step_ms.max(1);
    let horizon = clock
        .current_time()
        .saturating_offset(args.duration_ms.max(0))
        .saturating_offset(args.offset_ms.max(0))
        .saturating_offset(step as i64);
    while clock.pending_jobs() > 0 && clock.current_time() < horizon {
        let next = clock.current_time().saturating_offset(step as i64);
        move_to(&timer, next);
        settle(&wm)?;
    }
    settle(&wm)?;

    report.asserted = counters.asserted.load(Ordering::Relaxed);
    report.expired = counters.expired.load(Ordering::Relaxed);
    report.retracted = counters.retracted.load(Ordering::Relaxed);
    report.pending_jobs = clock.pending_jobs();
    report.final_time_ms = clock.current_time().0;

    drop(worker);
    tracing::info!(expired = report.expired, final_time = %Timestamp(report.final_time_ms), "Simulation finished");
    Ok(report)
}

fn type_conf(args: &SimulateArgs, counters: &Arc<Counters>) -> ObjectTypeConf {
    let mut conf = ObjectTypeConf::new("SimEvent").event();
    for i in 0..args.targets {
        let node = Arc::new(CountingNode {
            id: TargetId::new(format!("node-{i}")),
            offset: args.offset_ms,
            counters: Arc::clone(counters),
        });
        conf = if i == 0 {
            conf.with_concrete_target(node)
        } else {
            conf.with_target(node)
        };
    }
    if args.targets == 0 {
        conf = conf.with_expiration_offset(args.offset_ms);
    }
    conf
}

/// Bring the clock to `at`: set a pseudo clock, sleep out a realtime one.
fn move_to(timer: &ConfiguredTimer, at: Timestamp) {
    match timer {
        ConfiguredTimer::Pseudo(pseudo) => {
            pseudo.set_time(at);
        }
        ConfiguredTimer::Realtime(realtime) => {
            let wait = realtime.current_time().millis_until(at);
            if wait > 0 {
                std::thread::sleep(Duration::from_millis(wait));
            }
        }
    }
}

/// Apply everything queued so far.
fn settle(wm: &WorkingMemory) -> Result<(), ActionError> {
    match wm.consumer_mode() {
        ConsumerMode::Passive => {
            wm.flush()?;
        }
        // The barrier runs after every earlier entry has been applied.
        ConsumerMode::Worker => {
            wm.call("settle", |_wm| Ok(()))?;
        }
    }
    Ok(())
}
