//! Recording network doubles shared by unit tests.

use crate::context::PropagationContext;
use crate::error::PropagationError;
use crate::fact::FactHandle;
use crate::memory::WorkingMemory;
use crate::network::{EntryPoint, ObjectTypeConf, PropagationTarget};
use crate::timer::PseudoClockTimer;
use memflow_core::types::{ConsumerMode, TargetId, Timestamp};
use std::sync::{Arc, Mutex};

pub(crate) type CallLog = Arc<Mutex<Vec<String>>>;

/// Target that records every propagation as a line of text.
pub(crate) struct RecordingTarget {
    id: TargetId,
    offset: i64,
    fail: bool,
    log: CallLog,
}

impl RecordingTarget {
    pub(crate) fn new(name: &str, offset: i64) -> (Arc<dyn PropagationTarget>, CallLog) {
        let log = CallLog::default();
        let target = Self::sharing(name, offset, &log);
        (target, log)
    }

    /// A target writing to an existing log.
    pub(crate) fn sharing(name: &str, offset: i64, log: &CallLog) -> Arc<dyn PropagationTarget> {
        Arc::new(Self {
            id: TargetId::new(name),
            offset,
            fail: false,
            log: Arc::clone(log),
        })
    }

    /// A target that rejects every propagation.
    pub(crate) fn failing(name: &str) -> (Arc<dyn PropagationTarget>, CallLog) {
        let log = CallLog::default();
        let target = Arc::new(Self {
            id: TargetId::new(name),
            offset: -1,
            fail: true,
            log: Arc::clone(&log),
        });
        (target, log)
    }
}

impl PropagationTarget for RecordingTarget {
    fn id(&self) -> &TargetId {
        &self.id
    }

    fn expiration_offset(&self) -> i64 {
        self.offset
    }

    fn assert_propagation(
        &self,
        handle: &Arc<FactHandle>,
        context: &PropagationContext,
        _wm: &WorkingMemory,
    ) -> Result<(), PropagationError> {
        if self.fail {
            return Err(PropagationError::failed(self.id.as_str(), "rejected"));
        }
        self.log.lock().unwrap().push(format!(
            "assert {} {} marshalling={}",
            self.id,
            handle,
            context.is_marshalling()
        ));
        Ok(())
    }

    fn expire_propagation(
        &self,
        handle: &Arc<FactHandle>,
        _context: &PropagationContext,
        _wm: &WorkingMemory,
    ) -> Result<(), PropagationError> {
        if self.fail {
            return Err(PropagationError::failed(self.id.as_str(), "rejected"));
        }
        self.log
            .lock()
            .unwrap()
            .push(format!("expire {} {}", self.id, handle));
        Ok(())
    }
}

/// Entry point that records modify/retract calls.
pub(crate) struct RecordingEntryPoint {
    name: String,
    log: CallLog,
}

impl RecordingEntryPoint {
    pub(crate) fn new(name: &str) -> (Arc<dyn EntryPoint>, CallLog) {
        let log = CallLog::default();
        let entry_point = Arc::new(Self {
            name: name.to_string(),
            log: Arc::clone(&log),
        });
        (entry_point, log)
    }
}

impl EntryPoint for RecordingEntryPoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn modify_propagation(
        &self,
        _handle: &Arc<FactHandle>,
        _context: &PropagationContext,
        type_conf: &ObjectTypeConf,
        _wm: &WorkingMemory,
    ) -> Result<(), PropagationError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("modify {} {}", self.name, type_conf.type_name()));
        Ok(())
    }

    fn retract_propagation(
        &self,
        _handle: &Arc<FactHandle>,
        context: &PropagationContext,
        type_conf: &ObjectTypeConf,
        _wm: &WorkingMemory,
    ) -> Result<(), PropagationError> {
        self.log.lock().unwrap().push(format!(
            "retract {} {} ({})",
            self.name,
            type_conf.type_name(),
            context.kind()
        ));
        Ok(())
    }
}

/// Passive working memory on a pseudo clock starting at `start_ms`.
pub(crate) fn pseudo_memory(start_ms: i64) -> (WorkingMemory, Arc<PseudoClockTimer>) {
    let timer = Arc::new(PseudoClockTimer::new(Timestamp(start_ms)));
    let wm = WorkingMemory::new(Arc::clone(&timer) as _, ConsumerMode::Passive);
    (wm, timer)
}
