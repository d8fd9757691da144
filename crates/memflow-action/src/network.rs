//! Boundary with the propagation network.
//!
//! Defines the `PropagationTarget` and `EntryPoint` traits implemented by the
//! match network, and the per-type configuration that lists which targets
//! are interested in a fact type.

use crate::context::PropagationContext;
use crate::error::PropagationError;
use crate::fact::FactHandle;
use crate::memory::WorkingMemory;
use memflow_core::types::TargetId;
use std::fmt;
use std::sync::Arc;

/// Expiration offset meaning "never expire".
pub const NEVER_EXPIRES: i64 = i64::MAX;

/// Expiration offset meaning "no offset configured".
pub const NO_EXPIRATION_OFFSET: i64 = -1;

/// A node of the match network interested in facts of one type.
pub trait PropagationTarget: Send + Sync {
    /// Stable name of the target.
    fn id(&self) -> &TargetId;

    /// How long after an event ends this target still needs it, in
    /// milliseconds. Negative means not configured.
    fn expiration_offset(&self) -> i64 {
        NO_EXPIRATION_OFFSET
    }

    /// Propagate a newly inserted fact.
    fn assert_propagation(
        &self,
        handle: &Arc<FactHandle>,
        context: &PropagationContext,
        wm: &WorkingMemory,
    ) -> Result<(), PropagationError>;

    /// Remove an expired event from this target's memory.
    fn expire_propagation(
        &self,
        handle: &Arc<FactHandle>,
        context: &PropagationContext,
        wm: &WorkingMemory,
    ) -> Result<(), PropagationError>;
}

/// A named partition of working memory that owns modify and retract
/// propagation for its facts.
pub trait EntryPoint: Send + Sync {
    fn name(&self) -> &str;

    fn modify_propagation(
        &self,
        handle: &Arc<FactHandle>,
        context: &PropagationContext,
        type_conf: &ObjectTypeConf,
        wm: &WorkingMemory,
    ) -> Result<(), PropagationError>;

    fn retract_propagation(
        &self,
        handle: &Arc<FactHandle>,
        context: &PropagationContext,
        type_conf: &ObjectTypeConf,
        wm: &WorkingMemory,
    ) -> Result<(), PropagationError>;
}

/// Per-type configuration: the interested targets in registration order,
/// whether the type is temporal, and its default expiration offset.
#[derive(Clone)]
pub struct ObjectTypeConf {
    type_name: String,
    is_event: bool,
    targets: Vec<Arc<dyn PropagationTarget>>,
    has_concrete_target: bool,
    expiration_offset: i64,
}

impl ObjectTypeConf {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            is_event: false,
            targets: Vec::new(),
            has_concrete_target: false,
            expiration_offset: NO_EXPIRATION_OFFSET,
        }
    }

    /// Declare the type temporal.
    pub fn event(mut self) -> Self {
        self.is_event = true;
        self
    }

    /// Register a target that matches the type through a supertype or
    /// interface.
    pub fn with_target(mut self, target: Arc<dyn PropagationTarget>) -> Self {
        self.targets.push(target);
        self
    }

    /// Register the target that matches exactly this type. Its offset governs
    /// expiration, so the type-level default is no longer scheduled.
    pub fn with_concrete_target(mut self, target: Arc<dyn PropagationTarget>) -> Self {
        self.has_concrete_target = true;
        self.targets.push(target);
        self
    }

    /// Default expiration offset used when no concrete target exists.
    pub fn with_expiration_offset(mut self, offset_ms: i64) -> Self {
        self.expiration_offset = offset_ms;
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn is_event(&self) -> bool {
        self.is_event
    }

    pub fn targets(&self) -> &[Arc<dyn PropagationTarget>] {
        &self.targets
    }

    pub fn has_concrete_target(&self) -> bool {
        self.has_concrete_target
    }

    pub fn expiration_offset(&self) -> i64 {
        self.expiration_offset
    }
}

impl fmt::Debug for ObjectTypeConf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let targets: Vec<&str> = self.targets.iter().map(|t| t.id().as_str()).collect();
        f.debug_struct("ObjectTypeConf")
            .field("type_name", &self.type_name)
            .field("is_event", &self.is_event)
            .field("targets", &targets)
            .field("has_concrete_target", &self.has_concrete_target)
            .field("expiration_offset", &self.expiration_offset)
            .finish()
    }
}
