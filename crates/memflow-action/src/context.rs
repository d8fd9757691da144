//! Propagation context: causality metadata attached to every action.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_PROPAGATION: AtomicU64 = AtomicU64::new(1);

/// The kind of mutation a context describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationKind {
    Insertion,
    Modification,
    Deletion,
    Expiration,
}

impl fmt::Display for PropagationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropagationKind::Insertion => write!(f, "insertion"),
            PropagationKind::Modification => write!(f, "modification"),
            PropagationKind::Deletion => write!(f, "deletion"),
            PropagationKind::Expiration => write!(f, "expiration"),
        }
    }
}

/// The rule activation whose consequence produced an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOrigin {
    pub rule: String,
    pub activation: u64,
}

/// Causality and bookkeeping for one propagation.
#[derive(Debug, Clone)]
pub struct PropagationContext {
    number: u64,
    kind: PropagationKind,
    origin: Option<RuleOrigin>,
    marshalling: bool,
    restoring: bool,
}

impl PropagationContext {
    pub fn new(kind: PropagationKind) -> Self {
        Self {
            number: NEXT_PROPAGATION.fetch_add(1, Ordering::Relaxed),
            kind,
            origin: None,
            marshalling: false,
            restoring: false,
        }
    }

    pub fn insertion() -> Self {
        Self::new(PropagationKind::Insertion)
    }

    pub fn modification() -> Self {
        Self::new(PropagationKind::Modification)
    }

    pub fn deletion() -> Self {
        Self::new(PropagationKind::Deletion)
    }

    pub fn expiration() -> Self {
        Self::new(PropagationKind::Expiration)
    }

    /// Attribute the propagation to a firing rule's consequence.
    pub fn caused_by(mut self, rule: impl Into<String>, activation: u64) -> Self {
        self.origin = Some(RuleOrigin {
            rule: rule.into(),
            activation,
        });
        self
    }

    /// Mark the propagation as part of a session restore. Restored sessions
    /// bring their own timer state, so no expiration is scheduled for it.
    pub fn restoring(mut self) -> Self {
        self.restoring = true;
        self
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn kind(&self) -> PropagationKind {
        self.kind
    }

    pub fn origin(&self) -> Option<&RuleOrigin> {
        self.origin.as_ref()
    }

    /// True when produced while a rule consequence executes.
    pub fn is_called_from_rhs(&self) -> bool {
        self.origin.is_some()
    }

    pub fn is_restoring(&self) -> bool {
        self.restoring
    }

    pub fn is_marshalling(&self) -> bool {
        self.marshalling
    }

    pub fn set_marshalling(&mut self, marshalling: bool) {
        self.marshalling = marshalling;
    }
}
