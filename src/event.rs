//! Credit events exchanged with the scheduler and the PEX stage.
//!
//! Both directions carry the same `(port, priority)` pair; the queue an event
//! is submitted to decides whether it takes or returns a credit.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{PortId, Priority};

/// One credit movement for a (port, priority).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CreditEvent {
    /// Port within the pipe
    pub port: PortId,
    /// Priority within the port
    pub priority: Priority,
}

impl CreditEvent {
    pub fn new(port: PortId, priority: Priority) -> Self {
        Self { port, priority }
    }
}

impl fmt::Display for CreditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port {} priority {}", self.port, self.priority)
    }
}

/// The scheduler handed one packet toward PEX.
pub type DequeueEvent = CreditEvent;

/// PEX retired the credit of a previously dequeued packet.
pub type ReturnEvent = CreditEvent;

/// Which intake queue an event travels through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditEventKind {
    /// Takes a credit
    Dequeue,
    /// Gives a credit back
    Return,
}

impl fmt::Display for CreditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreditEventKind::Dequeue => write!(f, "dequeue"),
            CreditEventKind::Return => write!(f, "return"),
        }
    }
}
