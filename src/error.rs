//! Error type for credit accounting.

use thiserror::Error;

use crate::types::{PipeIndex, PortId, Priority, Tick};

/// Errors raised by the regulator and its components.
///
/// Every variant marks a model-consistency bug upstream of the regulator.
/// Callers that mirror hardware behavior treat them as fatal (see
/// `PexCreditRegulator::tick_or_abort`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CreditError {
    #[error(
        "credit overflow on pipe {pipe} port {port} priority {priority} at tick {tick}: \
         {in_use} credits in use exceeds limit {limit}"
    )]
    CreditOverflow {
        pipe: PipeIndex,
        port: PortId,
        priority: Priority,
        in_use: u64,
        limit: u32,
        tick: Tick,
    },

    #[error(
        "credit underflow on pipe {pipe} port {port} priority {priority} at tick {tick}: \
         return without an outstanding credit"
    )]
    CreditUnderflow {
        pipe: PipeIndex,
        port: PortId,
        priority: Priority,
        tick: Tick,
    },

    #[error("pipe {pipe} out of range (chip has {pipes} pipes)")]
    PipeOutOfRange { pipe: PipeIndex, pipes: usize },

    #[error("port {port} out of range (pipe has {ports} ports)")]
    PortOutOfRange { port: PortId, ports: usize },

    #[error("priority {priority} out of range ({priorities} priorities per port)")]
    PriorityOutOfRange { priority: Priority, priorities: usize },

    #[error("regulator for pipe {pipe} used before init")]
    NotInitialized { pipe: PipeIndex },

    #[error("invalid layout: {0}")]
    InvalidLayout(String),
}

/// Result type for credit operations.
pub type CreditResult<T> = Result<T, CreditError>;
