//! Event intake queues.
//!
//! Each intake owns one unbounded FIFO. Producers append through
//! [`IntakeSender`] handles at any point before a tick; the regulator drains
//! the queue to empty once per tick, strictly in arrival order.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::CreditResult;
use crate::event::{CreditEvent, CreditEventKind};
use crate::types::PipeLayout;

type SharedQueue = Arc<Mutex<VecDeque<CreditEvent>>>;

/// Producer side of an intake queue.
///
/// Cloneable and `Send`; pushing never blocks beyond the queue lock.
/// Events from one handle keep their order.
#[derive(Clone, Debug)]
pub struct IntakeSender {
    layout: PipeLayout,
    queue: SharedQueue,
}

impl IntakeSender {
    /// Appends an event after checking it addresses a real slot.
    pub fn send(&self, event: CreditEvent) -> CreditResult<()> {
        self.layout.slot(event.port, event.priority)?;
        self.queue.lock().push_back(event);
        Ok(())
    }
}

/// Consumer side of an intake queue, owned by the regulator.
#[derive(Debug)]
pub struct EventIntake {
    kind: CreditEventKind,
    layout: PipeLayout,
    queue: SharedQueue,
    drained_total: u64,
}

impl EventIntake {
    /// Creates an empty queue for `kind` events addressed within `layout`.
    pub fn new(kind: CreditEventKind, layout: PipeLayout) -> Self {
        Self {
            kind,
            layout,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            drained_total: 0,
        }
    }

    /// New producer handle for this queue.
    pub fn sender(&self) -> IntakeSender {
        IntakeSender {
            layout: self.layout,
            queue: Arc::clone(&self.queue),
        }
    }

    /// Appends an event from the owning thread.
    pub fn push(&self, event: CreditEvent) -> CreditResult<()> {
        self.layout.slot(event.port, event.priority)?;
        self.queue.lock().push_back(event);
        Ok(())
    }

    /// Events waiting for the next drain.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether this queue carries dequeues or returns.
    pub fn kind(&self) -> CreditEventKind {
        self.kind
    }

    /// Events applied over the intake's lifetime.
    pub fn drained_total(&self) -> u64 {
        self.drained_total
    }

    /// Applies every pending event in FIFO order.
    ///
    /// Events pushed while the drain runs wait for the next tick. If `apply`
    /// fails, the failing event and every event after it stay queued in
    /// their original order and the error is returned.
    pub fn drain<F>(&mut self, mut apply: F) -> CreditResult<usize>
    where
        F: FnMut(CreditEvent) -> CreditResult<()>,
    {
        let mut batch = std::mem::take(&mut *self.queue.lock());
        let mut applied = 0;

        while let Some(event) = batch.pop_front() {
            if let Err(err) = apply(event) {
                batch.push_front(event);
                let mut queue = self.queue.lock();
                batch.append(&mut queue);
                *queue = batch;
                self.drained_total += applied as u64;
                tracing::debug!(
                    kind = %self.kind,
                    applied,
                    left = queue.len(),
                    "drain stopped at failing event"
                );
                return Err(err);
            }
            applied += 1;
        }

        self.drained_total += applied as u64;
        Ok(applied)
    }
}
