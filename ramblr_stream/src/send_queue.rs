//! Serialized, paced outbound writes.
//!
//! The backend corrupts interleaved rapid writes, so at most one message is
//! in flight and consecutive transmits are separated by the pacing delay.
//! Nothing is buffered across a disconnect.

use std::collections::VecDeque;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainStep {
    /// Transmit this message, then wait the pacing delay before the next step.
    Transmit(String),
    /// The transport is not open; this many queued messages were discarded.
    Dropped(usize),
    /// Nothing left to send.
    Idle,
}

#[derive(Debug, Default)]
pub struct SendQueue {
    pending: VecDeque<String>,
    sending: bool,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends to the tail. Returns `true` when the caller must start
    /// draining (nothing was being sent).
    pub fn enqueue(&mut self, message: String) -> bool {
        debug!(chars = message.len(), queued = self.pending.len() + 1, "queued message");
        self.pending.push_back(message);
        if self.sending {
            false
        } else {
            self.sending = true;
            true
        }
    }

    pub fn drain_step(&mut self, transport_open: bool) -> DrainStep {
        if self.pending.is_empty() {
            self.sending = false;
            return DrainStep::Idle;
        }
        if !transport_open {
            let dropped = self.pending.len();
            self.clear();
            warn!(dropped, "websocket not open, clearing send queue");
            return DrainStep::Dropped(dropped);
        }
        match self.pending.pop_front() {
            Some(message) => {
                self.sending = true;
                DrainStep::Transmit(message)
            }
            None => {
                self.sending = false;
                DrainStep::Idle
            }
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.sending = false;
    }

    pub fn is_sending(&self) -> bool {
        self.sending
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
