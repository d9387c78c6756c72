use crate::error::FaultReason;
use heapless::Vec;
use serde::{Deserialize, Serialize};

pub const MAX_FAULT_HISTORY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub id: u32,
    pub reason: FaultReason,
    /// Milliseconds since the engine started.
    pub raised_at_ms: u64,
    pub resolved_at_ms: Option<u64>,
    /// Times the same fault was reported again while active.
    pub repeats: u16,
}

impl FaultRecord {
    pub fn is_active(&self) -> bool {
        self.resolved_at_ms.is_none()
    }
}

/// Bounded in-memory fault history. The oldest record is dropped when full.
#[derive(Debug, Default)]
pub struct FaultLog {
    history: Vec<FaultRecord, MAX_FAULT_HISTORY>,
    next_id: u32,
}

impl FaultLog {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            next_id: 1,
        }
    }

    /// Record a fault, or bump the repeat count if the same reason is still active.
    pub fn raise(&mut self, reason: FaultReason, now_ms: u64) -> u32 {
        if let Some(active) = self
            .history
            .iter_mut()
            .find(|f| f.reason == reason && f.is_active())
        {
            active.repeats = active.repeats.saturating_add(1);
            return active.id;
        }

        let id = self.next_id.max(1);
        self.next_id = id.wrapping_add(1);

        if self.history.is_full() {
            self.history.remove(0);
        }
        let _ = self.history.push(FaultRecord {
            id,
            reason,
            raised_at_ms: now_ms,
            resolved_at_ms: None,
            repeats: 0,
        });
        id
    }

    /// Mark every active fault resolved. Returns how many were closed.
    pub fn resolve_all(&mut self, now_ms: u64) -> usize {
        let mut closed = 0;
        for fault in self.history.iter_mut().filter(|f| f.is_active()) {
            fault.resolved_at_ms = Some(now_ms);
            closed += 1;
        }
        closed
    }

    pub fn active(&self) -> impl Iterator<Item = &FaultRecord> {
        self.history.iter().filter(|f| f.is_active())
    }

    pub fn history(&self) -> &[FaultRecord] {
        &self.history
    }
}
