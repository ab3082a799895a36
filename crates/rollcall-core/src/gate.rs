//! Consecutive-hit confirmation gate and the shared status channel.
//!
//! Every processed frame yields `compliance_a && compliance_b && stable`.
//! A run of passing frames increments the hit counter and any failing frame
//! zeroes it. The first time the counter reaches the configured count the
//! gate confirms: exactly once per machine, with the visible signals frozen
//! to all-true until an explicit reset.

use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

pub const DEFAULT_REQUIRED_HITS: u32 = 4;

/// Raw per-frame signals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GateSignals {
    pub compliance_a: bool,
    pub compliance_b: bool,
    pub stable: bool,
}

impl GateSignals {
    pub const ALL_TRUE: Self = Self {
        compliance_a: true,
        compliance_b: true,
        stable: true,
    };

    pub fn passed(&self) -> bool {
        self.compliance_a && self.compliance_b && self.stable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    Unconfirmed,
    Confirmed,
}

/// Result of observing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Still unconfirmed.
    Pending,
    /// This frame confirmed the gate. The caller owns the handoff side effect.
    Confirmed,
    /// Confirmed on an earlier frame; nothing new to do.
    AlreadyConfirmed,
}

/// Externally visible view of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateSnapshot {
    pub compliance_a: bool,
    pub compliance_b: bool,
    pub stable: bool,
    pub passed: bool,
    pub consecutive_hits: u32,
    pub handed_off: bool,
}

pub struct GateStateMachine {
    required_hits: u32,
    consecutive_hits: u32,
    /// One-way latch; cleared only by building a new machine.
    confirmed: bool,
    /// Visible signals pinned to all-true. Set on confirmation, cleared by reset.
    frozen: bool,
    last_signals: GateSignals,
}

impl GateStateMachine {
    /// `required_hits` below 1 is treated as 1.
    pub fn new(required_hits: u32) -> Self {
        Self {
            required_hits: required_hits.max(1),
            consecutive_hits: 0,
            confirmed: false,
            frozen: false,
            last_signals: GateSignals::default(),
        }
    }

    pub fn observe(&mut self, signals: GateSignals) -> Transition {
        self.last_signals = signals;
        self.consecutive_hits = if signals.passed() {
            self.consecutive_hits.saturating_add(1)
        } else {
            0
        };

        if self.confirmed {
            return Transition::AlreadyConfirmed;
        }
        if self.consecutive_hits >= self.required_hits {
            self.confirmed = true;
            self.frozen = true;
            return Transition::Confirmed;
        }
        Transition::Pending
    }

    /// Clear the counter and signals for a fresh attempt. The confirmation
    /// latch survives: a confirmed machine never confirms a second time.
    pub fn reset(&mut self) {
        self.consecutive_hits = 0;
        self.last_signals = GateSignals::default();
        self.frozen = false;
    }

    pub fn snapshot(&self) -> GateSnapshot {
        let shown = if self.frozen {
            GateSignals::ALL_TRUE
        } else {
            self.last_signals
        };
        GateSnapshot {
            compliance_a: shown.compliance_a,
            compliance_b: shown.compliance_b,
            stable: shown.stable,
            passed: shown.passed(),
            consecutive_hits: self.consecutive_hits,
            handed_off: self.confirmed,
        }
    }

    pub fn phase(&self) -> GatePhase {
        if self.confirmed {
            GatePhase::Confirmed
        } else {
            GatePhase::Unconfirmed
        }
    }

    pub fn consecutive_hits(&self) -> u32 {
        self.consecutive_hits
    }

    pub fn required_hits(&self) -> u32 {
        self.required_hits
    }
}

/// Lock-guarded gate shared between the inference worker (the only writer
/// of frame observations) and status readers.
#[derive(Clone)]
pub struct StatusChannel {
    inner: Arc<Mutex<GateStateMachine>>,
}

impl StatusChannel {
    pub fn new(required_hits: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(GateStateMachine::new(required_hits))),
        }
    }

    pub fn observe(&self, signals: GateSignals) -> Transition {
        self.lock().observe(signals)
    }

    pub fn snapshot(&self) -> GateSnapshot {
        self.lock().snapshot()
    }

    pub fn reset(&self) {
        self.lock().reset();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateStateMachine> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
