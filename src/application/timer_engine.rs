//! Pomodoro state machine.
//!
//! The engine is synchronous and owns no clock: callers drive it with one
//! `tick()` per elapsed second. A phase of d seconds completes on its d-th
//! tick; a countdown restored at zero completes on the next tick.

use crate::domain::models::{Phase, Settings, TimerState};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimerEvent {
    /// Carries the configured work duration, never the elapsed time.
    FocusCompleted { duration_minutes: u32 },
    BreakCompleted { long_break: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerEngine {
    settings: Settings,
    phase: Phase,
    time_left: u32,
    session_count: u32,
    running: bool,
}

impl TimerEngine {
    pub fn new(settings: Settings) -> Self {
        let time_left = settings.phase_seconds(Phase::Focus);
        Self {
            settings,
            phase: Phase::Focus,
            time_left,
            session_count: 0,
            running: false,
        }
    }

    /// Rebuilds an engine from a persisted snapshot. The countdown is clamped
    /// into the phase range and the engine is always paused.
    pub fn restore(settings: Settings, state: &TimerState) -> Self {
        let phase = state.phase();
        let time_left = state.time_left.min(settings.phase_seconds(phase));
        Self {
            settings,
            phase,
            time_left,
            session_count: state.session_count,
            running: false,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn time_left(&self) -> u32 {
        self.time_left
    }

    pub fn session_count(&self) -> u32 {
        self.session_count
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start(&mut self) -> bool {
        let changed = !self.running;
        self.running = true;
        changed
    }

    pub fn pause(&mut self) -> bool {
        let changed = self.running;
        self.running = false;
        changed
    }

    pub fn toggle(&mut self) -> bool {
        self.running = !self.running;
        self.running
    }

    pub fn reset(&mut self) {
        self.time_left = self.settings.phase_seconds(self.phase);
        self.running = false;
    }

    pub fn tick(&mut self) -> Option<TimerEvent> {
        if !self.running {
            return None;
        }
        if self.time_left > 0 {
            self.time_left -= 1;
        }
        if self.time_left == 0 {
            return Some(self.complete_phase(true));
        }
        None
    }

    /// Completes the current phase immediately. Always leaves the engine paused.
    pub fn skip(&mut self) -> TimerEvent {
        self.complete_phase(false)
    }

    /// A paused engine restarts the current phase at its new length. A running
    /// countdown keeps its remaining time unless that exceeds the new length,
    /// in which case it is clamped to it.
    pub fn apply_settings(&mut self, settings: Settings) {
        self.settings = settings;
        let limit = self.settings.phase_seconds(self.phase);
        if self.running {
            self.time_left = self.time_left.min(limit);
        } else {
            self.time_left = limit;
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> TimerState {
        TimerState {
            time_left: self.time_left,
            is_break: self.phase.is_break(),
            is_long_break: self.phase.is_long_break(),
            session_count: self.session_count,
            updated_at: now,
        }
    }

    fn complete_phase(&mut self, natural: bool) -> TimerEvent {
        let (next_phase, event, auto_start) = match self.phase {
            Phase::Focus => {
                self.session_count = self.session_count.saturating_add(1);
                let cycle = self.settings.sessions_before_long_break.max(1);
                let next_phase = if self.session_count % cycle == 0 {
                    Phase::LongBreak
                } else {
                    Phase::ShortBreak
                };
                let event = TimerEvent::FocusCompleted {
                    duration_minutes: self.settings.work_duration,
                };
                (next_phase, event, self.settings.auto_start_breaks)
            }
            Phase::ShortBreak | Phase::LongBreak => {
                let event = TimerEvent::BreakCompleted {
                    long_break: self.phase.is_long_break(),
                };
                (Phase::Focus, event, self.settings.auto_start_pomodoros)
            }
        };

        self.phase = next_phase;
        self.time_left = self.settings.phase_seconds(next_phase);
        self.running = natural && auto_start;
        event
    }
}
