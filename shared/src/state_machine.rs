//! Wake Cycle State Machine
//!
//! Defines the phases of one wake cycle, the events that move between them,
//! and the broker session states used while syncing configuration.

/// Phases of a single wake cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Boot,
    NetworkUp,
    ConfigSynced,
    Measured,
    Delivered,
    Accounted,
    /// Terminal; the next wake re-enters `Boot`
    Sleeping,
}

/// Events that can trigger phase transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEvent {
    /// Wireless link came up
    LinkUp,
    /// Wireless link failed or timed out
    LinkFailed,
    /// Broker session finished, successfully or not
    ConfigSessionEnded,
    /// Sensor produced a normalized value
    MeasurementTaken,
    /// Sensor read failed
    ReadFailed,
    /// Delivery strategies ran to completion
    DeliveryFinished,
    /// Statistics updated
    AccountingDone,
    /// Next wake computed
    SleepScheduled,
}

/// Result of a transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and the phase changed
    Success(CyclePhase),
    /// Transition was invalid from the current phase
    Invalid { from: CyclePhase, event: CycleEvent },
}

/// The cycle state machine, created fresh on every wake
#[derive(Debug)]
pub struct CycleStateMachine {
    current_phase: CyclePhase,
    early_exit: bool,
}

impl Default for CycleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleStateMachine {
    /// Create a new state machine in Boot phase
    pub fn new() -> Self {
        Self {
            current_phase: CyclePhase::Boot,
            early_exit: false,
        }
    }

    /// Get current phase
    pub fn phase(&self) -> CyclePhase {
        self.current_phase
    }

    /// True if the cycle skipped straight to sleep after a link failure
    pub fn exited_early(&self) -> bool {
        self.early_exit
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: CycleEvent) -> TransitionResult {
        match self.get_next_phase(event) {
            Some(phase) => {
                if event == CycleEvent::LinkFailed {
                    self.early_exit = true;
                }
                self.current_phase = phase;
                TransitionResult::Success(phase)
            }
            None => TransitionResult::Invalid {
                from: self.current_phase,
                event,
            },
        }
    }

    /// Get the next phase for a given event, if the transition is valid
    fn get_next_phase(&self, event: CycleEvent) -> Option<CyclePhase> {
        use CycleEvent::*;
        use CyclePhase::*;

        match (self.current_phase, event) {
            (Boot, LinkUp) => Some(NetworkUp),
            // Early exit: nothing else runs this cycle
            (Boot, LinkFailed) => Some(Sleeping),

            (NetworkUp, ConfigSessionEnded) => Some(ConfigSynced),

            (ConfigSynced, MeasurementTaken) => Some(Measured),
            // A read failure skips delivery entirely
            (ConfigSynced, ReadFailed) => Some(Accounted),

            (Measured, DeliveryFinished) => Some(Delivered),
            (Delivered, AccountingDone) => Some(Accounted),
            (Accounted, SleepScheduled) => Some(Sleeping),

            _ => None,
        }
    }
}

/// States of one broker session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Subscribed,
    ConnectFailed,
    Listening,
    SessionEnded,
}

/// Check if a session state change is valid
pub fn is_valid_session_transition(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;

    matches!(
        (from, to),
        (Disconnected, Connecting)
            // Retries stay in Connecting
            | (Connecting, Connecting)
            | (Connecting, Subscribed)
            | (Connecting, ConnectFailed)
            | (Subscribed, Listening)
            | (Listening, SessionEnded)
            | (ConnectFailed, SessionEnded)
    )
}
