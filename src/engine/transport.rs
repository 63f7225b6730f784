//! Transport State Machine
//!
//! Tracks the timeline playhead against the output device clock.
//! While playing, the position is derived from the device time:
//! `paused_offset + (now - playback_start_reference)`, capped at the
//! timeline length. The transport never touches audio itself; the
//! scheduler drives it alongside the voices it starts and stops.

use std::fmt;

use tracing::{debug, info};

/// Transport states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    /// Position is 0 and nothing plays (default state)
    #[default]
    Stopped,
    /// Audio is actively playing
    Playing,
    /// Playback halted, position kept
    Paused,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Stopped => write!(f, "Stopped"),
            TransportState::Playing => write!(f, "Playing"),
            TransportState::Paused => write!(f, "Paused"),
        }
    }
}

/// Playhead position and transport state
#[derive(Debug, Clone, Default)]
pub struct Transport {
    /// Current transport state
    state: TransportState,

    /// Last computed playhead position (seconds)
    current_time: f64,

    /// Timeline position playback started (or resumed) from
    paused_offset: f64,

    /// Device time at which playback started
    playback_start_reference: f64,
}

impl Transport {
    /// Create a stopped transport at position 0
    ///
    /// # Example
    /// ```
    /// use layerdeck::engine::Transport;
    /// let transport = Transport::new();
    /// assert!(transport.is_stopped());
    /// assert_eq!(transport.current_time(), 0.0);
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Start playing from the current position at device time `now`
    pub fn start(&mut self, now: f64) {
        self.paused_offset = self.current_time;
        self.playback_start_reference = now;
        self.state = TransportState::Playing;
        info!(position = self.current_time, "transport playing");
    }

    /// Freeze the playhead where it is
    ///
    /// State transitions:
    /// - Playing -> Paused
    /// - Paused -> Paused (no-op)
    /// - Stopped -> Stopped (no-op)
    pub fn pause(&mut self) {
        match self.state {
            TransportState::Playing => {
                self.paused_offset = self.current_time;
                self.state = TransportState::Paused;
                info!(position = self.current_time, "transport paused");
            }
            TransportState::Paused => {
                debug!("already paused");
            }
            TransportState::Stopped => {
                debug!("pause ignored while stopped");
            }
        }
    }

    /// Reset to position 0
    ///
    /// State transitions: Any -> Stopped
    pub fn stop(&mut self) {
        self.state = TransportState::Stopped;
        self.current_time = 0.0;
        self.paused_offset = 0.0;
        info!("transport stopped");
    }

    /// Move the playhead without changing state
    ///
    /// # Arguments
    /// * `position` - Target position in seconds (clamped to >= 0)
    pub fn seek(&mut self, position: f64) {
        let position = if position.is_finite() {
            position.max(0.0)
        } else {
            0.0
        };
        self.current_time = position;
        self.paused_offset = position;
        debug!(position, "seek");
    }

    /// Recompute the playhead from the device clock
    ///
    /// Returns `true` when the playhead reached `limit` (the timeline end).
    /// Does nothing unless playing.
    pub fn advance(&mut self, now: f64, limit: f64) -> bool {
        if self.state != TransportState::Playing {
            return false;
        }
        self.current_time = self.position_at(now, limit);
        self.current_time >= limit
    }

    /// Playhead position at device time `now`, without updating state
    pub fn position_at(&self, now: f64, limit: f64) -> f64 {
        match self.state {
            TransportState::Playing => {
                let elapsed = (now - self.playback_start_reference).max(0.0);
                (self.paused_offset + elapsed).min(limit)
            }
            TransportState::Paused | TransportState::Stopped => self.current_time,
        }
    }

    // ========================================================================
    // State Queries
    // ========================================================================

    /// Last computed playhead position in seconds
    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    /// Position playback last started from
    pub fn paused_offset(&self) -> f64 {
        self.paused_offset
    }

    /// Device time playback last started at
    pub fn playback_start_reference(&self) -> f64 {
        self.playback_start_reference
    }

    /// Get the current transport state
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Check if transport is currently playing
    pub fn is_playing(&self) -> bool {
        self.state == TransportState::Playing
    }

    /// Check if transport is currently paused
    pub fn is_paused(&self) -> bool {
        self.state == TransportState::Paused
    }

    /// Check if transport is stopped
    pub fn is_stopped(&self) -> bool {
        self.state == TransportState::Stopped
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // ------------------------------------------------------------------------
    // State Transition Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_default_state_is_stopped() {
        let transport = Transport::new();
        assert!(transport.is_stopped());
        assert_eq!(transport.state(), TransportState::Stopped);
        assert_eq!(transport.current_time(), 0.0);
    }

    #[test]
    fn test_start_records_reference() {
        let mut transport = Transport::new();
        transport.seek(3.0);
        transport.start(100.0);

        assert!(transport.is_playing());
        assert_eq!(transport.paused_offset(), 3.0);
        assert_eq!(transport.playback_start_reference(), 100.0);
    }

    #[test]
    fn test_pause_keeps_position() {
        let mut transport = Transport::new();
        transport.start(10.0);
        transport.advance(12.5, 60.0);
        transport.pause();

        assert!(transport.is_paused());
        assert_relative_eq!(transport.current_time(), 2.5);
        assert_relative_eq!(transport.paused_offset(), 2.5);

        // Device time passing while paused does not move the playhead
        transport.advance(50.0, 60.0);
        assert_relative_eq!(transport.current_time(), 2.5);
    }

    #[test]
    fn test_resume_continues_from_pause() {
        let mut transport = Transport::new();
        transport.start(0.0);
        transport.advance(4.0, 60.0);
        transport.pause();
        transport.start(20.0);
        transport.advance(21.0, 60.0);
        assert_relative_eq!(transport.current_time(), 5.0);
    }

    #[test]
    fn test_stop_resets_position() {
        let mut transport = Transport::new();
        transport.start(0.0);
        transport.advance(7.0, 60.0);
        transport.stop();

        assert!(transport.is_stopped());
        assert_eq!(transport.current_time(), 0.0);
        assert_eq!(transport.paused_offset(), 0.0);
    }

    #[test]
    fn test_pause_while_stopped_is_noop() {
        let mut transport = Transport::new();
        transport.pause();
        assert!(transport.is_stopped());
    }

    // ------------------------------------------------------------------------
    // Position Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_advance_caps_at_limit() {
        let mut transport = Transport::new();
        transport.start(0.0);
        assert!(!transport.advance(9.0, 10.0));
        assert!(transport.advance(11.0, 10.0));
        assert_eq!(transport.current_time(), 10.0);
    }

    #[test]
    fn test_position_at_does_not_mutate() {
        let mut transport = Transport::new();
        transport.start(1.0);
        assert_relative_eq!(transport.position_at(3.0, 60.0), 2.0);
        assert_eq!(transport.current_time(), 0.0);
    }

    #[test]
    fn test_seek_clamps_negative() {
        let mut transport = Transport::new();
        transport.seek(-4.0);
        assert_eq!(transport.current_time(), 0.0);
        transport.seek(f64::NAN);
        assert_eq!(transport.current_time(), 0.0);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(TransportState::Playing.to_string(), "Playing");
        assert_eq!(TransportState::Paused.to_string(), "Paused");
        assert_eq!(TransportState::Stopped.to_string(), "Stopped");
    }
}
