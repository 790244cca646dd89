//! Connection state machine.
//!
//! An explicit enum FSM: every protocol event is an [`Input`], every
//! transition returns the [`Action`] the connection must execute. The
//! machine itself performs no I/O and is strictly serial; the connection
//! guards it with a per-connection mutex.

use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame};

/// Size of the automatic ping nonce.
pub const PING_NONCE_LEN: usize = 16;

/// Connection lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    /// Frames flow in both directions.
    Open {
        /// When the outstanding ping was sent, if any.
        last_ping: Option<Instant>,
    },
    /// A close frame has been sent; awaiting the peer's.
    Closing {
        /// We initiated the close (as opposed to echoing the peer's).
        initiated_locally: bool,
    },
    /// Close handshake complete or connection torn down.
    Closed {
        /// The peer's close frame, when one was observed.
        frame: Option<CloseFrame>,
    },
}

/// Protocol events fed into the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Local close requested.
    Close(CloseFrame),
    /// Peer's close frame arrived (`None` for an empty payload).
    ReceivedClose(Option<CloseFrame>),
    /// Auto-ping interval fired.
    PingTick,
    /// A pong arrived.
    ReceivedPong(Vec<u8>),
    /// A ping arrived.
    ReceivedPing(Vec<u8>),
}

/// What the connection must do after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Nothing.
    None,
    /// Write a close frame.
    SendClose(CloseFrame),
    /// Write a ping with this nonce.
    SendPing([u8; PING_NONCE_LEN]),
    /// Write a pong echoing this payload.
    SendPong(Vec<u8>),
    /// A ping is already outstanding and still within its period.
    Wait,
    /// The ping scheduler is no longer needed.
    Stop,
    /// Force-close with this code (pong never arrived).
    CloseConnection(CloseCode),
}

/// The per-connection protocol state machine.
#[derive(Debug)]
pub struct StateMachine {
    state: State,
    ping_period: Option<Duration>,
    /// Nonce buffer for automatic pings; refilled in place, never resized.
    ping_nonce: [u8; PING_NONCE_LEN],
}

impl StateMachine {
    /// A machine in the `Open` state. `ping_period` feeds the pong
    /// deadline check; `None` when auto-ping is disabled.
    #[must_use]
    pub fn new(ping_period: Option<Duration>) -> Self {
        Self {
            state: State::Open { last_ping: None },
            ping_period,
            ping_nonce: [0u8; PING_NONCE_LEN],
        }
    }

    /// Whether user writes are currently accepted.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open { .. })
    }

    /// Whether the close handshake has completed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed { .. })
    }

    /// The peer's close frame, once `Closed`.
    #[must_use]
    pub fn close_frame(&self) -> Option<&CloseFrame> {
        match &self.state {
            State::Closed { frame } => frame.as_ref(),
            _ => None,
        }
    }

    /// The current ping nonce buffer. Its length is fixed at
    /// [`PING_NONCE_LEN`] for the life of the connection.
    #[must_use]
    pub fn ping_nonce(&self) -> &[u8] {
        &self.ping_nonce
    }

    /// Feed one input, producing the action to execute.
    ///
    /// # Errors
    ///
    /// `Error::Io` only when the entropy source fails while arming a ping.
    pub fn step(&mut self, input: Input) -> Result<Action> {
        match input {
            Input::Close(frame) => Ok(self.on_close(frame)),
            Input::ReceivedClose(frame) => Ok(self.on_received_close(frame)),
            Input::PingTick => self.on_ping_tick(),
            Input::ReceivedPong(data) => Ok(self.on_received_pong(data)),
            Input::ReceivedPing(data) => Ok(self.on_received_ping(data)),
        }
    }

    fn on_close(&mut self, frame: CloseFrame) -> Action {
        match self.state {
            State::Open { .. } => {
                log::debug!("close initiated locally: {:?}", frame.code);
                self.state = State::Closing {
                    initiated_locally: true,
                };
                Action::SendClose(frame)
            }
            State::Closing { .. } | State::Closed { .. } => Action::None,
        }
    }

    fn on_received_close(&mut self, frame: Option<CloseFrame>) -> Action {
        match self.state {
            State::Open { .. } => {
                log::debug!("peer closed first: {:?}", frame);
                self.state = State::Closed { frame };
                // Echo a normal close regardless of the peer's code.
                Action::SendClose(CloseFrame::normal())
            }
            State::Closing { initiated_locally } => {
                log::debug!(
                    "close handshake complete (initiated_locally={}): {:?}",
                    initiated_locally,
                    frame
                );
                self.state = State::Closed { frame };
                Action::None
            }
            State::Closed { .. } => Action::None,
        }
    }

    fn on_ping_tick(&mut self) -> Result<Action> {
        let last_ping = match self.state {
            State::Open { last_ping } => last_ping,
            State::Closing { .. } | State::Closed { .. } => return Ok(Action::Stop),
        };

        match last_ping {
            None => {
                getrandom::getrandom(&mut self.ping_nonce)
                    .map_err(|e| Error::Io(format!("entropy source failed: {}", e)))?;
                self.state = State::Open {
                    last_ping: Some(Instant::now()),
                };
                Ok(Action::SendPing(self.ping_nonce))
            }
            Some(sent_at) => {
                let within_period = self
                    .ping_period
                    .is_some_and(|period| sent_at.elapsed() < period);
                if within_period {
                    Ok(Action::Wait)
                } else {
                    log::warn!("pong never arrived within the ping period, closing");
                    Ok(Action::CloseConnection(CloseCode::InternalError))
                }
            }
        }
    }

    fn on_received_pong(&mut self, data: Vec<u8>) -> Action {
        if let State::Open {
            last_ping: last_ping @ Some(_),
        } = &mut self.state
        {
            if data == self.ping_nonce {
                *last_ping = None;
            }
        }
        Action::None
    }

    fn on_received_ping(&mut self, data: Vec<u8>) -> Action {
        match self.state {
            State::Open { .. } => Action::SendPong(data),
            State::Closing { .. } | State::Closed { .. } => Action::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_machine() -> StateMachine {
        StateMachine::new(Some(Duration::from_millis(50)))
    }

    #[test]
    fn test_initial_state_is_open() {
        let sm = open_machine();
        assert!(sm.is_open());
        assert!(!sm.is_closed());
        assert!(sm.close_frame().is_none());
    }

    #[test]
    fn test_local_close_transitions_to_closing() {
        let mut sm = open_machine();
        let action = sm.step(Input::Close(CloseFrame::normal())).unwrap();
        assert_eq!(action, Action::SendClose(CloseFrame::normal()));
        assert!(!sm.is_open());
        assert!(!sm.is_closed());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut sm = open_machine();
        sm.step(Input::Close(CloseFrame::normal())).unwrap();
        let action = sm
            .step(Input::Close(CloseFrame::new(CloseCode::GoingAway)))
            .unwrap();
        assert_eq!(action, Action::None);
    }

    #[test]
    fn test_peer_close_first_is_echoed_with_normal() {
        let mut sm = open_machine();
        let peer = CloseFrame::with_reason(CloseCode::GoingAway, "bye");
        let action = sm.step(Input::ReceivedClose(Some(peer.clone()))).unwrap();
        // The echo is always a normal closure, whatever the peer sent.
        assert_eq!(action, Action::SendClose(CloseFrame::normal()));
        assert!(sm.is_closed());
        assert_eq!(sm.close_frame(), Some(&peer));
    }

    #[test]
    fn test_close_echo_completes_handshake() {
        let mut sm = open_machine();
        sm.step(Input::Close(CloseFrame::normal())).unwrap();
        let echo = CloseFrame::normal();
        let action = sm.step(Input::ReceivedClose(Some(echo.clone()))).unwrap();
        assert_eq!(action, Action::None);
        assert!(sm.is_closed());
        assert_eq!(sm.close_frame(), Some(&echo));
    }

    #[test]
    fn test_close_settles_on_first_seen_frame() {
        let mut sm = open_machine();
        sm.step(Input::Close(CloseFrame::normal())).unwrap();
        let first = CloseFrame::new(CloseCode::GoingAway);
        sm.step(Input::ReceivedClose(Some(first.clone()))).unwrap();

        // Further closes change nothing and emit nothing.
        let action = sm
            .step(Input::ReceivedClose(Some(CloseFrame::normal())))
            .unwrap();
        assert_eq!(action, Action::None);
        let action = sm.step(Input::Close(CloseFrame::normal())).unwrap();
        assert_eq!(action, Action::None);
        assert_eq!(sm.close_frame(), Some(&first));
    }

    #[test]
    fn test_empty_close_payload_observed_as_none() {
        let mut sm = open_machine();
        sm.step(Input::ReceivedClose(None)).unwrap();
        assert!(sm.is_closed());
        assert!(sm.close_frame().is_none());
    }

    #[test]
    fn test_ping_tick_sends_nonce_and_records_time() {
        let mut sm = open_machine();
        let action = sm.step(Input::PingTick).unwrap();
        match action {
            Action::SendPing(nonce) => assert_eq!(nonce.len(), PING_NONCE_LEN),
            other => panic!("expected SendPing, got {:?}", other),
        }
    }

    #[test]
    fn test_ping_tick_waits_within_period() {
        let mut sm = open_machine();
        sm.step(Input::PingTick).unwrap();
        let action = sm.step(Input::PingTick).unwrap();
        assert_eq!(action, Action::Wait);
    }

    #[test]
    fn test_ping_tick_times_out_after_period() {
        let mut sm = StateMachine::new(Some(Duration::from_millis(0)));
        sm.step(Input::PingTick).unwrap();
        let action = sm.step(Input::PingTick).unwrap();
        assert_eq!(action, Action::CloseConnection(CloseCode::InternalError));
    }

    #[test]
    fn test_matching_pong_clears_outstanding_ping() {
        let mut sm = open_machine();
        let nonce = match sm.step(Input::PingTick).unwrap() {
            Action::SendPing(nonce) => nonce,
            other => panic!("expected SendPing, got {:?}", other),
        };

        sm.step(Input::ReceivedPong(nonce.to_vec())).unwrap();

        // Cleared: the next tick sends a fresh ping instead of waiting.
        let action = sm.step(Input::PingTick).unwrap();
        assert!(matches!(action, Action::SendPing(_)));
    }

    #[test]
    fn test_mismatched_pong_ignored() {
        let mut sm = open_machine();
        sm.step(Input::PingTick).unwrap();
        sm.step(Input::ReceivedPong(b"not-the-nonce".to_vec()))
            .unwrap();

        let action = sm.step(Input::PingTick).unwrap();
        assert_eq!(action, Action::Wait);
    }

    #[test]
    fn test_ping_nonce_buffer_is_stable() {
        let mut sm = open_machine();
        for _ in 0..5 {
            let nonce = match sm.step(Input::PingTick).unwrap() {
                Action::SendPing(nonce) => nonce,
                other => panic!("expected SendPing, got {:?}", other),
            };
            assert_eq!(sm.ping_nonce().len(), PING_NONCE_LEN);
            sm.step(Input::ReceivedPong(nonce.to_vec())).unwrap();
        }
        assert_eq!(sm.ping_nonce().len(), PING_NONCE_LEN);
    }

    #[test]
    fn test_ping_tick_stops_when_not_open() {
        let mut sm = open_machine();
        sm.step(Input::Close(CloseFrame::normal())).unwrap();
        assert_eq!(sm.step(Input::PingTick).unwrap(), Action::Stop);

        sm.step(Input::ReceivedClose(None)).unwrap();
        assert_eq!(sm.step(Input::PingTick).unwrap(), Action::Stop);
    }

    #[test]
    fn test_received_ping_answered_while_open_only() {
        let mut sm = open_machine();
        let action = sm.step(Input::ReceivedPing(b"probe".to_vec())).unwrap();
        assert_eq!(action, Action::SendPong(b"probe".to_vec()));

        sm.step(Input::Close(CloseFrame::normal())).unwrap();
        let action = sm.step(Input::ReceivedPing(b"probe".to_vec())).unwrap();
        assert_eq!(action, Action::None);
    }

    #[test]
    fn test_pong_ignored_when_closing() {
        let mut sm = open_machine();
        sm.step(Input::Close(CloseFrame::normal())).unwrap();
        let action = sm.step(Input::ReceivedPong(vec![1, 2, 3])).unwrap();
        assert_eq!(action, Action::None);
    }
}
