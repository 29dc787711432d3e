//! Security mode and the pass-key pairing state machine.
//!
//! ```text
//!  Idle ──request──▶ PassKeyRequested ──notify──▶ PassKeyNotified
//!   ▲                                                   │
//!   └──────── AuthenticationComplete(ok | fail) ◀───────┘
//! ```
//!
//! Transport callbacks never call into this type directly: the
//! [`LoopHandle`](super::controller::LoopHandle) answers the synchronous
//! parts (fixed pass key, approvals) and enqueues the transitions, so the
//! observers below always run on the loop thread.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Default fixed pass key.
pub const DEFAULT_PASS_KEY: u32 = 123_456;

/// Highest pass key representable in six digits.
pub const MAX_PASS_KEY: u32 = 999_999;

/// How links to the controller are protected.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// Open link, plain attribute permissions.
    Disabled,
    /// Secure connections with MITM protection and bonding.
    #[default]
    Encrypted,
    /// Bonding without MITM protection.
    Bonded,
}

impl SecurityMode {
    pub const fn is_enabled(self) -> bool {
        !matches!(self, Self::Disabled)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Encrypted => "encrypted",
            Self::Bonded => "bonded",
        }
    }
}

/// Render a pass key as shown to the user: six digits, zero padded.
pub fn format_pass_key(pass_key: u32) -> String {
    format!("{:06}", pass_key)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Idle,
    PassKeyRequested,
    PassKeyNotified { pass_key: u32 },
}

/// Tracks the single in-flight pairing session and fans its events out to
/// registered observers.
pub struct PairingStateMachine {
    state: PairingState,
    last_outcome: Option<bool>,
    show_pass_key: Vec<Box<dyn FnMut(&str)>>,
    authentication_complete: Vec<Box<dyn FnMut(bool)>>,
}

impl PairingStateMachine {
    pub fn new() -> Self {
        Self {
            state: PairingState::Idle,
            last_outcome: None,
            show_pass_key: Vec::new(),
            authentication_complete: Vec::new(),
        }
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    /// Outcome of the most recent completed session.
    pub fn last_outcome(&self) -> Option<bool> {
        self.last_outcome
    }

    pub fn add_on_show_pass_key(&mut self, observer: impl FnMut(&str) + 'static) {
        self.show_pass_key.push(Box::new(observer));
    }

    pub fn add_on_authentication_complete(&mut self, observer: impl FnMut(bool) + 'static) {
        self.authentication_complete.push(Box::new(observer));
    }

    pub fn has_show_pass_key_observer(&self) -> bool {
        !self.show_pass_key.is_empty()
    }

    /// The peer asked us for a pass key.
    pub fn pass_key_requested(&mut self) {
        if self.state != PairingState::Idle {
            warn!("pairing: pass key requested while {:?}, restarting session", self.state);
        }
        info!("pairing: pass key requested");
        self.state = PairingState::PassKeyRequested;
    }

    /// The stack wants `pass_key` displayed to the user.
    pub fn pass_key_notified(&mut self, pass_key: u32) {
        if matches!(self.state, PairingState::PassKeyNotified { .. }) {
            warn!("pairing: second pass key notification in one session");
        }
        self.state = PairingState::PassKeyNotified { pass_key };

        let shown = format_pass_key(pass_key);
        info!("pairing: showing pass key to user");
        for observer in &mut self.show_pass_key {
            observer(&shown);
        }
    }

    pub fn security_requested(&mut self) {
        debug!("pairing: security request approved ({:?})", self.state);
    }

    pub fn pin_confirmed(&mut self, pin: u32) {
        debug!("pairing: numeric comparison {} approved", format_pass_key(pin));
    }

    /// Session finished; observers run, then the machine returns to `Idle`.
    pub fn authentication_completed(&mut self, success: bool) {
        if success {
            info!("pairing: authentication complete");
        } else {
            warn!("pairing: authentication failed");
        }
        self.last_outcome = Some(success);
        for observer in &mut self.authentication_complete {
            observer(success);
        }
        self.state = PairingState::Idle;
    }

    /// Drop a half-finished session (peer went away).
    pub fn reset(&mut self) {
        if self.state != PairingState::Idle {
            info!("pairing: session abandoned in {:?}", self.state);
        }
        self.state = PairingState::Idle;
    }
}

impl Default for PairingStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
