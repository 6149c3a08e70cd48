//! Per-requester conversation state for collecting a scan target.
//!
//! Each requester has at most one [`Session`]. A session walks
//! `Idle -> AwaitingAddressChoice -> (AwaitingCapture | AwaitingManualAddress) -> ScanInFlight`
//! and returns to `Idle` through [`ConversationController::finish`]. Since every message
//! from a requester reaches the controller, the phase doubles as the duplicate guard:
//! a second choice or a second address in the same flow is ignored, and nothing can
//! start a scan while one is in flight.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::types::{ChatId, ScanRequest};

pub const REPORT_COMMAND: &str = "/report";
pub const CURRENT_ADDRESS_LABEL: &str = "Current IP";
pub const OTHER_ADDRESS_LABEL: &str = "Other IP";

// A dotted quad not glued to further digits or dots, so `1.2.3.1234` never shrinks to `1.2.3.123`.
static RE_IPV4: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^\d.])(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})(?:$|[^\d.])").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingAddressChoice,
    AwaitingCapture,
    AwaitingManualAddress,
    ScanInFlight,
}

/// Classified inbound text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Report,
    CurrentAddress,
    OtherAddress,
    Text(String),
}

impl Inbound {
    pub fn classify(text: &str) -> Self {
        let trimmed = text.trim();
        let command = trimmed.split_whitespace().next().unwrap_or("");
        let command = command.split('@').next().unwrap_or(command);
        if command == REPORT_COMMAND {
            Inbound::Report
        } else if trimmed == CURRENT_ADDRESS_LABEL {
            Inbound::CurrentAddress
        } else if trimmed == OTHER_ADDRESS_LABEL {
            Inbound::OtherAddress
        } else {
            Inbound::Text(trimmed.to_string())
        }
    }
}

/// What the intake layer should do in response to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    PromptChoice,
    SendCaptureLink,
    PromptManualAddress,
    StartScan(ScanRequest),
    InvalidAddress,
    Busy,
    Ignore,
}

/// Result of an auto-captured address arriving for a requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Started(ScanRequest),
    NotRequested,
    Busy,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub phase: Phase,
    /// Incremented every time `/report` starts a new flow.
    pub flow: u64,
    last_activity: Instant,
}

impl Session {
    fn new(now: Instant) -> Self {
        Self {
            phase: Phase::Idle,
            flow: 0,
            last_activity: now,
        }
    }
}

/// Extract the first standalone IPv4 literal in `text`, if it is a valid address.
pub fn extract_ipv4(text: &str) -> Option<Ipv4Addr> {
    RE_IPV4.captures(text)?.get(1)?.as_str().parse().ok()
}

#[derive(Debug)]
pub struct ConversationController {
    sessions: Mutex<HashMap<ChatId, Session>>,
    ttl: Duration,
}

impl ConversationController {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn with_session<R>(&self, chat: ChatId, now: Instant, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let ttl = self.ttl;
        sessions.retain(|_, s| {
            s.phase == Phase::ScanInFlight || now.saturating_duration_since(s.last_activity) < ttl
        });
        let session = sessions.entry(chat).or_insert_with(|| Session::new(now));
        session.last_activity = now;
        f(session)
    }

    /// Advance the requester's session for one inbound message.
    pub fn handle(&self, chat: ChatId, inbound: Inbound, now: Instant) -> Action {
        self.with_session(chat, now, |session| {
            let action = match (session.phase, inbound) {
                (Phase::ScanInFlight, Inbound::Report) => Action::Busy,
                (Phase::ScanInFlight, _) => Action::Ignore,
                (_, Inbound::Report) => {
                    session.flow += 1;
                    session.phase = Phase::AwaitingAddressChoice;
                    Action::PromptChoice
                }
                (Phase::AwaitingAddressChoice, Inbound::CurrentAddress) => {
                    session.phase = Phase::AwaitingCapture;
                    Action::SendCaptureLink
                }
                (Phase::AwaitingAddressChoice, Inbound::OtherAddress) => {
                    session.phase = Phase::AwaitingManualAddress;
                    Action::PromptManualAddress
                }
                (Phase::AwaitingManualAddress, Inbound::Text(text)) => match extract_ipv4(&text) {
                    Some(ip) => {
                        session.phase = Phase::ScanInFlight;
                        Action::StartScan(ScanRequest::new(ip.to_string(), chat))
                    }
                    None => Action::InvalidAddress,
                },
                _ => Action::Ignore,
            };
            debug!(chat, flow = session.flow, phase = ?session.phase, ?action, "conversation step");
            action
        })
    }

    /// An address captured out-of-band for this requester.
    pub fn capture(&self, chat: ChatId, address: &str, now: Instant) -> CaptureOutcome {
        self.with_session(chat, now, |session| match session.phase {
            Phase::AwaitingCapture => {
                session.phase = Phase::ScanInFlight;
                CaptureOutcome::Started(ScanRequest::new(address, chat))
            }
            Phase::ScanInFlight => CaptureOutcome::Busy,
            _ => CaptureOutcome::NotRequested,
        })
    }

    /// The requester's scan has completed or failed.
    pub fn finish(&self, chat: ChatId) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = sessions.get_mut(&chat) {
            session.phase = Phase::Idle;
            session.last_activity = Instant::now();
        }
    }

    pub fn phase(&self, chat: ChatId) -> Phase {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(&chat).map(|s| s.phase).unwrap_or(Phase::Idle)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
