//! Typing presence for the active project.
//!
//! DESIGN
//! ======
//! Local typing is debounced: the first keystroke emits `Start`, further
//! keystrokes only push the idle deadline, and `Stop` goes out once the user
//! has been idle for `idle` (or submits). Continuous typing repeats `Start`
//! every half `ttl` so other members never expire a typer who is still
//! typing. Remote typers form a set of display
//! names, each expiring after `ttl` unless refreshed, so a lost stop signal
//! never leaves a name stuck on screen.
//!
//! All methods take `now` explicitly; the driver owns the clock.
//!
//! TRADE-OFFS
//! ==========
//! Nothing here is retried or persisted. A dropped signal costs at most one
//! `ttl` of wrong indicator.

#[cfg(test)]
#[path = "presence_test.rs"]
mod presence_test;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::transport::TypingSignal;

/// Inactivity after which local typing stops.
pub const DEFAULT_TYPING_IDLE: Duration = Duration::from_secs(2);

/// Lifetime of a remote typer without a refresh or stop signal.
pub const DEFAULT_TYPING_TTL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct PresenceTracker {
    local_name: String,
    idle: Duration,
    ttl: Duration,
    last_keystroke: Option<Instant>,
    last_start: Option<Instant>,
    typers: BTreeMap<String, Instant>,
}

impl PresenceTracker {
    #[must_use]
    pub fn new(local_name: impl Into<String>, idle: Duration, ttl: Duration) -> Self {
        Self { local_name: local_name.into(), idle, ttl, last_keystroke: None, last_start: None, typers: BTreeMap::new() }
    }

    /// Whether a `Start` has been emitted without a matching `Stop`.
    #[must_use]
    pub fn is_local_typing(&self) -> bool {
        self.last_keystroke.is_some()
    }

    /// Record a composer keystroke. Returns `Start` on the first one and
    /// again once half a `ttl` has passed since the last `Start`.
    pub fn on_local_keystroke(&mut self, now: Instant) -> Option<TypingSignal> {
        self.last_keystroke = Some(now);
        let due = self.last_start.is_none_or(|start| now.saturating_duration_since(start) >= self.ttl / 2);
        if !due {
            return None;
        }
        self.last_start = Some(now);
        Some(TypingSignal::Start)
    }

    /// The composer was submitted or cleared.
    pub fn on_local_submit(&mut self) -> Option<TypingSignal> {
        self.last_start = None;
        self.last_keystroke.take().map(|_| TypingSignal::Stop)
    }

    /// Advance timers: expire remote typers and stop local typing when idle.
    pub fn tick(&mut self, now: Instant) -> Option<TypingSignal> {
        self.expire(now);
        match self.last_keystroke {
            Some(last) if now.saturating_duration_since(last) >= self.idle => {
                self.last_keystroke = None;
                self.last_start = None;
                Some(TypingSignal::Stop)
            }
            _ => None,
        }
    }

    /// A remote typing signal. Our own echo is ignored.
    pub fn on_remote_typing(&mut self, user_name: &str, now: Instant) -> bool {
        if user_name == self.local_name {
            return false;
        }
        self.typers.insert(user_name.to_owned(), now + self.ttl).is_none()
    }

    /// A remote stop signal; without a name every typer is cleared.
    pub fn on_remote_stop(&mut self, user_name: Option<&str>) -> bool {
        match user_name {
            Some(name) => self.typers.remove(name).is_some(),
            None => {
                let had_any = !self.typers.is_empty();
                self.typers.clear();
                had_any
            }
        }
    }

    /// Drop typers whose ttl has passed. Returns whether any were dropped.
    pub fn expire(&mut self, now: Instant) -> bool {
        let before = self.typers.len();
        self.typers.retain(|_, expires| *expires > now);
        self.typers.len() != before
    }

    /// Names currently typing, sorted.
    pub fn typers(&self) -> impl Iterator<Item = &str> {
        self.typers.keys().map(String::as_str)
    }

    /// Human-readable indicator, or `None` when nobody is typing.
    #[must_use]
    pub fn indicator_text(&self) -> Option<String> {
        let names: Vec<&str> = self.typers().collect();
        match names.as_slice() {
            [] => None,
            [one] => Some(format!("{one} is typing…")),
            [a, b] => Some(format!("{a} and {b} are typing…")),
            _ => Some("Several people are typing…".to_owned()),
        }
    }
}
