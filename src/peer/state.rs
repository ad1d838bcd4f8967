//! Per-transport state holders.
//!
//! These replace the process-wide globals: each transport session owns one
//! channel slot and one connectivity tracker.

use crate::peer::types::TransportConnectivityState;
use std::sync::{Mutex, PoisonError};

/// Holds the single control channel of a transport session.
///
/// The first channel offered is kept; every later one is handed back so the
/// caller can close it.
#[derive(Debug)]
pub struct ChannelSlot<T> {
    inner: Mutex<Option<T>>,
}

impl<T: Clone> ChannelSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// `Err(channel)` when a channel is already held
    pub fn capture(&self, channel: T) -> Result<(), T> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() {
            return Err(channel);
        }
        *guard = Some(channel);
        Ok(())
    }

    pub fn get(&self) -> Option<T> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn take(&self) -> Option<T> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl<T: Clone> Default for ChannelSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A connectivity observation that changed something
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityChange {
    pub from: TransportConnectivityState,
    pub to: TransportConnectivityState,
    /// True only for the first time the transport reaches `connected`
    pub first_connect: bool,
}

/// Filters raw connectivity reports down to real transitions
#[derive(Debug)]
pub struct ConnectivityTracker {
    state: TransportConnectivityState,
    connected_once: bool,
}

impl ConnectivityTracker {
    pub fn new() -> Self {
        Self {
            state: TransportConnectivityState::New,
            connected_once: false,
        }
    }

    pub fn state(&self) -> TransportConnectivityState {
        self.state
    }

    /// Returns `None` for repeats and for anything after a terminal state
    pub fn observe(&mut self, next: TransportConnectivityState) -> Option<ConnectivityChange> {
        if next == self.state || self.state.is_terminal() {
            return None;
        }
        let first_connect = next == TransportConnectivityState::Connected && !self.connected_once;
        if first_connect {
            self.connected_once = true;
        }
        let change = ConnectivityChange {
            from: self.state,
            to: next,
            first_connect,
        };
        self.state = next;
        Some(change)
    }
}

impl Default for ConnectivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransportConnectivityState::*;

    #[test]
    fn test_slot_keeps_first_channel() {
        let slot = ChannelSlot::new();
        assert!(slot.is_empty());
        assert_eq!(slot.capture("first"), Ok(()));
        assert_eq!(slot.capture("second"), Err("second"));
        assert_eq!(slot.capture("third"), Err("third"));
        assert_eq!(slot.get(), Some("first"));
    }

    #[test]
    fn test_slot_take_empties() {
        let slot = ChannelSlot::new();
        slot.capture(1u32).unwrap();
        assert_eq!(slot.take(), Some(1));
        assert!(slot.is_empty());
    }

    #[test]
    fn test_repeated_connected_is_idempotent() {
        let mut tracker = ConnectivityTracker::new();
        assert!(tracker.observe(Connecting).is_some());
        let change = tracker.observe(Connected).unwrap();
        assert!(change.first_connect);
        assert_eq!(change.from, Connecting);
        assert!(tracker.observe(Connected).is_none());
        assert!(tracker.observe(Connected).is_none());
        assert_eq!(tracker.state(), Connected);
    }

    #[test]
    fn test_terminal_states_stick() {
        let mut tracker = ConnectivityTracker::new();
        tracker.observe(Connected);
        let change = tracker.observe(Failed).unwrap();
        assert_eq!(change.to, Failed);
        assert!(!change.first_connect);
        assert!(tracker.observe(Connected).is_none());
        assert!(tracker.observe(Closed).is_none());
        assert_eq!(tracker.state(), Failed);
    }

    #[test]
    fn test_new_is_ignored_initially() {
        let mut tracker = ConnectivityTracker::new();
        assert!(tracker.observe(New).is_none());
    }
}
