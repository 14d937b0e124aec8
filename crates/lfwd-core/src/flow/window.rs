//! Channel window management.
//!
//! Each channel has two independent windows:
//! - [`SendWindow`]: credit the peer has granted us. Shared between the
//!   pump that sends data and the session task that applies window adjusts.
//! - [`ReceiveWindow`]: credit we have granted the peer. Owned by the
//!   channel's receive state and consulted whenever the inbound buffer
//!   changes size.
//!
//! Receive credit is a function of inbound buffer occupancy only. Whether the
//! local application has read anything is irrelevant to it.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::constants::LOW_WATER_DIVISOR;
use crate::{Error, Result};

// =============================================================================
// Send Window
// =============================================================================

#[derive(Debug)]
struct SendState {
    credit: u32,
    closed: bool,
}

/// Send-side credit for one channel.
#[derive(Debug)]
pub struct SendWindow {
    state: Mutex<SendState>,
    notify: Notify,
}

impl SendWindow {
    /// Create a send window with the peer's initial grant.
    pub fn new(initial: u32) -> Self {
        Self {
            state: Mutex::new(SendState {
                credit: initial,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SendState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current credit in bytes.
    pub fn available(&self) -> u32 {
        self.lock().credit
    }

    /// Whether `n` bytes could be sent right now.
    pub fn can_send(&self, n: usize) -> bool {
        let state = self.lock();
        !state.closed && n <= state.credit as usize
    }

    /// Deduct `n` bytes of credit.
    ///
    /// Fails with [`Error::WindowExceeded`] and leaves the credit untouched
    /// if `n` is larger than the current credit.
    pub fn consume(&self, n: usize) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(Error::ChannelClosed);
        }
        if n > state.credit as usize {
            return Err(Error::WindowExceeded {
                requested: n,
                available: state.credit,
            });
        }
        state.credit -= n as u32;
        Ok(())
    }

    /// Apply a window adjust from the peer.
    ///
    /// Credit saturates at `u32::MAX`.
    pub fn on_peer_grant(&self, n: u32) {
        {
            let mut state = self.lock();
            state.credit = state.credit.saturating_add(n);
        }
        self.notify.notify_waiters();
    }

    /// Wait until some credit is available and return `min(credit, max)`.
    ///
    /// Returns [`Error::ChannelClosed`] once the window is closed.
    pub async fn wait_for_credit(&self, max: u32) -> Result<u32> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.lock();
                if state.closed {
                    return Err(Error::ChannelClosed);
                }
                if state.credit > 0 {
                    return Ok(state.credit.min(max));
                }
            }

            notified.await;
        }
    }

    /// Close the window, waking every waiter.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Check if the window has been closed.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

// =============================================================================
// Receive Window
// =============================================================================

/// Receive-side credit for one channel.
///
/// Tracks how much credit is outstanding at the peer and decides when to
/// send window adjusts. Not synchronized on its own; the channel guards it.
#[derive(Debug, Clone)]
pub struct ReceiveWindow {
    initial: u32,
    outstanding: u32,
    low_water: u32,
    max_buffered: usize,
}

impl ReceiveWindow {
    /// Create a receive window that has granted `initial` bytes.
    ///
    /// `max_buffered` bounds `buffered + outstanding`; grants beyond that
    /// are withheld until the inbound buffer drains.
    pub fn new(initial: u32, max_buffered: usize) -> Self {
        Self {
            initial,
            outstanding: initial,
            low_water: initial / LOW_WATER_DIVISOR,
            max_buffered: max_buffered.max(initial as usize),
        }
    }

    /// Credit currently held by the peer.
    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    /// The initial window size.
    pub fn initial(&self) -> u32 {
        self.initial
    }

    /// Account for `n` bytes of data received from the peer.
    ///
    /// A peer sending beyond its credit is a protocol violation.
    pub fn on_data(&mut self, n: usize) -> Result<()> {
        if n > self.outstanding as usize {
            return Err(Error::Protocol {
                message: format!(
                    "peer sent {} bytes with only {} bytes of credit",
                    n, self.outstanding
                ),
            });
        }
        self.outstanding -= n as u32;
        Ok(())
    }

    /// Decide on a window adjust given the current inbound buffer size.
    ///
    /// Once outstanding credit drops to the low-water mark, credit is topped
    /// back up to the initial window, limited by buffer headroom. The
    /// returned amount has already been added to the outstanding credit and
    /// must be sent to the peer.
    pub fn replenish(&mut self, buffered: usize) -> Option<u32> {
        if self.outstanding > self.low_water {
            return None;
        }

        let wanted = self.initial - self.outstanding;
        let committed = buffered.saturating_add(self.outstanding as usize);
        let headroom = self.max_buffered.saturating_sub(committed);
        let grant = (wanted as usize).min(headroom) as u32;

        if grant == 0 {
            return None;
        }
        self.outstanding += grant;
        Some(grant)
    }
}
