use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation token of one streaming call.
///
/// The flag is only ever polled. Nothing interrupts a running stage; a
/// long-running loop checks [`Disconnect::is_set`] between steps and stops
/// emitting once it flips.
#[derive(Debug, Clone, Default)]
pub struct Disconnect {
    flag: Arc<AtomicBool>,
}

impl Disconnect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// A handle the transport keeps to flag the client as gone.
    pub fn handle(&self) -> DisconnectHandle {
        DisconnectHandle {
            flag: Arc::clone(&self.flag),
        }
    }
}

/// Transport-side half of a [`Disconnect`] token.
#[derive(Debug, Clone)]
pub struct DisconnectHandle {
    flag: Arc<AtomicBool>,
}

impl DisconnectHandle {
    pub fn disconnect(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_disconnected(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
