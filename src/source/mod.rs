//! Backend sources — lifecycle, shared flags, reconnect schedule.
//!
//! # Overview
//!
//! [`TranscriptionSource`] is the one interface a host talks to.  It is
//! object-safe and `Send` so the session controller can hold any backend
//! behind a `Box<dyn TranscriptionSource>`.
//!
//! Three implementations:
//!
//! - [`DeviceSource`] — OS recognizer behind the [`DeviceRecognizer`] trait.
//! - [`ServerSource`] — generic streaming WebSocket server.
//! - [`CloudSource`] — cloud streaming API.
//!
//! Sources spawn internal driver tasks; `start`/`stop` only flip intent and
//! signal those tasks, so both calls are cheap, idempotent, and safe from
//! any state.  [`SourceFlags`] carries the observable state plus a
//! generation counter: every driver task captures the generation at spawn
//! and stops touching sinks or flags once it goes stale, which is what keeps
//! late events from an abandoned connection out of the stream.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::types::SourceError;

pub mod cloud;
pub mod device;
pub mod server;

pub use cloud::CloudSource;
pub use device::{DeviceEventSender, DeviceRecognizer, DeviceSource, UnsupportedRecognizer};
pub use server::ServerSource;

// ---------------------------------------------------------------------------
// TranscriptionSource trait
// ---------------------------------------------------------------------------

/// Object-safe interface every backend source implements.
///
/// Results and faults flow through the sinks handed to the source at
/// construction; these methods only manage the lifecycle.
///
/// # Contract
///
/// - `start` is idempotent: calling it while already started is a no-op.
/// - `stop` is safe from any state (including never-started and
///   already-stopped), cancels any pending reconnect timer, and releases
///   capture resources.
/// - After `stop` returns, `listening()` and `connected()` read false and
///   no further events reach the sinks.
pub trait TranscriptionSource: Send {
    /// Short stable name for logs (`"device"`, `"server"`, `"cloud"`).
    fn name(&self) -> &'static str;

    /// Begin capturing and transcribing.
    ///
    /// Must be called from within a tokio runtime; sources spawn their
    /// driver tasks on it.
    fn start(&mut self) -> Result<(), SourceError>;

    /// Stop transcribing and release resources.
    fn stop(&mut self) -> Result<(), SourceError>;

    /// Ask the backend to flush a final result for buffered audio now.
    /// Best-effort; a backend with no flush primitive may do nothing.
    fn force_finalize(&mut self);

    /// True while audio is being captured and forwarded.
    fn listening(&self) -> bool;

    /// True while the backend transport is up.
    fn connected(&self) -> bool;
}

// Compile-time assertion: Box<dyn TranscriptionSource> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn TranscriptionSource>) {}
};

// ---------------------------------------------------------------------------
// SourceFlags
// ---------------------------------------------------------------------------

/// Shared observable state for one source.
///
/// Cheap to clone (`Arc` clone).  The `should_listen` intent flag outlives
/// individual connections: drivers consult it to decide whether an
/// unexpected close warrants a reconnect.
#[derive(Debug, Clone, Default)]
pub struct SourceFlags {
    inner: Arc<FlagsInner>,
}

#[derive(Debug, Default)]
struct FlagsInner {
    listening: AtomicBool,
    connected: AtomicBool,
    should_listen: AtomicBool,
    generation: AtomicU64,
}

impl SourceFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listening(&self) -> bool {
        self.inner.listening.load(Ordering::SeqCst)
    }

    pub fn set_listening(&self, value: bool) {
        self.inner.listening.store(value, Ordering::SeqCst);
    }

    pub fn connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, value: bool) {
        self.inner.connected.store(value, Ordering::SeqCst);
    }

    pub fn should_listen(&self) -> bool {
        self.inner.should_listen.load(Ordering::SeqCst)
    }

    pub fn set_should_listen(&self, value: bool) {
        self.inner.should_listen.store(value, Ordering::SeqCst);
    }

    /// Current generation token.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Invalidate all outstanding tokens and return the new one.
    ///
    /// `start` advances this so the new driver gets a fresh token; `stop`
    /// advances it so anything still running goes stale immediately.
    pub fn advance_generation(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// True while `token` is the latest generation and intent holds.
    pub fn is_live(&self, token: u64) -> bool {
        self.should_listen() && self.generation() == token
    }
}

// ---------------------------------------------------------------------------
// Reconnect schedule
// ---------------------------------------------------------------------------

/// First reconnect delay; doubles on each consecutive failure.
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(300);

/// Consecutive failed attempts tolerated before the source gives up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Delay before the next reconnect attempt given how many consecutive
/// attempts have already failed (0-based).
///
/// 300 ms, 600 ms, 1.2 s, 2.4 s, 4.8 s for attempts 1 through
/// [`MAX_RECONNECT_ATTEMPTS`].
pub fn reconnect_delay(prior_failures: u32) -> Duration {
    RECONNECT_BASE_DELAY * 2u32.saturating_pow(prior_failures.min(31))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_default_to_false() {
        let flags = SourceFlags::new();
        assert!(!flags.listening());
        assert!(!flags.connected());
        assert!(!flags.should_listen());
    }

    #[test]
    fn advancing_generation_invalidates_old_tokens() {
        let flags = SourceFlags::new();
        flags.set_should_listen(true);
        let token = flags.generation();
        assert!(flags.is_live(token));

        let next = flags.advance_generation();
        assert!(!flags.is_live(token));
        assert!(flags.is_live(next));
    }

    #[test]
    fn is_live_requires_intent() {
        let flags = SourceFlags::new();
        let token = flags.advance_generation();
        assert!(!flags.is_live(token), "intent off means not live");
        flags.set_should_listen(true);
        assert!(flags.is_live(token));
    }

    #[test]
    fn flags_are_shared_across_clones() {
        let a = SourceFlags::new();
        let b = a.clone();
        a.set_connected(true);
        assert!(b.connected());
    }

    #[test]
    fn reconnect_delays_double_from_base() {
        assert_eq!(reconnect_delay(0), Duration::from_millis(300));
        assert_eq!(reconnect_delay(1), Duration::from_millis(600));
        assert_eq!(reconnect_delay(2), Duration::from_millis(1_200));
        assert_eq!(reconnect_delay(3), Duration::from_millis(2_400));
        assert_eq!(reconnect_delay(4), Duration::from_millis(4_800));
    }
}
