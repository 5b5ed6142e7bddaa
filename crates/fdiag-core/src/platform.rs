//! Collaborator traits
//!
//! The diagnostics core needs a clock, a thread identity and optional
//! event/OS-log sinks. Portable defaults live here; `fdiag-runtime` installs
//! OS-backed implementations at init.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Instant;

use crate::error::{ErrorCode, ErrorLevel, WarningClass};

/// Monotonic tick source used for timestamps
pub trait Clock: Send + Sync {
    /// Current tick count
    fn now(&self) -> u64;

    /// Tick count captured at process (or clock) start
    fn startup(&self) -> u64;

    fn ticks_per_second(&self) -> u64;

    /// Seconds elapsed since `startup()`
    fn uptime(&self) -> f64 {
        let ticks = self.now().saturating_sub(self.startup());
        ticks as f64 / self.ticks_per_second().max(1) as f64
    }
}

/// Identity of the calling thread
pub trait ThreadIdentity: Send + Sync {
    /// Logical thread id
    fn id(&self) -> u64;

    /// Hardware thread / core the caller is running on
    fn hardware_index(&self) -> u32;
}

/// Notification raised by the diagnostics core
#[derive(Debug, Clone, Copy)]
pub enum DiagEvent<'a> {
    /// An error-level report or `log::error` call
    Error { level: ErrorLevel, code: ErrorCode },

    /// A `log::warn` call
    Warning { class: WarningClass },

    /// A crash guard intercepted a fault and wrote a dump
    CrashDump { label: &'a str, path: &'a Path },
}

/// Receiver of diagnostics events (e.g. the host's system event stream)
pub trait EventSink: Send + Sync {
    fn post(&self, event: &DiagEvent<'_>);
}

/// OS debug-output / system-log channel mirrored by the standard sink
pub trait OsLogChannel: Send + Sync {
    fn write(&self, level: ErrorLevel, line: &str);
}

// ============================================================================
// Portable defaults
// ============================================================================

/// `std::time::Instant` clock with nanosecond ticks
pub struct InstantClock {
    base: Instant,
}

impl InstantClock {
    pub fn new() -> Self {
        Self { base: Instant::now() }
    }
}

impl Default for InstantClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for InstantClock {
    fn now(&self) -> u64 {
        self.base.elapsed().as_nanos() as u64
    }

    fn startup(&self) -> u64 {
        0
    }

    fn ticks_per_second(&self) -> u64 {
        1_000_000_000
    }
}

/// Sequential ids handed out on first use per thread
pub struct CounterThreadIdentity;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static LOGICAL_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

impl ThreadIdentity for CounterThreadIdentity {
    fn id(&self) -> u64 {
        LOGICAL_ID.try_with(|id| *id).unwrap_or(0)
    }

    fn hardware_index(&self) -> u32 {
        0
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Replaceable collaborator slot
struct Slot<T: ?Sized>(RwLock<Option<Arc<T>>>);

impl<T: ?Sized> Slot<T> {
    const fn new() -> Self {
        Self(RwLock::new(None))
    }

    fn get(&self) -> Option<Arc<T>> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set(&self, value: Option<Arc<T>>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = value;
    }
}

static CLOCK: Slot<dyn Clock> = Slot::new();
static THREAD_IDENTITY: Slot<dyn ThreadIdentity> = Slot::new();
static EVENT_SINK: Slot<dyn EventSink> = Slot::new();
static OS_LOG: Slot<dyn OsLogChannel> = Slot::new();

static DEFAULT_CLOCK: OnceLock<Arc<dyn Clock>> = OnceLock::new();

/// The installed clock, or the portable default
pub fn clock() -> Arc<dyn Clock> {
    CLOCK.get().unwrap_or_else(|| {
        DEFAULT_CLOCK
            .get_or_init(|| Arc::new(InstantClock::new()))
            .clone()
    })
}

pub fn set_clock(clock: Arc<dyn Clock>) {
    CLOCK.set(Some(clock));
}

/// Logical id and hardware index of the calling thread
pub fn thread_identity() -> (u64, u32) {
    match THREAD_IDENTITY.get() {
        Some(identity) => (identity.id(), identity.hardware_index()),
        None => (CounterThreadIdentity.id(), CounterThreadIdentity.hardware_index()),
    }
}

pub fn set_thread_identity(identity: Arc<dyn ThreadIdentity>) {
    THREAD_IDENTITY.set(Some(identity));
}

pub fn set_event_sink(sink: Option<Arc<dyn EventSink>>) {
    EVENT_SINK.set(sink);
}

/// Post to the event sink if one is installed
pub fn post_event(event: &DiagEvent<'_>) {
    if let Some(sink) = EVENT_SINK.get() {
        sink.post(event);
    }
}

pub fn set_os_log_channel(channel: Option<Arc<dyn OsLogChannel>>) {
    OS_LOG.set(channel);
}

pub(crate) fn os_log_channel() -> Option<Arc<dyn OsLogChannel>> {
    OS_LOG.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_instant_clock_monotonic() {
        let clock = InstantClock::new();
        let a = clock.now();
        thread::sleep(std::time::Duration::from_millis(2));
        let b = clock.now();
        assert!(b > a);
        assert!(clock.uptime() > 0.0);
    }

    #[test]
    fn test_counter_ids_distinct() {
        let here = CounterThreadIdentity.id();
        let there = thread::spawn(|| CounterThreadIdentity.id()).join().unwrap();
        assert_ne!(here, there);
        assert_eq!(here, CounterThreadIdentity.id());
    }

    struct FixedClock;

    impl Clock for FixedClock {
        fn now(&self) -> u64 {
            2_500
        }
        fn startup(&self) -> u64 {
            500
        }
        fn ticks_per_second(&self) -> u64 {
            1_000
        }
    }

    #[test]
    fn test_uptime_from_ticks() {
        assert_eq!(FixedClock.uptime(), 2.0);
    }
}
