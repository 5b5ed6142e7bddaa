//! Linux platform implementation

use std::ffi::CString;
use std::sync::{Arc, Once};

use fdiag_core::error::ErrorLevel;
use fdiag_core::platform::{self, Clock, OsLogChannel, ThreadIdentity};
use fdiag_core::config;

/// Linux platform handler
///
/// `CLOCK_MONOTONIC` timestamps relative to construction, kernel thread ids
/// and the current CPU as the hardware index.
pub struct LinuxPlatform {
    startup: u64,
}

impl LinuxPlatform {
    pub fn new() -> Self {
        Self {
            startup: monotonic_ns(),
        }
    }
}

impl Default for LinuxPlatform {
    fn default() -> Self {
        Self::new()
    }
}

fn monotonic_ns() -> u64 {
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    (ts.tv_sec as u64)
        .saturating_mul(1_000_000_000)
        .saturating_add(ts.tv_nsec as u64)
}

impl Clock for LinuxPlatform {
    fn now(&self) -> u64 {
        monotonic_ns()
    }

    fn startup(&self) -> u64 {
        self.startup
    }

    fn ticks_per_second(&self) -> u64 {
        1_000_000_000
    }
}

impl ThreadIdentity for LinuxPlatform {
    fn id(&self) -> u64 {
        unsafe { libc::syscall(libc::SYS_gettid) as u64 }
    }

    fn hardware_index(&self) -> u32 {
        let cpu = unsafe { libc::sched_getcpu() };
        if cpu < 0 {
            0
        } else {
            cpu as u32
        }
    }
}

/// Mirror of log lines into syslog(3)
pub struct SyslogChannel;

impl SyslogChannel {
    pub fn new() -> Self {
        static OPEN: Once = Once::new();
        OPEN.call_once(|| unsafe {
            libc::openlog(c"fdiag".as_ptr(), libc::LOG_PID | libc::LOG_NDELAY, libc::LOG_USER);
        });
        Self
    }

    fn priority(level: ErrorLevel) -> libc::c_int {
        match level {
            ErrorLevel::Debug => libc::LOG_DEBUG,
            ErrorLevel::Info => libc::LOG_INFO,
            ErrorLevel::Warning => libc::LOG_WARNING,
            ErrorLevel::Error => libc::LOG_ERR,
            ErrorLevel::Panic => libc::LOG_CRIT,
        }
    }
}

impl Default for SyslogChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl OsLogChannel for SyslogChannel {
    fn write(&self, level: ErrorLevel, line: &str) {
        let text = line.trim_end_matches('\n').replace('\0', " ");
        if let Ok(text) = CString::new(text) {
            unsafe { libc::syslog(Self::priority(level), c"%s".as_ptr(), text.as_ptr()) };
        }
    }
}

/// Install the Linux collaborators into the diagnostics core
pub fn install() {
    let linux = Arc::new(LinuxPlatform::new());
    platform::set_clock(linux.clone());
    platform::set_thread_identity(linux);
    if config::syslog() {
        platform::set_os_log_channel(Some(Arc::new(SyslogChannel::new())));
    }
}

/// Whether a tracer (debugger) is attached, from `/proc/self/status`
pub fn debugger_attached() -> bool {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| parse_tracer_pid(&status))
        .is_some_and(|pid| pid != 0)
}

fn parse_tracer_pid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("TracerPid:"))
        .and_then(|value| value.trim().parse().ok())
}
