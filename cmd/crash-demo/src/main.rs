//! Crash guard demo
//!
//! Walks through every diagnostics surface: logging, error state, error
//! context, guarded faults and a persistent guard on a spawned thread.
//!
//! # Usage
//!
//! ```text
//! crash-demo [all|log|context|guard|thread]
//! ```
//!
//! # Environment Variables
//!
//! - `FDIAG_DUMP_DIR=/tmp/dumps` - Where crash dumps are written
//! - `FDIAG_LOG_LEVEL=info` - Drop debug lines
//! - `FDIAG_SYSLOG=1` - Mirror lines to syslog

use fdiag::{context, guard, guard_clear, guard_set, spawn};
use fdiag::{log_debug, log_error, log_info, log_warn};
use fdiag::{CrashResult, DiagConfig, DiagEvent, ErrorCode, ErrorLevel, EventSink, WarningClass};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts crash events posted by the guards
struct CrashCounter(AtomicUsize);

impl EventSink for CrashCounter {
    fn post(&self, event: &DiagEvent<'_>) {
        if let DiagEvent::CrashDump { label, path } = event {
            self.0.fetch_add(1, Ordering::SeqCst);
            println!("  event: crash '{}' -> {}", label, path.display());
        }
    }
}

// FDIAG_DUMP_DIR=/tmp/dumps cargo run -p fdiag-crash-demo
fn main() {
    println!("=== fdiag Crash Demo ===\n");

    if let Err(e) = fdiag::init() {
        eprintln!("init failed: {}", e);
        std::process::exit(1);
    }
    DiagConfig::current().print();

    if fdiag::debugger_attached() {
        println!("debugger attached, faults will stop in the debugger");
    }

    let counter = Arc::new(CrashCounter(AtomicUsize::new(0)));
    fdiag::platform::set_event_sink(Some(counter.clone()));

    let which = std::env::args().nth(1).unwrap_or_else(|| "all".to_string());
    let all = which == "all";

    if all || which == "log" {
        demo_logging();
    }
    if all || which == "context" {
        demo_context();
    }
    if all || which == "guard" {
        demo_guard();
    }
    if all || which == "thread" {
        demo_thread();
    }

    println!("\n{} crash event(s) posted", counter.0.load(Ordering::SeqCst));
    println!("\n=== Demo Complete ===");
}

fn demo_logging() {
    println!("\n--- Logging ---");
    log_debug!("debug line from {}", std::process::id());
    log_info!("info line");
    log_warn!(WarningClass::Performance, "slow path taken {} times", 3);

    let long = "0123456789".repeat(200);
    log_info!("long line ({} bytes): {}", long.len(), long);

    fdiag::set_callback(Some(Arc::new(|level: ErrorLevel, line: &str| {
        print!("  callback [{}] {}", level, line);
    })));
    fdiag::set_stdout_enabled(false);
    log_info!("only the callback sees this");
    fdiag::set_stdout_enabled(true);
    fdiag::set_callback(None);
}

fn demo_context() {
    println!("\n--- Error state and context ---");
    fdiag::report(ErrorLevel::Info, ErrorCode::Deprecated);
    println!("  error = {}", fdiag::error());
    println!("  error again = {}", fdiag::error());

    let _config = context::scope("loading config", "/etc/demo.toml");
    for entry in 0..2 {
        let _entry = context::scope("parsing entry", entry.to_string());
        if entry == 1 {
            fdiag::report(ErrorLevel::Warning, ErrorCode::InvalidValue);
        }
    }
    let code = log_error!(ErrorLevel::Error, ErrorCode::UnknownResource, "include missing");
    println!("  log_error returned {}, state {}", code, fdiag::error());
}

fn demo_guard() {
    println!("\n--- Crash guard ---");

    let answer = guard("answer", |_| println!("  unexpected crash"), || 6 * 7);
    println!("  completed: {:?}", answer);

    let _frame = context::scope("demo", "guarded faults");

    let result = guard("debug-break", report_dump, || {
        let _step = context::scope("step", "about to trap");
        fdiag::debug_break();
    });
    show(&result);

    let result = guard("null-read", report_dump, || unsafe {
        std::ptr::read_volatile(std::hint::black_box(0usize) as *const u64)
    });
    show(&result);

    let result = guard("divide", report_dump, divide_by_zero);
    show(&result);

    // The guard is reusable after a crash
    let again = guard("again", report_dump, || "still alive");
    println!("  after crashes: {:?}", again);
}

fn demo_thread() {
    println!("\n--- Persistent guard ---");

    let parent = std::thread::spawn(|| {
        if let Err(e) = guard_set("worker", report_dump) {
            println!("  guard_set failed: {}", e);
            return;
        }
        let child = match spawn("worker-child", || {
            log_info!("child about to fault");
            fdiag::debug_break();
        }) {
            Ok(child) => child,
            Err(e) => {
                println!("  spawn failed: {}", e);
                return;
            }
        };
        match child.join() {
            Ok(result) => show(&result),
            Err(_) => println!("  child panicked"),
        }
        guard_clear();
    });
    let _ = parent.join();
}

fn report_dump(path: &Path) {
    println!("  on_crash: {}", path.display());
}

fn show<T: std::fmt::Debug>(result: &CrashResult<T>) {
    match result {
        CrashResult::Completed(value) => println!("  completed: {:?}", value),
        CrashResult::CrashDumpGenerated(path) => {
            let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            println!("  crashed, dump {} ({} bytes)", path.display(), size);
        }
    }
}

/// Integer division in asm so the compiler cannot insert its own check
#[cfg(target_arch = "x86_64")]
#[inline(never)]
fn divide_by_zero() -> i32 {
    let divisor = std::hint::black_box(0i32);
    let quotient: i32;
    unsafe {
        std::arch::asm!(
            "cdq",
            "idiv {d:e}",
            d = in(reg) divisor,
            inout("eax") 1i32 => quotient,
            out("edx") _,
        );
    }
    quotient
}

/// aarch64 division by zero yields zero; trap instead
#[cfg(not(target_arch = "x86_64"))]
#[inline(never)]
fn divide_by_zero() -> i32 {
    fdiag::debug_break();
    0
}
