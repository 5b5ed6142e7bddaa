//! Per-thread error state
//!
//! Each thread owns a single error slot. Reports overwrite it, reads clear
//! it. Nothing here is shared between threads, so nothing here locks.

use std::cell::Cell;

use crate::error::{ErrorCode, ErrorLevel};
use crate::platform::{self, DiagEvent};

thread_local! {
    /// Last reported error for this thread
    static CURRENT: Cell<ErrorCode> = const { Cell::new(ErrorCode::None) };
}

/// Record `code` as the calling thread's current error.
///
/// Warning and error levels also log the active error context.
pub fn report(level: ErrorLevel, code: ErrorCode) {
    record(code);
    if level.logs_context() {
        crate::context::render(level);
    }
    if level >= ErrorLevel::Error {
        platform::post_event(&DiagEvent::Error { level, code });
    }
}

/// Take the calling thread's current error, resetting it to `None`
#[inline]
pub fn error() -> ErrorCode {
    CURRENT
        .try_with(|cell| cell.replace(ErrorCode::None))
        .unwrap_or(ErrorCode::None)
}

/// Read the current error without clearing it
#[inline]
pub fn peek() -> ErrorCode {
    CURRENT.try_with(Cell::get).unwrap_or(ErrorCode::None)
}

/// Overwrite the slot without any logging side effects
#[inline]
pub(crate) fn record(code: ErrorCode) {
    let _ = CURRENT.try_with(|cell| cell.set(code));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WarningClass;
    use crate::testing::{self, body, capture, Recorded, RecordingSink};
    use crate::{context, log};
    use std::thread;

    #[test]
    fn test_read_clears() {
        assert_eq!(error(), ErrorCode::None);
        assert_eq!(error(), ErrorCode::None);

        report(ErrorLevel::Warning, ErrorCode::AccessDenied);
        assert_eq!(error(), ErrorCode::AccessDenied);
        assert_eq!(error(), ErrorCode::None);

        report(ErrorLevel::Error, ErrorCode::InvalidValue);
        assert_eq!(error(), ErrorCode::InvalidValue);
        assert_eq!(error(), ErrorCode::None);
    }

    #[test]
    fn test_last_write_wins() {
        report(ErrorLevel::Info, ErrorCode::Unsupported);
        report(ErrorLevel::Debug, ErrorCode::OutOfMemory);
        assert_eq!(peek(), ErrorCode::OutOfMemory);
        assert_eq!(error(), ErrorCode::OutOfMemory);
        assert_eq!(peek(), ErrorCode::None);
    }

    #[test]
    fn test_not_visible_across_threads() {
        report(ErrorLevel::Info, ErrorCode::Script);

        let seen = thread::spawn(|| {
            let before = error();
            report(ErrorLevel::Info, ErrorCode::Deprecated);
            (before, error())
        })
        .join()
        .unwrap();

        assert_eq!(seen, (ErrorCode::None, ErrorCode::Deprecated));
        assert_eq!(error(), ErrorCode::Script);
    }

    /// Context lines produced by a `report` at `level` under one frame
    fn report_lines(level: ErrorLevel, marker: &str) -> Vec<(ErrorLevel, String)> {
        log::set_stdout_enabled(false);
        let lines = capture(marker, || {
            let _frame = context::scope("reporting", marker.to_string());
            report(level, ErrorCode::AccessDenied);
        });
        log::set_stdout_enabled(true);
        assert_eq!(error(), ErrorCode::AccessDenied);
        lines
    }

    #[test]
    fn test_warning_report_renders_context() {
        let _lock = testing::serial();
        let lines = report_lines(ErrorLevel::Warning, "state-warning-marker");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, ErrorLevel::Warning);
        assert_eq!(body(&lines[0].1), "When reporting: state-warning-marker\n");
    }

    #[test]
    fn test_error_report_renders_context() {
        let _lock = testing::serial();
        let lines = report_lines(ErrorLevel::Error, "state-error-marker");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, ErrorLevel::Error);
        assert_eq!(body(&lines[0].1), "When reporting: state-error-marker\n");
    }

    #[test]
    fn test_info_report_renders_nothing() {
        let _lock = testing::serial();
        assert!(report_lines(ErrorLevel::Info, "state-info-marker").is_empty());
        assert!(report_lines(ErrorLevel::Debug, "state-debug-marker").is_empty());
    }

    #[test]
    fn test_events_posted() {
        let _lock = testing::serial();
        let sink = RecordingSink::new();
        platform::set_event_sink(Some(sink.clone()));

        report(ErrorLevel::Info, ErrorCode::Deprecated);
        report(ErrorLevel::Warning, ErrorCode::AccessDenied);
        report(ErrorLevel::Error, ErrorCode::InvalidValue);
        report(ErrorLevel::Panic, ErrorCode::Assert);
        log::warn(WarningClass::Deadlock, format_args!("event-marker"));
        let code = log::error(ErrorLevel::Warning, ErrorCode::OutOfMemory, format_args!("event-marker"));

        platform::set_event_sink(None);
        assert_eq!(code, ErrorCode::OutOfMemory);
        assert_eq!(error(), ErrorCode::OutOfMemory);
        assert_eq!(
            sink.take(),
            [
                Recorded::Error(ErrorLevel::Error, ErrorCode::InvalidValue),
                Recorded::Error(ErrorLevel::Panic, ErrorCode::Assert),
                Recorded::Warning(WarningClass::Deadlock),
                Recorded::Error(ErrorLevel::Error, ErrorCode::OutOfMemory),
            ]
        );
    }
}
