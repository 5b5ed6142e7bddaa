//! Crash dump artifacts
//!
//! A dump is a small text file named `<label>-<pid>-<seq>.dump` in the
//! configured dump directory. Its layout is meant for people, not parsers.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use fdiag_core::context::ErrorFrame;
use fdiag_core::platform;

use super::frame::FaultRecord;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Label reduced to characters that are safe in a file name
fn file_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "crash".to_string()
    } else {
        cleaned
    }
}

/// Next unique dump path under `dir`
pub fn dump_path(dir: &Path, label: &str) -> PathBuf {
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    dir.join(format!("{}-{}-{}.dump", file_label(label), std::process::id(), seq))
}

/// Write the dump for `record` to `path`, creating the directory if needed
pub fn write_dump(
    path: &Path,
    label: &str,
    record: &FaultRecord,
    frames: &[ErrorFrame],
) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut out = BufWriter::new(File::create(path)?);
    render(&mut out, label, record, frames)?;
    out.flush()
}

/// Dump text for `record`
pub fn render(
    out: &mut impl Write,
    label: &str,
    record: &FaultRecord,
    frames: &[ErrorFrame],
) -> io::Result<()> {
    let (tid, hw) = platform::thread_identity();

    writeln!(out, "fdiag crash dump")?;
    writeln!(out, "label:   {}", label)?;
    writeln!(
        out,
        "signal:  {} ({}) code {}",
        record.signal_name(),
        record.signal,
        record.code
    )?;
    writeln!(out, "address: {:#x}", record.address)?;
    writeln!(out, "ip:      {:#x}", record.ip)?;
    writeln!(out, "sp:      {:#x}", record.sp)?;
    writeln!(out, "thread:  {:x}:{}", tid, hw)?;
    writeln!(out, "pid:     {}", std::process::id())?;
    writeln!(out, "uptime:  {:.3}", platform::clock().uptime())?;

    writeln!(out, "context:")?;
    if frames.is_empty() {
        writeln!(out, "  (none)")?;
    }
    for frame in frames {
        let name: &str = if frame.name.is_empty() { "<something>" } else { &frame.name };
        writeln!(out, "  When {}: {}", name, frame.data)?;
    }

    writeln!(out, "backtrace:")?;
    writeln!(out, "  #0  {:#018x}", record.ip)?;
    for (i, addr) in record.frames().iter().enumerate() {
        writeln!(out, "  #{:<2} {:#018x}", i + 1, addr)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FaultRecord {
        let mut record = FaultRecord::empty();
        record.signal = libc::SIGSEGV;
        record.code = 1;
        record.address = 0x10;
        record.ip = 0x4000;
        record.sp = 0x7000;
        record.frames_mut()[0] = 0x4100;
        record.frames_mut()[1] = 0x4200;
        record.set_frame_count(2);
        record
    }

    #[test]
    fn test_dump_paths_unique() {
        let dir = Path::new("/tmp/fdiag-test");
        let a = dump_path(dir, "parser");
        let b = dump_path(dir, "parser");
        assert_ne!(a, b);
        let name = a.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(&format!("parser-{}-", std::process::id())));
        assert!(name.ends_with(".dump"));
    }

    #[test]
    fn test_label_sanitized() {
        assert_eq!(file_label("../etc/pass wd"), "___etc_pass_wd");
        assert_eq!(file_label(""), "crash");
        assert_eq!(file_label("ok-name_1"), "ok-name_1");
    }

    #[test]
    fn test_render_contents() {
        let frames = vec![ErrorFrame::new("loading", "level 3"), ErrorFrame::new("", "x")];
        let mut out = Vec::new();
        render(&mut out, "loader", &sample(), &frames).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("label:   loader\n"));
        assert!(text.contains("signal:  SIGSEGV (11) code 1\n"));
        assert!(text.contains("address: 0x10\n"));
        assert!(text.contains("  When loading: level 3\n"));
        assert!(text.contains("  When <something>: x\n"));
        assert!(text.contains("  #0  0x0000000000004000\n"));
        assert!(text.contains("  #2  0x0000000000004200\n"));
    }

    #[test]
    fn test_write_dump_creates_directory() {
        let dir = std::env::temp_dir().join(format!("fdiag-dump-test-{}", std::process::id()));
        let path = dump_path(&dir, "writer");
        write_dump(&path, "writer", &sample(), &[]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("fdiag crash dump\n"));
        assert!(text.contains("  (none)\n"));
        let _ = fs::remove_dir_all(&dir);
    }
}
