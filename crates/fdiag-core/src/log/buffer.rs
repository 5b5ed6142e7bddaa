//! Line formatting into a stack buffer with exact-size heap growth
//!
//! The first attempt writes into a caller-provided stack buffer. When the
//! line does not fit, the writer has already counted the exact size it
//! needed, so one heap buffer of that size is reserved and the line is
//! formatted again. The header is copied from the first attempt instead of
//! being formatted twice.

use core::fmt::{self, Write};

/// Appended when a line had to be cut because growth failed
pub const TRUNCATION_MARKER: &str = " [truncated]";

/// Writes into a fixed slice. The piece that overflows is copied up to the
/// last char boundary that fits, after which nothing more is copied (the
/// content stays a contiguous prefix of the line) but the requested length
/// keeps counting.
struct BoundedWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
    needed: usize,
}

impl<'a> BoundedWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0, needed: 0 }
    }

    #[inline]
    fn fits(&self) -> bool {
        self.len == self.needed
    }
}

impl Write for BoundedWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let intact = self.fits();
        self.needed += s.len();
        if !intact {
            return Ok(());
        }
        let room = self.buf.len() - self.len;
        let mut take = s.len().min(room);
        while take > 0 && !s.is_char_boundary(take) {
            take -= 1;
        }
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

/// Only ever called on bytes cut at char boundaries
#[inline]
fn as_str(bytes: &[u8]) -> &str {
    core::str::from_utf8(bytes).unwrap_or("")
}

/// Format `header`, `body` and a newline, then hand the finished line to
/// `sink`.
///
/// `max_heap` bounds the growth buffer; a line needing more, or a failed
/// reservation, is delivered cut short with [`TRUNCATION_MARKER`].
pub fn format_line<R>(
    stack: &mut [u8],
    header: fmt::Arguments<'_>,
    body: fmt::Arguments<'_>,
    max_heap: usize,
    sink: impl FnOnce(&str) -> R,
) -> R {
    let (len, needed, header_len, header_fit) = {
        let mut w = BoundedWriter::new(stack);
        let _ = w.write_fmt(header);
        let header_len = w.len;
        let header_fit = w.fits();
        let _ = w.write_fmt(body);
        let _ = w.write_str("\n");
        (w.len, w.needed, header_len, header_fit)
    };

    if len == needed {
        return sink(as_str(&stack[..len]));
    }

    let mut required = needed;
    let mut heap: Vec<u8> = Vec::new();
    loop {
        heap.clear();
        if required > max_heap || heap.try_reserve_exact(required).is_err() {
            return sink(truncate_in_place(stack, len));
        }
        heap.resize(required, 0);

        let mut w = BoundedWriter::new(&mut heap);
        if header_fit {
            let _ = w.write_str(as_str(&stack[..header_len]));
        } else {
            let _ = w.write_fmt(header);
        }
        let _ = w.write_fmt(body);
        let _ = w.write_str("\n");

        if w.fits() {
            let len = w.len;
            return sink(as_str(&heap[..len]));
        }
        // A Display impl produced more output this time. Doubling bounds the
        // number of retries for output that keeps growing.
        required = w.needed.max(required.saturating_mul(2));
    }
}

/// Cut the first `len` bytes of `stack` at a char boundary and append the
/// marker and newline
fn truncate_in_place(stack: &mut [u8], len: usize) -> &str {
    let tail = TRUNCATION_MARKER.len() + 1;
    if stack.len() < tail {
        return "[truncated]\n";
    }

    let mut cut = len.min(stack.len() - tail);
    {
        let kept = as_str(&stack[..len]);
        while cut > 0 && !kept.is_char_boundary(cut) {
            cut -= 1;
        }
    }

    stack[cut..cut + TRUNCATION_MARKER.len()].copy_from_slice(TRUNCATION_MARKER.as_bytes());
    stack[cut + TRUNCATION_MARKER.len()] = b'\n';
    as_str(&stack[..cut + tail])
}
