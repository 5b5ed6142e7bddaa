//! Unix stack implementation using mmap

use fdiag_core::error::{DiagError, DiagResult};
use std::sync::OnceLock;

/// System page size, queried once
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            4096
        }
    })
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Anonymous stack mapping with a PROT_NONE guard page at its low end
///
/// ```text
/// base            base + page                           top
/// | guard (none)  | usable (read/write) ... grows down <- |
/// ```
#[derive(Debug)]
pub struct FiberStack {
    base: *mut u8,
    len: usize,
}

// The mapping is plain memory; ownership may move between threads.
unsafe impl Send for FiberStack {}

impl FiberStack {
    /// Map a stack with at least `size` usable bytes
    pub fn new(size: usize) -> DiagResult<Self> {
        let page = page_size();
        let usable = size
            .checked_add(page - 1)
            .map(|s| s & !(page - 1))
            .filter(|&s| s > 0)
            .ok_or(DiagError::StackAllocationFailed(libc::EINVAL))?;
        let len = usable
            .checked_add(page)
            .ok_or(DiagError::StackAllocationFailed(libc::EINVAL))?;

        // Physical pages are committed on first touch
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(DiagError::StackAllocationFailed(last_errno()));
        }

        // Guard page: overflowing the stack faults here
        let ret = unsafe { libc::mprotect(base, page, libc::PROT_NONE) };
        if ret != 0 {
            let errno = last_errno();
            unsafe { libc::munmap(base, len) };
            return Err(DiagError::StackAllocationFailed(errno));
        }

        Ok(Self {
            base: base as *mut u8,
            len,
        })
    }

    /// Lowest mapped address (start of the guard page)
    #[inline]
    pub fn base(&self) -> usize {
        self.base as usize
    }

    /// Lowest usable address
    #[inline]
    pub fn bottom(&self) -> usize {
        self.base as usize + page_size()
    }

    /// One past the highest usable address
    #[inline]
    pub fn top(&self) -> usize {
        self.base as usize + self.len
    }

    /// Usable bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.top() - self.bottom()
    }
}

impl Drop for FiberStack {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_geometry() {
        let page = page_size();
        let stack = FiberStack::new(64 * 1024 + 1).unwrap();
        assert_eq!(stack.size() % page, 0);
        assert!(stack.size() > 64 * 1024);
        assert_eq!(stack.bottom() - stack.base(), page);
        assert_eq!(stack.top() - stack.base(), stack.size() + page);
    }

    #[test]
    fn test_usable_region_writable() {
        let stack = FiberStack::new(16 * 1024).unwrap();
        unsafe {
            let low = stack.bottom() as *mut u8;
            let high = (stack.top() - 1) as *mut u8;
            low.write_volatile(0xAA);
            high.write_volatile(0x55);
            assert_eq!(low.read_volatile(), 0xAA);
            assert_eq!(high.read_volatile(), 0x55);
        }
    }

    #[test]
    fn test_empty_request_fails() {
        assert!(matches!(
            FiberStack::new(0),
            Err(DiagError::StackAllocationFailed(libc::EINVAL))
        ));
    }

    #[test]
    fn test_oversized_request_fails() {
        assert!(matches!(
            FiberStack::new(usize::MAX),
            Err(DiagError::StackAllocationFailed(_))
        ));
    }
}
