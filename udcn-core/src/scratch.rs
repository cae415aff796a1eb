//! Single-slot scratch buffers (spec.md §2.2, §5 "cooperatively loaned").
//!
//! Because the dispatcher is strictly single-threaded, a byte buffer and an
//! index buffer can be reused across handler invocations instead of
//! reallocated. A holder must release the guard before another handler can
//! acquire the same slot; since we are single-threaded this just means the
//! guard's lifetime must end before the next `acquire()` call, which the
//! borrow checker already enforces via `RefCell`'s runtime check.

use std::cell::RefCell;

pub struct ScratchPool {
    bytes: RefCell<Option<Vec<u8>>>,
    indices: RefCell<Option<Vec<u32>>>,
}

impl ScratchPool {
    pub fn new() -> Self {
        Self {
            bytes: RefCell::new(Some(Vec::new())),
            indices: RefCell::new(Some(Vec::new())),
        }
    }

    /// Panics if a byte-buffer guard is already outstanding -- that would
    /// mean a handler tried to re-enter while still holding scratch, which
    /// cannot happen in the single-threaded dispatcher unless it's a bug.
    pub fn acquire_bytes(&self) -> ScratchGuard<'_, u8> {
        let buf = self
            .bytes
            .borrow_mut()
            .take()
            .expect("scratch byte buffer already on loan");
        ScratchGuard { pool: &self.bytes, buf: Some(buf) }
    }

    pub fn acquire_indices(&self) -> ScratchGuard<'_, u32> {
        let buf = self
            .indices
            .borrow_mut()
            .take()
            .expect("scratch index buffer already on loan");
        ScratchGuard { pool: &self.indices, buf: Some(buf) }
    }
}

impl Default for ScratchPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A loaned buffer. Returns its storage to the pool on drop, cleared but
/// with capacity retained.
pub struct ScratchGuard<'a, T> {
    pool: &'a RefCell<Option<Vec<T>>>,
    buf: Option<Vec<T>>,
}

impl<'a, T> std::ops::Deref for ScratchGuard<'a, T> {
    type Target = Vec<T>;
    fn deref(&self) -> &Vec<T> {
        self.buf.as_ref().unwrap()
    }
}

impl<'a, T> std::ops::DerefMut for ScratchGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Vec<T> {
        self.buf.as_mut().unwrap()
    }
}

impl<'a, T> Drop for ScratchGuard<'a, T> {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            buf.clear();
            *self.pool.borrow_mut() = Some(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_returns_buffer_on_drop() {
        let pool = ScratchPool::new();
        {
            let mut guard = pool.acquire_bytes();
            guard.extend_from_slice(b"hello");
            assert_eq!(&guard[..], b"hello");
        }
        let guard = pool.acquire_bytes();
        assert!(guard.is_empty());
    }

    #[test]
    #[should_panic(expected = "already on loan")]
    fn double_acquire_panics() {
        let pool = ScratchPool::new();
        let _first = pool.acquire_bytes();
        let _second = pool.acquire_bytes();
    }
}
