use std::ptr::{self, NonNull};

use log::trace;
use pkcs11::types::{CK_BYTE_PTR, CK_ULONG};

use crate::error::Error;

//------------ Arena ---------------------------------------------------------

/// Owner of the C-allocated buffers that a mechanism parameter points at.
///
/// Every buffer handed out by [`Arena::allocate`] stays at the same address
/// until [`Arena::free`] is called, so a token may keep reading from or
/// writing into it after the call that received the pointer has returned.
/// `free` releases all buffers in one pass and may be called any number of
/// times. It is the only way the buffers are ever released: dropping an arena
/// without calling `free` leaks them, it never leaves a pointer dangling.
///
/// An arena belongs to one parameter build at a time. Allocation takes
/// `&mut self`, which is all the coordination there is: share an arena
/// between threads only by moving it.
#[derive(Debug, Default)]
#[must_use = "the buffers are only released by calling `free`"]
pub struct Arena {
    buffers: Vec<(NonNull<u8>, usize)>,
}

// The buffers are owned exclusively by the arena and are never aliased by
// anything else on the Rust side.
unsafe impl Send for Arena {}

impl Arena {
    pub fn new() -> Self {
        Arena { buffers: Vec::new() }
    }

    /// Copies `bytes` into a fresh C buffer and returns its address and
    /// length, ready to be put in a native parameter structure.
    ///
    /// Nothing is recorded if the allocation fails.
    pub fn allocate(&mut self, bytes: &[u8]) -> Result<(CK_BYTE_PTR, CK_ULONG), Error> {
        let len = bytes.len();
        let ck_len = CK_ULONG::try_from(len)?;

        // malloc(0) may legitimately return null, ask for at least one byte
        let raw = unsafe { libc::malloc(len.max(1)) };
        let buffer = NonNull::new(raw.cast::<u8>()).ok_or(Error::Allocation { len })?;

        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), buffer.as_ptr(), len) };
        self.buffers.push((buffer, len));

        trace!("PKCS#11: allocated {} parameter bytes at {:p}", len, buffer);
        Ok((buffer.as_ptr(), ck_len))
    }

    /// Releases every buffer allocated so far. Pointers previously returned
    /// by [`Arena::allocate`] are dangling afterwards.
    pub fn free(&mut self) {
        if self.buffers.is_empty() {
            return;
        }

        trace!("PKCS#11: freeing {} parameter buffer(s)", self.buffers.len());
        for (buffer, _) in self.buffers.drain(..) {
            unsafe { libc::free(buffer.as_ptr().cast()) };
        }
    }

    /// The number of buffers currently held.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::slice;

    use super::*;

    #[test]
    fn allocate_copies_bytes() {
        let mut arena = Arena::new();
        let (ptr, len) = arena.allocate(b"additional data").unwrap();

        assert_eq!(len, 15);
        let copied = unsafe { slice::from_raw_parts(ptr, len as usize) };
        assert_eq!(copied, b"additional data");
        assert_eq!(arena.len(), 1);
        arena.free();
    }

    #[test]
    fn allocate_gives_distinct_buffers() {
        let mut arena = Arena::new();
        let (first, _) = arena.allocate(&[1, 2, 3]).unwrap();
        let (second, _) = arena.allocate(&[1, 2, 3]).unwrap();

        assert_ne!(first, second);
        assert_eq!(arena.len(), 2);
        arena.free();
    }

    #[test]
    fn allocate_empty_input() {
        let mut arena = Arena::new();
        let (ptr, len) = arena.allocate(&[]).unwrap();

        assert!(!ptr.is_null());
        assert_eq!(len, 0);
        arena.free();
    }

    #[test]
    fn free_twice_is_a_no_op() {
        let mut arena = Arena::new();
        arena.allocate(&[0xAA; 12]).unwrap();
        arena.allocate(&[0xBB; 32]).unwrap();

        arena.free();
        assert!(arena.is_empty());

        arena.free();
        assert!(arena.is_empty());
    }

    #[test]
    fn free_on_unused_arena() {
        let mut arena = Arena::new();
        arena.free();
        assert!(arena.is_empty());
    }

    #[test]
    fn arena_is_reusable_after_free() {
        let mut arena = Arena::new();
        arena.allocate(&[1]).unwrap();
        arena.free();

        let (ptr, len) = arena.allocate(&[7, 8]).unwrap();
        assert_eq!(unsafe { slice::from_raw_parts(ptr, len as usize) }, &[7, 8]);
        assert_eq!(arena.len(), 1);
        arena.free();
    }

    #[test]
    fn buffers_survive_moving_the_arena() {
        let mut arena = Arena::new();
        let (ptr, len) = arena.allocate(b"public point").unwrap();

        let mut moved = vec![arena];
        assert_eq!(unsafe { slice::from_raw_parts(ptr, len as usize) }, b"public point");

        moved[0].free();
        assert!(moved[0].is_empty());
    }
}
