//! Growable, compacting byte buffer used for both the input and output side of a connection.

use std::alloc::{self, Layout};
use std::borrow::{Borrow, BorrowMut};
use std::io::{self, Write};
use std::ops::{Deref, DerefMut};
use std::ptr::{copy, copy_nonoverlapping, NonNull};

/// A growable, contiguous byte buffer with an explicit read/write cursor pair.
///
/// Bytes are appended at `write_offset` and consumed from `read_offset`. Consumed space is
/// reclaimed by [`IoBuffer::compact`] rather than eagerly, so a connection can defer the copy
/// until the buffer is mostly empty.
#[derive(Debug)]
pub struct IoBuffer {
    ptr: NonNull<u8>,
    cap: usize,
    read_offset: usize,
    write_offset: usize,
    desired_capacity: usize,
}

// Safety: `IoBuffer` owns its allocation exclusively; there is no interior mutability or shared
// pointer aliasing, so it may be sent across threads like any other owned buffer.
unsafe impl Send for IoBuffer {}

impl IoBuffer {
    /// Creates a new buffer that grows to at least `desired_capacity` bytes on first use.
    pub fn new(desired_capacity: usize) -> Self {
        let mut result = Self {
            ptr: NonNull::dangling(),
            cap: 0,
            read_offset: 0,
            write_offset: 0,
            desired_capacity: desired_capacity.max(1).next_power_of_two(),
        };

        if desired_capacity > 0 {
            result.grow();
        }
        result
    }

    /// Reserves at least `additional` more bytes of write capacity.
    pub fn reserve(&mut self, additional: usize) {
        if self.remaining_mut() < additional {
            self.grow_to_capacity(self.write_offset + additional);
        }
    }

    /// Bytes available to be consumed (read but not yet marked read).
    pub fn remaining(&self) -> usize {
        self.write_offset - self.read_offset
    }

    /// Bytes of spare write capacity before the buffer must grow.
    pub fn remaining_mut(&self) -> usize {
        self.cap - self.write_offset
    }

    /// Marks `amount` bytes as consumed, freeing them for eventual reclamation by [`compact`].
    ///
    /// [`compact`]: IoBuffer::compact
    pub fn consume(&mut self, amount: usize) {
        self.read_offset = self.write_offset.min(self.read_offset + amount);
        if self.read_offset == self.write_offset {
            self.read_offset = 0;
            self.write_offset = 0;
        }
    }

    /// Marks `amount` bytes as written after a direct write into [`spare_capacity_mut`].
    ///
    /// [`spare_capacity_mut`]: IoBuffer::spare_capacity_mut
    pub fn mark_written(&mut self, amount: usize) {
        self.write_offset = self.cap.min(self.write_offset + amount);
    }

    /// The writable tail of the buffer, growing it first if it has no spare capacity at all.
    pub fn spare_capacity_mut(&mut self) -> &mut [u8] {
        if self.cap == 0 {
            self.grow();
        }
        self.borrow_mut()
    }

    /// Discards all buffered bytes and frees excess capacity above `desired_capacity`.
    pub fn clear(&mut self) {
        self.read_offset = 0;
        self.write_offset = 0;

        if self.cap > self.desired_capacity {
            let layout = Layout::array::<u8>(self.cap).unwrap();
            // Safety: `self.ptr` was allocated with this layout by `grow_to_capacity`.
            let new_ptr = unsafe { alloc::realloc(self.ptr.as_ptr(), layout, self.desired_capacity) };
            self.ptr = match NonNull::new(new_ptr) {
                Some(p) => p,
                None => alloc::handle_alloc_error(layout),
            };
            self.cap = self.desired_capacity;
        }
    }

    /// Coalesces fragmented space when the buffer currently holds fewer than `threshold` live
    /// bytes, moving unconsumed bytes back to the start of the allocation and releasing any
    /// capacity grown past `desired_capacity`. A no-op when live bytes are 0 (handled by
    /// [`consume`] resetting both offsets) or already above the threshold.
    ///
    /// [`consume`]: IoBuffer::consume
    pub fn compact(&mut self, threshold: usize) {
        if self.remaining() == 0 {
            self.clear();
            return;
        }

        if self.remaining() >= threshold {
            return;
        }

        if self.read_offset > 0 {
            if self.remaining() < self.read_offset {
                // Safety: source and destination ranges cannot overlap because the live region
                // is shorter than the gap being closed.
                unsafe {
                    copy_nonoverlapping(self.read_ptr(), self.ptr.as_ptr(), self.remaining())
                }
            } else {
                // Safety: `read_ptr` and `ptr` point within the same allocation, both valid for
                // `remaining()` bytes.
                unsafe { copy(self.read_ptr(), self.ptr.as_ptr(), self.remaining()) }
            }

            self.write_offset = self.remaining();
            self.read_offset = 0;
        }

        if self.cap > self.desired_capacity {
            let layout = Layout::array::<u8>(self.cap).unwrap();
            // Safety: shrinking realloc of a previously allocated region; `write_offset` bytes
            // (<= desired_capacity is not guaranteed, so only shrink down to the live size).
            let new_cap = self.write_offset.max(self.desired_capacity).next_power_of_two();
            if new_cap < self.cap {
                let new_ptr = unsafe { alloc::realloc(self.ptr.as_ptr(), layout, new_cap) };
                self.ptr = match NonNull::new(new_ptr) {
                    Some(p) => p,
                    None => alloc::handle_alloc_error(layout),
                };
                self.cap = new_cap;
            }
        }
    }

    fn read_ptr(&self) -> *mut u8 {
        // Safety: offset is within the allocation by construction (`read_offset <= write_offset
        // <= cap`), and the allocation never exceeds `isize::MAX`.
        unsafe { self.ptr.as_ptr().add(self.read_offset) }
    }

    fn write_ptr(&self) -> *mut u8 {
        // Safety: see `read_ptr`.
        unsafe { self.ptr.as_ptr().add(self.write_offset) }
    }

    fn grow(&mut self) {
        let new_cap = if self.cap == 0 {
            self.desired_capacity
        } else {
            2 * self.cap
        };
        self.grow_to_capacity(new_cap);
    }

    fn grow_to_capacity(&mut self, capacity: usize) {
        assert!(capacity <= isize::MAX as usize);
        let new_cap = capacity.next_power_of_two().min(isize::MAX as usize);
        let new_layout = Layout::array::<u8>(new_cap).unwrap();

        let new_ptr = if self.cap == 0 {
            // Safety: layout is non-zero-sized; allocation failure is handled below.
            unsafe { alloc::alloc(new_layout) }
        } else {
            let old_layout = Layout::array::<u8>(self.cap).unwrap();
            // Safety: `self.ptr` was allocated with `old_layout`.
            unsafe { alloc::realloc(self.ptr.as_ptr(), old_layout, new_layout.size()) }
        };

        self.ptr = match NonNull::new(new_ptr) {
            Some(p) => p,
            None => alloc::handle_alloc_error(new_layout),
        };
        self.cap = new_cap;
    }
}

impl Drop for IoBuffer {
    fn drop(&mut self) {
        if self.cap != 0 {
            let layout = Layout::array::<u8>(self.cap).unwrap();
            // Safety: `u8` has no drop glue; deallocating with the layout it was allocated with.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) }
        }
    }
}

impl Borrow<[u8]> for IoBuffer {
    fn borrow(&self) -> &[u8] {
        // Safety: `read_ptr()` is within the live allocation for `remaining()` bytes, which are
        // initialized because they were written via `mark_written`.
        unsafe { std::slice::from_raw_parts(self.read_ptr(), self.remaining()) }
    }
}

impl BorrowMut<[u8]> for IoBuffer {
    fn borrow_mut(&mut self) -> &mut [u8] {
        // Safety: `write_ptr()` is within the live allocation for `remaining_mut()` bytes; no
        // other borrow of the buffer can be live at the same time as this `&mut self`.
        unsafe { std::slice::from_raw_parts_mut(self.write_ptr(), self.remaining_mut()) }
    }
}

impl Deref for IoBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.borrow()
    }
}

impl DerefMut for IoBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.borrow_mut()
    }
}

impl Write for IoBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.reserve(buf.len());
        self.deref_mut()[..buf.len()].copy_from_slice(buf);
        self.mark_written(buf.len());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_buffer_with_zero_capacity_allocates_nothing() {
        let buf = IoBuffer::new(0);
        assert_eq!(0, buf.remaining());
        assert_eq!(0, buf.remaining_mut());
    }

    #[test]
    fn write_then_consume_round_trips_bytes() {
        let mut buf = IoBuffer::new(16);
        buf.write_all(b"hello").unwrap();
        assert_eq!(b"hello", buf.borrow() as &[u8]);
        buf.consume(5);
        assert_eq!(0, buf.remaining());
    }

    #[test]
    fn partial_consume_leaves_remaining_bytes() {
        let mut buf = IoBuffer::new(16);
        buf.write_all(b"hello world").unwrap();
        buf.consume(6);
        assert_eq!(b"world", buf.borrow() as &[u8]);
    }

    #[test]
    fn compact_below_threshold_shifts_bytes_to_front() {
        let mut buf = IoBuffer::new(4);
        buf.write_all(b"0123456789").unwrap();
        buf.consume(8);
        assert_eq!(b"89", buf.borrow() as &[u8]);
        let cap_before = buf.cap;
        buf.compact(64);
        assert_eq!(b"89", buf.borrow() as &[u8]);
        assert_eq!(0, buf.read_offset);
        assert!(buf.cap <= cap_before);
    }

    #[test]
    fn compact_above_threshold_is_noop() {
        let mut buf = IoBuffer::new(4);
        buf.write_all(b"0123456789").unwrap();
        buf.consume(2);
        let read_offset_before = buf.read_offset;
        buf.compact(1);
        assert_eq!(read_offset_before, buf.read_offset);
    }

    #[test]
    fn clear_resets_cursors_and_shrinks_capacity() {
        let mut buf = IoBuffer::new(4);
        buf.write_all(&[0u8; 100]).unwrap();
        buf.clear();
        assert_eq!(0, buf.remaining());
        assert!(buf.cap <= 4);
    }

    #[test]
    fn grows_to_fit_large_writes() {
        let mut buf = IoBuffer::new(4);
        let data = vec![7u8; 1000];
        buf.write_all(&data).unwrap();
        assert_eq!(1000, buf.remaining());
    }
}
