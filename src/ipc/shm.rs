//! Anonymous shared memory, inherited through `fork`.
//!
//! Grounded on `original_source/src/shared_memory.c`'s
//! `shm_open`+`mmap(..., MAP_SHARED, ...)` pair. This crate maps
//! anonymously instead of `shm_open`ing a named segment: every reader of
//! this memory is a `fork`ed descendant of the process that allocates it,
//! exactly the case spec §9 describes ("a shared-memory region initialized
//! once by the admitter and inherited by children") — `shm_open`'s
//! filesystem-visible name exists so *unrelated* processes can attach to a
//! segment, a capability this server never needs.

use std::io;
use std::ptr::NonNull;

/// Allocates `len` zero-initialized bytes that stay bit-for-bit identical
/// across `fork()`: every child maps the same physical pages `MAP_SHARED`
/// backs at the parent's virtual address, so a write on either side is
/// visible to the other without any further `mmap` call.
///
/// The mapping is intentionally never `munmap`'d — every holder is a
/// process that either forked this one or was forked by it, and the kernel
/// reclaims the mapping when the process exits, the same way the admitter
/// never bothers unmapping before `exit()` in `original_source/src/master.c`.
pub fn alloc(len: usize) -> io::Result<NonNull<u8>> {
    assert!(len > 0, "shared region length must be nonzero");
    // SAFETY: `MAP_ANONYMOUS` ignores `fd`/`offset`; the kernel backs the
    // mapping with zeroed pages, matching the original's explicit
    // `memset(data, 0, size)` right after its own `mmap` call.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(NonNull::new(ptr as *mut u8).expect("mmap returned a non-null pointer on success"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_region_starts_zeroed() {
        let ptr = alloc(64).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn writes_are_visible_through_a_second_cast_of_the_same_pointer() {
        let ptr = alloc(8).unwrap();
        unsafe {
            std::ptr::write(ptr.as_ptr() as *mut u64, 0xdead_beef);
            assert_eq!(std::ptr::read(ptr.as_ptr() as *const u64), 0xdead_beef);
        }
    }
}
