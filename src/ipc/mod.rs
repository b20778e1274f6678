//! Cross-process primitives the admitter/worker split (spec §4.5/§9) is
//! built on: an anonymous `mmap(MAP_SHARED)` region inherited through
//! `fork(2)` in place of the original's named `shm_open` segment, named
//! POSIX semaphores (`sem_open`) reused verbatim from
//! `original_source/src/semaphores.c`, and `SCM_RIGHTS` fd passing over a
//! `socketpair` inherited the same way — the piece `original_source/`
//! never implements, needed because `master.c` forks every worker before
//! its accept loop starts, so a later `accept()`'s fd is otherwise only
//! ever valid in the admitter's own descriptor table.

pub mod fdpass;
pub mod process;
pub mod sem;
pub mod shm;
