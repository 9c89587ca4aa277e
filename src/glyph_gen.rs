//! Parallel glyph generation.
//!
//! Glyph records are produced off the rendering thread by a fixed number of
//! scoped workers. Each worker claims the next glyph index from a shared
//! atomic cursor and writes into that index's own result slot, so no slot is
//! written twice and no lock guards the results. The caller joins all
//! workers before uploading anything to an atlas.

use std::num::NonZeroUsize;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};

/// Produce `count` values by calling `generate(index)` for every index in
/// `0..count` on `threads` worker threads.
///
/// The result is in index order and does not depend on `threads`. A thread
/// count of zero is treated as one.
///
/// # Example
///
/// ```
/// let squares = glpaint::glyph_gen::generate_glyphs(5, 3, |i| i * i);
/// assert_eq!(squares, vec![0, 1, 4, 9, 16]);
/// ```
pub fn generate_glyphs<T, F>(count: usize, threads: usize, generate: F) -> Vec<T>
where
    T: Send + Sync,
    F: Fn(usize) -> T + Sync,
{
    let threads = threads.clamp(1, count.max(1));
    let cursor = AtomicUsize::new(0);
    let slots: Vec<OnceLock<T>> = (0..count).map(|_| OnceLock::new()).collect();

    let worker = || loop {
        let index = cursor.fetch_add(1, Ordering::Relaxed);
        if index >= count {
            break;
        }
        let produced = slots[index].set(generate(index));
        debug_assert!(produced.is_ok(), "glyph {index} claimed twice");
    };

    if threads == 1 {
        worker();
    } else {
        std::thread::scope(|scope| {
            for _ in 0..threads {
                scope.spawn(&worker);
            }
        });
    }
    tracing::debug!(count, threads, "generated glyphs");

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| match slot.into_inner() {
            Some(value) => value,
            // Every index below `count` is claimed by exactly one worker
            // and scope() joins them all.
            None => unreachable!("glyph {index} was never generated"),
        })
        .collect()
}

/// Number of worker threads to use when the caller has no preference.
#[must_use]
pub fn default_thread_count() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// A library handle shared by glyph workers.
///
/// Calls that mutate library-global state go through
/// [`lock`](Self::lock); read-only queries use [`get`](Self::get) and take
/// no lock. The split is the caller's contract: `L` must only expose
/// thread-safe state through `&L`.
pub struct SharedLibrary<L> {
    library: L,
    mutate: Mutex<()>,
}

/// Exclusive access to a [`SharedLibrary`] for one mutating call.
pub struct LibraryGuard<'a, L> {
    library: &'a L,
    _guard: MutexGuard<'a, ()>,
}

impl<L> std::ops::Deref for LibraryGuard<'_, L> {
    type Target = L;

    fn deref(&self) -> &L {
        self.library
    }
}

impl<L: Sync> SharedLibrary<L> {
    /// Wrap `library`.
    pub fn new(library: L) -> Self {
        Self {
            library,
            mutate: Mutex::new(()),
        }
    }

    /// Unlocked access for read-only queries such as font metrics.
    pub fn get(&self) -> &L {
        &self.library
    }

    /// Serialize a call that mutates library-global state.
    pub fn lock(&self) -> LibraryGuard<'_, L> {
        LibraryGuard {
            library: &self.library,
            _guard: self.mutate.lock(),
        }
    }

    /// Run `f` while holding the mutation lock.
    pub fn with_lock<R>(&self, f: impl FnOnce(&L) -> R) -> R {
        let guard = self.lock();
        f(&guard)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    use crate::atlas::glyph::GlyphRecord;

    fn rasterize(index: usize) -> GlyphRecord {
        let side = 1 + (index % 7) as u32;
        let texels = (0..side * side)
            .map(|t| (t as usize * 31 + index) as u8)
            .collect();
        GlyphRecord {
            width: side,
            height: side,
            texels,
            geometry: vec![index as f32; 4 * (index % 3)],
        }
    }

    #[test]
    fn results_do_not_depend_on_thread_count() {
        let single = generate_glyphs(500, 1, rasterize);
        let many = generate_glyphs(500, 8, rasterize);
        assert_eq!(single, many);
    }

    #[test]
    fn every_index_is_generated_exactly_once() {
        let calls: Vec<AtomicU32> = (0..1000).map(|_| AtomicU32::new(0)).collect();
        let out = generate_glyphs(1000, 8, |i| {
            calls[i].fetch_add(1, Ordering::Relaxed);
            i
        });
        assert_eq!(out, (0..1000).collect::<Vec<_>>());
        assert!(calls.iter().all(|c| c.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn empty_and_zero_threads() {
        assert!(generate_glyphs(0, 4, |i| i).is_empty());
        assert_eq!(generate_glyphs(3, 0, |i| i), vec![0, 1, 2]);
    }

    #[test]
    fn shared_library_serializes_mutating_calls() {
        struct Library {
            in_call: AtomicU32,
            overlaps: AtomicU32,
            units_per_em: u32,
        }

        let library = SharedLibrary::new(Library {
            in_call: AtomicU32::new(0),
            overlaps: AtomicU32::new(0),
            units_per_em: 2048,
        });
        let out = generate_glyphs(200, 8, |i| {
            library.with_lock(|lib| {
                if lib.in_call.fetch_add(1, Ordering::SeqCst) != 0 {
                    lib.overlaps.fetch_add(1, Ordering::SeqCst);
                }
                std::thread::yield_now();
                lib.in_call.fetch_sub(1, Ordering::SeqCst);
            });
            library.get().units_per_em + i as u32
        });
        assert_eq!(out[10], 2058);
        assert_eq!(library.get().overlaps.load(Ordering::SeqCst), 0);
    }
}
