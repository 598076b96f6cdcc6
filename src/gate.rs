use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

// Upper 12 bits: writers. Lower 20 bits: readers.
const WRITER: u32 = 0x0010_0000;
const WRITER_MASK: u32 = 0xfff0_0000;
const READER_MASK: u32 = 0x000f_ffff;

/// Reader/writer counter guarding a node's tower of forward pointers.
///
/// Many readers may load `next[]` at once; a writer waits for them to drain and
/// keeps new readers out until it is done. Waiting is a spin with `yield_now`.
#[derive(Debug, Default)]
pub(crate) struct Gate {
    accessing_next: AtomicU32,
}

impl Gate {
    pub(crate) const fn new() -> Self {
        Gate {
            accessing_next: AtomicU32::new(0),
        }
    }

    pub(crate) fn read_lock(&self) {
        loop {
            self.wait_for_writer();

            let prev = self.accessing_next.fetch_add(1, Ordering::SeqCst);
            debug_assert!(prev & READER_MASK != READER_MASK, "reader count overflow");
            if self.accessing_next.load(Ordering::SeqCst) & WRITER_MASK == 0 {
                return;
            }

            // A writer slipped in before our increment was observed; let it go first.
            self.accessing_next.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[inline]
    pub(crate) fn read_unlock(&self) {
        let prev = self.accessing_next.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev & READER_MASK != 0, "read_unlock without read_lock");
    }

    pub(crate) fn write_lock(&self) {
        loop {
            let current = self.wait_for_writer();
            if self
                .accessing_next
                .compare_exchange_weak(
                    current,
                    current + WRITER,
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                )
                .is_err()
            {
                continue;
            }

            while self.accessing_next.load(Ordering::SeqCst) & READER_MASK != 0 {
                thread::yield_now();
            }
            return;
        }
    }

    #[inline]
    pub(crate) fn write_unlock(&self) {
        let prev = self.accessing_next.fetch_sub(WRITER, Ordering::SeqCst);
        debug_assert!(prev & WRITER_MASK == WRITER, "write_unlock without write_lock");
    }

    /// No reader or writer is inside.
    #[inline]
    pub(crate) fn is_idle(&self) -> bool {
        self.accessing_next.load(Ordering::SeqCst) == 0
    }

    fn wait_for_writer(&self) -> u32 {
        let mut current = self.accessing_next.load(Ordering::SeqCst);
        while current & WRITER_MASK != 0 {
            thread::yield_now();
            current = self.accessing_next.load(Ordering::SeqCst);
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    #[test]
    fn readers_share_the_gate() {
        let gate = Gate::new();
        gate.read_lock();
        gate.read_lock();
        assert_eq!(gate.accessing_next.load(Ordering::Relaxed), 2);
        assert!(!gate.is_idle());

        gate.read_unlock();
        gate.read_unlock();
        assert!(gate.is_idle());
    }

    #[test]
    fn writer_sets_the_writer_bits() {
        let gate = Gate::new();
        gate.write_lock();
        assert_eq!(gate.accessing_next.load(Ordering::Relaxed), WRITER);
        gate.write_unlock();
        assert!(gate.is_idle());
    }

    #[test]
    fn writer_waits_for_readers() {
        let gate = Arc::new(Gate::new());
        let written = Arc::new(AtomicUsize::new(0));

        gate.read_lock();

        let handle = {
            let gate = Arc::clone(&gate);
            let written = Arc::clone(&written);
            thread::spawn(move || {
                gate.write_lock();
                written.store(1, Ordering::SeqCst);
                gate.write_unlock();
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(written.load(Ordering::SeqCst), 0);

        gate.read_unlock();
        handle.join().unwrap();
        assert_eq!(written.load(Ordering::SeqCst), 1);
        assert!(gate.is_idle());
    }

    #[test]
    fn writers_are_exclusive() {
        // Non-atomic read-modify-write under the write lock must not lose updates.
        let num_threads = 8;
        let iterations = 2_000;
        let gate = Arc::new(Gate::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(num_threads));

        let handles: Vec<_> = (0..num_threads)
            .map(|i| {
                let gate = Arc::clone(&gate);
                let counter = Arc::clone(&counter);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..iterations {
                        if i % 2 == 0 {
                            gate.write_lock();
                            let value = counter.load(Ordering::Relaxed);
                            counter.store(value + 1, Ordering::Relaxed);
                            gate.write_unlock();
                        } else {
                            gate.read_lock();
                            let _ = counter.load(Ordering::Relaxed);
                            gate.read_unlock();
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), num_threads / 2 * iterations);
        assert!(gate.is_idle());
    }
}
