use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex, RwLock,
};

use crate::event::AudioEvent;

pub mod gain;
pub mod writer;

// -------------------------------------------------------------------------------------------------

/// A single stage of the dispatch chain.
///
/// Processors are invoked on the dispatcher's worker thread only. Mutations made to the event are
/// visible to the processors that follow in the chain.
pub trait AudioProcessor: Send {
    /// Process one event. Return `false` to short-circuit the rest of the chain for this block.
    fn process(&mut self, event: &mut AudioEvent) -> bool;

    /// Called exactly once, either when the processor is removed from its chain or when the
    /// dispatcher tears the chain down.
    fn processing_finished(&mut self) {}
}

// -------------------------------------------------------------------------------------------------

/// Identifies a processor within a [`ProcessorChain`] for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessorId(usize);

/// Generates a unique processor id for a program run, by counting atomically upwards from 1.
fn unique_processor_id() -> ProcessorId {
    static ID_COUNTER: AtomicUsize = AtomicUsize::new(1);
    ProcessorId(ID_COUNTER.fetch_add(1, Ordering::Relaxed))
}

// -------------------------------------------------------------------------------------------------

struct ChainEntry {
    id: ProcessorId,
    processor: Mutex<Box<dyn AudioProcessor>>,
    finished: AtomicBool,
}

impl ChainEntry {
    /// Run the finalizer, guarded so it fires at most once per processor lifetime.
    fn finish(&self) {
        if !self.finished.swap(true, Ordering::SeqCst) {
            self.processor.lock().unwrap().processing_finished();
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// An ordered, concurrently modifiable list of processors.
///
/// Iteration works on a snapshot, so processors can be added or removed from any thread while the
/// worker is in the middle of a pass; newly added processors take effect with the next event.
/// Insertion order is preserved across snapshots.
#[derive(Clone)]
pub struct ProcessorChain {
    entries: Arc<RwLock<Vec<Arc<ChainEntry>>>>,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Append a processor to the chain.
    pub fn add(&self, processor: impl AudioProcessor + 'static) -> ProcessorId {
        self.add_boxed(Box::new(processor))
    }

    pub fn add_boxed(&self, processor: Box<dyn AudioProcessor>) -> ProcessorId {
        let entry = Arc::new(ChainEntry {
            id: unique_processor_id(),
            processor: Mutex::new(processor),
            finished: AtomicBool::new(false),
        });
        let id = entry.id;
        self.entries.write().unwrap().push(entry);
        id
    }

    /// Detach a processor and invoke its finalizer. Returns false for unknown ids.
    pub fn remove(&self, id: ProcessorId) -> bool {
        let removed = {
            let mut entries = self.entries.write().unwrap();
            match entries.iter().position(|entry| entry.id == id) {
                Some(index) => Some(entries.remove(index)),
                None => None,
            }
        };
        match removed {
            Some(entry) => {
                entry.finish();
                true
            }
            None => false,
        }
    }

    /// Visit all processors in insertion order until the visitor returns `false`.
    /// Returns `false` when the pass was short-circuited.
    pub fn for_each(&self, mut f: impl FnMut(&mut dyn AudioProcessor) -> bool) -> bool {
        let snapshot = self.entries.read().unwrap().clone();
        for entry in snapshot.iter() {
            if !f(&mut **entry.processor.lock().unwrap()) {
                return false;
            }
        }
        true
    }

    /// Run every remaining processor's finalizer. Processors already finalized through
    /// [`ProcessorChain::remove`] are skipped.
    pub fn finish_all(&self) {
        let snapshot = self.entries.read().unwrap().clone();
        for entry in snapshot.iter() {
            entry.finish();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}

impl Default for ProcessorChain {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::AudioFormat;

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        pass: bool,
    }

    impl AudioProcessor for Recorder {
        fn process(&mut self, _event: &mut AudioEvent) -> bool {
            self.log.lock().unwrap().push(format!("process {}", self.label));
            self.pass
        }

        fn processing_finished(&mut self) {
            self.log.lock().unwrap().push(format!("finished {}", self.label));
        }
    }

    fn test_event() -> AudioEvent {
        AudioEvent::new(AudioFormat::pcm16le(44100.0, 1).unwrap())
    }

    #[test]
    fn iterates_in_insertion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = ProcessorChain::new();
        for label in ["a", "b", "c"] {
            chain.add(Recorder {
                label,
                log: Arc::clone(&log),
                pass: true,
            });
        }
        let mut event = test_event();
        assert!(chain.for_each(|p| p.process(&mut event)));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["process a", "process b", "process c"]
        );
    }

    #[test]
    fn short_circuits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = ProcessorChain::new();
        chain.add(Recorder {
            label: "a",
            log: Arc::clone(&log),
            pass: false,
        });
        chain.add(Recorder {
            label: "b",
            log: Arc::clone(&log),
            pass: true,
        });
        let mut event = test_event();
        assert!(!chain.for_each(|p| p.process(&mut event)));
        assert_eq!(*log.lock().unwrap(), vec!["process a"]);
    }

    #[test]
    fn finalizer_fires_exactly_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = ProcessorChain::new();
        let id = chain.add(Recorder {
            label: "a",
            log: Arc::clone(&log),
            pass: true,
        });
        chain.add(Recorder {
            label: "b",
            log: Arc::clone(&log),
            pass: true,
        });

        assert!(chain.remove(id));
        assert!(!chain.remove(id));
        chain.finish_all();
        chain.finish_all();
        assert_eq!(*log.lock().unwrap(), vec!["finished a", "finished b"]);
    }

    #[test]
    fn add_during_iteration() {
        let chain = ProcessorChain::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        chain.add(Recorder {
            label: "a",
            log: Arc::clone(&log),
            pass: true,
        });
        let mut event = test_event();
        let inner = chain.clone();
        let inner_log = Arc::clone(&log);
        chain.for_each(|p| {
            // appending mid-pass must not deadlock; the new processor joins the next pass
            inner.add(Recorder {
                label: "late",
                log: Arc::clone(&inner_log),
                pass: true,
            });
            p.process(&mut event)
        });
        assert_eq!(chain.len(), 2);
        assert_eq!(*log.lock().unwrap(), vec!["process a"]);
    }
}
