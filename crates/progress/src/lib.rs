//! Step-by-step progress reporting from a generation worker to a single
//! presentation-side listener.
//!
//! A generation engine runs on its own thread and produces discrete
//! `(step, total)` updates as it denoises. The presentation layer wants every
//! one of those updates, in order, for exactly the run it is currently
//! watching — superseded runs go quiet without ceremony. [`channel`] builds
//! the two halves of that contract:
//!
//! * [`ProgressEmitter`] lives with the engine. It hands out a [`RunHandle`]
//!   per generation attempt and accepts `emit` calls from any thread.
//! * [`ProgressChannel`] lives on the presentation thread. It owns the one
//!   registered listener and drains queued events onto it via [`pump`].
//!
//! Delivery is FIFO per run: events are never reordered or coalesced, unlike
//! a redraw queue, because a progress bar needs every intermediate step.
//!
//! [`pump`]: ProgressChannel::pump

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Run id reserved for "no run is current".
const NO_RUN: u64 = 0;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProgressError {
    #[error("progress total must be positive")]
    ZeroTotal,
    #[error("progress step {step} exceeds total {total}")]
    StepPastTotal { step: u32, total: u32 },
}

/// One progress update: `step` out of `total`, with `step <= total`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressEvent {
    pub step: u32,
    pub total: u32,
}

/// Opaque token identifying one generation attempt.
///
/// Handed out by [`ProgressEmitter::start_run`]; the engine keeps it for the
/// lifetime of the attempt and uses it to tag every `emit`. Comparing handles
/// for equality is the only operation callers get beyond
/// [`is_current`](RunHandle::is_current).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RunHandle {
    id: u64,
}

impl RunHandle {
    /// Returns true while this handle still names the emitter's current run.
    pub fn is_current(&self, emitter: &ProgressEmitter) -> bool {
        emitter.is_current(*self)
    }
}

struct Shared {
    // Monotonic id source; never reset, so ids order runs across the whole
    // session even after finish_run clears the current slot.
    next_run: AtomicU64,
    current_run: AtomicU64,
}

/// Engine-side half: starts runs and submits progress updates.
///
/// Cheap to clone; all clones share the same run counter, so at most one run
/// is current across every clone.
#[derive(Clone)]
pub struct ProgressEmitter {
    shared: Arc<Shared>,
    sender: Sender<QueuedEvent>,
}

/// Presentation-side half: owns the registered listener and drains the queue.
pub struct ProgressChannel {
    receiver: Receiver<QueuedEvent>,
    listener: Option<Box<dyn FnMut(ProgressEvent)>>,
    newest_delivered_run: u64,
}

#[derive(Clone, Copy, Debug)]
struct QueuedEvent {
    run: u64,
    event: ProgressEvent,
}

/// Creates a connected channel/emitter pair for one generation session.
///
/// Inject the emitter into the engine and keep the channel with the
/// presentation loop; dropping both tears the session down.
pub fn channel() -> (ProgressChannel, ProgressEmitter) {
    let shared = Arc::new(Shared {
        next_run: AtomicU64::new(NO_RUN),
        current_run: AtomicU64::new(NO_RUN),
    });
    let (sender, receiver) = unbounded();
    let channel = ProgressChannel {
        receiver,
        listener: None,
        newest_delivered_run: NO_RUN,
    };
    let emitter = ProgressEmitter { shared, sender };
    (channel, emitter)
}

impl ProgressEmitter {
    /// Begins a new generation run, superseding any current one.
    ///
    /// Events submitted against the previous handle after this point are
    /// dropped silently.
    pub fn start_run(&self) -> RunHandle {
        let id = self.shared.next_run.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.current_run.store(id, Ordering::Release);
        tracing::debug!(run = id, "generation run started");
        RunHandle { id }
    }

    /// Marks the run as finished, making its handle non-current.
    ///
    /// A no-op if the handle was already superseded. Events already queued
    /// for this run are still delivered in order.
    pub fn finish_run(&self, handle: RunHandle) {
        if self
            .shared
            .current_run
            .compare_exchange(handle.id, NO_RUN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::debug!(run = handle.id, "generation run finished");
        }
    }

    /// Submits one progress update for the given run.
    ///
    /// Bounds violations (`total == 0` or `step > total`) are errors returned
    /// to the caller and never reach the listener. A stale handle is not an
    /// error: superseded work is expected, and the update is dropped quietly.
    pub fn emit(&self, handle: RunHandle, step: u32, total: u32) -> Result<(), ProgressError> {
        if total == 0 {
            return Err(ProgressError::ZeroTotal);
        }
        if step > total {
            return Err(ProgressError::StepPastTotal { step, total });
        }
        if !self.is_current(handle) {
            tracing::trace!(run = handle.id, step, total, "dropping progress for superseded run");
            return Ok(());
        }
        let queued = QueuedEvent {
            run: handle.id,
            event: ProgressEvent { step, total },
        };
        // The channel half may already be gone during session teardown; the
        // engine should not fail because nobody is listening any more.
        let _ = self.sender.send(queued);
        Ok(())
    }

    /// Returns true while `handle` names the current run.
    pub fn is_current(&self, handle: RunHandle) -> bool {
        handle.id != NO_RUN && self.shared.current_run.load(Ordering::Acquire) == handle.id
    }
}

impl ProgressChannel {
    /// Registers the listener that receives pumped events.
    ///
    /// Replaces any previously registered listener, which simply stops
    /// receiving events — no final notice is sent.
    pub fn register_listener<F>(&mut self, listener: F)
    where
        F: FnMut(ProgressEvent) + 'static,
    {
        if self.listener.is_some() {
            tracing::debug!("progress listener replaced");
        }
        self.listener = Some(Box::new(listener));
    }

    /// Drains queued events onto the registered listener, in emit order.
    ///
    /// Must be called from the presentation thread that owns the channel;
    /// this is the hop that marshals worker-thread emits onto the
    /// presentation context. Returns the number of events delivered.
    ///
    /// Once an event of run N has been delivered, any event of an older run
    /// still in flight is discarded: an emit that passed its staleness check
    /// concurrently with `start_run` may land in the queue after the new
    /// run's first event, and must not surface out of run order.
    pub fn pump(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(queued) = self.receiver.try_recv() {
            if queued.run < self.newest_delivered_run {
                tracing::trace!(
                    run = queued.run,
                    step = queued.event.step,
                    "discarding event that raced a newer run"
                );
                continue;
            }
            self.newest_delivered_run = queued.run;
            if let Some(listener) = self.listener.as_mut() {
                listener(queued.event);
                delivered += 1;
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::thread;

    fn collecting_channel() -> (ProgressChannel, ProgressEmitter, Rc<RefCell<Vec<ProgressEvent>>>) {
        let (mut channel, emitter) = channel();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        channel.register_listener(move |event| sink.borrow_mut().push(event));
        (channel, emitter, seen)
    }

    #[test]
    fn delivers_events_in_emit_order() {
        let (mut channel, emitter, seen) = collecting_channel();
        let run = emitter.start_run();
        for step in 1..=5 {
            emitter.emit(run, step, 5).unwrap();
        }
        assert_eq!(channel.pump(), 5);
        let steps: Vec<u32> = seen.borrow().iter().map(|event| event.step).collect();
        assert_eq!(steps, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn queued_events_survive_a_new_run_but_keep_run_order() {
        let (mut channel, emitter, seen) = collecting_channel();
        let run_a = emitter.start_run();
        emitter.emit(run_a, 1, 5).unwrap();
        emitter.emit(run_a, 2, 5).unwrap();
        emitter.emit(run_a, 3, 5).unwrap();
        let run_b = emitter.start_run();
        emitter.emit(run_b, 1, 3).unwrap();
        channel.pump();
        assert_eq!(
            *seen.borrow(),
            vec![
                ProgressEvent { step: 1, total: 5 },
                ProgressEvent { step: 2, total: 5 },
                ProgressEvent { step: 3, total: 5 },
                ProgressEvent { step: 1, total: 3 },
            ]
        );
    }

    #[test]
    fn stale_handle_emit_is_dropped_silently() {
        let (mut channel, emitter, seen) = collecting_channel();
        let run_a = emitter.start_run();
        let _run_b = emitter.start_run();
        assert!(emitter.emit(run_a, 4, 5).is_ok());
        assert_eq!(channel.pump(), 0);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn bounds_violations_error_without_delivery() {
        let (mut channel, emitter, seen) = collecting_channel();
        let run = emitter.start_run();
        assert_eq!(
            emitter.emit(run, 6, 5),
            Err(ProgressError::StepPastTotal { step: 6, total: 5 })
        );
        assert_eq!(emitter.emit(run, 1, 0), Err(ProgressError::ZeroTotal));
        assert_eq!(channel.pump(), 0);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn replacing_the_listener_silences_the_old_one() {
        let (mut channel, emitter) = channel();
        let first = Rc::new(RefCell::new(Vec::new()));
        let second = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&first);
        channel.register_listener(move |event| sink.borrow_mut().push(event));

        let run = emitter.start_run();
        emitter.emit(run, 1, 2).unwrap();
        channel.pump();

        let sink = Rc::clone(&second);
        channel.register_listener(move |event| sink.borrow_mut().push(event));
        emitter.emit(run, 2, 2).unwrap();
        channel.pump();

        assert_eq!(first.borrow().len(), 1);
        assert_eq!(second.borrow().len(), 1);
        assert_eq!(second.borrow()[0], ProgressEvent { step: 2, total: 2 });
    }

    #[test]
    fn finish_run_makes_the_handle_stale() {
        let (mut channel, emitter, seen) = collecting_channel();
        let run = emitter.start_run();
        assert!(run.is_current(&emitter));
        emitter.emit(run, 1, 1).unwrap();
        emitter.finish_run(run);
        assert!(!run.is_current(&emitter));
        assert!(emitter.emit(run, 1, 1).is_ok());
        assert_eq!(channel.pump(), 1);
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn finish_of_a_superseded_run_leaves_the_current_one_alone() {
        let (_channel, emitter) = channel();
        let run_a = emitter.start_run();
        let run_b = emitter.start_run();
        emitter.finish_run(run_a);
        assert!(run_b.is_current(&emitter));
    }

    #[test]
    fn events_cross_the_worker_hop_in_order() {
        let (mut channel, emitter, seen) = collecting_channel();
        let run = emitter.start_run();
        let worker_emitter = emitter.clone();
        let worker = thread::spawn(move || {
            for step in 1..=20 {
                worker_emitter.emit(run, step, 20).unwrap();
            }
        });
        worker.join().unwrap();
        assert_eq!(channel.pump(), 20);
        let steps: Vec<u32> = seen.borrow().iter().map(|event| event.step).collect();
        assert_eq!(steps, (1..=20).collect::<Vec<u32>>());
    }

    #[test]
    fn pump_without_a_listener_discards_quietly() {
        let (mut channel, emitter) = channel();
        let run = emitter.start_run();
        emitter.emit(run, 1, 2).unwrap();
        assert_eq!(channel.pump(), 0);
    }
}
