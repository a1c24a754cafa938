//! Bounded frame queue shared by the bundled hosts.
//!
//! The producer side never waits: when the consumer already holds
//! `max_frames` undelivered frames the new one is dropped, which is how a
//! compositor behaves when every buffer of the swap chain is in use.

use super::{DrawingTarget, Frame, FrameBuffer, FrameBufferSpec, FrameListener, HostError};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

type ListenerSlot = Arc<Mutex<Option<Arc<dyn FrameListener>>>>;

/// Result of handing a frame to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// The queue was full; the frame was released immediately.
    Dropped,
    /// The consumer side is gone.
    Closed,
}

/// Consumer side. Implements [`FrameBuffer`] for the capture core.
pub struct FrameQueue<F> {
    spec: FrameBufferSpec,
    target: DrawingTarget,
    tx: mpsc::Sender<F>,
    rx: mpsc::Receiver<F>,
    listener: ListenerSlot,
}

/// Producer side, held by whatever renders into the queue.
pub struct FrameProducer<F> {
    tx: mpsc::Sender<F>,
    listener: ListenerSlot,
}

impl<F> Clone for FrameProducer<F> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            listener: self.listener.clone(),
        }
    }
}

impl<F: Frame + 'static> FrameQueue<F> {
    pub fn new(spec: FrameBufferSpec, target: DrawingTarget) -> Self {
        let (tx, rx) = mpsc::channel(spec.max_frames.max(1));
        Self {
            spec,
            target,
            tx,
            rx,
            listener: Arc::new(Mutex::new(None)),
        }
    }

    pub fn producer(&self) -> FrameProducer<F> {
        FrameProducer {
            tx: self.tx.clone(),
            listener: self.listener.clone(),
        }
    }
}

impl<F: Frame + 'static> FrameBuffer for FrameQueue<F> {
    fn acquire_latest_frame(&mut self) -> Result<Option<Box<dyn Frame>>, HostError> {
        let mut latest: Option<F> = None;
        loop {
            match self.rx.try_recv() {
                // Assigning drops the older frame, releasing it.
                Ok(frame) => latest = Some(frame),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(latest.map(|frame| Box::new(frame) as Box<dyn Frame>))
    }

    fn set_frame_listener(&mut self, listener: Option<Arc<dyn FrameListener>>) {
        match self.listener.lock() {
            Ok(mut slot) => *slot = listener,
            Err(poisoned) => *poisoned.into_inner() = listener,
        }
    }

    fn drawing_target(&self) -> DrawingTarget {
        self.target
    }

    fn spec(&self) -> FrameBufferSpec {
        self.spec
    }
}

impl<F> FrameProducer<F> {
    /// Queues a frame and notifies the listener. Never blocks.
    pub fn submit(&self, frame: F) -> SubmitOutcome {
        match self.tx.try_send(frame) {
            Ok(()) => {
                let listener = self.listener.lock().ok().and_then(|slot| slot.clone());
                if let Some(listener) = listener {
                    listener.on_frame_available();
                }
                SubmitOutcome::Queued
            }
            Err(TrySendError::Full(_)) => SubmitOutcome::Dropped,
            Err(TrySendError::Closed(_)) => SubmitOutcome::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
