//! Ordered event handoff from the capture worker to the coordination
//! context.
//!
//! A single bounded queue carries every outbound event so that delivery
//! order is preserved exactly as produced. Frame events are best-effort:
//! when the consumer falls behind, the incoming frame is dropped at the
//! source and counted, never queued — the display path then always shows
//! the most recent available frame instead of accumulating latency.
//! Photo, error, and state events always enqueue.

use crate::errors::CaptureError;
use crate::types::{PhotoCapture, PreviewFrame, SessionState};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// An outbound session event.
#[derive(Debug, Clone, Serialize)]
pub enum SessionEvent {
    Frame(PreviewFrame),
    Photo(PhotoCapture),
    Error(CaptureError),
    StateChanged(SessionState),
}

impl SessionEvent {
    pub fn is_frame(&self) -> bool {
        matches!(self, SessionEvent::Frame(_))
    }
}

struct ChannelInner {
    items: VecDeque<SessionEvent>,
    queued_frames: usize,
    frame_capacity: usize,
    dropped_frames: u64,
    closed: bool,
}

pub(crate) struct EventChannel {
    inner: Mutex<ChannelInner>,
    cv: Condvar,
}

impl EventChannel {
    pub(crate) fn new(frame_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(ChannelInner {
                items: VecDeque::new(),
                queued_frames: 0,
                frame_capacity: frame_capacity.max(1),
                dropped_frames: 0,
                closed: false,
            }),
            cv: Condvar::new(),
        })
    }

    /// Enqueue a control event (photo, error, state change). Never dropped
    /// while the channel is open.
    pub(crate) fn send(&self, event: SessionEvent) {
        let mut g = self.inner.lock().expect("lock poisoned");
        if g.closed {
            return;
        }
        if event.is_frame() {
            g.queued_frames += 1;
        }
        g.items.push_back(event);
        self.cv.notify_one();
    }

    /// Enqueue a frame, or drop it at the source when the consumer already
    /// has `frame_capacity` frames pending.
    pub(crate) fn send_frame(&self, frame: PreviewFrame) {
        let mut g = self.inner.lock().expect("lock poisoned");
        if g.closed {
            return;
        }
        if g.queued_frames >= g.frame_capacity {
            g.dropped_frames = g.dropped_frames.saturating_add(1);
            return;
        }
        g.queued_frames += 1;
        g.items.push_back(SessionEvent::Frame(frame));
        self.cv.notify_one();
    }

    pub(crate) fn close(&self) {
        let mut g = self.inner.lock().expect("lock poisoned");
        g.closed = true;
        self.cv.notify_all();
    }
}

/// Consumer handle for the session's event stream.
///
/// Intended for a single coordination context; events are delivered in the
/// order they were produced.
#[derive(Clone)]
pub struct EventReceiver {
    channel: Arc<EventChannel>,
}

impl EventReceiver {
    pub(crate) fn new(channel: Arc<EventChannel>) -> Self {
        Self { channel }
    }

    /// Pop the next pending event without waiting.
    pub fn try_recv(&self) -> Option<SessionEvent> {
        let mut g = self.channel.inner.lock().expect("lock poisoned");
        pop(&mut g)
    }

    /// Wait up to `timeout` for the next event. Returns `None` on timeout,
    /// or immediately when the channel is closed and drained.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<SessionEvent> {
        let mut g = self.channel.inner.lock().expect("lock poisoned");
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = pop(&mut g) {
                return Some(event);
            }
            if g.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (ng, _) = self
                .channel
                .cv
                .wait_timeout(g, deadline - now)
                .expect("lock poisoned");
            g = ng;
        }
    }

    /// Pop every currently pending event.
    pub fn drain(&self) -> Vec<SessionEvent> {
        let mut g = self.channel.inner.lock().expect("lock poisoned");
        let mut out = Vec::with_capacity(g.items.len());
        while let Some(event) = pop(&mut g) {
            out.push(event);
        }
        out
    }

    /// Frames dropped at the source since the channel was created.
    pub fn dropped_frames(&self) -> u64 {
        self.channel.inner.lock().expect("lock poisoned").dropped_frames
    }

    pub fn is_closed(&self) -> bool {
        self.channel.inner.lock().expect("lock poisoned").closed
    }
}

fn pop(g: &mut ChannelInner) -> Option<SessionEvent> {
    let event = g.items.pop_front()?;
    if event.is_frame() {
        g.queued_frames -= 1;
    }
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn frame(sequence: u64) -> PreviewFrame {
        PreviewFrame {
            id: Uuid::new_v4(),
            sequence,
            timestamp_us: sequence * 33_333,
            width: 4,
            height: 4,
            pixel_format: "MJPG".to_string(),
            device_id: "0".to_string(),
            data: vec![0; 16],
        }
    }

    #[test]
    fn preserves_production_order() {
        let chan = EventChannel::new(8);
        let rx = EventReceiver::new(chan.clone());
        chan.send_frame(frame(1));
        chan.send(SessionEvent::StateChanged(SessionState::Running));
        chan.send_frame(frame(2));

        assert!(matches!(rx.try_recv(), Some(SessionEvent::Frame(f)) if f.sequence == 1));
        assert!(matches!(rx.try_recv(), Some(SessionEvent::StateChanged(SessionState::Running))));
        assert!(matches!(rx.try_recv(), Some(SessionEvent::Frame(f)) if f.sequence == 2));
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn overflowed_frames_are_dropped_at_source() {
        let chan = EventChannel::new(2);
        let rx = EventReceiver::new(chan.clone());
        chan.send_frame(frame(1));
        chan.send_frame(frame(2));
        chan.send_frame(frame(3));

        assert_eq!(rx.dropped_frames(), 1);
        assert!(matches!(rx.try_recv(), Some(SessionEvent::Frame(f)) if f.sequence == 1));
        assert!(matches!(rx.try_recv(), Some(SessionEvent::Frame(f)) if f.sequence == 2));
        assert!(rx.try_recv().is_none());

        // Draining frees capacity for new frames.
        chan.send_frame(frame(4));
        assert!(matches!(rx.try_recv(), Some(SessionEvent::Frame(f)) if f.sequence == 4));
    }

    #[test]
    fn control_events_bypass_frame_capacity() {
        let chan = EventChannel::new(1);
        let rx = EventReceiver::new(chan.clone());
        chan.send_frame(frame(1));
        chan.send(SessionEvent::StateChanged(SessionState::Reconfiguring));
        chan.send(SessionEvent::StateChanged(SessionState::Running));

        let events = rx.drain();
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn closed_channel_drains_then_returns_none() {
        let chan = EventChannel::new(4);
        let rx = EventReceiver::new(chan.clone());
        chan.send_frame(frame(1));
        chan.close();
        chan.send_frame(frame(2));

        assert!(rx.recv_timeout(Duration::from_millis(10)).is_some());
        assert!(rx.recv_timeout(Duration::from_millis(10)).is_none());
        assert!(rx.is_closed());
    }
}
