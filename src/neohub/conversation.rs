//! conversation.rs
//! Positional request/response correlator.
//!
//! The hub protocol carries no message ids: the head of the queue owns the next inbound
//! text frame. Correctness therefore rests on two structural rules enforced here:
//! - strict FIFO: conversations go on the wire in submission order;
//! - single in flight: nothing else is sent until the head resolves (response, error, timeout).
//!
//! Results are delivered once, through the conversation's own reply channel.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use log::{debug, warn};
use serde_json::Value;

use crate::neohub::{
    envelope::parse_response,
    error::{ConversationError, ProtocolError},
};

pub type ConversationResult = Result<Value, ConversationError>;

/// Caller's end of a conversation.
pub struct PendingReply {
    command: String,
    rx: Receiver<ConversationResult>,
}

impl PendingReply {
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Block for the result, bounded by `timeout`.
    pub fn wait(self, timeout: Duration) -> ConversationResult {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ConversationError::Timeout {
                command: self.command,
                timeout_ms: timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(ConversationError::Closed),
        }
    }

    /// Non-blocking poll.
    pub fn try_result(&self) -> Option<ConversationResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(ConversationError::Closed)),
        }
    }
}

pub struct Conversation {
    command: String,
    frame: String,
    created_at: Instant,
    sent_at: Option<Instant>,
    timeout: Duration,
    reply: Sender<ConversationResult>,
}

impl Conversation {
    pub fn new(command: &str, frame: String, timeout: Duration, now: Instant) -> (Box<Self>, PendingReply) {
        let (tx, rx) = bounded(1);
        let conv = Box::new(Self {
            command: command.to_string(),
            frame,
            created_at: now,
            sent_at: None,
            timeout,
            reply: tx,
        });
        (conv, PendingReply { command: command.to_string(), rx })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn is_sent(&self) -> bool {
        self.sent_at.is_some()
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.sent_at
            .is_some_and(|sent| now.saturating_duration_since(sent) >= self.timeout)
    }

    fn resolve(self: Box<Self>, result: ConversationResult) {
        if let Err(e) = &result {
            debug!(
                "[Conversation] '{}' failed after {} ms: {}",
                self.command,
                self.created_at.elapsed().as_millis(),
                e
            );
        }
        // Caller may have stopped waiting; the result is then simply dropped.
        let _ = self.reply.send(result);
    }
}

/// Where frames go. The connection implements this over its live transport.
pub trait FrameSink {
    fn send_frame(&mut self, frame: &str) -> Result<(), ConversationError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub unexpected_frames: u64,
}

#[derive(Default)]
pub struct ConversationQueue {
    pending: VecDeque<Box<Conversation>>,
    stats: QueueStats,
}

impl ConversationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty queue: send now, and a failed send resolves immediately without queueing.
    /// Otherwise wait behind the current conversation.
    pub fn submit(&mut self, mut conv: Box<Conversation>, sink: &mut dyn FrameSink, now: Instant) {
        if !self.pending.is_empty() {
            self.pending.push_back(conv);
            return;
        }
        match sink.send_frame(&conv.frame) {
            Ok(()) => {
                conv.sent_at = Some(now);
                self.pending.push_back(conv);
            }
            Err(e) => {
                self.stats.failed += 1;
                conv.resolve(Err(e));
            }
        }
    }

    /// Advance the queue: send an unsent head, drain failed or expired heads, stop at the
    /// first conversation that is on the wire and still within its budget.
    pub fn process(&mut self, sink: &mut dyn FrameSink, now: Instant) {
        while let Some(head) = self.pending.front_mut() {
            if !head.is_sent() {
                match sink.send_frame(&head.frame) {
                    Ok(()) => head.sent_at = Some(now),
                    Err(e) => {
                        if let Some(conv) = self.pending.pop_front() {
                            self.stats.failed += 1;
                            conv.resolve(Err(e));
                        }
                        continue;
                    }
                }
            }

            if !head.is_expired(now) {
                break;
            }
            if let Some(conv) = self.pending.pop_front() {
                warn!("[ConversationQueue] '{}' timed out", conv.command);
                self.stats.timed_out += 1;
                let err = ConversationError::Timeout {
                    command: conv.command.clone(),
                    timeout_ms: conv.timeout.as_millis() as u64,
                };
                conv.resolve(Err(err));
            }
        }
    }

    /// Hand an inbound text frame to the conversation awaiting it.
    pub fn on_frame(&mut self, frame: &str) -> Result<(), ProtocolError> {
        let awaiting = self.pending.front().is_some_and(|c| c.is_sent());
        if !awaiting {
            self.stats.unexpected_frames += 1;
            let mut preview: String = frame.chars().take(120).collect();
            if preview.len() < frame.len() {
                preview.push('…');
            }
            return Err(ProtocolError::UnexpectedFrame(preview));
        }
        if let Some(conv) = self.pending.pop_front() {
            let result = parse_response(frame);
            match &result {
                Ok(_) => self.stats.completed += 1,
                Err(_) => self.stats.failed += 1,
            }
            conv.resolve(result);
        }
        Ok(())
    }

    /// Resolve everything with `err` (connection lost, shutdown).
    pub fn fail_all(&mut self, err: ConversationError) {
        for conv in self.pending.drain(..) {
            self.stats.failed += 1;
            conv.resolve(Err(err.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn in_flight(&self) -> Option<&str> {
        self.pending.front().filter(|c| c.is_sent()).map(|c| c.command())
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct ScriptedSink {
        sent: Vec<String>,
        fail_next: usize,
    }

    impl FrameSink for ScriptedSink {
        fn send_frame(&mut self, frame: &str) -> Result<(), ConversationError> {
            if self.fail_next > 0 {
                self.fail_next -= 1;
                return Err(ConversationError::NotConnected);
            }
            self.sent.push(frame.to_string());
            Ok(())
        }
    }

    fn conv(name: &str, timeout_ms: u64, now: Instant) -> (Box<Conversation>, PendingReply) {
        Conversation::new(name, format!("frame:{name}"), Duration::from_millis(timeout_ms), now)
    }

    fn reply(v: serde_json::Value) -> String {
        json!({ "response": v.to_string() }).to_string()
    }

    #[test]
    fn fifo_single_in_flight() {
        let t0 = Instant::now();
        let mut q = ConversationQueue::new();
        let mut sink = ScriptedSink::default();
        let (a, ra) = conv("A", 1_000, t0);
        let (b, rb) = conv("B", 1_000, t0);
        let (c, rc) = conv("C", 1_000, t0);
        q.submit(a, &mut sink, t0);
        q.submit(b, &mut sink, t0);
        q.submit(c, &mut sink, t0);
        assert_eq!(sink.sent, vec!["frame:A"]);

        q.on_frame(&reply(json!({"n": "A"}))).unwrap();
        assert_eq!(ra.try_result(), Some(Ok(json!({"n": "A"}))));
        assert!(rb.try_result().is_none());
        q.process(&mut sink, t0);
        assert_eq!(sink.sent, vec!["frame:A", "frame:B"]);

        q.on_frame(&reply(json!({"n": "B"}))).unwrap();
        assert_eq!(rb.try_result(), Some(Ok(json!({"n": "B"}))));
        assert!(rc.try_result().is_none());
        q.process(&mut sink, t0);
        assert_eq!(sink.sent.last().map(String::as_str), Some("frame:C"));
        assert_eq!(q.in_flight(), Some("C"));
    }

    #[test]
    fn immediate_send_failure_is_not_queued() {
        let t0 = Instant::now();
        let mut q = ConversationQueue::new();
        let mut sink = ScriptedSink { fail_next: 1, ..Default::default() };
        let (a, ra) = conv("A", 1_000, t0);
        q.submit(a, &mut sink, t0);
        assert!(q.is_empty());
        assert_eq!(ra.try_result(), Some(Err(ConversationError::NotConnected)));
    }

    #[test]
    fn expired_heads_drain_in_one_pass() {
        let t0 = Instant::now();
        let mut q = ConversationQueue::new();
        let mut sink = ScriptedSink::default();
        let (a, ra) = conv("A", 100, t0);
        let (b, rb) = conv("B", 0, t0);
        let (c, rc) = conv("C", 5_000, t0);
        q.submit(a, &mut sink, t0);
        q.submit(b, &mut sink, t0);
        q.submit(c, &mut sink, t0);

        q.process(&mut sink, t0 + Duration::from_millis(150));
        assert!(matches!(ra.try_result(), Some(Err(ConversationError::Timeout { .. }))));
        assert!(matches!(rb.try_result(), Some(Err(ConversationError::Timeout { .. }))));
        assert!(rc.try_result().is_none());
        assert_eq!(q.in_flight(), Some("C"));
        assert_eq!(q.stats().timed_out, 2);
    }

    #[test]
    fn deferred_send_failure_pops_and_continues() {
        let t0 = Instant::now();
        let mut q = ConversationQueue::new();
        let mut sink = ScriptedSink::default();
        let (a, _ra) = conv("A", 1_000, t0);
        let (b, rb) = conv("B", 1_000, t0);
        let (c, _rc) = conv("C", 1_000, t0);
        q.submit(a, &mut sink, t0);
        q.submit(b, &mut sink, t0);
        q.submit(c, &mut sink, t0);
        q.on_frame(&reply(json!(1))).unwrap();

        sink.fail_next = 1;
        q.process(&mut sink, t0);
        assert_eq!(rb.try_result(), Some(Err(ConversationError::NotConnected)));
        assert_eq!(q.in_flight(), Some("C"));
    }

    #[test]
    fn parse_failure_consumes_frame() {
        let t0 = Instant::now();
        let mut q = ConversationQueue::new();
        let mut sink = ScriptedSink::default();
        let (a, ra) = conv("A", 1_000, t0);
        q.submit(a, &mut sink, t0);
        q.on_frame("{garbage").unwrap();
        assert!(matches!(ra.try_result(), Some(Err(ConversationError::Parse(_)))));
        assert!(q.is_empty());
    }

    #[test]
    fn frame_without_waiting_conversation_is_rejected() {
        let mut q = ConversationQueue::new();
        let err = q.on_frame(r#"{"response":"late"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedFrame(_)));
        assert_eq!(q.stats().unexpected_frames, 1);
    }

    #[test]
    fn fail_all_resolves_everything() {
        let t0 = Instant::now();
        let mut q = ConversationQueue::new();
        let mut sink = ScriptedSink::default();
        let (a, ra) = conv("A", 1_000, t0);
        let (b, rb) = conv("B", 1_000, t0);
        q.submit(a, &mut sink, t0);
        q.submit(b, &mut sink, t0);
        q.fail_all(ConversationError::Disconnected);
        assert_eq!(ra.try_result(), Some(Err(ConversationError::Disconnected)));
        assert_eq!(rb.try_result(), Some(Err(ConversationError::Disconnected)));
        assert!(q.is_empty());
    }
}
