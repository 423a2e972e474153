//! Streaming output: the [`TokenSink`] consumer trait and the per-run output guard.

use crossbeam_channel::{Receiver, Sender};
use peer_stop::Utf8Assembler;

use crate::error::SinkError;

/// Receives generated text as it becomes available.
///
/// A streaming run calls `on_token(chunk, false)` zero or more times with
/// non-empty chunks, then `on_token("", true)` exactly once. The sink runs on
/// the generating thread while the session is locked and must not call back
/// into the session.
pub trait TokenSink {
    fn on_token(&mut self, text: &str, done: bool) -> Result<(), SinkError>;
}

impl<F> TokenSink for F
where
    F: FnMut(&str, bool) -> Result<(), SinkError>,
{
    fn on_token(&mut self, text: &str, done: bool) -> Result<(), SinkError> {
        self(text, done)
    }
}

/// Event forwarded by a [`ChannelSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Token(String),
    Done,
}

/// Forwards chunks to a channel, for consumers on another thread.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<StreamEvent>,
}

impl ChannelSink {
    pub fn new(tx: Sender<StreamEvent>) -> Self {
        Self { tx }
    }

    /// An unbounded sink/receiver pair.
    pub fn channel() -> (Self, Receiver<StreamEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self::new(tx), rx)
    }
}

impl TokenSink for ChannelSink {
    fn on_token(&mut self, text: &str, done: bool) -> Result<(), SinkError> {
        let event = if done {
            StreamEvent::Done
        } else {
            StreamEvent::Token(text.to_string())
        };
        self.tx.send(event).map_err(|_| SinkError::Disconnected)
    }
}

/// Where a run's text goes: a streaming sink, a buffer, or both.
///
/// Dropping the guard delivers the terminal `("", true)` signal to the sink,
/// so it is sent exactly once on every exit path of a run.
pub(crate) struct Output<'a> {
    sink: Option<&'a mut dyn TokenSink>,
    text: Option<&'a mut String>,
    utf8: Utf8Assembler,
}

impl<'a> Output<'a> {
    pub(crate) fn streaming(sink: &'a mut dyn TokenSink) -> Self {
        Self {
            sink: Some(sink),
            text: None,
            utf8: Utf8Assembler::new(),
        }
    }

    pub(crate) fn buffered(text: &'a mut String) -> Self {
        Self {
            sink: None,
            text: Some(text),
            utf8: Utf8Assembler::new(),
        }
    }

    /// Deliver released bytes, holding back an incomplete trailing character.
    pub(crate) fn emit(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        let chunk = self.utf8.push(bytes);
        self.deliver(&chunk)
    }

    /// Deliver whatever the assembler still holds.
    pub(crate) fn finish(&mut self) -> Result<(), SinkError> {
        let tail = self.utf8.finish();
        self.deliver(&tail)
    }

    fn deliver(&mut self, chunk: &str) -> Result<(), SinkError> {
        if chunk.is_empty() {
            return Ok(());
        }
        if let Some(sink) = self.sink.as_deref_mut() {
            sink.on_token(chunk, false)?;
        }
        if let Some(text) = self.text.as_deref_mut() {
            text.push_str(chunk);
        }
        Ok(())
    }
}

impl Drop for Output<'_> {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.as_deref_mut() {
            if let Err(err) = sink.on_token("", true) {
                tracing::debug!(error = %err, "sink refused the done signal");
            }
        }
    }
}
