//! Capture and restore of the opaque context state.
//!
//! Bytes are passed through as the runtime produces them; no header is added.

use tracing::{debug, warn};

use crate::error::{Result, SessionError};
use crate::session::Session;

/// Largest size reported, the range of a 31-bit signed length.
pub const MAX_REPORTED_STATE: usize = i32::MAX as usize;

impl Session {
    /// Serialized state size in bytes, 0 when nothing is loaded.
    pub fn state_size(&self) -> usize {
        let state = self.lock();
        state
            .loaded
            .as_ref()
            .map_or(0, |loaded| loaded.context.state_size().min(MAX_REPORTED_STATE))
    }

    /// Copy the whole context state into a new buffer.
    pub fn state_capture(&self) -> Result<Vec<u8>> {
        let state = self.lock();
        let loaded = state.loaded.as_ref().ok_or(SessionError::NotLoaded)?;

        let size = loaded.context.state_size();
        if size == 0 {
            return Err(SessionError::EmptyState);
        }
        let mut buf = vec![0u8; size];
        let written = loaded.context.state_read(&mut buf);
        if written == 0 {
            return Err(SessionError::EmptyState);
        }
        buf.truncate(written);
        debug!(bytes = written, "state captured");
        Ok(buf)
    }

    /// Write up to `buf.len()` bytes of state into `buf` without allocating.
    pub fn state_capture_into(&self, buf: &mut [u8]) -> Result<usize> {
        let state = self.lock();
        let loaded = state.loaded.as_ref().ok_or(SessionError::NotLoaded)?;

        let total = loaded.context.state_size();
        if total == 0 || buf.is_empty() {
            return Ok(0);
        }
        let to_write = total.min(buf.len());
        let written = loaded.context.state_read(&mut buf[..to_write]);
        Ok(written.min(MAX_REPORTED_STATE))
    }

    /// Load previously captured state.
    ///
    /// Working memory is cleared (keeping its buffers) before the bytes are
    /// applied. On success the session has no run history.
    pub fn state_restore(&self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Err(SessionError::EmptyState);
        }
        let mut state = self.lock();
        let loaded = state.loaded.as_mut().ok_or(SessionError::NotLoaded)?;

        loaded.context.clear_memory(false);
        let read = loaded.context.state_write(bytes);
        if read == 0 {
            warn!(bytes = bytes.len(), "runtime rejected state");
            return Err(SessionError::StateRejected(bytes.len()));
        }
        self.reset_run_state(&mut state);
        debug!(bytes = read, "state restored");
        Ok(())
    }

    /// Restore from the first `length` bytes of `buf`.
    pub fn state_restore_from(&self, buf: &[u8], length: usize) -> Result<()> {
        if length == 0 {
            return Err(SessionError::EmptyState);
        }
        if length > buf.len() {
            return Err(SessionError::InvalidLength {
                length,
                capacity: buf.len(),
            });
        }
        self.state_restore(&buf[..length])
    }

    /// Clear working memory and run history. `also_discard_data` frees the
    /// memory buffers too. Does nothing when no model is loaded.
    pub fn state_clear(&self, also_discard_data: bool) {
        let mut state = self.lock();
        let Some(loaded) = state.loaded.as_mut() else {
            return;
        };
        loaded.context.clear_memory(also_discard_data);
        self.reset_run_state(&mut state);
    }
}
