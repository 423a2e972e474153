/// Output of one [`StopBuffer::push`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Release {
    /// Bytes that are safe to deliver now.
    pub text: Vec<u8>,
    /// The stop string that completed on this push, if any.
    pub hit: Option<String>,
}

impl Release {
    pub fn is_stop(&self) -> bool {
        self.hit.is_some()
    }
}

/// Incremental stop-sequence matcher.
///
/// Fragments are appended to a pending buffer. A stop string is detected only
/// as an exact suffix of that buffer, so a stop split across fragments is still
/// found as long as its earlier bytes are being held. Stops are checked in the
/// order they were configured and the first suffix match wins.
#[derive(Debug, Clone, Default)]
pub struct StopBuffer {
    stops: Vec<String>,
    max_stop: usize,
    pending: Vec<u8>,
}

impl StopBuffer {
    pub fn new<I, S>(stops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stops: Vec<String> = stops.into_iter().map(Into::into).collect();
        let max_stop = stops.iter().map(String::len).max().unwrap_or(0);
        Self {
            stops,
            max_stop,
            pending: Vec::new(),
        }
    }

    /// Length in bytes of the longest configured stop.
    pub fn max_stop_len(&self) -> usize {
        self.max_stop
    }

    /// Bytes currently withheld.
    pub fn held(&self) -> usize {
        self.pending.len()
    }

    pub fn push(&mut self, fragment: &[u8]) -> Release {
        self.pending.extend_from_slice(fragment);

        if self.max_stop == 0 {
            return Release {
                text: std::mem::take(&mut self.pending),
                hit: None,
            };
        }

        for stop in self.stops.iter().filter(|s| !s.is_empty()) {
            if self.pending.ends_with(stop.as_bytes()) {
                let keep = self.pending.len() - stop.len();
                let mut text = std::mem::take(&mut self.pending);
                text.truncate(keep);
                return Release {
                    text,
                    hit: Some(stop.clone()),
                };
            }
        }

        if self.pending.len() >= self.max_stop {
            let emit_len = self.pending.len() - (self.max_stop - 1);
            let text = self.pending.drain(..emit_len).collect();
            return Release { text, hit: None };
        }

        Release::default()
    }

    /// Release everything still held, without matching.
    pub fn flush(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }
}
