/// Turns a byte stream into `&str`-safe chunks.
///
/// A multi-byte character split across fragments is held until its remaining
/// bytes arrive. Bytes that can never form a valid character are replaced with
/// U+FFFD as soon as they are seen.
#[derive(Debug, Clone, Default)]
pub struct Utf8Assembler {
    pending: Vec<u8>,
}

impl Utf8Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes waiting on the rest of a character.
    pub fn held(&self) -> usize {
        self.pending.len()
    }

    /// Append `bytes`, returning every complete character now available.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::new();
        let mut pos = 0;
        while pos < self.pending.len() {
            let rest = &self.pending[pos..];
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    pos = self.pending.len();
                }
                Err(err) => {
                    let valid_len = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid_len]));
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            pos += valid_len + bad;
                        }
                        // Truncated sequence at the end: wait for more bytes.
                        None => {
                            pos += valid_len;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..pos);
        out
    }

    /// Release whatever is held, replacing an unfinished character.
    pub fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}
