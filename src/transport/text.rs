//! Byte-to-text decoding for transports whose reads split characters.

/// Incremental UTF-8 decoder for byte streams.
///
/// A multi-byte sequence split across two reads is held back until its tail arrives.
/// Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Stream {
    pending: Vec<u8>,
}

impl Utf8Stream {
    /// Create a decoder with no buffered bytes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, prefixed by any incomplete sequence left from the last call.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        Some(invalid) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + invalid);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Bytes held back awaiting the rest of a sequence.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
