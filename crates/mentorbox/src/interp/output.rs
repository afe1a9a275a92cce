//! Captured standard output and standard error.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::interp::exception::{ExcKind, Exec, raise};

/// Append-only text buffer shared between the worker and the caller.
///
/// The caller keeps a clone so partial output can be salvaged when the
/// worker is abandoned after a timeout.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    inner: Arc<Mutex<String>>,
    limit: usize,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(String::new())),
            limit,
        }
    }

    /// Append `text`, failing with `MemoryError` once the buffer would grow
    /// past its limit. Text that fits is kept.
    pub fn write(&self, text: &str) -> Exec<()> {
        let mut buffer = self.inner.lock();
        let room = self.limit.saturating_sub(buffer.len());
        if text.len() <= room {
            buffer.push_str(text);
            return Ok(());
        }
        let mut cut = room;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        buffer.push_str(&text[..cut]);
        drop(buffer);
        raise(ExcKind::MemoryError, "output limit exceeded")
    }

    /// Append without enforcing the limit; used for tracebacks.
    pub fn write_unbounded(&self, text: &str) {
        self.inner.lock().push_str(text);
    }

    pub fn contents(&self) -> String {
        self.inner.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_contents() {
        let buffer = OutputBuffer::new(100);
        let salvage = buffer.clone();
        buffer.write("hello\n").unwrap();
        assert_eq!(salvage.contents(), "hello\n");
    }

    #[test]
    fn limit_keeps_prefix() {
        let buffer = OutputBuffer::new(8);
        buffer.write("12345").unwrap();
        assert!(buffer.write("67890").is_err());
        assert_eq!(buffer.contents(), "12345678");
        assert!(buffer.write("x").is_err());
        assert_eq!(buffer.len(), 8);
    }

    #[test]
    fn limit_respects_char_boundaries() {
        let buffer = OutputBuffer::new(3);
        assert!(buffer.write("aé€").is_err());
        assert_eq!(buffer.contents(), "aé");
    }
}
