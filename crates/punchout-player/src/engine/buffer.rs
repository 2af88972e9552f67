use bytes::Bytes;

/// Runs a closure exactly once when dropped.
pub struct ReleaseGuard(Option<Box<dyn FnOnce() + Send + 'static>>);

impl ReleaseGuard {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self(Some(Box::new(f)))
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

/// Timestamped media unit handed to an endpoint.
///
/// The memories are zero-copy views of the caller's sample spans. The release guard fires
/// when the engine drops the buffer, whether it was consumed, flushed or rejected.
pub struct Buffer {
    pts_ns: i64,
    memories: Vec<Bytes>,
    _release: Option<ReleaseGuard>,
}

impl Buffer {
    pub fn new(head: Bytes, pts_ns: i64) -> Self {
        Self {
            pts_ns,
            memories: vec![head],
            _release: None,
        }
    }

    pub fn with_release(mut self, guard: ReleaseGuard) -> Self {
        self._release = Some(guard);
        self
    }

    /// Append another span to the same unit.
    pub fn append_memory(&mut self, memory: Bytes) {
        self.memories.push(memory);
    }

    pub fn pts_ns(&self) -> i64 {
        self.pts_ns
    }

    pub fn memories(&self) -> &[Bytes] {
        &self.memories
    }

    pub fn size(&self) -> usize {
        self.memories.iter().map(Bytes::len).sum()
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("pts_ns", &self.pts_ns)
            .field("memories", &self.memories.len())
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn release_fires_once_on_drop() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let mut buffer = Buffer::new(Bytes::from_static(b"head"), 5)
            .with_release(ReleaseGuard::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        buffer.append_memory(Bytes::from_static(b"tail"));
        assert_eq!(buffer.size(), 8);
        assert_eq!(buffer.memories().len(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        drop(buffer);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
