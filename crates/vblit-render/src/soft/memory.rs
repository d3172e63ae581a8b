use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub(crate) type Buffers = HashMap<i32, Vec<u8>>;

/// In-memory stand-in for dma-buf allocations, addressed by handle.
#[derive(Debug, Clone)]
pub struct SoftMemory {
    buffers: Arc<Mutex<Buffers>>,
    next_fd: Arc<AtomicI32>,
}

impl Default for SoftMemory {
    fn default() -> Self {
        Self {
            buffers: Arc::new(Mutex::new(HashMap::new())),
            next_fd: Arc::new(AtomicI32::new(3)),
        }
    }
}

impl SoftMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Buffers> {
        self.buffers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate a zeroed buffer and return its handle.
    pub fn allocate(&self, size: usize) -> i32 {
        let fd = self.next_fd.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(fd, vec![0; size]);
        fd
    }

    /// Allocate a buffer holding a copy of `bytes`.
    pub fn allocate_with(&self, bytes: &[u8]) -> i32 {
        let fd = self.next_fd.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(fd, bytes.to_vec());
        fd
    }

    /// Copy `bytes` in at `offset`. Returns false if the range does not fit.
    pub fn write(&self, fd: i32, offset: usize, bytes: &[u8]) -> bool {
        let mut buffers = self.lock();
        let Some(buffer) = buffers.get_mut(&fd) else {
            return false;
        };
        match buffer.get_mut(offset..offset + bytes.len()) {
            Some(dst) => {
                dst.copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    pub fn fill(&self, fd: i32, value: u8) {
        if let Some(buffer) = self.lock().get_mut(&fd) {
            buffer.fill(value);
        }
    }

    /// Snapshot of a buffer's contents.
    pub fn read(&self, fd: i32) -> Option<Vec<u8>> {
        self.lock().get(&fd).cloned()
    }

    pub fn len(&self, fd: i32) -> Option<usize> {
        self.lock().get(&fd).map(Vec::len)
    }

    pub fn free(&self, fd: i32) -> bool {
        self.lock().remove(&fd).is_some()
    }
}
