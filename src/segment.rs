use std::sync::atomic::{AtomicU64, Ordering};

/// The network visible values a pe exposes to its peers.
///
/// Elements are stored as raw bit patterns (see [RemoteScalar][crate::RemoteScalar]) so
/// the transport, rings and reply buffers never need to know the element type. The
/// memory lives exactly as long as the world that allocated it.
pub struct RemoteSegment {
    data: Box<[AtomicU64]>,
}

impl RemoteSegment {
    pub(crate) fn new(len: usize) -> RemoteSegment {
        RemoteSegment {
            data: (0..len).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline(always)]
    pub(crate) fn load(&self, offset: usize) -> u64 {
        self.data[offset].load(Ordering::SeqCst)
    }

    #[inline(always)]
    pub(crate) fn store(&self, offset: usize, bits: u64) {
        self.data[offset].store(bits, Ordering::SeqCst)
    }

    pub(crate) fn swap(&self, offset: usize, bits: u64) -> u64 {
        self.data[offset].swap(bits, Ordering::SeqCst)
    }

    pub(crate) fn compare_exchange(&self, offset: usize, current: u64, new: u64) -> Result<u64, u64> {
        self.data[offset].compare_exchange(current, new, Ordering::SeqCst, Ordering::SeqCst)
    }
}

impl std::fmt::Debug for RemoteSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RemoteSegment {{ len: {} }}", self.len())
    }
}
