/// Pretrigger memory: keeps the last `capacity` samples pushed.
/// Storage is allocated once; pushing overwrites the oldest samples in place.
pub struct RingBuffer {
    buf: Box<[f32]>,
    /// Index the next sample is written to.
    head: usize,
    len: usize,
}

impl RingBuffer {
    /// Create a ring holding `duration_secs` seconds of audio at `sample_rate`.
    pub fn new(sample_rate: u32, duration_secs: f32) -> Self {
        Self::with_capacity((sample_rate as f32 * duration_secs) as usize)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0.0; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    /// Push new samples. Oldest samples are overwritten once the ring is full.
    pub fn push(&mut self, samples: &[f32]) {
        let cap = self.buf.len();
        if cap == 0 {
            return;
        }
        // Only the tail of an oversized push can survive.
        let samples = &samples[samples.len().saturating_sub(cap)..];

        let first = samples.len().min(cap - self.head);
        self.buf[self.head..self.head + first].copy_from_slice(&samples[..first]);
        let rest = samples.len() - first;
        self.buf[..rest].copy_from_slice(&samples[first..]);

        self.head = (self.head + samples.len()) % cap;
        self.len = (self.len + samples.len()).min(cap);
    }

    /// Snapshot the ring contents, oldest first, as a contiguous Vec.
    pub fn snapshot(&self) -> Vec<f32> {
        let cap = self.buf.len();
        let mut out = Vec::with_capacity(self.len);
        if self.len < cap {
            out.extend_from_slice(&self.buf[..self.len]);
        } else {
            out.extend_from_slice(&self.buf[self.head..]);
            out.extend_from_slice(&self.buf[..self.head]);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }
}

/// Samples accumulated while a capture is in progress.
/// Audio is pushed in, then drained all at once when the dwell ends.
pub struct CaptureBuffer {
    buf: Vec<f32>,
}

impl CaptureBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, samples: &[f32]) {
        self.buf.extend_from_slice(samples);
    }

    /// Move all accumulated audio onto the end of `out`, leaving the buffer
    /// empty but keeping its allocation for the next capture.
    pub fn drain_into(&mut self, out: &mut Vec<f32>) {
        out.extend_from_slice(&self.buf);
        self.buf.clear();
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
