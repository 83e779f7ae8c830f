//! Fixed circular buffer of mono f32 samples written by the capture callback.
//! The analyser only ever looks at the most recent window, so there is no
//! read cursor: readers copy the tail without consuming it.

/// Pre-allocated ring of PCM samples. Never grows after construction.
pub struct RingBuffer {
    buffer: Box<[f32]>,
    write_pos: usize,
    /// Total samples written, saturating at capacity.
    filled: usize,
}

impl RingBuffer {
    /// Ring sized for `duration_secs` of audio at `sample_rate`, at least `min_len` samples.
    pub fn new(sample_rate: u32, duration_secs: f32, min_len: usize) -> Self {
        let capacity = ((sample_rate as f32 * duration_secs) as usize).max(min_len).max(1);
        Self {
            buffer: vec![0.0; capacity].into_boxed_slice(),
            write_pos: 0,
            filled: 0,
        }
    }

    /// Append samples, overwriting the oldest. Called from the audio callback.
    #[inline]
    pub fn write(&mut self, samples: &[f32]) {
        let capacity = self.buffer.len();
        for &s in samples {
            self.buffer[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) % capacity;
        }
        self.filled = (self.filled + samples.len()).min(capacity);
    }

    /// Copy the most recent `out.len()` samples into `out`, oldest first.
    /// When fewer samples have been written, the leading part is zero-filled.
    pub fn copy_latest(&self, out: &mut [f32]) {
        let capacity = self.buffer.len();
        let wanted = out.len();
        let available = self.filled.min(wanted).min(capacity);
        let pad = wanted - available;
        out[..pad].fill(0.0);
        let start = (self.write_pos + capacity - available) % capacity;
        for (i, slot) in out[pad..].iter_mut().enumerate() {
            *slot = self.buffer[(start + i) % capacity];
        }
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
        self.filled = 0;
    }
}
