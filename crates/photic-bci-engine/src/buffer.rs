//! Multichannel ring buffer
//!
//! [`SampleBuffer`] is the sole point of contact with the data-producing
//! collaborator. It owns a `channels x capacity` array plus a write cursor
//! and a full-flag; writes and reads split across the wrap boundary and are
//! reassembled into chronological order.
//!
//! The buffer performs no locking of its own. The session wraps it in a
//! single mutex; every reader gets a fresh copy from `get_latest_samples`,
//! so callers may filter the returned window in place.

use photic_bci_core::error::IngestError;

use crate::Window;

/// Fixed-capacity multichannel ring buffer.
#[derive(Debug)]
pub struct SampleBuffer {
    /// One ring per channel, all sharing the same cursor
    data: Vec<Vec<f64>>,
    n_channels: usize,
    capacity: usize,
    sampling_rate: f64,
    write_idx: usize,
    filled: bool,
    total_written: u64,
}

impl SampleBuffer {
    /// Create a buffer holding `buffer_seconds` of data per channel.
    ///
    /// Capacity is `ceil(buffer_seconds * sampling_rate)`, at least one
    /// sample. Rate and duration are validated upstream by the config.
    #[must_use]
    pub fn new(n_channels: usize, buffer_seconds: f64, sampling_rate: f64) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let capacity = ((buffer_seconds * sampling_rate).ceil() as usize).max(1);
        tracing::debug!(
            n_channels,
            capacity,
            sampling_rate,
            "sample buffer initialized"
        );
        Self {
            data: vec![vec![0.0; capacity]; n_channels],
            n_channels,
            capacity,
            sampling_rate,
            write_idx: 0,
            filled: false,
            total_written: 0,
        }
    }

    /// Number of channels.
    #[must_use]
    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    /// Capacity in samples per channel.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Nominal sampling rate in Hz.
    #[must_use]
    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    /// Samples currently readable (saturates at capacity).
    #[must_use]
    pub fn available(&self) -> usize {
        if self.filled {
            self.capacity
        } else {
            self.write_idx
        }
    }

    /// Cumulative count of samples ever written, across wraparounds.
    #[must_use]
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Append a chunk of `channels x samples`.
    ///
    /// Writes across the wrap boundary are split into a pre-wrap and a
    /// post-wrap part. A chunk longer than the capacity keeps only its tail.
    ///
    /// # Errors
    ///
    /// [`IngestError::ShapeMismatch`] when the chunk has the wrong channel
    /// count, [`IngestError::RaggedChunk`] when its channels disagree on
    /// length.
    pub fn add_samples(&mut self, chunk: &[Vec<f64>]) -> Result<(), IngestError> {
        if chunk.len() != self.n_channels {
            return Err(IngestError::ShapeMismatch {
                expected: self.n_channels,
                got: chunk.len(),
            });
        }
        let n_new = chunk.first().map_or(0, Vec::len);
        for (channel, samples) in chunk.iter().enumerate() {
            if samples.len() != n_new {
                return Err(IngestError::RaggedChunk {
                    channel,
                    expected: n_new,
                    got: samples.len(),
                });
            }
        }
        if n_new == 0 {
            return Ok(());
        }

        // Oversized chunks: only the most recent `capacity` samples survive
        let skip = n_new.saturating_sub(self.capacity);
        let n_write = n_new - skip;

        let first = (self.capacity - self.write_idx).min(n_write);
        for (ring, samples) in self.data.iter_mut().zip(chunk) {
            let samples = &samples[skip..];
            ring[self.write_idx..self.write_idx + first].copy_from_slice(&samples[..first]);
            if first < n_write {
                ring[..n_write - first].copy_from_slice(&samples[first..]);
            }
        }

        if self.write_idx + n_write >= self.capacity {
            self.filled = true;
        }
        self.write_idx = (self.write_idx + n_write) % self.capacity;
        self.total_written += n_new as u64;
        Ok(())
    }

    /// Most recent `n` samples per channel, oldest first.
    ///
    /// Returns `None` while fewer than `n` samples have ever been written.
    /// The result is a fresh copy and never aliases internal storage.
    #[must_use]
    pub fn get_latest_samples(&self, n: usize) -> Option<Window> {
        if n == 0 || n > self.available() {
            return None;
        }
        let start = (self.write_idx + self.capacity - n) % self.capacity;
        let first = (self.capacity - start).min(n);

        let window = self
            .data
            .iter()
            .map(|ring| {
                let mut out = Vec::with_capacity(n);
                out.extend_from_slice(&ring[start..start + first]);
                out.extend_from_slice(&ring[..n - first]);
                out
            })
            .collect();
        Some(window)
    }

    /// Most recent `seconds` of data per channel, oldest first.
    ///
    /// Returns `None` while the buffer holds less than that duration.
    #[must_use]
    pub fn get_latest_duration(&self, seconds: f64) -> Option<Window> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let n = (seconds * self.sampling_rate).round() as usize;
        self.get_latest_samples(n)
    }

    /// Discard all data and reset the cursor.
    pub fn clear(&mut self) {
        self.write_idx = 0;
        self.filled = false;
        self.total_written = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_chunk(n_channels: usize, start: usize, len: usize) -> Window {
        (0..n_channels)
            .map(|ch| {
                (start..start + len)
                    .map(|i| (i * 10 + ch) as f64)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn not_ready_until_enough_written() {
        let mut buffer = SampleBuffer::new(2, 1.0, 100.0);
        assert!(buffer.get_latest_samples(1).is_none());

        buffer.add_samples(&ramp_chunk(2, 0, 30)).unwrap();
        for n in 1..=30 {
            assert!(buffer.get_latest_samples(n).is_some(), "n = {n}");
        }
        for n in 31..=100 {
            assert!(buffer.get_latest_samples(n).is_none(), "n = {n}");
        }
    }

    #[test]
    fn wraparound_returns_literal_last_n() {
        // Capacity 100; write 100 + 37 samples in awkward chunk sizes
        let mut buffer = SampleBuffer::new(2, 1.0, 100.0);
        let mut written = 0;
        for &len in &[7usize, 25, 31, 13, 40, 21] {
            buffer.add_samples(&ramp_chunk(2, written, len)).unwrap();
            written += len;
        }
        assert_eq!(written, 137);

        let window = buffer.get_latest_samples(100).unwrap();
        for ch in 0..2 {
            let expected: Vec<f64> = (37..137).map(|i| (i * 10 + ch) as f64).collect();
            assert_eq!(window[ch], expected, "channel {ch}");
        }
    }

    #[test]
    fn exact_fit_write_marks_full() {
        let mut buffer = SampleBuffer::new(1, 1.0, 50.0);
        buffer.add_samples(&ramp_chunk(1, 0, 50)).unwrap();
        assert_eq!(buffer.available(), 50);
        assert!(buffer.get_latest_samples(50).is_some());
    }

    #[test]
    fn oversized_chunk_keeps_tail() {
        let mut buffer = SampleBuffer::new(1, 1.0, 10.0);
        buffer.add_samples(&ramp_chunk(1, 0, 25)).unwrap();
        let window = buffer.get_latest_samples(10).unwrap();
        let expected: Vec<f64> = (15..25).map(|i| (i * 10) as f64).collect();
        assert_eq!(window[0], expected);
    }

    #[test]
    fn rejects_wrong_channel_count() {
        let mut buffer = SampleBuffer::new(4, 1.0, 100.0);
        let err = buffer.add_samples(&ramp_chunk(3, 0, 10)).unwrap_err();
        assert_eq!(
            err,
            IngestError::ShapeMismatch {
                expected: 4,
                got: 3
            }
        );
    }

    #[test]
    fn rejects_ragged_chunk() {
        let mut buffer = SampleBuffer::new(2, 1.0, 100.0);
        let chunk = vec![vec![0.0; 10], vec![0.0; 9]];
        assert!(matches!(
            buffer.add_samples(&chunk),
            Err(IngestError::RaggedChunk { channel: 1, .. })
        ));
    }

    #[test]
    fn duration_wrapper_rounds() {
        let mut buffer = SampleBuffer::new(1, 2.0, 125.0);
        buffer.add_samples(&ramp_chunk(1, 0, 200)).unwrap();
        let window = buffer.get_latest_duration(1.0).unwrap();
        assert_eq!(window[0].len(), 125);
        assert!(buffer.get_latest_duration(2.0).is_none());
    }

    #[test]
    fn returned_window_is_a_copy() {
        let mut buffer = SampleBuffer::new(1, 1.0, 10.0);
        buffer.add_samples(&ramp_chunk(1, 0, 10)).unwrap();
        let mut window = buffer.get_latest_samples(5).unwrap();
        window[0][0] = -1.0;
        assert_ne!(buffer.get_latest_samples(5).unwrap()[0][0], -1.0);
    }

    #[test]
    fn total_written_accumulates_past_capacity() {
        let mut buffer = SampleBuffer::new(1, 1.0, 10.0);
        for i in 0..5 {
            buffer.add_samples(&ramp_chunk(1, i * 6, 6)).unwrap();
        }
        assert_eq!(buffer.total_written(), 30);
        assert_eq!(buffer.available(), 10);
    }
}
