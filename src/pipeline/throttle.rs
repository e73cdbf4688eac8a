//! Byte-rate throttle stage.

use axum::body::Bytes;
use tokio::time::{Duration, Instant};

/// Paces bytes to at most `rate` bytes per second.
///
/// The budget starts empty when the first byte arrives: byte number `k`
/// is not released before `start + k / rate`. Transferring `S` bytes
/// therefore never takes less than `S / rate` seconds. Large chunks are
/// split so the output stays smooth instead of bursting.
#[derive(Debug)]
pub struct Throttle {
    rate: u64,
    piece_size: usize,
    started: Option<Instant>,
    released: u64,
}

impl Throttle {
    /// `rate` is clamped to at least one byte per second.
    pub fn new(rate: u64) -> Self {
        let rate = rate.max(1);
        Self {
            rate,
            piece_size: (rate / 10).max(1) as usize,
            started: None,
            released: 0,
        }
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Largest piece handed downstream at once.
    pub fn piece_size(&self) -> usize {
        self.piece_size
    }

    /// Split `chunk` into pieces no larger than [`Self::piece_size`].
    pub fn split(&self, mut chunk: Bytes) -> Vec<Bytes> {
        let mut pieces = Vec::with_capacity(chunk.len().div_ceil(self.piece_size));
        while chunk.len() > self.piece_size {
            pieces.push(chunk.split_to(self.piece_size));
        }
        if !chunk.is_empty() {
            pieces.push(chunk);
        }
        pieces
    }

    /// Wait until `len` more bytes may pass.
    pub async fn admit(&mut self, len: usize) {
        let started = *self.started.get_or_insert_with(Instant::now);
        self.released += len as u64;
        tokio::time::sleep_until(started + self.earliest(self.released)).await;
    }

    /// Offset from the start at which `bytes` bytes have been released.
    fn earliest(&self, bytes: u64) -> Duration {
        let micros = (bytes as u128 * 1_000_000).div_ceil(self.rate as u128);
        Duration::from_micros(micros.min(u64::MAX as u128) as u64)
    }
}
