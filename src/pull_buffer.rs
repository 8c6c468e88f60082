//! Credit-based backpressure queue for a pull-mode input pad.
//!
//! Grounded on the teacher's `stream/manager.rs` `StreamState`, which
//! keeps a bounded ring of recently-produced audio frames and tracks how
//! much a consumer has drained; generalized here to an ordered queue of
//! mixed buffer/marker records with an explicit credit counter, per
//! spec.md §4.3's PullBuffer contract, including the "toilet" overflow
//! mode used when a push-mode producer feeds a pull-mode consumer.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::pad::PadRef;

/// A batch of opaque buffer payloads, in production order.
#[derive(Debug, Clone, Default)]
pub struct BufferBatch(pub Vec<Bytes>);

impl BufferBatch {
    /// Wraps a single payload as a one-element batch.
    #[must_use]
    pub fn single(payload: Bytes) -> Self {
        Self(vec![payload])
    }
}

/// Counts and splits [`BufferBatch`]es in whatever unit a pad's
/// `demand_unit` calls for (spec.md §4.3 "the metric object implements
/// `count(batch)` and `split(batch, n)`").
pub trait Metric: Send + Sync {
    /// The size of `batch` in this metric's unit.
    fn count(&self, batch: &BufferBatch) -> u64;
    /// Splits `batch` so the head is exactly `n` units, returning
    /// `(head, tail)`. Never called with `n` at or beyond `count(batch)`.
    fn split(&self, batch: BufferBatch, n: u64) -> (BufferBatch, BufferBatch);
}

/// One buffer counts as one unit, regardless of payload length.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferCountMetric;

impl Metric for BufferCountMetric {
    fn count(&self, batch: &BufferBatch) -> u64 {
        batch.0.len() as u64
    }

    fn split(&self, batch: BufferBatch, n: u64) -> (BufferBatch, BufferBatch) {
        let at = n as usize;
        let mut items = batch.0;
        let tail = items.split_off(at.min(items.len()));
        (BufferBatch(items), BufferBatch(tail))
    }
}

/// Each payload's byte length counts toward the total.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteCountMetric;

impl Metric for ByteCountMetric {
    fn count(&self, batch: &BufferBatch) -> u64 {
        batch.0.iter().map(|b| b.len() as u64).sum()
    }

    fn split(&self, batch: BufferBatch, n: u64) -> (BufferBatch, BufferBatch) {
        let mut remaining = n;
        let mut head = Vec::new();
        let mut tail = Vec::new();
        let mut items = batch.0.into_iter();
        for item in items.by_ref() {
            let len = item.len() as u64;
            if remaining == 0 {
                tail.push(item);
            } else if len <= remaining {
                remaining -= len;
                head.push(item);
            } else {
                let mut item = item;
                let split_point = remaining as usize;
                let rest = item.split_off(split_point);
                head.push(item);
                tail.push(rest);
                remaining = 0;
            }
        }
        tail.extend(items);
        (BufferBatch(head), BufferBatch(tail))
    }
}

/// Distinguishes the two kinds of non-buffer, order-preserving marker
/// a PullBuffer can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonBufferKind {
    Event,
    Caps,
}

/// An opaque event or caps payload carried by a non-buffer marker.
#[derive(Clone)]
pub struct MarkerValue(pub Arc<dyn Any + Send + Sync>);

impl MarkerValue {
    /// Wraps an arbitrary value as a marker payload.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl std::fmt::Debug for MarkerValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MarkerValue(..)")
    }
}

/// One entry in the PullBuffer's ordered queue.
#[derive(Debug, Clone)]
pub enum Record {
    /// A batch of buffers, tagged with its size in the buffer's metric.
    Buffers { payload: BufferBatch, count: u64 },
    /// An event or caps marker, kept in-order relative to buffers.
    NonBuffer {
        kind: NonBufferKind,
        value: MarkerValue,
    },
}

/// What to store: a buffer batch, or a non-buffer marker.
pub enum StoreKind {
    Buffers(BufferBatch),
    NonBuffer(NonBufferKind, MarkerValue),
}

/// Result of a [`PullBuffer::take`] call.
#[derive(Debug)]
pub enum TakeResult {
    /// At least one buffer record was produced.
    Value(Vec<Record>),
    /// Only non-buffer markers were available (or the queue was empty).
    Empty(Vec<Record>),
}

/// Overflow thresholds applied once a pull input enters toilet mode
/// (push producer feeding a pull consumer, spec.md §4.2).
#[derive(Debug, Clone, Copy)]
pub struct ToiletOptions {
    /// Crossing this size emits a warning but keeps accepting data.
    pub warn_level: u64,
    /// Crossing this size fails the store with [`Error::ToiletOverflow`].
    pub fail_level: u64,
}

/// The credit-based queue embedded in a pull-mode input pad.
pub struct PullBuffer {
    queue: VecDeque<Record>,
    preferred_size: u64,
    min_demand: u64,
    current_size: u64,
    demand: i64,
    metric: Box<dyn Metric>,
    toilet: Option<ToiletOptions>,
}

impl PullBuffer {
    /// Builds a PullBuffer and returns it alongside the initial demand
    /// that must be sent upstream immediately (spec.md §4.3: "On
    /// construction, immediately issues an initial demand of
    /// `preferred_size` upstream"). Toilet-mode buffers never issue
    /// demand, since their peer is push-mode and produces spontaneously.
    #[must_use]
    pub fn new(
        preferred_size: u64,
        min_demand: u64,
        metric: Box<dyn Metric>,
        toilet: Option<ToiletOptions>,
    ) -> (Self, u64) {
        let mut buffer = Self {
            queue: VecDeque::new(),
            preferred_size,
            min_demand,
            current_size: 0,
            demand: 0,
            metric,
            toilet,
        };
        let initial = if buffer.toilet.is_none() {
            buffer.update_demand(preferred_size as i64).unwrap_or(0)
        } else {
            0
        };
        (buffer, initial)
    }

    /// Switches this buffer into toilet mode, e.g. on receiving a
    /// push-mode announcement from its peer (spec.md §4.2
    /// `enable_toilet_if_pull`).
    pub fn enable_toilet(&mut self, toilet: ToiletOptions) {
        self.toilet = Some(toilet);
    }

    /// Current queued size, in the buffer's metric unit.
    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    /// The target queue size this buffer tries to stay filled to.
    #[must_use]
    pub fn preferred_size(&self) -> u64 {
        self.preferred_size
    }

    /// `true` iff nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current_size == 0 && self.queue.is_empty()
    }

    /// Appends data to the queue. In non-toilet mode, stores always
    /// succeed; storing while already at or above `preferred_size` logs
    /// an overdelivery warning but still accepts the data. In toilet
    /// mode, crossing `warn_level` logs a warning and crossing
    /// `fail_level` fails the store entirely.
    pub fn store(&mut self, pad: PadRef, kind: StoreKind) -> Result<()> {
        match kind {
            StoreKind::Buffers(batch) => {
                let count = self.metric.count(&batch);
                let projected = self.current_size + count;

                if let Some(toilet) = self.toilet {
                    if projected >= toilet.fail_level {
                        tracing::error!(pad = %pad, size = projected, "toilet overflow");
                        return Err(Error::ToiletOverflow {
                            pad,
                            size: projected,
                        });
                    }
                    if projected >= toilet.warn_level {
                        tracing::warn!(pad = %pad, size = projected, "toilet approaching overflow");
                    }
                } else if self.current_size >= self.preferred_size {
                    tracing::warn!(pad = %pad, size = self.current_size, "pull buffer overdelivery");
                }

                self.current_size = projected;
                self.queue.push_back(Record::Buffers { payload: batch, count });
            }
            StoreKind::NonBuffer(kind, value) => {
                self.queue.push_back(Record::NonBuffer { kind, value });
            }
        }
        Ok(())
    }

    /// Pops up to `count` units, splitting a buffer record at a boundary
    /// if necessary, and returns the records taken alongside the demand
    /// (if any) this take unblocked. Non-buffer markers immediately
    /// before or after the taken buffers are included to preserve
    /// ordering; a buffer record is never taken once `count` is
    /// satisfied, so it stays queued for the next call.
    pub fn take(&mut self, count: u64) -> (TakeResult, Option<u64>) {
        let mut output = Vec::new();
        let mut remaining = count;
        let mut produced_buffer = false;

        while let Some(front) = self.queue.front() {
            match front {
                Record::NonBuffer { .. } => {
                    output.push(self.queue.pop_front().expect("front() just matched"));
                }
                Record::Buffers { count: available, .. } => {
                    if remaining == 0 {
                        break;
                    }
                    let available = *available;
                    if available <= remaining {
                        remaining -= available;
                        produced_buffer = true;
                        output.push(self.queue.pop_front().expect("front() just matched"));
                    } else {
                        let Record::Buffers { payload, .. } =
                            self.queue.pop_front().expect("front() just matched")
                        else {
                            unreachable!("front matched Record::Buffers above")
                        };
                        let (head, tail) = self.metric.split(payload, remaining);
                        output.push(Record::Buffers {
                            payload: head,
                            count: remaining,
                        });
                        self.queue.push_front(Record::Buffers {
                            payload: tail,
                            count: available - remaining,
                        });
                        produced_buffer = true;
                        remaining = 0;
                    }
                }
            }
        }

        let consumed = count - remaining;
        self.current_size = self.current_size.saturating_sub(consumed);

        let demand_request = if self.toilet.is_none() {
            self.update_demand(consumed as i64)
        } else {
            None
        };

        let result = if produced_buffer {
            TakeResult::Value(output)
        } else {
            TakeResult::Empty(output)
        };
        (result, demand_request)
    }

    /// Demand algorithm from spec.md §4.3: folds `delta` into the
    /// outstanding credit counter, and if the buffer is under its
    /// preferred size with positive net demand, returns the amount that
    /// must be requested upstream right now.
    fn update_demand(&mut self, delta: i64) -> Option<u64> {
        let demand_prime = self.demand + delta;
        if self.current_size < self.preferred_size && demand_prime > 0 {
            let to_demand = demand_prime.max(self.min_demand as i64) as u64;
            self.demand = demand_prime - to_demand as i64;
            Some(to_demand)
        } else {
            self.demand = demand_prime;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_batch(n: usize) -> BufferBatch {
        BufferBatch((0..n).map(|i| Bytes::from(vec![i as u8])).collect())
    }

    #[test]
    fn demand_coalescing_after_partial_take() {
        let (mut buffer, initial) = PullBuffer::new(100, 25, Box::new(BufferCountMetric), None);
        assert_eq!(initial, 100);

        buffer
            .store(PadRef::Static("sink"), StoreKind::Buffers(bytes_batch(100)))
            .unwrap();
        assert_eq!(buffer.current_size(), 100);

        let (result, demand) = buffer.take(30);
        assert!(matches!(result, TakeResult::Value(_)));
        assert_eq!(buffer.current_size(), 70);
        assert_eq!(demand, Some(30));
    }

    #[test]
    fn toilet_overflow_at_fail_level() {
        let toilet = ToiletOptions {
            warn_level: 200,
            fail_level: 400,
        };
        let (mut buffer, initial) = PullBuffer::new(100, 25, Box::new(BufferCountMetric), Some(toilet));
        assert_eq!(initial, 0, "toilet-mode buffers never issue demand");

        buffer
            .store(PadRef::Static("sink"), StoreKind::Buffers(bytes_batch(150)))
            .unwrap();
        buffer
            .store(PadRef::Static("sink"), StoreKind::Buffers(bytes_batch(100)))
            .unwrap();
        assert_eq!(buffer.current_size(), 250);

        let err = buffer
            .store(PadRef::Static("sink"), StoreKind::Buffers(bytes_batch(200)))
            .unwrap_err();
        assert!(matches!(err, Error::ToiletOverflow { size: 450, .. }));
    }

    #[test]
    fn take_zero_drains_only_leading_markers() {
        let (mut buffer, _) = PullBuffer::new(10, 2, Box::new(BufferCountMetric), None);
        buffer
            .store(
                PadRef::Static("sink"),
                StoreKind::NonBuffer(NonBufferKind::Event, MarkerValue::new(())),
            )
            .unwrap();
        buffer
            .store(PadRef::Static("sink"), StoreKind::Buffers(bytes_batch(5)))
            .unwrap();

        let (result, demand) = buffer.take(0);
        match result {
            TakeResult::Empty(records) => assert_eq!(records.len(), 1),
            TakeResult::Value(_) => panic!("take(0) must not consume buffer records"),
        }
        assert_eq!(demand, None);
        assert_eq!(buffer.current_size(), 5);
    }

    #[test]
    fn splitting_a_batch_preserves_total_count() {
        let (mut buffer, _) = PullBuffer::new(50, 10, Box::new(ByteCountMetric), None);
        buffer
            .store(
                PadRef::Static("sink"),
                StoreKind::Buffers(BufferBatch(vec![Bytes::from_static(b"0123456789")])),
            )
            .unwrap();

        let (result, _) = buffer.take(4);
        let TakeResult::Value(records) = result else {
            panic!("expected a value result")
        };
        let Record::Buffers { payload, count } = &records[0] else {
            panic!("expected a buffer record")
        };
        assert_eq!(*count, 4);
        assert_eq!(payload.0[0], Bytes::from_static(b"0123"));
        assert_eq!(buffer.current_size(), 6);
    }

    #[test]
    fn non_toilet_store_never_drops_data_past_preferred_size() {
        let (mut buffer, _) = PullBuffer::new(10, 2, Box::new(BufferCountMetric), None);
        buffer
            .store(PadRef::Static("sink"), StoreKind::Buffers(bytes_batch(10)))
            .unwrap();
        buffer
            .store(PadRef::Static("sink"), StoreKind::Buffers(bytes_batch(5)))
            .unwrap();
        assert_eq!(buffer.current_size(), 15);
    }
}
