//! End-of-frame submission planning and resource-state barriers.
//!
//! The planner walks the frame's command streams in request order and
//! groups them into per-queue batches. A queue-kind change between
//! adjacent streams ends the current batch; a declared wait ends the
//! producer's batch with a semaphore signal and opens the consumer's batch
//! with the matching wait at a queue-appropriate stage mask. Streams with
//! no declared relationship keep no ordering guarantee beyond FIFO
//! adjacency inside one batch.
//!
//! Transitions accumulate per stream and are coalesced into one batched
//! native barrier call, bounding driver overhead to one call per flush
//! point rather than one per resource.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::backend::{NativeBackend, NativeBarrier, RawResource, RawSemaphore};
use crate::core::frame_ring::FrameSlot;
use crate::core::streams::StreamAllocator;
use crate::core::types::{GpuResource, QueueKind, ResourceState, StageMask, QUEUE_KIND_COUNT};
use crate::error::{RenderError, RenderResult};

/// One accumulated state transition awaiting the next barrier flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingBarrier {
    pub resource: GpuResource,
    pub raw: RawResource,
    pub src: ResourceState,
    pub dst: ResourceState,
}

/// Fold a transition into the pending list. Repeated transitions of one
/// resource accumulate destination masks instead of growing the list.
pub fn merge_transition(
    pending: &mut Vec<PendingBarrier>,
    resource: GpuResource,
    raw: RawResource,
    src: ResourceState,
    dst: ResourceState,
) {
    if let Some(entry) = pending.iter_mut().find(|p| p.resource == resource) {
        entry.dst |= dst;
    } else {
        pending.push(PendingBarrier {
            resource,
            raw,
            src,
            dst,
        });
    }
}

/// Lower pending transitions into the native barrier payload.
pub fn native_barriers(pending: &[PendingBarrier]) -> Vec<NativeBarrier> {
    pending
        .iter()
        .map(|p| NativeBarrier {
            resource: p.raw,
            src: p.src,
            dst: p.dst,
        })
        .collect()
}

/// Counters for submission activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitStats {
    pub frames_submitted: u64,
    pub batches_submitted: u64,
    pub barriers_emitted: u64,
    pub transitions_skipped: u64,
    pub descriptor_flushes: u64,
    pub redundant_pipeline_binds: u64,
}

/// One per-queue batch in submission order.
#[derive(Debug)]
pub struct PlannedBatch {
    pub queue: QueueKind,
    /// Stream indices in placement order.
    pub streams: SmallVec<[u32; 8]>,
    pub waits: SmallVec<[(RawSemaphore, StageMask); 2]>,
    pub signals: SmallVec<[RawSemaphore; 2]>,
}

/// Group the frame's streams into batches, resolving declared waits into
/// semaphore signal/wait pairs.
///
/// An unresolved wait (a producer that never reached Pending this frame)
/// or a wait cycle fails fast instead of deadlocking at runtime.
pub fn plan_batches(
    streams: &StreamAllocator,
    slot: &mut FrameSlot,
    backend: &dyn NativeBackend,
) -> RenderResult<Vec<PlannedBatch>> {
    let active = streams.active();
    let mut batches: Vec<PlannedBatch> = Vec::new();
    let mut open: [Option<usize>; QUEUE_KIND_COUNT] = [None; QUEUE_KIND_COUNT];
    let mut placed: HashMap<u32, usize> = HashMap::with_capacity(active.len());
    let mut last_queue: Option<QueueKind> = None;

    // Every wait target must itself be part of this frame's submission.
    for &index in active {
        for &wait in &streams.stream(index).waits {
            if !active.contains(&wait) {
                log::error!(
                    "Stream {} waits for stream {}, which was never submitted this frame",
                    index,
                    wait
                );
                return Err(RenderError::config(format!(
                    "Unresolved wait: stream {} waits for stream {} which never reached submission",
                    index, wait
                )));
            }
        }
    }

    let mut pending: Vec<u32> = active.to_vec();
    while !pending.is_empty() {
        let mut progressed = false;
        let mut remaining = Vec::new();
        for &index in &pending {
            let stream = streams.stream(index);
            if stream.waits.iter().any(|w| !placed.contains_key(w)) {
                remaining.push(index);
                continue;
            }

            let queue = stream.queue;
            // Adjacency: a queue change in placement order ends the
            // previous queue's batch.
            if last_queue != Some(queue) {
                if let Some(previous) = last_queue {
                    open[previous.index()] = None;
                }
                last_queue = Some(queue);
            }

            let mut wait_ops: SmallVec<[(RawSemaphore, StageMask); 2]> = SmallVec::new();
            for &wait in &stream.waits {
                let producer_batch = placed[&wait];
                let semaphore = slot.stream_semaphore(backend, wait as usize)?;
                if !batches[producer_batch].signals.contains(&semaphore) {
                    batches[producer_batch].signals.push(semaphore);
                }
                // The producer's batch may not grow past its signal.
                let producer_queue = streams.stream(wait).queue;
                if open[producer_queue.index()] == Some(producer_batch) {
                    open[producer_queue.index()] = None;
                }
                wait_ops.push((semaphore, queue.default_stage_mask()));
            }

            let batch_index = match open[queue.index()] {
                Some(existing) if wait_ops.is_empty() => existing,
                _ => {
                    batches.push(PlannedBatch {
                        queue,
                        streams: SmallVec::new(),
                        waits: wait_ops,
                        signals: SmallVec::new(),
                    });
                    batches.len() - 1
                }
            };
            batches[batch_index].streams.push(index);
            open[queue.index()] = Some(batch_index);
            placed.insert(index, batch_index);
            progressed = true;
        }
        if !progressed {
            log::error!("Wait cycle among streams {:?}", remaining);
            return Err(RenderError::config(format!(
                "Wait cycle among command streams {:?}",
                remaining
            )));
        }
        pending = remaining;
    }

    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;
    use crate::backend::RawBuffer;
    use crate::core::config::DeviceConfig;
    use crate::core::frame_ring::FrameRing;
    use crate::core::streams::StreamState;
    use crate::core::types::BufferId;

    fn fixture(backend: &NullBackend) -> (StreamAllocator, FrameRing) {
        let config = DeviceConfig::default().with_max_command_streams(8);
        let allocator = StreamAllocator::new(config.max_command_streams);
        let ring = FrameRing::new(backend, &config).unwrap();
        (allocator, ring)
    }

    fn record(allocator: &mut StreamAllocator, queue: QueueKind) -> u32 {
        let index = allocator.claim().unwrap();
        allocator
            .stream_mut(index)
            .begin(queue, crate::backend::RawCommandBuffer(100 + index as u64));
        allocator.stream_mut(index).state = StreamState::Pending;
        index
    }

    #[test]
    fn test_same_queue_streams_share_a_batch() {
        let backend = NullBackend::new();
        let (mut allocator, mut ring) = fixture(&backend);
        let a = record(&mut allocator, QueueKind::Graphics);
        let b = record(&mut allocator, QueueKind::Graphics);

        let batches = plan_batches(&allocator, ring.current_slot_mut(), &backend).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].streams.as_slice(), &[a, b]);
    }

    #[test]
    fn test_queue_change_splits_batches() {
        let backend = NullBackend::new();
        let (mut allocator, mut ring) = fixture(&backend);
        record(&mut allocator, QueueKind::Graphics);
        record(&mut allocator, QueueKind::Compute);
        record(&mut allocator, QueueKind::Graphics);

        let batches = plan_batches(&allocator, ring.current_slot_mut(), &backend).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].queue, QueueKind::Graphics);
        assert_eq!(batches[1].queue, QueueKind::Compute);
        assert_eq!(batches[2].queue, QueueKind::Graphics);
    }

    #[test]
    fn test_declared_wait_links_batches() {
        let backend = NullBackend::new();
        let (mut allocator, mut ring) = fixture(&backend);
        let producer = record(&mut allocator, QueueKind::Compute);
        let consumer = record(&mut allocator, QueueKind::Graphics);
        allocator.stream_mut(consumer).waits.push(producer);

        let batches = plan_batches(&allocator, ring.current_slot_mut(), &backend).unwrap();
        assert_eq!(batches.len(), 2);

        let producer_batch = &batches[0];
        let consumer_batch = &batches[1];
        assert_eq!(producer_batch.queue, QueueKind::Compute);
        assert_eq!(consumer_batch.queue, QueueKind::Graphics);
        assert_eq!(producer_batch.signals.len(), 1);
        assert_eq!(consumer_batch.waits.len(), 1);
        assert_eq!(producer_batch.signals[0], consumer_batch.waits[0].0);
        assert!(!consumer_batch.waits[0].1.is_empty());
    }

    #[test]
    fn test_wait_declared_before_producer_requested() {
        let backend = NullBackend::new();
        let (mut allocator, mut ring) = fixture(&backend);
        let consumer = record(&mut allocator, QueueKind::Graphics);
        let producer = record(&mut allocator, QueueKind::Compute);
        allocator.stream_mut(consumer).waits.push(producer);

        let batches = plan_batches(&allocator, ring.current_slot_mut(), &backend).unwrap();
        // The producer's batch must come first in submission order.
        let producer_pos = batches
            .iter()
            .position(|b| b.streams.contains(&producer))
            .unwrap();
        let consumer_pos = batches
            .iter()
            .position(|b| b.streams.contains(&consumer))
            .unwrap();
        assert!(producer_pos < consumer_pos);
        assert!(!batches[producer_pos].signals.is_empty());
    }

    #[test]
    fn test_unresolved_wait_fails_fast() {
        let backend = NullBackend::new();
        let (mut allocator, mut ring) = fixture(&backend);
        let consumer = record(&mut allocator, QueueKind::Graphics);
        allocator.stream_mut(consumer).waits.push(7);

        let err = plan_batches(&allocator, ring.current_slot_mut(), &backend).unwrap_err();
        assert!(matches!(err, RenderError::Config(_)));
    }

    #[test]
    fn test_wait_cycle_fails_fast() {
        let backend = NullBackend::new();
        let (mut allocator, mut ring) = fixture(&backend);
        let a = record(&mut allocator, QueueKind::Graphics);
        let b = record(&mut allocator, QueueKind::Compute);
        allocator.stream_mut(a).waits.push(b);
        allocator.stream_mut(b).waits.push(a);

        let err = plan_batches(&allocator, ring.current_slot_mut(), &backend).unwrap_err();
        assert!(matches!(err, RenderError::Config(_)));
    }

    #[test]
    fn test_merge_transition_accumulates_masks() {
        let mut pending = Vec::new();
        let resource = GpuResource::Buffer(BufferId(1));
        let raw = RawResource::Buffer(RawBuffer(11));
        merge_transition(
            &mut pending,
            resource,
            raw,
            ResourceState::SHADER_RESOURCE,
            ResourceState::UNORDERED_ACCESS,
        );
        merge_transition(
            &mut pending,
            resource,
            raw,
            ResourceState::UNORDERED_ACCESS,
            ResourceState::COPY_SRC,
        );

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].src, ResourceState::SHADER_RESOURCE);
        assert_eq!(
            pending[0].dst,
            ResourceState::UNORDERED_ACCESS | ResourceState::COPY_SRC
        );

        let native = native_barriers(&pending);
        assert_eq!(native.len(), 1);
        assert_eq!(native[0].resource, raw);
    }
}
