//! Command stream allocation and per-stream recording state.
//!
//! A command stream is a logical recording context bound to one queue kind
//! for one frame. Indices are stable: index i always maps to the same
//! underlying per-frame-slot native command buffer for a given queue kind.
//! Streams cycle Idle -> Recording -> Pending -> Idle; the Pending -> Idle
//! edge happens implicitly once the frame's submission is handed off and
//! the ring advance protects the underlying pools.

use smallvec::SmallVec;

use crate::backend::RawCommandBuffer;
use crate::core::binding::BindingTable;
use crate::core::submit::PendingBarrier;
use crate::core::types::{PipelineId, QueueKind, MAX_PUSH_CONSTANT_BYTES};
use crate::error::{RenderError, RenderResult};

/// Opaque handle to a requested command stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandStreamHandle(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Recording,
    Pending,
}

/// Recording state for one command stream.
#[derive(Debug)]
pub struct CommandStream {
    pub state: StreamState,
    pub queue: QueueKind,
    pub cmd: RawCommandBuffer,
    /// Active pipeline plus its content hash; an identical hash skips the
    /// native rebind.
    pub pipeline: Option<(PipelineId, [u8; 32])>,
    pub table: BindingTable,
    /// Stream indices this stream must wait for.
    pub waits: SmallVec<[u32; 4]>,
    pub push_constants: [u8; MAX_PUSH_CONSTANT_BYTES],
    pub push_len: u32,
    pub push_dirty: bool,
    /// Accumulated transitions, coalesced into one batched barrier call.
    pub pending_barriers: Vec<PendingBarrier>,
}

impl CommandStream {
    fn new() -> Self {
        Self {
            state: StreamState::Idle,
            queue: QueueKind::Graphics,
            cmd: RawCommandBuffer(0),
            pipeline: None,
            table: BindingTable::default(),
            waits: SmallVec::new(),
            push_constants: [0; MAX_PUSH_CONSTANT_BYTES],
            push_len: 0,
            push_dirty: false,
            pending_barriers: Vec::new(),
        }
    }

    /// Reset for a fresh recording session on the given queue.
    pub fn begin(&mut self, queue: QueueKind, cmd: RawCommandBuffer) {
        self.state = StreamState::Recording;
        self.queue = queue;
        self.cmd = cmd;
        self.pipeline = None;
        self.table.reset();
        self.waits.clear();
        self.push_len = 0;
        self.push_dirty = false;
        self.pending_barriers.clear();
    }
}

/// Fixed-capacity pool of command streams handed out in request order.
#[derive(Debug)]
pub struct StreamAllocator {
    streams: Vec<CommandStream>,
    /// Indices requested this frame, in request order.
    active: Vec<u32>,
}

impl StreamAllocator {
    pub fn new(capacity: u32) -> Self {
        Self {
            streams: (0..capacity).map(|_| CommandStream::new()).collect(),
            active: Vec::with_capacity(capacity as usize),
        }
    }

    /// Claim the next free index. Exceeding the fixed capacity is a fatal
    /// configuration error, reported and never retried.
    pub fn claim(&mut self) -> RenderResult<u32> {
        let index = self
            .streams
            .iter()
            .position(|s| s.state == StreamState::Idle);
        match index {
            Some(index) => {
                self.active.push(index as u32);
                Ok(index as u32)
            }
            None => {
                log::error!(
                    "Command stream capacity exceeded: {} streams already recording this frame",
                    self.streams.len()
                );
                Err(RenderError::config(format!(
                    "Command stream capacity exceeded ({} streams)",
                    self.streams.len()
                )))
            }
        }
    }

    pub fn get(&self, handle: CommandStreamHandle) -> RenderResult<&CommandStream> {
        self.streams
            .get(handle.0 as usize)
            .ok_or_else(|| RenderError::config(format!("Unknown command stream {}", handle.0)))
    }

    pub fn get_mut(&mut self, handle: CommandStreamHandle) -> RenderResult<&mut CommandStream> {
        self.streams
            .get_mut(handle.0 as usize)
            .ok_or_else(|| RenderError::config(format!("Unknown command stream {}", handle.0)))
    }

    /// A stream that must currently be recording.
    pub fn get_recording(&self, handle: CommandStreamHandle) -> RenderResult<&CommandStream> {
        let stream = self.get(handle)?;
        if stream.state != StreamState::Recording {
            return Err(RenderError::config(format!(
                "Command stream {} is not recording",
                handle.0
            )));
        }
        Ok(stream)
    }

    pub fn get_recording_mut(
        &mut self,
        handle: CommandStreamHandle,
    ) -> RenderResult<&mut CommandStream> {
        let stream = self.get_mut(handle)?;
        if stream.state != StreamState::Recording {
            return Err(RenderError::config(format!(
                "Command stream {} is not recording",
                handle.0
            )));
        }
        Ok(stream)
    }

    pub fn stream(&self, index: u32) -> &CommandStream {
        &self.streams[index as usize]
    }

    pub fn stream_mut(&mut self, index: u32) -> &mut CommandStream {
        &mut self.streams[index as usize]
    }

    /// Indices requested this frame, in request order.
    pub fn active(&self) -> &[u32] {
        &self.active
    }

    /// Return every submitted stream to Idle and clear the request list
    /// (end of frame).
    pub fn recycle(&mut self) {
        for &index in &self.active {
            self.streams[index as usize].state = StreamState::Idle;
        }
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_hands_out_stable_indices() {
        let mut allocator = StreamAllocator::new(4);
        assert_eq!(allocator.claim().unwrap(), 0);
        allocator.stream_mut(0).state = StreamState::Recording;
        assert_eq!(allocator.claim().unwrap(), 1);
        allocator.stream_mut(1).state = StreamState::Recording;
        assert_eq!(allocator.active(), &[0, 1]);

        allocator.recycle();
        assert_eq!(allocator.claim().unwrap(), 0);
    }

    #[test]
    fn test_capacity_overflow_is_fatal() {
        let mut allocator = StreamAllocator::new(1);
        let index = allocator.claim().unwrap();
        allocator.stream_mut(index).state = StreamState::Recording;
        let err = allocator.claim().unwrap_err();
        assert!(matches!(err, RenderError::Config(_)));
    }

    #[test]
    fn test_begin_clears_recording_state() {
        let mut stream = CommandStream::new();
        stream.push_len = 16;
        stream.push_dirty = true;
        stream.waits.push(3);
        stream.pipeline = Some((PipelineId(1), [0xab; 32]));
        stream
            .table
            .bind_sampler(0, crate::core::types::SamplerId(9))
            .unwrap();

        stream.begin(QueueKind::Compute, RawCommandBuffer(42));
        assert_eq!(stream.state, StreamState::Recording);
        assert_eq!(stream.queue, QueueKind::Compute);
        assert_eq!(stream.push_len, 0);
        assert!(!stream.push_dirty);
        assert!(stream.waits.is_empty());
        assert!(stream.pipeline.is_none());
        assert!(!stream.table.dirty());
        assert!(stream.table.sampler(0).is_none());
    }
}
