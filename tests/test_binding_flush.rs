//! Tests for binding-table dirty tracking and descriptor flush.
//!
//! Validates bind idempotence, the grow-and-retry descriptor arena, push
//! constant scoping, immutable-sampler skipping and redundant pipeline
//! bind elision.

use std::sync::Arc;

use forge_gpu::backend::null::{NativeCall, NullBackend};
use forge_gpu::{
    BindingKind, BindingLayout, BindingLayoutEntry, BufferDesc, BufferUsage, Device, DeviceConfig,
    GpuResource, PipelineDesc, PipelineId, PipelineKind, QueueKind, SamplerDesc, ShaderDesc,
    ShaderStage, AddressMode, FilterMode,
};

fn test_device(config: DeviceConfig) -> (Arc<NullBackend>, Device) {
    let backend = Arc::new(NullBackend::new());
    let device = Device::new(backend.clone(), config).unwrap();
    (backend, device)
}

fn make_pipeline(device: &mut Device, layout: BindingLayout) -> PipelineId {
    let vs = device
        .create_shader(ShaderDesc {
            label: Some("vs".into()),
            stage: ShaderStage::Vertex,
            bytecode: vec![1, 2, 3],
        })
        .unwrap();
    let fs = device
        .create_shader(ShaderDesc {
            label: Some("fs".into()),
            stage: ShaderStage::Fragment,
            bytecode: vec![4, 5, 6],
        })
        .unwrap();
    device
        .create_pipeline(PipelineDesc {
            label: Some("pipeline".into()),
            kind: PipelineKind::Graphics,
            shaders: vec![vs, fs],
            layout,
        })
        .unwrap()
}

fn cb_layout(slots: u32) -> BindingLayout {
    BindingLayout {
        entries: (0..slots)
            .map(|slot| BindingLayoutEntry {
                slot,
                kind: BindingKind::ConstantBuffer,
                immutable_sampler: false,
            })
            .collect(),
        push_constant_size: 0,
    }
}

fn count_calls(backend: &NullBackend, pred: impl Fn(&NativeCall) -> bool) -> usize {
    backend.calls().iter().filter(|c| pred(c)).count()
}

#[test]
fn test_redundant_rebind_does_not_reflush() {
    let (backend, mut device) = test_device(DeviceConfig::default());
    let pipeline = make_pipeline(&mut device, cb_layout(1));
    let buffer = device
        .create_buffer(BufferDesc {
            label: None,
            size: 256,
            usage: BufferUsage::CONSTANT,
            host_visible: false,
        })
        .unwrap();

    let stream = device.request_command_stream(QueueKind::Graphics).unwrap();
    device.bind_pipeline(stream, pipeline).unwrap();
    device.bind_constant_buffer(stream, 0, buffer, 0, 256).unwrap();
    device.draw(stream, 3, 1).unwrap();
    let flushes_after_first = count_calls(&backend, |c| {
        matches!(c, NativeCall::BindDescriptorSet { .. })
    });
    assert_eq!(flushes_after_first, 1);

    // Identical rebind: no dirty, no second flush.
    device.bind_constant_buffer(stream, 0, buffer, 0, 256).unwrap();
    device.draw(stream, 3, 1).unwrap();
    assert_eq!(
        count_calls(&backend, |c| matches!(c, NativeCall::BindDescriptorSet { .. })),
        1
    );

    // An actual change flushes again.
    device.bind_constant_buffer(stream, 0, buffer, 256, 256).unwrap();
    device.draw(stream, 3, 1).unwrap();
    assert_eq!(
        count_calls(&backend, |c| matches!(c, NativeCall::BindDescriptorSet { .. })),
        2
    );

    device.submit_all().unwrap();
    device.shutdown().unwrap();
}

#[test]
fn test_arena_regrows_for_seventeen_writes() {
    let (backend, mut device) =
        test_device(DeviceConfig::default().with_descriptor_arena_capacity(16));

    // 8 constant buffers + 8 shader resources + 1 sampler = 17 writes.
    let mut entries: Vec<BindingLayoutEntry> = (0..8)
        .map(|slot| BindingLayoutEntry {
            slot,
            kind: BindingKind::ConstantBuffer,
            immutable_sampler: false,
        })
        .collect();
    entries.extend((0..8).map(|slot| BindingLayoutEntry {
        slot,
        kind: BindingKind::ShaderResource,
        immutable_sampler: false,
    }));
    entries.push(BindingLayoutEntry {
        slot: 0,
        kind: BindingKind::Sampler,
        immutable_sampler: false,
    });
    let pipeline = make_pipeline(
        &mut device,
        BindingLayout {
            entries,
            push_constant_size: 0,
        },
    );

    let buffer = device
        .create_buffer(BufferDesc {
            label: None,
            size: 1024,
            usage: BufferUsage::CONSTANT | BufferUsage::STORAGE,
            host_visible: false,
        })
        .unwrap();
    let sampler = device
        .create_sampler(SamplerDesc {
            label: None,
            filter: FilterMode::Linear,
            address: AddressMode::ClampToEdge,
            anisotropy: 1,
        })
        .unwrap();

    let stream = device.request_command_stream(QueueKind::Graphics).unwrap();
    device.bind_pipeline(stream, pipeline).unwrap();
    for slot in 0..8 {
        device.bind_constant_buffer(stream, slot, buffer, 0, 64).unwrap();
        device
            .bind_resource(stream, slot, GpuResource::Buffer(buffer), None)
            .unwrap();
    }
    device.bind_sampler(stream, 0, sampler).unwrap();
    device.draw(stream, 3, 1).unwrap();

    // The pool doubled to >= 32 and all 17 writes landed.
    assert!(backend.calls().iter().any(
        |c| matches!(c, NativeCall::CreateDescriptorPool { capacity, .. } if *capacity == 32)
    ));
    let write_total: usize = backend
        .calls()
        .iter()
        .filter_map(|c| match c {
            NativeCall::WriteDescriptors { writes, .. } => Some(writes.len()),
            _ => None,
        })
        .sum();
    assert_eq!(write_total, 17);

    // The exhausted pool is retired through deferred destruction, not
    // destroyed while its sets may be referenced.
    assert!(device.reclaim_stats().pending >= 1);
    assert_eq!(
        count_calls(&backend, |c| matches!(c, NativeCall::DestroyDescriptorPool { .. })),
        0
    );

    device.submit_all().unwrap();
    device.shutdown().unwrap();
}

#[test]
fn test_push_constants_scoped_and_written_once() {
    let (backend, mut device) = test_device(DeviceConfig::default());
    let pipeline = make_pipeline(
        &mut device,
        BindingLayout {
            entries: Vec::new(),
            push_constant_size: 8,
        },
    );

    let stream = device.request_command_stream(QueueKind::Graphics).unwrap();
    device.bind_pipeline(stream, pipeline).unwrap();
    device
        .set_push_constants(stream, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12])
        .unwrap();
    device.draw(stream, 3, 1).unwrap();

    // Scoped to the pipeline's declared 8-byte range.
    let payloads: Vec<Vec<u8>> = backend
        .calls()
        .iter()
        .filter_map(|c| match c {
            NativeCall::PushConstants { data, .. } => Some(data.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(payloads, vec![vec![1, 2, 3, 4, 5, 6, 7, 8]]);

    // Unchanged constants are not rewritten on the next draw.
    device.draw(stream, 3, 1).unwrap();
    assert_eq!(
        count_calls(&backend, |c| matches!(c, NativeCall::PushConstants { .. })),
        1
    );

    device.submit_all().unwrap();
    device.shutdown().unwrap();
}

#[test]
fn test_immutable_sampler_slots_are_skipped() {
    let (backend, mut device) = test_device(DeviceConfig::default());
    let pipeline = make_pipeline(
        &mut device,
        BindingLayout {
            entries: vec![
                BindingLayoutEntry {
                    slot: 0,
                    kind: BindingKind::Sampler,
                    immutable_sampler: true,
                },
                BindingLayoutEntry {
                    slot: 1,
                    kind: BindingKind::Sampler,
                    immutable_sampler: false,
                },
            ],
            push_constant_size: 0,
        },
    );
    let sampler = device
        .create_sampler(SamplerDesc {
            label: None,
            filter: FilterMode::Nearest,
            address: AddressMode::Repeat,
            anisotropy: 1,
        })
        .unwrap();

    let stream = device.request_command_stream(QueueKind::Graphics).unwrap();
    device.bind_pipeline(stream, pipeline).unwrap();
    device.bind_sampler(stream, 0, sampler).unwrap();
    device.bind_sampler(stream, 1, sampler).unwrap();
    device.draw(stream, 3, 1).unwrap();

    let writes: Vec<u32> = backend
        .calls()
        .iter()
        .filter_map(|c| match c {
            NativeCall::WriteDescriptors { writes, .. } => {
                Some(writes.iter().map(|w| w.slot).collect::<Vec<_>>())
            }
            _ => None,
        })
        .flatten()
        .collect();
    // Only the mutable slot 1 is written.
    assert_eq!(writes, vec![1]);

    device.submit_all().unwrap();
    device.shutdown().unwrap();
}

#[test]
fn test_identical_pipeline_content_skips_rebind() {
    let (backend, mut device) = test_device(DeviceConfig::default());
    let layout = cb_layout(0);
    let first = make_pipeline(&mut device, layout.clone());
    let second = make_pipeline(&mut device, layout);

    let stream = device.request_command_stream(QueueKind::Graphics).unwrap();
    device.bind_pipeline(stream, first).unwrap();
    device.bind_pipeline(stream, first).unwrap();
    assert_eq!(
        count_calls(&backend, |c| matches!(c, NativeCall::BindPipeline { .. })),
        1
    );
    assert_eq!(device.submit_stats().redundant_pipeline_binds, 1);

    // A different pipeline object with different shaders re-binds.
    device.bind_pipeline(stream, second).unwrap();
    assert_eq!(
        count_calls(&backend, |c| matches!(c, NativeCall::BindPipeline { .. })),
        2
    );

    device.submit_all().unwrap();
    device.shutdown().unwrap();
}

#[test]
fn test_draw_requires_pipeline_and_graphics_queue() {
    let (_backend, mut device) = test_device(DeviceConfig::default());
    let pipeline = make_pipeline(&mut device, cb_layout(0));

    let no_pipeline = device.request_command_stream(QueueKind::Graphics).unwrap();
    assert!(device.draw(no_pipeline, 3, 1).is_err());

    let compute = device.request_command_stream(QueueKind::Compute).unwrap();
    device.bind_pipeline(compute, pipeline).unwrap();
    let err = device.draw(compute, 3, 1).unwrap_err();
    assert!(matches!(err, forge_gpu::RenderError::Config(_)));

    device.submit_all().unwrap();
    device.shutdown().unwrap();
}
