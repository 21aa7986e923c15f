//! GPU device on top of `wgpu`.
//!
//! [`WgpuDevice`] compiles the WGSL kernels from [`shaders`] on first load
//! and caches one pipeline per kernel name. Launches record a single compute
//! pass each and are submitted to the device queue immediately; the queue is
//! in order, so a later [`ComputeDevice::read_buffer`] observes every earlier
//! launch.
//!
//! Only the single-precision elementwise, activation and dropout kernels are
//! shipped. Any other name, including every `_double` name, fails to load
//! with `INVALID_KERNEL_NAME`.

mod shaders;

use crate::device::{ComputeDevice, DeviceBuffer, KernelArg, KernelHandle};
use crate::error::{DispatchError, Result, StatusCode};
use crate::work::WorkSize;
use briny::prelude::*;
use core::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use shaders::{ShaderDef, Slot, WgslSource, TABLE, WORKGROUP};
use std::collections::HashMap;
use std::sync::mpsc;
use wgpu::util::DeviceExt;

const ALIGN: usize = wgpu::COPY_BUFFER_ALIGNMENT as usize;

/// Device and queue of the default adapter.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Requests the default adapter and a device with default limits.
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                .map_err(|e| DispatchError::DeviceUnavailable(format!("no adapter: {e}")))?;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: None,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .map_err(|e| DispatchError::DeviceUnavailable(format!("device request: {e}")))?;
        Ok(Self { device, queue })
    }
}

/// Validates WGSL and compiles it into a labeled module.
pub fn load_shader(
    device: &wgpu::Device,
    label: &str,
    source: &str,
) -> core::result::Result<wgpu::ShaderModule, ValidationError> {
    WgslSource(source).validate()?;
    Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    }))
}

struct Pipeline {
    def: &'static ShaderDef,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

struct Program {
    name: String,
    args: Vec<Option<KernelArg>>,
}

struct Allocation {
    buffer: wgpu::Buffer,
    len_bytes: usize,
}

/// [`ComputeDevice`] backed by a `wgpu` adapter.
pub struct WgpuDevice {
    name: String,
    gpu: GpuContext,
    buffers: Mutex<HashMap<u64, Allocation>>,
    programs: Mutex<HashMap<u64, Program>>,
    pipelines: Mutex<HashMap<String, Pipeline>>,
    next_id: AtomicU64,
}

impl core::fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WgpuDevice")
            .field("name", &self.name)
            .field("buffers", &self.buffers.lock().len())
            .field("pipelines", &self.pipelines.lock().len())
            .finish()
    }
}

fn bind_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Whether `arg` fits a slot of the given declared type.
fn accepts(slot: Slot, arg: &KernelArg) -> bool {
    matches!(
        (slot, arg),
        (Slot::Int, KernelArg::Int(_) | KernelArg::Uint(_))
            | (Slot::Float, KernelArg::Float(_))
            | (Slot::Buffer { .. }, KernelArg::Buffer(_))
    )
}

impl WgpuDevice {
    /// Opens the default adapter.
    pub fn new() -> Result<Self> {
        let gpu = GpuContext::new()?;
        log::info!("wgpu device ready, {} kernels available", TABLE.len());
        Ok(Self {
            name: "wgpu".to_owned(),
            gpu,
            buffers: Mutex::new(HashMap::new()),
            programs: Mutex::new(HashMap::new()),
            pipelines: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        })
    }

    /// Every full kernel name this device can load.
    pub fn kernel_names() -> Vec<String> {
        let mut names: Vec<String> = TABLE.keys().cloned().collect();
        names.sort();
        names
    }

    fn mint(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn build_pipeline(&self, name: &str) -> core::result::Result<Pipeline, StatusCode> {
        let (def, source) = TABLE.get(name).ok_or(StatusCode::INVALID_KERNEL_NAME)?;
        let module = load_shader(&self.gpu.device, name, source).map_err(|_| {
            log::error!("wgsl for `{name}` rejected");
            StatusCode::INVALID_KERNEL
        })?;

        let mut entries = vec![bind_entry(0, wgpu::BufferBindingType::Uniform)];
        for (slot, kind) in def.slots.iter().enumerate() {
            if let Slot::Buffer { writable, .. } = kind {
                entries.push(bind_entry(
                    slot as u32 + 1,
                    wgpu::BufferBindingType::Storage {
                        read_only: !writable,
                    },
                ));
            }
        }
        let layout = self
            .gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(name),
                entries: &entries,
            });
        let pipeline_layout =
            self.gpu
                .device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(name),
                    bind_group_layouts: &[&layout],
                    push_constant_ranges: &[],
                });
        let pipeline = self
            .gpu
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(name),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some("main"),
                cache: None,
                compilation_options: Default::default(),
            });
        log::debug!("compiled wgsl pipeline `{name}`");
        Ok(Pipeline {
            def,
            layout,
            pipeline,
        })
    }

    /// Packs scalar slots into the uniform block in slot order.
    fn uniform_bytes(def: &ShaderDef, args: &[KernelArg]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(def.uniform_len());
        for arg in args {
            match *arg {
                KernelArg::Int(v) => bytes.extend_from_slice(&v.to_le_bytes()),
                KernelArg::Uint(v) => bytes.extend_from_slice(&v.to_le_bytes()),
                KernelArg::Float(v) => bytes.extend_from_slice(&v.to_le_bytes()),
                _ => {}
            }
        }
        bytes.resize(def.uniform_len(), 0);
        bytes
    }

    fn submit(
        &self,
        pipeline: &Pipeline,
        args: &[KernelArg],
        groups: u32,
    ) -> core::result::Result<(), StatusCode> {
        let buffers = self.buffers.lock();
        let device = &self.gpu.device;

        let mut writable = Vec::new();
        for (kind, arg) in pipeline.def.slots.iter().zip(args) {
            if let (Slot::Buffer { writable: true, .. }, KernelArg::Buffer(b)) = (kind, arg) {
                if writable.contains(&b.id()) {
                    return Err(StatusCode::INVALID_KERNEL_ARGS);
                }
                writable.push(b.id());
            }
        }

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("layer_kernels launch"),
        });

        // Inputs that alias an output are read from a snapshot.
        let mut snapshots = Vec::new();
        let mut bound = Vec::new();
        for (slot, (kind, arg)) in pipeline.def.slots.iter().zip(args).enumerate() {
            let (Slot::Buffer { writable: w, .. }, KernelArg::Buffer(b)) = (kind, arg) else {
                continue;
            };
            let alloc = buffers.get(&b.id()).ok_or(StatusCode::INVALID_MEM_OBJECT)?;
            if !w && writable.contains(&b.id()) {
                let size = alloc.buffer.size();
                let copy = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("aliased input"),
                    size,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                encoder.copy_buffer_to_buffer(&alloc.buffer, 0, &copy, 0, size);
                snapshots.push((slot, copy));
            } else {
                bound.push((slot, &alloc.buffer));
            }
        }

        let uniform = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("kernel scalars"),
            contents: &Self::uniform_bytes(pipeline.def, args),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: uniform.as_entire_binding(),
        }];
        entries.extend(bound.iter().map(|(slot, buffer)| wgpu::BindGroupEntry {
            binding: *slot as u32 + 1,
            resource: buffer.as_entire_binding(),
        }));
        entries.extend(snapshots.iter().map(|(slot, buffer)| wgpu::BindGroupEntry {
            binding: *slot as u32 + 1,
            resource: buffer.as_entire_binding(),
        }));
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &pipeline.layout,
            entries: &entries,
        });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups, 1, 1);
        }
        self.gpu.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}

impl ComputeDevice for WgpuDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_kernel(&self, name: &str) -> core::result::Result<KernelHandle, StatusCode> {
        let mut pipelines = self.pipelines.lock();
        let slots = match pipelines.get(name) {
            Some(p) => p.def.slots.len(),
            None => {
                let pipeline = self.build_pipeline(name)?;
                let slots = pipeline.def.slots.len();
                pipelines.insert(name.to_owned(), pipeline);
                slots
            }
        };
        let id = self.mint();
        self.programs.lock().insert(
            id,
            Program {
                name: name.to_owned(),
                args: vec![None; slots],
            },
        );
        Ok(KernelHandle::new(name, id))
    }

    fn set_kernel_arg(&self, kernel: &KernelHandle, index: u32, arg: &KernelArg) -> StatusCode {
        let pipelines = self.pipelines.lock();
        let mut programs = self.programs.lock();
        let Some(program) = programs.get_mut(&kernel.id()) else {
            return StatusCode::INVALID_KERNEL;
        };
        let Some(pipeline) = pipelines.get(&program.name) else {
            return StatusCode::INVALID_KERNEL;
        };
        let Some(&slot) = pipeline.def.slots.get(index as usize) else {
            return StatusCode::INVALID_ARG_INDEX;
        };
        if !accepts(slot, arg) {
            return StatusCode::INVALID_ARG_SIZE;
        }
        if let KernelArg::Buffer(b) = arg {
            if !self.buffers.lock().contains_key(&b.id()) {
                return StatusCode::INVALID_MEM_OBJECT;
            }
        }
        program.args[index as usize] = Some(*arg);
        StatusCode::SUCCESS
    }

    fn enqueue(&self, kernel: &KernelHandle, work: &WorkSize) -> StatusCode {
        if work.dims() != 1 {
            return StatusCode::INVALID_WORK_DIMENSION;
        }
        if work.group_items() > self.max_work_group_size() {
            return StatusCode::INVALID_WORK_GROUP_SIZE;
        }
        let args: Vec<KernelArg> = {
            let programs = self.programs.lock();
            let Some(program) = programs.get(&kernel.id()) else {
                return StatusCode::INVALID_KERNEL;
            };
            match program.args.iter().copied().collect::<Option<Vec<_>>>() {
                Some(args) => args,
                None => return StatusCode::INVALID_KERNEL_ARGS,
            }
        };
        let global = work.global()[0];
        if global == 0 {
            return StatusCode::SUCCESS;
        }
        let groups = global.div_ceil(WORKGROUP);
        let limit = self.gpu.device.limits().max_compute_workgroups_per_dimension as usize;
        if groups > limit {
            return StatusCode::INVALID_GLOBAL_WORK_SIZE;
        }

        let pipelines = self.pipelines.lock();
        let Some(pipeline) = pipelines.get(kernel.name()) else {
            return StatusCode::INVALID_KERNEL;
        };
        match self.submit(pipeline, &args, groups as u32) {
            Ok(()) => StatusCode::SUCCESS,
            Err(code) => code,
        }
    }

    fn create_buffer(&self, len_bytes: usize) -> core::result::Result<DeviceBuffer, StatusCode> {
        if len_bytes == 0 {
            return Err(StatusCode::INVALID_BUFFER_SIZE);
        }
        let size = len_bytes.div_ceil(ALIGN) * ALIGN;
        if size as u64 > self.gpu.device.limits().max_buffer_size {
            return Err(StatusCode::INVALID_BUFFER_SIZE);
        }
        // wgpu zero-initializes new buffers.
        let buffer = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: None,
            size: size as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let id = self.mint();
        self.buffers.lock().insert(id, Allocation { buffer, len_bytes });
        Ok(DeviceBuffer::new(id, len_bytes))
    }

    fn write_buffer(&self, buffer: &DeviceBuffer, offset: usize, data: &[u8]) -> StatusCode {
        let buffers = self.buffers.lock();
        let Some(alloc) = buffers.get(&buffer.id()) else {
            return StatusCode::INVALID_MEM_OBJECT;
        };
        if offset + data.len() > alloc.len_bytes || offset % ALIGN != 0 || data.len() % ALIGN != 0
        {
            return StatusCode::INVALID_VALUE;
        }
        self.gpu
            .queue
            .write_buffer(&alloc.buffer, offset as u64, data);
        StatusCode::SUCCESS
    }

    fn read_buffer(&self, buffer: &DeviceBuffer, offset: usize, out: &mut [u8]) -> StatusCode {
        let buffers = self.buffers.lock();
        let Some(alloc) = buffers.get(&buffer.id()) else {
            return StatusCode::INVALID_MEM_OBJECT;
        };
        if offset + out.len() > alloc.len_bytes {
            return StatusCode::INVALID_VALUE;
        }
        if out.is_empty() {
            return StatusCode::SUCCESS;
        }
        let start = offset / ALIGN * ALIGN;
        let end = (offset + out.len()).div_ceil(ALIGN) * ALIGN;
        let size = (end - start) as u64;

        let device = &self.gpu.device;
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback"),
        });
        encoder.copy_buffer_to_buffer(&alloc.buffer, start as u64, &staging, 0, size);
        self.gpu.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        if device.poll(wgpu::PollType::Wait).is_err() {
            return StatusCode::MAP_FAILURE;
        }
        match rx.recv() {
            Ok(Ok(())) => {}
            _ => return StatusCode::MAP_FAILURE,
        }
        {
            let view = slice.get_mapped_range();
            let skip = offset - start;
            out.copy_from_slice(&view[skip..skip + out.len()]);
        }
        staging.unmap();
        StatusCode::SUCCESS
    }

    fn release_buffer(&self, buffer: DeviceBuffer) {
        if let Some(alloc) = self.buffers.lock().remove(&buffer.id()) {
            alloc.buffer.destroy();
        }
    }

    fn finish(&self) -> StatusCode {
        match self.gpu.device.poll(wgpu::PollType::Wait) {
            Ok(_) => StatusCode::SUCCESS,
            Err(e) => {
                log::error!("wgpu poll failed: {e}");
                StatusCode::OUT_OF_RESOURCES
            }
        }
    }

    fn max_work_group_size(&self) -> usize {
        WORKGROUP
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_pack_in_slot_order() {
        let (def, _) = &TABLE["DropoutBackward_float"];
        let args = [
            KernelArg::Int(8),
            KernelArg::Buffer(DeviceBuffer::new(1, 32)),
            KernelArg::Buffer(DeviceBuffer::new(2, 32)),
            KernelArg::Float(0.5),
            KernelArg::Float(2.0),
            KernelArg::Buffer(DeviceBuffer::new(3, 32)),
        ];
        let bytes = WgpuDevice::uniform_bytes(def, &args);
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..4], &8i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &0.5f32.to_le_bytes());
        assert_eq!(&bytes[8..12], &2.0f32.to_le_bytes());
    }

    #[test]
    fn slot_types_reject_mismatches() {
        assert!(accepts(Slot::Int, &KernelArg::Uint(3)));
        assert!(!accepts(Slot::Float, &KernelArg::Double(1.0)));
        assert!(!accepts(Slot::Int, &KernelArg::NullBuffer));
    }

    #[test]
    fn double_kernels_are_not_shipped() {
        assert!(WgpuDevice::kernel_names().iter().all(|n| n.ends_with("_float")));
    }
}
