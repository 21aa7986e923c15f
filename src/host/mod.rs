//! Reference device running every kernel on the host with `rayon`.
//!
//! The host device behaves like a device runtime with an in-order queue:
//! launches execute synchronously inside [`ComputeDevice::enqueue`], so
//! `finish` has nothing to wait for. Argument slots are type-checked against
//! each kernel's declared signature when bound, and a launch fails with
//! `INVALID_KERNEL_ARGS` while any slot is unset.

mod kernels;
mod launch;
mod memory;

use crate::device::{ComputeDevice, DeviceBuffer, KernelArg, KernelHandle};
use crate::error::StatusCode;
use crate::precision::Precision;
use crate::work::WorkSize;
use core::sync::atomic::{AtomicU64, Ordering};
use kernels::{Access, KernelDef, Param};
use launch::Launch;
use memory::Block;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Largest work-group the host device accepts.
pub const HOST_MAX_WORK_GROUP: usize = 1024;

/// A kernel instance with its own argument slots.
struct Program {
    def: &'static KernelDef,
    precision: Precision,
    args: Vec<Option<KernelArg>>,
}

/// Host implementation of [`ComputeDevice`].
#[derive(Default)]
pub struct HostDevice {
    memory: Mutex<HashMap<u64, Block>>,
    programs: Mutex<HashMap<u64, Program>>,
    next_id: AtomicU64,
}

impl HostDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every full kernel name this device can load.
    pub fn kernel_names() -> Vec<String> {
        kernels::names()
    }

    /// Number of live buffers.
    pub fn live_buffers(&self) -> usize {
        self.memory.lock().len()
    }

    fn mint(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl core::fmt::Debug for HostDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HostDevice")
            .field("buffers", &self.memory.lock().len())
            .field("kernels", &self.programs.lock().len())
            .finish()
    }
}

/// Splits bound arguments into kernel views, moving writable buffers out of
/// `memory`. On error every moved buffer is put back.
fn stage(
    def: &KernelDef,
    args: &[KernelArg],
    memory: &mut HashMap<u64, Block>,
) -> Result<(Vec<Option<Block>>, Vec<Option<(u64, Block)>>), StatusCode> {
    let mut inputs = vec![None; args.len()];
    let mut outputs: Vec<Option<(u64, Block)>> = (0..args.len()).map(|_| None).collect();

    // Snapshot readers first so a buffer bound both ways reads its old contents.
    for (slot, (param, arg)) in def.params.iter().zip(args).enumerate() {
        if let (Param::Buffer { access: Access::Read, .. }, KernelArg::Buffer(buffer)) = (param, arg)
        {
            let block = memory.get(&buffer.id()).ok_or(StatusCode::INVALID_MEM_OBJECT)?;
            inputs[slot] = Some(block.clone());
        }
    }

    let mut failure = None;
    for (slot, (param, arg)) in def.params.iter().zip(args).enumerate() {
        let (Param::Buffer { access: Access::Write | Access::ReadWrite, .. }, KernelArg::Buffer(buffer)) =
            (param, arg)
        else {
            continue;
        };
        match memory.remove(&buffer.id()) {
            Some(block) => outputs[slot] = Some((buffer.id(), block)),
            None if outputs.iter().flatten().any(|(id, _)| *id == buffer.id()) => {
                failure = Some(StatusCode::INVALID_KERNEL_ARGS);
                break;
            }
            None => {
                failure = Some(StatusCode::INVALID_MEM_OBJECT);
                break;
            }
        }
    }
    if let Some(code) = failure {
        for (id, block) in outputs.into_iter().flatten() {
            memory.insert(id, block);
        }
        return Err(code);
    }
    Ok((inputs, outputs))
}

fn check_work(work: &WorkSize) -> StatusCode {
    if !(1..=3).contains(&work.dims()) {
        return StatusCode::INVALID_WORK_DIMENSION;
    }
    let group = work.group_items();
    if work.local().contains(&0) || group > HOST_MAX_WORK_GROUP {
        return StatusCode::INVALID_WORK_GROUP_SIZE;
    }
    StatusCode::SUCCESS
}

impl ComputeDevice for HostDevice {
    fn name(&self) -> &str {
        "host"
    }

    fn load_kernel(&self, name: &str) -> Result<KernelHandle, StatusCode> {
        let (def, precision) = kernels::find(name).ok_or(StatusCode::INVALID_KERNEL_NAME)?;
        let id = self.mint();
        self.programs.lock().insert(
            id,
            Program {
                def,
                precision,
                args: vec![None; def.params.len()],
            },
        );
        log::debug!("host: built {name} ({} args)", def.params.len());
        Ok(KernelHandle::new(name, id))
    }

    fn set_kernel_arg(&self, kernel: &KernelHandle, index: u32, arg: &KernelArg) -> StatusCode {
        let mut programs = self.programs.lock();
        let Some(program) = programs.get_mut(&kernel.id()) else {
            return StatusCode::INVALID_KERNEL;
        };
        let Some(&param) = program.def.params.get(index as usize) else {
            return StatusCode::INVALID_ARG_INDEX;
        };
        let code = param.accepts(arg, program.precision);
        if !code.is_success() {
            return code;
        }
        if let KernelArg::Buffer(buffer) = arg {
            if !self.memory.lock().contains_key(&buffer.id()) {
                return StatusCode::INVALID_MEM_OBJECT;
            }
        }
        program.args[index as usize] = Some(*arg);
        StatusCode::SUCCESS
    }

    fn enqueue(&self, kernel: &KernelHandle, work: &WorkSize) -> StatusCode {
        let (def, precision, args) = {
            let programs = self.programs.lock();
            let Some(program) = programs.get(&kernel.id()) else {
                return StatusCode::INVALID_KERNEL;
            };
            let args: Option<Vec<KernelArg>> = program.args.iter().copied().collect();
            let Some(args) = args else {
                return StatusCode::INVALID_KERNEL_ARGS;
            };
            (program.def, program.precision, args)
        };
        let code = check_work(work);
        if !code.is_success() {
            return code;
        }
        if work.global().contains(&0) {
            return StatusCode::SUCCESS;
        }

        let mut memory = self.memory.lock();
        let (inputs, outputs) = match stage(def, &args, &mut memory) {
            Ok(staged) => staged,
            Err(code) => return code,
        };
        let mut launch = Launch::new(args, inputs, outputs, *work);
        let result = (def.entry(precision))(&mut launch);
        for (id, block) in launch.outputs.into_blocks() {
            memory.insert(id, block);
        }
        match result {
            Ok(()) => StatusCode::SUCCESS,
            Err(code) => {
                log::debug!("host: {} stopped with {code}", kernel.name());
                code
            }
        }
    }

    fn create_buffer(&self, len_bytes: usize) -> Result<DeviceBuffer, StatusCode> {
        if len_bytes == 0 {
            return Err(StatusCode::INVALID_BUFFER_SIZE);
        }
        let id = self.mint();
        self.memory.lock().insert(id, Block::zeroed(len_bytes));
        Ok(DeviceBuffer::new(id, len_bytes))
    }

    fn write_buffer(&self, buffer: &DeviceBuffer, offset: usize, data: &[u8]) -> StatusCode {
        let mut memory = self.memory.lock();
        let Some(block) = memory.get_mut(&buffer.id()) else {
            return StatusCode::INVALID_MEM_OBJECT;
        };
        match block.bytes_mut().get_mut(offset..offset.saturating_add(data.len())) {
            Some(dst) => {
                dst.copy_from_slice(data);
                StatusCode::SUCCESS
            }
            None => StatusCode::INVALID_VALUE,
        }
    }

    fn read_buffer(&self, buffer: &DeviceBuffer, offset: usize, out: &mut [u8]) -> StatusCode {
        let memory = self.memory.lock();
        let Some(block) = memory.get(&buffer.id()) else {
            return StatusCode::INVALID_MEM_OBJECT;
        };
        match block.bytes().get(offset..offset.saturating_add(out.len())) {
            Some(src) => {
                out.copy_from_slice(src);
                StatusCode::SUCCESS
            }
            None => StatusCode::INVALID_VALUE,
        }
    }

    fn release_buffer(&self, buffer: DeviceBuffer) {
        self.memory.lock().remove(&buffer.id());
    }

    fn finish(&self) -> StatusCode {
        StatusCode::SUCCESS
    }

    fn max_work_group_size(&self) -> usize {
        HOST_MAX_WORK_GROUP
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launch_add(device: &HostDevice, a: &DeviceBuffer, b: &DeviceBuffer, y: &DeviceBuffer, n: i32) -> StatusCode {
        let kernel = device.load_kernel("add_float").unwrap();
        for (slot, arg) in [
            KernelArg::Int(n),
            KernelArg::from(a),
            KernelArg::from(b),
            KernelArg::from(y),
        ]
        .iter()
        .enumerate()
        {
            assert!(device.set_kernel_arg(&kernel, slot as u32, arg).is_success());
        }
        device.enqueue(&kernel, &WorkSize::linear(n as usize, 256))
    }

    fn buffer(device: &HostDevice, data: &[f32]) -> DeviceBuffer {
        let buffer = device.create_buffer(data.len() * 4).unwrap();
        assert!(device.write_buffer(&buffer, 0, bytemuck::cast_slice(data)).is_success());
        buffer
    }

    fn read(device: &HostDevice, buffer: &DeviceBuffer) -> Vec<f32> {
        let mut out = vec![0.0f32; buffer.len_of::<f32>()];
        assert!(device.read_buffer(buffer, 0, bytemuck::cast_slice_mut(&mut out)).is_success());
        out
    }

    #[test]
    fn add_runs_in_place_when_output_aliases_input() {
        let device = HostDevice::new();
        let a = buffer(&device, &[1.0, 2.0, 3.0]);
        let b = buffer(&device, &[10.0, 20.0, 30.0]);
        assert!(launch_add(&device, &a, &b, &a, 3).is_success());
        assert_eq!(read(&device, &a), [11.0, 22.0, 33.0]);
        assert_eq!(device.live_buffers(), 2);
    }

    #[test]
    fn unset_slots_block_the_launch() {
        let device = HostDevice::new();
        let kernel = device.load_kernel("sign_double").unwrap();
        assert!(device.set_kernel_arg(&kernel, 0, &KernelArg::Int(1)).is_success());
        assert_eq!(
            device.enqueue(&kernel, &WorkSize::linear(1, 256)),
            StatusCode::INVALID_KERNEL_ARGS
        );
    }

    #[test]
    fn binding_checks_signature() {
        let device = HostDevice::new();
        let kernel = device.load_kernel("powx_double").unwrap();
        assert_eq!(
            device.set_kernel_arg(&kernel, 2, &KernelArg::Float(2.0)),
            StatusCode::INVALID_ARG_SIZE
        );
        assert_eq!(
            device.set_kernel_arg(&kernel, 9, &KernelArg::Int(0)),
            StatusCode::INVALID_ARG_INDEX
        );
        let stale = DeviceBuffer::new(999, 8);
        assert_eq!(
            device.set_kernel_arg(&kernel, 1, &KernelArg::from(&stale)),
            StatusCode::INVALID_MEM_OBJECT
        );
        assert_eq!(device.load_kernel("powx").unwrap_err(), StatusCode::INVALID_KERNEL_NAME);
    }

    #[test]
    fn short_buffers_fail_without_losing_outputs() {
        let device = HostDevice::new();
        let a = buffer(&device, &[1.0, 2.0]);
        let b = buffer(&device, &[1.0, 2.0]);
        let y = buffer(&device, &[0.0, 0.0]);
        assert_eq!(launch_add(&device, &a, &b, &y, 4), StatusCode::OUT_OF_RESOURCES);
        assert_eq!(read(&device, &y), [0.0, 0.0]);
    }

    #[test]
    fn transfers_are_bounds_checked() {
        let device = HostDevice::new();
        let a = buffer(&device, &[1.0, 2.0]);
        assert_eq!(device.write_buffer(&a, 4, &[0; 8]), StatusCode::INVALID_VALUE);
        let mut out = [0u8; 4];
        assert!(device.read_buffer(&a, 4, &mut out).is_success());
        assert_eq!(f32::from_ne_bytes(out), 2.0);
        device.release_buffer(a);
        assert_eq!(device.read_buffer(&a, 0, &mut out), StatusCode::INVALID_MEM_OBJECT);
        assert_eq!(device.create_buffer(0).unwrap_err(), StatusCode::INVALID_BUFFER_SIZE);
    }
}
