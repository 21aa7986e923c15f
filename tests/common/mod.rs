#![allow(dead_code)]

use layer_kernels::device::{
    ComputeDevice, DeviceBuffer, KernelArg, KernelHandle, download, upload, zeroed,
};
use layer_kernels::error::StatusCode;
use layer_kernels::work::WorkSize;
use layer_kernels::{Dispatcher, Dtype, HostDevice};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn host() -> Dispatcher {
    init();
    Dispatcher::new(Arc::new(HostDevice::new()))
}

pub fn put<T: Dtype>(ctx: &Dispatcher, data: &[T]) -> DeviceBuffer {
    upload(ctx.device(), data).unwrap()
}

pub fn put_i32(ctx: &Dispatcher, data: &[i32]) -> DeviceBuffer {
    upload(ctx.device(), data).unwrap()
}

pub fn zeros<T: Dtype>(ctx: &Dispatcher, len: usize) -> DeviceBuffer {
    zeroed::<T>(ctx.device(), len).unwrap()
}

pub fn zeros_i32(ctx: &Dispatcher, len: usize) -> DeviceBuffer {
    zeroed::<i32>(ctx.device(), len).unwrap()
}

pub fn get<T: Dtype>(ctx: &Dispatcher, buffer: &DeviceBuffer) -> Vec<T> {
    download(ctx.device(), buffer).unwrap()
}

pub fn get_i32(ctx: &Dispatcher, buffer: &DeviceBuffer) -> Vec<i32> {
    download(ctx.device(), buffer).unwrap()
}

#[track_caller]
pub fn assert_close<T: Dtype>(actual: &[T], expected: &[T]) {
    assert_eq!(actual.len(), expected.len(), "length differs");
    if let Some((i, a, e)) = layer_kernels::approx::first_mismatch(actual, expected) {
        panic!("element {i}: got {a}, expected {e}\n  actual:   {actual:?}\n  expected: {expected:?}");
    }
}

/// Host device that records traffic and can reject chosen argument slots.
#[derive(Default)]
pub struct CountingDevice {
    pub inner: HostDevice,
    pub loads: AtomicUsize,
    pub launches: AtomicUsize,
    pub reject: Mutex<Vec<(u32, StatusCode)>>,
    pub last_work: Mutex<Option<WorkSize>>,
}

impl CountingDevice {
    pub fn rejecting(slots: &[(u32, StatusCode)]) -> Self {
        let device = Self::default();
        device.reject.lock().extend_from_slice(slots);
        device
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

impl ComputeDevice for CountingDevice {
    fn name(&self) -> &str {
        "counting"
    }

    fn load_kernel(&self, name: &str) -> Result<KernelHandle, StatusCode> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load_kernel(name)
    }

    fn set_kernel_arg(&self, kernel: &KernelHandle, index: u32, arg: &KernelArg) -> StatusCode {
        if let Some(&(_, code)) = self.reject.lock().iter().find(|(slot, _)| *slot == index) {
            return code;
        }
        self.inner.set_kernel_arg(kernel, index, arg)
    }

    fn enqueue(&self, kernel: &KernelHandle, work: &WorkSize) -> StatusCode {
        self.launches.fetch_add(1, Ordering::SeqCst);
        *self.last_work.lock() = Some(*work);
        self.inner.enqueue(kernel, work)
    }

    fn create_buffer(&self, len_bytes: usize) -> Result<DeviceBuffer, StatusCode> {
        self.inner.create_buffer(len_bytes)
    }

    fn write_buffer(&self, buffer: &DeviceBuffer, offset: usize, data: &[u8]) -> StatusCode {
        self.inner.write_buffer(buffer, offset, data)
    }

    fn read_buffer(&self, buffer: &DeviceBuffer, offset: usize, out: &mut [u8]) -> StatusCode {
        self.inner.read_buffer(buffer, offset, out)
    }

    fn release_buffer(&self, buffer: DeviceBuffer) {
        self.inner.release_buffer(buffer)
    }

    fn finish(&self) -> StatusCode {
        self.inner.finish()
    }

    fn max_work_group_size(&self) -> usize {
        self.inner.max_work_group_size()
    }
}
