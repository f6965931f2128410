//! OpenCL hash kernel

use crate::error::{MinerError, MinerResult};
use crate::hash::enhanced_hash;
use crate::mining::parallel::{EncodedBatch, HashKernel};

use ocl::{Buffer, Device, Kernel, MemFlags, Platform, ProQue};
use parking_lot::Mutex;
use tracing::{debug, info};

const KERNEL_SRC: &str = include_str!("kernel.cl");

/// Name of the first OpenCL device found, if any.
pub fn probe() -> Option<String> {
    let platforms = ocl::core::get_platform_ids().ok()?;
    for id in platforms {
        let platform = Platform::new(id);
        let Ok(devices) = Device::list_all(platform) else {
            continue;
        };
        if let Some(device) = devices.first() {
            return device.name().ok();
        }
    }
    None
}

struct OclState {
    pro_que: ProQue,
    kernel: Kernel,
    slots: Buffer<u8>,
    lens: Buffer<u32>,
    out: Buffer<u32>,
    capacity: usize,
    width: usize,
}

impl OclState {
    fn build(pro_que: ProQue, capacity: usize, width: usize) -> MinerResult<Self> {
        let slots = pro_que
            .buffer_builder::<u8>()
            .len(capacity * width)
            .flags(MemFlags::READ_ONLY)
            .build()?;
        let lens = pro_que
            .buffer_builder::<u32>()
            .len(capacity)
            .flags(MemFlags::READ_ONLY)
            .build()?;
        let out = pro_que
            .buffer_builder::<u32>()
            .len(capacity)
            .flags(MemFlags::WRITE_ONLY)
            .build()?;

        let kernel = pro_que
            .kernel_builder("enhanced_hash")
            .arg(&slots)
            .arg(&lens)
            .arg(width as u32)
            .arg_named("count", 0u32)
            .arg(&out)
            .build()?;

        Ok(Self {
            pro_que,
            kernel,
            slots,
            lens,
            out,
            capacity,
            width,
        })
    }
}

/// Hash kernel running on the first OpenCL device.
///
/// Device buffers are sized for one batch and reused; a larger batch or a
/// different slot width rebuilds them.
pub struct OclKernel {
    device_name: String,
    state: Mutex<OclState>,
}

impl OclKernel {
    pub fn new(capacity: usize, width: usize) -> MinerResult<Self> {
        let capacity = capacity.max(1);
        let pro_que = ProQue::builder().src(KERNEL_SRC).dims(capacity).build()?;
        let device_name = pro_que.device().name()?;
        info!(device = %device_name, "Initialized OpenCL kernel");

        let kernel = Self {
            device_name,
            state: Mutex::new(OclState::build(pro_que, capacity, width)?),
        };
        kernel.self_check()?;
        Ok(kernel)
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Hash a known input on the device and compare with the host.
    fn self_check(&self) -> MinerResult<()> {
        let width = self.state.lock().width;
        let mut batch = EncodedBatch::new(width, 2);
        batch.push(0, b"abc");
        batch.push(1, b"");

        let mut out = Vec::new();
        self.hash_batch(&batch, &mut out)?;

        let expected = [enhanced_hash(b"abc"), 0];
        if out != expected {
            return Err(MinerError::GpuUnavailable(format!(
                "self-check mismatch on {}: device={:08x?} host={:08x?}",
                self.device_name, out, expected
            )));
        }
        debug!(device = %self.device_name, "GPU self-check passed");
        Ok(())
    }
}

impl HashKernel for OclKernel {
    fn name(&self) -> &'static str {
        "opencl"
    }

    fn hash_batch(&self, batch: &EncodedBatch, out: &mut Vec<u32>) -> MinerResult<()> {
        out.clear();
        if batch.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock();
        if batch.len() > state.capacity || batch.width() != state.width {
            let pro_que = state.pro_que.clone();
            *state = OclState::build(pro_que, batch.len().max(state.capacity), batch.width())?;
        }

        state.slots.write(batch.slots()).enq()?;
        state.lens.write(batch.lens()).enq()?;
        state.kernel.set_arg("count", batch.len() as u32)?;

        unsafe {
            state.kernel.cmd().global_work_size(batch.len()).enq()?;
        }

        out.resize(batch.len(), 0);
        state.out.read(&mut out[..]).len(batch.len()).enq()?;
        Ok(())
    }
}
