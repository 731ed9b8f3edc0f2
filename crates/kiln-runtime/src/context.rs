//! Per-device execution context: one device handle and its single queue.

use crate::device::Capabilities;
use crate::error::DeviceError;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{error, info};

/// Live device allocations made through one context.
#[derive(Debug, Default)]
pub(crate) struct AllocationLedger {
    buffers: AtomicUsize,
    bytes: AtomicU64,
}

impl AllocationLedger {
    pub(crate) fn acquire(&self, bytes: u64) {
        self.buffers.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn release(&self, bytes: u64) {
        self.buffers.fetch_sub(1, Ordering::Relaxed);
        self.bytes.fetch_sub(bytes, Ordering::Relaxed);
    }

    fn buffers(&self) -> usize {
        self.buffers.load(Ordering::Relaxed)
    }

    fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// A device handle plus its single, in-order command queue.
///
/// Every program, kernel and buffer derived from a [`Device`](crate::Device)
/// shares the same context, so all work for that device is ordered by
/// submission. Fields drop in declaration order: the queue is released
/// before the device.
pub struct ExecutionContext {
    label: String,
    queue: wgpu::Queue,
    device: wgpu::Device,
    capabilities: Capabilities,
    ledger: AllocationLedger,
}

impl ExecutionContext {
    pub(crate) fn open(
        adapter: &wgpu::Adapter,
        label: &str,
        capabilities: Capabilities,
    ) -> Result<Self, DeviceError> {
        let device_desc = wgpu::DeviceDescriptor {
            label: Some(label),
            required_limits: adapter.limits(),
            ..Default::default()
        };

        let (device, queue) = pollster::block_on(adapter.request_device(&device_desc, None))
            .map_err(|e| DeviceError::ContextOpen {
                device: label.to_string(),
                reason: e.to_string(),
            })?;

        // Anything not caught by an operation's own error scope is logged
        // rather than aborting the process.
        let owner = label.to_string();
        device.on_uncaptured_error(Box::new(move |e| {
            error!(device = %owner, "uncaptured device error: {e}");
        }));

        info!(device = %label, "execution context opened");

        Ok(Self {
            label: label.to_string(),
            queue,
            device,
            capabilities,
            ledger: AllocationLedger::default(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Number of device buffers currently allocated through this context.
    pub fn outstanding_buffers(&self) -> usize {
        self.ledger.buffers()
    }

    /// Bytes of device memory currently allocated through this context.
    pub fn outstanding_bytes(&self) -> u64 {
        self.ledger.bytes()
    }

    pub(crate) fn ledger(&self) -> &AllocationLedger {
        &self.ledger
    }

    /// Run `f` inside validation and out-of-memory error scopes.
    ///
    /// Returns the first captured device error instead of `f`'s result.
    pub(crate) fn scoped<R>(&self, f: impl FnOnce() -> R) -> Result<R, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let out = f();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        match validation.or(oom) {
            Some(e) => Err(e.to_string()),
            None => Ok(out),
        }
    }

    /// Block until `submission` has finished executing.
    pub(crate) fn wait_for(&self, submission: wgpu::SubmissionIndex) {
        let _ = self.device.poll(wgpu::Maintain::wait_for(submission));
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        info!(device = %self.label, "execution context released");
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("label", &self.label)
            .field("outstanding_buffers", &self.outstanding_buffers())
            .field("outstanding_bytes", &self.outstanding_bytes())
            .finish()
    }
}
