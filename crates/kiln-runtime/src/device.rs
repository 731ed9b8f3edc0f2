//! Enumerated compute devices and their capability descriptors.

use crate::context::ExecutionContext;
use crate::error::{DeviceError, KilnError};
use crate::program::{BuildOptions, Program};
use std::sync::Arc;
use tracing::{debug, info};

/// Compute limits of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// Not reported by every backend.
    pub max_compute_units: Option<u32>,
    /// Maximum invocations in one work group.
    pub max_work_group_size: u32,
    pub max_work_item_dimensions: u32,
    /// Maximum work-group extent per dimension.
    pub max_work_item_sizes: Vec<u32>,
    /// Maximum work-group count per dispatch dimension.
    pub max_work_groups_per_dimension: u32,
    /// Highest usable argument slot + 1.
    pub max_argument_slots: u32,
    /// Largest buffer that can be bound to a kernel argument.
    pub max_buffer_size: u64,
}

impl Capabilities {
    pub fn from_limits(limits: &wgpu::Limits) -> Self {
        Self {
            max_compute_units: None,
            max_work_group_size: limits.max_compute_invocations_per_workgroup,
            max_work_item_dimensions: 3,
            max_work_item_sizes: vec![
                limits.max_compute_workgroup_size_x,
                limits.max_compute_workgroup_size_y,
                limits.max_compute_workgroup_size_z,
            ],
            max_work_groups_per_dimension: limits.max_compute_workgroups_per_dimension,
            max_argument_slots: limits.max_bindings_per_bind_group,
            max_buffer_size: limits
                .max_buffer_size
                .min(u64::from(limits.max_storage_buffer_binding_size)),
        }
    }
}

/// Identity and capabilities of one enumerated device.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub name: String,
    pub vendor: u32,
    pub device_type: wgpu::DeviceType,
    pub driver: String,
    pub backend: wgpu::Backend,
    pub capabilities: Capabilities,
}

impl DeviceDescriptor {
    pub(crate) fn from_adapter(adapter: &wgpu::Adapter) -> Self {
        let info = adapter.get_info();
        Self {
            name: info.name,
            vendor: info.vendor,
            device_type: info.device_type,
            driver: info.driver,
            backend: info.backend,
            capabilities: Capabilities::from_limits(&adapter.limits()),
        }
    }

    pub fn is_gpu(&self) -> bool {
        matches!(
            self.device_type,
            wgpu::DeviceType::DiscreteGpu
                | wgpu::DeviceType::IntegratedGpu
                | wgpu::DeviceType::VirtualGpu
        )
    }
}

/// An enumerated compute device.
///
/// Owns at most one [`ExecutionContext`], created on first use and never
/// recreated for the lifetime of the device.
pub struct Device {
    adapter: wgpu::Adapter,
    descriptor: DeviceDescriptor,
    context: Option<Arc<ExecutionContext>>,
    closed: bool,
}

impl Device {
    pub(crate) fn new(adapter: wgpu::Adapter) -> Self {
        let descriptor = DeviceDescriptor::from_adapter(&adapter);
        Self {
            adapter,
            descriptor,
            context: None,
            closed: false,
        }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.descriptor.capabilities
    }

    /// The context if it has been opened.
    pub fn context(&self) -> Option<&Arc<ExecutionContext>> {
        self.context.as_ref()
    }

    /// Return the device's context, creating it on first call.
    pub fn open_context(&mut self) -> Result<Arc<ExecutionContext>, DeviceError> {
        if let Some(context) = &self.context {
            return Ok(Arc::clone(context));
        }
        if self.closed {
            return Err(DeviceError::Closed(self.descriptor.name.clone()));
        }

        let context = Arc::new(ExecutionContext::open(
            &self.adapter,
            &self.descriptor.name,
            self.descriptor.capabilities.clone(),
        )?);
        self.context = Some(Arc::clone(&context));
        Ok(context)
    }

    /// Release the queue and then the context.
    ///
    /// Refused while any program, kernel or buffer still holds the context;
    /// release those first. Closing a device whose context was never opened
    /// only marks it closed.
    pub fn close_context(&mut self) -> Result<(), DeviceError> {
        if let Some(context) = &self.context {
            let holders = Arc::strong_count(context) - 1;
            if holders > 0 {
                return Err(DeviceError::ContextInUse {
                    device: self.descriptor.name.clone(),
                    holders,
                });
            }
        }
        self.context = None;
        self.closed = true;
        info!(device = %self.descriptor.name, "device closed");
        Ok(())
    }

    /// Compile kernel source for this device, opening its context if needed.
    pub fn compile(&mut self, source: &str) -> Result<Program, KilnError> {
        self.compile_with_options(source, &BuildOptions::default())
    }

    pub fn compile_with_options(
        &mut self,
        source: &str,
        options: &BuildOptions,
    ) -> Result<Program, KilnError> {
        let context = self.open_context()?;
        Ok(Program::build(context, source, options)?)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        debug!(device = %self.descriptor.name, "device destroy");
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("descriptor", &self.descriptor)
            .field("context_open", &self.context.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_from_default_limits() {
        let limits = wgpu::Limits::default();
        let caps = Capabilities::from_limits(&limits);

        assert_eq!(caps.max_compute_units, None);
        assert_eq!(caps.max_work_item_dimensions, 3);
        assert_eq!(caps.max_work_item_sizes.len(), 3);
        assert_eq!(caps.max_work_item_sizes[0], limits.max_compute_workgroup_size_x);
        assert_eq!(
            caps.max_work_group_size,
            limits.max_compute_invocations_per_workgroup
        );
        assert!(caps.max_buffer_size <= limits.max_buffer_size);
    }
}
