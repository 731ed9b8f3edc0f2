//! Work-size validation and blocking submission.
//!
//! Everything that can be rejected is rejected here, before the device sees
//! the command buffer.

use crate::context::ExecutionContext;
use crate::error::DispatchError;
use std::time::{Duration, Instant};

/// A validated N-dimensional work grid.
///
/// Unused dimensions are stored as 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkSize {
    dims: usize,
    global: [u32; 3],
    local: Option<[u32; 3]>,
}

impl WorkSize {
    pub fn new(dims: usize, global: &[u32], local: Option<&[u32]>) -> Result<Self, DispatchError> {
        if !(1..=3).contains(&dims) {
            return Err(DispatchError::InvalidDimensions(dims));
        }
        if global.len() != dims {
            return Err(DispatchError::GlobalArity {
                dims,
                actual: global.len(),
            });
        }
        if let Some(local) = local {
            if local.len() != dims {
                return Err(DispatchError::LocalArity {
                    dims,
                    actual: local.len(),
                });
            }
        }
        if let Some(dim) = global.iter().position(|&g| g == 0) {
            return Err(DispatchError::EmptyRange { dim });
        }

        Ok(Self {
            dims,
            global: widen(global),
            local: local.map(widen),
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn global(&self) -> [u32; 3] {
        self.global
    }

    /// Work-group counts for a kernel declaring `declared` invocations per
    /// group, on a device allowing `max` groups per dimension.
    pub fn workgroups(&self, declared: [u32; 3], max: u32) -> Result<[u32; 3], DispatchError> {
        if let Some(local) = self.local {
            if local[..self.dims] != declared[..self.dims] {
                return Err(DispatchError::WorkGroupMismatch {
                    local: local[..self.dims].to_vec(),
                    declared,
                });
            }
            for dim in 0..self.dims {
                if self.global[dim] % local[dim] != 0 {
                    return Err(DispatchError::NotDivisible {
                        dim,
                        global: self.global[dim],
                        local: local[dim],
                    });
                }
            }
        }

        let mut groups = [1; 3];
        for dim in 0..3 {
            groups[dim] = self.global[dim].div_ceil(declared[dim].max(1));
            if groups[dim] > max {
                return Err(DispatchError::TooManyGroups {
                    dim,
                    groups: groups[dim],
                    max,
                });
            }
        }
        Ok(groups)
    }
}

fn widen(values: &[u32]) -> [u32; 3] {
    let mut out = [1; 3];
    out[..values.len()].copy_from_slice(values);
    out
}

/// Record, submit and wait for one compute pass. Returns the wall-clock time
/// spent between recording and completion.
pub(crate) fn submit(
    context: &ExecutionContext,
    label: &str,
    pipeline: &wgpu::ComputePipeline,
    bind_group: &wgpu::BindGroup,
    groups: [u32; 3],
) -> Result<Duration, DispatchError> {
    let start = Instant::now();

    let submission = context
        .scoped(|| {
            let mut encoder =
                context
                    .device()
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                        label: Some(label),
                    });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(label),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                let [x, y, z] = groups;
                pass.dispatch_workgroups(x, y, z);
            }
            context.queue().submit(Some(encoder.finish()))
        })
        .map_err(DispatchError::Enqueue)?;

    context.wait_for(submission);
    Ok(start.elapsed())
}
