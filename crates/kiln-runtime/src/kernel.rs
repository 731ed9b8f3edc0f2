//! Executable kernels and their argument slots.
//!
//! A [`Kernel`] holds one compute pipeline plus an ordered, growable table of
//! argument slots. Slot `k` feeds `@group(0) @binding(k)` of the entry point.
//! Every bind releases whatever occupied the slot before allocating the
//! replacement, so a failed bind leaves the slot empty, and the kernel is the
//! sole owner of every device buffer bound into it.

use crate::buffer::{Allocation, TypedBuffer};
use crate::context::ExecutionContext;
use crate::dispatch::{self, WorkSize};
use crate::element::{AccessMode, ElementKind};
use crate::error::{BindError, DispatchError, KernelCreateError, ReadbackError};
use crate::host::{HostView, StreamView};
use crate::program::{EntryPoint, ParamKind};
use crate::readback::{self, Values};
use crate::slots::SlotTable;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Bytes reserved for a scalar or vector3 argument: one 16-byte record,
/// large enough for `vec3<f32>` under uniform layout rules.
const VALUE_RECORD: usize = 16;

const VALUE_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::UNIFORM
    .union(wgpu::BufferUsages::STORAGE)
    .union(wgpu::BufferUsages::COPY_DST);

/// What a slot currently holds.
enum KernelArg {
    Null { byte_size: u64 },
    Int { value: i32, record: Allocation },
    Float { value: f32, record: Allocation },
    Vector3 { value: [f32; 3], record: Allocation },
    Buffer(TypedBuffer),
}

impl KernelArg {
    /// The device buffer backing this argument; `None` for a null
    /// placeholder, which is materialised per dispatch.
    fn buffer(&self) -> Option<&wgpu::Buffer> {
        match self {
            KernelArg::Null { .. } => None,
            KernelArg::Int { record, .. }
            | KernelArg::Float { record, .. }
            | KernelArg::Vector3 { record, .. } => Some(record.buffer()),
            KernelArg::Buffer(buffer) => Some(buffer.raw()),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            KernelArg::Null { .. } => "a null placeholder",
            KernelArg::Int { .. } => "an int value",
            KernelArg::Float { .. } => "a float value",
            KernelArg::Vector3 { .. } => "a vector3 value",
            KernelArg::Buffer(_) => "a buffer",
        }
    }

    /// Whether this argument can satisfy a binding declared as `declared`.
    fn check(&self, slot: usize, declared: &ParamKind) -> Result<(), DispatchError> {
        let incompatible = |declared| DispatchError::IncompatibleArgument {
            slot,
            held: self.describe(),
            declared,
        };
        match (declared, self) {
            (ParamKind::Storage { read_only: false }, KernelArg::Buffer(buffer))
                if !buffer.access().device_writable() =>
            {
                Err(DispatchError::AccessViolation { slot })
            }
            (
                ParamKind::Storage { read_only: false },
                KernelArg::Int { .. } | KernelArg::Float { .. } | KernelArg::Vector3 { .. },
            ) => Err(DispatchError::AccessViolation { slot }),
            (ParamKind::Uniform, KernelArg::Buffer(_) | KernelArg::Null { .. }) => {
                Err(incompatible("uniform"))
            }
            (ParamKind::Unsupported(_), _) => Err(incompatible("non-buffer")),
            _ => Ok(()),
        }
    }

    fn state(&self) -> SlotState {
        match self {
            KernelArg::Null { byte_size } => SlotState::Null {
                byte_size: *byte_size,
            },
            KernelArg::Int { value, .. } => SlotState::Int(*value),
            KernelArg::Float { value, .. } => SlotState::Float(*value),
            KernelArg::Vector3 { value, .. } => SlotState::Vector3(*value),
            KernelArg::Buffer(buffer) => SlotState::Buffer {
                kind: buffer.kind(),
                access: buffer.access(),
                len: buffer.len(),
            },
        }
    }
}

/// Observable state of one argument slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlotState {
    Empty,
    Null {
        byte_size: u64,
    },
    Int(i32),
    Float(f32),
    Vector3([f32; 3]),
    Buffer {
        kind: ElementKind,
        access: AccessMode,
        len: usize,
    },
}

/// An executable compute entry point with its argument slots.
pub struct Kernel {
    name: String,
    context: Arc<ExecutionContext>,
    entry: EntryPoint,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    slots: SlotTable<KernelArg>,
}

impl Kernel {
    pub(crate) fn new(
        context: Arc<ExecutionContext>,
        module: &wgpu::ShaderModule,
        entry: EntryPoint,
    ) -> Result<Self, KernelCreateError> {
        let name = entry.name.clone();

        let mut layout_entries = Vec::with_capacity(entry.bindings.len());
        for binding in &entry.bindings {
            if binding.group != 0 {
                return Err(KernelCreateError::UnsupportedGroup {
                    name,
                    group: binding.group,
                });
            }
            let ty = match &binding.kind {
                ParamKind::Storage { read_only } => wgpu::BufferBindingType::Storage {
                    read_only: *read_only,
                },
                ParamKind::Uniform => wgpu::BufferBindingType::Uniform,
                ParamKind::Unsupported(resource) => {
                    return Err(KernelCreateError::UnsupportedBinding {
                        name,
                        slot: binding.slot,
                        resource: resource.clone(),
                    });
                }
            };
            layout_entries.push(wgpu::BindGroupLayoutEntry {
                binding: binding.slot,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }

        let device = context.device();
        let (pipeline, layout) = context
            .scoped(|| {
                let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&format!("{name}_layout")),
                    entries: &layout_entries,
                });
                let pipeline_layout =
                    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                        label: Some(&format!("{name}_pipeline_layout")),
                        bind_group_layouts: &[&layout],
                        push_constant_ranges: &[],
                    });
                let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(&name),
                    layout: Some(&pipeline_layout),
                    module,
                    entry_point: Some(&name),
                    compilation_options: Default::default(),
                    cache: None,
                });
                (pipeline, layout)
            })
            .map_err(|reason| KernelCreateError::Pipeline {
                name: name.clone(),
                reason,
            })?;

        debug!(
            kernel = %name,
            bindings = entry.bindings.len(),
            workgroup_size = ?entry.workgroup_size,
            "kernel created"
        );

        Ok(Self {
            name,
            context,
            entry,
            pipeline,
            layout,
            slots: SlotTable::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workgroup_size(&self) -> [u32; 3] {
        self.entry.workgroup_size
    }

    pub fn entry_point(&self) -> &EntryPoint {
        &self.entry
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    /// Length of the slot table: highest slot ever bound + 1.
    pub fn arg_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_state(&self, slot: usize) -> SlotState {
        self.slots
            .get(slot)
            .map_or(SlotState::Empty, KernelArg::state)
    }

    fn check_slot(&self, slot: usize) -> Result<(), BindError> {
        let max = self.context.capabilities().max_argument_slots as usize;
        if slot >= max {
            return Err(BindError::SlotOutOfRange { slot, max });
        }
        Ok(())
    }

    /// Empty `slot`, destroying any device memory it held.
    fn release(&mut self, slot: usize) {
        if let Some(previous) = self.slots.release(slot) {
            debug!(kernel = %self.name, slot, previous = previous.describe(), "slot released");
        }
    }

    fn bind_value(
        &mut self,
        slot: usize,
        bytes: &[u8],
        arg: impl FnOnce(Allocation) -> KernelArg,
    ) -> Result<(), BindError> {
        self.check_slot(slot)?;
        self.release(slot);

        let mut record = [0u8; VALUE_RECORD];
        record[..bytes.len()].copy_from_slice(bytes);
        let label = format!("{}[{slot}]", self.name);
        let allocation = Allocation::with_contents(&self.context, &label, &record, VALUE_USAGE)?;

        let arg = arg(allocation);
        debug!(kernel = %self.name, slot, arg = arg.describe(), "bound value");
        self.slots.insert(slot, arg);
        Ok(())
    }

    /// Reserve `slot` as an uninitialised argument of `byte_size` bytes.
    ///
    /// Storage is only created if a dispatch reads the binding, and its
    /// contents are undefined.
    pub fn bind_null(&mut self, slot: usize, byte_size: u64) -> Result<(), BindError> {
        self.check_slot(slot)?;
        self.release(slot);
        debug!(kernel = %self.name, slot, byte_size, "bound null");
        self.slots.insert(slot, KernelArg::Null { byte_size });
        Ok(())
    }

    pub fn bind_int(&mut self, slot: usize, value: i32) -> Result<(), BindError> {
        self.bind_value(slot, bytemuck::bytes_of(&value), |record| KernelArg::Int {
            value,
            record,
        })
    }

    pub fn bind_float(&mut self, slot: usize, value: f32) -> Result<(), BindError> {
        self.bind_value(slot, bytemuck::bytes_of(&value), |record| KernelArg::Float {
            value,
            record,
        })
    }

    pub fn bind_vector3(&mut self, slot: usize, value: [f32; 3]) -> Result<(), BindError> {
        self.bind_value(slot, bytemuck::cast_slice(&value), |record| {
            KernelArg::Vector3 { value, record }
        })
    }

    /// Pack `field` of `view` into a typed device buffer and bind it.
    ///
    /// `read`/`write` give the device access; both or neither mean
    /// read-write. After an error the slot is empty.
    pub fn bind_buffer(
        &mut self,
        slot: usize,
        view: &impl HostView,
        field: &str,
        read: bool,
        write: bool,
    ) -> Result<(), BindError> {
        self.check_slot(slot)?;
        self.release(slot);
        let stream = view
            .stream(field)
            .ok_or_else(|| BindError::FieldNotFound(field.to_string()))?;
        self.bind_view(slot, field, stream, AccessMode::from_flags(read, write))
    }

    /// Bind a stream that is not part of a [`HostView`].
    pub fn bind_stream<'s>(
        &mut self,
        slot: usize,
        stream: impl Into<StreamView<'s>>,
        access: AccessMode,
    ) -> Result<(), BindError> {
        self.check_slot(slot)?;
        self.release(slot);
        self.bind_view(slot, &format!("slot {slot}"), stream.into(), access)
    }

    fn bind_view(
        &mut self,
        slot: usize,
        field: &str,
        stream: StreamView<'_>,
        access: AccessMode,
    ) -> Result<(), BindError> {
        if stream.count() == 0 {
            return Err(BindError::EmptyView {
                field: field.to_string(),
            });
        }
        let label = format!("{}[{slot}] {field}", self.name);
        let buffer = TypedBuffer::from_stream(&self.context, &label, &stream, access)?;
        debug!(
            kernel = %self.name,
            slot,
            field,
            kind = %buffer.kind(),
            count = stream.count(),
            components = stream.components(),
            "bound buffer"
        );
        self.slots.insert(slot, KernelArg::Buffer(buffer));
        Ok(())
    }

    /// Run the kernel over an N-dimensional grid and block until it
    /// completes. Returns the elapsed wall-clock time of the submission.
    ///
    /// `local`, when given, must equal the entry point's declared
    /// work-group size in every used dimension.
    #[tracing::instrument(skip(self), fields(kernel = %self.name))]
    pub fn dispatch(
        &self,
        dims: usize,
        global: &[u32],
        local: Option<&[u32]>,
    ) -> Result<Duration, DispatchError> {
        let work = WorkSize::new(dims, global, local)?;
        let groups = work.workgroups(
            self.entry.workgroup_size,
            self.context.capabilities().max_work_groups_per_dimension,
        )?;

        // Null placeholders get scratch storage that lives for this dispatch.
        let mut scratch = Vec::new();
        for binding in &self.entry.bindings {
            let slot = binding.slot as usize;
            let arg = self
                .slots
                .get(slot)
                .ok_or(DispatchError::UnboundArgument(slot))?;
            arg.check(slot, &binding.kind)?;
            if let KernelArg::Null { byte_size } = arg {
                let label = format!("{}[{slot}] scratch", self.name);
                let allocation = Allocation::scratch(&self.context, &label, *byte_size)
                    .map_err(DispatchError::Enqueue)?;
                scratch.push(allocation);
            }
        }

        let mut scratch_buffers = scratch.iter().map(Allocation::buffer);
        let mut entries = Vec::with_capacity(self.entry.bindings.len());
        for binding in &self.entry.bindings {
            let slot = binding.slot as usize;
            let buffer = self
                .slots
                .get(slot)
                .and_then(KernelArg::buffer)
                .or_else(|| scratch_buffers.next())
                .ok_or(DispatchError::UnboundArgument(slot))?;
            entries.push(wgpu::BindGroupEntry {
                binding: binding.slot,
                resource: buffer.as_entire_binding(),
            });
        }

        let bind_group = self
            .context
            .scoped(|| {
                self.context
                    .device()
                    .create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some(&self.name),
                        layout: &self.layout,
                        entries: &entries,
                    })
            })
            .map_err(DispatchError::Enqueue)?;

        let elapsed = dispatch::submit(
            &self.context,
            &self.name,
            &self.pipeline,
            &bind_group,
            groups,
        )?;

        debug!(
            groups = ?groups,
            seconds = elapsed.as_secs_f64(),
            "dispatch complete"
        );
        Ok(elapsed)
    }

    fn bound_buffer(&self, slot: usize) -> Result<&TypedBuffer, ReadbackError> {
        match self.slots.get(slot) {
            Some(KernelArg::Buffer(buffer)) => Ok(buffer),
            _ => Err(ReadbackError::NotABuffer(slot)),
        }
    }

    fn check_count(buffer: &TypedBuffer, count: usize) -> Result<(), ReadbackError> {
        if count > buffer.len() {
            return Err(ReadbackError::CountExceedsBuffer {
                requested: count,
                available: buffer.len(),
            });
        }
        Ok(())
    }

    /// Read the first `count` units of the buffer at `slot`: vectors for
    /// vector3 kinds, scalars otherwise.
    pub fn read(&self, slot: usize, count: usize) -> Result<Values, ReadbackError> {
        let buffer = self.bound_buffer(slot)?;
        Self::check_count(buffer, count)?;
        let values = readback::read_values(&self.context, buffer.raw(), buffer.kind(), count)?;
        debug!(kernel = %self.name, slot, count, kind = %buffer.kind(), "read back");
        Ok(values)
    }

    /// Read the first `count` units of the buffer at `slot` into `field`
    /// of `view`, restoring its stride.
    pub fn read_into(
        &self,
        slot: usize,
        count: usize,
        view: &mut impl HostView,
        field: &str,
    ) -> Result<(), ReadbackError> {
        let buffer = self.bound_buffer(slot)?;
        Self::check_count(buffer, count)?;
        let kind = buffer.kind();

        let dest = view
            .stream_mut(field)
            .ok_or_else(|| ReadbackError::FieldNotFound(field.to_string()))?;
        readback::check_destination(kind, &dest, count, field)?;

        let bytes = readback::download(
            &self.context,
            buffer.raw(),
            readback::transfer_size(kind, count),
        )?;
        readback::scatter(kind, &bytes, count, dest);
        debug!(kernel = %self.name, slot, count, field, kind = %kind, "read back into host view");
        Ok(())
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        debug!(kernel = %self.name, slots = self.slots.len(), "kernel destroy");
        self.slots.clear();
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots: Vec<SlotState> = (0..self.slots.len()).map(|i| self.slot_state(i)).collect();
        f.debug_struct("Kernel")
            .field("name", &self.name)
            .field("workgroup_size", &self.entry.workgroup_size)
            .field("slots", &slots)
            .finish()
    }
}
