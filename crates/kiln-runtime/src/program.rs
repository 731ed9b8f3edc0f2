//! Kernel program compilation and entry-point reflection.
//!
//! `naga_oil` composes the source with the caller's defines, `naga` validates
//! the resulting module, and the module is re-emitted as WGSL for the device.
//! Compilation is all-or-nothing; a failure never leaves a program behind.

use crate::context::ExecutionContext;
use crate::error::{CompileError, KernelCreateError};
use crate::kernel::Kernel;
use naga_oil::compose::{Composer, NagaModuleDescriptor, ShaderDefValue};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Build-time options, the analogue of compiler `-D` flags.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub defines: HashMap<String, ShaderDefValue>,
    /// File name reported in diagnostics.
    pub file_name: Option<String>,
}

impl BuildOptions {
    pub fn define(mut self, name: impl Into<String>, value: ShaderDefValue) -> Self {
        self.defines.insert(name.into(), value);
        self
    }

    fn file_name(&self) -> &str {
        self.file_name.as_deref().unwrap_or("kernel.wgsl")
    }
}

/// How an entry point uses one of its bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    Storage { read_only: bool },
    Uniform,
    /// Textures, samplers and other handles; not bindable from a slot.
    Unsupported(String),
}

/// A resource binding used by an entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamBinding {
    pub group: u32,
    pub slot: u32,
    pub kind: ParamKind,
}

/// A shader entry point and the bindings it statically uses.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryPoint {
    pub name: String,
    pub stage: naga::ShaderStage,
    pub workgroup_size: [u32; 3],
    pub bindings: Vec<ParamBinding>,
}

impl EntryPoint {
    pub fn is_compute(&self) -> bool {
        self.stage == naga::ShaderStage::Compute
    }

    /// Number of argument slots the kernel reads (highest slot + 1).
    pub fn arg_count(&self) -> usize {
        self.bindings
            .iter()
            .map(|b| b.slot as usize + 1)
            .max()
            .unwrap_or(0)
    }
}

/// A compiled, validated module and its reflected interface.
///
/// Building one needs no device, so sources can be checked offline.
#[derive(Debug, Clone)]
pub struct ShaderInterface {
    wgsl: String,
    entry_points: Vec<EntryPoint>,
}

impl ShaderInterface {
    pub fn build(source: &str, options: &BuildOptions) -> Result<Self, CompileError> {
        let mut composer = Composer::default();
        let module = composer
            .make_naga_module(NagaModuleDescriptor {
                source,
                file_path: options.file_name(),
                shader_defs: options.defines.clone(),
                ..Default::default()
            })
            .map_err(|e| CompileError::Parse {
                diagnostic: e.emit_to_string(&composer),
            })?;

        let info = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module)
        .map_err(|e| CompileError::Validation {
            diagnostic: render_chain(&e),
        })?;

        let entry_points = module
            .entry_points
            .iter()
            .enumerate()
            .map(|(index, ep)| reflect_entry_point(&module, &info, index, ep))
            .collect();

        let wgsl = naga::back::wgsl::write_string(
            &module,
            &info,
            naga::back::wgsl::WriterFlags::empty(),
        )
        .map_err(|e| CompileError::Validation {
            diagnostic: format!("WGSL generation failed: {e}"),
        })?;

        Ok(Self { wgsl, entry_points })
    }

    pub fn entry_points(&self) -> &[EntryPoint] {
        &self.entry_points
    }

    pub fn entry_point(&self, name: &str) -> Option<&EntryPoint> {
        self.entry_points.iter().find(|ep| ep.name == name)
    }

    /// The validated module as WGSL.
    pub fn wgsl(&self) -> &str {
        &self.wgsl
    }
}

fn render_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

fn reflect_entry_point(
    module: &naga::Module,
    info: &naga::valid::ModuleInfo,
    index: usize,
    ep: &naga::EntryPoint,
) -> EntryPoint {
    let uses = info.get_entry_point(index);
    let mut bindings: Vec<ParamBinding> = module
        .global_variables
        .iter()
        .filter(|(handle, _)| !uses[*handle].is_empty())
        .filter_map(|(_, var)| {
            let binding = var.binding.as_ref()?;
            let kind = match var.space {
                naga::AddressSpace::Storage { access } => ParamKind::Storage {
                    read_only: !access.contains(naga::StorageAccess::STORE),
                },
                naga::AddressSpace::Uniform => ParamKind::Uniform,
                other => ParamKind::Unsupported(format!("{other:?}")),
            };
            Some(ParamBinding {
                group: binding.group,
                slot: binding.binding,
                kind,
            })
        })
        .collect();
    bindings.sort_by_key(|b| (b.group, b.slot));

    EntryPoint {
        name: ep.name.clone(),
        stage: ep.stage,
        workgroup_size: ep.workgroup_size,
        bindings,
    }
}

/// A compiled kernel program bound to one device's context.
pub struct Program {
    context: Arc<ExecutionContext>,
    interface: ShaderInterface,
    module: wgpu::ShaderModule,
    label: String,
}

impl Program {
    #[tracing::instrument(skip_all, fields(device = %context.label(), bytes = source.len()))]
    pub(crate) fn build(
        context: Arc<ExecutionContext>,
        source: &str,
        options: &BuildOptions,
    ) -> Result<Self, CompileError> {
        let interface = ShaderInterface::build(source, options)?;
        let label = options.file_name().to_string();

        let module = context
            .scoped(|| {
                context
                    .device()
                    .create_shader_module(wgpu::ShaderModuleDescriptor {
                        label: Some(&label),
                        source: wgpu::ShaderSource::Wgsl(interface.wgsl().into()),
                    })
            })
            .map_err(CompileError::Device)?;

        info!(
            program = %label,
            entry_points = interface.entry_points().len(),
            "program compiled"
        );

        Ok(Self {
            context,
            interface,
            module,
            label,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn entry_points(&self) -> &[EntryPoint] {
        self.interface.entry_points()
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    /// Extract the compute entry point `name` as an executable kernel.
    pub fn create_kernel(&self, name: &str) -> Result<Kernel, KernelCreateError> {
        let entry = self
            .interface
            .entry_point(name)
            .ok_or_else(|| KernelCreateError::NotFound(name.to_string()))?;

        if !entry.is_compute() {
            return Err(KernelCreateError::NotCompute {
                name: name.to_string(),
                stage: format!("{:?}", entry.stage),
            });
        }

        Kernel::new(Arc::clone(&self.context), &self.module, entry.clone())
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        debug!(program = %self.label, "program destroy");
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("label", &self.label)
            .field("entry_points", &self.interface.entry_points())
            .finish()
    }
}
