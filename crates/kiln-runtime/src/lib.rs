//! Host-side GPU compute manager.
//!
//! This crate enumerates compute devices, compiles WGSL kernel programs,
//! binds typed arguments (including strided host data packed into dense
//! device buffers), dispatches N-dimensional work grids and reads results
//! back into host storage with the original stride restored.
//!
//! # Architecture
//!
//! Ownership flows leaf-first:
//! 1. **Platform** - process-scoped instance, passed by reference to enumeration
//! 2. **Device** - an enumerated adapter that lazily owns one execution context
//! 3. **Program** - a compiled and validated module bound to that context
//! 4. **Kernel** - a compute entry point with a growable argument slot table
//! 5. **TypedBuffer** - device memory owned by exactly one slot, tagged with
//!    the element kind that drives packing and readback
//!
//! Every call is synchronous: dispatch and readback block until the device
//! has finished.
//!
//! # Example
//!
//! ```no_run
//! use kiln_runtime::{DeviceFilter, Platform, PlatformConfig, Strided, Values};
//!
//! fn main() -> anyhow::Result<()> {
//!     let platform = Platform::new(PlatformConfig::from_env());
//!     let mut device = platform.default_device(DeviceFilter::All)?;
//!
//!     let program = device.compile(
//!         r#"
//! @group(0) @binding(0) var<storage, read> src: array<vec3<f32>>;
//! @group(0) @binding(1) var<storage, read_write> dst: array<vec3<f32>>;
//!
//! @compute @workgroup_size(1)
//! fn copy(@builtin(global_invocation_id) id: vec3<u32>) {
//!     dst[id.x] = src[id.x];
//! }
//! "#,
//!     )?;
//!     let mut kernel = program.create_kernel("copy")?;
//!
//!     let points = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
//!     let view = Strided::dense(&points, 3)?;
//!     kernel.bind_stream(0, view, kiln_runtime::AccessMode::ReadOnly)?;
//!     kernel.bind_stream(1, view, kiln_runtime::AccessMode::WriteOnly)?;
//!
//!     let elapsed = kernel.dispatch(1, &[2], None)?;
//!     println!("took {:.6}s", elapsed.as_secs_f64());
//!
//!     if let Values::F32x3(out) = kernel.read(1, 2)? {
//!         assert_eq!(out, [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
//!     }
//!     Ok(())
//! }
//! ```

mod buffer;
mod context;
mod device;
mod dispatch;
mod element;
mod error;
mod host;
mod kernel;
mod platform;
mod program;
mod readback;
mod slots;

// Public exports
pub use buffer::TypedBuffer;
pub use context::ExecutionContext;
pub use device::{Capabilities, Device, DeviceDescriptor};
pub use dispatch::WorkSize;
pub use element::{
    pack, unpack, AccessMode, ElementKind, HostScalar, LayoutShape, RecordLayout, RecordShape,
    StorageKind, LAYOUTS,
};
pub use error::{
    BindError, CompileError, DeviceError, DispatchError, HostViewError, KernelCreateError,
    KilnError, ReadbackError, Result,
};
pub use host::{
    HostBuffer, HostView, StreamDecl, StreamView, StreamViewMut, Strided, StridedMut,
};
pub use kernel::{Kernel, SlotState};
pub use platform::{enumerate_devices, DeviceFilter, Platform, PlatformConfig, POWER_PREFERENCE_ENV};
pub use program::{BuildOptions, EntryPoint, ParamBinding, ParamKind, Program, ShaderInterface};
pub use readback::Values;
pub use slots::{slot_from_one_based, SlotTable};

/// Re-exported so callers can build [`BuildOptions`] defines without
/// depending on `naga_oil` directly.
pub use naga_oil::compose::ShaderDefValue;
