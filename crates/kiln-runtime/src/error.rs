//! Error types for the runtime crate.
//!
//! Every public operation reports failure through the enum for its own
//! category, so callers can match on exactly what can go wrong at that call.
//! [`KilnError`] unifies them for code that does not care.

use crate::element::{ElementKind, StorageKind};
use thiserror::Error;

/// Device enumeration and execution-context lifecycle errors.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The platform could not produce any adapter for the requested filter.
    #[error("No compute device available: {0}")]
    NotFound(String),

    /// Creating the device/queue pair failed.
    #[error("Failed to open execution context on '{device}': {reason}")]
    ContextOpen { device: String, reason: String },

    /// The device was closed; its context is never recreated.
    #[error("Device '{0}' is closed")]
    Closed(String),

    /// `close_context` was called while programs, kernels or buffers still
    /// reference the context.
    #[error("Execution context on '{device}' is still referenced by {holders} object(s)")]
    ContextInUse { device: String, holders: usize },
}

/// Program build failure. Carries the rendered build diagnostic.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The source did not parse or failed preprocessing.
    #[error("Kernel source failed to parse:\n{diagnostic}")]
    Parse { diagnostic: String },

    /// The source parsed but is not a valid module.
    #[error("Kernel source failed validation:\n{diagnostic}")]
    Validation { diagnostic: String },

    /// The device rejected the module.
    #[error("Device rejected kernel module: {0}")]
    Device(String),
}

impl CompileError {
    /// The diagnostic text attached to this failure.
    pub fn diagnostic(&self) -> &str {
        match self {
            CompileError::Parse { diagnostic } | CompileError::Validation { diagnostic } => {
                diagnostic
            }
            CompileError::Device(msg) => msg,
        }
    }
}

/// Kernel entry-point lookup failures.
#[derive(Debug, Error)]
pub enum KernelCreateError {
    #[error("Entry point '{0}' not found in program")]
    NotFound(String),

    #[error("Entry point '{name}' is a {stage} stage, not a compute kernel")]
    NotCompute { name: String, stage: String },

    #[error("Entry point '{name}' uses binding group {group}; only group 0 maps to argument slots")]
    UnsupportedGroup { name: String, group: u32 },

    #[error("Entry point '{name}' binds slot {slot} to an unsupported resource ({resource})")]
    UnsupportedBinding {
        name: String,
        slot: u32,
        resource: String,
    },

    #[error("Failed to build pipeline for '{name}': {reason}")]
    Pipeline { name: String, reason: String },
}

/// Strided host view construction and lookup errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostViewError {
    #[error("Stride {stride} is smaller than component count {components}")]
    StrideTooSmall { stride: usize, components: usize },

    #[error("Component count must be at least 1")]
    NoComponents,

    #[error("Backing storage holds {available} values but {count} elements at stride {stride} need {required}")]
    OutOfBounds {
        count: usize,
        stride: usize,
        required: usize,
        available: usize,
    },

    #[error("Stream '{0}' declared more than once")]
    DuplicateStream(String),

    #[error("{count} records of {record_bytes} bytes exceed addressable memory")]
    TooLarge { count: usize, record_bytes: usize },
}

/// Argument binding failures. After any `BindError` the target slot is empty.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("Field '{0}' not present in host view")]
    FieldNotFound(String),

    #[error("Host view '{field}' is empty; cannot create a zero-sized device buffer")]
    EmptyView { field: String },

    #[error("Slot {slot} exceeds the device limit of {max} argument bindings")]
    SlotOutOfRange { slot: usize, max: usize },

    #[error("Buffer of {bytes} bytes exceeds the device limit of {max} bytes")]
    TooLarge { bytes: u64, max: u64 },

    #[error("Device allocation failed: {0}")]
    Allocation(String),
}

/// Dispatch validation and execution failures.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Work dimensions must be 1, 2 or 3, got {0}")]
    InvalidDimensions(usize),

    #[error("Global size has {actual} entries but dims = {dims}")]
    GlobalArity { dims: usize, actual: usize },

    #[error("Local size has {actual} entries but dims = {dims}")]
    LocalArity { dims: usize, actual: usize },

    #[error("Global size in dimension {dim} is zero")]
    EmptyRange { dim: usize },

    #[error("Local size {local:?} does not match the kernel's declared work-group size {declared:?}")]
    WorkGroupMismatch { local: Vec<u32>, declared: [u32; 3] },

    #[error("Global size {global} in dimension {dim} is not a multiple of local size {local}")]
    NotDivisible { dim: usize, global: u32, local: u32 },

    #[error("{groups} work groups in dimension {dim} exceed the device limit of {max}")]
    TooManyGroups { dim: usize, groups: u32, max: u32 },

    #[error("Kernel argument slot {0} is read by the kernel but unbound")]
    UnboundArgument(usize),

    #[error("Slot {slot} holds a read-only argument but the kernel writes to it")]
    AccessViolation { slot: usize },

    #[error("Slot {slot} holds {held} but the kernel declares a {declared} binding")]
    IncompatibleArgument {
        slot: usize,
        held: &'static str,
        declared: &'static str,
    },

    #[error("Enqueue failed: {0}")]
    Enqueue(String),
}

/// Readback failures.
#[derive(Debug, Error)]
pub enum ReadbackError {
    #[error("Slot {0} does not hold a buffer")]
    NotABuffer(usize),

    #[error("Requested {requested} elements but the buffer holds {available}")]
    CountExceedsBuffer { requested: usize, available: usize },

    #[error("Requested {requested} values but destination '{field}' holds {available}")]
    CountExceedsDestination {
        field: String,
        requested: usize,
        available: usize,
    },

    #[error("Field '{0}' not present in host view")]
    FieldNotFound(String),

    #[error("Buffer kind {kind} cannot be written to a {storage} stream with {components} component(s)")]
    KindMismatch {
        kind: ElementKind,
        storage: StorageKind,
        components: usize,
    },

    #[error("Transfer failed: {0}")]
    Transfer(String),
}

/// Any runtime error.
#[derive(Debug, Error)]
pub enum KilnError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    KernelCreate(#[from] KernelCreateError),

    #[error(transparent)]
    HostView(#[from] HostViewError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Readback(#[from] ReadbackError),
}

/// Specialized Result type for runtime operations.
pub type Result<T> = std::result::Result<T, KilnError>;
