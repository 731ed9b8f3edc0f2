//! Device buffer allocation and typed buffers.

use crate::context::ExecutionContext;
use crate::element::{self, AccessMode, ElementKind, HostScalar};
use crate::error::BindError;
use crate::host::{StreamView, Strided};
use std::sync::Arc;
use tracing::debug;
use wgpu::util::DeviceExt;

/// Pad to the 4-byte copy alignment; never zero-sized.
fn padded_len(len: usize) -> usize {
    len.max(1).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT as usize)
}

/// A device buffer accounted in its context's allocation ledger.
///
/// Destroyed synchronously on drop.
pub(crate) struct Allocation {
    buffer: wgpu::Buffer,
    size: u64,
    context: Arc<ExecutionContext>,
}

impl Allocation {
    const USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
        .union(wgpu::BufferUsages::COPY_SRC)
        .union(wgpu::BufferUsages::COPY_DST);

    /// Allocate a buffer initialised with `contents`, zero-padded.
    pub(crate) fn with_contents(
        context: &Arc<ExecutionContext>,
        label: &str,
        contents: &[u8],
        usage: wgpu::BufferUsages,
    ) -> Result<Self, BindError> {
        let mut padded = contents.to_vec();
        padded.resize(padded_len(contents.len()), 0);

        let buffer = context
            .scoped(|| {
                context
                    .device()
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some(label),
                        contents: &padded,
                        usage,
                    })
            })
            .map_err(BindError::Allocation)?;

        Ok(Self::track(context, buffer, padded.len() as u64))
    }

    /// Allocate an uninitialised storage buffer of `size` bytes.
    pub(crate) fn scratch(
        context: &Arc<ExecutionContext>,
        label: &str,
        size: u64,
    ) -> Result<Self, String> {
        let size = padded_len(size as usize) as u64;
        let buffer = context.scoped(|| {
            context.device().create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: Self::USAGE,
                mapped_at_creation: false,
            })
        })?;
        Ok(Self::track(context, buffer, size))
    }

    fn track(context: &Arc<ExecutionContext>, buffer: wgpu::Buffer, size: u64) -> Self {
        context.ledger().acquire(size);
        Self {
            buffer,
            size,
            context: Arc::clone(context),
        }
    }

    pub(crate) fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.buffer.destroy();
        self.context.ledger().release(self.size);
    }
}

/// Device memory created from a host stream, tagged with the element kind
/// that governs how it is packed and unpacked.
///
/// The kind is fixed for the buffer's lifetime. A buffer is owned by exactly
/// one kernel argument slot.
pub struct TypedBuffer {
    allocation: Allocation,
    kind: ElementKind,
    access: AccessMode,
    len: usize,
}

impl TypedBuffer {
    /// Pack `view` into device layout and upload it.
    pub(crate) fn from_stream(
        context: &Arc<ExecutionContext>,
        label: &str,
        view: &StreamView<'_>,
        access: AccessMode,
    ) -> Result<Self, BindError> {
        let kind = ElementKind::select(view.storage(), view.components());
        let bytes = match view {
            StreamView::U8(s) => pack_stream(s, kind),
            StreamView::U32(s) => pack_stream(s, kind),
            StreamView::F32(s) => pack_stream(s, kind),
        };

        let max = context.capabilities().max_buffer_size;
        if bytes.len() as u64 > max {
            return Err(BindError::TooLarge {
                bytes: bytes.len() as u64,
                max,
            });
        }

        let allocation = Allocation::with_contents(context, label, &bytes, Allocation::USAGE)?;
        let len = if kind.is_vector3() {
            view.count()
        } else {
            view.count() * view.components()
        };

        debug!(
            label,
            kind = %kind,
            access = ?access,
            len,
            bytes = allocation.size(),
            "created typed buffer"
        );

        Ok(Self {
            allocation,
            kind,
            access,
            len,
        })
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    /// Readback units held: vectors for vector3 kinds, scalars otherwise.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated device bytes, including padding.
    pub fn size_bytes(&self) -> u64 {
        self.allocation.size()
    }

    pub(crate) fn raw(&self) -> &wgpu::Buffer {
        self.allocation.buffer()
    }
}

impl std::fmt::Debug for TypedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedBuffer")
            .field("kind", &self.kind)
            .field("access", &self.access)
            .field("len", &self.len)
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}

fn pack_stream<T: HostScalar>(view: &Strided<'_, T>, kind: ElementKind) -> Vec<u8> {
    element::pack(view, kind.pack_shape(view.components()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_len() {
        assert_eq!(padded_len(0), 4);
        assert_eq!(padded_len(3), 4);
        assert_eq!(padded_len(4), 4);
        assert_eq!(padded_len(13), 16);
    }
}
