//! Device-to-host transfer and decode.
//!
//! Decoding mirrors packing exactly: the buffer's element kind picks the
//! record shape, and the same shape strips padding lanes on the way back.

use crate::context::ExecutionContext;
use crate::element::{self, ElementKind, HostScalar};
use crate::error::ReadbackError;
use crate::host::{StreamViewMut, StridedMut};
use std::sync::mpsc;

/// Values read back from a buffer, one variant per element kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    F32(Vec<f32>),
    U8(Vec<u8>),
    U32(Vec<u32>),
    F32x3(Vec<[f32; 3]>),
    U8x3(Vec<[u8; 3]>),
    U32x3(Vec<[u32; 3]>),
}

impl Values {
    pub fn kind(&self) -> ElementKind {
        match self {
            Values::F32(_) => ElementKind::ScalarF32,
            Values::U8(_) => ElementKind::ScalarU8,
            Values::U32(_) => ElementKind::ScalarU32,
            Values::F32x3(_) => ElementKind::Vector3F32,
            Values::U8x3(_) => ElementKind::Vector3U8,
            Values::U32x3(_) => ElementKind::Vector3U32,
        }
    }

    /// Number of scalars or vectors held.
    pub fn len(&self) -> usize {
        match self {
            Values::F32(v) => v.len(),
            Values::U8(v) => v.len(),
            Values::U32(v) => v.len(),
            Values::F32x3(v) => v.len(),
            Values::U8x3(v) => v.len(),
            Values::U32x3(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn empty(kind: ElementKind) -> Self {
        decode(kind, &[], 0)
    }
}

/// Bytes that hold the first `count` readback units of `kind`, rounded up to
/// the copy alignment.
pub(crate) fn transfer_size(kind: ElementKind, count: usize) -> u64 {
    let bytes = (count * kind.unit_bytes()) as u64;
    bytes.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
}

/// Copy the first `size` bytes of `source` to the host and wait for them.
pub(crate) fn download(
    context: &ExecutionContext,
    source: &wgpu::Buffer,
    size: u64,
) -> Result<Vec<u8>, ReadbackError> {
    if size == 0 {
        return Ok(Vec::new());
    }

    let staging = context
        .scoped(|| {
            let staging = context.device().create_buffer(&wgpu::BufferDescriptor {
                label: Some("readback_staging"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let mut encoder =
                context
                    .device()
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                        label: Some("readback_copy"),
                    });
            encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
            context.queue().submit(Some(encoder.finish()));
            staging
        })
        .map_err(ReadbackError::Transfer)?;

    let slice = staging.slice(..);
    let (sender, receiver) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    let _ = context.device().poll(wgpu::Maintain::Wait);

    receiver
        .recv()
        .map_err(|e| ReadbackError::Transfer(format!("map callback dropped: {e}")))?
        .map_err(|e| ReadbackError::Transfer(format!("map failed: {e}")))?;

    let data = slice.get_mapped_range().to_vec();
    staging.unmap();
    staging.destroy();
    Ok(data)
}

/// Decode `count` readback units of `kind` into fresh host values.
pub(crate) fn decode(kind: ElementKind, bytes: &[u8], count: usize) -> Values {
    let shape = kind.read_shape();
    match kind {
        ElementKind::ScalarF32 => Values::F32(element::unpack(bytes, count, shape)),
        ElementKind::ScalarU8 => Values::U8(element::unpack(bytes, count, shape)),
        ElementKind::ScalarU32 => Values::U32(element::unpack(bytes, count, shape)),
        ElementKind::Vector3F32 => Values::F32x3(triples(element::unpack(bytes, count, shape))),
        ElementKind::Vector3U8 => Values::U8x3(triples(element::unpack(bytes, count, shape))),
        ElementKind::Vector3U32 => Values::U32x3(triples(element::unpack(bytes, count, shape))),
    }
}

fn triples<T: HostScalar>(flat: Vec<T>) -> Vec<[T; 3]> {
    flat.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect()
}

/// Check that `count` units of `kind` fit into `dest` before any transfer.
pub(crate) fn check_destination(
    kind: ElementKind,
    dest: &StreamViewMut<'_>,
    count: usize,
    field: &str,
) -> Result<(), ReadbackError> {
    let components = dest.components();
    if dest.storage() != kind.storage() || (kind.is_vector3() && components < 3) {
        return Err(ReadbackError::KindMismatch {
            kind,
            storage: dest.storage(),
            components,
        });
    }

    let available = dest.count();
    if count > available {
        return Err(ReadbackError::CountExceedsDestination {
            field: field.to_string(),
            requested: count,
            available,
        });
    }
    Ok(())
}

/// Scatter `count` decoded units of `kind` into a strided destination.
///
/// Each unit fills one destination element and the destination then advances
/// by its stride. Vectors write the first three lanes and scalars write lane 0.
pub(crate) fn scatter(kind: ElementKind, bytes: &[u8], count: usize, dest: StreamViewMut<'_>) {
    match dest {
        StreamViewMut::U8(mut s) => scatter_into(&mut s, kind, bytes, count),
        StreamViewMut::U32(mut s) => scatter_into(&mut s, kind, bytes, count),
        StreamViewMut::F32(mut s) => scatter_into(&mut s, kind, bytes, count),
    }
}

fn scatter_into<T: HostScalar>(
    dest: &mut StridedMut<'_, T>,
    kind: ElementKind,
    bytes: &[u8],
    count: usize,
) {
    debug_assert_eq!(T::STORAGE, kind.storage());
    let shape = kind.read_shape();
    let values = element::unpack::<T>(bytes, count, shape);
    dest.scatter(shape.lanes, &values);
}

/// Read `count` units from a buffer of `kind` into fresh values.
pub(crate) fn read_values(
    context: &ExecutionContext,
    source: &wgpu::Buffer,
    kind: ElementKind,
    count: usize,
) -> Result<Values, ReadbackError> {
    if count == 0 {
        return Ok(Values::empty(kind));
    }
    let bytes = download(context, source, transfer_size(kind, count))?;
    Ok(decode(kind, &bytes, count))
}
