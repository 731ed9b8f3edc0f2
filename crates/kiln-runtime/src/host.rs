//! Host-side strided views.
//!
//! A stream is `count` logical elements of `components` consecutive values,
//! with `stride` values between the starts of successive elements. Values
//! between one element's components and the next element belong to other
//! fields and are never read or written through the view.
//!
//! Views are validated on construction: the backing slice must cover every
//! element the view describes, so packing and scattering never index out of
//! bounds.

use crate::element::{HostScalar, StorageKind};
use crate::error::HostViewError;
use std::collections::HashSet;

fn validate(
    available: usize,
    count: usize,
    components: usize,
    stride: usize,
) -> Result<(), HostViewError> {
    if components == 0 {
        return Err(HostViewError::NoComponents);
    }
    if stride < components {
        return Err(HostViewError::StrideTooSmall { stride, components });
    }
    if count == 0 {
        return Ok(());
    }
    let required = (count - 1)
        .checked_mul(stride)
        .and_then(|n| n.checked_add(components))
        .unwrap_or(usize::MAX);
    if available < required {
        return Err(HostViewError::OutOfBounds {
            count,
            stride,
            required,
            available,
        });
    }
    Ok(())
}

/// Read-only strided view over host values.
#[derive(Debug, Clone, Copy)]
pub struct Strided<'a, T> {
    values: &'a [T],
    count: usize,
    components: usize,
    stride: usize,
}

impl<'a, T: HostScalar> Strided<'a, T> {
    /// `values` starts at the first component of the first element.
    pub fn new(
        values: &'a [T],
        count: usize,
        components: usize,
        stride: usize,
    ) -> Result<Self, HostViewError> {
        validate(values.len(), count, components, stride)?;
        Ok(Self {
            values,
            count,
            components,
            stride,
        })
    }

    /// A tightly packed view: `stride == components`.
    pub fn dense(values: &'a [T], components: usize) -> Result<Self, HostViewError> {
        if components == 0 {
            return Err(HostViewError::NoComponents);
        }
        Self::new(values, values.len() / components, components, components)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn components(&self) -> usize {
        self.components
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Total values addressed by the view (`count * components`).
    pub fn capacity(&self) -> usize {
        self.count * self.components
    }

    /// The `components` values of element `index`.
    pub fn element(&self, index: usize) -> &'a [T] {
        let start = index * self.stride;
        &self.values[start..start + self.components]
    }

    pub fn elements(&self) -> impl Iterator<Item = &'a [T]> + 'a {
        let Self {
            values,
            count,
            components,
            stride,
        } = *self;
        (0..count).map(move |i| &values[i * stride..i * stride + components])
    }

    /// Gather every element's components into a dense vector.
    pub fn to_dense(&self) -> Vec<T> {
        self.elements().flatten().copied().collect()
    }
}

/// Mutable strided view over host values.
#[derive(Debug)]
pub struct StridedMut<'a, T> {
    values: &'a mut [T],
    count: usize,
    components: usize,
    stride: usize,
}

impl<'a, T: HostScalar> StridedMut<'a, T> {
    pub fn new(
        values: &'a mut [T],
        count: usize,
        components: usize,
        stride: usize,
    ) -> Result<Self, HostViewError> {
        validate(values.len(), count, components, stride)?;
        Ok(Self {
            values,
            count,
            components,
            stride,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn components(&self) -> usize {
        self.components
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn capacity(&self) -> usize {
        self.count * self.components
    }

    pub fn as_view(&self) -> Strided<'_, T> {
        Strided {
            values: &*self.values,
            count: self.count,
            components: self.components,
            stride: self.stride,
        }
    }

    /// Write `values` into the first `lanes` positions of successive
    /// elements, advancing by `stride` after each element.
    ///
    /// `lanes` is clamped to `1..=components`; values beyond
    /// `count * lanes` are ignored.
    pub fn scatter(&mut self, lanes: usize, values: &[T]) {
        let lanes = lanes.clamp(1, self.components);
        for (i, chunk) in values.chunks(lanes).take(self.count).enumerate() {
            let start = i * self.stride;
            self.values[start..start + chunk.len()].copy_from_slice(chunk);
        }
    }

    /// Fill elements sequentially from dense values, `components` at a time.
    pub fn fill_from(&mut self, values: &[T]) {
        self.scatter(self.components, values);
    }
}

/// A strided view tagged with its storage kind.
#[derive(Debug, Clone, Copy)]
pub enum StreamView<'a> {
    U8(Strided<'a, u8>),
    U32(Strided<'a, u32>),
    F32(Strided<'a, f32>),
}

impl StreamView<'_> {
    pub fn storage(&self) -> StorageKind {
        match self {
            StreamView::U8(_) => StorageKind::U8,
            StreamView::U32(_) => StorageKind::U32,
            StreamView::F32(_) => StorageKind::F32,
        }
    }

    pub fn count(&self) -> usize {
        match self {
            StreamView::U8(s) => s.count(),
            StreamView::U32(s) => s.count(),
            StreamView::F32(s) => s.count(),
        }
    }

    pub fn components(&self) -> usize {
        match self {
            StreamView::U8(s) => s.components(),
            StreamView::U32(s) => s.components(),
            StreamView::F32(s) => s.components(),
        }
    }
}

impl<'a> From<Strided<'a, u8>> for StreamView<'a> {
    fn from(view: Strided<'a, u8>) -> Self {
        StreamView::U8(view)
    }
}

impl<'a> From<Strided<'a, u32>> for StreamView<'a> {
    fn from(view: Strided<'a, u32>) -> Self {
        StreamView::U32(view)
    }
}

impl<'a> From<Strided<'a, f32>> for StreamView<'a> {
    fn from(view: Strided<'a, f32>) -> Self {
        StreamView::F32(view)
    }
}

/// A mutable strided view tagged with its storage kind.
#[derive(Debug)]
pub enum StreamViewMut<'a> {
    U8(StridedMut<'a, u8>),
    U32(StridedMut<'a, u32>),
    F32(StridedMut<'a, f32>),
}

impl StreamViewMut<'_> {
    pub fn storage(&self) -> StorageKind {
        match self {
            StreamViewMut::U8(_) => StorageKind::U8,
            StreamViewMut::U32(_) => StorageKind::U32,
            StreamViewMut::F32(_) => StorageKind::F32,
        }
    }

    pub fn count(&self) -> usize {
        match self {
            StreamViewMut::U8(s) => s.count(),
            StreamViewMut::U32(s) => s.count(),
            StreamViewMut::F32(s) => s.count(),
        }
    }

    pub fn components(&self) -> usize {
        match self {
            StreamViewMut::U8(s) => s.components(),
            StreamViewMut::U32(s) => s.components(),
            StreamViewMut::F32(s) => s.components(),
        }
    }
}

impl<'a> From<StridedMut<'a, u8>> for StreamViewMut<'a> {
    fn from(view: StridedMut<'a, u8>) -> Self {
        StreamViewMut::U8(view)
    }
}

impl<'a> From<StridedMut<'a, u32>> for StreamViewMut<'a> {
    fn from(view: StridedMut<'a, u32>) -> Self {
        StreamViewMut::U32(view)
    }
}

impl<'a> From<StridedMut<'a, f32>> for StreamViewMut<'a> {
    fn from(view: StridedMut<'a, f32>) -> Self {
        StreamViewMut::F32(view)
    }
}

/// Host storage addressable by field name.
///
/// Kernels bind and read back through this trait, so any interleaved
/// vertex/particle/pixel store can be marshaled without copying it into a
/// crate type first.
pub trait HostView {
    fn stream(&self, field: &str) -> Option<StreamView<'_>>;
    fn stream_mut(&mut self, field: &str) -> Option<StreamViewMut<'_>>;
}

/// Declaration of one field of a [`HostBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDecl {
    pub name: String,
    pub storage: StorageKind,
    pub components: usize,
}

impl StreamDecl {
    pub fn new(name: impl Into<String>, storage: StorageKind, components: usize) -> Self {
        Self {
            name: name.into(),
            storage,
            components,
        }
    }
}

#[derive(Debug, Clone)]
struct StreamLayout {
    decl: StreamDecl,
    /// Byte offset within a record.
    offset: usize,
}

fn align_up(n: usize, align: usize) -> usize {
    n.div_ceil(align) * align
}

/// Owned interleaved record store.
///
/// Every record holds each declared stream back to back, each stream aligned
/// to its value size, records padded to a multiple of four bytes. The stride
/// of a stream is therefore `record_bytes / size_of::<T>()`.
#[derive(Debug, Clone)]
pub struct HostBuffer {
    count: usize,
    record_bytes: usize,
    streams: Vec<StreamLayout>,
    words: Vec<u32>,
}

impl HostBuffer {
    pub fn new(
        count: usize,
        decls: impl IntoIterator<Item = StreamDecl>,
    ) -> Result<Self, HostViewError> {
        let mut seen = HashSet::new();
        let mut streams = Vec::new();
        let mut cursor = 0;

        for decl in decls {
            if decl.components == 0 {
                return Err(HostViewError::NoComponents);
            }
            if !seen.insert(decl.name.clone()) {
                return Err(HostViewError::DuplicateStream(decl.name));
            }
            let size = decl.storage.size();
            let offset = align_up(cursor, size);
            cursor = offset + decl.components * size;
            streams.push(StreamLayout { decl, offset });
        }

        let record_bytes = align_up(cursor, 4);
        let total = count
            .checked_mul(record_bytes)
            .ok_or(HostViewError::TooLarge {
                count,
                record_bytes,
            })?;
        Ok(Self {
            count,
            record_bytes,
            streams,
            words: vec![0; total / 4],
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn record_bytes(&self) -> usize {
        self.record_bytes
    }

    pub fn stream_names(&self) -> impl Iterator<Item = &str> {
        self.streams.iter().map(|s| s.decl.name.as_str())
    }

    /// Stride of `field` in values of its own storage kind.
    pub fn stride_of(&self, field: &str) -> Option<usize> {
        self.layout(field)
            .map(|l| self.record_bytes / l.decl.storage.size())
    }

    /// Typed read view; `None` if the field is missing or not of type `T`.
    pub fn typed<T: HostScalar>(&self, field: &str) -> Option<Strided<'_, T>> {
        let layout = self.layout(field)?;
        (layout.decl.storage == T::STORAGE).then(|| self.strided(layout))
    }

    /// Typed write view; `None` if the field is missing or not of type `T`.
    pub fn typed_mut<T: HostScalar>(&mut self, field: &str) -> Option<StridedMut<'_, T>> {
        let layout = self.layout(field)?.clone();
        (layout.decl.storage == T::STORAGE).then(|| self.strided_mut(&layout))
    }

    fn layout(&self, field: &str) -> Option<&StreamLayout> {
        self.streams.iter().find(|s| s.decl.name == field)
    }

    fn start_of<T: HostScalar>(&self, layout: &StreamLayout, len: usize) -> usize {
        if self.count == 0 {
            len
        } else {
            layout.offset / std::mem::size_of::<T>()
        }
    }

    fn strided<T: HostScalar>(&self, layout: &StreamLayout) -> Strided<'_, T> {
        let all: &[T] = bytemuck::cast_slice(&self.words);
        let start = self.start_of::<T>(layout, all.len());
        Strided {
            values: &all[start..],
            count: self.count,
            components: layout.decl.components,
            stride: self.record_bytes / std::mem::size_of::<T>(),
        }
    }

    fn strided_mut<T: HostScalar>(&mut self, layout: &StreamLayout) -> StridedMut<'_, T> {
        let stride = self.record_bytes / std::mem::size_of::<T>();
        let count = self.count;
        let len = self.words.len() * 4 / std::mem::size_of::<T>();
        let start = self.start_of::<T>(layout, len);
        let all: &mut [T] = bytemuck::cast_slice_mut(&mut self.words);
        StridedMut {
            values: &mut all[start..],
            count,
            components: layout.decl.components,
            stride,
        }
    }
}

impl HostView for HostBuffer {
    fn stream(&self, field: &str) -> Option<StreamView<'_>> {
        let layout = self.layout(field)?;
        Some(match layout.decl.storage {
            StorageKind::U8 => StreamView::U8(self.strided(layout)),
            StorageKind::U32 => StreamView::U32(self.strided(layout)),
            StorageKind::F32 => StreamView::F32(self.strided(layout)),
        })
    }

    fn stream_mut(&mut self, field: &str) -> Option<StreamViewMut<'_>> {
        let layout = self.layout(field)?.clone();
        Some(match layout.decl.storage {
            StorageKind::U8 => StreamViewMut::U8(self.strided_mut(&layout)),
            StorageKind::U32 => StreamViewMut::U32(self.strided_mut(&layout)),
            StorageKind::F32 => StreamViewMut::F32(self.strided_mut(&layout)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strided_rejects_short_backing() {
        let data = [0.0f32; 8];
        // Third element would start at 6 and need 3 values.
        let err = Strided::new(&data, 3, 3, 3).unwrap_err();
        assert_eq!(
            err,
            HostViewError::OutOfBounds {
                count: 3,
                stride: 3,
                required: 9,
                available: 8
            }
        );
    }

    #[test]
    fn test_strided_last_element_need_not_span_stride() {
        let data = [0u32; 7];
        let view = Strided::new(&data, 3, 1, 3).unwrap();
        assert_eq!(view.capacity(), 3);
    }

    #[test]
    fn test_strided_rejects_small_stride() {
        let data = [0u8; 16];
        assert_eq!(
            Strided::new(&data, 2, 4, 3).unwrap_err(),
            HostViewError::StrideTooSmall {
                stride: 3,
                components: 4
            }
        );
        assert_eq!(
            Strided::new(&data, 2, 0, 3).unwrap_err(),
            HostViewError::NoComponents
        );
    }

    #[test]
    fn test_empty_view_is_valid() {
        let data: [f32; 0] = [];
        let view = Strided::new(&data, 0, 3, 4).unwrap();
        assert_eq!(view.elements().count(), 0);
    }

    #[test]
    fn test_scatter_leaves_foreign_values() {
        let mut data = [9u32; 8];
        let mut view = StridedMut::new(&mut data, 2, 3, 4).unwrap();
        view.scatter(3, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(data, [1, 2, 3, 9, 4, 5, 6, 9]);
    }

    #[test]
    fn test_scatter_partial_lanes() {
        let mut data = [0.0f32; 6];
        let mut view = StridedMut::new(&mut data, 3, 2, 2).unwrap();
        view.scatter(2, &[1.0, 2.0, 3.0]);
        assert_eq!(data, [1.0, 2.0, 3.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_host_buffer_interleaves_streams() {
        let mut buf = HostBuffer::new(
            2,
            [
                StreamDecl::new("position", StorageKind::F32, 3),
                StreamDecl::new("color", StorageKind::U8, 3),
                StreamDecl::new("id", StorageKind::U32, 1),
            ],
        )
        .unwrap();

        // 12 bytes of position, 3 of color, 1 pad, 4 of id.
        assert_eq!(buf.record_bytes(), 20);
        assert_eq!(buf.stride_of("position"), Some(5));
        assert_eq!(buf.stride_of("color"), Some(20));

        buf.typed_mut::<f32>("position")
            .unwrap()
            .fill_from(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        buf.typed_mut::<u8>("color")
            .unwrap()
            .fill_from(&[10, 20, 30, 40, 50, 60]);
        buf.typed_mut::<u32>("id").unwrap().fill_from(&[7, 8]);

        assert_eq!(
            buf.typed::<f32>("position").unwrap().to_dense(),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        );
        assert_eq!(
            buf.typed::<u8>("color").unwrap().to_dense(),
            vec![10, 20, 30, 40, 50, 60]
        );
        assert_eq!(buf.typed::<u32>("id").unwrap().to_dense(), vec![7, 8]);
    }

    #[test]
    fn test_host_buffer_typed_rejects_wrong_type() {
        let buf = HostBuffer::new(1, [StreamDecl::new("v", StorageKind::F32, 1)]).unwrap();
        assert!(buf.typed::<u32>("v").is_none());
        assert!(buf.typed::<f32>("missing").is_none());
        assert!(buf.stream("missing").is_none());
    }

    #[test]
    fn test_host_buffer_rejects_duplicates() {
        let err = HostBuffer::new(
            1,
            [
                StreamDecl::new("v", StorageKind::F32, 1),
                StreamDecl::new("v", StorageKind::U8, 1),
            ],
        )
        .unwrap_err();
        assert_eq!(err, HostViewError::DuplicateStream("v".into()));
    }

    #[test]
    fn test_host_buffer_rejects_oversized_count() {
        let err = HostBuffer::new(usize::MAX, [StreamDecl::new("v", StorageKind::F32, 3)])
            .unwrap_err();
        assert_eq!(
            err,
            HostViewError::TooLarge {
                count: usize::MAX,
                record_bytes: 12
            }
        );
    }

    #[test]
    fn test_host_buffer_zero_count() {
        let mut buf = HostBuffer::new(0, [StreamDecl::new("v", StorageKind::U8, 3)]).unwrap();
        assert_eq!(buf.stream("v").map(|s| s.count()), Some(0));
        assert_eq!(buf.stream_mut("v").map(|s| s.components()), Some(3));
    }
}
