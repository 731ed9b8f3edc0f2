//! Element kinds and the host <-> device record marshaling they drive.
//!
//! A [`TypedBuffer`](crate::TypedBuffer) is tagged with one [`ElementKind`]
//! when it is created. The kind is resolved once from the host stream's
//! storage kind and component count, and from then on a single lookup into
//! [`LAYOUTS`] decides how records are packed on the way in and unpacked on
//! the way out. Both directions go through the same two generic routines,
//! [`pack`] and [`unpack`], parameterised by a [`RecordShape`].

use crate::host::Strided;
use bytemuck::Pod;
use std::fmt;

/// Value type of a host stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    U8,
    U32,
    F32,
}

impl StorageKind {
    /// Size of one value in bytes.
    pub const fn size(self) -> usize {
        match self {
            StorageKind::U8 => 1,
            StorageKind::U32 | StorageKind::F32 => 4,
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageKind::U8 => "uint8",
            StorageKind::U32 => "uint32",
            StorageKind::F32 => "float32",
        })
    }
}

/// Host value types that can back a stream.
pub trait HostScalar: Pod + Default + PartialEq + fmt::Debug {
    const STORAGE: StorageKind;
}

impl HostScalar for u8 {
    const STORAGE: StorageKind = StorageKind::U8;
}

impl HostScalar for u32 {
    const STORAGE: StorageKind = StorageKind::U32;
}

impl HostScalar for f32 {
    const STORAGE: StorageKind = StorageKind::F32;
}

/// How a typed buffer's bytes are interpreted on the device.
///
/// The discriminants index [`LAYOUTS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    ScalarF32 = 0,
    ScalarU8 = 1,
    ScalarU32 = 2,
    Vector3F32 = 3,
    Vector3U8 = 4,
    Vector3U32 = 5,
}

impl ElementKind {
    /// Resolve the element kind for a host stream.
    ///
    /// Exactly three components always selects the vector3 variant of the
    /// storage kind. Anything else selects the scalar variant, with the
    /// component count acting as a flat multiplier.
    pub const fn select(storage: StorageKind, components: usize) -> Self {
        match (components == 3, storage) {
            (true, StorageKind::U8) => ElementKind::Vector3U8,
            (true, StorageKind::U32) => ElementKind::Vector3U32,
            (true, StorageKind::F32) => ElementKind::Vector3F32,
            (false, StorageKind::U8) => ElementKind::ScalarU8,
            (false, StorageKind::U32) => ElementKind::ScalarU32,
            (false, StorageKind::F32) => ElementKind::ScalarF32,
        }
    }

    /// The record layout for this kind.
    pub fn layout(self) -> &'static RecordLayout {
        &LAYOUTS[self as usize]
    }

    pub fn storage(self) -> StorageKind {
        self.layout().storage
    }

    pub fn is_vector3(self) -> bool {
        matches!(self.layout().shape, LayoutShape::Vector { .. })
    }

    /// Shape used when packing a host stream with `components` values per
    /// element into this kind.
    pub fn pack_shape(self, components: usize) -> RecordShape {
        match self.layout().shape {
            LayoutShape::Vector { lanes, padded } => RecordShape { lanes, padded },
            LayoutShape::Flat => RecordShape {
                lanes: components,
                padded: components,
            },
        }
    }

    /// Shape of one readback unit: a whole vector, or a single scalar.
    pub fn read_shape(self) -> RecordShape {
        match self.layout().shape {
            LayoutShape::Vector { lanes, padded } => RecordShape { lanes, padded },
            LayoutShape::Flat => RecordShape { lanes: 1, padded: 1 },
        }
    }

    /// Bytes occupied on the device by one readback unit.
    pub fn unit_bytes(self) -> usize {
        self.read_shape().padded * self.storage().size()
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ElementKind::ScalarF32 => "float",
            ElementKind::ScalarU8 => "uchar",
            ElementKind::ScalarU32 => "uint",
            ElementKind::Vector3F32 => "float3",
            ElementKind::Vector3U8 => "uchar3",
            ElementKind::Vector3U32 => "uint3",
        })
    }
}

/// Device record shape of an element kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutShape {
    /// Dense scalars; the host component count multiplies the length.
    Flat,
    /// Fixed-width vector record with trailing padding lanes.
    Vector { lanes: usize, padded: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    pub kind: ElementKind,
    pub storage: StorageKind,
    pub shape: LayoutShape,
}

// 3-component vectors occupy four lanes on the device, matching both the
// WGSL array stride of vec3<f32>/vec3<u32> and the 4-byte uchar3 record.
const VEC3: LayoutShape = LayoutShape::Vector { lanes: 3, padded: 4 };

/// Lookup table indexed by `ElementKind as usize`.
pub static LAYOUTS: [RecordLayout; 6] = [
    RecordLayout {
        kind: ElementKind::ScalarF32,
        storage: StorageKind::F32,
        shape: LayoutShape::Flat,
    },
    RecordLayout {
        kind: ElementKind::ScalarU8,
        storage: StorageKind::U8,
        shape: LayoutShape::Flat,
    },
    RecordLayout {
        kind: ElementKind::ScalarU32,
        storage: StorageKind::U32,
        shape: LayoutShape::Flat,
    },
    RecordLayout {
        kind: ElementKind::Vector3F32,
        storage: StorageKind::F32,
        shape: VEC3,
    },
    RecordLayout {
        kind: ElementKind::Vector3U8,
        storage: StorageKind::U8,
        shape: VEC3,
    },
    RecordLayout {
        kind: ElementKind::Vector3U32,
        storage: StorageKind::U32,
        shape: VEC3,
    },
];

/// Lanes copied per record, and lanes the record occupies on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordShape {
    pub lanes: usize,
    pub padded: usize,
}

/// Caller-requested device access for a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    /// Both flags set, or neither, means read-write.
    pub const fn from_flags(read: bool, write: bool) -> Self {
        match (read, write) {
            (true, false) => AccessMode::ReadOnly,
            (false, true) => AccessMode::WriteOnly,
            _ => AccessMode::ReadWrite,
        }
    }

    pub const fn device_writable(self) -> bool {
        !matches!(self, AccessMode::ReadOnly)
    }
}

/// Pack a strided host stream into dense device records.
///
/// Copies the first `shape.lanes` values of every element, zero-fills up to
/// `shape.padded`, and advances the source by `stride` after each element.
pub fn pack<T: HostScalar>(src: &Strided<'_, T>, shape: RecordShape) -> Vec<u8> {
    debug_assert!(shape.lanes <= src.components());
    debug_assert!(shape.lanes <= shape.padded);

    let mut out = Vec::with_capacity(src.count() * shape.padded);
    for element in src.elements() {
        out.extend_from_slice(&element[..shape.lanes]);
        out.resize(out.len() + shape.padded - shape.lanes, T::default());
    }
    bytemuck::cast_slice(&out).to_vec()
}

/// Unpack `records` device records into dense host lanes, dropping padding.
///
/// `bytes` need not be aligned for `T`.
pub fn unpack<T: HostScalar>(bytes: &[u8], records: usize, shape: RecordShape) -> Vec<T> {
    let width = std::mem::size_of::<T>();
    let record_bytes = shape.padded * width;
    debug_assert!(bytes.len() >= records * record_bytes);

    let mut out = Vec::with_capacity(records * shape.lanes);
    for record in bytes.chunks_exact(record_bytes).take(records) {
        out.extend(
            record
                .chunks_exact(width)
                .take(shape.lanes)
                .map(bytemuck::pod_read_unaligned::<T>),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values<T: HostScalar>(bytes: &[u8]) -> Vec<T> {
        bytes
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned::<T>)
            .collect()
    }

    #[test]
    fn test_layout_table_is_indexed_by_kind() {
        for (i, layout) in LAYOUTS.iter().enumerate() {
            assert_eq!(layout.kind as usize, i);
        }
    }

    #[test]
    fn test_three_components_always_select_vector() {
        for storage in [StorageKind::U8, StorageKind::U32, StorageKind::F32] {
            let kind = ElementKind::select(storage, 3);
            assert!(kind.is_vector3(), "{storage} x3 selected {kind}");
            assert_eq!(kind.storage(), storage);
        }
    }

    #[test]
    fn test_other_component_counts_select_scalar() {
        for components in [1, 2, 4, 16] {
            let kind = ElementKind::select(StorageKind::F32, components);
            assert_eq!(kind, ElementKind::ScalarF32);
            assert_eq!(
                kind.pack_shape(components),
                RecordShape {
                    lanes: components,
                    padded: components
                }
            );
        }
        assert_eq!(ElementKind::select(StorageKind::U8, 1), ElementKind::ScalarU8);
        assert_eq!(ElementKind::select(StorageKind::U32, 2), ElementKind::ScalarU32);
    }

    #[test]
    fn test_unit_bytes() {
        assert_eq!(ElementKind::Vector3F32.unit_bytes(), 16);
        assert_eq!(ElementKind::Vector3U32.unit_bytes(), 16);
        assert_eq!(ElementKind::Vector3U8.unit_bytes(), 4);
        assert_eq!(ElementKind::ScalarU8.unit_bytes(), 1);
        assert_eq!(ElementKind::ScalarF32.unit_bytes(), 4);
    }

    #[test]
    fn test_access_mode_flags() {
        assert_eq!(AccessMode::from_flags(true, false), AccessMode::ReadOnly);
        assert_eq!(AccessMode::from_flags(false, true), AccessMode::WriteOnly);
        assert_eq!(AccessMode::from_flags(true, true), AccessMode::ReadWrite);
        assert_eq!(AccessMode::from_flags(false, false), AccessMode::ReadWrite);
    }

    #[test]
    fn test_pack_scalar_skips_foreign_fields() {
        // Two f32 lanes per element, interleaved with one foreign value.
        let data = [1.0f32, 2.0, -1.0, 3.0, 4.0, -1.0, 5.0, 6.0];
        let view = Strided::new(&data, 3, 2, 3).unwrap();
        let kind = ElementKind::select(StorageKind::F32, 2);

        let bytes = pack(&view, kind.pack_shape(2));
        let floats: Vec<f32> = values(&bytes);
        assert_eq!(floats, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_pack_vector3_pads_each_record() {
        let data = [1u32, 2, 3, 99, 4, 5, 6, 99];
        let view = Strided::new(&data, 2, 3, 4).unwrap();
        let kind = ElementKind::select(StorageKind::U32, 3);

        let bytes = pack(&view, kind.pack_shape(3));
        assert_eq!(bytes.len(), 2 * 16);
        let words: Vec<u32> = values(&bytes);
        assert_eq!(words, vec![1, 2, 3, 0, 4, 5, 6, 0]);
    }

    #[test]
    fn test_pack_uchar3_is_four_bytes_per_record() {
        let data = [10u8, 20, 30, 40, 50, 60];
        let view = Strided::new(&data, 2, 3, 3).unwrap();
        let bytes = pack(&view, ElementKind::Vector3U8.pack_shape(3));
        assert_eq!(bytes, vec![10, 20, 30, 0, 40, 50, 60, 0]);
    }

    #[test]
    fn test_unpack_drops_padding() {
        let words = [1.5f32, 2.5, 3.5, 0.0, 4.5, 5.5, 6.5, 0.0];
        let bytes: &[u8] = bytemuck::cast_slice(&words);
        let lanes: Vec<f32> = unpack(bytes, 2, ElementKind::Vector3F32.read_shape());
        assert_eq!(lanes, vec![1.5, 2.5, 3.5, 4.5, 5.5, 6.5]);
    }

    #[test]
    fn test_unpack_partial_count() {
        let bytes = [7u8, 8, 9, 10];
        let values: Vec<u8> = unpack(&bytes, 2, ElementKind::ScalarU8.read_shape());
        assert_eq!(values, vec![7, 8]);
    }

    #[test]
    fn test_unpack_unaligned_input() {
        let mut raw = vec![0u8];
        raw.extend_from_slice(bytemuck::cast_slice(&[0xDEAD_BEEFu32, 7]));
        let values: Vec<u32> = unpack(&raw[1..], 2, ElementKind::ScalarU32.read_shape());
        assert_eq!(values, vec![0xDEAD_BEEF, 7]);
    }
}
