//! End-to-end tests for typed buffer packing and readback.

mod common;

use common::{gpu_device, COPY_F32X3};
use kiln_runtime::{
    AccessMode, ElementKind, HostBuffer, SlotState, StorageKind, StreamDecl, Strided, Values,
};

/// Four float triples through an identity-copy kernel.
#[test]
#[ignore] // Requires GPU - ignore in CI or environments without GPU
fn test_copy_float_triples() {
    let Some(mut device) = gpu_device() else {
        return;
    };

    let program = device.compile(COPY_F32X3).expect("Compilation should succeed");
    let mut kernel = program.create_kernel("copy").expect("Entry point should exist");

    let mut points = HostBuffer::new(4, [StreamDecl::new("pos", StorageKind::F32, 3)])
        .expect("Layout should be valid");
    points
        .typed_mut::<f32>("pos")
        .expect("Field should exist")
        .fill_from(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
    assert_eq!(points.stride_of("pos"), Some(3));

    kernel
        .bind_buffer(0, &points, "pos", true, false)
        .expect("Bind should succeed");
    kernel
        .bind_buffer(1, &points, "pos", false, true)
        .expect("Bind should succeed");

    let elapsed = kernel.dispatch(1, &[4], None).expect("Dispatch should succeed");
    println!("copy took {:.6}s", elapsed.as_secs_f64());

    let values = kernel.read(1, 4).expect("Readback should succeed");
    assert_eq!(
        values,
        Values::F32x3(vec![
            [1.0, 2.0, 3.0],
            [4.0, 5.0, 6.0],
            [7.0, 8.0, 9.0],
            [10.0, 11.0, 12.0],
        ])
    );
}

/// Every element kind reads back exactly what was packed.
#[test]
#[ignore] // Requires GPU - ignore in CI or environments without GPU
fn test_round_trip_all_kinds() {
    let Some(mut device) = gpu_device() else {
        return;
    };
    let program = device.compile(COPY_F32X3).expect("Compilation should succeed");
    let mut kernel = program.create_kernel("copy").expect("Entry point should exist");

    let floats = [0.5f32, -1.25, 3.0, 1e-3, 7.5, -0.0];
    let words = [0u32, 1, u32::MAX, 42, 7, 9];
    let bytes = [0u8, 1, 255, 128, 7, 9];

    let cases: Vec<(Strided<'_, f32>, ElementKind)> = vec![
        (Strided::dense(&floats, 1).unwrap(), ElementKind::ScalarF32),
        (Strided::dense(&floats, 3).unwrap(), ElementKind::Vector3F32),
    ];
    for (view, kind) in cases {
        kernel.bind_stream(0, view, AccessMode::ReadWrite).unwrap();
        assert!(matches!(kernel.slot_state(0), SlotState::Buffer { kind: k, .. } if k == kind));
        let count = if kind.is_vector3() { 2 } else { 6 };
        match kernel.read(0, count).unwrap() {
            Values::F32(v) => assert_eq!(v, floats),
            Values::F32x3(v) => assert_eq!(v, [[0.5, -1.25, 3.0], [1e-3, 7.5, -0.0]]),
            other => panic!("unexpected {:?}", other.kind()),
        }
    }

    kernel
        .bind_stream(0, Strided::dense(&words, 1).unwrap(), AccessMode::ReadWrite)
        .unwrap();
    assert_eq!(kernel.read(0, 6).unwrap(), Values::U32(words.to_vec()));
    kernel
        .bind_stream(0, Strided::dense(&words, 3).unwrap(), AccessMode::ReadWrite)
        .unwrap();
    assert_eq!(
        kernel.read(0, 2).unwrap(),
        Values::U32x3(vec![[0, 1, u32::MAX], [42, 7, 9]])
    );

    kernel
        .bind_stream(0, Strided::dense(&bytes, 1).unwrap(), AccessMode::ReadWrite)
        .unwrap();
    assert_eq!(kernel.read(0, 6).unwrap(), Values::U8(bytes.to_vec()));
    kernel
        .bind_stream(0, Strided::dense(&bytes, 3).unwrap(), AccessMode::ReadWrite)
        .unwrap();
    assert_eq!(
        kernel.read(0, 2).unwrap(),
        Values::U8x3(vec![[0, 1, 255], [128, 7, 9]])
    );
}

/// A stream interleaved with other fields packs densely and scatters back
/// without touching its neighbours.
#[test]
#[ignore] // Requires GPU - ignore in CI or environments without GPU
fn test_interleaved_fields_restore_stride() {
    let Some(mut device) = gpu_device() else {
        return;
    };
    let program = device.compile(COPY_F32X3).expect("Compilation should succeed");
    let mut kernel = program.create_kernel("copy").expect("Entry point should exist");

    let decls = [
        StreamDecl::new("pos", StorageKind::F32, 3),
        StreamDecl::new("weight", StorageKind::F32, 1),
        StreamDecl::new("out", StorageKind::F32, 3),
    ];
    let mut particles = HostBuffer::new(3, decls).unwrap();
    particles
        .typed_mut::<f32>("pos")
        .unwrap()
        .fill_from(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
    particles
        .typed_mut::<f32>("weight")
        .unwrap()
        .fill_from(&[0.25, 0.5, 0.75]);

    kernel.bind_buffer(0, &particles, "pos", true, false).unwrap();
    kernel.bind_buffer(1, &particles, "out", false, true).unwrap();
    kernel.dispatch(1, &[3], Some(&[1])).unwrap();
    kernel.read_into(1, 3, &mut particles, "out").unwrap();

    let out = particles.typed::<f32>("out").unwrap().to_dense();
    assert_eq!(out, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
    let weight = particles.typed::<f32>("weight").unwrap().to_dense();
    assert_eq!(weight, [0.25, 0.5, 0.75]);
}

/// Value arguments reach the kernel as uniforms.
#[test]
#[ignore] // Requires GPU - ignore in CI or environments without GPU
fn test_value_arguments() {
    let Some(mut device) = gpu_device() else {
        return;
    };
    let program = device
        .compile(common::AFFINE)
        .expect("Compilation should succeed");
    let mut kernel = program.create_kernel("affine").unwrap();

    let points = [1.0f32, 1.0, 1.0, 2.0, 2.0, 2.0, 3.0, 3.0, 3.0, 4.0, 4.0, 4.0];
    kernel
        .bind_stream(0, Strided::dense(&points, 3).unwrap(), AccessMode::ReadWrite)
        .unwrap();
    kernel.bind_float(1, 2.0).unwrap();
    kernel.bind_vector3(2, [0.0, 1.0, -1.0]).unwrap();
    assert_eq!(kernel.slot_state(1), SlotState::Float(2.0));
    assert_eq!(kernel.slot_state(2), SlotState::Vector3([0.0, 1.0, -1.0]));

    kernel.dispatch(1, &[4], Some(&[4])).unwrap();
    assert_eq!(
        kernel.read(0, 4).unwrap(),
        Values::F32x3(vec![
            [2.0, 3.0, 1.0],
            [4.0, 5.0, 3.0],
            [6.0, 7.0, 5.0],
            [8.0, 9.0, 7.0],
        ])
    );
}
