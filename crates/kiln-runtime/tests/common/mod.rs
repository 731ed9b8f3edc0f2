//! Common test utilities for end-to-end GPU tests.
//!
//! Every GPU test asks [`gpu_device`] for a device first and returns early
//! when the machine has none, so the suite degrades to a no-op in CI.

#![allow(dead_code)]

use kiln_runtime::{Device, DeviceFilter, Platform, PlatformConfig};

/// Identity copy of `vec3<f32>` records from slot 0 to slot 1.
pub const COPY_F32X3: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<vec3<f32>>;
@group(0) @binding(1) var<storage, read_write> dst: array<vec3<f32>>;

@compute @workgroup_size(1)
fn copy(@builtin(global_invocation_id) id: vec3<u32>) {
    dst[id.x] = src[id.x];
}
"#;

/// Scales slot 0 by the float at slot 1 and offsets by the vector at slot 2.
pub const AFFINE: &str = r#"
@group(0) @binding(0) var<storage, read_write> points: array<vec3<f32>>;
@group(0) @binding(1) var<uniform> scale: f32;
@group(0) @binding(2) var<uniform> offset: vec3<f32>;

@compute @workgroup_size(4)
fn affine(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x < arrayLength(&points)) {
        points[id.x] = points[id.x] * scale + offset;
    }
}
"#;

/// Uses slot 1 as scratch space of whatever size was reserved.
pub const SCRATCH: &str = r#"
@group(0) @binding(0) var<storage, read_write> out: array<u32>;
@group(0) @binding(1) var<storage, read_write> tmp: array<u32>;

@compute @workgroup_size(1)
fn scratch(@builtin(global_invocation_id) id: vec3<u32>) {
    tmp[id.x] = id.x * 3u;
    out[id.x] = tmp[id.x];
}
"#;

/// Initialize a debug subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// The platform's preferred device, or `None` when no adapter exists.
pub fn gpu_device() -> Option<Device> {
    init_tracing();
    let platform = Platform::new(PlatformConfig::from_env());
    match platform.default_device(DeviceFilter::All) {
        Ok(device) => {
            println!("Device: {} ({:?})", device.name(), device.descriptor().backend);
            Some(device)
        }
        Err(e) => {
            eprintln!("Skipping test: {e}");
            None
        }
    }
}
