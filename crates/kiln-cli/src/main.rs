//! Kiln CLI - list compute devices, check kernel sources, run the demo kernel.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kiln_runtime::{
    BuildOptions, DeviceFilter, ParamKind, Platform, PlatformConfig, ShaderDefValue,
    ShaderInterface, Values,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const ADD_SOURCE: &str = include_str!("../../../demos/add.wgsl");

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Host-side GPU compute manager", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List compute devices and their capabilities
    Devices {
        /// Only list GPUs
        #[arg(long)]
        gpu: bool,
    },
    /// Compile and validate a WGSL kernel source without a device
    Check {
        /// Path to the WGSL source
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Shader define (format: NAME=VALUE, can be repeated)
        #[arg(short = 'D', long = "define", value_name = "NAME=VALUE")]
        defines: Vec<String>,
    },
    /// Run the bundled vector-add kernel and verify the result
    Add {
        /// Number of elements
        #[arg(short, long, default_value = "1024")]
        count: u32,

        /// Only consider GPUs
        #[arg(long)]
        gpu: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Devices { gpu } => cmd_devices(gpu),
        Commands::Check { file, defines } => cmd_check(file, defines),
        Commands::Add { count, gpu } => cmd_add(count, gpu),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// List devices.
fn cmd_devices(gpu: bool) -> Result<()> {
    let platform = Platform::new(PlatformConfig::from_env());
    let devices = kiln_runtime::enumerate_devices(&platform, gpu);

    if devices.is_empty() {
        println!("No compute devices found");
        return Ok(());
    }

    for (i, device) in devices.iter().enumerate() {
        let desc = device.descriptor();
        let caps = &desc.capabilities;
        println!("[{i}] {}", desc.name);
        println!("  Type: {:?}", desc.device_type);
        println!("  Backend: {:?}", desc.backend);
        println!("  Vendor: {:#06x}", desc.vendor);
        if !desc.driver.is_empty() {
            println!("  Driver: {}", desc.driver);
        }
        match caps.max_compute_units {
            Some(units) => println!("  Compute units: {units}"),
            None => println!("  Compute units: unreported"),
        }
        println!("  Max work-group size: {}", caps.max_work_group_size);
        println!("  Max work-item sizes: {:?}", caps.max_work_item_sizes);
        println!(
            "  Max work groups per dimension: {}",
            caps.max_work_groups_per_dimension
        );
        println!("  Argument slots: {}", caps.max_argument_slots);
        println!("  Max buffer size: {} bytes", caps.max_buffer_size);
    }

    Ok(())
}

/// Parse `NAME=VALUE` into a shader define.
fn parse_define(arg: &str) -> Result<(String, ShaderDefValue)> {
    let (name, value) = arg
        .split_once('=')
        .with_context(|| format!("Invalid define '{arg}'. Expected format: NAME=VALUE"))?;

    let value = match value {
        "true" => ShaderDefValue::Bool(true),
        "false" => ShaderDefValue::Bool(false),
        v if v.starts_with('-') => ShaderDefValue::Int(
            v.parse()
                .with_context(|| format!("Invalid value '{v}' for define '{name}'"))?,
        ),
        v => ShaderDefValue::UInt(
            v.parse()
                .with_context(|| format!("Invalid value '{v}' for define '{name}'"))?,
        ),
    };
    Ok((name.to_string(), value))
}

/// Compile a kernel source and list its compute entry points.
fn cmd_check(file: PathBuf, define_args: Vec<String>) -> Result<()> {
    let source = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read kernel source from {}", file.display()))?;

    let mut options = BuildOptions {
        file_name: Some(file.display().to_string()),
        ..Default::default()
    };
    for arg in &define_args {
        let (name, value) = parse_define(arg)?;
        options = options.define(name, value);
    }

    let interface = ShaderInterface::build(&source, &options)
        .with_context(|| format!("Failed to compile {}", file.display()))?;

    for entry in interface.entry_points().iter().filter(|e| e.is_compute()) {
        println!("{} @workgroup_size{:?}", entry.name, entry.workgroup_size);
        for binding in &entry.bindings {
            let kind = match &binding.kind {
                ParamKind::Storage { read_only: true } => "storage, read".to_string(),
                ParamKind::Storage { read_only: false } => "storage, read_write".to_string(),
                ParamKind::Uniform => "uniform".to_string(),
                ParamKind::Unsupported(resource) => format!("unsupported: {resource}"),
            };
            println!("  slot {} ({kind})", binding.slot);
        }
    }

    Ok(())
}

/// Run `parallel_add` over `count` elements on the first matching device.
fn cmd_add(count: u32, gpu: bool) -> Result<()> {
    let platform = Platform::new(PlatformConfig::from_env());
    let mut device = platform
        .default_device(DeviceFilter::from_prefer_gpu(gpu))
        .context("No compute device available")?;
    println!("Device: {}", device.name());

    let program = device
        .compile(ADD_SOURCE)
        .context("Failed to compile demo kernels")?;
    let mut kernel = program.create_kernel("parallel_add")?;

    let a: Vec<f32> = (0..count).map(|i| i as f32).collect();
    let b: Vec<f32> = (0..count).map(|i| 2.0 * i as f32).collect();
    let sum = vec![0.0f32; count as usize];

    let access = kiln_runtime::AccessMode::ReadOnly;
    kernel.bind_stream(0, kiln_runtime::Strided::dense(&a, 1)?, access)?;
    kernel.bind_stream(1, kiln_runtime::Strided::dense(&b, 1)?, access)?;
    kernel.bind_stream(
        2,
        kiln_runtime::Strided::dense(&sum, 1)?,
        kiln_runtime::AccessMode::WriteOnly,
    )?;
    kernel.bind_int(3, i32::try_from(count)?)?;

    let elapsed = kernel.dispatch(1, &[count], None)?;

    let Values::F32(result) = kernel.read(2, count as usize)? else {
        anyhow::bail!("Unexpected element kind for the sum buffer");
    };
    let mismatches = result
        .iter()
        .enumerate()
        .filter(|&(i, &v)| v != 3.0 * i as f32)
        .count();
    if mismatches > 0 {
        anyhow::bail!("{mismatches} of {count} sums are wrong");
    }

    println!("Added {count} elements in {:.6}s", elapsed.as_secs_f64());
    Ok(())
}
