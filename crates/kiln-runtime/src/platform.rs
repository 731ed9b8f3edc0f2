//! Process-scoped platform state and device enumeration.
//!
//! A [`Platform`] is created once at startup and passed by reference to
//! anything that needs to enumerate devices. Dropping it tears the platform
//! down; devices already enumerated stay valid.

use crate::device::{Device, DeviceDescriptor};
use crate::error::DeviceError;
use tracing::{debug, info, warn};

/// Environment variable selecting the adapter power preference.
pub const POWER_PREFERENCE_ENV: &str = "KILN_POWER_PREFERENCE";

/// Platform configuration.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Backends the platform may enumerate.
    pub backends: wgpu::Backends,
    /// Preference used when ordering devices and picking a default.
    pub power_preference: wgpu::PowerPreference,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
            power_preference: wgpu::PowerPreference::HighPerformance,
        }
    }
}

impl PlatformConfig {
    /// Defaults overridden by `WGPU_BACKEND` and `KILN_POWER_PREFERENCE`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(backends) = wgpu::Backends::from_env() {
            config.backends = backends;
        }
        if let Ok(value) = std::env::var(POWER_PREFERENCE_ENV) {
            match parse_power_preference(&value) {
                Some(pref) => config.power_preference = pref,
                None => warn!(
                    value = %value,
                    "ignoring unrecognised {POWER_PREFERENCE_ENV}; expected low, high or none"
                ),
            }
        }
        config
    }
}

fn parse_power_preference(value: &str) -> Option<wgpu::PowerPreference> {
    match value.trim().to_ascii_lowercase().as_str() {
        "low" | "low-power" => Some(wgpu::PowerPreference::LowPower),
        "high" | "high-performance" => Some(wgpu::PowerPreference::HighPerformance),
        "none" => Some(wgpu::PowerPreference::None),
        _ => None,
    }
}

/// Which devices enumeration returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFilter {
    All,
    GpuOnly,
}

impl DeviceFilter {
    pub fn from_prefer_gpu(prefer_gpu: bool) -> Self {
        if prefer_gpu {
            DeviceFilter::GpuOnly
        } else {
            DeviceFilter::All
        }
    }

    pub fn accepts(self, descriptor: &DeviceDescriptor) -> bool {
        match self {
            DeviceFilter::All => true,
            DeviceFilter::GpuOnly => descriptor.is_gpu(),
        }
    }
}

/// Ordering rank of a device type under a power preference (lower first).
fn rank(device_type: wgpu::DeviceType, preference: wgpu::PowerPreference) -> u8 {
    use wgpu::DeviceType::*;
    match (preference, device_type) {
        (wgpu::PowerPreference::HighPerformance, DiscreteGpu) => 0,
        (wgpu::PowerPreference::HighPerformance, IntegratedGpu) => 1,
        (wgpu::PowerPreference::LowPower, IntegratedGpu) => 0,
        (wgpu::PowerPreference::LowPower, DiscreteGpu) => 1,
        (_, VirtualGpu) => 2,
        (_, Cpu) => 3,
        (_, Other) => 4,
        _ => 2,
    }
}

/// The compute platform.
pub struct Platform {
    instance: wgpu::Instance,
    config: PlatformConfig,
}

impl Platform {
    pub fn new(config: PlatformConfig) -> Self {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: config.backends,
            ..Default::default()
        });
        info!(backends = ?config.backends, "platform initialised");
        Self { instance, config }
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// Enumerate devices matching `filter`, best match for the configured
    /// power preference first.
    ///
    /// Never fails: an unqueryable platform yields an empty list.
    pub fn enumerate_devices(&self, filter: DeviceFilter) -> Vec<Device> {
        let adapters = self.instance.enumerate_adapters(self.config.backends);
        if adapters.is_empty() {
            warn!(backends = ?self.config.backends, "platform reported no adapters");
        }

        let mut devices: Vec<Device> = adapters
            .into_iter()
            .map(Device::new)
            .filter(|d| filter.accepts(d.descriptor()))
            .collect();
        devices.sort_by_key(|d| rank(d.descriptor().device_type, self.config.power_preference));

        for device in &devices {
            let desc = device.descriptor();
            debug!(
                name = %desc.name,
                kind = ?desc.device_type,
                backend = ?desc.backend,
                "enumerated device"
            );
        }
        devices
    }

    /// The single device the platform prefers for `filter`.
    pub fn default_device(&self, filter: DeviceFilter) -> Result<Device, DeviceError> {
        let adapter = pollster::block_on(self.instance.request_adapter(
            &wgpu::RequestAdapterOptions {
                power_preference: self.config.power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            },
        ));

        match adapter.map(Device::new) {
            Some(device) if filter.accepts(device.descriptor()) => Ok(device),
            Some(_) | None => self
                .enumerate_devices(filter)
                .into_iter()
                .next()
                .ok_or_else(|| DeviceError::NotFound(format!("{filter:?}"))),
        }
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("config", &self.config)
            .finish()
    }
}

/// Enumerate devices on `platform`; GPU-only when `prefer_gpu` is set.
pub fn enumerate_devices(platform: &Platform, prefer_gpu: bool) -> Vec<Device> {
    platform.enumerate_devices(DeviceFilter::from_prefer_gpu(prefer_gpu))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_power_preference() {
        assert_eq!(
            parse_power_preference(" High "),
            Some(wgpu::PowerPreference::HighPerformance)
        );
        assert_eq!(
            parse_power_preference("low-power"),
            Some(wgpu::PowerPreference::LowPower)
        );
        assert_eq!(parse_power_preference("none"), Some(wgpu::PowerPreference::None));
        assert_eq!(parse_power_preference("fastest"), None);
    }

    #[test]
    fn test_rank_follows_preference() {
        use wgpu::DeviceType::*;
        let high = wgpu::PowerPreference::HighPerformance;
        let low = wgpu::PowerPreference::LowPower;
        assert!(rank(DiscreteGpu, high) < rank(IntegratedGpu, high));
        assert!(rank(IntegratedGpu, low) < rank(DiscreteGpu, low));
        assert!(rank(IntegratedGpu, high) < rank(Cpu, high));
    }

    #[test]
    fn test_filter_from_prefer_gpu() {
        assert_eq!(DeviceFilter::from_prefer_gpu(true), DeviceFilter::GpuOnly);
        assert_eq!(DeviceFilter::from_prefer_gpu(false), DeviceFilter::All);
    }
}
