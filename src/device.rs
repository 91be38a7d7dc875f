//! # Compute Device Selection
//!
//! Resolves the `model.device` setting to a candle [`Device`]. GPU choices
//! fall back to the CPU when the backend is not compiled in or no GPU is
//! present, so a misconfigured device never stops the server from starting.

use crate::error::WyomingError;
use candle_core::Device;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Device chosen for `auto`, detected once per process.
static AUTO_DEVICE: OnceLock<Device> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// First of CUDA, Metal, CPU that works
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

impl FromStr for DevicePreference {
    type Err = WyomingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" | "mps" => Ok(DevicePreference::Metal),
            other => Err(WyomingError::Config(format!(
                "Unknown device '{}' (expected auto, cpu, cuda or metal)",
                other
            ))),
        }
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DevicePreference::Auto => "auto",
            DevicePreference::Cpu => "cpu",
            DevicePreference::Cuda => "cuda",
            DevicePreference::Metal => "metal",
        };
        f.write_str(name)
    }
}

impl DevicePreference {
    /// The device the engine should run on.
    pub fn resolve(self) -> Device {
        match self {
            DevicePreference::Auto => AUTO_DEVICE.get_or_init(detect_best).clone(),
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda => {
                try_open("CUDA", Device::new_cuda).unwrap_or_else(cpu_fallback)
            }
            DevicePreference::Metal => {
                try_open("Metal", Device::new_metal).unwrap_or_else(cpu_fallback)
            }
        }
    }
}

fn detect_best() -> Device {
    let device = try_open("CUDA", Device::new_cuda)
        .or_else(|| try_open("Metal", Device::new_metal))
        .unwrap_or(Device::Cpu);
    tracing::info!(device = device_label(&device), "Selected compute device");
    device
}

fn try_open(backend: &str, open: fn(usize) -> candle_core::Result<Device>) -> Option<Device> {
    match open(0) {
        Ok(device) => Some(device),
        Err(e) => {
            tracing::debug!(backend, error = %e, "Backend not available");
            None
        }
    }
}

fn cpu_fallback() -> Device {
    tracing::warn!("Requested GPU is not available, running on CPU");
    Device::Cpu
}

/// Short human-readable name for logs and engine descriptions.
pub fn device_label(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}
