//! Device Placement
//!
//! Decides how many model layers go to the accelerator before a load, and
//! which runtime parameters the load uses.

use crate::catalog::ModelDescriptor;
use crate::types::LlmResult;

/// Reports accelerator memory.
pub trait DeviceProbe: Send + Sync {
    /// Total device memory in bytes, or `None` when no device is present.
    fn total_memory_bytes(&self) -> LlmResult<Option<u64>>;
}

/// Probe for hosts without an accelerator.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDevice;

impl DeviceProbe for NoDevice {
    fn total_memory_bytes(&self) -> LlmResult<Option<u64>> {
        Ok(None)
    }
}

/// Probe returning a fixed capacity, for configured or known hardware.
#[derive(Debug, Clone, Copy)]
pub struct FixedDevice {
    pub memory_bytes: u64,
}

impl DeviceProbe for FixedDevice {
    fn total_memory_bytes(&self) -> LlmResult<Option<u64>> {
        Ok(Some(self.memory_bytes))
    }
}

/// Where the model layers live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePlacement {
    /// Every layer on the device
    Full,
    /// This many layers on the device, the rest on CPU
    Layers(u32),
    /// No device offload
    CpuOnly,
}

/// Layer budget policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementPolicy {
    /// Fraction of device memory a model may occupy for full placement
    pub memory_fraction: f64,
    /// Layers offloaded when the model does not fit
    pub partial_layers: u32,
}

impl Default for PlacementPolicy {
    fn default() -> Self {
        Self {
            memory_fraction: 0.9,
            partial_layers: 25,
        }
    }
}

impl PlacementPolicy {
    /// Estimate the layer budget for `descriptor`.
    ///
    /// Probe failures degrade to CPU-only placement.
    pub fn place(&self, descriptor: &ModelDescriptor, probe: &dyn DeviceProbe) -> DevicePlacement {
        let total = match probe.total_memory_bytes() {
            Ok(Some(total)) if total > 0 => total,
            Ok(_) => return DevicePlacement::CpuOnly,
            Err(e) => {
                tracing::warn!(
                    "Device probe failed for '{}', falling back to CPU: {}",
                    descriptor.name,
                    e
                );
                return DevicePlacement::CpuOnly;
            }
        };

        let budget = total as f64 * self.memory_fraction;
        if (descriptor.size_bytes as f64) < budget {
            DevicePlacement::Full
        } else {
            DevicePlacement::Layers(self.partial_layers)
        }
    }
}

/// Runtime parameters for loading one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadParameters {
    pub placement: DevicePlacement,
    pub batch_size: u32,
    pub context_tokens: u32,
    /// Prompt-lookup draft decoding
    pub draft_lookup: bool,
}

impl LoadParameters {
    pub fn for_descriptor(descriptor: &ModelDescriptor, placement: DevicePlacement) -> Self {
        if descriptor.exclusive_family {
            Self {
                placement,
                batch_size: 1024,
                context_tokens: 32_768,
                draft_lookup: false,
            }
        } else if descriptor.fits_in_gpu {
            Self {
                placement,
                batch_size: 1024,
                context_tokens: 8_192,
                draft_lookup: false,
            }
        } else {
            Self {
                placement,
                batch_size: 512,
                context_tokens: 8_192,
                draft_lookup: true,
            }
        }
    }
}
