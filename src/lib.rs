#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::doc_markdown,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]

//! cubesum - elementwise vector addition with a per-cube shared-memory reduction.
//!
//! The kernel lives in [`kernel`], the host side that owns device buffers and
//! drives a launch lives in [`host`].

pub mod config;
pub mod device;
pub mod error;
pub mod host;
pub mod kernel;
pub mod reference;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{LaunchConfig, ReductionMode, Topology, TopologyMode};
pub use device::{DeviceDiscovery, DeviceInfo, DeviceLimits, RuntimeDiscovery, select_device};
pub use error::ComputeError;
pub use host::{Accelerator, ComputeReport, DeviceBuffer, compute};

// Central runtime type alias - selected via feature flags (cuda, cpu, wgpu)
#[cfg(feature = "cuda")]
pub type GpuRuntime = cubecl::cuda::CudaRuntime;

#[cfg(all(feature = "cpu", not(feature = "cuda")))]
pub type GpuRuntime = cubecl::cpu::CpuRuntime;

#[cfg(all(feature = "wgpu", not(any(feature = "cuda", feature = "cpu"))))]
pub type GpuRuntime = cubecl::wgpu::WgpuRuntime;

#[cfg(not(any(feature = "cuda", feature = "cpu", feature = "wgpu")))]
compile_error!(
    "At least one runtime must be enabled, please run with `--features cuda/cpu/wgpu`"
);
