//! Device discovery.

use std::{
    any::Any,
    marker::PhantomData,
    panic::{self, AssertUnwindSafe},
};

use cubecl::prelude::*;
use serde::Serialize;

use crate::error::ComputeError;

/// Launch limits a topology is checked against before dispatch.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_units_per_cube: u32,
    pub max_shared_memory_bytes: usize,
    /// Groups per grid dimension (x, y, z).
    pub max_cube_count: (u32, u32, u32),
    /// Workers per group dimension (x, y, z).
    pub max_cube_dim: (u32, u32, u32),
}

impl DeviceLimits {
    /// Reads the limits of an opened client.
    pub fn of<R: Runtime>(client: &ComputeClient<R>) -> Self {
        let hardware = &client.properties().hardware;
        Self {
            max_units_per_cube: hardware.max_units_per_cube,
            max_shared_memory_bytes: hardware.max_shared_memory_size,
            max_cube_count: hardware.max_cube_count,
            max_cube_dim: hardware.max_cube_dim,
        }
    }
}

/// What a discovered device reports about itself.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    /// Total global memory, when the runtime exposes it.
    pub global_memory_bytes: Option<u64>,
    #[serde(flatten)]
    pub limits: DeviceLimits,
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "device {}: {}", self.index, self.name)?;
        if let Some(bytes) = self.global_memory_bytes {
            write!(f, ", {bytes} bytes global memory")?;
        }
        let limits = &self.limits;
        write!(
            f,
            ", {} units/cube, {} bytes shared memory, grid up to {}x{}",
            limits.max_units_per_cube,
            limits.max_shared_memory_bytes,
            limits.max_cube_count.0,
            limits.max_cube_count.1
        )
    }
}

/// Enumerates the accelerators the host can use.
pub trait DeviceDiscovery {
    fn devices(&self) -> Vec<DeviceInfo>;
}

/// Reports the default device of runtime `R` as index 0, or nothing when it
/// cannot be opened.
pub struct RuntimeDiscovery<R: Runtime> {
    _runtime: PhantomData<R>,
}

impl<R: Runtime> Default for RuntimeDiscovery<R> {
    fn default() -> Self {
        Self {
            _runtime: PhantomData,
        }
    }
}

impl<R: Runtime> RuntimeDiscovery<R> {
    /// Opens a client on the default device.
    ///
    /// Runtimes panic when no adapter exists, so client creation runs behind
    /// `catch_unwind` with the panic hook silenced and the panic becomes
    /// `DeviceUnavailable`.
    pub fn open() -> Result<ComputeClient<R>, ComputeError> {
        let device = R::Device::default();
        let hook = panic::take_hook();
        panic::set_hook(Box::new(|_| {}));
        let opened = panic::catch_unwind(AssertUnwindSafe(|| R::client(&device)));
        panic::set_hook(hook);

        opened.map_err(|payload| ComputeError::DeviceUnavailable(panic_reason(payload.as_ref())))
    }

    /// Opens the device discovery reported under `index`.
    pub fn open_index(index: usize) -> Result<ComputeClient<R>, ComputeError> {
        if index != 0 {
            return Err(ComputeError::DeviceUnavailable(format!(
                "no device with index {index}"
            )));
        }
        Self::open()
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| payload.downcast_ref::<&str>().map(|s| (*s).to_string()))
        .unwrap_or_else(|| "runtime could not open the default device".to_string())
}

/// Builds the report for an already opened client.
pub fn describe<R: Runtime>(index: usize, client: &ComputeClient<R>) -> DeviceInfo {
    DeviceInfo {
        index,
        name: R::name(client).to_string(),
        global_memory_bytes: None,
        limits: DeviceLimits::of(client),
    }
}

impl<R: Runtime> DeviceDiscovery for RuntimeDiscovery<R> {
    fn devices(&self) -> Vec<DeviceInfo> {
        match Self::open() {
            Ok(client) => vec![describe(0, &client)],
            Err(err) => {
                tracing::warn!("{err}");
                Vec::new()
            }
        }
    }
}

/// Picks device `index`, failing when discovery did not report it.
pub fn select_device(
    discovery: &impl DeviceDiscovery,
    index: usize,
) -> Result<DeviceInfo, ComputeError> {
    let devices = discovery.devices();
    tracing::info!("Found {} device(s)", devices.len());
    for device in &devices {
        tracing::info!("{device}");
    }

    devices
        .into_iter()
        .find(|d| d.index == index)
        .ok_or_else(|| ComputeError::DeviceUnavailable(format!("no device with index {index}")))
}
