//! Host side of a launch: device buffers, transfers, launch and timing.

use std::{marker::PhantomData, time::Instant};

use cubecl::{prelude::*, server::Handle};
use pollster::block_on;
use serde::Serialize;
use tracing::{debug, trace};

use crate::{
    config::{LaunchConfig, ReductionMode, Topology},
    device::{DeviceLimits, RuntimeDiscovery, describe},
    error::ComputeError,
    kernel::{vector_add_group_sum, vector_add_group_sum_in_place},
};

/// A device allocation holding `len` elements, released on drop.
///
/// Zero-length buffers still allocate one element so no runtime ever sees a
/// zero-sized binding.
pub struct DeviceBuffer<R: Runtime> {
    name: &'static str,
    handle: Handle,
    len: usize,
    capacity: usize,
    _runtime: PhantomData<R>,
}

impl<R: Runtime> DeviceBuffer<R> {
    /// Allocates a buffer and copies `data` into it.
    pub fn upload<I: CubeElement + Default>(
        client: &ComputeClient<R>,
        name: &'static str,
        data: &[I],
    ) -> Result<Self, ComputeError> {
        let len = data.len();
        let capacity = len.max(1);
        let bytes = capacity
            .checked_mul(std::mem::size_of::<I>())
            .ok_or_else(|| ComputeError::Allocation {
                name,
                reason: format!("{capacity} elements overflow the address space"),
            })?;
        if u32::try_from(capacity).is_err() {
            return Err(ComputeError::Allocation {
                name,
                reason: format!("{capacity} elements exceed 32-bit indexing"),
            });
        }

        trace!("allocating {name}: {len} elements, {bytes} bytes");
        let handle = if len == 0 {
            client.create_from_slice(I::as_bytes(&[I::default()]))
        } else {
            client.create_from_slice(I::as_bytes(data))
        };

        Ok(Self {
            name,
            handle,
            len,
            capacity,
            _runtime: PhantomData,
        })
    }

    /// Allocates a buffer of `len` default-valued elements.
    pub fn zeroed<I: CubeElement + Default>(
        client: &ComputeClient<R>,
        name: &'static str,
        len: usize,
    ) -> Result<Self, ComputeError> {
        Self::upload(client, name, &vec![I::default(); len])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Kernel argument viewing the whole allocation as `I` elements.
    pub fn as_arg<I: CubeElement + CubePrimitive>(&self) -> ArrayArg<'_, R> {
        // SAFETY: `handle` was created from exactly `capacity` elements of `I`.
        unsafe { ArrayArg::from_raw_parts::<I>(&self.handle, self.capacity, 1) }
    }

    /// Copies the first `len` elements back into `dst`.
    ///
    /// Blocks until every pending launch that writes this buffer has finished.
    pub fn read_into<I: CubeElement>(
        &self,
        client: &ComputeClient<R>,
        dst: &mut [I],
    ) -> Result<(), ComputeError> {
        if dst.len() < self.len {
            return Err(ComputeError::Transfer {
                name: self.name,
                reason: format!("destination holds {} of {} elements", dst.len(), self.len),
            });
        }

        let bytes = client.read_one(self.handle.clone());
        let values = I::from_bytes(&bytes);
        if values.len() < self.len {
            return Err(ComputeError::Transfer {
                name: self.name,
                reason: format!("read back {} of {} elements", values.len(), self.len),
            });
        }

        dst[..self.len].copy_from_slice(&values[..self.len]);
        trace!("read back {}: {} elements", self.name, self.len);
        Ok(())
    }

    pub fn read<I: CubeElement + Default>(
        &self,
        client: &ComputeClient<R>,
    ) -> Result<Vec<I>, ComputeError> {
        let mut out = vec![I::default(); self.len];
        self.read_into(client, &mut out)?;
        Ok(out)
    }
}

impl<R: Runtime> Drop for DeviceBuffer<R> {
    fn drop(&mut self) {
        trace!("releasing {}", self.name);
    }
}

/// Outcome of one [`Accelerator::compute`] call.
#[derive(Clone, Debug, Serialize)]
pub struct ComputeReport<I> {
    pub len: usize,
    pub topology: Topology,
    pub reduction: ReductionMode,
    /// One sum per group in separate mode, empty in in-place mode.
    pub group_sums: Vec<I>,
    /// Launch to device sync.
    pub kernel_ms: f64,
    /// First allocation to last release.
    pub elapsed_ms: f64,
}

/// An opened device ready to run computations.
pub struct Accelerator<R: Runtime> {
    client: ComputeClient<R>,
    limits: DeviceLimits,
}

impl<R: Runtime> Accelerator<R> {
    /// Opens the runtime's default device.
    pub fn open() -> Result<Self, ComputeError> {
        Self::open_index(0)
    }

    /// Opens the device discovery reported under `index`.
    pub fn open_index(index: usize) -> Result<Self, ComputeError> {
        RuntimeDiscovery::<R>::open_index(index).map(Self::new)
    }

    #[must_use]
    pub fn new(client: ComputeClient<R>) -> Self {
        let info = describe(0, &client);
        debug!("opened {info}");
        Self {
            client,
            limits: info.limits,
        }
    }

    pub fn client(&self) -> &ComputeClient<R> {
        &self.client
    }

    /// Writes `lhs[i] + rhs[i]` into `output[i]` for `i < len` and runs the
    /// per-group reduction as configured.
    ///
    /// Elements of `output` past `len` are left alone. In in-place mode
    /// `output[g]` holds the sum of group `g` for `g < min(groups, len)`.
    pub fn compute<I>(
        &self,
        lhs: &[I],
        rhs: &[I],
        output: &mut [I],
        len: usize,
        config: &LaunchConfig,
    ) -> Result<ComputeReport<I>, ComputeError>
    where
        I: Int + CubeElement + Default,
    {
        check_len("lhs", lhs.len(), len)?;
        check_len("rhs", rhs.len(), len)?;
        check_len("output", output.len(), len)?;
        let bound = index_bound(len)?;

        let topology = config.topology_for(len);
        topology.validate(&self.limits)?;
        debug!(
            "computing {len} elements on {topology} ({} reduction)",
            config.reduction
        );

        let start = Instant::now();

        let lhs_buf = DeviceBuffer::<R>::upload(&self.client, "lhs", &lhs[..len])?;
        let rhs_buf = DeviceBuffer::<R>::upload(&self.client, "rhs", &rhs[..len])?;
        let out_buf = DeviceBuffer::<R>::upload(&self.client, "output", &output[..len])?;
        let sums_buf = match config.reduction {
            ReductionMode::Separate => Some(DeviceBuffer::<R>::zeroed::<I>(
                &self.client,
                "group_sums",
                topology.group_count(),
            )?),
            ReductionMode::InPlace => None,
        };

        let cube_count = CubeCount::Static(topology.groups_x, topology.groups_y, 1);
        let cube_dim = CubeDim::new_1d(topology.workers_per_group);
        let group_size = topology.workers_per_group as usize;

        let launched = Instant::now();
        match &sums_buf {
            Some(sums) => vector_add_group_sum::launch::<I, f32, R>(
                &self.client,
                cube_count,
                cube_dim,
                lhs_buf.as_arg::<I>(),
                rhs_buf.as_arg::<I>(),
                out_buf.as_arg::<I>(),
                sums.as_arg::<I>(),
                ScalarArg::new(bound),
                group_size,
            ),
            None => vector_add_group_sum_in_place::launch::<I, f32, R>(
                &self.client,
                cube_count,
                cube_dim,
                lhs_buf.as_arg::<I>(),
                rhs_buf.as_arg::<I>(),
                out_buf.as_arg::<I>(),
                ScalarArg::new(bound),
                group_size,
            ),
        }
        .map_err(|err| ComputeError::Launch(format!("{err:?}")))?;

        block_on(self.client.sync()).map_err(|err| ComputeError::Sync(format!("{err:?}")))?;
        let kernel_ms = launched.elapsed().as_secs_f64() * 1000.0;
        trace!("kernel finished in {kernel_ms:.3} ms");

        out_buf.read_into(&self.client, &mut output[..len])?;
        let group_sums = match &sums_buf {
            Some(sums) => sums.read::<I>(&self.client)?,
            None => Vec::new(),
        };

        drop(sums_buf);
        drop(out_buf);
        drop(rhs_buf);
        drop(lhs_buf);
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        Ok(ComputeReport {
            len,
            topology,
            reduction: config.reduction,
            group_sums,
            kernel_ms,
            elapsed_ms,
        })
    }
}

fn check_len(name: &'static str, actual: usize, expected: usize) -> Result<(), ComputeError> {
    if actual < expected {
        return Err(ComputeError::InputLength {
            name,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Kernel-side length argument. Workers index with `u32`.
fn index_bound(len: usize) -> Result<u32, ComputeError> {
    u32::try_from(len).map_err(|_| ComputeError::LengthOverflow { len })
}

/// Runs one computation on the default device of [`crate::GpuRuntime`] with the
/// default launch configuration.
pub fn compute<I>(
    lhs: &[I],
    rhs: &[I],
    output: &mut [I],
    len: usize,
) -> Result<ComputeReport<I>, ComputeError>
where
    I: Int + CubeElement + Default,
{
    Accelerator::<crate::GpuRuntime>::open()?.compute(
        lhs,
        rhs,
        output,
        len,
        &LaunchConfig::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GpuRuntime, test_utils::client};

    fn accelerator() -> Accelerator<GpuRuntime> {
        Accelerator::new(client())
    }

    #[test]
    fn short_input_is_rejected_before_allocation() {
        let mut out = [0i32; 20];
        let err = accelerator()
            .compute(&[0i32; 20], &[0i32; 3], &mut out, 20, &LaunchConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            ComputeError::InputLength {
                name: "rhs",
                expected: 20,
                actual: 3
            }
        ));
    }

    #[test]
    fn oversized_group_is_rejected() {
        let config = LaunchConfig {
            workers_per_group: u32::MAX,
            ..LaunchConfig::demo()
        };
        let mut out = [0i32; 4];
        let err = accelerator()
            .compute(&[0i32; 4], &[0i32; 4], &mut out, 4, &config)
            .unwrap_err();
        assert!(matches!(err, ComputeError::InvalidTopology(_)));
    }

    #[test]
    fn index_bound_accepts_u32_range() {
        assert_eq!(index_bound(0).unwrap(), 0);
        assert_eq!(index_bound(u32::MAX as usize).unwrap(), u32::MAX);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn length_past_u32_is_a_precondition_failure() {
        let err = index_bound(u32::MAX as usize + 1).unwrap_err();
        assert!(matches!(err, ComputeError::LengthOverflow { .. }));
        assert_eq!(err.stage(), "validate");
    }

    #[test]
    fn grid_beyond_dispatch_limit_never_launches() {
        let accelerator = accelerator();
        let Some(groups_y) = accelerator.limits.max_cube_count.1.checked_add(1) else {
            return;
        };
        let config = LaunchConfig {
            groups_y,
            ..LaunchConfig::demo()
        };
        let mut out = [0i32; 4];
        let err = accelerator
            .compute(&[0i32; 4], &[0i32; 4], &mut out, 4, &config)
            .unwrap_err();
        assert!(matches!(err, ComputeError::InvalidTopology(_)));
        assert_eq!(out, [0; 4]);
    }

    #[test]
    fn accelerator_exposes_its_client() {
        let accelerator = accelerator();
        let buffer =
            DeviceBuffer::<GpuRuntime>::upload(accelerator.client(), "data", &[1i32, 2]).unwrap();
        assert_eq!(buffer.read::<i32>(accelerator.client()).unwrap(), [1, 2]);
    }

    #[test]
    fn buffer_round_trips_through_device() {
        let client = client();
        let data = [5i32, -3, 12];
        let buffer = DeviceBuffer::<GpuRuntime>::upload(&client, "data", &data).unwrap();
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.read::<i32>(&client).unwrap(), data);
    }

    #[test]
    fn empty_buffer_reads_nothing() {
        let client = client();
        let buffer = DeviceBuffer::<GpuRuntime>::upload::<i32>(&client, "empty", &[]).unwrap();
        assert!(buffer.is_empty());
        assert!(buffer.read::<i32>(&client).unwrap().is_empty());
    }

    #[test]
    fn read_into_short_destination_fails() {
        let client = client();
        let buffer = DeviceBuffer::<GpuRuntime>::zeroed::<i32>(&client, "sums", 9).unwrap();
        let mut dst = [0i32; 4];
        let err = buffer.read_into(&client, &mut dst).unwrap_err();
        assert_eq!(err.stage(), "transfer");
    }

    #[test]
    fn only_first_len_elements_are_written_back() {
        let lhs = [1i32; 8];
        let rhs = [2i32; 8];
        let mut out = [-1i32; 8];
        accelerator()
            .compute(&lhs, &rhs, &mut out, 5, &LaunchConfig::default())
            .unwrap();
        assert_eq!(out, [3, 3, 3, 3, 3, -1, -1, -1]);
    }
}
