//! Launch configuration: how workers are grouped and where group sums go.

use serde::{Deserialize, Serialize};

use crate::{device::DeviceLimits, error::ComputeError};

/// Workers per group in the demonstration topology.
pub const DEFAULT_WORKERS_PER_GROUP: u32 = 32;
/// Grid width and height in the demonstration topology (3x3 groups).
pub const DEFAULT_GRID: (u32, u32) = (3, 3);

/// Size in bytes of one group-local cache slot (`f32`).
pub const CACHE_SLOT_BYTES: usize = std::mem::size_of::<f32>();

/// Where each group writes the sum of its local cache.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum ReductionMode {
    /// Group sums go to their own buffer, one slot per group.
    #[default]
    Separate,
    /// Group sums overwrite the output vector at the group's linear index.
    InPlace,
}

/// How the grid shape is chosen.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum TopologyMode {
    /// Enough groups to cover every element, laid out as a near-square grid.
    #[default]
    Derived,
    /// The configured grid, independent of the input length.
    Fixed,
}

impl std::fmt::Display for ReductionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Separate => write!(f, "separate"),
            Self::InPlace => write!(f, "in-place"),
        }
    }
}

impl std::fmt::Display for TopologyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Derived => write!(f, "derived"),
            Self::Fixed => write!(f, "fixed"),
        }
    }
}

/// Shape of one kernel launch: a 2D grid of groups, each a 1D row of workers.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topology {
    pub groups_x: u32,
    pub groups_y: u32,
    pub workers_per_group: u32,
}

impl Topology {
    /// The 3x3 grid of 32-worker groups.
    #[must_use]
    pub fn demo() -> Self {
        Self {
            groups_x: DEFAULT_GRID.0,
            groups_y: DEFAULT_GRID.1,
            workers_per_group: DEFAULT_WORKERS_PER_GROUP,
        }
    }

    /// Smallest near-square grid whose workers cover `len` elements.
    ///
    /// Always has at least one group, so `len == 0` still launches.
    #[must_use]
    pub fn covering(len: usize, workers_per_group: u32) -> Self {
        let workers = workers_per_group.max(1) as usize;
        let groups = len.div_ceil(workers).max(1);
        let groups_x = groups.isqrt();
        let groups_x = if groups_x * groups_x < groups {
            groups_x + 1
        } else {
            groups_x
        };
        let groups_y = groups.div_ceil(groups_x);

        Self {
            groups_x: groups_x as u32,
            groups_y: groups_y as u32,
            workers_per_group,
        }
    }

    pub fn group_count(&self) -> usize {
        self.groups_x as usize * self.groups_y as usize
    }

    pub fn worker_count(&self) -> usize {
        self.group_count() * self.workers_per_group as usize
    }

    /// Bytes of group-local cache each group reserves.
    pub fn cache_bytes(&self) -> usize {
        self.workers_per_group as usize * CACHE_SLOT_BYTES
    }

    /// Checks the shape against the limits of the device it will run on.
    pub fn validate(&self, limits: &DeviceLimits) -> Result<(), ComputeError> {
        if self.groups_x == 0 || self.groups_y == 0 {
            return Err(ComputeError::InvalidTopology(format!(
                "grid {}x{} has no groups",
                self.groups_x, self.groups_y
            )));
        }
        if self.workers_per_group == 0 {
            return Err(ComputeError::InvalidTopology(
                "groups must have at least one worker".into(),
            ));
        }
        let (max_x, max_y, _) = limits.max_cube_count;
        if self.groups_x > max_x || self.groups_y > max_y {
            return Err(ComputeError::InvalidTopology(format!(
                "grid {}x{} exceeds device limit of {max_x}x{max_y}",
                self.groups_x, self.groups_y
            )));
        }
        let max_workers = limits.max_units_per_cube.min(limits.max_cube_dim.0);
        if self.workers_per_group > max_workers {
            return Err(ComputeError::InvalidTopology(format!(
                "{} workers per group exceeds device limit of {max_workers}",
                self.workers_per_group
            )));
        }
        if self.cache_bytes() > limits.max_shared_memory_bytes {
            return Err(ComputeError::InvalidTopology(format!(
                "group cache needs {} bytes, device offers {}",
                self.cache_bytes(),
                limits.max_shared_memory_bytes
            )));
        }
        if u32::try_from(self.worker_count()).is_err() {
            return Err(ComputeError::InvalidTopology(format!(
                "{} workers do not fit a 32-bit index",
                self.worker_count()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} groups of {}",
            self.groups_x, self.groups_y, self.workers_per_group
        )
    }
}

/// User-facing launch options.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct LaunchConfig {
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long, default_value = "derived"))]
    pub topology: TopologyMode,
    #[serde(default)]
    #[cfg_attr(feature = "clap", arg(long, default_value = "separate"))]
    pub reduction: ReductionMode,
    #[serde(default = "default_workers_per_group")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "32"))]
    pub workers_per_group: u32,
    /// Grid width, only used with `--topology fixed`
    #[serde(default = "default_groups_x")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "3"))]
    pub groups_x: u32,
    /// Grid height, only used with `--topology fixed`
    #[serde(default = "default_groups_y")]
    #[cfg_attr(feature = "clap", arg(long, default_value = "3"))]
    pub groups_y: u32,
}

fn default_workers_per_group() -> u32 {
    DEFAULT_WORKERS_PER_GROUP
}
fn default_groups_x() -> u32 {
    DEFAULT_GRID.0
}
fn default_groups_y() -> u32 {
    DEFAULT_GRID.1
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            topology: TopologyMode::default(),
            reduction: ReductionMode::default(),
            workers_per_group: default_workers_per_group(),
            groups_x: default_groups_x(),
            groups_y: default_groups_y(),
        }
    }
}

impl LaunchConfig {
    /// The original demonstration: fixed 3x3 grid of 32 workers, sums written into the output.
    #[must_use]
    pub fn demo() -> Self {
        Self {
            topology: TopologyMode::Fixed,
            reduction: ReductionMode::InPlace,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_reduction(mut self, reduction: ReductionMode) -> Self {
        self.reduction = reduction;
        self
    }

    /// Resolves the grid shape used for an input of `len` elements.
    #[must_use]
    pub fn topology_for(&self, len: usize) -> Topology {
        match self.topology {
            TopologyMode::Derived => Topology::covering(len, self.workers_per_group),
            TopologyMode::Fixed => Topology {
                groups_x: self.groups_x,
                groups_y: self.groups_y,
                workers_per_group: self.workers_per_group,
            },
        }
    }
}
