//! Vector addition fused with a per-cube shared-memory reduction.
//!
//! Launch layout:
//! - CUBE_POS_X/Y: position of the group in a 2D grid
//! - UNIT_POS_X: worker index inside the group (0..group_size)
//!
//! Each worker adds one element pair. Afterwards every worker publishes its
//! local index into the group cache, the group meets at a barrier and unit 0
//! folds the cache into a single value for the group.

use cubecl::prelude::*;

/// Row-major linear id of the current cube within the 2D grid.
#[cube]
pub fn linear_group_index() -> u32 {
    CUBE_POS_X + CUBE_POS_Y * CUBE_COUNT_X
}

/// `output[index] = lhs[index] + rhs[index]` when `index < len`.
#[cube]
pub fn add_in_bounds<I: Int>(
    lhs: &Array<I>,
    rhs: &Array<I>,
    output: &mut Array<I>,
    index: u32,
    len: u32,
) {
    if index < len {
        let i = index as usize;
        output[i] = lhs[i] + rhs[i];
    }
}

/// Sums the local ids of all units in the cube through shared memory.
///
/// Every unit must call this, since it contains a `sync_cube`. Only unit 0
/// gets the sum; the other units get zero.
#[cube]
pub fn group_local_sum<F: Float>(#[comptime] group_size: usize) -> F {
    let mut cache = SharedMemory::<F>::new(group_size);
    let local = UNIT_POS_X as usize;

    cache[local] = F::cast_from(UNIT_POS_X);

    sync_cube();

    let mut sum = F::new(0.0);
    if UNIT_POS_X == 0 {
        for slot in 0..group_size {
            sum += cache[slot];
        }
    }
    sum
}

/// Adds `lhs + rhs` into `output` and writes one sum per cube into `group_sums`.
///
/// `group_sums` must hold `CUBE_COUNT_X * CUBE_COUNT_Y` elements.
#[cube(launch)]
pub fn vector_add_group_sum<I: Int, F: Float>(
    lhs: &Array<I>,
    rhs: &Array<I>,
    output: &mut Array<I>,
    group_sums: &mut Array<I>,
    len: u32,
    #[comptime] group_size: usize,
) {
    let group = linear_group_index();
    let index = group * CUBE_DIM_X + UNIT_POS_X;

    add_in_bounds::<I>(lhs, rhs, output, index, len);

    let sum = group_local_sum::<F>(group_size);

    if UNIT_POS_X == 0 {
        group_sums[group as usize] = I::cast_from(sum);
    }
}

/// Like [`vector_add_group_sum`], but each cube's sum overwrites
/// `output[group]`, skipped when `group >= len`.
///
/// Indices below the cube count belong to the group sums. Their elementwise
/// write is skipped, otherwise the surviving value would depend on the order
/// in which cubes are scheduled.
#[cube(launch)]
pub fn vector_add_group_sum_in_place<I: Int, F: Float>(
    lhs: &Array<I>,
    rhs: &Array<I>,
    output: &mut Array<I>,
    len: u32,
    #[comptime] group_size: usize,
) {
    let group = linear_group_index();
    let index = group * CUBE_DIM_X + UNIT_POS_X;
    let group_count = CUBE_COUNT_X * CUBE_COUNT_Y;

    if index >= group_count {
        add_in_bounds::<I>(lhs, rhs, output, index, len);
    }

    let sum = group_local_sum::<F>(group_size);

    if UNIT_POS_X == 0 && group < len {
        output[group as usize] = I::cast_from(sum);
    }
}
