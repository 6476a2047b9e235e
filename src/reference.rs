//! Sequential host model of what a launch leaves behind.
//!
//! Used by `--verify` and by the tests to build expected outputs.

use num_traits::{FromPrimitive, WrappingAdd};

use crate::config::{ReductionMode, Topology};

/// Value every group reduces to: the sum of its local ids `0..workers_per_group`.
#[must_use]
pub fn group_sum(workers_per_group: u32) -> u64 {
    let n = u64::from(workers_per_group);
    n * n.saturating_sub(1) / 2
}

/// Expected output vector and group sums.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expected<I> {
    pub output: Vec<I>,
    /// One entry per group in separate mode, empty in in-place mode.
    pub group_sums: Vec<I>,
}

/// Computes the state of `output[..len]` and the group sums after one launch.
///
/// `output` is the caller-supplied initial content. Elements past `len` are
/// never touched. Returns `None` when the group sum does not fit in `I`.
pub fn expected<I>(
    lhs: &[I],
    rhs: &[I],
    output: &[I],
    len: usize,
    topology: Topology,
    reduction: ReductionMode,
) -> Option<Expected<I>>
where
    I: WrappingAdd + FromPrimitive + Copy,
{
    let mut out = output[..len].to_vec();
    let covered = len.min(topology.worker_count());
    for i in 0..covered {
        out[i] = lhs[i].wrapping_add(&rhs[i]);
    }

    let sum = I::from_u64(group_sum(topology.workers_per_group))?;
    let groups = topology.group_count();

    match reduction {
        ReductionMode::Separate => Some(Expected {
            output: out,
            group_sums: vec![sum; groups],
        }),
        ReductionMode::InPlace => {
            for slot in out.iter_mut().take(groups) {
                *slot = sum;
            }
            Some(Expected {
                output: out,
                group_sums: Vec::new(),
            })
        }
    }
}

/// Index and values of the first mismatch between `actual` and `expected`.
pub fn first_mismatch<I: PartialEq + Copy>(
    actual: &[I],
    expected: &[I],
) -> Option<(usize, I, I)> {
    actual
        .iter()
        .zip(expected)
        .enumerate()
        .find(|(_, (a, e))| a != e)
        .map(|(i, (&a, &e))| (i, a, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LaunchConfig;

    fn sequence(len: usize) -> (Vec<i32>, Vec<i32>) {
        let lhs: Vec<i32> = (0..len as i32).collect();
        let rhs: Vec<i32> = (0..len as i32).map(|i| 2 * i).collect();
        (lhs, rhs)
    }

    #[test]
    fn group_sum_of_32_workers() {
        assert_eq!(group_sum(32), 496);
        assert_eq!(group_sum(1), 0);
        assert_eq!(group_sum(0), 0);
    }

    #[test]
    fn demo_scenario_in_place() {
        let (lhs, rhs) = sequence(20);
        let config = LaunchConfig::demo();
        let result = expected(
            &lhs,
            &rhs,
            &[0; 20],
            20,
            config.topology_for(20),
            config.reduction,
        )
        .unwrap();

        assert_eq!(&result.output[..9], &[496; 9]);
        for i in 9..20 {
            assert_eq!(result.output[i], 3 * i as i32);
        }
        assert!(result.group_sums.is_empty());
    }

    #[test]
    fn separate_mode_keeps_every_sum() {
        let (lhs, rhs) = sequence(20);
        let topology = Topology::demo();
        let result =
            expected(&lhs, &rhs, &[0; 20], 20, topology, ReductionMode::Separate).unwrap();

        let sums: Vec<i32> = (0..20).map(|i| 3 * i).collect();
        assert_eq!(result.output, sums);
        assert_eq!(result.group_sums, vec![496; 9]);
    }

    #[test]
    fn in_place_with_fewer_elements_than_groups() {
        let (lhs, rhs) = sequence(4);
        let result = expected(
            &lhs,
            &rhs,
            &[7; 4],
            4,
            Topology::demo(),
            ReductionMode::InPlace,
        )
        .unwrap();
        assert_eq!(result.output, vec![496; 4]);
    }

    #[test]
    fn uncovered_elements_keep_initial_value() {
        let (lhs, rhs) = sequence(300);
        let result = expected(
            &lhs,
            &rhs,
            &[-1; 300],
            300,
            Topology::demo(),
            ReductionMode::Separate,
        )
        .unwrap();
        assert_eq!(result.output[287], 3 * 287);
        assert_eq!(&result.output[288..], &[-1; 12]);
    }

    #[test]
    fn addition_wraps() {
        let result = expected(
            &[i32::MAX],
            &[1],
            &[0],
            1,
            Topology::covering(1, 32),
            ReductionMode::Separate,
        )
        .unwrap();
        assert_eq!(result.output, vec![i32::MIN]);
    }

    #[test]
    fn empty_input_has_no_output() {
        let result =
            expected::<i32>(&[], &[], &[], 0, Topology::demo(), ReductionMode::InPlace).unwrap();
        assert!(result.output.is_empty());
    }

    #[test]
    fn first_mismatch_reports_index() {
        assert_eq!(first_mismatch(&[1, 2, 3], &[1, 2, 3]), None);
        assert_eq!(first_mismatch(&[1, 5, 3], &[1, 2, 3]), Some((1, 5, 2)));
    }
}
