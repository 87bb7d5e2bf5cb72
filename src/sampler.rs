//! Draws concrete load profiles for the expected households of every cell.

use crate::cells::{CellHouseholdModel, CellHouseholds};
use crate::errors::DisaggregationError;
use crate::profiles::{ProfilePool, ProfileRef};
use crate::{CellId, ProfileId, RegionId};
use indexmap::IndexMap;
use rand::seq::index;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use rayon::prelude::*;
use smartstring::alias::String;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// Profiles drawn for one cell, together with the scaling factor of each reconciled scenario year.
#[derive(Clone, Debug, PartialEq)]
pub struct CellProfileAssignment {
    pub cell_id: CellId,
    pub grid_id: String,
    pub nuts3: RegionId,
    pub nuts1: RegionId,
    pub profile_ids: Vec<ProfileRef>,
    pub factors: BTreeMap<u32, f64>,
}

impl CellProfileAssignment {
    pub fn factor(&self, year: u32) -> Result<f64, DisaggregationError> {
        self.factors
            .get(&year)
            .copied()
            .ok_or(DisaggregationError::UnreconciledCell {
                cell_id: self.cell_id,
                year,
            })
    }
}

pub type CellAssignments = IndexMap<CellId, CellProfileAssignment>;

/// Number of profiles to draw for an expected household count.
pub fn sample_size(expected: f64) -> usize {
    expected.max(0.).round_ties_even() as usize
}

/// Each cell draws from its own generator so results do not depend on thread scheduling.
fn cell_rng(seed: u64, cell_id: CellId) -> Pcg64 {
    Pcg64::seed_from_u64(seed ^ (cell_id as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15))
}

fn sample_cell(
    cell: &CellHouseholds,
    pool: &ProfilePool,
    seed: u64,
) -> Result<CellProfileAssignment, DisaggregationError> {
    let mut rng = cell_rng(seed, cell.cell_id);
    let mut profile_ids = vec![];

    for (household_type, expected) in &cell.expected {
        let requested = sample_size(*expected);
        if requested == 0 {
            continue;
        }
        let available = pool.pool_size(*household_type);
        if requested > available {
            return Err(DisaggregationError::InsufficientPool {
                cell_id: cell.cell_id,
                household_type: *household_type,
                requested,
                available,
            });
        }
        profile_ids.extend(
            index::sample(&mut rng, available, requested)
                .into_iter()
                .map(|id| ProfileRef::new(*household_type, id as ProfileId)),
        );
    }

    Ok(CellProfileAssignment {
        cell_id: cell.cell_id,
        grid_id: cell.grid_id.clone(),
        nuts3: cell.nuts3.clone(),
        nuts1: cell.nuts1.clone(),
        profile_ids,
        factors: Default::default(),
    })
}

/// Draws `round(expected)` distinct profile ids per cell and household type.
///
/// Cells that end up without any profile are left out.
#[instrument(skip(model, pool))]
pub fn sample_profiles(
    model: &CellHouseholdModel,
    pool: &ProfilePool,
    seed: u64,
) -> Result<CellAssignments, DisaggregationError> {
    let sampled = model
        .rows()
        .par_values()
        .map(|cell| sample_cell(cell, pool, seed))
        .collect::<Result<Vec<_>, _>>()?;

    let total = sampled.len();
    let assignments: CellAssignments = sampled
        .into_iter()
        .filter(|assignment| !assignment.profile_ids.is_empty())
        .map(|assignment| (assignment.cell_id, assignment))
        .collect();
    if assignments.len() < total {
        debug!(
            dropped = total - assignments.len(),
            "Cells without any sampled profile were left out"
        );
    }

    info!(
        cells = assignments.len(),
        profiles = assignments
            .values()
            .map(|a| a.profile_ids.len())
            .sum::<usize>(),
        "Sampled household profiles"
    );

    Ok(assignments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::household_types::HouseholdType;
    use itertools::Itertools;
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn cell(cell_id: CellId, expected: Vec<(HouseholdType, f64)>) -> CellHouseholds {
        CellHouseholds {
            cell_id,
            grid_id: format!("100mN{cell_id}E1").into(),
            nuts3: "DEF03".into(),
            nuts1: "DEF".into(),
            expected,
        }
    }

    #[fixture]
    fn pool() -> ProfilePool {
        ProfilePool::new(
            2,
            (0..10)
                .map(|id| (ProfileRef::new(HouseholdType::SingleAdult, id), vec![1., 2.]))
                .chain((0..3).map(|id| {
                    (ProfileRef::new(HouseholdType::SingleSenior, id), vec![3., 4.])
                })),
        )
        .unwrap()
    }

    #[fixture]
    fn model() -> CellHouseholdModel {
        [
            cell(1, vec![(HouseholdType::SingleAdult, 2.4)]),
            cell(2, vec![(HouseholdType::SingleAdult, 1.6)]),
            cell(
                3,
                vec![
                    (HouseholdType::SingleAdult, 9.7),
                    (HouseholdType::SingleSenior, 2.5),
                ],
            ),
            cell(4, vec![(HouseholdType::SingleSenior, 0.4)]),
        ]
        .into_iter()
        .collect()
    }

    #[rstest]
    #[case(2.4, 2)]
    #[case(1.6, 2)]
    #[case(2.5, 2)]
    #[case(3.5, 4)]
    #[case(0.4, 0)]
    #[case(0., 0)]
    fn test_sample_size_rounds_to_nearest(#[case] expected: f64, #[case] size: usize) {
        assert_eq!(sample_size(expected), size);
    }

    #[rstest]
    fn test_sampled_ids_are_distinct_and_in_range(model: CellHouseholdModel, pool: ProfilePool) {
        let assignments = sample_profiles(&model, &pool, 42).unwrap();

        for cell in model.iter() {
            let Some(assignment) = assignments.get(&cell.cell_id) else {
                assert!(cell.expected.iter().all(|(_, e)| sample_size(*e) == 0));
                continue;
            };
            for (household_type, expected) in &cell.expected {
                let ids = assignment
                    .profile_ids
                    .iter()
                    .filter(|r| r.household_type == *household_type)
                    .map(|r| r.profile_id)
                    .collect_vec();
                assert_eq!(ids.len(), sample_size(*expected));
                assert!(ids.iter().all_unique());
                assert!(ids
                    .iter()
                    .all(|id| (*id as usize) < pool.pool_size(*household_type)));
            }
        }
    }

    #[rstest]
    fn test_counts_of_worked_example(model: CellHouseholdModel, pool: ProfilePool) {
        let assignments = sample_profiles(&model, &pool, 7).unwrap();
        assert_eq!(assignments[&1].profile_ids.len(), 2);
        assert_eq!(assignments[&2].profile_ids.len(), 2);
        assert_eq!(assignments[&3].profile_ids.len(), 12);
    }

    #[rstest]
    fn test_cells_without_profiles_are_left_out(model: CellHouseholdModel, pool: ProfilePool) {
        let assignments = sample_profiles(&model, &pool, 42).unwrap();
        assert_eq!(assignments.keys().copied().collect_vec(), vec![1, 2, 3]);
    }

    #[rstest]
    fn test_same_seed_gives_same_assignment(model: CellHouseholdModel, pool: ProfilePool) {
        assert_eq!(
            sample_profiles(&model, &pool, 1234).unwrap(),
            sample_profiles(&model, &pool, 1234).unwrap()
        );
    }

    #[rstest]
    fn test_insufficient_pool(pool: ProfilePool) {
        let model: CellHouseholdModel =
            [cell(9, vec![(HouseholdType::SingleSenior, 3.6)])].into_iter().collect();
        assert_eq!(
            sample_profiles(&model, &pool, 42),
            Err(DisaggregationError::InsufficientPool {
                cell_id: 9,
                household_type: HouseholdType::SingleSenior,
                requested: 4,
                available: 3,
            })
        );
    }

    #[rstest]
    fn test_type_missing_from_pool(pool: ProfilePool) {
        let model: CellHouseholdModel =
            [cell(9, vec![(HouseholdType::MultiPersonAdult, 1.)])].into_iter().collect();
        assert!(matches!(
            sample_profiles(&model, &pool, 42),
            Err(DisaggregationError::InsufficientPool { available: 0, .. })
        ));
    }
}
