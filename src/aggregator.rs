//! Sums the scaled profiles of cells into load series per substation, or per any other group of
//! cells.

use crate::config::Scenario;
use crate::errors::DisaggregationError;
use crate::profiles::ProfilePool;
use crate::sampler::{CellAssignments, CellProfileAssignment};
use crate::{CellId, RegionId, SubstationId};
use indexmap::IndexMap;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smartstring::alias::String;
use tracing::{debug, info, instrument};

/// Load of all households behind one substation for one scenario.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SubstationLoadSeries {
    pub version: String,
    pub scn_name: String,
    pub year: u32,
    pub subst_id: SubstationId,
    /// Energy per timestep, in the configured output unit.
    pub p_set: Vec<f64>,
}

impl SubstationLoadSeries {
    pub fn annual_total(&self) -> f64 {
        self.p_set.iter().sum()
    }
}

/// Sums the profiles of `cells` per region and factor, scales each sum by its factor and adds
/// the results up.
fn scaled_sum<'a>(
    pool: &ProfilePool,
    cells: impl IntoIterator<Item = &'a CellProfileAssignment>,
    year: u32,
    multiplier: f64,
) -> Result<Vec<f64>, DisaggregationError> {
    let mut groups: IndexMap<(&RegionId, OrderedFloat<f64>), Vec<&CellProfileAssignment>> =
        IndexMap::new();
    for cell in cells {
        let factor = cell.factor(year)?;
        groups
            .entry((&cell.nuts3, OrderedFloat(factor)))
            .or_default()
            .push(cell);
    }

    let mut accumulator = vec![0.; pool.timesteps()];
    let mut group_sum = vec![0.; pool.timesteps()];
    for ((_, factor), cells) in groups {
        group_sum.fill(0.);
        for cell in cells {
            pool.add_scaled_into(&mut group_sum, cell.cell_id, &cell.profile_ids, 1.)?;
        }
        for (acc, value) in accumulator.iter_mut().zip(&group_sum) {
            *acc += value * factor.0 * multiplier;
        }
    }

    Ok(accumulator)
}

/// Builds the load series of every substation for one scenario year.
///
/// Cells outside of any grid district do not contribute. Every contributing cell must have been
/// reconciled for the scenario year.
#[instrument(skip_all, fields(scenario = %scenario.name))]
pub fn aggregate_substations(
    assignments: &CellAssignments,
    grid_districts: &IndexMap<CellId, SubstationId>,
    pool: &ProfilePool,
    scenario: &Scenario,
    version: &str,
    profile_to_output_units: f64,
) -> Result<Vec<SubstationLoadSeries>, DisaggregationError> {
    let mut substations: IndexMap<SubstationId, Vec<&CellProfileAssignment>> = IndexMap::new();
    let mut outside = 0usize;
    for assignment in assignments.values() {
        match grid_districts.get(&assignment.cell_id) {
            Some(subst_id) => substations.entry(*subst_id).or_default().push(assignment),
            None => outside += 1,
        }
    }
    substations.sort_keys();
    if outside > 0 {
        debug!(outside, "Cells outside of any grid district were not aggregated");
    }

    let series = substations
        .into_par_iter()
        .map(|(subst_id, cells)| -> Result<_, DisaggregationError> {
            Ok(SubstationLoadSeries {
                version: version.into(),
                scn_name: scenario.name.clone(),
                year: scenario.year,
                subst_id,
                p_set: scaled_sum(pool, cells, scenario.year, profile_to_output_units)?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    info!(
        year = scenario.year,
        substations = series.len(),
        "Aggregated household load per substation"
    );

    Ok(series)
}

/// Scaled load series of an arbitrary group of cells, converted from profile units with
/// `profile_to_output_units`. Cells without sampled households contribute nothing.
pub fn load_timeseries(
    pool: &ProfilePool,
    assignments: &CellAssignments,
    cell_ids: &[CellId],
    year: u32,
    profile_to_output_units: f64,
) -> Result<Vec<f64>, DisaggregationError> {
    let cells = cell_ids
        .iter()
        .filter_map(|cell_id| assignments.get(cell_id))
        .collect::<Vec<_>>();
    if cells.len() < cell_ids.len() {
        debug!(
            skipped = cell_ids.len() - cells.len(),
            "Cells without sampled profiles do not contribute to the load series"
        );
    }

    scaled_sum(pool, cells, year, profile_to_output_units)
}

/// Highest value of the scaled load series of a group of cells, in the unit given by
/// `profile_to_output_units`.
pub fn peak_load(
    pool: &ProfilePool,
    assignments: &CellAssignments,
    cell_ids: &[CellId],
    year: u32,
    profile_to_output_units: f64,
) -> Result<f64, DisaggregationError> {
    Ok(
        load_timeseries(pool, assignments, cell_ids, year, profile_to_output_units)?
            .into_iter()
            .reduce(f64::max)
            .unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::household_types::HouseholdType;
    use crate::profiles::ProfileRef;
    use crate::ProfileId;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rstest::*;
    use std::collections::BTreeMap;

    fn assignment(
        cell_id: CellId,
        nuts3: &str,
        ids: &[ProfileId],
        factor: f64,
    ) -> CellProfileAssignment {
        CellProfileAssignment {
            cell_id,
            grid_id: format!("100mN{cell_id}E1").into(),
            nuts3: nuts3.into(),
            nuts1: "DEF".into(),
            profile_ids: ids
                .iter()
                .map(|id| ProfileRef::new(HouseholdType::CoupleAdult, *id))
                .collect(),
            factors: BTreeMap::from([(2035, factor)]),
        }
    }

    #[fixture]
    fn pool() -> ProfilePool {
        ProfilePool::new(
            3,
            [
                (ProfileRef::new(HouseholdType::CoupleAdult, 0), vec![1., 2., 3.]),
                (ProfileRef::new(HouseholdType::CoupleAdult, 1), vec![4., 0., 1.]),
                (ProfileRef::new(HouseholdType::CoupleAdult, 2), vec![0., 5., 0.]),
            ],
        )
        .unwrap()
    }

    #[fixture]
    fn assignments() -> CellAssignments {
        [
            assignment(1, "DEF03", &[0, 1], 2.),
            assignment(2, "DEF03", &[2], 2.),
            // substation 10 spans two regions
            assignment(3, "DEF05", &[0], 0.5),
            assignment(4, "DEF05", &[1, 2], 0.5),
            assignment(5, "DEF05", &[2], 0.5),
        ]
        .into_iter()
        .map(|a| (a.cell_id, a))
        .collect()
    }

    #[fixture]
    fn grid_districts() -> IndexMap<CellId, SubstationId> {
        IndexMap::from([(1, 10), (2, 10), (3, 10), (4, 20)])
    }

    #[fixture]
    fn scenario() -> Scenario {
        Scenario {
            name: "eGon2035".into(),
            year: 2035,
        }
    }

    #[rstest]
    fn test_substation_series(
        assignments: CellAssignments,
        grid_districts: IndexMap<CellId, SubstationId>,
        pool: ProfilePool,
        scenario: Scenario,
    ) {
        let series =
            aggregate_substations(&assignments, &grid_districts, &pool, &scenario, "0.1", 1.)
                .unwrap();

        assert_eq!(series.iter().map(|s| s.subst_id).collect::<Vec<_>>(), vec![10, 20]);
        assert_eq!(series[0].p_set, vec![10.5, 15., 9.5]);
        assert_eq!(series[1].p_set, vec![2., 2.5, 0.5]);
        assert_eq!(series[0].scn_name.as_str(), "eGon2035");
        assert_eq!(series[0].version.as_str(), "0.1");
    }

    #[rstest]
    fn test_substation_total_is_conserved(
        assignments: CellAssignments,
        grid_districts: IndexMap<CellId, SubstationId>,
        pool: ProfilePool,
        scenario: Scenario,
    ) {
        let series =
            aggregate_substations(&assignments, &grid_districts, &pool, &scenario, "0.1", 1.)
                .unwrap();
        for substation in series {
            let expected: f64 = grid_districts
                .iter()
                .filter(|(_, subst_id)| **subst_id == substation.subst_id)
                .map(|(cell_id, _)| {
                    let cell = &assignments[cell_id];
                    cell.factor(2035).unwrap()
                        * pool.annual_total_of(*cell_id, &cell.profile_ids).unwrap()
                })
                .sum();
            assert_relative_eq!(substation.annual_total(), expected);
        }
    }

    #[rstest]
    fn test_output_unit_conversion(
        assignments: CellAssignments,
        grid_districts: IndexMap<CellId, SubstationId>,
        pool: ProfilePool,
        scenario: Scenario,
    ) {
        let series =
            aggregate_substations(&assignments, &grid_districts, &pool, &scenario, "0.1", 1e-3)
                .unwrap();
        assert_relative_eq!(series[1].p_set[0], 2e-3);
    }

    #[rstest]
    fn test_unreconciled_year(
        assignments: CellAssignments,
        grid_districts: IndexMap<CellId, SubstationId>,
        pool: ProfilePool,
    ) {
        let scenario = Scenario {
            name: "eGon100RE".into(),
            year: 2050,
        };
        assert!(matches!(
            aggregate_substations(&assignments, &grid_districts, &pool, &scenario, "0.1", 1.),
            Err(DisaggregationError::UnreconciledCell { year: 2050, .. })
        ));
    }

    #[rstest]
    fn test_stale_reference_aborts(
        mut assignments: CellAssignments,
        grid_districts: IndexMap<CellId, SubstationId>,
        pool: ProfilePool,
        scenario: Scenario,
    ) {
        assignments[&2]
            .profile_ids
            .push(ProfileRef::new(HouseholdType::CoupleAdult, 3));
        assert_eq!(
            aggregate_substations(&assignments, &grid_districts, &pool, &scenario, "0.1", 1.),
            Err(DisaggregationError::MalformedReference {
                cell_id: 2,
                household_type: HouseholdType::CoupleAdult,
                profile_id: 3,
            })
        );
    }

    #[rstest]
    fn test_load_timeseries_and_peak(assignments: CellAssignments, pool: ProfilePool) {
        let series = load_timeseries(&pool, &assignments, &[4, 5, 99], 2035, 1.).unwrap();
        assert_eq!(series, vec![2., 5., 0.5]);
        assert_relative_eq!(peak_load(&pool, &assignments, &[4, 5], 2035, 1.).unwrap(), 5.);
        assert_relative_eq!(peak_load(&pool, &assignments, &[], 2035, 1.).unwrap(), 0.);
    }

    #[rstest]
    fn test_load_timeseries_in_output_units(assignments: CellAssignments, pool: ProfilePool) {
        // Wh profiles reported in kWh
        let series = load_timeseries(&pool, &assignments, &[4, 5], 2035, 1e-3).unwrap();
        for (actual, expected) in series.iter().zip([2e-3, 5e-3, 0.5e-3]) {
            assert_relative_eq!(*actual, expected, max_relative = 1e-12);
        }
        assert_relative_eq!(
            peak_load(&pool, &assignments, &[4, 5], 2035, 1e-3).unwrap(),
            5e-3,
            max_relative = 1e-12
        );
    }
}
