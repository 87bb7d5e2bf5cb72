//! Scales the sampled profiles of each third-level region so that they add up to the region's
//! authoritative annual demand.

use crate::errors::DisaggregationError;
use crate::profiles::ProfilePool;
use crate::sampler::CellAssignments;
use crate::{CellId, RegionId};
use indexmap::IndexMap;
use rayon::prelude::*;
use tracing::{debug, info, instrument};

/// Authoritative annual demand per scenario year and third-level region.
#[derive(Clone, Debug, Default)]
pub struct RegionalAnnualDemand {
    demand: IndexMap<(u32, RegionId), f64>,
}

impl RegionalAnnualDemand {
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds demand for a region and year, summing with demand already present.
    pub fn add(&mut self, year: u32, region: RegionId, demand: f64) {
        *self.demand.entry((year, region)).or_default() += demand;
    }

    pub fn get(&self, year: u32, region: &RegionId) -> Option<f64> {
        self.demand.get(&(year, region.clone())).copied()
    }

    pub fn years(&self) -> impl Iterator<Item = u32> + '_ {
        let mut years: Vec<u32> = self.demand.keys().map(|(year, _)| *year).collect();
        years.sort_unstable();
        years.dedup();
        years.into_iter()
    }
}

impl FromIterator<(u32, RegionId, f64)> for RegionalAnnualDemand {
    fn from_iter<T: IntoIterator<Item = (u32, RegionId, f64)>>(iter: T) -> Self {
        let mut demand = Self::new();
        for (year, region, value) in iter {
            demand.add(year, region, value);
        }
        demand
    }
}

/// Reconciliation result for one region and year.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegionFactor {
    /// Annual energy of all profiles referenced by the region's cells, in profile units.
    pub synthetic_total: f64,
    /// Authoritative demand converted into profile units.
    pub demand: f64,
    pub factor: f64,
}

/// Cells of each region, in region order.
fn cells_by_region(assignments: &CellAssignments) -> IndexMap<RegionId, Vec<CellId>> {
    let mut regions: IndexMap<RegionId, Vec<CellId>> = IndexMap::new();
    for assignment in assignments.values() {
        regions
            .entry(assignment.nuts3.clone())
            .or_default()
            .push(assignment.cell_id);
    }
    regions.sort_keys();
    regions
}

/// Total annual energy of the profiles referenced by the cells of every region.
pub fn synthetic_totals(
    assignments: &CellAssignments,
    pool: &ProfilePool,
) -> Result<IndexMap<RegionId, f64>, DisaggregationError> {
    cells_by_region(assignments)
        .into_par_iter()
        .map(|(region, cell_ids)| -> Result<(RegionId, f64), DisaggregationError> {
            let total = cell_ids.iter().try_fold(0., |total, cell_id| {
                let assignment = &assignments[cell_id];
                Ok::<_, DisaggregationError>(
                    total + pool.annual_total_of(*cell_id, &assignment.profile_ids)?,
                )
            })?;
            Ok((region, total))
        })
        .collect()
}

/// Computes the scaling factor of every region represented by cells for one scenario year and
/// stores it on each of the region's cells.
///
/// Nothing is stored unless every region reconciles: a region without a demand reference fails
/// the whole year with `MissingReference`.
#[instrument(skip(assignments, pool, demand, demand_to_profile_units))]
pub fn reconcile_year(
    assignments: &mut CellAssignments,
    pool: &ProfilePool,
    demand: &RegionalAnnualDemand,
    year: u32,
    demand_to_profile_units: f64,
) -> Result<IndexMap<RegionId, RegionFactor>, DisaggregationError> {
    let factors = synthetic_totals(assignments, pool)?
        .into_iter()
        .map(|(region, synthetic_total)| -> Result<_, DisaggregationError> {
            let reference = demand
                .get(year, &region)
                .ok_or_else(|| DisaggregationError::MissingReference {
                    region: region.clone(),
                    year,
                })?;
            if synthetic_total <= 0. {
                return Err(DisaggregationError::EmptyRegion { region });
            }
            let demand = reference * demand_to_profile_units;
            let factor = demand / synthetic_total;
            if !factor.is_finite() || factor <= 0. {
                return Err(DisaggregationError::NonPositiveFactor {
                    region,
                    year,
                    factor,
                });
            }
            debug!(%region, synthetic_total, demand, factor, "Reconciled region");
            Ok((
                region,
                RegionFactor {
                    synthetic_total,
                    demand,
                    factor,
                },
            ))
        })
        .collect::<Result<IndexMap<RegionId, RegionFactor>, _>>()?;

    assignments.par_values_mut().for_each(|assignment| {
        if let Some(region) = factors.get(&assignment.nuts3) {
            assignment.factors.insert(year, region.factor);
        }
    });

    info!(
        year,
        regions = factors.len(),
        "Reconciled synthetic profiles with annual demand"
    );

    Ok(factors)
}
