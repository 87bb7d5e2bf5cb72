//! Census cells and the expected number of households of each household type living in them.

use crate::errors::DisaggregationError;
use crate::household_types::{CoarseCategory, HouseholdType};
use crate::taxonomy::RegionalTypeShare;
use crate::{CellId, RegionId, SubstationId};
use indexmap::IndexMap;
use rayon::prelude::*;
use smartstring::alias::String;
use tracing::{debug, info, instrument, warn};

#[derive(Clone, Debug, PartialEq)]
pub struct SpatialCell {
    pub cell_id: CellId,
    /// Census grid reference of the cell, e.g. `100mN26840E43310`
    pub grid_id: String,
    pub nuts3: RegionId,
    pub nuts1: RegionId,
    pub substation: Option<SubstationId>,
    pub centroid: Option<(f64, f64)>,
    /// Households per coarse category; categories without households are absent.
    pub households: IndexMap<CoarseCategory, f64>,
}

/// All cells of a run, keyed by integer cell id.
#[derive(Clone, Debug, Default)]
pub struct CellArena {
    cells: IndexMap<CellId, SpatialCell>,
}

impl CellArena {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&mut self, cell: SpatialCell) {
        self.cells.insert(cell.cell_id, cell);
    }

    pub fn get(&self, cell_id: CellId) -> Option<&SpatialCell> {
        self.cells.get(&cell_id)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpatialCell> {
        self.cells.values()
    }

    /// Mapping from each cell to its owning substation, for cells inside a grid district.
    pub fn grid_districts(&self) -> IndexMap<CellId, SubstationId> {
        self.cells
            .values()
            .filter_map(|cell| cell.substation.map(|substation| (cell.cell_id, substation)))
            .collect()
    }

    /// Joins per-cell household counts with the administrative and grid district mappings.
    ///
    /// Only cells present in `regions` are kept: census cells outside of populated areas carry no
    /// region mapping. Counts of zero are dropped.
    pub fn join(
        households: impl IntoIterator<Item = (String, CoarseCategory, f64)>,
        regions: &IndexMap<String, CellRegion>,
        grid_districts: &IndexMap<CellId, SubstationId>,
    ) -> Self {
        let mut arena = Self::new();
        let mut unmatched = 0usize;

        for (grid_id, category, count) in households {
            let Some(region) = regions.get(&grid_id) else {
                unmatched += 1;
                continue;
            };
            if count <= 0. {
                continue;
            }
            let cell = arena
                .cells
                .entry(region.cell_id)
                .or_insert_with(|| SpatialCell {
                    cell_id: region.cell_id,
                    grid_id: grid_id.clone(),
                    nuts3: region.nuts3.clone(),
                    nuts1: region.nuts1.clone(),
                    substation: grid_districts.get(&region.cell_id).copied(),
                    centroid: region.centroid,
                    households: IndexMap::new(),
                });
            *cell.households.entry(category).or_default() += count;
        }

        if unmatched > 0 {
            debug!(
                unmatched,
                "Household records without region mapping were dropped"
            );
        }
        arena.cells.sort_keys();

        arena
    }
}

/// Administrative membership of one census cell.
#[derive(Clone, Debug, PartialEq)]
pub struct CellRegion {
    pub cell_id: CellId,
    pub nuts3: RegionId,
    pub nuts1: RegionId,
    pub centroid: Option<(f64, f64)>,
}

/// Expected, generally non-integer, households per household type for every cell.
#[derive(Clone, Debug, Default)]
pub struct CellHouseholdModel {
    rows: IndexMap<CellId, CellHouseholds>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CellHouseholds {
    pub cell_id: CellId,
    pub grid_id: String,
    pub nuts3: RegionId,
    pub nuts1: RegionId,
    pub expected: Vec<(HouseholdType, f64)>,
}

impl CellHouseholdModel {
    pub fn get(&self, cell_id: CellId) -> Option<&CellHouseholds> {
        self.rows.get(&cell_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CellHouseholds> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub(crate) fn rows(&self) -> &IndexMap<CellId, CellHouseholds> {
        &self.rows
    }
}

impl FromIterator<CellHouseholds> for CellHouseholdModel {
    fn from_iter<T: IntoIterator<Item = CellHouseholds>>(iter: T) -> Self {
        Self {
            rows: iter.into_iter().map(|row| (row.cell_id, row)).collect(),
        }
    }
}

/// Refines the coarse household counts of every cell into expected counts of the household types,
/// using the shares of the cell's first-level region.
///
/// Region and category combinations without households are skipped with a warning. A cell whose
/// first-level region is missing from the census statistic fails with `UnknownRegion`, since its
/// households would otherwise be dropped unnoticed.
#[instrument(skip_all)]
pub fn build_cell_households(
    cells: &CellArena,
    shares: &RegionalTypeShare,
) -> Result<CellHouseholdModel, DisaggregationError> {
    let rows = cells
        .cells
        .par_values()
        .map(|cell| -> Result<(CellHouseholds, Vec<DisaggregationError>), DisaggregationError> {
            let mut skipped = vec![];
            let mut expected = vec![];
            for (category, count) in &cell.households {
                match shares.group(&cell.nuts1, *category) {
                    Ok(group) => expected.extend(
                        group
                            .iter()
                            .map(|(household_type, share)| (*household_type, count * share)),
                    ),
                    Err(e @ DisaggregationError::DegenerateGroup { .. }) => skipped.push(e),
                    Err(e) => return Err(e),
                }
            }
            Ok((
                CellHouseholds {
                    cell_id: cell.cell_id,
                    grid_id: cell.grid_id.clone(),
                    nuts3: cell.nuts3.clone(),
                    nuts1: cell.nuts1.clone(),
                    expected,
                },
                skipped,
            ))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let skipped = rows.iter().map(|(_, skipped)| skipped.len()).sum::<usize>();
    if skipped > 0 {
        if let Some(e) = rows.iter().flat_map(|(_, skipped)| skipped).next() {
            warn!(
                skipped,
                "Skipped cell categories without household type shares, first: {e}"
            );
        }
    }

    let model: CellHouseholdModel = rows.into_iter().map(|(row, _)| row).collect();
    info!(cells = model.len(), "Built expected households per cell");

    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::normalize_within_coarse_group;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn cell_region(cell_id: CellId, nuts3: &str, nuts1: &str) -> CellRegion {
        CellRegion {
            cell_id,
            nuts3: nuts3.into(),
            nuts1: nuts1.into(),
            centroid: None,
        }
    }

    #[fixture]
    fn arena() -> CellArena {
        let regions = IndexMap::from([
            ("100mN1E1".into(), cell_region(1, "DEF03", "DEF")),
            ("100mN1E2".into(), cell_region(2, "DEF03", "DEF")),
        ]);
        let grid_districts = IndexMap::from([(1, 7)]);
        CellArena::join(
            [
                ("100mN1E2".into(), CoarseCategory::SinglePerson, 4.),
                ("100mN1E1".into(), CoarseCategory::SinglePerson, 2.),
                ("100mN1E1".into(), CoarseCategory::SingleParent, 1.),
                ("100mN1E1".into(), CoarseCategory::MultiPerson, 0.),
                ("100mN9E9".into(), CoarseCategory::SinglePerson, 5.),
            ],
            &regions,
            &grid_districts,
        )
    }

    #[fixture]
    fn shares() -> RegionalTypeShare {
        normalize_within_coarse_group(&IndexMap::from([(
            "DEF".into(),
            IndexMap::from([
                (HouseholdType::SingleSenior, 1.),
                (HouseholdType::SingleAdult, 3.),
                (HouseholdType::SingleParent, 0.),
            ]),
        )]))
    }

    #[rstest]
    fn test_join_keeps_only_mapped_cells(arena: CellArena) {
        assert_eq!(arena.len(), 2);
        assert_eq!(
            arena.iter().map(|cell| cell.cell_id).collect::<Vec<_>>(),
            vec![1, 2]
        );

        let cell = arena.get(1).unwrap();
        assert_eq!(cell.grid_id.as_str(), "100mN1E1");
        assert_eq!(cell.substation, Some(7));
        assert_eq!(
            cell.households.keys().collect::<Vec<_>>(),
            vec![&CoarseCategory::SinglePerson, &CoarseCategory::SingleParent]
        );
        assert_eq!(arena.get(2).unwrap().substation, None);
        assert_eq!(arena.grid_districts(), IndexMap::from([(1, 7)]));
    }

    #[rstest]
    fn test_expected_households(arena: CellArena, shares: RegionalTypeShare) {
        let model = build_cell_households(&arena, &shares).unwrap();

        let cell = model.get(1).unwrap();
        // single parent group has no households in the region and is skipped
        assert_eq!(cell.expected.len(), 2);
        let expected: IndexMap<_, _> = cell.expected.iter().copied().collect();
        assert_relative_eq!(expected[&HouseholdType::SingleSenior], 0.5);
        assert_relative_eq!(expected[&HouseholdType::SingleAdult], 1.5);

        let cell = model.get(2).unwrap();
        let total: f64 = cell.expected.iter().map(|(_, count)| count).sum();
        assert_relative_eq!(total, 4.);
    }

    #[rstest]
    fn test_categories_without_households_are_absent(arena: CellArena, shares: RegionalTypeShare) {
        let model = build_cell_households(&arena, &shares).unwrap();
        assert!(model
            .iter()
            .flat_map(|cell| cell.expected.iter())
            .all(|(household_type, _)| household_type.coarse_category()
                == CoarseCategory::SinglePerson));
    }

    #[rstest]
    fn test_cell_in_region_outside_census_fails(mut arena: CellArena, shares: RegionalTypeShare) {
        arena.insert(SpatialCell {
            cell_id: 3,
            grid_id: "100mN5E5".into(),
            nuts3: "DEG01".into(),
            nuts1: "DEG".into(),
            substation: Some(7),
            centroid: None,
            households: IndexMap::from([(CoarseCategory::SinglePerson, 500.)]),
        });

        assert_eq!(
            build_cell_households(&arena, &shares).unwrap_err(),
            DisaggregationError::UnknownRegion {
                region: "DEG".into()
            }
        );
    }
}
