//! Readers for the tables consumed by the pipeline. Every table is a CSV file with a header row.

use crate::cells::{CellArena, CellRegion};
use crate::config::InputPaths;
use crate::household_types::{AgeClass, CoarseCategory, FamilyType, HouseholdSize};
use crate::profiles::ProfilePool;
use crate::reconciler::RegionalAnnualDemand;
use crate::taxonomy::DemographicSource;
use crate::{CellId, RegionId, SubstationId};
use anyhow::{anyhow, Context};
use indexmap::IndexMap;
use serde::Deserialize;
use smartstring::alias::String;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info, instrument};

/// Normalizes a census count. The census marks suppressed or empty values with `-` or `.`, both of
/// which mean zero, and puts estimated values in brackets, e.g. `(12)`.
pub fn clean_count(raw: &str) -> anyhow::Result<u64> {
    let trimmed = raw.trim();
    if matches!(trimmed, "" | "-" | ".") {
        return Ok(0);
    }
    let value: std::string::String = trimmed
        .chars()
        .filter(|c| !matches!(c, '(' | ')' | ' '))
        .collect();
    value
        .parse()
        .with_context(|| format!("Census count '{raw}' is not a number"))
}

#[derive(Debug, Deserialize)]
struct DemographicRow {
    nuts1: RegionId,
    family_type: String,
    household_size: String,
    age_class: String,
    persons: String,
}

/// Reads the census person statistic, with columns `nuts1`, `family_type`, `household_size`,
/// `age_class` and `persons`. Category labels may be given either in the census wording or in
/// their short names.
pub fn read_demographic_source(csv: impl Read) -> anyhow::Result<DemographicSource> {
    let mut source = DemographicSource::new();
    for (row_idx, row) in csv::Reader::from_reader(csv).deserialize().enumerate() {
        let row: DemographicRow = row?;
        source.add(
            row.nuts1,
            row.family_type
                .parse::<FamilyType>()
                .with_context(|| format!("Unknown family type '{}' in row {row_idx}", row.family_type))?,
            row.household_size
                .parse::<HouseholdSize>()
                .with_context(|| {
                    format!("Unknown household size '{}' in row {row_idx}", row.household_size)
                })?,
            row.age_class
                .parse::<AgeClass>()
                .with_context(|| format!("Unknown age class '{}' in row {row_idx}", row.age_class))?,
            clean_count(&row.persons)? as f64,
        );
    }
    Ok(source)
}

#[derive(Debug, Deserialize)]
struct HouseholdSizeRow {
    size_class: String,
    households: String,
}

/// Reads the number of households per size class, with columns `size_class` and `households`.
pub fn read_household_size_distribution(
    csv: impl Read,
) -> anyhow::Result<IndexMap<HouseholdSize, f64>> {
    let mut distribution = IndexMap::new();
    for row in csv::Reader::from_reader(csv).deserialize() {
        let row: HouseholdSizeRow = row?;
        let size_class = row
            .size_class
            .parse::<HouseholdSize>()
            .with_context(|| format!("Unknown household size class '{}'", row.size_class))?;
        *distribution.entry(size_class).or_default() += clean_count(&row.households)? as f64;
    }
    Ok(distribution)
}

#[derive(Debug, Deserialize)]
struct CellHouseholdsRow {
    grid_id: String,
    characteristics_code: u8,
    quantity: f64,
}

/// Reads households per census cell and coarse category, with columns `grid_id`,
/// `characteristics_code` (1 to 5) and `quantity`.
pub fn read_cell_households(
    csv: impl Read,
) -> anyhow::Result<Vec<(String, CoarseCategory, f64)>> {
    csv::Reader::from_reader(csv)
        .deserialize()
        .map(|row| -> anyhow::Result<(String, CoarseCategory, f64)> {
            let row: CellHouseholdsRow = row?;
            let category = CoarseCategory::from_code(row.characteristics_code).ok_or_else(|| {
                anyhow!(
                    "Unknown household characteristics code {} for cell {}",
                    row.characteristics_code,
                    row.grid_id
                )
            })?;
            Ok((row.grid_id, category, row.quantity))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct CellRegionRow {
    grid_id: String,
    cell_id: CellId,
    nuts3: RegionId,
    nuts1: RegionId,
    #[serde(default)]
    x: Option<f64>,
    #[serde(default)]
    y: Option<f64>,
}

/// Reads the administrative regions of every populated census cell, with columns `grid_id`,
/// `cell_id`, `nuts3`, `nuts1` and optionally the centroid as `x` and `y`.
pub fn read_cell_regions(csv: impl Read) -> anyhow::Result<IndexMap<String, CellRegion>> {
    csv::Reader::from_reader(csv)
        .deserialize()
        .map(|row| -> anyhow::Result<(String, CellRegion)> {
            let row: CellRegionRow = row?;
            Ok((
                row.grid_id,
                CellRegion {
                    cell_id: row.cell_id,
                    nuts3: row.nuts3,
                    nuts1: row.nuts1,
                    centroid: row.x.zip(row.y),
                },
            ))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct GridDistrictRow {
    cell_id: CellId,
    subst_id: SubstationId,
}

/// Reads the substation whose grid district contains each cell, with columns `cell_id` and
/// `subst_id`.
pub fn read_grid_districts(csv: impl Read) -> anyhow::Result<IndexMap<CellId, SubstationId>> {
    csv::Reader::from_reader(csv)
        .deserialize()
        .map(|row| -> anyhow::Result<(CellId, SubstationId)> {
            let row: GridDistrictRow = row?;
            Ok((row.cell_id, row.subst_id))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct AnnualDemandRow {
    year: u32,
    nuts3: RegionId,
    demand: f64,
}

/// Reads the authoritative annual demand, with columns `year`, `nuts3` and `demand`. Repeated
/// region and year pairs are summed.
pub fn read_annual_demand(csv: impl Read) -> anyhow::Result<RegionalAnnualDemand> {
    csv::Reader::from_reader(csv)
        .deserialize()
        .map(|row| -> anyhow::Result<(u32, RegionId, f64)> {
            let row: AnnualDemandRow = row?;
            Ok((row.year, row.nuts3, row.demand))
        })
        .collect()
}

/// All reference data of a run, loaded once up front.
#[derive(Debug)]
pub struct InputData {
    pub demographic_source: DemographicSource,
    pub household_size_distribution: IndexMap<HouseholdSize, f64>,
    pub cells: CellArena,
    pub annual_demand: RegionalAnnualDemand,
    pub profiles: ProfilePool,
}

fn open(path: &Path) -> anyhow::Result<BufReader<File>> {
    Ok(BufReader::new(File::open(path).with_context(|| {
        format!("Could not open input file {}", path.display())
    })?))
}

impl InputData {
    #[instrument(skip_all)]
    pub fn from_paths(paths: &InputPaths) -> anyhow::Result<Self> {
        let read = |path: &Path, what: &str| -> anyhow::Result<BufReader<File>> {
            debug!(path = %path.display(), "Reading {what}");
            open(path)
        };

        let demographic_source =
            read_demographic_source(read(&paths.demographic_source, "census person statistic")?)
                .with_context(|| format!("Could not read {}", paths.demographic_source.display()))?;
        let household_size_distribution = read_household_size_distribution(read(
            &paths.household_size_distribution,
            "household size distribution",
        )?)
        .with_context(|| {
            format!(
                "Could not read {}",
                paths.household_size_distribution.display()
            )
        })?;
        let households = read_cell_households(read(&paths.cell_households, "cell households")?)
            .with_context(|| format!("Could not read {}", paths.cell_households.display()))?;
        let regions = read_cell_regions(read(&paths.cell_regions, "cell regions")?)
            .with_context(|| format!("Could not read {}", paths.cell_regions.display()))?;
        let grid_districts = read_grid_districts(read(&paths.grid_districts, "grid districts")?)
            .with_context(|| format!("Could not read {}", paths.grid_districts.display()))?;
        let annual_demand = read_annual_demand(read(&paths.annual_demand, "annual demand")?)
            .with_context(|| format!("Could not read {}", paths.annual_demand.display()))?;
        let profiles = ProfilePool::from_csv(read(&paths.profiles, "load profiles")?)
            .with_context(|| format!("Could not read {}", paths.profiles.display()))?;

        let cells = CellArena::join(households, &regions, &grid_districts);
        info!(
            cells = cells.len(),
            timesteps = profiles.timesteps(),
            "Loaded input data"
        );

        Ok(Self {
            demographic_source,
            household_size_distribution,
            cells,
            annual_demand,
            profiles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[rstest]
    #[case("1234", 1234)]
    #[case(" 17 ", 17)]
    #[case("(12)", 12)]
    #[case("-", 0)]
    #[case(".", 0)]
    #[case("", 0)]
    fn test_clean_count(#[case] raw: &str, #[case] expected: u64) {
        assert_eq!(clean_count(raw).unwrap(), expected);
    }

    #[rstest]
    fn test_clean_count_rejects_text() {
        assert!(clean_count("x").is_err());
    }

    #[rstest]
    fn test_read_demographic_source() {
        let csv = "nuts1,family_type,household_size,age_class,persons\n\
                   DEF,Einpersonenhaushalte (Singlehaushalte),1 Person,75 und älter,(12)\n\
                   DEF,single_person,1,75+,8\n\
                   DEF,Paare ohne Kind(er),2 Personen,30 - 39,-\n";
        let source = read_demographic_source(csv.as_bytes()).unwrap();
        assert_relative_eq!(
            source.persons(
                "DEF",
                FamilyType::SinglePerson,
                HouseholdSize::One,
                AgeClass::From75
            ),
            20.
        );
        assert_relative_eq!(
            source.persons(
                "DEF",
                FamilyType::CoupleWithoutKids,
                HouseholdSize::Two,
                AgeClass::From30To39
            ),
            0.
        );
    }

    #[rstest]
    fn test_read_household_size_distribution() {
        let csv = "size_class,households\n3 Personen,300\n6 und mehr Personen,(20)\n";
        let distribution = read_household_size_distribution(csv.as_bytes()).unwrap();
        assert_eq!(
            distribution,
            IndexMap::from([(HouseholdSize::Three, 300.), (HouseholdSize::SixOrMore, 20.)])
        );
    }

    #[rstest]
    fn test_read_cell_households() {
        let csv = "grid_id,characteristics_code,quantity\n100mN1E1,1,3\n100mN1E1,5,2\n";
        let households = read_cell_households(csv.as_bytes()).unwrap();
        assert_eq!(
            households,
            vec![
                (String::from("100mN1E1"), CoarseCategory::SinglePerson, 3.),
                (String::from("100mN1E1"), CoarseCategory::MultiPerson, 2.),
            ]
        );

        let csv = "grid_id,characteristics_code,quantity\n100mN1E1,6,3\n";
        assert!(read_cell_households(csv.as_bytes()).is_err());
    }

    #[rstest]
    fn test_read_cell_regions_with_and_without_centroid() {
        let csv = "grid_id,cell_id,nuts3,nuts1,x,y\n100mN1E1,1,DEF03,DEF,4331000.5,2684000.5\n100mN1E2,2,DEF03,DEF,,\n";
        let regions = read_cell_regions(csv.as_bytes()).unwrap();
        assert_eq!(regions["100mN1E1"].centroid, Some((4331000.5, 2684000.5)));
        assert_eq!(regions["100mN1E2"].centroid, None);
        assert_eq!(regions["100mN1E2"].cell_id, 2);
    }

    #[rstest]
    fn test_read_annual_demand_sums_duplicates() {
        let csv = "year,nuts3,demand\n2035,DEF03,100\n2035,DEF03,50\n2050,DEF03,80\n";
        let demand = read_annual_demand(csv.as_bytes()).unwrap();
        assert_relative_eq!(demand.get(2035, &"DEF03".into()).unwrap(), 150.);
        assert_relative_eq!(demand.get(2050, &"DEF03".into()).unwrap(), 80.);
        assert_eq!(demand.get(2040, &"DEF03".into()), None);
    }

    #[rstest]
    fn test_read_grid_districts() {
        let csv = "cell_id,subst_id\n1,10\n2,10\n3,20\n";
        assert_eq!(
            read_grid_districts(csv.as_bytes()).unwrap(),
            IndexMap::from([(1, 10), (2, 10), (3, 20)])
        );
    }
}
