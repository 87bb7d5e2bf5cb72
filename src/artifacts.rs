//! Row formats of the persisted stage artifacts.

use crate::aggregator::SubstationLoadSeries;
use crate::output::ArtifactStore;
use crate::profiles::ProfileRef;
use crate::sampler::{CellAssignments, CellProfileAssignment};
use crate::CellId;
use anyhow::{anyhow, bail, Context};
use csv::WriterBuilder;
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;

pub const CELL_ASSIGNMENTS_KEY: &str = "household_electricity_profiles_in_census_cells";
const SUBSTATION_SERIES_KEY_PREFIX: &str = "household_electricity_substation";
const CSV_EXTENSION: &str = "csv";
const FACTOR_COLUMN_PREFIX: &str = "factor_";
const PROFILE_SEPARATOR: char = ';';

pub fn substation_series_key(scn_name: &str) -> String {
    format!("{SUBSTATION_SERIES_KEY_PREFIX}_{scn_name}")
}

/// Profile references of a cell written as e.g. `SR:3;PO:17`.
pub fn encode_profile_ids(profile_ids: &[ProfileRef]) -> String {
    profile_ids.iter().join(&PROFILE_SEPARATOR.to_string())
}

pub fn decode_profile_ids(encoded: &str) -> anyhow::Result<Vec<ProfileRef>> {
    encoded
        .split(PROFILE_SEPARATOR)
        .map(str::trim)
        .filter(|reference| !reference.is_empty())
        .map(str::parse)
        .collect()
}

pub fn cell_assignments_to_csv(assignments: &CellAssignments) -> anyhow::Result<Vec<u8>> {
    let years: BTreeSet<u32> = assignments
        .values()
        .flat_map(|assignment| assignment.factors.keys().copied())
        .collect();

    let mut writer = WriterBuilder::new().from_writer(vec![]);

    let mut headings = vec![
        "cell_id".to_string(),
        "grid_id".to_string(),
        "nuts3".to_string(),
        "nuts1".to_string(),
        "cell_profile_ids".to_string(),
    ];
    headings.extend(years.iter().map(|year| format!("{FACTOR_COLUMN_PREFIX}{year}")));
    writer.write_record(&headings)?;

    for assignment in assignments.values() {
        let mut row = vec![
            assignment.cell_id.to_string(),
            assignment.grid_id.to_string(),
            assignment.nuts3.to_string(),
            assignment.nuts1.to_string(),
            encode_profile_ids(&assignment.profile_ids),
        ];
        row.extend(years.iter().map(|year| {
            assignment
                .factors
                .get(year)
                .map(|factor| factor.to_string())
                .unwrap_or_default()
        }));
        writer.write_record(&row)?;
    }

    writer
        .into_inner()
        .map_err(|e| anyhow!("Could not finish writing cell profile assignments: {e}"))
}

pub fn cell_assignments_from_csv(csv: impl Read) -> anyhow::Result<CellAssignments> {
    let mut reader = csv::Reader::from_reader(csv);
    let headers = reader.headers()?.clone();

    let column = |name: &str| {
        headers
            .iter()
            .position(|header| header == name)
            .ok_or_else(|| anyhow!("Cell profile assignments have no '{name}' column"))
    };
    let cell_id_column = column("cell_id")?;
    let grid_id_column = column("grid_id")?;
    let nuts3_column = column("nuts3")?;
    let nuts1_column = column("nuts1")?;
    let profile_ids_column = column("cell_profile_ids")?;
    let factor_columns = headers
        .iter()
        .enumerate()
        .filter_map(|(idx, header)| {
            header
                .strip_prefix(FACTOR_COLUMN_PREFIX)
                .map(|year| (idx, year))
        })
        .map(|(idx, year)| -> anyhow::Result<(usize, u32)> {
            Ok((
                idx,
                year.parse::<u32>()
                    .with_context(|| format!("Invalid scenario year in column '{FACTOR_COLUMN_PREFIX}{year}'"))?,
            ))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut assignments = CellAssignments::new();
    for (row_idx, record) in reader.records().enumerate() {
        let record = record?;
        let field = |idx: usize| {
            record
                .get(idx)
                .ok_or_else(|| anyhow!("Row {row_idx} of cell profile assignments is too short"))
        };
        let cell_id: CellId = field(cell_id_column)?
            .parse()
            .with_context(|| format!("Invalid cell id in row {row_idx}"))?;

        let mut factors = BTreeMap::new();
        for (idx, year) in &factor_columns {
            let value = field(*idx)?.trim();
            if value.is_empty() {
                continue;
            }
            factors.insert(
                *year,
                value
                    .parse::<f64>()
                    .with_context(|| format!("Invalid {year} factor for cell {cell_id}"))?,
            );
        }

        let assignment = CellProfileAssignment {
            cell_id,
            grid_id: field(grid_id_column)?.into(),
            nuts3: field(nuts3_column)?.into(),
            nuts1: field(nuts1_column)?.into(),
            profile_ids: decode_profile_ids(field(profile_ids_column)?)
                .with_context(|| format!("Invalid profile references for cell {cell_id}"))?,
            factors,
        };
        if assignments.insert(cell_id, assignment).is_some() {
            bail!("Cell {cell_id} appears more than once in cell profile assignments");
        }
    }

    Ok(assignments)
}

pub fn substation_series_to_csv(series: &[SubstationLoadSeries]) -> anyhow::Result<Vec<u8>> {
    let mut writer = WriterBuilder::new().from_writer(vec![]);
    writer.write_record(["version", "scn_name", "year", "subst_id", "p_set"])?;
    for row in series {
        writer.write_record([
            row.version.to_string(),
            row.scn_name.to_string(),
            row.year.to_string(),
            row.subst_id.to_string(),
            serde_json::to_string(&row.p_set)?,
        ])?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow!("Could not finish writing substation load series: {e}"))
}

pub fn substation_series_from_csv(csv: impl Read) -> anyhow::Result<Vec<SubstationLoadSeries>> {
    let mut reader = csv::Reader::from_reader(csv);
    reader
        .records()
        .enumerate()
        .map(|(row_idx, record)| -> anyhow::Result<SubstationLoadSeries> {
            let record = record?;
            let field = |idx: usize| {
                record
                    .get(idx)
                    .ok_or_else(|| anyhow!("Row {row_idx} of substation load series is too short"))
            };
            Ok(SubstationLoadSeries {
                version: field(0)?.into(),
                scn_name: field(1)?.into(),
                year: field(2)?
                    .parse()
                    .with_context(|| format!("Invalid year in row {row_idx}"))?,
                subst_id: field(3)?
                    .parse()
                    .with_context(|| format!("Invalid substation id in row {row_idx}"))?,
                p_set: serde_json::from_str(field(4)?)
                    .with_context(|| format!("Invalid load series in row {row_idx}"))?,
            })
        })
        .collect()
}

pub fn write_cell_assignments(
    store: &impl ArtifactStore,
    assignments: &CellAssignments,
) -> anyhow::Result<()> {
    if store.is_noop() {
        return Ok(());
    }
    store.replace(
        CELL_ASSIGNMENTS_KEY,
        CSV_EXTENSION,
        &cell_assignments_to_csv(assignments)?,
    )
}

/// Reads back stored cell profile assignments, or `None` if none were stored yet.
pub fn read_cell_assignments(store: &impl ArtifactStore) -> anyhow::Result<Option<CellAssignments>> {
    store
        .read(CELL_ASSIGNMENTS_KEY, CSV_EXTENSION)?
        .map(|contents| cell_assignments_from_csv(contents.as_slice()))
        .transpose()
}

pub fn write_substation_series(
    store: &impl ArtifactStore,
    scn_name: &str,
    series: &[SubstationLoadSeries],
) -> anyhow::Result<()> {
    if store.is_noop() {
        return Ok(());
    }
    store.replace(
        &substation_series_key(scn_name),
        CSV_EXTENSION,
        &substation_series_to_csv(series)?,
    )
}

pub fn read_substation_series(
    store: &impl ArtifactStore,
    scn_name: &str,
) -> anyhow::Result<Option<Vec<SubstationLoadSeries>>> {
    store
        .read(&substation_series_key(scn_name), CSV_EXTENSION)?
        .map(|contents| substation_series_from_csv(contents.as_slice()))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::household_types::HouseholdType;
    use crate::output::MemoryStore;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[fixture]
    fn assignments() -> CellAssignments {
        let reconciled = CellProfileAssignment {
            cell_id: 4,
            grid_id: "100mN4E1".into(),
            nuts3: "DEF03".into(),
            nuts1: "DEF".into(),
            profile_ids: vec![
                ProfileRef::new(HouseholdType::SingleSenior, 3),
                ProfileRef::new(HouseholdType::CoupleAdult, 17),
            ],
            factors: BTreeMap::from([(2035, 1.25), (2050, 0.8)]),
        };
        let partially_reconciled = CellProfileAssignment {
            cell_id: 9,
            grid_id: "100mN9E1".into(),
            nuts3: "DEF05".into(),
            nuts1: "DEF".into(),
            profile_ids: vec![ProfileRef::new(HouseholdType::CoupleWithKidsFivePlusPersons, 0)],
            factors: BTreeMap::from([(2035, 2.5)]),
        };
        [reconciled, partially_reconciled]
            .into_iter()
            .map(|a| (a.cell_id, a))
            .collect()
    }

    #[rstest]
    fn test_encode_profile_ids() {
        let ids = vec![
            ProfileRef::new(HouseholdType::SingleSenior, 3),
            ProfileRef::new(HouseholdType::CoupleAdult, 17),
        ];
        assert_eq!(encode_profile_ids(&ids), "SR:3;PO:17");
        assert_eq!(decode_profile_ids("SR:3; PO:17;").unwrap(), ids);
        assert_eq!(decode_profile_ids("").unwrap(), vec![]);
        assert!(decode_profile_ids("SR:3;QQ:1").is_err());
    }

    #[rstest]
    fn test_cell_assignment_csv_layout(assignments: CellAssignments) {
        let csv = String::from_utf8(cell_assignments_to_csv(&assignments).unwrap()).unwrap();
        assert_eq!(
            csv,
            "cell_id,grid_id,nuts3,nuts1,cell_profile_ids,factor_2035,factor_2050\n\
             4,100mN4E1,DEF03,DEF,SR:3;PO:17,1.25,0.8\n\
             9,100mN9E1,DEF05,DEF,P3:0,2.5,\n"
        );
    }

    #[rstest]
    fn test_cell_assignments_read_back_through_store(assignments: CellAssignments) {
        let store = MemoryStore::new();
        assert_eq!(read_cell_assignments(&store).unwrap(), None);

        write_cell_assignments(&store, &assignments).unwrap();
        assert_eq!(read_cell_assignments(&store).unwrap(), Some(assignments));
    }

    #[rstest]
    fn test_rejects_duplicate_cells() {
        let csv = "cell_id,grid_id,nuts3,nuts1,cell_profile_ids\n\
                   1,a,DEF03,DEF,SR:0\n\
                   1,a,DEF03,DEF,SR:1\n";
        assert!(cell_assignments_from_csv(csv.as_bytes()).is_err());
    }

    #[rstest]
    fn test_substation_series_read_back_through_store() {
        let series = vec![SubstationLoadSeries {
            version: "0.1".into(),
            scn_name: "eGon2035".into(),
            year: 2035,
            subst_id: 12,
            p_set: vec![0.5, 1.25, 3.],
        }];
        let store = MemoryStore::new();
        write_substation_series(&store, "eGon2035", &series).unwrap();

        assert_eq!(
            store.keys(),
            vec!["household_electricity_substation_eGon2035.csv"]
        );
        assert_eq!(
            read_substation_series(&store, "eGon2035").unwrap(),
            Some(series)
        );
        assert_eq!(read_substation_series(&store, "eGon100RE").unwrap(), None);
    }
}
