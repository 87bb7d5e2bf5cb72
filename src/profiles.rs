//! The library of representative annual household load profiles, partitioned by household type.

use crate::errors::DisaggregationError;
use crate::household_types::HouseholdType;
use crate::{CellId, ProfileId};
use anyhow::{anyhow, Context};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::io::Read;
use std::str::FromStr;

/// Reference to one profile of the pool, written as `<type>:<id>`, e.g. `SR:12`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ProfileRef {
    pub household_type: HouseholdType,
    pub profile_id: ProfileId,
}

impl ProfileRef {
    pub fn new(household_type: HouseholdType, profile_id: ProfileId) -> Self {
        Self {
            household_type,
            profile_id,
        }
    }
}

impl Display for ProfileRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.household_type, self.profile_id)
    }
}

impl FromStr for ProfileRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (household_type, profile_id) = s
            .split_once(':')
            .ok_or_else(|| anyhow!("Profile reference '{s}' is not of the form <type>:<id>"))?;
        Ok(Self {
            household_type: household_type
                .trim()
                .parse()
                .with_context(|| format!("Unknown household type in profile reference '{s}'"))?,
            profile_id: profile_id
                .trim()
                .parse()
                .with_context(|| format!("Invalid profile id in profile reference '{s}'"))?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoadProfile {
    values: Vec<f64>,
    annual_total: f64,
}

impl LoadProfile {
    pub fn new(values: Vec<f64>) -> Self {
        let annual_total = values.iter().sum();
        Self {
            values,
            annual_total,
        }
    }

    /// Energy per timestep, in profile units.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn annual_total(&self) -> f64 {
        self.annual_total
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Immutable profile library. Within each household type, profile ids run from 0 to the pool size
/// of that type.
#[derive(Clone, Debug)]
pub struct ProfilePool {
    timesteps: usize,
    profiles: IndexMap<HouseholdType, Vec<LoadProfile>>,
}

impl ProfilePool {
    /// Builds a pool from profiles keyed by reference. All profiles must share `timesteps`, and ids
    /// must be unique and contiguous from zero within each household type.
    pub fn new(
        timesteps: usize,
        profiles: impl IntoIterator<Item = (ProfileRef, Vec<f64>)>,
    ) -> Result<Self, DisaggregationError> {
        let mut by_type: IndexMap<HouseholdType, IndexMap<ProfileId, LoadProfile>> =
            IndexMap::new();
        for (reference, values) in profiles {
            if values.len() != timesteps {
                return Err(DisaggregationError::ProfileLengthMismatch {
                    household_type: reference.household_type,
                    profile_id: reference.profile_id,
                    expected: timesteps,
                    actual: values.len(),
                });
            }
            let previous = by_type
                .entry(reference.household_type)
                .or_default()
                .insert(reference.profile_id, LoadProfile::new(values));
            if previous.is_some() {
                return Err(DisaggregationError::DuplicateProfile {
                    household_type: reference.household_type,
                    profile_id: reference.profile_id,
                });
            }
        }

        let mut profiles = IndexMap::new();
        for (household_type, mut by_id) in by_type {
            by_id.sort_keys();
            if let Some(missing) = (0..by_id.len() as ProfileId).find(|id| !by_id.contains_key(id))
            {
                return Err(DisaggregationError::ProfileIdGap {
                    household_type,
                    missing,
                });
            }
            profiles.insert(household_type, by_id.into_values().collect());
        }
        profiles.sort_keys();

        Ok(Self {
            timesteps,
            profiles,
        })
    }

    /// Reads a wide CSV table with one row per timestep and one column per profile, headed
    /// `<type>_<id>` (e.g. `SR_00012`). A leading `timestep` column is ignored.
    pub fn from_csv(csv: impl Read) -> anyhow::Result<Self> {
        let mut reader = csv::Reader::from_reader(csv);
        let headers = reader.headers()?.clone();

        let columns = headers
            .iter()
            .enumerate()
            .filter(|(_, header)| !header.eq_ignore_ascii_case("timestep"))
            .map(|(idx, header)| -> anyhow::Result<(usize, ProfileRef)> {
                let (household_type, profile_id) = header
                    .split_once('_')
                    .ok_or_else(|| anyhow!("Profile column '{header}' is not of the form <type>_<id>"))?;
                let household_type: HouseholdType = household_type
                    .parse()
                    .with_context(|| format!("Unknown household type in profile column '{header}'"))?;
                let profile_id: ProfileId = profile_id
                    .parse()
                    .with_context(|| format!("Invalid profile id in profile column '{header}'"))?;
                Ok((idx, ProfileRef::new(household_type, profile_id)))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut values: Vec<Vec<f64>> = vec![vec![]; columns.len()];
        for (row_idx, record) in reader.records().enumerate() {
            let record = record?;
            for (column, (idx, reference)) in columns.iter().enumerate() {
                let value = record
                    .get(*idx)
                    .ok_or_else(|| anyhow!("Row {row_idx} has no value for profile {reference}"))?
                    .trim()
                    .parse::<f64>()
                    .with_context(|| {
                        format!("Invalid value in row {row_idx} of profile {reference}")
                    })?;
                values[column].push(value);
            }
        }

        let timesteps = values.first().map(Vec::len).unwrap_or_default();
        Ok(Self::new(
            timesteps,
            columns
                .into_iter()
                .map(|(_, reference)| reference)
                .zip(values),
        )?)
    }

    /// Number of timesteps shared by every profile.
    pub fn timesteps(&self) -> usize {
        self.timesteps
    }

    /// Number of distinct profiles available for a household type.
    pub fn pool_size(&self, household_type: HouseholdType) -> usize {
        self.profiles
            .get(&household_type)
            .map(Vec::len)
            .unwrap_or_default()
    }

    pub fn get(&self, reference: &ProfileRef) -> Option<&LoadProfile> {
        self.profiles
            .get(&reference.household_type)
            .and_then(|profiles| profiles.get(reference.profile_id as usize))
    }

    /// Looks up a profile referenced by a cell, failing for references that do not exist.
    pub fn resolve(
        &self,
        cell_id: CellId,
        reference: &ProfileRef,
    ) -> Result<&LoadProfile, DisaggregationError> {
        self.get(reference)
            .ok_or(DisaggregationError::MalformedReference {
                cell_id,
                household_type: reference.household_type,
                profile_id: reference.profile_id,
            })
    }

    /// Total annual energy of all referenced profiles.
    pub fn annual_total_of(
        &self,
        cell_id: CellId,
        references: &[ProfileRef],
    ) -> Result<f64, DisaggregationError> {
        references.iter().try_fold(0., |total, reference| {
            Ok(total + self.resolve(cell_id, reference)?.annual_total())
        })
    }

    /// Adds all referenced profiles, each multiplied by `factor`, into `accumulator`.
    pub fn add_scaled_into(
        &self,
        accumulator: &mut [f64],
        cell_id: CellId,
        references: &[ProfileRef],
        factor: f64,
    ) -> Result<(), DisaggregationError> {
        for reference in references {
            let profile = self.resolve(cell_id, reference)?;
            for (acc, value) in accumulator.iter_mut().zip(profile.values()) {
                *acc += value * factor;
            }
        }
        Ok(())
    }
}
