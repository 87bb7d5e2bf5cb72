//! Run configuration. A single `RunConfig` value is built once per invocation and passed into each
//! stage explicitly.

use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use smartstring::alias::String;
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Deserialize, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[validate(min_items = 1)]
    pub scenarios: Vec<Scenario>,
    /// Seed for profile sampling. A fresh seed is drawn when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Whether the adults-only multi-person household type (OO) is reduced to the share of those
    /// households without kids. Deliberately has no default.
    pub multi_person_adjustment: bool,
    #[serde(default)]
    #[validate]
    pub no_info_split: NoInfoSplit,
    #[serde(default = "default_annual_demand_unit")]
    pub annual_demand_unit: EnergyUnit,
    #[serde(default = "default_profile_unit")]
    pub profile_unit: EnergyUnit,
    /// Unit of the substation series, same as the profiles when absent.
    #[serde(default)]
    pub output_unit: Option<EnergyUnit>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub inputs: Option<InputPaths>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub name: String,
    pub year: u32,
}

/// Empirical split of multi-person households for which the census gives no information about
/// kids: without kids, with one kid and with two kids.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct NoInfoSplit {
    #[validate(minimum = 0.)]
    #[validate(maximum = 1.)]
    pub without_kids: f64,
    #[validate(minimum = 0.)]
    #[validate(maximum = 1.)]
    pub one_kid: f64,
    #[validate(minimum = 0.)]
    #[validate(maximum = 1.)]
    pub two_kids: f64,
}

impl Default for NoInfoSplit {
    fn default() -> Self {
        Self {
            without_kids: 0.703,
            one_kid: 0.216,
            two_kids: 0.081,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum EnergyUnit {
    #[serde(rename = "Wh")]
    WattHours,
    #[serde(rename = "kWh")]
    KilowattHours,
    #[serde(rename = "MWh")]
    MegawattHours,
}

impl EnergyUnit {
    fn in_watt_hours(&self) -> f64 {
        match self {
            Self::WattHours => 1.,
            Self::KilowattHours => 1e3,
            Self::MegawattHours => 1e6,
        }
    }

    /// Multiplier converting a quantity in this unit into `other`.
    pub fn conversion_to(&self, other: EnergyUnit) -> f64 {
        self.in_watt_hours() / other.in_watt_hours()
    }
}

fn default_annual_demand_unit() -> EnergyUnit {
    EnergyUnit::MegawattHours
}

fn default_profile_unit() -> EnergyUnit {
    EnergyUnit::WattHours
}

fn default_version() -> String {
    "0.0.0".into()
}

/// Locations of the input tables, used by the command line binary.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InputPaths {
    pub demographic_source: PathBuf,
    pub household_size_distribution: PathBuf,
    pub cell_households: PathBuf,
    pub cell_regions: PathBuf,
    pub grid_districts: PathBuf,
    pub annual_demand: PathBuf,
    pub profiles: PathBuf,
}

impl InputPaths {
    /// Resolves relative paths against `base`, usually the directory of the configuration file.
    pub fn relative_to(&self, base: &Path) -> Self {
        Self {
            demographic_source: base.join(&self.demographic_source),
            household_size_distribution: base.join(&self.household_size_distribution),
            cell_households: base.join(&self.cell_households),
            cell_regions: base.join(&self.cell_regions),
            grid_districts: base.join(&self.grid_districts),
            annual_demand: base.join(&self.annual_demand),
            profiles: base.join(&self.profiles),
        }
    }
}

impl RunConfig {
    pub fn from_json(json: impl Read) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_reader(json)?;
        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> anyhow::Result<()> {
        self.validate()
            .map_err(|e| anyhow!("Run configuration is invalid: {e}"))?;
        let split = &self.no_info_split;
        if !is_close!(
            split.without_kids + split.one_kid + split.two_kids,
            1.,
            abs_tol = 1e-6
        ) {
            bail!("Shares of the multi-person household split must add up to one");
        }
        let mut years = HashSet::new();
        for scenario in &self.scenarios {
            if !years.insert(scenario.year) {
                bail!(
                    "Scenario year {} is configured more than once",
                    scenario.year
                );
            }
        }
        Ok(())
    }

    pub fn scenario_for_year(&self, year: u32) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.year == year)
    }

    pub fn years(&self) -> Vec<u32> {
        self.scenarios.iter().map(|s| s.year).collect()
    }

    /// Multiplier taking annual demand references into profile units.
    pub fn demand_to_profile_units(&self) -> f64 {
        self.annual_demand_unit.conversion_to(self.profile_unit)
    }

    /// Multiplier taking profile units into the unit of the substation series.
    pub fn profile_to_output_units(&self) -> f64 {
        self.profile_unit
            .conversion_to(self.output_unit.unwrap_or(self.profile_unit))
    }

    /// The seed for this run, drawing and reporting a fresh one when none is configured.
    pub fn resolve_seed(&self) -> u64 {
        match self.seed {
            Some(seed) => seed,
            None => {
                let seed = rand::random::<u64>();
                tracing::info!(seed, "No sampling seed configured, drew a fresh one");
                seed
            }
        }
    }
}
