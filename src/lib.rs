pub mod aggregator;
pub mod artifacts;
pub mod cells;
pub mod config;
pub mod errors;
pub mod household_types;
pub mod input;
pub mod output;
pub mod profiles;
pub mod reconciler;
pub mod sampler;
pub mod taxonomy;

#[macro_use]
extern crate is_close;

use crate::aggregator::{aggregate_substations, SubstationLoadSeries};
use crate::artifacts::{read_cell_assignments, write_cell_assignments, write_substation_series};
use crate::cells::{build_cell_households, CellArena, CellHouseholdModel};
use crate::config::{RunConfig, Scenario};
use crate::errors::{DisaggregationError, HhDemandError, RunStage};
use crate::household_types::HouseholdSize;
use crate::input::InputData;
use crate::output::ArtifactStore;
use crate::profiles::ProfilePool;
use crate::reconciler::{reconcile_year, RegionFactor, RegionalAnnualDemand};
use crate::sampler::{sample_profiles, CellAssignments};
use crate::taxonomy::{map_taxonomy, DemographicSource, RegionalTypeShare};
use anyhow::anyhow;
use indexmap::IndexMap;
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};

/// First- and third-level administrative region identifier, e.g. `DEF` or `DEF03`.
pub type RegionId = smartstring::alias::String;
pub type CellId = u32;
pub type SubstationId = u32;
pub type ProfileId = u32;

const CELL_ASSIGNMENTS_ARTIFACT: &str = "cell profile assignments";
const SUBSTATION_SERIES_ARTIFACT: &str = "substation load series";

/// Progress of a run, holding the output of the latest completed stage.
#[derive(Debug)]
enum RunState {
    Init,
    TaxonomyMapped(RegionalTypeShare),
    CellsBuilt(CellHouseholdModel),
    Sampled {
        assignments: CellAssignments,
        reconciled: BTreeSet<u32>,
        aggregated: BTreeSet<u32>,
    },
}

impl RunState {
    fn stage(&self) -> RunStage {
        match self {
            Self::Init => RunStage::Init,
            Self::TaxonomyMapped(_) => RunStage::TaxonomyMapped,
            Self::CellsBuilt(_) => RunStage::CellsBuilt,
            Self::Sampled {
                reconciled,
                aggregated,
                ..
            } => {
                if !aggregated.is_empty() {
                    RunStage::Aggregated
                } else if !reconciled.is_empty() {
                    RunStage::Reconciled
                } else {
                    RunStage::Sampled
                }
            }
        }
    }
}

/// Drives one run through its stages. Each stage consumes the output of the previous one and
/// replaces its own artifact in the store. Scenario years are reconciled and aggregated from the
/// same sampled state, so adding a year never resamples.
#[derive(Debug)]
pub struct Disaggregation<'a, S: ArtifactStore> {
    config: &'a RunConfig,
    store: S,
    state: RunState,
}

impl<'a, S: ArtifactStore> Disaggregation<'a, S> {
    pub fn new(config: &'a RunConfig, store: S) -> Self {
        Self {
            config,
            store,
            state: RunState::Init,
        }
    }

    /// Picks a run up from the cell profile assignments persisted by an earlier run, checking
    /// every stored profile reference against `pool`. Years that already carry factors count as
    /// reconciled.
    pub fn from_stored_assignments(
        config: &'a RunConfig,
        store: S,
        pool: &ProfilePool,
    ) -> Result<Self, HhDemandError> {
        let assignments = read_cell_assignments(&store)?
            .ok_or_else(|| anyhow!("No cell profile assignments have been stored"))?;
        for assignment in assignments.values() {
            for reference in &assignment.profile_ids {
                pool.resolve(assignment.cell_id, reference)
                    .map_err(HhDemandError::in_stage(RunStage::Sampled))?;
            }
        }
        let reconciled = assignments
            .values()
            .flat_map(|assignment| assignment.factors.keys().copied())
            .collect();

        info!(
            cells = assignments.len(),
            "Resumed run from stored cell profile assignments"
        );

        Ok(Self {
            config,
            store,
            state: RunState::Sampled {
                assignments,
                reconciled,
                aggregated: Default::default(),
            },
        })
    }

    pub fn stage(&self) -> RunStage {
        self.state.stage()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Cell profile assignments, once sampled.
    pub fn assignments(&self) -> Option<&CellAssignments> {
        match &self.state {
            RunState::Sampled { assignments, .. } => Some(assignments),
            _ => None,
        }
    }

    pub fn is_reconciled(&self, year: u32) -> bool {
        matches!(&self.state, RunState::Sampled { reconciled, .. } if reconciled.contains(&year))
    }

    fn out_of_order(&self, requested: RunStage) -> HhDemandError {
        HhDemandError::StageOrder {
            requested,
            current: self.stage(),
        }
    }

    fn scenario(&self, year: u32) -> Result<&'a Scenario, HhDemandError> {
        self.config
            .scenario_for_year(year)
            .ok_or_else(|| anyhow!("Scenario year {year} is not configured").into())
    }

    pub fn shares(&self) -> Option<&RegionalTypeShare> {
        match &self.state {
            RunState::TaxonomyMapped(shares) => Some(shares),
            _ => None,
        }
    }

    pub fn cell_model(&self) -> Option<&CellHouseholdModel> {
        match &self.state {
            RunState::CellsBuilt(model) => Some(model),
            _ => None,
        }
    }

    pub fn map_taxonomy(
        &mut self,
        source: &DemographicSource,
        size_distribution: &IndexMap<HouseholdSize, f64>,
    ) -> Result<(), HhDemandError> {
        if !matches!(self.state, RunState::Init) {
            return Err(self.out_of_order(RunStage::TaxonomyMapped));
        }
        let shares = map_taxonomy(source, size_distribution, self.config)
            .map_err(HhDemandError::in_stage(RunStage::TaxonomyMapped))?;
        self.state = RunState::TaxonomyMapped(shares);

        Ok(())
    }

    pub fn build_cells(&mut self, cells: &CellArena) -> Result<(), HhDemandError> {
        let RunState::TaxonomyMapped(shares) = &self.state else {
            return Err(self.out_of_order(RunStage::CellsBuilt));
        };
        let model = build_cell_households(cells, shares)
            .map_err(HhDemandError::in_stage(RunStage::CellsBuilt))?;
        self.state = RunState::CellsBuilt(model);

        Ok(())
    }

    /// Draws profiles for every cell and persists the assignments.
    pub fn sample(&mut self, pool: &ProfilePool, seed: u64) -> Result<(), HhDemandError> {
        let RunState::CellsBuilt(model) = &self.state else {
            return Err(self.out_of_order(RunStage::Sampled));
        };
        let assignments = sample_profiles(model, pool, seed)
            .map_err(HhDemandError::in_stage(RunStage::Sampled))?;
        write_cell_assignments(&self.store, &assignments)
            .map_err(HhDemandError::persisting(CELL_ASSIGNMENTS_ARTIFACT))?;

        self.state = RunState::Sampled {
            assignments,
            reconciled: Default::default(),
            aggregated: Default::default(),
        };

        Ok(())
    }

    /// Scales the cells of every region to the annual demand of `year` and persists the factors.
    ///
    /// A missing demand reference only fails this year, reported as `ScenarioSkipped`; the
    /// stored assignments are left as they were. The year only counts as reconciled once its
    /// factors are stored.
    #[instrument(skip(self, pool, demand))]
    pub fn reconcile(
        &mut self,
        year: u32,
        pool: &ProfilePool,
        demand: &RegionalAnnualDemand,
    ) -> Result<IndexMap<RegionId, RegionFactor>, HhDemandError> {
        self.scenario(year)?;
        let demand_to_profile_units = self.config.demand_to_profile_units();
        let current = self.stage();
        let RunState::Sampled {
            assignments,
            reconciled,
            ..
        } = &mut self.state
        else {
            return Err(HhDemandError::StageOrder {
                requested: RunStage::Reconciled,
                current,
            });
        };

        let factors = reconcile_year(assignments, pool, demand, year, demand_to_profile_units)
            .map_err(|source| match source {
                DisaggregationError::MissingReference { .. } => {
                    HhDemandError::ScenarioSkipped { year, source }
                }
                source => HhDemandError::FailureInStage {
                    stage: RunStage::Reconciled,
                    source,
                },
            })?;
        if let Err(e) = write_cell_assignments(&self.store, assignments) {
            // factors that were never stored must not be aggregated
            assignments.values_mut().for_each(|assignment| {
                assignment.factors.remove(&year);
            });
            return Err(HhDemandError::persisting(CELL_ASSIGNMENTS_ARTIFACT)(e));
        }
        reconciled.insert(year);

        Ok(factors)
    }

    /// Builds and persists the substation load series of a reconciled scenario year.
    #[instrument(skip(self, grid_districts, pool))]
    pub fn aggregate(
        &mut self,
        year: u32,
        grid_districts: &IndexMap<CellId, SubstationId>,
        pool: &ProfilePool,
    ) -> Result<Vec<SubstationLoadSeries>, HhDemandError> {
        let scenario = self.scenario(year)?;
        let current = self.stage();
        let RunState::Sampled {
            assignments,
            reconciled,
            aggregated,
        } = &mut self.state
        else {
            return Err(HhDemandError::StageOrder {
                requested: RunStage::Aggregated,
                current,
            });
        };
        if !reconciled.contains(&year) {
            return Err(HhDemandError::StageOrder {
                requested: RunStage::Aggregated,
                current,
            });
        }

        let series = aggregate_substations(
            assignments,
            grid_districts,
            pool,
            scenario,
            &self.config.version,
            self.config.profile_to_output_units(),
        )
        .map_err(HhDemandError::in_stage(RunStage::Aggregated))?;
        write_substation_series(&self.store, &scenario.name, &series)
            .map_err(HhDemandError::persisting(SUBSTATION_SERIES_ARTIFACT))?;
        aggregated.insert(year);

        Ok(series)
    }
}

/// Outcome of a complete run.
#[derive(Debug)]
pub struct RunSummary {
    pub seed: u64,
    pub cells: usize,
    /// Number of substation series written per aggregated scenario.
    pub aggregated: IndexMap<u32, usize>,
    /// Scenario years that could not be reconciled.
    pub skipped: Vec<HhDemandError>,
}

/// Runs every stage for all configured scenarios. A scenario year without complete annual demand
/// references is skipped and reported, every other failure ends the run.
#[instrument(skip_all)]
pub fn run_disaggregation(
    config: &RunConfig,
    inputs: &InputData,
    store: impl ArtifactStore,
) -> Result<RunSummary, HhDemandError> {
    let seed = config.resolve_seed();
    let mut run = Disaggregation::new(config, store);

    run.map_taxonomy(
        &inputs.demographic_source,
        &inputs.household_size_distribution,
    )?;
    run.build_cells(&inputs.cells)?;
    run.sample(&inputs.profiles, seed)?;
    let cells = run.assignments().map(|a| a.len()).unwrap_or_default();

    let grid_districts = inputs.cells.grid_districts();
    let mut aggregated = IndexMap::new();
    let mut skipped = vec![];
    for year in config.years() {
        match run.reconcile(year, &inputs.profiles, &inputs.annual_demand) {
            Ok(_) => {}
            Err(e @ HhDemandError::ScenarioSkipped { .. }) => {
                warn!("{e}");
                skipped.push(e);
                continue;
            }
            Err(e) => return Err(e),
        }
        let series = run.aggregate(year, &grid_districts, &inputs.profiles)?;
        aggregated.insert(year, series.len());
    }

    info!(
        seed,
        cells,
        scenarios = aggregated.len(),
        skipped = skipped.len(),
        "Finished household demand disaggregation"
    );

    Ok(RunSummary {
        seed,
        cells,
        aggregated,
        skipped,
    })
}
