use crate::household_types::{CoarseCategory, HouseholdType};
use crate::{CellId, ProfileId, RegionId};
use thiserror::Error;

/// Top-level error returned at a stage boundary, for the orchestration layer to decide whether
/// to abort the run or skip a scenario year.
#[derive(Debug, Error)]
pub enum HhDemandError {
    #[error("Input was considered invalid due to error: {0}")]
    InvalidInput(#[from] anyhow::Error),
    #[error("Error identified during stage {stage}: {source}")]
    FailureInStage {
        stage: RunStage,
        #[source]
        source: DisaggregationError,
    },
    #[error("Stage {requested} cannot run while the run is in state {current}")]
    StageOrder {
        requested: RunStage,
        current: RunStage,
    },
    #[error("Could not persist artifact {artifact}: {source}")]
    Persistence {
        artifact: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("Scenario year {year} was skipped: {source}")]
    ScenarioSkipped {
        year: u32,
        #[source]
        source: DisaggregationError,
    },
}

impl HhDemandError {
    pub(crate) fn in_stage(stage: RunStage) -> impl FnOnce(DisaggregationError) -> Self {
        move |source| Self::FailureInStage { stage, source }
    }

    pub(crate) fn persisting(artifact: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| Self::Persistence { artifact, source }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum RunStage {
    #[strum(to_string = "INIT")]
    Init,
    #[strum(to_string = "TAXONOMY_MAPPED")]
    TaxonomyMapped,
    #[strum(to_string = "CELLS_BUILT")]
    CellsBuilt,
    #[strum(to_string = "SAMPLED")]
    Sampled,
    #[strum(to_string = "RECONCILED")]
    Reconciled,
    #[strum(to_string = "AGGREGATED")]
    Aggregated,
}

/// Failures raised by the disaggregation components themselves.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum DisaggregationError {
    #[error("No households of coarse category {category} exist in region {region}, so shares within the group are undefined")]
    DegenerateGroup {
        region: RegionId,
        category: CoarseCategory,
    },
    #[error("Region {region} is not covered by the census household statistic, so its households cannot be assigned household types")]
    UnknownRegion { region: RegionId },
    #[error("Cell {cell_id} needs {requested} distinct {household_type} profiles but the pool only holds {available}; revisit the assumed people-per-household ratios")]
    InsufficientPool {
        cell_id: CellId,
        household_type: HouseholdType,
        requested: usize,
        available: usize,
    },
    #[error("No annual demand reference exists for region {region} in scenario year {year}")]
    MissingReference { region: RegionId, year: u32 },
    #[error("Cell {cell_id} references profile {household_type}:{profile_id}, which does not exist in the profile pool")]
    MalformedReference {
        cell_id: CellId,
        household_type: HouseholdType,
        profile_id: ProfileId,
    },
    #[error("Cell {cell_id} has no scaling factor for scenario year {year}")]
    UnreconciledCell { cell_id: CellId, year: u32 },
    #[error("Profiles referenced by cells of region {region} sum to zero energy, so no scaling factor can be derived")]
    EmptyRegion { region: RegionId },
    #[error("Scaling factor {factor} for region {region} in scenario year {year} is not strictly positive and finite")]
    NonPositiveFactor {
        region: RegionId,
        year: u32,
        factor: f64,
    },
    #[error("Profile {household_type}:{profile_id} has {actual} timesteps where {expected} were expected")]
    ProfileLengthMismatch {
        household_type: HouseholdType,
        profile_id: ProfileId,
        expected: usize,
        actual: usize,
    },
    #[error("Profile ids for household type {household_type} must run contiguously from 0 but {missing} is missing")]
    ProfileIdGap {
        household_type: HouseholdType,
        missing: ProfileId,
    },
    #[error("Profile {household_type}:{profile_id} appears more than once in the profile library")]
    DuplicateProfile {
        household_type: HouseholdType,
        profile_id: ProfileId,
    },
    #[error("Household size distribution holds no households of three or more persons")]
    EmptySizeDistribution,
}
