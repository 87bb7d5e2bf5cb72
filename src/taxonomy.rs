//! Maps the census person statistic (family type x household size x age class, per first-level
//! region) onto the household types of the load profile library, and derives per region the
//! share of each household type within its coarse census category.

use crate::config::{NoInfoSplit, RunConfig};
use crate::errors::DisaggregationError;
use crate::household_types::{
    AgeBucket, AgeClass, CoarseCategory, FamilyType, HouseholdSize, HouseholdType,
};
use crate::RegionId;
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use strum::IntoEnumIterator;
use tracing::{debug, info, instrument, warn};

/// Persons living in households, per first-level region and census group.
#[derive(Clone, Debug, Default)]
pub struct DemographicSource {
    regions: IndexMap<RegionId, HashMap<(FamilyType, HouseholdSize, AgeClass), f64>>,
}

impl DemographicSource {
    pub fn new() -> Self {
        Default::default()
    }

    /// Add persons to a group, accumulating if the group was already seen.
    pub fn add(
        &mut self,
        region: RegionId,
        family_type: FamilyType,
        household_size: HouseholdSize,
        age_class: AgeClass,
        persons: f64,
    ) {
        *self
            .regions
            .entry(region)
            .or_default()
            .entry((family_type, household_size, age_class))
            .or_default() += persons;
    }

    pub fn persons(
        &self,
        region: &str,
        family_type: FamilyType,
        household_size: HouseholdSize,
        age_class: AgeClass,
    ) -> f64 {
        self.regions
            .get(region)
            .and_then(|groups| groups.get(&(family_type, household_size, age_class)))
            .copied()
            .unwrap_or_default()
    }

    pub fn regions(&self) -> impl Iterator<Item = &RegionId> {
        self.regions.keys()
    }
}

/// Counts (persons or households, depending on the step) per region and household type.
pub type HouseholdTypeCounts = IndexMap<RegionId, IndexMap<HouseholdType, f64>>;

pub fn classify_age(age_class: AgeClass) -> AgeBucket {
    match age_class {
        AgeClass::Under3 | AgeClass::From3To5 | AgeClass::From6To14 => AgeBucket::Kids,
        AgeClass::From15To17
        | AgeClass::From18To24
        | AgeClass::From25To29
        | AgeClass::From30To39
        | AgeClass::From40To49
        | AgeClass::From50To64 => AgeBucket::Adults,
        AgeClass::From65To74 | AgeClass::From75 => AgeBucket::Seniors,
    }
}

/// Sums persons of the census groups mapping onto each household type.
///
/// Kids are dropped since the load profiles do not model them. With `multi_person_adjustment`
/// the adults-only multi-person type is reduced to the share of households without kids given by
/// `split`; the shares with kids belong to profile categories outside the ten household types.
pub fn aggregate_to_household_types(
    source: &DemographicSource,
    multi_person_adjustment: bool,
    split: &NoInfoSplit,
) -> HouseholdTypeCounts {
    source
        .regions
        .iter()
        .map(|(region, groups)| {
            let mut by_bucket: HashMap<(FamilyType, HouseholdSize, AgeBucket), f64> =
                HashMap::new();
            for ((family_type, household_size, age_class), persons) in groups {
                match classify_age(*age_class) {
                    AgeBucket::Kids => continue,
                    bucket => {
                        *by_bucket
                            .entry((*family_type, *household_size, bucket))
                            .or_default() += persons
                    }
                }
            }

            let counts = HouseholdType::iter()
                .map(|household_type| {
                    let persons: f64 = household_type
                        .source_groups()
                        .iter()
                        .map(|group| by_bucket.get(group).copied().unwrap_or_default())
                        .sum();
                    let adjust = match household_type {
                        HouseholdType::MultiPersonAdult if multi_person_adjustment => {
                            split.without_kids
                        }
                        _ => 1.,
                    };
                    (household_type, adjust * persons)
                })
                .collect();

            (region.clone(), counts)
        })
        .collect()
}

/// Assumed number of persons (kids excluded) per household of each type.
#[derive(Clone, Debug)]
pub struct PeoplePerHousehold(IndexMap<HouseholdType, f64>);

impl PeoplePerHousehold {
    /// Singles and couples are exact; multi-person households use the estimated average size.
    pub fn with_multi_person_size(multi_person_size: f64) -> Self {
        use HouseholdType::*;

        Self(IndexMap::from([
            (SingleSenior, 1.),
            (SingleAdult, 1.),
            (SingleParent, 1.),
            (CoupleSenior, 2.),
            (CoupleAdult, 2.),
            (CoupleWithKidsThreePersons, 2.),
            (CoupleWithKidsFourPersons, 2.),
            (CoupleWithKidsFivePlusPersons, 2.),
            (MultiPersonSenior, multi_person_size),
            (MultiPersonAdult, multi_person_size),
        ]))
    }

    pub fn from_map(map: IndexMap<HouseholdType, f64>) -> Self {
        Self(map)
    }

    pub fn get(&self, household_type: HouseholdType) -> Option<f64> {
        self.0.get(&household_type).copied()
    }
}

/// Average size of households with three or more persons, weighting each size class by its
/// number of households. Smaller classes are ignored as they cannot be multi-person households
/// without a core family.
pub fn estimate_multi_person_size(
    size_distribution: &IndexMap<HouseholdSize, f64>,
) -> Result<f64, DisaggregationError> {
    let (weighted, total) = size_distribution
        .iter()
        .filter_map(|(size, households)| {
            size.persons()
                .filter(|persons| *persons >= 3)
                .map(|persons| (persons as f64 * households, *households))
        })
        .fold((0., 0.), |(weighted, total), (w, h)| (weighted + w, total + h));

    if total <= 0. {
        return Err(DisaggregationError::EmptySizeDistribution);
    }

    Ok(weighted / total)
}

/// Converts persons per household type into whole households, rounding up so that sampling
/// pools are never under-provisioned.
pub fn people_to_households(
    counts: &HouseholdTypeCounts,
    people_per_household: &PeoplePerHousehold,
) -> HouseholdTypeCounts {
    counts
        .iter()
        .map(|(region, persons_by_type)| {
            let households = persons_by_type
                .iter()
                .filter_map(|(household_type, persons)| {
                    match people_per_household.get(*household_type) {
                        Some(size) => Some((*household_type, (persons / size).ceil())),
                        None => {
                            warn!(
                                %region,
                                household_type = household_type.code(),
                                "No household size assumed for household type, removed from mapping"
                            );
                            None
                        }
                    }
                })
                .collect();
            (region.clone(), households)
        })
        .collect()
}

/// Fraction of each household type within its coarse category, per first-level region.
#[derive(Clone, Debug, Default)]
pub struct RegionalTypeShare {
    shares: IndexMap<(RegionId, CoarseCategory), IndexMap<HouseholdType, f64>>,
    degenerate: Vec<(RegionId, CoarseCategory)>,
    /// Every region of the census statistic, including those where all groups are degenerate.
    regions: IndexSet<RegionId>,
}

impl RegionalTypeShare {
    /// Shares of the members of `category` in `region`.
    ///
    /// Fails with `UnknownRegion` for a region the census statistic does not cover at all, and
    /// with `DegenerateGroup` for a covered region without households of the category.
    pub fn group(
        &self,
        region: &RegionId,
        category: CoarseCategory,
    ) -> Result<&IndexMap<HouseholdType, f64>, DisaggregationError> {
        if !self.regions.contains(region) {
            return Err(DisaggregationError::UnknownRegion {
                region: region.clone(),
            });
        }
        self.shares
            .get(&(region.clone(), category))
            .ok_or_else(|| DisaggregationError::DegenerateGroup {
                region: region.clone(),
                category,
            })
    }

    pub fn share(&self, region: &RegionId, household_type: HouseholdType) -> Option<f64> {
        self.group(region, household_type.coarse_category())
            .ok()
            .and_then(|group| group.get(&household_type).copied())
    }

    /// Region and category combinations without any households, for which no shares exist.
    pub fn degenerate_groups(&self) -> &[(RegionId, CoarseCategory)] {
        &self.degenerate
    }

    pub fn regions(&self) -> impl Iterator<Item = &RegionId> {
        self.regions.iter()
    }

    pub fn contains_region(&self, region: &RegionId) -> bool {
        self.regions.contains(region)
    }
}

/// Divides household counts of the members of one coarse category by their sum.
pub fn normalize_group(
    region: &RegionId,
    category: CoarseCategory,
    households: &IndexMap<HouseholdType, f64>,
) -> Result<IndexMap<HouseholdType, f64>, DisaggregationError> {
    let members = category.members();
    let total: f64 = members
        .iter()
        .map(|member| households.get(member).copied().unwrap_or_default())
        .sum();

    if total <= 0. || !total.is_finite() {
        return Err(DisaggregationError::DegenerateGroup {
            region: region.clone(),
            category,
        });
    }

    Ok(members
        .iter()
        .map(|member| {
            (
                *member,
                households.get(member).copied().unwrap_or_default() / total,
            )
        })
        .collect())
}

/// Normalizes every coarse group of every region. Groups without households are recorded as
/// degenerate and left out, so later lookups for them fail with `DegenerateGroup`.
pub fn normalize_within_coarse_group(household_counts: &HouseholdTypeCounts) -> RegionalTypeShare {
    let mut regional_share = RegionalTypeShare::default();

    for (region, households) in household_counts {
        regional_share.regions.insert(region.clone());
        for category in CoarseCategory::iter() {
            match normalize_group(region, category, households) {
                Ok(shares) => {
                    regional_share
                        .shares
                        .insert((region.clone(), category), shares);
                }
                Err(e) => {
                    warn!("{e}; cells of this combination will be skipped");
                    regional_share.degenerate.push((region.clone(), category));
                }
            }
        }
    }

    regional_share
}

/// Runs the whole mapping from the census person statistic to regional type shares.
#[instrument(skip_all)]
pub fn map_taxonomy(
    source: &DemographicSource,
    size_distribution: &IndexMap<HouseholdSize, f64>,
    config: &RunConfig,
) -> Result<RegionalTypeShare, DisaggregationError> {
    if config.multi_person_adjustment {
        debug!(
            without_kids = config.no_info_split.without_kids,
            "Reducing adults-only multi-person households to the share without kids"
        );
    }
    let persons = aggregate_to_household_types(
        source,
        config.multi_person_adjustment,
        &config.no_info_split,
    );

    let multi_person_size = estimate_multi_person_size(size_distribution)?;
    debug!(multi_person_size, "Estimated persons per multi-person household");

    let households = people_to_households(
        &persons,
        &PeoplePerHousehold::with_multi_person_size(multi_person_size),
    );
    let shares = normalize_within_coarse_group(&households);

    info!(
        regions = households.len(),
        degenerate_groups = shares.degenerate.len(),
        "Mapped census household statistic onto household types"
    );

    Ok(shares)
}
