//! Household categories on both sides of the mapping: the census source (family type, household
//! size and age class of its members) and the ten household types for which representative load
//! profiles exist.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// The ten household types distinguished by the load profile library.
///
/// Children are not modelled by the profiles, so types with children only differ by the number of
/// adults in the household and the household size band.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    Eq,
    Hash,
    IntoStaticStr,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub enum HouseholdType {
    /// Single senior, including senior single parents
    #[serde(rename = "SR")]
    #[strum(serialize = "SR")]
    SingleSenior,
    #[serde(rename = "SO")]
    #[strum(serialize = "SO")]
    SingleAdult,
    #[serde(rename = "SK")]
    #[strum(serialize = "SK")]
    SingleParent,
    #[serde(rename = "PR")]
    #[strum(serialize = "PR")]
    CoupleSenior,
    #[serde(rename = "PO")]
    #[strum(serialize = "PO")]
    CoupleAdult,
    #[serde(rename = "P1")]
    #[strum(serialize = "P1")]
    CoupleWithKidsThreePersons,
    #[serde(rename = "P2")]
    #[strum(serialize = "P2")]
    CoupleWithKidsFourPersons,
    #[serde(rename = "P3")]
    #[strum(serialize = "P3")]
    CoupleWithKidsFivePlusPersons,
    #[serde(rename = "OR")]
    #[strum(serialize = "OR")]
    MultiPersonSenior,
    #[serde(rename = "OO")]
    #[strum(serialize = "OO")]
    MultiPersonAdult,
}

impl HouseholdType {
    pub fn code(&self) -> &'static str {
        self.into()
    }

    pub fn coarse_category(&self) -> CoarseCategory {
        match self {
            Self::SingleSenior | Self::SingleAdult => CoarseCategory::SinglePerson,
            Self::CoupleSenior | Self::CoupleAdult => CoarseCategory::CoupleWithoutKids,
            Self::SingleParent => CoarseCategory::SingleParent,
            Self::CoupleWithKidsThreePersons
            | Self::CoupleWithKidsFourPersons
            | Self::CoupleWithKidsFivePlusPersons => CoarseCategory::CoupleWithKids,
            Self::MultiPersonSenior | Self::MultiPersonAdult => CoarseCategory::MultiPerson,
        }
    }

    /// Source groups (family type, household size, age bucket) whose persons are counted towards
    /// this household type.
    pub fn source_groups(&self) -> &'static [(FamilyType, HouseholdSize, AgeBucket)] {
        use AgeBucket::*;
        use FamilyType::*;
        use HouseholdSize::*;

        match self {
            Self::SingleSenior => &[
                (SinglePerson, Total, Seniors),
                (SingleParent, Total, Seniors),
            ],
            Self::SingleAdult => &[(SinglePerson, Total, Adults)],
            Self::SingleParent => &[(SingleParent, Total, Adults)],
            Self::CoupleSenior => &[
                (CoupleWithoutKids, Two, Seniors),
                (MultiPersonNoCoreFamily, Two, Seniors),
            ],
            Self::CoupleAdult => &[
                (CoupleWithoutKids, Two, Adults),
                (MultiPersonNoCoreFamily, Two, Adults),
            ],
            Self::CoupleWithKidsThreePersons => &[(CoupleWithKids, Three, Adults)],
            Self::CoupleWithKidsFourPersons => &[(CoupleWithKids, Four, Adults)],
            Self::CoupleWithKidsFivePlusPersons => &[
                (CoupleWithKids, Five, Adults),
                (CoupleWithKids, SixOrMore, Adults),
            ],
            Self::MultiPersonSenior => &[
                (MultiPersonNoCoreFamily, Three, Seniors),
                (MultiPersonNoCoreFamily, Four, Seniors),
                (MultiPersonNoCoreFamily, Five, Seniors),
                (MultiPersonNoCoreFamily, SixOrMore, Seniors),
                (CoupleWithKids, Three, Seniors),
                (CoupleWithoutKids, Three, Seniors),
                (CoupleWithKids, Four, Seniors),
                (CoupleWithoutKids, Four, Seniors),
                (CoupleWithKids, Five, Seniors),
                (CoupleWithoutKids, Five, Seniors),
                (CoupleWithKids, SixOrMore, Seniors),
                (CoupleWithoutKids, SixOrMore, Seniors),
            ],
            // the census gives no share of kids for these groups, see `NoInfoSplit`
            Self::MultiPersonAdult => &[
                (MultiPersonNoCoreFamily, Three, Adults),
                (MultiPersonNoCoreFamily, Four, Adults),
                (MultiPersonNoCoreFamily, Five, Adults),
                (MultiPersonNoCoreFamily, SixOrMore, Adults),
                (CoupleWithoutKids, Three, Adults),
                (CoupleWithoutKids, Four, Adults),
                (CoupleWithoutKids, Five, Adults),
                (CoupleWithoutKids, SixOrMore, Adults),
            ],
        }
    }
}

/// The five household categories counted per cell by the census grid data (`HHTYP_FAM`).
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    EnumIter,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub enum CoarseCategory {
    #[strum(to_string = "single person")]
    SinglePerson,
    #[strum(to_string = "couple without kids")]
    CoupleWithoutKids,
    #[strum(to_string = "single parent")]
    SingleParent,
    #[strum(to_string = "couple with kids")]
    CoupleWithKids,
    #[strum(to_string = "multi person")]
    MultiPerson,
}

impl CoarseCategory {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::SinglePerson),
            2 => Some(Self::CoupleWithoutKids),
            3 => Some(Self::SingleParent),
            4 => Some(Self::CoupleWithKids),
            5 => Some(Self::MultiPerson),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::SinglePerson => 1,
            Self::CoupleWithoutKids => 2,
            Self::SingleParent => 3,
            Self::CoupleWithKids => 4,
            Self::MultiPerson => 5,
        }
    }

    pub fn members(&self) -> &'static [HouseholdType] {
        use HouseholdType::*;

        match self {
            Self::SinglePerson => &[SingleSenior, SingleAdult],
            Self::CoupleWithoutKids => &[CoupleSenior, CoupleAdult],
            Self::SingleParent => &[SingleParent],
            Self::CoupleWithKids => &[
                CoupleWithKidsThreePersons,
                CoupleWithKidsFourPersons,
                CoupleWithKidsFivePlusPersons,
            ],
            Self::MultiPerson => &[MultiPersonSenior, MultiPersonAdult],
        }
    }
}

/// Family type ("Typ des privaten Haushalts") of the census person statistic.
#[derive(Clone, Copy, Debug, Display, EnumIter, EnumString, Eq, Hash, PartialEq)]
pub enum FamilyType {
    #[strum(
        to_string = "single_person",
        serialize = "Einpersonenhaushalte (Singlehaushalte)"
    )]
    SinglePerson,
    #[strum(to_string = "single_parent", serialize = "Alleinerziehende Elternteile")]
    SingleParent,
    #[strum(to_string = "couple_without_kids", serialize = "Paare ohne Kind(er)")]
    CoupleWithoutKids,
    #[strum(to_string = "couple_with_kids", serialize = "Paare mit Kind(ern)")]
    CoupleWithKids,
    #[strum(
        to_string = "multi_person_no_core_family",
        serialize = "Mehrpersonenhaushalte ohne Kernfamilie"
    )]
    MultiPersonNoCoreFamily,
}

/// Household size class of the census statistics.
#[derive(Clone, Copy, Debug, Display, EnumIter, EnumString, Eq, Hash, PartialEq)]
pub enum HouseholdSize {
    #[strum(to_string = "total", serialize = "Insgesamt")]
    Total,
    #[strum(to_string = "1", serialize = "1 Person")]
    One,
    #[strum(to_string = "2", serialize = "2 Personen")]
    Two,
    #[strum(to_string = "3", serialize = "3 Personen")]
    Three,
    #[strum(to_string = "4", serialize = "4 Personen")]
    Four,
    #[strum(to_string = "5", serialize = "5 Personen")]
    Five,
    #[strum(to_string = "6+", serialize = "6 und mehr Personen")]
    SixOrMore,
}

impl HouseholdSize {
    /// Number of persons assumed for the size class when estimating average household sizes.
    /// The open-ended class counts as six.
    pub fn persons(&self) -> Option<u32> {
        match self {
            Self::Total => None,
            Self::One => Some(1),
            Self::Two => Some(2),
            Self::Three => Some(3),
            Self::Four => Some(4),
            Self::Five => Some(5),
            Self::SixOrMore => Some(6),
        }
    }
}

/// Age class of the census person statistic (11 classes).
#[derive(Clone, Copy, Debug, Display, EnumIter, EnumString, Eq, Hash, PartialEq)]
pub enum AgeClass {
    #[strum(to_string = "under_3", serialize = "Unter 3")]
    Under3,
    #[strum(to_string = "3-5", serialize = "3 - 5")]
    From3To5,
    #[strum(to_string = "6-14", serialize = "6 - 14")]
    From6To14,
    #[strum(to_string = "15-17", serialize = "15 - 17")]
    From15To17,
    #[strum(to_string = "18-24", serialize = "18 - 24")]
    From18To24,
    #[strum(to_string = "25-29", serialize = "25 - 29")]
    From25To29,
    #[strum(to_string = "30-39", serialize = "30 - 39")]
    From30To39,
    #[strum(to_string = "40-49", serialize = "40 - 49")]
    From40To49,
    #[strum(to_string = "50-64", serialize = "50 - 64")]
    From50To64,
    #[strum(to_string = "65-74", serialize = "65 - 74")]
    From65To74,
    #[strum(to_string = "75+", serialize = "75 und älter")]
    From75,
}

#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum AgeBucket {
    Kids,
    Adults,
    Seniors,
}
