use crate::tag::interned_tag;
use dashmap::DashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, LazyLock};

/// Reservation payment class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Utilization {
    Fixed,
    Heavy,
    HeavyPartial,
    Light,
    Medium,
}

impl Utilization {
    /// Classes that take part in amortization.
    pub const ACTIVE: [Utilization; 3] = [
        Utilization::Fixed,
        Utilization::Heavy,
        Utilization::HeavyPartial,
    ];
    pub const ALL: [Utilization; 5] = [
        Utilization::Fixed,
        Utilization::Heavy,
        Utilization::HeavyPartial,
        Utilization::Light,
        Utilization::Medium,
    ];

    pub fn is_legacy(self) -> bool {
        matches!(self, Utilization::Light | Utilization::Medium)
    }

    pub fn label(self) -> &'static str {
        match self {
            Utilization::Fixed => "All Upfront",
            Utilization::Heavy => "No Upfront",
            Utilization::HeavyPartial => "Partial Upfront",
            Utilization::Light => "Light Utilization",
            Utilization::Medium => "Medium Utilization",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Utilization::Fixed => "FIXED",
            Utilization::Heavy => "HEAVY",
            Utilization::HeavyPartial => "HEAVY_PARTIAL",
            Utilization::Light => "LIGHT",
            Utilization::Medium => "MEDIUM",
        }
    }

    /// Parses a configuration code (`HEAVY_PARTIAL`) or a billing label
    /// (`Partial Upfront`).
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|u| u.code().eq_ignore_ascii_case(value) || u.label().eq_ignore_ascii_case(value))
    }

    /// Reads the utilization out of a reserved line item description.
    pub fn from_description(description: &str) -> Option<Self> {
        let lower = description.to_ascii_lowercase();
        if lower.contains("partial upfront") || lower.contains("heavy utilization partial") {
            Some(Utilization::HeavyPartial)
        } else if lower.contains("no upfront") || lower.contains("heavy utilization") {
            Some(Utilization::Heavy)
        } else if lower.contains("all upfront") || lower.contains("fixed") {
            Some(Utilization::Fixed)
        } else if lower.contains("light utilization") {
            Some(Utilization::Light)
        } else if lower.contains("medium utilization") {
            Some(Utilization::Medium)
        } else {
            None
        }
    }

    fn index(self) -> usize {
        match self {
            Utilization::Fixed => 0,
            Utilization::Heavy => 1,
            Utilization::HeavyPartial => 2,
            Utilization::Light => 3,
            Utilization::Medium => 4,
        }
    }

    fn cluster_seq(self) -> Option<u32> {
        match self {
            Utilization::Heavy => Some(3),
            Utilization::HeavyPartial => Some(11),
            Utilization::Fixed => Some(19),
            Utilization::Light | Utilization::Medium => None,
        }
    }
}

impl fmt::Display for Utilization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Per-utilization reservation operation kinds, in catalog order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReservationKind {
    Savings,
    Used,
    Family,
    Bonus,
    Borrowed,
    Lent,
    Unused,
    UpfrontAmortized,
}

impl ReservationKind {
    pub const ALL: [ReservationKind; 8] = [
        ReservationKind::Savings,
        ReservationKind::Used,
        ReservationKind::Family,
        ReservationKind::Bonus,
        ReservationKind::Borrowed,
        ReservationKind::Lent,
        ReservationKind::Unused,
        ReservationKind::UpfrontAmortized,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

// Rows follow `Utilization::index`, columns follow `ReservationKind`.
const RESERVATION_NAMES: [[&str; 8]; 5] = [
    [
        "Savings - All Upfront",
        "Used RIs - All Upfront",
        "Family RIs - All Upfront",
        "Bonus RIs - All Upfront",
        "Borrowed RIs - All Upfront",
        "Lent RIs - All Upfront",
        "Unused RIs - All Upfront",
        "Amortized RIs - All Upfront",
    ],
    [
        "Savings - No Upfront",
        "Used RIs - No Upfront",
        "Family RIs - No Upfront",
        "Bonus RIs - No Upfront",
        "Borrowed RIs - No Upfront",
        "Lent RIs - No Upfront",
        "Unused RIs - No Upfront",
        "Amortized RIs - No Upfront",
    ],
    [
        "Savings - Partial Upfront",
        "Used RIs - Partial Upfront",
        "Family RIs - Partial Upfront",
        "Bonus RIs - Partial Upfront",
        "Borrowed RIs - Partial Upfront",
        "Lent RIs - Partial Upfront",
        "Unused RIs - Partial Upfront",
        "Amortized RIs - Partial Upfront",
    ],
    [
        "Savings - Light Utilization",
        "Used RIs - Light Utilization",
        "Family RIs - Light Utilization",
        "Bonus RIs - Light Utilization",
        "Borrowed RIs - Light Utilization",
        "Lent RIs - Light Utilization",
        "Unused RIs - Light Utilization",
        "Amortized RIs - Light Utilization",
    ],
    [
        "Savings - Medium Utilization",
        "Used RIs - Medium Utilization",
        "Family RIs - Medium Utilization",
        "Bonus RIs - Medium Utilization",
        "Borrowed RIs - Medium Utilization",
        "Lent RIs - Medium Utilization",
        "Unused RIs - Medium Utilization",
        "Amortized RIs - Medium Utilization",
    ],
];

const SPOT_SAVINGS_NAME: &str = "Savings - Spot";
const SPOT_NAME: &str = "Spot Instances";
const ON_DEMAND_NAME: &str = "On-Demand Instances";
const EMPTY_OPERATION_NAME: &str = "None";

interned_tag!(
    /// Operation name outside the reservation catalog.
    GenericOperation
);

/// Billing operation dimension.
///
/// Catalog operations carry a sequence number that places them before every
/// generic operation; generic operations sort alphabetically after them.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    SpotSavings,
    Spot,
    OnDemand,
    Reserved(ReservationKind, Utilization),
    Generic(GenericOperation),
}

static CATALOG: LazyLock<HashMap<&'static str, Operation>> = LazyLock::new(|| {
    let mut catalog = HashMap::new();
    catalog.insert(SPOT_SAVINGS_NAME, Operation::SpotSavings);
    catalog.insert(SPOT_NAME, Operation::Spot);
    catalog.insert(ON_DEMAND_NAME, Operation::OnDemand);
    for utilization in Utilization::ALL {
        for kind in ReservationKind::ALL {
            let operation = Operation::Reserved(kind, utilization);
            catalog.insert(operation.name_static(), operation);
        }
    }
    catalog
});

impl Operation {
    /// Looks up a catalog operation by name or interns a generic one.
    /// An empty name maps to `None`.
    pub fn get(name: &str) -> Self {
        let name = if name.trim().is_empty() { EMPTY_OPERATION_NAME } else { name };
        if let Some(operation) = CATALOG.get(name) {
            return operation.clone();
        }
        Operation::Generic(GenericOperation::intern(name))
    }

    pub fn reserved(kind: ReservationKind, utilization: Utilization) -> Self {
        Operation::Reserved(kind, utilization)
    }

    fn name_static(&self) -> &'static str {
        match self {
            Operation::SpotSavings => SPOT_SAVINGS_NAME,
            Operation::Spot => SPOT_NAME,
            Operation::OnDemand => ON_DEMAND_NAME,
            Operation::Reserved(kind, utilization) => {
                RESERVATION_NAMES[utilization.index()][kind.index()]
            }
            Operation::Generic(_) => EMPTY_OPERATION_NAME,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Operation::Generic(generic) => generic.name(),
            other => other.name_static(),
        }
    }

    pub fn seq(&self) -> u32 {
        match self {
            Operation::SpotSavings => 0,
            Operation::Spot => 1,
            Operation::OnDemand => 2,
            Operation::Reserved(kind, utilization) => utilization
                .cluster_seq()
                .map(|base| base + kind.index() as u32)
                .unwrap_or(u32::MAX),
            Operation::Generic(_) => u32::MAX,
        }
    }

    pub fn utilization(&self) -> Option<Utilization> {
        match self {
            Operation::Reserved(_, utilization) => Some(*utilization),
            _ => None,
        }
    }

    pub fn reservation_kind(&self) -> Option<ReservationKind> {
        match self {
            Operation::Reserved(kind, _) => Some(*kind),
            _ => None,
        }
    }

    pub fn is_reservation(&self) -> bool {
        !matches!(self, Operation::Generic(_))
    }

    pub fn is_bonus(&self) -> bool {
        matches!(self, Operation::Reserved(ReservationKind::Bonus, _))
    }
}

impl PartialOrd for Operation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Operation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seq().cmp(&other.seq()).then_with(|| self.name().cmp(other.name()))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Operation({})", self.name())
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Operation::get(&name))
    }
}
