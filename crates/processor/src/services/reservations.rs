use std::fs;
use std::path::Path;

use billing_core::{
    Account, OnDemandRates, Region, Reservation, ReservationService, UsageType, Utilization, Zone,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::error::{ProcessorError, Result};

#[derive(Debug, Default, Deserialize)]
struct InventoryFile {
    #[serde(default)]
    reservations: Vec<ReservationEntry>,
    #[serde(default)]
    on_demand_rates: Vec<RateEntry>,
}

#[derive(Debug, Deserialize)]
struct ReservationEntry {
    offering_id: String,
    account: String,
    region: String,
    #[serde(default)]
    zone: Option<String>,
    usage_type: String,
    utilization: String,
    count: f64,
    #[serde(default)]
    fixed_price: f64,
    #[serde(default)]
    hourly_price: f64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RateEntry {
    region: String,
    usage_type: String,
    rate: f64,
}

/// Reservation inventory read from a JSON file:
///
/// ```json
/// {
///   "reservations": [{"offering_id": "r-1", "account": "A1", "region": "us-east-1",
///                     "zone": null, "usage_type": "m5.large", "utilization": "HEAVY_PARTIAL",
///                     "count": 1, "fixed_price": 876.0, "hourly_price": 0.05,
///                     "start": "2024-01-01T00:00:00Z", "end": "2025-01-01T00:00:00Z"}],
///   "on_demand_rates": [{"region": "us-east-1", "usage_type": "m5.large", "rate": 0.1}]
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct FileReservationService {
    reservations: Vec<Reservation>,
    rates: OnDemandRates,
}

impl FileReservationService {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let service = Self::from_json_str(&contents)?;
        info!(
            path = %path.display(),
            reservations = service.reservations.len(),
            rates = service.rates.len(),
            "loaded reservation inventory"
        );
        Ok(service)
    }

    pub fn from_json_str(contents: &str) -> Result<Self> {
        let file: InventoryFile = serde_json::from_str(contents)?;
        let reservations = file
            .reservations
            .into_iter()
            .map(ReservationEntry::into_reservation)
            .collect::<Result<Vec<_>>>()?;
        let mut rates = OnDemandRates::default();
        for entry in file.on_demand_rates {
            rates.insert(Region::get(&entry.region), UsageType::get(&entry.usage_type), entry.rate);
        }
        Ok(Self { reservations, rates })
    }

    pub fn with_reservations(reservations: Vec<Reservation>) -> Self {
        Self {
            reservations,
            rates: OnDemandRates::default(),
        }
    }

    pub fn with_rate(mut self, region: Region, usage_type: UsageType, rate: f64) -> Self {
        self.rates.insert(region, usage_type, rate);
        self
    }
}

impl ReservationEntry {
    fn into_reservation(self) -> Result<Reservation> {
        let Some(utilization) = Utilization::parse(&self.utilization) else {
            return Err(ProcessorError::UnknownUtilization(self.utilization));
        };
        Ok(Reservation {
            offering_id: self.offering_id,
            account: Account::get(&self.account),
            region: Region::get(&self.region),
            zone: self.zone.as_deref().filter(|zone| !zone.trim().is_empty()).map(Zone::get),
            usage_type: UsageType::get(&self.usage_type),
            utilization,
            count: self.count,
            fixed_price: self.fixed_price,
            hourly_price: self.hourly_price,
            start_millis: self.start.timestamp_millis(),
            end_millis: self.end.timestamp_millis(),
        })
    }
}

impl ReservationService for FileReservationService {
    fn reservations(&self, utilization: Utilization) -> Vec<Reservation> {
        self.reservations
            .iter()
            .filter(|reservation| reservation.utilization == utilization)
            .cloned()
            .collect()
    }

    fn on_demand_rate(&self, region: &Region, usage_type: &UsageType) -> Option<f64> {
        self.rates.get(region, usage_type)
    }
}
