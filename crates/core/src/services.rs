use crate::operation::Utilization;
use crate::tag::{Account, Product, Region, ResourceGroup, UsageType, Zone};
use crate::time::HOUR_MILLIS;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Account directory.
pub trait AccountService: Send + Sync {
    fn account(&self, id: &str) -> Account;

    /// Accounts that own reservations.
    fn reservation_owners(&self) -> Vec<Account> {
        Vec::new()
    }
}

/// Uses the billing account id as the account name.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughAccounts;

impl AccountService for PassthroughAccounts {
    fn account(&self, id: &str) -> Account {
        Account::get(id)
    }
}

/// What the resource-tag classifier sees of a row.
#[derive(Debug, Clone, Copy)]
pub struct ResourceContext<'a> {
    pub account: &'a Account,
    pub region: &'a Region,
    pub product: &'a Product,
    pub resource_id: &'a str,
    pub user_tags: &'a [(String, String)],
}

pub trait ResourceService: Send + Sync {
    fn resource_group(&self, context: &ResourceContext<'_>) -> Option<ResourceGroup>;

    /// Persists anything learned during a run.
    fn commit(&self) {}
}

/// One reservation held by an owner account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub offering_id: String,
    pub account: Account,
    pub region: Region,
    pub zone: Option<Zone>,
    pub usage_type: UsageType,
    pub utilization: Utilization,
    pub count: f64,
    pub fixed_price: f64,
    pub hourly_price: f64,
    pub start_millis: i64,
    pub end_millis: i64,
}

impl Reservation {
    pub fn term_hours(&self) -> f64 {
        (self.end_millis - self.start_millis) as f64 / HOUR_MILLIS as f64
    }

    pub fn is_active(&self, hour_start_millis: i64) -> bool {
        self.start_millis <= hour_start_millis && hour_start_millis < self.end_millis
    }

    /// Upfront payment spread over the term, for the whole reservation.
    pub fn amortized_upfront_per_hour(&self) -> f64 {
        let term = self.term_hours();
        if term <= 0.0 {
            return 0.0;
        }
        self.count * self.fixed_price / term
    }

    /// Upfront share of a single reserved unit for one hour.
    pub fn upfront_per_unit_hour(&self) -> f64 {
        let term = self.term_hours();
        if term <= 0.0 {
            return 0.0;
        }
        self.fixed_price / term
    }
}

pub trait ReservationService: Send + Sync {
    fn reservations(&self, utilization: Utilization) -> Vec<Reservation>;

    /// Catalog price used when the month's billing rows carried no
    /// on-demand rate for the pair.
    fn on_demand_rate(&self, _region: &Region, _usage_type: &UsageType) -> Option<f64> {
        None
    }
}

/// On-demand hourly unit prices observed during one run.
#[derive(Debug, Clone, Default)]
pub struct OnDemandRates {
    rates: HashMap<(Region, UsageType), f64>,
}

impl OnDemandRates {
    pub fn insert(&mut self, region: Region, usage_type: UsageType, rate: f64) {
        if rate.is_finite() && rate > 0.0 {
            self.rates.insert((region, usage_type), rate);
        }
    }

    pub fn get(&self, region: &Region, usage_type: &UsageType) -> Option<f64> {
        self.rates.get(&(region.clone(), usage_type.clone())).copied()
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}
