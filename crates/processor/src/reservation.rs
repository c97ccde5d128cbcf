use std::collections::HashMap;

use billing_core::time::HOUR_MILLIS;
use billing_core::{
    Account, OnDemandRates, Operation, Product, ReadWriteData, Reservation, ReservationKind,
    ReservationService, RunData, TagGroup, TagGroupFields, UsageType, Utilization,
};
use tracing::{debug, info, warn};

use crate::error::{ProcessorError, Result};

/// Values smaller than this are noise from the redistribution arithmetic.
pub const CLAMP_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AmortizationSummary {
    pub reservations: usize,
    pub covered_units: f64,
    pub borrowed_units: f64,
    pub family_units: f64,
    pub unused_units: f64,
}

impl AmortizationSummary {
    fn merge(&mut self, other: AmortizationSummary) {
        self.reservations += other.reservations;
        self.covered_units += other.covered_units;
        self.borrowed_units += other.borrowed_units;
        self.family_units += other.family_units;
        self.unused_units += other.unused_units;
    }
}

/// Runs the amortization pass for every active utilization over the
/// aggregate cubes, and over the `ec2_instance` cubes when the run keeps
/// per-product data. Legacy utilizations are left untouched. When `owners`
/// is not empty only reservations held by those accounts are applied.
pub fn amortize_run(
    run: &mut RunData,
    service: &dyn ReservationService,
    owners: &[Account],
) -> Result<AmortizationSummary> {
    let start_millis = run.month_start_millis();
    let processor = ReservationProcessor::new(service, &run.ondemand_rates).with_owners(owners);
    let mut summary = AmortizationSummary::default();
    for utilization in Utilization::ACTIVE {
        let pass =
            processor.process(utilization, run.usage.all_mut(), run.cost.all_mut(), start_millis)?;
        summary.merge(pass);
    }

    let instance_product = Product::ec2_instance();
    if let (Some(usage), Some(cost)) = (
        run.usage.product_mut(&instance_product),
        run.cost.product_mut(&instance_product),
    ) {
        for utilization in Utilization::ACTIVE {
            processor.process(utilization, usage, cost, start_millis)?;
        }
    }
    info!(
        month = %billing_core::time::month_label(run.month),
        reservations = summary.reservations,
        covered = summary.covered_units,
        borrowed = summary.borrowed_units,
        family = summary.family_units,
        unused = summary.unused_units,
        "amortized reservations"
    );
    Ok(summary)
}

/// Rewrites reserved-instance lines of one utilization against the
/// reservation inventory.
pub struct ReservationProcessor<'a> {
    service: &'a dyn ReservationService,
    rates: &'a OnDemandRates,
    owners: &'a [Account],
}

impl<'a> ReservationProcessor<'a> {
    pub fn new(service: &'a dyn ReservationService, rates: &'a OnDemandRates) -> Self {
        Self {
            service,
            rates,
            owners: &[],
        }
    }

    /// Restricts the inventory to reservations held by `owners`. An empty
    /// list keeps every reservation.
    pub fn with_owners(mut self, owners: &'a [Account]) -> Self {
        self.owners = owners;
        self
    }

    fn is_owner(&self, account: &Account) -> bool {
        self.owners.is_empty() || self.owners.contains(account)
    }

    pub fn process(
        &self,
        utilization: Utilization,
        usage: &mut ReadWriteData,
        cost: &mut ReadWriteData,
        start_millis: i64,
    ) -> Result<AmortizationSummary> {
        if utilization.is_legacy() {
            return Err(ProcessorError::UnknownUtilization(utilization.code().to_string()));
        }
        let mut reservations: Vec<Reservation> = self
            .service
            .reservations(utilization)
            .into_iter()
            .filter(|reservation| reservation.utilization == utilization && reservation.count > 0.0)
            .filter(|reservation| {
                let owned = self.is_owner(&reservation.account);
                if !owned {
                    warn!(
                        offering = %reservation.offering_id,
                        account = %reservation.account,
                        "reservation held by an account outside the owner list, skipping"
                    );
                }
                owned
            })
            .collect();
        reservations.sort_by(|a, b| {
            a.account
                .cmp(&b.account)
                .then_with(|| b.zone.is_some().cmp(&a.zone.is_some()))
                .then_with(|| a.offering_id.cmp(&b.offering_id))
        });

        let mut summary = AmortizationSummary {
            reservations: reservations.len(),
            ..AmortizationSummary::default()
        };
        let hours = usage.num().max(cost.num());
        for hour in 0..hours {
            let hour_millis = start_millis + hour as i64 * HOUR_MILLIS;
            let active: Vec<&Reservation> = reservations
                .iter()
                .filter(|reservation| reservation.is_active(hour_millis))
                .collect();
            let consumers = consumers_at(utilization, usage, cost, hour);
            if active.is_empty() && consumers.is_empty() {
                continue;
            }
            let mut pass = HourPass::new(utilization, self.rates, self.service, active, consumers);
            pass.allocate();
            summary.merge(pass.write(hour, usage, cost));
        }
        usage.clamp_small(CLAMP_EPSILON);
        cost.clamp_small(CLAMP_EPSILON);
        debug!(
            utilization = %utilization,
            hours,
            reservations = summary.reservations,
            "reservation pass done"
        );
        Ok(summary)
    }
}

#[derive(Debug)]
struct Consumer {
    tag_group: TagGroup,
    units: f64,
    cost: f64,
    remaining: f64,
    family: f64,
    borrowed: f64,
    savings: f64,
}

#[derive(Debug)]
struct Capacity<'r> {
    reservation: &'r Reservation,
    remaining: f64,
    size_factor: Option<f64>,
}

// Used and bonus lines of `utilization` at `hour`, in tag group order.
fn consumers_at(
    utilization: Utilization,
    usage: &ReadWriteData,
    cost: &ReadWriteData,
    hour: usize,
) -> Vec<Consumer> {
    let instance_product = Product::ec2_instance();
    let used = Operation::reserved(ReservationKind::Used, utilization);
    let bonus = Operation::reserved(ReservationKind::Bonus, utilization);
    let Some(data) = usage.data(hour) else {
        return Vec::new();
    };
    let mut consumers: Vec<Consumer> = data
        .iter()
        .filter(|(tag_group, units)| {
            tag_group.product == instance_product
                && (tag_group.operation == used || tag_group.operation == bonus)
                && **units > 0.0
        })
        .map(|(tag_group, units)| Consumer {
            tag_group: tag_group.clone(),
            units: *units,
            cost: cost.value(hour, tag_group),
            remaining: *units,
            family: 0.0,
            borrowed: 0.0,
            savings: 0.0,
        })
        .collect();
    consumers.sort_by(|a, b| a.tag_group.cmp(&b.tag_group));
    consumers
}

struct HourPass<'a, 'r> {
    utilization: Utilization,
    rates: &'a OnDemandRates,
    service: &'a dyn ReservationService,
    capacities: Vec<Capacity<'r>>,
    consumers: Vec<Consumer>,
    lent: HashMap<TagGroup, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Match {
    SameAccount,
    OtherAccount,
    Family,
}

impl<'a, 'r> HourPass<'a, 'r> {
    fn new(
        utilization: Utilization,
        rates: &'a OnDemandRates,
        service: &'a dyn ReservationService,
        active: Vec<&'r Reservation>,
        consumers: Vec<Consumer>,
    ) -> Self {
        let capacities = active
            .into_iter()
            .map(|reservation| Capacity {
                reservation,
                remaining: reservation.count,
                size_factor: size_factor(&reservation.usage_type),
            })
            .collect();
        Self {
            utilization,
            rates,
            service,
            capacities,
            consumers,
            lent: HashMap::new(),
        }
    }

    fn allocate(&mut self) {
        for kind in [Match::SameAccount, Match::OtherAccount, Match::Family] {
            for cap_index in 0..self.capacities.len() {
                for consumer_index in 0..self.consumers.len() {
                    self.try_allocate(kind, cap_index, consumer_index);
                }
            }
        }
    }

    fn try_allocate(&mut self, kind: Match, cap_index: usize, consumer_index: usize) {
        let capacity = &self.capacities[cap_index];
        let consumer = &self.consumers[consumer_index];
        if capacity.remaining <= CLAMP_EPSILON || consumer.remaining <= CLAMP_EPSILON {
            return;
        }
        let reservation = capacity.reservation;
        let fields = consumer.tag_group.fields();
        if reservation.region != fields.region {
            return;
        }
        let same_account = reservation.account == fields.account;
        // Reservation units consumed per consumer unit.
        let ratio = match kind {
            Match::SameAccount | Match::OtherAccount => {
                if same_account != (kind == Match::SameAccount)
                    || reservation.usage_type != fields.usage_type
                    || reservation
                        .zone
                        .as_ref()
                        .is_some_and(|zone| fields.zone.as_ref() != Some(zone))
                {
                    return;
                }
                1.0
            }
            Match::Family => {
                if reservation.zone.is_some()
                    || !same_family(&reservation.usage_type, &fields.usage_type)
                {
                    return;
                }
                match (capacity.size_factor, size_factor(&fields.usage_type)) {
                    (Some(reserved), Some(consumed)) if reserved > 0.0 => consumed / reserved,
                    _ => return,
                }
            }
        };

        let take = consumer.remaining.min(capacity.remaining / ratio);
        if take <= CLAMP_EPSILON {
            return;
        }
        let reserved_units = take * ratio;
        let on_demand = self
            .rates
            .get(&fields.region, &fields.usage_type)
            .or_else(|| self.service.on_demand_rate(&fields.region, &fields.usage_type));
        let savings = on_demand
            .map(|rate| {
                let reserved_rate = reservation.hourly_price + reservation.upfront_per_unit_hour();
                take * rate - reserved_units * reserved_rate
            })
            .unwrap_or(0.0);
        let lent_line = (!same_account).then(|| owner_line(reservation, ReservationKind::Lent));

        let capacity = &mut self.capacities[cap_index];
        capacity.remaining -= reserved_units;
        let consumer = &mut self.consumers[consumer_index];
        consumer.remaining -= take;
        consumer.savings += savings;
        match (kind, same_account) {
            (Match::SameAccount, _) => {}
            (Match::Family, true) => consumer.family += take,
            _ => consumer.borrowed += take,
        }
        if let Some(line) = lent_line {
            *self.lent.entry(line).or_insert(0.0) += reserved_units;
        }
    }

    fn write(
        self,
        hour: usize,
        usage: &mut ReadWriteData,
        cost: &mut ReadWriteData,
    ) -> AmortizationSummary {
        let mut summary = AmortizationSummary::default();
        let mut usage_lines: HashMap<TagGroup, f64> = HashMap::new();
        let mut cost_lines: HashMap<TagGroup, f64> = HashMap::new();
        let add = |lines: &mut HashMap<TagGroup, f64>, tag_group: TagGroup, value: f64| {
            *lines.entry(tag_group).or_insert(0.0) += value;
        };

        for consumer in &self.consumers {
            let covered = consumer.units - consumer.remaining;
            summary.covered_units += covered;
            summary.family_units += consumer.family;
            summary.borrowed_units += consumer.borrowed;
            if covered <= CLAMP_EPSILON {
                continue;
            }
            let unit_cost = consumer.cost / consumer.units;
            let moved = consumer.family + consumer.borrowed;
            let kept = consumer.units - moved;
            usage.put_value(hour, &consumer.tag_group, kept);
            cost.put_value(hour, &consumer.tag_group, kept * unit_cost);
            for (kind, units) in [
                (ReservationKind::Family, consumer.family),
                (ReservationKind::Borrowed, consumer.borrowed),
            ] {
                if units > CLAMP_EPSILON {
                    let line = consumer
                        .tag_group
                        .with_operation(Operation::reserved(kind, self.utilization));
                    add(&mut usage_lines, line.clone(), units);
                    add(&mut cost_lines, line, units * unit_cost);
                }
            }
            if consumer.savings != 0.0 {
                let savings = Operation::reserved(ReservationKind::Savings, self.utilization);
                let line = consumer.tag_group.with_operation(savings);
                add(&mut cost_lines, line, consumer.savings);
            }
        }

        for (line, units) in self.lent {
            add(&mut usage_lines, line, units);
        }

        for capacity in &self.capacities {
            let reservation = capacity.reservation;
            if capacity.remaining > CLAMP_EPSILON {
                summary.unused_units += capacity.remaining;
                let line = owner_line(reservation, ReservationKind::Unused);
                add(&mut usage_lines, line.clone(), capacity.remaining);
                add(&mut cost_lines, line, capacity.remaining * reservation.hourly_price);
            }
            let upfront = reservation.amortized_upfront_per_hour();
            if upfront > 0.0 {
                let line = owner_line(reservation, ReservationKind::UpfrontAmortized);
                add(&mut cost_lines, line, upfront);
            }
        }

        for (line, value) in usage_lines {
            usage.put_value(hour, &line, value);
        }
        for (line, value) in cost_lines {
            cost.put_value(hour, &line, value);
        }
        summary
    }
}

fn owner_line(reservation: &Reservation, kind: ReservationKind) -> TagGroup {
    TagGroup::get(TagGroupFields {
        account: reservation.account.clone(),
        region: reservation.region.clone(),
        zone: reservation.zone.clone(),
        product: Product::ec2_instance(),
        operation: Operation::reserved(kind, reservation.utilization),
        usage_type: reservation.usage_type.clone(),
        resource_group: None,
    })
}

// `m5.large.windows` -> ("m5", "large", "windows")
fn split_usage_type(usage_type: &UsageType) -> Option<(&str, &str, &str)> {
    let name = usage_type.name();
    let (family, rest) = name.split_once('.')?;
    let (size, platform) = rest.split_once('.').unwrap_or((rest, ""));
    Some((family, size, platform))
}

fn same_family(a: &UsageType, b: &UsageType) -> bool {
    match (split_usage_type(a), split_usage_type(b)) {
        (Some((family_a, _, platform_a)), Some((family_b, _, platform_b))) => {
            family_a == family_b && platform_a == platform_b
        }
        _ => false,
    }
}

/// Instance-size normalization factor; `small` is 1.
pub fn size_factor(usage_type: &UsageType) -> Option<f64> {
    let (_, size, _) = split_usage_type(usage_type)?;
    let factor = match size {
        "nano" => 0.25,
        "micro" => 0.5,
        "small" => 1.0,
        "medium" => 2.0,
        "large" => 4.0,
        "xlarge" => 8.0,
        other => {
            let multiple: f64 = other.strip_suffix("xlarge")?.parse().ok()?;
            8.0 * multiple
        }
    };
    Some(factor)
}
