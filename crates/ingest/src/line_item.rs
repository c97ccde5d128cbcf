use std::sync::Arc;

use billing_core::time::HOUR_MILLIS;
use billing_core::{
    AccountService, InstanceRecord, Operation, ReservationKind, ResourceContext, ResourceGroup,
    ResourceService, RunData, TagGroup, TagGroupFields, UsageType, Utilization, Zone,
};
use csv::StringRecord;
use tracing::debug;

use crate::parser;
use crate::types::{IngestError, LineItemError, LineItemOutcome};

/// Classifies billing rows into cube contributions.
pub trait LineItemProcessor: Send {
    /// Resolves column positions from the header row.
    fn init_indexes(&mut self, header: &StringRecord, with_tags: bool) -> Result<(), IngestError>;

    fn process(
        &mut self,
        row: &StringRecord,
        second_pass: bool,
        run: &mut RunData,
    ) -> Result<LineItemOutcome, LineItemError>;

    /// Exclusive end of the row's time span.
    fn end_millis(&self, row: &StringRecord) -> Option<i64>;
}

#[derive(Debug, Clone)]
struct Columns {
    linked_account: Option<usize>,
    payer_account: Option<usize>,
    record_type: Option<usize>,
    product: usize,
    usage_type: usize,
    operation: usize,
    zone: Option<usize>,
    reserved: Option<usize>,
    description: Option<usize>,
    start: usize,
    end: usize,
    quantity: usize,
    rate: Option<usize>,
    cost: usize,
    resource: Option<usize>,
    user_tags: Vec<(usize, String)>,
    with_tags: bool,
    required_width: usize,
}

impl Columns {
    fn resolve(header: &StringRecord, with_tags: bool) -> Result<Self, IngestError> {
        let find = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| header.iter().position(|column| column.trim() == *name))
        };
        let require =
            |names: &[&str]| find(names).ok_or_else(|| IngestError::MissingColumn(names.join("|")));

        let linked_account = find(&["LinkedAccountId"]);
        let payer_account = find(&["PayerAccountId"]);
        if linked_account.is_none() && payer_account.is_none() {
            return Err(IngestError::MissingColumn("LinkedAccountId|PayerAccountId".to_string()));
        }
        let user_tags = if with_tags {
            header
                .iter()
                .enumerate()
                .filter_map(|(i, column)| {
                    column
                        .trim()
                        .strip_prefix("user:")
                        .map(|key| (i, key.to_string()))
                })
                .collect()
        } else {
            Vec::new()
        };
        let mut columns = Self {
            linked_account,
            payer_account,
            record_type: find(&["RecordType"]),
            product: require(&["ProductName"])?,
            usage_type: require(&["UsageType"])?,
            operation: require(&["Operation"])?,
            zone: find(&["AvailabilityZone"]),
            reserved: find(&["ReservedInstance"]),
            description: find(&["ItemDescription"]),
            start: require(&["UsageStartDate"])?,
            end: require(&["UsageEndDate"])?,
            quantity: require(&["UsageQuantity"])?,
            rate: find(&["UnBlendedRate", "Rate", "BlendedRate"]),
            cost: require(&["UnBlendedCost", "Cost", "BlendedCost"])?,
            resource: if with_tags { find(&["ResourceId"]) } else { None },
            user_tags,
            with_tags,
            required_width: 0,
        };
        columns.required_width = [
            columns.product,
            columns.usage_type,
            columns.operation,
            columns.start,
            columns.end,
            columns.quantity,
            columns.cost,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
            + 1;
        Ok(columns)
    }
}

fn field<'a>(row: &'a StringRecord, index: usize) -> &'a str {
    row.get(index).map(str::trim).unwrap_or("")
}

fn bad_field(what: &str, value: &str) -> LineItemError {
    LineItemError::Malformed(format!("bad {what} {value:?}"))
}

fn optional_field(row: &StringRecord, index: Option<usize>) -> &str {
    index.map(|i| field(row, i)).unwrap_or("")
}

/// Classifier for detailed line-item exports, plain or with resources and
/// tags.
pub struct BasicLineItemProcessor {
    accounts: Arc<dyn AccountService>,
    resources: Option<Arc<dyn ResourceService>>,
    default_utilization: Utilization,
    columns: Option<Columns>,
}

impl BasicLineItemProcessor {
    pub fn new(
        accounts: Arc<dyn AccountService>,
        resources: Option<Arc<dyn ResourceService>>,
        default_utilization: Utilization,
    ) -> Self {
        Self {
            accounts,
            resources,
            default_utilization,
            columns: None,
        }
    }

    fn classify_resource(
        &self,
        context: &ResourceContext<'_>,
    ) -> Option<ResourceGroup> {
        self.resources.as_ref().and_then(|service| service.resource_group(context))
    }
}

impl LineItemProcessor for BasicLineItemProcessor {
    fn init_indexes(&mut self, header: &StringRecord, with_tags: bool) -> Result<(), IngestError> {
        let columns = Columns::resolve(header, with_tags)?;
        debug!(with_tags, user_tags = columns.user_tags.len(), "resolved billing columns");
        self.columns = Some(columns);
        Ok(())
    }

    fn process(
        &mut self,
        row: &StringRecord,
        second_pass: bool,
        run: &mut RunData,
    ) -> Result<LineItemOutcome, LineItemError> {
        let cols = self.columns.as_ref().ok_or(LineItemError::NotInitialized)?;
        if row.len() < cols.required_width {
            return Err(LineItemError::Malformed(format!(
                "expected at least {} columns, found {}",
                cols.required_width,
                row.len()
            )));
        }

        let record_type = optional_field(row, cols.record_type);
        if !record_type.is_empty() && record_type != "LineItem" {
            return Ok(LineItemOutcome::Ignore);
        }
        let account_id = match optional_field(row, cols.linked_account) {
            "" => optional_field(row, cols.payer_account),
            linked => linked,
        };
        if account_id.is_empty() {
            return Ok(LineItemOutcome::Ignore);
        }

        let start = parser::parse_timestamp(field(row, cols.start))
            .ok_or_else(|| bad_field("start date", field(row, cols.start)))?;
        let end = parser::parse_end_timestamp(field(row, cols.end))
            .ok_or_else(|| bad_field("end date", field(row, cols.end)))?;
        let month_start = run.month_start_millis();
        let month_hours = run.month_hours() as i64;
        let start_hour = ((start - month_start).div_euclid(HOUR_MILLIS)).max(0);
        let end_hour = (end - month_start + HOUR_MILLIS - 1)
            .div_euclid(HOUR_MILLIS)
            .min(month_hours);
        if end_hour <= start_hour {
            return Ok(LineItemOutcome::Ignore);
        }

        let usage = parser::parse_amount(field(row, cols.quantity))
            .ok_or_else(|| bad_field("quantity", field(row, cols.quantity)))?;
        let cost = parser::parse_amount(field(row, cols.cost))
            .ok_or_else(|| bad_field("cost", field(row, cols.cost)))?;

        let account = self.accounts.account(account_id);
        let raw_usage_type = field(row, cols.usage_type);
        let (prefix_region, stripped_usage_type) = parser::split_region_prefix(raw_usage_type);
        let zone_name = optional_field(row, cols.zone);
        let mut zone = parser::is_zone(zone_name).then(|| Zone::get(zone_name));
        let region = zone.as_ref().map(Zone::region).unwrap_or(prefix_region);
        let product = parser::product_for(field(row, cols.product), stripped_usage_type);
        let raw_operation = field(row, cols.operation);

        let (operation, usage_type) = if product.is_ec2_instance() {
            let usage_type =
                UsageType::get(&parser::instance_usage_type(stripped_usage_type, raw_operation));
            let reserved = optional_field(row, cols.reserved).eq_ignore_ascii_case("Y")
                || stripped_usage_type.starts_with("HeavyUsage");
            let operation = if parser::is_spot_usage(stripped_usage_type) {
                Operation::Spot
            } else if reserved {
                let description = optional_field(row, cols.description);
                let utilization = Utilization::from_description(description)
                    .unwrap_or(self.default_utilization);
                let kind = if description.to_ascii_lowercase().contains("bonus") {
                    ReservationKind::Bonus
                } else {
                    ReservationKind::Used
                };
                Operation::reserved(kind, utilization)
            } else {
                Operation::OnDemand
            };
            (operation, usage_type)
        } else {
            let usage_type = if stripped_usage_type.is_empty() {
                "None"
            } else {
                stripped_usage_type
            };
            (Operation::get(raw_operation), UsageType::get(usage_type))
        };

        if operation == Operation::OnDemand {
            let rate = parser::parse_amount(optional_field(row, cols.rate))
                .filter(|rate| *rate > 0.0)
                .or_else(|| (usage > 0.0).then(|| cost / usage));
            if let Some(rate) = rate {
                run.ondemand_rates.insert(region.clone(), usage_type.clone(), rate);
            }
        }

        let resource_id = optional_field(row, cols.resource);
        let mut resource_group = None;
        if cols.with_tags && !resource_id.is_empty() {
            let user_tags: Vec<(String, String)> = cols
                .user_tags
                .iter()
                .filter_map(|(i, key)| {
                    let value = field(row, *i);
                    (!value.is_empty()).then(|| (key.clone(), value.to_string()))
                })
                .collect();
            let context = ResourceContext {
                account: &account,
                region: &region,
                product: &product,
                resource_id,
                user_tags: &user_tags,
            };
            if product.is_ec2_instance() && resource_id.starts_with("i-") {
                resource_group = self.classify_resource(&context);
                run.instances.add(InstanceRecord {
                    instance_id: resource_id.to_string(),
                    account: account.clone(),
                    region: region.clone(),
                    zone: zone.clone(),
                    product: product.clone(),
                    usage_type: usage_type.clone(),
                    resource_group: resource_group.clone(),
                    first_seen_millis: start,
                });
            } else if resource_id.starts_with("i-") {
                match run.instances.get(resource_id) {
                    Some(instance) => {
                        resource_group = instance.resource_group.clone();
                        if zone.is_none() {
                            zone = instance.zone.clone();
                        }
                    }
                    None if !second_pass => return Ok(LineItemOutcome::Delay),
                    None => {
                        return Err(LineItemError::Unclassifiable(format!(
                            "instance {resource_id} never seen in this month"
                        )));
                    }
                }
            } else {
                resource_group = self.classify_resource(&context);
            }
        }

        let hours = end_hour - start_hour;
        let usage_per_hour = usage / hours as f64;
        let cost_per_hour = cost / hours as f64;
        let fields = TagGroupFields {
            account,
            region,
            zone,
            product: product.clone(),
            operation,
            usage_type,
            resource_group: None,
        };
        let product_group = self
            .resources
            .is_some()
            .then(|| TagGroup::get(TagGroupFields { resource_group, ..fields.clone() }));
        let aggregate_group = TagGroup::get(fields);

        for hour in start_hour..end_hour {
            let hour = hour as usize;
            run.usage.all_mut().add_value(hour, &aggregate_group, usage_per_hour);
            run.cost.all_mut().add_value(hour, &aggregate_group, cost_per_hour);
            if let Some(group) = &product_group {
                run.usage.product_or_create(&product).add_value(hour, group, usage_per_hour);
                run.cost.product_or_create(&product).add_value(hour, group, cost_per_hour);
            }
        }

        Ok(if hours > 1 {
            LineItemOutcome::Monthly
        } else {
            LineItemOutcome::Hourly
        })
    }

    fn end_millis(&self, row: &StringRecord) -> Option<i64> {
        let cols = self.columns.as_ref()?;
        parser::parse_end_timestamp(field(row, cols.end))
    }
}
