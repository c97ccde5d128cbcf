use crate::cube::ReadWriteData;
use crate::instances::Instances;
use crate::services::OnDemandRates;
use crate::tag::Product;
use crate::time;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Label used in artifact names for the aggregate cube.
pub const ALL_PRODUCTS: &str = "all";

pub fn product_label(product: Option<&Product>) -> &str {
    product.map(Product::name).unwrap_or(ALL_PRODUCTS)
}

/// One metric of a run: the mandatory aggregate cube plus per-product cubes.
#[derive(Debug, Clone, Default)]
pub struct DataByProduct {
    all: ReadWriteData,
    products: BTreeMap<Product, ReadWriteData>,
}

impl DataByProduct {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> &ReadWriteData {
        &self.all
    }

    pub fn all_mut(&mut self) -> &mut ReadWriteData {
        &mut self.all
    }

    pub fn product(&self, product: &Product) -> Option<&ReadWriteData> {
        self.products.get(product)
    }

    pub fn product_mut(&mut self, product: &Product) -> Option<&mut ReadWriteData> {
        self.products.get_mut(product)
    }

    pub fn product_or_create(&mut self, product: &Product) -> &mut ReadWriteData {
        self.products.entry(product.clone()).or_default()
    }

    /// Aggregate cube first, then products in name order.
    pub fn iter(&self) -> impl Iterator<Item = (Option<&Product>, &ReadWriteData)> {
        std::iter::once((None, &self.all)).chain(
            self.products
                .iter()
                .map(|(product, cube)| (Some(product), cube)),
        )
    }

    pub fn product_count(&self) -> usize {
        self.products.len()
    }

    pub fn cut_data(&mut self, hours: usize) {
        self.all.cut_data(hours);
        for cube in self.products.values_mut() {
            cube.cut_data(hours);
        }
    }
}

/// State owned by one month run and threaded through classification,
/// amortization, roll-up and alerting.
#[derive(Debug, Clone)]
pub struct RunData {
    pub month: NaiveDate,
    pub usage: DataByProduct,
    pub cost: DataByProduct,
    pub ondemand_rates: OnDemandRates,
    pub instances: Instances,
}

impl RunData {
    pub fn new(month: NaiveDate) -> Self {
        Self {
            month: time::month_start(month),
            usage: DataByProduct::new(),
            cost: DataByProduct::new(),
            ondemand_rates: OnDemandRates::default(),
            instances: Instances::default(),
        }
    }

    pub fn month_start_millis(&self) -> i64 {
        time::month_start_millis(self.month)
    }

    pub fn month_hours(&self) -> usize {
        time::hours_in_month(self.month)
    }

    pub fn cut_data(&mut self, hours: usize) {
        self.usage.cut_data(hours);
        self.cost.cut_data(hours);
    }
}
