//! Tag model, hourly cubes and collaborator contracts shared by the billing
//! processor crates.

pub mod by_product;
pub mod cube;
pub mod instances;
pub mod operation;
pub mod services;
pub mod tag;
pub mod tag_group;
pub mod time;

pub use by_product::{ALL_PRODUCTS, DataByProduct, RunData, product_label};
pub use cube::{HourData, ReadWriteData};
pub use instances::{InstanceRecord, Instances};
pub use operation::{Operation, ReservationKind, Utilization};
pub use services::{
    AccountService, OnDemandRates, PassthroughAccounts, Reservation, ReservationService,
    ResourceContext, ResourceService,
};
pub use tag::{Account, Product, Region, ResourceGroup, UsageType, Zone};
pub use tag_group::{TagGroup, TagGroupFields};
