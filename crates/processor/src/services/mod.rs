mod accounts;
mod alerts;
mod lifecycle;
mod reservations;
mod resources;

use std::sync::Arc;

use billing_core::{AccountService, ReservationService, ResourceService, Utilization};
use billing_store::{LocalObjectStore, ObjectStore};
use ingest::{BasicLineItemProcessor, LineItemProcessor};

use crate::config::{LineItemProcessorKind, ProcessorConfig};
use crate::error::Result;

pub use accounts::ConfigAccountService;
pub use alerts::{AlertMessage, AlertSender, LoggingAlertSender, OutboxAlertSender};
pub use lifecycle::{CommandInstanceController, InstanceController, LoggingInstanceController};
pub use reservations::FileReservationService;
pub use resources::TagKeyResourceService;

/// Collaborators the processor consumes, built once from configuration.
#[derive(Clone)]
pub struct ProcessorServices {
    pub store: Arc<dyn ObjectStore>,
    pub accounts: Arc<dyn AccountService>,
    pub resources: Option<Arc<dyn ResourceService>>,
    pub reservations: Arc<dyn ReservationService>,
    pub alerts: Arc<dyn AlertSender>,
    pub lifecycle: Arc<dyn InstanceController>,
    line_item_kind: LineItemProcessorKind,
    default_utilization: Utilization,
}

impl ProcessorServices {
    pub fn from_config(config: &ProcessorConfig) -> Result<Self> {
        let store: Arc<dyn ObjectStore> =
            Arc::new(LocalObjectStore::new(config.store.root.clone()));
        let resources = config.resources.as_ref().map(|resources| {
            Arc::new(TagKeyResourceService::new(resources)) as Arc<dyn ResourceService>
        });
        let reservations: Arc<dyn ReservationService> = match &config.reservations.path {
            Some(path) => Arc::new(FileReservationService::load(path)?),
            None => Arc::new(FileReservationService::empty()),
        };
        let alerts: Arc<dyn AlertSender> = match &config.alerts.outbox_dir {
            Some(dir) => Arc::new(OutboxAlertSender::new(dir.clone())),
            None => Arc::new(LoggingAlertSender),
        };
        let lifecycle: Arc<dyn InstanceController> = match &config.lifecycle.stop_command {
            Some(command) => Arc::new(CommandInstanceController::new(command.clone())?),
            None => Arc::new(LoggingInstanceController),
        };
        Ok(Self {
            store,
            accounts: Arc::new(ConfigAccountService::new(&config.accounts)),
            resources,
            reservations,
            alerts,
            lifecycle,
            line_item_kind: config.line_items.kind,
            default_utilization: config.reservations.default_utilization,
        })
    }

    /// Replaces the object store, mainly for tests.
    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_reservations(mut self, reservations: Arc<dyn ReservationService>) -> Self {
        self.reservations = reservations;
        self
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSender>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn InstanceController>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Fresh line-item processor for one month run.
    pub fn line_item_processor(&self) -> Box<dyn LineItemProcessor> {
        match self.line_item_kind {
            LineItemProcessorKind::Basic => Box::new(BasicLineItemProcessor::new(
                self.accounts.clone(),
                self.resources.clone(),
                self.default_utilization,
            )),
        }
    }
}
