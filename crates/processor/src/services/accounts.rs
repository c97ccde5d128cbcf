use std::collections::BTreeMap;

use billing_core::{Account, AccountService};

use crate::config::AccountsConfig;

/// Account directory backed by the `[accounts]` config section. Unknown ids
/// keep their raw id as the name.
#[derive(Debug, Clone, Default)]
pub struct ConfigAccountService {
    names: BTreeMap<String, String>,
    reservation_owners: Vec<String>,
}

impl ConfigAccountService {
    pub fn new(config: &AccountsConfig) -> Self {
        Self {
            names: config.names.clone(),
            reservation_owners: config.reservation_owners.clone(),
        }
    }
}

impl AccountService for ConfigAccountService {
    fn account(&self, id: &str) -> Account {
        match self.names.get(id) {
            Some(name) if !name.trim().is_empty() => Account::get(name.trim()),
            _ => Account::get(id),
        }
    }

    fn reservation_owners(&self) -> Vec<Account> {
        self.reservation_owners.iter().map(|id| self.account(id)).collect()
    }
}
