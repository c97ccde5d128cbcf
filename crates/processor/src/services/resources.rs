use billing_core::{ResourceContext, ResourceGroup, ResourceService};
use tracing::debug;

use crate::config::ResourcesConfig;

/// Picks the first configured user tag with a non-empty value.
#[derive(Debug, Clone)]
pub struct TagKeyResourceService {
    tag_keys: Vec<String>,
}

impl TagKeyResourceService {
    pub fn new(config: &ResourcesConfig) -> Self {
        Self {
            tag_keys: config
                .tag_keys
                .iter()
                .map(|key| key.trim().trim_start_matches("user:").to_string())
                .filter(|key| !key.is_empty())
                .collect(),
        }
    }
}

impl ResourceService for TagKeyResourceService {
    fn resource_group(&self, context: &ResourceContext<'_>) -> Option<ResourceGroup> {
        self.tag_keys.iter().find_map(|wanted| {
            context
                .user_tags
                .iter()
                .find(|(key, value)| {
                    key.trim_start_matches("user:") == wanted && !value.trim().is_empty()
                })
                .map(|(_, value)| ResourceGroup::get(value.trim()))
        })
    }

    fn commit(&self) {
        debug!(keys = self.tag_keys.len(), "resource classifier committed");
    }
}
