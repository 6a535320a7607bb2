use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Stream,
    Batch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRoute {
    pub family: String,
    pub transport: Transport,
    pub endpoint: String,
}

/// Data-driven model registry. Adding a backend is a data change; unknown
/// identifiers fall through to the default streaming family so
/// forward-compatible model names keep working.
pub struct ProviderRegistry {
    routes: HashMap<String, ProviderRoute>,
    default_route: ProviderRoute,
}

impl ProviderRegistry {
    pub fn new(default_route: ProviderRoute) -> Self {
        Self { routes: HashMap::new(), default_route }
    }

    pub fn from_entries(
        entries: impl IntoIterator<Item = (String, ProviderRoute)>,
        default_route: ProviderRoute,
    ) -> Self {
        Self { routes: entries.into_iter().collect(), default_route }
    }

    pub fn insert(&mut self, model: impl Into<String>, route: ProviderRoute) {
        self.routes.insert(model.into(), route);
    }

    pub fn resolve(&self, model: &str) -> ProviderRoute {
        self.routes.get(model).cloned().unwrap_or_else(|| self.default_route.clone())
    }
}
