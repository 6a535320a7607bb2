use std::error::Error;

use serde::Deserialize;

use chatgate_core::{ProviderRegistry, ProviderRoute, Transport};

#[derive(Deserialize)]
struct RouteFile {
    default: ProviderRoute,
    #[serde(default)]
    models: Vec<RouteEntry>,
}

#[derive(Deserialize)]
struct RouteEntry {
    model: String,
    #[serde(flatten)]
    route: ProviderRoute,
}

/// Builds the model registry from a JSON file when given, falling back to
/// the built-in table. Adding a backend is a data change, not a code
/// change.
pub fn build_registry(path: Option<&str>) -> Result<ProviderRegistry, Box<dyn Error + Send + Sync>> {
    let Some(path) = path else {
        return Ok(builtin_registry());
    };
    let raw = std::fs::read_to_string(path)?;
    let file: RouteFile = serde_json::from_str(&raw)?;
    Ok(ProviderRegistry::from_entries(
        file.models.into_iter().map(|entry| (entry.model, entry.route)),
        file.default,
    ))
}

fn builtin_registry() -> ProviderRegistry {
    let streaming = ProviderRoute {
        family: "openai".to_string(),
        transport: Transport::Stream,
        endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
    };
    let batch = ProviderRoute {
        family: "gemini".to_string(),
        transport: Transport::Batch,
        endpoint: "https://generativelanguage.googleapis.com/v1beta/chat/completions".to_string(),
    };
    ProviderRegistry::from_entries(
        [
            ("gpt-4o".to_string(), streaming.clone()),
            ("gpt-4o-mini".to_string(), streaming.clone()),
            ("gemini-2.0-flash".to_string(), batch.clone()),
            ("gemini-1.5-pro".to_string(), batch),
        ],
        streaming,
    )
}
