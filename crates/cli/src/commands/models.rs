//! `convogen models`: List registered model backends.

use convogen_config::AppConfig;

use super::setup;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let registry = setup::registry(&config);

    println!("Registered model backends");
    println!("=========================");
    for name in registry.names() {
        let marker = if name == config.default_provider { "*" } else { " " };
        let endpoint = convogen_providers::preset_endpoint(name)
            .or_else(|| config.providers.get(name).and_then(|p| p.endpoint_url.as_deref()))
            .unwrap_or("(no endpoint configured)");
        println!("  {marker} {name:<24} {endpoint}");
    }
    println!();
    println!("  Default model: {}", config.default_model);

    Ok(())
}
