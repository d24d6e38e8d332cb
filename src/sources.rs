use anyhow::Result;
use std::sync::Arc;

use billcast_core::source::MessageSource;

use crate::config::Config;
use crate::connector_fixture::load_fixture_dir;
use crate::connector_gmail::GmailSource;

/// Build the message source selected by `[source].provider`.
pub fn open_source(config: &Config) -> Result<Arc<dyn MessageSource>> {
    match config.source.provider.as_str() {
        "gmail" => Ok(Arc::new(GmailSource::from_config(&config.source)?)),
        "fixture" => {
            let dir = config
                .source
                .fixture_dir
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Fixture source not configured"))?;
            Ok(Arc::new(load_fixture_dir(dir)?))
        }
        other => anyhow::bail!("Unknown source provider: '{}'", other),
    }
}

/// Print the configured source and whether it can be opened.
pub fn list_sources(config: &Config) -> Result<()> {
    let status = match open_source(config) {
        Ok(_) => "OK".to_string(),
        Err(e) => format!("UNAVAILABLE ({})", e),
    };

    println!("{:<10} {:<10} STATUS", "SOURCE", "PROVIDER");
    println!("{:<10} {:<10} {}", "messages", config.source.provider, status);
    Ok(())
}
