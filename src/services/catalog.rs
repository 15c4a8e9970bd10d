use anyhow::{Context, Result};

use crate::config::Config;
use crate::models::{Catalog, CatalogChannel, CatalogStream};
use crate::services::http::HttpFetcher;

/// Download both catalog documents and join them.
///
/// Any failure here aborts the run before a category file is touched.
pub async fn fetch_catalog(fetcher: &HttpFetcher, config: &Config) -> Result<Catalog> {
    tracing::info!("Fetching latest catalog data");

    let (streams, channels) = tokio::try_join!(
        async {
            fetcher
                .get_json::<Vec<CatalogStream>>(&config.streams_api)
                .await
                .context("Failed to fetch streams catalog")
        },
        async {
            fetcher
                .get_json::<Vec<CatalogChannel>>(&config.channels_api)
                .await
                .context("Failed to fetch channels catalog")
        },
    )?;

    let catalog = Catalog::new(channels, streams);
    tracing::info!(
        channels = catalog.channels.len(),
        streams = catalog.streams.len(),
        "catalog loaded"
    );
    Ok(catalog)
}
