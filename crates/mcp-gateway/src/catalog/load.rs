//! Read catalogs from local files or HTTP(S) URLs.
//!
//! Sources are YAML (JSON is accepted as a YAML subset) using the `registry:`
//! layout. Later sources override earlier ones when a server name repeats.

use anyhow::Context as _;

use super::{Catalog, CatalogFile};

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

async fn read_source(source: &str) -> anyhow::Result<String> {
    if is_url(source) {
        let resp = reqwest::get(source)
            .await
            .with_context(|| format!("fetch catalog {source}"))?
            .error_for_status()
            .with_context(|| format!("fetch catalog {source}"))?;
        return resp
            .text()
            .await
            .with_context(|| format!("read catalog body {source}"));
    }
    tokio::fs::read_to_string(source)
        .await
        .with_context(|| format!("read catalog {source}"))
}

/// Parse one catalog document.
pub fn parse_catalog(content: &str) -> anyhow::Result<Catalog> {
    let file: CatalogFile = serde_yaml::from_str(content)?;
    let mut catalog = Catalog::default();
    for (name, mut spec) in file.registry {
        if spec.name.is_empty() {
            spec.name = name.clone();
        }
        catalog.servers.insert(name, spec);
    }
    Ok(catalog)
}

/// Load and merge every catalog source in order.
pub async fn read_catalogs(sources: &[String]) -> anyhow::Result<Catalog> {
    let mut merged = Catalog::default();
    for source in sources {
        let content = read_source(source).await?;
        let catalog =
            parse_catalog(&content).with_context(|| format!("parse catalog {source}"))?;
        tracing::info!(
            "loaded catalog {} (servers={})",
            source,
            catalog.servers.len()
        );
        merged.servers.extend(catalog.servers);
    }
    Ok(merged)
}
