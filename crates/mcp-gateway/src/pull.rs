//! `pull` command: fetch container images for services by beautified name.

use anyhow::{Context, bail};

use crate::catalog::{BackendKind, Catalog};
use crate::instructions::InstructionMap;
use crate::transport::container::pull_image;

/// Resolve each name to a catalog backend and pull its image.
///
/// Stops at the first name that cannot be resolved or pulled.
pub async fn pull_images(
    catalog: &Catalog,
    instructions: &InstructionMap,
    names: &[String],
) -> anyhow::Result<()> {
    if names.is_empty() {
        bail!("no services specified to pull");
    }
    for name in names {
        let image = resolve_image(catalog, instructions, name)?;
        pull_image(image)
            .await
            .with_context(|| format!("failed to pull image for {name}"))?;
        tracing::info!("image pulled (service={}, image={})", name, image);
    }
    Ok(())
}

fn resolve_image<'a>(
    catalog: &'a Catalog,
    instructions: &InstructionMap,
    name: &str,
) -> anyhow::Result<&'a str> {
    let Some(backend) = instructions.resolve_backend(name) else {
        bail!("could not resolve service name {name:?}");
    };
    let Some(spec) = catalog.servers.get(backend) else {
        bail!("server {backend:?} not found in catalog");
    };
    if spec.kind != BackendKind::Container {
        bail!(
            "service {backend:?} is type {:?}; expected \"server\"",
            String::from(spec.kind.clone())
        );
    }
    if spec.image.is_empty() {
        bail!("service {backend:?} has no image to pull");
    }
    Ok(&spec.image)
}
