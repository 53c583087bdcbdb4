//! Builds the service image on the host and loads it into the cluster.

use tracing::info;

use crate::config::ImageConfig;
use crate::error::Result;
use crate::runner::CommandRunner;
use crate::tools::{Docker, Minikube};

/// Build `image` and copy it into the profile's image store.
///
/// Returns the image reference.
///
/// # Errors
///
/// Returns the command error if either the build or the load fails.
pub fn build_and_load(runner: &dyn CommandRunner, profile: &str, image: &ImageConfig) -> Result<String> {
    let reference = image.reference();

    info!(image = %reference, dockerfile = %image.dockerfile.display(), "Building image");
    Docker::new(runner).build(image)?;

    info!(image = %reference, profile, "Loading image into cluster");
    Minikube::new(runner, profile).image_load(&reference)?;

    Ok(reference)
}
