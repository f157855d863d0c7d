//! Image policy: runtime aliases, the allow-list, and lazy pulls.

use bollard::auth::DockerCredentials;
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::StreamExt;
use tracing::{debug, info};

use super::error::ErrorKind;
use crate::config::RegistryAuth;

/// Maps a runtime alias to its image. Anything else is taken as an image.
pub fn runtime_to_image(runtime: &str) -> String {
    match runtime {
        "python" => "python:3.11-slim".to_string(),
        "node" => "node:20-slim".to_string(),
        "bash" => "ubuntu:22.04".to_string(),
        other => other.to_string(),
    }
}

/// Whether `image` (or the image its alias names) may be used.
///
/// An empty allow-list permits every non-empty image.
pub fn is_image_allowed(image: &str, allowed: &[String]) -> bool {
    if image.is_empty() {
        return false;
    }
    if allowed.is_empty() {
        return true;
    }
    let image = runtime_to_image(image);
    let (name, tag) = parse_image_tag(&image);
    allowed.iter().any(|candidate| {
        let (c_name, c_tag) = parse_image_tag(candidate);
        c_name == name && c_tag == tag
    })
}

/// Splits `repo[:tag]`, treating a colon inside the registry host as part
/// of the name. Missing tags default to `latest`.
fn parse_image_tag(image: &str) -> (&str, &str) {
    let last_slash = image.rfind('/').map_or(0, |i| i + 1);
    match image[last_slash..].rfind(':') {
        Some(pos) => {
            let (name, tag) = image.split_at(last_slash + pos);
            (name, &tag[1..])
        }
        None => (image, "latest"),
    }
}

/// Registry credentials for a pull, or `None` for anonymous access.
pub fn credentials(auth: &RegistryAuth) -> Option<DockerCredentials> {
    if auth.is_empty() {
        return None;
    }
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
    Some(DockerCredentials {
        username: non_empty(&auth.username),
        password: non_empty(&auth.password),
        identitytoken: non_empty(&auth.identity_token),
        serveraddress: non_empty(&auth.server_address),
        ..Default::default()
    })
}

pub(crate) fn is_not_found(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Pulls `image` unless the engine already has it.
pub async fn ensure_image(
    docker: &Docker,
    image: &str,
    credentials: Option<DockerCredentials>,
) -> Result<(), ErrorKind> {
    match docker.inspect_image(image).await {
        Ok(_) => {
            debug!("Image {} present locally", image);
            return Ok(());
        }
        Err(e) if is_not_found(&e) => {}
        Err(e) => return Err(ErrorKind::Engine(e)),
    }

    let (name, tag) = parse_image_tag(image);
    info!("Pulling image {}", image);
    let options = CreateImageOptions {
        from_image: name,
        tag,
        ..Default::default()
    };
    let mut stream = docker.create_image(Some(options), None, credentials);

    while let Some(item) = stream.next().await {
        let pull_error = |message: String| ErrorKind::ImagePull {
            image: image.to_string(),
            message,
        };
        match item {
            Ok(output) => {
                if let Some(error) = output.error {
                    return Err(pull_error(error));
                }
                if let Some(status) = output.status {
                    debug!("pull {}: {}", image, status.trim());
                }
            }
            Err(e) => return Err(pull_error(e.to_string())),
        }
    }

    info!("Image pulled: {}", image);
    Ok(())
}
