use reqwest::blocking::Client;
use serde::Deserialize;

use super::super::{Error, ErrorKind, Result};
use super::Getter;

#[derive(Deserialize)]
struct OciLayer {
    digest: String,
}

#[derive(Deserialize)]
struct OciManifest {
    layers: Vec<OciLayer>,
}

/// OCI transport: a minimal client against the distribution-spec v2 HTTP
/// API, enough to pull a single-layer chart artifact by tag or digest.
/// Auth, multi-arch manifests and mirrors are left to a full registry
/// client; this covers the common anonymous-pull case.
pub struct OciGetter {
    client: Client,
}

impl OciGetter {
    pub fn new() -> OciGetter {
        OciGetter { client: Client::new() }
    }

    /// `reference` is `<registry>/<repository>:<tag>`.
    fn split_reference(reference: &str) -> Result<(String, String, String)> {
        let (registry, rest) = reference
            .split_once('/')
            .ok_or_else(|| Error::from(ErrorKind::RepoNotConfigured(reference.to_string())))?;
        let (repository, tag) = rest
            .rsplit_once(':')
            .unwrap_or((rest, "latest"));
        Ok((registry.to_string(), repository.to_string(), tag.to_string()))
    }
}

impl Default for OciGetter {
    fn default() -> Self {
        OciGetter::new()
    }
}

impl Getter for OciGetter {
    fn get(&self, reference: &str) -> Result<Vec<u8>> {
        let (registry, repository, tag) = Self::split_reference(reference)?;
        let manifest_url = format!("https://{}/v2/{}/manifests/{}", registry, repository, tag);
        let manifest_resp = self
            .client
            .get(&manifest_url)
            .header("Accept", "application/vnd.oci.image.manifest.v1+json")
            .send()
            .map_err(|e| ErrorKind::DownloadFailed(manifest_url.clone(), e.to_string()))?;
        if !manifest_resp.status().is_success() {
            return Err(Error::from(ErrorKind::DownloadFailed(
                manifest_url,
                format!("http status {}", manifest_resp.status()),
            )));
        }
        let manifest: OciManifest = manifest_resp
            .json()
            .map_err(|e| ErrorKind::DownloadFailed(reference.to_string(), format!("invalid manifest: {}", e)))?;
        let layer = manifest
            .layers
            .first()
            .ok_or_else(|| Error::from(ErrorKind::DownloadFailed(reference.to_string(), "manifest has no layers".to_string())))?;
        let blob_url = format!("https://{}/v2/{}/blobs/{}", registry, repository, layer.digest);
        let blob_resp = self
            .client
            .get(&blob_url)
            .send()
            .map_err(|e| ErrorKind::DownloadFailed(blob_url.clone(), e.to_string()))?;
        if !blob_resp.status().is_success() {
            return Err(Error::from(ErrorKind::DownloadFailed(
                blob_url,
                format!("http status {}", blob_resp.status()),
            )));
        }
        Ok(blob_resp.bytes().map_err(|e| ErrorKind::DownloadFailed(reference.to_string(), e.to_string()))?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_registry_repository_and_tag() {
        let (registry, repository, tag) =
            OciGetter::split_reference("registry.example.com/charts/lib:1.3.0").unwrap();
        assert_eq!(registry, "registry.example.com");
        assert_eq!(repository, "charts/lib");
        assert_eq!(tag, "1.3.0");
    }

    #[test]
    fn defaults_to_latest_tag_when_absent() {
        let (_, _, tag) = OciGetter::split_reference("registry.example.com/charts/lib").unwrap();
        assert_eq!(tag, "latest");
    }

    #[test]
    fn rejects_reference_with_no_registry_segment() {
        assert!(OciGetter::split_reference("lib:1.3.0").is_err());
    }
}
