//! A uniform `Get(url) -> bytes` fetcher used by the index loader, the
//! dependency resolver and the provenance verifier. Scheme-dispatched.

pub mod file;
pub mod http;
pub mod registry;

pub use file::FileGetter;
pub use http::HttpGetter;
pub use registry::OciGetter;

use super::{Error, ErrorKind, Result};

/// A byte-fetcher over one transport. Implementations own their own retry
/// policy; the resolver and index never retry on their behalf.
pub trait Getter: Send + Sync {
    fn get(&self, url: &str) -> Result<Vec<u8>>;
}

/// Dispatches a reference to the right `Getter` by its scheme, the only
/// place in the core that knows concrete transports exist.
pub struct GetterRegistry {
    http: HttpGetter,
    file: FileGetter,
    oci: OciGetter,
}

impl GetterRegistry {
    pub fn new() -> GetterRegistry {
        GetterRegistry {
            http: HttpGetter::new(),
            file: FileGetter::new(),
            oci: OciGetter::new(),
        }
    }
}

impl Default for GetterRegistry {
    fn default() -> Self {
        GetterRegistry::new()
    }
}

impl Getter for GetterRegistry {
    fn get(&self, url: &str) -> Result<Vec<u8>> {
        if url.starts_with("http://") || url.starts_with("https://") {
            self.http.get(url)
        } else if let Some(path) = url.strip_prefix("file://") {
            self.file.get(path)
        } else if let Some(reference) = url.strip_prefix("oci://") {
            self.oci.get(reference)
        } else {
            Err(Error::from(ErrorKind::RepoNotConfigured(url.to_string())))
        }
    }
}
