use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;

use super::super::{Error, ErrorKind, Result};
use super::Getter;

/// HTTP(S) transport, matching the blocking-call style the rest of this
/// workspace uses for synchronous HTTP. Transient failures are retried a
/// bounded number of times with a short linear backoff; the error is
/// surfaced once attempts are exhausted.
pub struct HttpGetter {
    client: Client,
    max_attempts: u32,
}

impl HttpGetter {
    pub fn new() -> HttpGetter {
        HttpGetter {
            client: Client::new(),
            max_attempts: 3,
        }
    }

    pub fn with_max_attempts(max_attempts: u32) -> HttpGetter {
        HttpGetter {
            client: Client::new(),
            max_attempts: max_attempts.max(1),
        }
    }
}

impl Default for HttpGetter {
    fn default() -> Self {
        HttpGetter::new()
    }
}

impl Getter for HttpGetter {
    fn get(&self, url: &str) -> Result<Vec<u8>> {
        let mut last_err: Option<ErrorKind> = None;
        for attempt in 1..=self.max_attempts {
            match self.client.get(url).send() {
                Ok(resp) => {
                    if resp.status().is_success() {
                        let bytes = resp.bytes().map_err(|e| ErrorKind::DownloadFailed(url.to_string(), e.to_string()))?;
                        return Ok(bytes.to_vec());
                    }
                    last_err = Some(ErrorKind::DownloadFailed(url.to_string(), format!("http status {}", resp.status())));
                }
                Err(e) => {
                    last_err = Some(ErrorKind::DownloadFailed(url.to_string(), e.to_string()));
                }
            }
            if attempt < self.max_attempts {
                debug!("retrying download of {} (attempt {})", url, attempt + 1);
                thread::sleep(Duration::from_millis(200 * u64::from(attempt)));
            }
        }
        Err(Error::from(last_err.unwrap_or_else(|| {
            ErrorKind::DownloadFailed(url.to_string(), "no attempts made".to_string())
        })))
    }
}
