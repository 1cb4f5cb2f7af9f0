use std::fs;
use std::path::Path;

use super::super::Result;
use super::Getter;

/// `file://` transport: reads a path straight off the local filesystem, no
/// retries (a local read either works or it doesn't).
pub struct FileGetter;

impl FileGetter {
    pub fn new() -> FileGetter {
        FileGetter
    }
}

impl Default for FileGetter {
    fn default() -> Self {
        FileGetter::new()
    }
}

impl Getter for FileGetter {
    fn get(&self, path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(Path::new(path))?)
    }
}
