use std::collections::BTreeMap;
use std::path::Component;

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};

use super::super::chart::Chart;
use super::super::{Error, ErrorKind, Result};
use super::assemble;

/// Unpack a gzip-compressed tar archive into a flat, chart-root-relative
/// file set, plus the single top-level directory name the spec requires
/// every entry to be rooted under (which becomes the chart's basename).
///
/// Safety checks happen per-entry, before any byte of its content is read:
/// absolute paths, `..` components and symlinks/hardlinks are rejected
/// outright, and the tar pax global-header entry type is skipped rather
/// than treated as chart content.
pub(crate) fn unpack_tar_gz(bytes: &[u8]) -> Result<(String, BTreeMap<String, Vec<u8>>)> {
    let decoder = GzDecoder::new(bytes);
    let mut archive = Archive::new(decoder);
    let mut files = BTreeMap::new();
    let mut root: Option<String> = None;

    for entry in archive
        .entries()
        .map_err(|e| Error::from(ErrorKind::MalformedArchive(e.to_string())))?
    {
        let mut entry = entry.map_err(|e| Error::from(ErrorKind::MalformedArchive(e.to_string())))?;
        let entry_type = entry.header().entry_type();
        if entry_type == EntryType::XGlobalHeader || entry_type == EntryType::XHeader {
            continue;
        }
        let path = entry
            .path()
            .map_err(|e| Error::from(ErrorKind::MalformedArchive(e.to_string())))?
            .into_owned();

        if path.is_absolute() {
            bail!(ErrorKind::PathEscape(path.to_string_lossy().into_owned()));
        }
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            bail!(ErrorKind::PathEscape(path.to_string_lossy().into_owned()));
        }
        if entry_type == EntryType::Symlink || entry_type == EntryType::Link {
            bail!(ErrorKind::PathEscape(path.to_string_lossy().into_owned()));
        }
        if entry_type.is_dir() {
            continue;
        }
        if !entry_type.is_file() {
            continue;
        }

        let mut components = path.components();
        let first = components
            .next()
            .ok_or_else(|| Error::from(ErrorKind::MalformedArchive("empty archive entry path".to_string())))?;
        let first_name = match first {
            Component::Normal(s) => s.to_string_lossy().into_owned(),
            _ => bail!(ErrorKind::PathEscape(path.to_string_lossy().into_owned())),
        };
        match &root {
            None => root = Some(first_name.clone()),
            Some(r) if *r == first_name => {}
            Some(r) => bail!(ErrorKind::MalformedArchive(format!(
                "archive has more than one root directory ('{}' and '{}')",
                r, first_name
            ))),
        }
        let rel = components
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if rel.is_empty() {
            continue;
        }

        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut entry, &mut buf)?;
        files.insert(rel, buf);
    }

    if files.is_empty() {
        bail!(ErrorKind::MalformedArchive("archive contains no chart files".to_string()));
    }
    let root = root.ok_or_else(|| Error::from(ErrorKind::MalformedArchive("archive has no root directory".to_string())))?;
    Ok((root, files))
}

/// Load a chart from a gzip-compressed tar archive (the `.tgz` package
/// format, §6), validating that its contained `Chart.yaml` name matches the
/// archive's single root directory.
pub fn load_archive(bytes: &[u8]) -> Result<Chart> {
    let (root, files) = unpack_tar_gz(bytes)?;
    let chart = assemble(files)?;
    chart.validate(&root)?;
    Ok(chart)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tar::{Builder, Header};

    fn build_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut tarball = Vec::new();
        {
            let mut builder = Builder::new(&mut tarball);
            for (path, content) in entries {
                let mut header = Header::new_gnu();
                header.set_size(content.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_data(&mut header, path, *content).unwrap();
            }
            builder.finish().unwrap();
        }
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&tarball).unwrap();
        gz.finish().unwrap()
    }

    #[test]
    fn loads_a_well_formed_archive() {
        let bytes = build_archive(&[
            ("hello/Chart.yaml", b"apiVersion: v2\nname: hello\nversion: 1.0.0\n"),
            ("hello/values.yaml", b"replicaCount: 1\n"),
            ("hello/templates/cm.yaml", b"kind: ConfigMap\n"),
        ]);
        let chart = load_archive(&bytes).unwrap();
        assert_eq!(chart.name(), "hello");
        assert!(chart.templates.contains_key("templates/cm.yaml"));
    }

    #[test]
    fn rejects_absolute_paths() {
        let bytes = build_archive(&[("/etc/passwd", b"x")]);
        assert!(load_archive(&bytes).is_err());
    }

    #[test]
    fn rejects_parent_dir_escape() {
        let bytes = build_archive(&[("hello/../../etc/passwd", b"x")]);
        assert!(load_archive(&bytes).is_err());
    }

    #[test]
    fn rejects_archive_with_no_files() {
        let tarball_bytes = Vec::new();
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&tarball_bytes).unwrap();
        let bytes = gz.finish().unwrap();
        assert!(load_archive(&bytes).is_err());
    }
}
