use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Extract `<dir>/<binary>` from the gzipped tarball at `archive` into
/// `dest`, marking it executable.
///
/// # Errors
///
/// Returns [`Error::BinaryNotFoundInArchive`] when no entry matches, or the
/// I/O error from reading the archive or writing `dest`.
pub fn extract_binary(archive: &Path, dir: &str, binary: &str, dest: &Path) -> Result<()> {
    let wanted = Path::new(dir).join(binary);
    let decoder = flate2::read::GzDecoder::new(File::open(archive)?);
    let mut tar = tar::Archive::new(decoder);

    for entry in tar.entries()? {
        let mut entry = entry?;
        if normalize(&entry.path()?) != wanted {
            continue;
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(dest)?;
        io::copy(&mut entry, &mut out)?;
        set_executable(dest)?;
        return Ok(());
    }

    Err(Error::BinaryNotFoundInArchive {
        binary: binary.to_string(),
        entry: wanted.display().to_string(),
    })
}

/// Drop `./` prefixes so `./gitbase_linux_amd64/gitbase` matches too.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Copy `from` to `to` with mode 0755.
///
/// # Errors
///
/// Returns the underlying I/O error.
pub fn copy_executable(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(from, to)?;
    set_executable(to)?;
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    /// Write a tar.gz holding `entries` (path, contents) to `path`.
    pub(crate) fn write_tarball(path: &Path, entries: &[(&str, &[u8])]) -> anyhow::Result<()> {
        let encoder = GzEncoder::new(File::create(path)?, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data)?;
        }
        builder.into_inner()?.finish()?;
        Ok(())
    }

    #[test]
    fn extracts_binary_from_platform_dir() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let tarball = tmp.path().join("release.tar.gz");
        write_tarball(
            &tarball,
            &[
                ("gitbase_linux_amd64/README.md", b"readme"),
                ("gitbase_linux_amd64/gitbase", b"#!/bin/sh\n"),
            ],
        )?;

        let dest = tmp.path().join("cache").join("gitbase.v1.0.0");
        extract_binary(&tarball, "gitbase_linux_amd64", "gitbase", &dest)?;
        assert_eq!(fs::read(&dest)?, b"#!/bin/sh\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            assert_eq!(fs::metadata(&dest)?.permissions().mode() & 0o777, 0o755);
        }
        Ok(())
    }

    #[test]
    fn binary_for_other_platform_is_not_found() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let tarball = tmp.path().join("release.tar.gz");
        write_tarball(&tarball, &[("gitbase_darwin_amd64/gitbase", b"bin")])?;

        let dest = tmp.path().join("gitbase");
        let err = extract_binary(&tarball, "gitbase_linux_amd64", "gitbase", &dest);
        assert!(matches!(err, Err(Error::BinaryNotFoundInArchive { .. })));
        assert!(!dest.exists());
        Ok(())
    }

    #[test]
    fn dot_prefixed_entries_match() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let tarball = tmp.path().join("release.tar.gz");
        write_tarball(&tarball, &[("./tool_linux_amd64/tool", b"bin")])?;

        let dest = tmp.path().join("tool");
        extract_binary(&tarball, "tool_linux_amd64", "tool", &dest)?;
        assert_eq!(fs::read(&dest)?, b"bin");
        Ok(())
    }

    #[test]
    fn corrupt_archive_is_an_io_error() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let tarball = tmp.path().join("release.tar.gz");
        fs::write(&tarball, b"not gzip")?;
        let err = extract_binary(&tarball, "d", "b", &tmp.path().join("b"));
        assert!(matches!(err, Err(Error::Io(_))));
        Ok(())
    }
}
