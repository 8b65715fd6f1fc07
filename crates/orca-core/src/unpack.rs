//! Extraction of directory blobs (gzip-compressed tarballs).

use flate2::read::GzDecoder;
use std::path::{Component, Path};
use tar::Archive;
use tracing::{debug, trace};

use crate::{Error, Result};

/// Whether `name` is a plain relative path that stays below its root.
#[must_use]
pub fn is_safe_relative(name: &Path) -> bool {
    let mut components = name.components().peekable();
    if components.peek().is_none() {
        return false;
    }
    components.all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Unpack a `.tar.gz` archive held in memory into `dest`.
///
/// Every entry path is checked before anything is written; an entry that is
/// absolute or climbs out with `..` fails the whole extraction with
/// [`Error::UnsafePath`]. Unix permissions are preserved.
pub fn unpack_tar_gz(content: &[u8], dest: &Path) -> Result<()> {
    debug!(?dest, size = content.len(), "Unpacking archive");
    std::fs::create_dir_all(dest).map_err(|e| Error::io(e, dest, "create directory"))?;

    let mut archive = Archive::new(GzDecoder::new(content));
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let entries = archive
        .entries()
        .map_err(|e| Error::io(e, dest, "read archive"))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| Error::io(e, dest, "read archive entry"))?;
        let path = entry
            .path()
            .map_err(|e| Error::io(e, dest, "read archive entry path"))?
            .into_owned();

        if !is_safe_relative(&path) {
            return Err(Error::UnsafePath {
                name: path.to_string_lossy().into_owned(),
            });
        }

        trace!(?path, "Unpacking entry");
        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| Error::io(e, dest.join(&path), "unpack"))?;
        if !unpacked {
            return Err(Error::UnsafePath {
                name: path.to_string_lossy().into_owned(),
            });
        }
    }
    Ok(())
}
