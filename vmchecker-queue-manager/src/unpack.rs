//! Bundle extraction
//!
//! Bundles arrive as gzipped tarballs. Extraction walks the archive entry by
//! entry and refuses any path that would land outside the destination
//! directory, so a hostile submission cannot overwrite files elsewhere on the
//! tester.

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::BufReader;
use std::path::{Component, Path};

/// Extracts a bundle archive into `dest`
///
/// `dest` must already exist. Entries with absolute paths or `..` components
/// abort the extraction.
pub fn extract_bundle(bundle: &Path, dest: &Path) -> Result<()> {
    let file = File::open(bundle)
        .with_context(|| format!("Failed to open bundle {}", bundle.display()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));

    for entry in archive
        .entries()
        .context("Failed to read bundle archive")?
    {
        let mut entry = entry.context("Corrupt bundle entry")?;
        let path = entry
            .path()
            .context("Bundle entry has an invalid path")?
            .into_owned();

        if !is_safe_entry_path(&path) {
            bail!(
                "Bundle entry {} escapes the unpack directory",
                path.display()
            );
        }

        entry.unpack_in(dest).with_context(|| {
            format!("Failed to unpack bundle entry {}", path.display())
        })?;
    }

    Ok(())
}

/// True when every component of the entry path stays inside the destination
fn is_safe_entry_path(path: &Path) -> bool {
    path.components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}
