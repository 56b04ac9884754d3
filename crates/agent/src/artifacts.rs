//! Artifact bundles: a worker's output directory as one zip.

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::DriverError;

/// Zip every file under `dir`, with paths relative to it.
///
/// Returns `None` when the directory is missing or holds no files.
pub fn zip_dir(dir: &Path) -> Result<Option<Vec<u8>>, DriverError> {
    if !dir.is_dir() {
        return Ok(None);
    }

    let mut files = Vec::new();
    collect_files(dir, &mut files)?;
    if files.is_empty() {
        return Ok(None);
    }
    files.sort();

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for path in &files {
        let name = path
            .strip_prefix(dir)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        writer.start_file(name, options)?;
        writer.write_all(&fs::read(path)?)?;
    }

    let cursor = writer.finish()?;
    Ok(Some(cursor.into_inner()))
}

/// Unpack a bundle into `dest`, creating it if needed.
///
/// Entries that would escape `dest` are rejected by the zip reader.
pub fn unzip_into(bundle: &[u8], dest: &Path) -> Result<(), DriverError> {
    fs::create_dir_all(dest)?;
    let mut archive = ZipArchive::new(Cursor::new(bundle))?;
    archive.extract(dest)?;
    Ok(())
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), DriverError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_empty_dir_has_no_bundle() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(zip_dir(&tmp.path().join("absent")).unwrap().is_none());
        assert!(zip_dir(tmp.path()).unwrap().is_none());
    }

    #[test]
    fn bundle_unpacks_with_nested_paths() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("scope")).unwrap();
        fs::write(src.path().join("log.txt"), "boot ok").unwrap();
        fs::write(src.path().join("scope/trace.csv"), "t,v\n0,1\n").unwrap();

        let bundle = zip_dir(src.path()).unwrap().unwrap();

        let dest = tempfile::tempdir().unwrap();
        let target = dest.path().join("bench-7");
        unzip_into(&bundle, &target).unwrap();

        assert_eq!(fs::read_to_string(target.join("log.txt")).unwrap(), "boot ok");
        assert_eq!(
            fs::read_to_string(target.join("scope/trace.csv")).unwrap(),
            "t,v\n0,1\n"
        );
    }
}
