//! Packs a run's output directory into `<dir>.tar.gz`.
//!
//! Top-level files are added under the directory's own name and then removed.
//! Non-empty `.tar.gz` files produced by collectors are unpacked into the
//! outer archive, with the absolute output path they were written under
//! replaced by that name. Lock files are left out. `task.json` stays on disk
//! untouched; the archived copy carries the final status and output directory.

use super::run_info::RECORD_FILE;
use crate::error::{DiagError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

/// Path of the archive written for `root`
pub fn archive_path_for(root: &Path) -> PathBuf {
    let mut path = root.as_os_str().to_owned();
    path.push(".tar.gz");
    PathBuf::from(path)
}

/// Archive `root` next to itself, recording `status` in the stored `task.json`
pub fn archive_output(root: &Path, status: &str, finished_dir: Option<&Path>) -> Result<PathBuf> {
    let base = root
        .file_name()
        .map(PathBuf::from)
        .ok_or_else(|| DiagError::archive(format!("{:?} has no directory name", root)))?;
    let target = archive_path_for(root);
    let encoder = GzEncoder::new(File::create(&target)?, Compression::default());
    let mut builder = Builder::new(encoder);

    let mut record = None;
    let mut dirs = Vec::new();
    let mut entries: Vec<_> = fs::read_dir(root)?.flatten().map(|e| e.path()).collect();
    entries.sort();

    for path in entries {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        if path.is_dir() {
            dirs.push((name, path));
            continue;
        }
        if name == RECORD_FILE {
            record = Some(path);
            continue;
        }
        if name.ends_with(".tar.gz") && fs::metadata(&path)?.len() > 0 {
            if let Err(e) = fold_nested(&mut builder, &path, root, &base) {
                log::warn!("Storing {:?} as is, could not unpack it: {}", path, e);
                let stem = name.trim_end_matches(".tar.gz");
                builder.append_path_with_name(&path, base.join(stem).join(&name))?;
            }
        } else if !name.ends_with(".lock") {
            builder.append_path_with_name(&path, base.join(&name))?;
        }
        fs::remove_file(&path)?;
    }

    if let Some(path) = record {
        let data = final_record(&path, status, finished_dir)?;
        let mut header = tar::Header::new_gnu();
        header.set_metadata(&fs::metadata(&path)?);
        header.set_size(data.len() as u64);
        header.set_cksum();
        builder.append_data(&mut header, base.join(RECORD_FILE), data.as_slice())?;
    }
    for (name, path) in dirs {
        if let Err(e) = builder.append_dir_all(base.join(&name), &path) {
            log::warn!("Skipping directory {:?} in archive: {}", path, e);
        }
    }

    builder.into_inner()?.finish()?.flush()?;
    log::info!("Archived {:?} to {:?}", root, target);
    Ok(target)
}

/// Copy the members of a nested archive into `builder`, re-rooted under `base`
fn fold_nested<W: Write>(builder: &mut Builder<W>, nested: &Path, root: &Path, base: &Path) -> io::Result<()> {
    let root_name = root.to_string_lossy().replace('\\', "/");
    let root_name = root_name.trim_start_matches('/').to_string();
    let mut archive = Archive::new(GzDecoder::new(File::open(nested)?));

    for entry in archive.entries()? {
        let mut entry = entry?;
        let member = entry.path()?.to_string_lossy().replace('\\', "/");
        let Some(relative) = member.trim_start_matches('/').strip_prefix(&root_name) else {
            continue;
        };
        let relative = relative.trim_start_matches('/');
        if relative.is_empty() {
            continue;
        }
        let mut header = entry.header().clone();
        builder.append_data(&mut header, base.join(relative), &mut entry)?;
    }
    Ok(())
}

/// Archived copy of the record; the file on disk keeps the live status
fn final_record(path: &Path, status: &str, finished_dir: Option<&Path>) -> Result<Vec<u8>> {
    let mut record: serde_json::Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    if let Some(object) = record.as_object_mut() {
        object.insert("status".into(), status.into());
        if let Some(dir) = finished_dir {
            object.insert("output_directory".into(), dir.to_string_lossy().into());
        }
    }
    Ok(serde_json::to_vec_pretty(&record)?)
}
