//! Archive walker and assembler
//!
//! Streams every entry of the source JAR into a new archive. Entries other
//! than the target class are copied raw (compressed bytes, CRC and method
//! untouched); the target class goes through [`transform_class`]; extra
//! entries are appended last, unless the archive already holds them with the
//! same bytes. The destination only appears once the whole archive was
//! written, with the permissions of the source archive.

use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::config::Config;
use crate::error::ArchiveError;
use crate::patch::{transform_class, PatchOutcome, PatchSpec};

/// One entry of the source archive, in central directory order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub index: usize,
    pub path: String,
    pub is_dir: bool,
    pub compression: CompressionMethod,
    /// Uncompressed size
    pub size: u64,
}

pub struct JarReader {
    path: PathBuf,
    archive: ZipArchive<File>,
}

impl JarReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| ArchiveError::unreadable(&path, e))?;
        let archive = ZipArchive::new(file).map_err(|e| ArchiveError::unreadable(&path, e))?;
        Ok(Self { path, archive })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&mut self) -> Result<Vec<EntryInfo>, ArchiveError> {
        let mut entries = Vec::with_capacity(self.archive.len());
        for index in 0..self.archive.len() {
            let file = self
                .archive
                .by_index_raw(index)
                .map_err(|e| ArchiveError::unreadable(&self.path, e))?;
            entries.push(EntryInfo {
                index,
                path: file.name().to_string(),
                is_dir: file.is_dir(),
                compression: file.compression(),
                size: file.size(),
            });
        }
        Ok(entries)
    }

    /// Decompressed bytes of entry `index`
    pub fn read(&mut self, index: usize) -> Result<Vec<u8>, ArchiveError> {
        let mut file = self
            .archive
            .by_index(index)
            .map_err(|e| ArchiveError::unreadable(&self.path, e))?;
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)
            .map_err(|e| ArchiveError::unreadable(&self.path, format!("entry {}: {}", file.name(), e)))?;
        Ok(data)
    }

    /// Unix mode and modification time of entry `index`
    fn entry_metadata(&mut self, index: usize) -> Result<(Option<u32>, Option<DateTime>), ArchiveError> {
        let file = self
            .archive
            .by_index_raw(index)
            .map_err(|e| ArchiveError::unreadable(&self.path, e))?;
        Ok((file.unix_mode(), file.last_modified()))
    }
}

/// Whether `path` is the entry `spec` targets. Paths compare exactly.
pub fn is_target_entry(path: &str, spec: &PatchSpec) -> bool {
    path == spec.target_class_path
}

/// An entry appended after all original entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraEntry {
    pub path: String,
    pub data: Vec<u8>,
}

impl ExtraEntry {
    pub fn new(path: impl Into<String>, data: Vec<u8>) -> Self {
        Self { path: path.into(), data }
    }

    /// Load `file` from disk to be stored as `archive_path`
    pub fn from_file(archive_path: impl Into<String>, file: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let file = file.as_ref();
        let data = std::fs::read(file).map_err(|e| ArchiveError::unreadable(file, e))?;
        Ok(Self::new(archive_path, data))
    }

    /// Load every path of `paths` from below `dir`
    pub fn load_all(dir: impl AsRef<Path>, paths: &[String]) -> Result<Vec<Self>, ArchiveError> {
        let dir = dir.as_ref();
        paths
            .iter()
            .map(|path| Self::from_file(path.as_str(), dir.join(path)))
            .collect()
    }
}

/// Summary of one [`transform`] run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformReport {
    /// Original entries copied without modification
    pub entries_copied: usize,
    pub target_found: bool,
    /// `None` when the target entry was absent
    pub outcome: Option<PatchOutcome>,
    pub extra_entries: usize,
    /// Extra entries already present in the source with identical bytes
    pub extra_entries_present: usize,
}

/// Rewrite `source` into `destination` according to `spec`.
///
/// Any failure leaves no file at `destination`.
pub fn transform(
    source: impl AsRef<Path>,
    destination: impl AsRef<Path>,
    spec: &PatchSpec,
    extra_entries: &[ExtraEntry],
    config: &Config,
) -> Result<TransformReport, ArchiveError> {
    let destination = destination.as_ref();
    let mut reader = JarReader::open(source)?;
    let permissions = std::fs::metadata(reader.path())
        .map_err(|e| ArchiveError::unreadable(reader.path(), e))?
        .permissions();
    let entries = reader.entries()?;
    let appended = select_extra_entries(&mut reader, &entries, extra_entries)?;

    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(|e| ArchiveError::write_failed(destination, e))?;
    let mut staged = NamedTempFile::new_in(&parent).map_err(|e| ArchiveError::write_failed(destination, e))?;

    let mut report = {
        let writer = ZipWriter::new(staged.as_file_mut());
        write_archive(&mut reader, &entries, writer, destination, spec, &appended, config)?
    };
    report.extra_entries_present = extra_entries.len() - appended.len();

    // The staging file is created owner-only.
    staged
        .as_file()
        .set_permissions(permissions)
        .map_err(|e| ArchiveError::write_failed(destination, e))?;
    staged
        .as_file()
        .sync_all()
        .map_err(|e| ArchiveError::write_failed(destination, e))?;
    staged
        .persist(destination)
        .map_err(|e| ArchiveError::write_failed(destination, e.error))?;

    info!(
        "wrote {}: {} entries copied, target {}, {} extra entries",
        destination.display(),
        report.entries_copied,
        if report.target_found { "present" } else { "absent" },
        report.extra_entries
    );
    Ok(report)
}

/// Extra entries still to append. An extra entry whose path the archive
/// already holds with the same content is left out; any other clash, with
/// the archive or another extra entry, is a `DuplicateEntry`.
fn select_extra_entries<'a>(
    reader: &mut JarReader,
    entries: &[EntryInfo],
    extra_entries: &'a [ExtraEntry],
) -> Result<Vec<&'a ExtraEntry>, ArchiveError> {
    let mut seen = HashSet::new();
    let mut appended = Vec::with_capacity(extra_entries.len());
    for extra in extra_entries {
        if !seen.insert(extra.path.as_str()) {
            return Err(ArchiveError::DuplicateEntry(extra.path.clone()));
        }
        match entries.iter().find(|e| e.path == extra.path) {
            Some(existing) if !existing.is_dir && reader.read(existing.index)? == extra.data => {
                debug!("{} already present with the same content", extra.path);
            }
            Some(_) => return Err(ArchiveError::DuplicateEntry(extra.path.clone())),
            None => appended.push(extra),
        }
    }
    Ok(appended)
}

fn write_archive<W: Write + Seek>(
    reader: &mut JarReader,
    entries: &[EntryInfo],
    mut writer: ZipWriter<W>,
    destination: &Path,
    spec: &PatchSpec,
    extra_entries: &[&ExtraEntry],
    config: &Config,
) -> Result<TransformReport, ArchiveError> {
    let write_failed = |e: &dyn std::fmt::Display| ArchiveError::write_failed(destination, e.to_string());
    let mut report = TransformReport {
        entries_copied: 0,
        target_found: false,
        outcome: None,
        extra_entries: 0,
        extra_entries_present: 0,
    };

    for entry in entries {
        if !entry.is_dir && is_target_entry(&entry.path, spec) {
            report.target_found = true;
            info!("found target class {}", entry.path);
            let data = reader.read(entry.index)?;
            let transformed = transform_class(&data, spec).map_err(|source| ArchiveError::TransformFailed {
                path: entry.path.clone(),
                source,
            })?;
            if let PatchOutcome::Patched { .. } = transformed.outcome {
                let mut options = SimpleFileOptions::default();
                options = if entry.compression == CompressionMethod::Stored {
                    options.compression_method(CompressionMethod::Stored)
                } else {
                    options
                        .compression_method(CompressionMethod::Deflated)
                        .compression_level(Some(config.compression_level))
                };
                let (mode, modified) = reader.entry_metadata(entry.index)?;
                if let Some(mode) = mode {
                    options = options.unix_permissions(mode);
                }
                if let Some(modified) = modified {
                    options = options.last_modified_time(modified);
                }
                writer.start_file(entry.path.as_str(), options).map_err(|e| write_failed(&e))?;
                writer.write_all(&transformed.bytes).map_err(|e| write_failed(&e))?;
            } else {
                // Nothing changed: keep the original compressed bytes.
                copy_raw(reader, entry.index, &mut writer, destination)?;
            }
            report.outcome = Some(transformed.outcome);
            continue;
        }

        copy_raw(reader, entry.index, &mut writer, destination)?;
        debug!("copied {}", entry.path);
        report.entries_copied += 1;
    }

    if !report.target_found {
        warn!("target class {} not present in {}", spec.target_class_path, reader.path().display());
    }

    for extra in extra_entries {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(config.compression_level));
        writer.start_file(extra.path.as_str(), options).map_err(|e| write_failed(&e))?;
        writer.write_all(&extra.data).map_err(|e| write_failed(&e))?;
        debug!("appended {} ({} bytes)", extra.path, extra.data.len());
        report.extra_entries += 1;
    }

    writer.finish().map_err(|e| write_failed(&e))?;
    Ok(report)
}

fn copy_raw<W: Write + Seek>(
    reader: &mut JarReader,
    index: usize,
    writer: &mut ZipWriter<W>,
    destination: &Path,
) -> Result<(), ArchiveError> {
    let file = reader
        .archive
        .by_index_raw(index)
        .map_err(|e| ArchiveError::unreadable(&reader.path, e))?;
    writer
        .raw_copy_file(file)
        .map_err(|e| ArchiveError::write_failed(destination, e))
}
