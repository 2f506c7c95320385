//! Image discovery kernel.
//!
//! Runs on the target resource as `iceberg discover <path>`: lists the
//! images of one directory and writes them, optionally with their sizes,
//! to a small CSV table that the client later reads back.

use clap::Args;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::base_name;
use crate::error::{Error, Result};
use crate::{ilog, ilog_debug, ilog_warn};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// One discovered image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Path of the image on the resource where it was discovered.
    pub path: String,
    /// Size rounded up to whole megabytes, when requested.
    pub size_mb: Option<u64>,
}

impl ImageRecord {
    pub fn new(path: impl Into<String>, size_mb: Option<u64>) -> Self {
        Self {
            path: path.into(),
            size_mb,
        }
    }
}

/// Arguments of the `discover` subcommand.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct DiscoverArgs {
    /// Directory holding the images
    pub path: PathBuf,

    /// Extension of the image files, without the dot
    #[arg(long = "image_ftype", default_value = "tif")]
    pub image_ftype: String,

    /// Name of the output file, without extension
    #[arg(long, default_value = "list")]
    pub filename: String,

    /// Extension of the output file
    #[arg(long, default_value = "csv")]
    pub filetype: String,

    /// Include the file size in megabytes
    #[arg(long)]
    pub filesize: bool,
}

impl DiscoverArgs {
    /// Output file name, relative to the working directory.
    pub fn output_file(&self) -> PathBuf {
        PathBuf::from(format!("{}.{}", self.filename, self.filetype))
    }
}

/// Run the kernel, writing the table under `out_dir`.
///
/// Returns the path of the written table.
pub fn run(args: &DiscoverArgs, out_dir: &Path) -> Result<PathBuf> {
    let records = discover_images(&args.path, &args.image_ftype, args.filesize)?;
    let output = out_dir.join(args.output_file());
    write_image_table(&output, &records, args.filesize)?;
    ilog!(
        "Discovered {} .{} images in {} -> {}",
        records.len(),
        args.image_ftype,
        args.path.display(),
        output.display()
    );
    Ok(output)
}

/// List the files of `dir` ending in `.<image_ftype>`.
///
/// The listing is not recursive and skips dot-files and anything that is not
/// a regular file. Records are sorted by file name so that the row order, and
/// with it the ordinal of each analysis pipeline, is stable between runs.
/// Paths that are not valid UTF-8 can't be handed to a task, so they are
/// skipped with a warning.
///
/// # Errors
/// Returns `Error::Io` if the directory or a file's metadata can't be read.
pub fn discover_images(dir: &Path, image_ftype: &str, with_size: bool) -> Result<Vec<ImageRecord>> {
    let suffix = format!(".{}", image_ftype);
    let mut found = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = match entry.path().into_os_string().into_string() {
            Ok(path) => path,
            Err(raw) => {
                ilog_warn!("Skipping {:?}: path is not valid UTF-8", raw);
                continue;
            }
        };
        let name = base_name(&path);
        if name.starts_with('.') || !name.ends_with(&suffix) {
            continue;
        }
        let metadata = fs::metadata(&path)?;
        if !metadata.is_file() {
            continue;
        }
        let size_mb = with_size.then(|| size_in_mb(metadata.len()));
        found.push(ImageRecord::new(path.as_str(), size_mb));
    }

    found.sort_by(|a, b| base_name(&a.path).cmp(base_name(&b.path)));
    ilog_debug!("discover_images dir={} found={}", dir.display(), found.len());
    Ok(found)
}

/// Size in whole megabytes, rounded up.
pub fn size_in_mb(bytes: u64) -> u64 {
    bytes.div_ceil(BYTES_PER_MB)
}

/// A table row. `Size` is absent from tables written without sizes.
#[derive(Debug, Serialize, Deserialize)]
struct Row {
    #[serde(rename = "Filename")]
    filename: String,
    #[serde(rename = "Size", default)]
    size: Option<u64>,
}

/// Write records as a `Filename[,Size]` table.
///
/// # Errors
/// Returns `Error::Csv` if the file can't be created or written.
pub fn write_image_table(path: &Path, records: &[ImageRecord], with_size: bool) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    if with_size {
        writer.write_record(["Filename", "Size"])?;
    } else {
        writer.write_record(["Filename"])?;
    }
    for record in records {
        if with_size {
            let size = record.size_mb.map(|s| s.to_string()).unwrap_or_default();
            writer.write_record([record.path.as_str(), size.as_str()])?;
        } else {
            writer.write_record([record.path.as_str()])?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Read a table written by [`write_image_table`].
///
/// A missing file reads as an empty table: no images were found.
///
/// # Errors
/// Returns `Error::InvalidTable` for a row with the wrong number of fields or
/// a size that is not a whole number, and `Error::Io` for other read failures.
pub fn read_image_table(path: &Path) -> Result<Vec<ImageRecord>> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            ilog_debug!("read_image_table missing file {}", path.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut reader = csv::Reader::from_reader(file);
    let mut records = Vec::new();
    for row in reader.deserialize::<Row>() {
        let row = row.map_err(|e| invalid_table(path, e))?;
        records.push(ImageRecord::new(row.filename, row.size));
    }
    Ok(records)
}

fn invalid_table(path: &Path, error: csv::Error) -> Error {
    if let csv::ErrorKind::Io(_) = error.kind() {
        return Error::Csv(error);
    }
    let line = error.position().map_or(0, |pos| pos.line() as usize);
    let reason = match error.kind() {
        csv::ErrorKind::UnequalLengths {
            expected_len, len, ..
        } => format!("expected {} field(s), found {}", expected_len, len),
        csv::ErrorKind::Deserialize { err, .. } => err.to_string(),
        _ => error.to_string(),
    };
    Error::InvalidTable {
        path: path.to_path_buf(),
        line,
        reason,
    }
}
