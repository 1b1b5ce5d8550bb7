//! Tarball construction and extraction
//!
//! Every archive copied into a container is produced by [`Archiver`]: a
//! gzip-compressed tar whose entries sit under a fixed in-container prefix
//! and are owned by the stack's `vcap` user regardless of who owns the files
//! on the host. Extraction handles the formats buildpacks and the lifecycle
//! source are published in (zip, tar.gz, tar).

use crate::error::{StagehandError, StagehandResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use tar::{EntryType, Header};
use tracing::debug;
use walkdir::WalkDir;

/// Owner uid of every archived entry (the stack's `vcap` user)
pub const OWNER_UID: u64 = 2000;
/// Owner gid of every archived entry
pub const OWNER_GID: u64 = 2000;
/// Owner user and group name of every archived entry
pub const OWNER_NAME: &str = "vcap";

/// Writes normalized gzip-tar archives of a directory tree
#[derive(Debug, Clone, Default)]
pub struct Archiver {
    prefix: PathBuf,
}

impl Archiver {
    /// Create an archiver that writes entries relative to the archive root
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy that places every entry under `prefix`
    pub fn with_prefix(&self, prefix: impl AsRef<Path>) -> Self {
        let prefix = prefix
            .as_ref()
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        Self { prefix }
    }

    /// The in-archive prefix, without a leading slash
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Archive `input_dir` into a gzip-compressed tarball at `output_path`
    pub fn compress(&self, input_dir: &Path, output_path: &Path) -> StagehandResult<()> {
        debug!(
            "Archiving {} -> {} (prefix /{})",
            input_dir.display(),
            output_path.display(),
            self.prefix.display()
        );

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StagehandError::io(format!("creating directory {}", parent.display()), e)
            })?;
        }

        let file = File::create(output_path).map_err(|e| {
            StagehandError::io(format!("creating archive {}", output_path.display()), e)
        })?;
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);

        for entry in WalkDir::new(input_dir).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                StagehandError::archive(format!("walking {}", input_dir.display()), e)
            })?;
            self.append(&mut builder, input_dir, entry.path())
                .map_err(|e| {
                    StagehandError::io(format!("archiving {}", entry.path().display()), e)
                })?;
        }

        let encoder = builder
            .into_inner()
            .map_err(|e| StagehandError::io("finishing tar stream", e))?;
        let mut writer = encoder
            .finish()
            .map_err(|e| StagehandError::io("finishing gzip stream", e))?;
        writer
            .flush()
            .map_err(|e| StagehandError::io(format!("writing {}", output_path.display()), e))?;

        Ok(())
    }

    fn append<W: Write>(
        &self,
        builder: &mut tar::Builder<W>,
        root: &Path,
        path: &Path,
    ) -> io::Result<()> {
        let relative = path
            .strip_prefix(root)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        // joining an empty path would leave a trailing separator on the root entry
        let name = if relative.as_os_str().is_empty() {
            self.prefix.clone()
        } else {
            self.prefix.join(relative)
        };
        if name.as_os_str().is_empty() {
            return Ok(());
        }

        let metadata = fs::symlink_metadata(path)?;
        let file_type = metadata.file_type();

        let mut header = Header::new_gnu();
        header.set_mode(metadata.permissions().mode() & 0o7777);
        header.set_mtime(metadata.mtime().max(0) as u64);
        header.set_uid(OWNER_UID);
        header.set_gid(OWNER_GID);
        header.set_username(OWNER_NAME)?;
        header.set_groupname(OWNER_NAME)?;

        if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            builder.append_data(&mut header, &name, io::empty())
        } else if file_type.is_symlink() {
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            let target = fs::read_link(path)?;
            let link_dir = path.parent().unwrap_or(root);
            let target = if target.is_absolute() {
                relative_to(&target, link_dir)
            } else {
                lexical_normalize(&target)
            };
            builder.append_link(&mut header, &name, &target)
        } else if file_type.is_file() {
            header.set_entry_type(EntryType::Regular);
            header.set_size(metadata.len());
            let file = File::open(path)?;
            builder.append_data(&mut header, &name, BufReader::new(file))
        } else {
            debug!("Skipping special file {}", path.display());
            Ok(())
        }
    }
}

/// Container format of a downloaded payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Gzip,
    Tar,
}

impl ArchiveFormat {
    /// Detect the format from the leading bytes of a stream, then rewind it
    pub fn detect<R: Read + Seek>(reader: &mut R) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        let mut read = 0;
        while read < magic.len() {
            match reader.read(&mut magic[read..])? {
                0 => break,
                n => read += n,
            }
        }
        reader.seek(SeekFrom::Start(0))?;

        Ok(match &magic[..read] {
            [b'P', b'K', 0x03, 0x04] => Self::Zip,
            [0x1f, 0x8b, ..] => Self::Gzip,
            _ => Self::Tar,
        })
    }
}

/// Extract an archive into `dest`, dropping the first `strip` path components
/// of every entry.
pub fn decompress<R: Read + Seek>(mut reader: R, dest: &Path, strip: usize) -> StagehandResult<()> {
    let format = ArchiveFormat::detect(&mut reader)
        .map_err(|e| StagehandError::io("reading archive header", e))?;
    debug!("Extracting {:?} archive into {}", format, dest.display());

    fs::create_dir_all(dest)
        .map_err(|e| StagehandError::io(format!("creating directory {}", dest.display()), e))?;

    match format {
        ArchiveFormat::Zip => unzip(reader, dest, strip),
        ArchiveFormat::Gzip => untar(GzDecoder::new(reader), dest, strip),
        ArchiveFormat::Tar => untar(reader, dest, strip),
    }
}

fn untar<R: Read>(reader: R, dest: &Path, strip: usize) -> StagehandResult<()> {
    let context = format!("extracting into {}", dest.display());
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);

    let entries = archive
        .entries()
        .map_err(|e| StagehandError::archive(&context, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| StagehandError::archive(&context, e))?;
        let path = entry
            .path()
            .map_err(|e| StagehandError::archive(&context, e))?
            .into_owned();
        let Some(relative) = strip_components(&path, strip)? else {
            continue;
        };
        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StagehandError::io(format!("creating directory {}", parent.display()), e)
            })?;
        }
        entry
            .unpack(&target)
            .map_err(|e| StagehandError::archive(format!("unpacking {}", relative.display()), e))?;
    }

    Ok(())
}

fn unzip<R: Read + Seek>(reader: R, dest: &Path, strip: usize) -> StagehandResult<()> {
    let context = format!("extracting into {}", dest.display());
    let mut archive =
        zip::ZipArchive::new(reader).map_err(|e| StagehandError::archive(&context, e))?;

    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|e| StagehandError::archive(&context, e))?;
        let Some(path) = file.enclosed_name() else {
            return Err(StagehandError::archive(
                &context,
                format!("entry {} escapes the destination", file.name()),
            ));
        };
        let Some(relative) = strip_components(&path, strip)? else {
            continue;
        };
        let target = dest.join(&relative);
        let mode = file.unix_mode();

        if file.is_dir() {
            fs::create_dir_all(&target).map_err(|e| {
                StagehandError::io(format!("creating directory {}", target.display()), e)
            })?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StagehandError::io(format!("creating directory {}", parent.display()), e)
            })?;
        }

        if mode.is_some_and(|m| m & 0o170000 == 0o120000) {
            let mut link = String::new();
            file.read_to_string(&mut link)
                .map_err(|e| StagehandError::io(format!("reading link {}", file.name()), e))?;
            std::os::unix::fs::symlink(&link, &target).map_err(|e| {
                StagehandError::io(format!("creating symlink {}", target.display()), e)
            })?;
            continue;
        }

        let mut out = File::create(&target)
            .map_err(|e| StagehandError::io(format!("creating {}", target.display()), e))?;
        io::copy(&mut file, &mut out)
            .map_err(|e| StagehandError::io(format!("writing {}", target.display()), e))?;

        if let Some(mode) = mode {
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777)).map_err(
                |e| StagehandError::io(format!("setting mode on {}", target.display()), e),
            )?;
        }
    }

    Ok(())
}

/// Read the contents of the single regular-file entry named `name` out of an
/// uncompressed tar stream, as produced by a copy out of a container.
pub fn extract_entry(tar_stream: &[u8], name: &str, source: &str) -> StagehandResult<Vec<u8>> {
    let context = format!("reading archive copied from {source}");
    let mut archive = tar::Archive::new(tar_stream);
    let entries = archive
        .entries()
        .map_err(|e| StagehandError::archive(&context, e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| StagehandError::archive(&context, e))?;
        if entry.header().entry_type() != EntryType::Regular {
            continue;
        }
        let matches = entry
            .path()
            .map_err(|e| StagehandError::archive(&context, e))?
            .file_name()
            .is_some_and(|n| n == name);
        if matches {
            let mut contents = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut contents)
                .map_err(|e| StagehandError::archive(&context, e))?;
            return Ok(contents);
        }
    }

    Err(StagehandError::ArchiveEntryMissing {
        entry: name.to_string(),
        source_path: source.to_string(),
    })
}

/// Drop `strip` leading components; `None` when nothing is left.
/// Rejects entries that would climb out of the destination.
fn strip_components(path: &Path, strip: usize) -> StagehandResult<Option<PathBuf>> {
    let mut normal = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normal.push(part),
            Component::CurDir => {}
            _ => {
                return Err(StagehandError::archive(
                    "validating entry",
                    format!("entry {} escapes the destination", path.display()),
                ))
            }
        }
    }

    if normal.len() <= strip {
        return Ok(None);
    }
    Ok(Some(normal[strip..].iter().collect()))
}

/// Resolve `.` and `..` without touching the filesystem
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)))
                    && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Express absolute `target` relative to the absolute directory `base`
fn relative_to(target: &Path, base: &Path) -> PathBuf {
    let target = lexical_normalize(target);
    let base = lexical_normalize(base);
    let target: Vec<_> = target.components().collect();
    let base: Vec<_> = base.components().collect();

    let common = target
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..base.len() {
        relative.push("..");
    }
    for component in &target[common..] {
        relative.push(component.as_os_str());
    }
    if relative.as_os_str().is_empty() {
        relative.push(".");
    }
    relative
}
