//! On-disk layout for durable task lists.
//!
//! A list is a single little-endian binary file:
//!
//! ```text
//! magic     8 bytes  b"SPOOLTL\0"
//! version   u16
//! name_len  u16, then that many bytes of UTF-8 list name
//! count     u32
//! records   count * (len u32 + encoded task)
//! cursor    u32
//! ```
//!
//! Saves go through a sibling `.tmp` file and a rename, so a crash mid-write
//! leaves the previous canonical file intact.

use std::fs::{self, File};
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::StoreError;

const LIST_MAGIC: &[u8; 8] = b"SPOOLTL\0";
const LIST_VERSION: u16 = 1;
const TEMP_SUFFIX: &str = ".tmp";

/// Location of a durable list on disk: a directory plus a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePath {
    dir: PathBuf,
    name: String,
}

impl StorePath {
    /// Creates a store path under `dir` with the given file name.
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
        }
    }

    /// The list's file name, also written into the file header.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full path of the canonical list file.
    pub fn canonical(&self) -> PathBuf {
        self.dir.join(&self.name)
    }

    /// Full path of the temporary file written during saves.
    pub fn temporary(&self) -> PathBuf {
        self.dir.join(format!("{}{}", self.name, TEMP_SUFFIX))
    }
}

/// Decoded file contents before task deserialization.
pub(super) struct RawList {
    pub(super) name: String,
    pub(super) records: Vec<Vec<u8>>,
    pub(super) cursor: u32,
}

/// Writes the full list to the temporary file, then renames it over the
/// canonical one. Parent directories are created if absent.
pub(super) fn write_atomic(
    path: &StorePath,
    records: &[Vec<u8>],
    cursor: u32,
) -> Result<(), StoreError> {
    fs::create_dir_all(&path.dir)?;

    let temporary = path.temporary();
    let mut writer = BufWriter::new(File::create(&temporary)?);

    writer.write_all(LIST_MAGIC)?;
    writer.write_all(&LIST_VERSION.to_le_bytes())?;

    let name = path.name.as_bytes();
    let name_len = u16::try_from(name.len())
        .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "list name longer than 64 KiB"))?;
    writer.write_all(&name_len.to_le_bytes())?;
    writer.write_all(name)?;

    let count = u32::try_from(records.len())
        .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "too many records"))?;
    writer.write_all(&count.to_le_bytes())?;
    for record in records {
        let len = u32::try_from(record.len())
            .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "record longer than 4 GiB"))?;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(record)?;
    }
    writer.write_all(&cursor.to_le_bytes())?;

    writer.flush()?;
    drop(writer);
    fs::rename(&temporary, path.canonical())?;
    Ok(())
}

/// Reads the canonical file. Returns `Ok(None)` if it does not exist.
pub(super) fn read(path: &StorePath) -> Result<Option<RawList>, StoreError> {
    let mut file = match File::open(path.canonical()) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StoreError::Io(err)),
    };

    let mut magic = [0u8; 8];
    read_exact(&mut file, &mut magic)?;
    if &magic != LIST_MAGIC {
        return Err(StoreError::InvalidMagic);
    }

    let version = read_u16(&mut file)?;
    if version != LIST_VERSION {
        return Err(StoreError::UnsupportedVersion {
            expected: LIST_VERSION,
            found: version,
        });
    }

    let name_len = read_u16(&mut file)? as usize;
    let mut name_bytes = vec![0u8; name_len];
    read_exact(&mut file, &mut name_bytes)?;
    let name = String::from_utf8(name_bytes)
        .map_err(|e| StoreError::Decode(format!("list name is not UTF-8: {e}")))?;

    let count = read_u32(&mut file)? as usize;
    let mut records = Vec::new();
    for _ in 0..count {
        let len = read_u32(&mut file)? as usize;
        let mut record = vec![0u8; len];
        read_exact(&mut file, &mut record)?;
        records.push(record);
    }
    let cursor = read_u32(&mut file)?;

    Ok(Some(RawList {
        name,
        records,
        cursor,
    }))
}

/// Removes the canonical file. Returns whether a file was removed.
pub(super) fn delete(path: &StorePath) -> Result<bool, StoreError> {
    remove_if_exists(&path.canonical())
}

/// Removes a temporary file left behind by an interrupted save.
pub(super) fn delete_temporary(path: &StorePath) -> Result<bool, StoreError> {
    remove_if_exists(&path.temporary())
}

fn remove_if_exists(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(StoreError::Io(err)),
    }
}

fn read_exact(reader: &mut impl Read, buf: &mut [u8]) -> Result<(), StoreError> {
    reader.read_exact(buf).map_err(|err| {
        if err.kind() == ErrorKind::UnexpectedEof {
            StoreError::Truncated
        } else {
            StoreError::Io(err)
        }
    })
}

fn read_u16(reader: &mut impl Read) -> Result<u16, StoreError> {
    let mut buf = [0u8; 2];
    read_exact(reader, &mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(reader: &mut impl Read) -> Result<u32, StoreError> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}
