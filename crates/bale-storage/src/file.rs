//! Directory-backed storage source.
//!
//! Each instance is one file `<instance>.bale` holding the envelope bytes
//! followed by a 4-byte big-endian CRC32 of those bytes. Saves write a
//! temporary file, sync it, and rename it over the old one, so a reader
//! sees either the previous envelope or the new one.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, warn};

use bale_common::types::InstanceId;

use crate::error::{StorageError, StorageResult};
use crate::source::{save_range, StorageSource};

/// File extension of instance files.
pub const FILE_EXTENSION: &str = "bale";

const FOOTER_SIZE: usize = 4;

/// Storage source keeping one file per instance in a directory.
#[derive(Debug, Clone)]
pub struct FileSource {
    dir: PathBuf,
    default_instance: InstanceId,
}

impl FileSource {
    /// Opens (creating if needed) a directory source.
    pub fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            default_instance: InstanceId::NONE,
        })
    }

    /// Sets the instance read by [`StorageSource::load_header`].
    pub fn with_default_instance(mut self, instance: InstanceId) -> Self {
        self.default_instance = instance;
        self
    }

    /// Returns the directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of an instance file.
    pub fn path_for(&self, instance: InstanceId) -> PathBuf {
        self.dir.join(format!("{}.{FILE_EXTENSION}", instance.as_u16()))
    }

    fn read_verified(&self, instance: InstanceId) -> StorageResult<Vec<u8>> {
        let path = self.path_for(instance);
        let mut bytes = Vec::new();
        match File::open(&path) {
            Ok(mut file) => {
                file.read_to_end(&mut bytes)?;
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(instance));
            }
            Err(err) => return Err(err.into()),
        }

        if bytes.len() < FOOTER_SIZE {
            return Err(StorageError::Truncated {
                path,
                len: bytes.len() as u64,
            });
        }
        let body = bytes.len() - FOOTER_SIZE;
        let stored = u32::from_be_bytes([
            bytes[body],
            bytes[body + 1],
            bytes[body + 2],
            bytes[body + 3],
        ]);
        let computed = crc32fast::hash(&bytes[..body]);
        if stored != computed {
            warn!(path = %path.display(), "instance file failed checksum");
            return Err(StorageError::ChecksumMismatch {
                path,
                stored,
                computed,
            });
        }
        bytes.truncate(body);
        Ok(bytes)
    }
}

fn parse_instance(path: &Path) -> Option<InstanceId> {
    if path.extension()? != FILE_EXTENSION {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .parse::<u16>()
        .ok()
        .map(InstanceId::new)
}

impl StorageSource for FileSource {
    fn load(&self, instance: InstanceId) -> StorageResult<Bytes> {
        let bytes = self.read_verified(instance)?;
        debug!(%instance, bytes = bytes.len(), dir = %self.dir.display(), "file source load");
        Ok(Bytes::from(bytes))
    }

    fn load_header(&self, max_bytes: usize) -> StorageResult<Bytes> {
        let mut bytes = self.read_verified(self.default_instance)?;
        bytes.truncate(max_bytes);
        Ok(Bytes::from(bytes))
    }

    fn save(
        &self,
        bytes: &[u8],
        offset: usize,
        length: usize,
        instance: InstanceId,
    ) -> StorageResult<()> {
        let body = save_range(bytes, offset, length)?;
        let path = self.path_for(instance);
        let tmp = path.with_extension(format!("{FILE_EXTENSION}.tmp"));

        {
            let mut file = File::create(&tmp)?;
            file.write_all(body)?;
            file.write_all(&crc32fast::hash(body).to_be_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        debug!(%instance, bytes = body.len(), path = %path.display(), "file source save");
        Ok(())
    }

    fn valid_ids(&self) -> StorageResult<Vec<InstanceId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            if let Some(id) = parse_instance(&entry?.path()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn has_enumerable_ids(&self) -> bool {
        true
    }
}
