//! File storage backend
//!
//! Store file layout, integers big-endian:
//!
//! ```text
//! "CMST"  magic
//! u8      file version (1)
//! u8      signature scheme id
//! u64     next serial
//! u32     record count
//! ...     per record: u32 length, then the `.pqcert` encoding with secret
//! ```
//!
//! Saves go to a sibling temp file which is then renamed over the store, so
//! a crash never leaves a half-written store behind. The store holds every
//! secret key, so it is created readable by its owner only.
//!
//! Writers take an exclusive `flock` on `<store>.lock` for the whole
//! load, change and save sequence. Two `certman` processes on one store
//! therefore never allocate the same serial or overwrite each other.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::BufMut;
use certman_core::codec::{self, ByteReader};
use certman_core::{CodecError, SchemeKind, StoreSnapshot};
use tracing::{debug, info};

use super::{PersistedStore, StorageError, StoreBackend, StoreLock};

const MAGIC: &[u8; 4] = b"CMST";
const FILE_VERSION: u8 = 1;

#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        sibling(&self.path, ".lock")
    }

    fn io_error(&self, path: &Path, source: io::Error) -> StorageError {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl StoreBackend for FileBackend {
    fn load(&self) -> Result<Option<PersistedStore>, StorageError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No store file yet");
                return Ok(None);
            }
            Err(e) => return Err(self.io_error(&self.path, e)),
        };
        let store = decode_store(&bytes)?;
        info!(
            path = %self.path.display(),
            records = store.snapshot.records.len(),
            scheme = %store.scheme,
            "Loaded certificate store"
        );
        Ok(Some(store))
    }

    fn save(&self, store: &PersistedStore) -> Result<(), StorageError> {
        let bytes = encode_store(store);
        write_atomic(&self.path, &bytes, true, true).map_err(|e| self.io_error(&self.path, e))?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "Saved certificate store");
        Ok(())
    }

    fn lock(&self) -> Result<StoreLock, StorageError> {
        let path = self.lock_path();
        let file = private_options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| self.io_error(&path, e))?;
        flock_exclusive(&file).map_err(|e| self.io_error(&path, e))?;
        debug!(path = %path.display(), "Acquired store lock");
        Ok(StoreLock::held(file))
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Open options for files only the owner may read
fn private_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

/// Write `bytes` to `path` through a sibling temp file
///
/// The temp file is moved into place only once fully written and synced.
/// With `replace` false an existing `path` is left untouched and the call
/// fails with `ErrorKind::AlreadyExists`. `private` files are created with
/// mode `0600`.
pub fn write_atomic(path: &Path, bytes: &[u8], replace: bool, private: bool) -> io::Result<()> {
    let temp = sibling(path, &format!(".{}.tmp", std::process::id()));
    match fs::remove_file(&temp) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }

    let mut options = if private {
        private_options()
    } else {
        OpenOptions::new()
    };
    let result = options
        .write(true)
        .create_new(true)
        .open(&temp)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|_| {
            if replace {
                fs::rename(&temp, path)
            } else {
                // hard_link fails if `path` exists, unlike rename
                fs::hard_link(&temp, path).and_then(|_| fs::remove_file(&temp))
            }
        });

    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

/// Block until an exclusive `flock` on `file` is held
fn flock_exclusive(file: &File) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        loop {
            // SAFETY: flock is a standard POSIX call and fd is a valid
            // descriptor owned by `file` for the duration of the call.
            let result = unsafe { libc::flock(fd, libc::LOCK_EX) };
            if result == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(())
    }
}

pub fn encode_store(store: &PersistedStore) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.put_slice(MAGIC);
    buf.put_u8(FILE_VERSION);
    buf.put_u8(store.scheme.code());
    buf.put_u64(store.snapshot.next_serial);
    buf.put_u32(store.snapshot.records.len() as u32);
    for record in &store.snapshot.records {
        codec::put_len_prefixed(&mut buf, &codec::encode(record, true));
    }
    buf
}

pub fn decode_store(bytes: &[u8]) -> Result<PersistedStore, StorageError> {
    let mut reader = ByteReader::new(bytes);
    if reader.bytes(MAGIC.len()).map_err(|_| StorageError::BadMagic)? != MAGIC {
        return Err(StorageError::BadMagic);
    }
    let version = reader.u8()?;
    if version != FILE_VERSION {
        return Err(StorageError::UnsupportedVersion(version));
    }
    let scheme_id = reader.u8()?;
    let scheme = SchemeKind::from_code(scheme_id).ok_or(StorageError::UnknownScheme(scheme_id))?;
    let next_serial = reader.u64()?;
    let count = reader.u32()? as usize;
    if count > reader.remaining() / 4 {
        return Err(CodecError::TruncatedInput.into());
    }

    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        records.push(codec::decode(reader.len_prefixed()?)?);
    }
    reader.finish()?;

    Ok(PersistedStore {
        scheme,
        snapshot: StoreSnapshot {
            next_serial,
            records,
        },
    })
}
