// SPDX-License-Identifier: MIT OR Apache-2.0

//! Backend over a host directory via `std::fs`.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use super::{DirEntry, EntryKind, File, Filesystem, Timestamps};

/// A filesystem rooted at a host directory.
///
/// Storage paths map below the root; `"/a/b"` resolves to `<root>/a/b`.
#[derive(Clone, Debug)]
pub struct HostFs {
    root: PathBuf,
}

impl HostFs {
    /// A backend exposing everything below `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let rel = path.trim_matches('/');
        if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }
}

struct HostFile(fs::File);

impl File for HostFile {
    fn size(&mut self) -> io::Result<u64> {
        Ok(self.0.metadata()?.len())
    }

    fn set_size(&mut self, size: u64) -> io::Result<()> {
        self.0.set_len(size)
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.0.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            let read = self.0.read(&mut buf[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        Ok(filled)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<()> {
        self.0.seek(SeekFrom::Start(offset))?;
        self.0.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.sync_data()
    }
}

fn unix_secs(time: io::Result<std::time::SystemTime>) -> i64 {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl Filesystem for HostFs {
    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.resolve(path))? {
            let entry = entry?;
            let meta = entry.metadata()?;
            let kind = if meta.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
                size: if meta.is_dir() { 0 } else { meta.len() },
            });
        }
        Ok(entries)
    }

    fn open_file(&self, path: &str, write: bool) -> io::Result<Box<dyn File>> {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(write)
            .open(self.resolve(path))?;
        Ok(Box::new(HostFile(file)))
    }

    fn create_file(&self, path: &str, size: u64) -> io::Result<()> {
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.resolve(path))?;
        file.set_len(size)
    }

    fn create_dir(&self, path: &str) -> io::Result<()> {
        fs::create_dir(self.resolve(path))
    }

    fn rename_file(&self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.resolve(from), self.resolve(to))
    }

    fn rename_dir(&self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.resolve(from), self.resolve(to))
    }

    fn remove_file(&self, path: &str) -> io::Result<()> {
        fs::remove_file(self.resolve(path))
    }

    fn remove_dir_all(&self, path: &str) -> io::Result<()> {
        fs::remove_dir_all(self.resolve(path))
    }

    fn entry_kind(&self, path: &str) -> io::Result<EntryKind> {
        let meta = fs::metadata(self.resolve(path))?;
        Ok(if meta.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        })
    }

    fn timestamps(&self, path: &str) -> io::Result<Timestamps> {
        let meta = fs::metadata(self.resolve(path))?;
        Ok(Timestamps {
            created: unix_secs(meta.created()),
            modified: unix_secs(meta.modified()),
        })
    }

    #[cfg(unix)]
    fn free_space(&self) -> u64 {
        statvfs(&self.root)
            .map(|st| st.f_bavail as u64 * st.f_frsize as u64)
            .unwrap_or(0)
    }

    #[cfg(not(unix))]
    fn free_space(&self) -> u64 {
        0
    }

    #[cfg(unix)]
    fn total_space(&self) -> u64 {
        statvfs(&self.root)
            .map(|st| st.f_blocks as u64 * st.f_frsize as u64)
            .unwrap_or(0)
    }

    #[cfg(not(unix))]
    fn total_space(&self) -> u64 {
        0
    }
}

#[cfg(unix)]
fn statvfs(root: &std::path::Path) -> Option<libc::statvfs> {
    use std::os::unix::ffi::OsStrExt;

    let path = std::ffi::CString::new(root.as_os_str().as_bytes()).ok()?;
    let mut st = std::mem::MaybeUninit::<libc::statvfs>::zeroed();
    // SAFETY: `path` is a valid NUL-terminated string and `st` points at
    // a properly sized statvfs buffer.
    let rc = unsafe { libc::statvfs(path.as_ptr(), st.as_mut_ptr()) };
    if rc == 0 {
        Some(unsafe { st.assume_init() })
    } else {
        None
    }
}
