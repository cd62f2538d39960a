// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory backend.
//!
//! A path-keyed node map behind a mutex. Used by the test suites; also
//! handy as a scratch volume. Cloning shares the underlying tree.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use super::{DirEntry, EntryKind, File, Filesystem, Timestamps};

const CAPACITY: u64 = 64 * 1024 * 1024;

#[derive(Clone)]
enum Node {
    File { data: Vec<u8>, times: Timestamps },
    Dir { times: Timestamps },
}

struct Inner {
    nodes: Mutex<HashMap<String, Node>>,
    read_only: AtomicBool,
    clock: AtomicI64,
}

/// An in-memory filesystem volume.
#[derive(Clone)]
pub struct MemFs {
    inner: Arc<Inner>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalised node key: `"/"` for the root, no trailing slash otherwise.
fn norm(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::from("/")
    } else {
        format!("/{trimmed}")
    }
}

fn parent_of(key: &str) -> String {
    match key.rfind('/') {
        Some(0) | None => String::from("/"),
        Some(idx) => key[..idx].to_owned(),
    }
}

fn leaf_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

fn denied() -> io::Error {
    io::Error::new(io::ErrorKind::PermissionDenied, "volume is read-only")
}

impl MemFs {
    /// An empty volume containing only the root directory.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            String::from("/"),
            Node::Dir {
                times: Timestamps::default(),
            },
        );
        Self {
            inner: Arc::new(Inner {
                nodes: Mutex::new(nodes),
                read_only: AtomicBool::new(false),
                clock: AtomicI64::new(1_600_000_000),
            }),
        }
    }

    /// Make every mutating operation fail with a permission error.
    pub fn set_read_only(&self, read_only: bool) {
        self.inner.read_only.store(read_only, Ordering::Relaxed);
    }

    fn check_writable(&self) -> io::Result<()> {
        if self.inner.read_only.load(Ordering::Relaxed) {
            Err(denied())
        } else {
            Ok(())
        }
    }

    fn tick(&self) -> i64 {
        self.inner.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn require_dir(
        nodes: &HashMap<String, Node>,
        key: &str,
    ) -> io::Result<()> {
        match nodes.get(key) {
            Some(Node::Dir { .. }) => Ok(()),
            Some(Node::File { .. }) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a directory",
            )),
            None => Err(io::ErrorKind::NotFound.into()),
        }
    }
}

struct MemFile {
    inner: Arc<Inner>,
    key: String,
    write: bool,
}

impl MemFile {
    fn with_data<R>(
        &self,
        f: impl FnOnce(&mut Vec<u8>, &mut Timestamps) -> R,
    ) -> io::Result<R> {
        let mut nodes = self
            .inner
            .nodes
            .lock()
            .map_err(|_| io::Error::other("poisoned lock"))?;
        match nodes.get_mut(&self.key) {
            Some(Node::File { data, times }) => Ok(f(data, times)),
            _ => Err(io::ErrorKind::NotFound.into()),
        }
    }
}

impl File for MemFile {
    fn size(&mut self) -> io::Result<u64> {
        self.with_data(|data, _| data.len() as u64)
    }

    fn set_size(&mut self, size: u64) -> io::Result<()> {
        if !self.write {
            return Err(denied());
        }
        self.with_data(|data, _| data.resize(size as usize, 0))
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.with_data(|data, _| {
            let start = (offset as usize).min(data.len());
            let len = buf.len().min(data.len() - start);
            buf[..len].copy_from_slice(&data[start..start + len]);
            len
        })
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<()> {
        if !self.write || self.inner.read_only.load(Ordering::Relaxed) {
            return Err(denied());
        }
        let now = self.inner.clock.fetch_add(1, Ordering::Relaxed);
        self.with_data(|data, times| {
            let end = offset as usize + buf.len();
            if data.len() < end {
                data.resize(end, 0);
            }
            data[offset as usize..end].copy_from_slice(buf);
            times.modified = now;
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Filesystem for MemFs {
    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>> {
        let key = norm(path);
        let nodes = self
            .inner
            .nodes
            .lock()
            .map_err(|_| io::Error::other("poisoned lock"))?;
        Self::require_dir(&nodes, &key)?;

        let mut entries = Vec::new();
        for (k, node) in nodes.iter() {
            if k != &key && parent_of(k) == key {
                let (kind, size) = match node {
                    Node::File { data, .. } => {
                        (EntryKind::File, data.len() as u64)
                    }
                    Node::Dir { .. } => (EntryKind::Directory, 0),
                };
                entries.push(DirEntry {
                    name: leaf_of(k).to_owned(),
                    kind,
                    size,
                });
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn open_file(&self, path: &str, write: bool) -> io::Result<Box<dyn File>> {
        if write {
            self.check_writable()?;
        }
        let key = norm(path);
        let nodes = self
            .inner
            .nodes
            .lock()
            .map_err(|_| io::Error::other("poisoned lock"))?;
        match nodes.get(&key) {
            Some(Node::File { .. }) => Ok(Box::new(MemFile {
                inner: self.inner.clone(),
                key,
                write,
            })),
            Some(Node::Dir { .. }) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "is a directory",
            )),
            None => Err(io::ErrorKind::NotFound.into()),
        }
    }

    fn create_file(&self, path: &str, size: u64) -> io::Result<()> {
        self.check_writable()?;
        if size > CAPACITY {
            return Err(io::Error::other("storage full"));
        }
        let key = norm(path);
        let now = self.tick();
        let mut nodes = self
            .inner
            .nodes
            .lock()
            .map_err(|_| io::Error::other("poisoned lock"))?;
        Self::require_dir(&nodes, &parent_of(&key))?;
        if nodes.contains_key(&key) {
            return Err(io::ErrorKind::AlreadyExists.into());
        }
        nodes.insert(
            key,
            Node::File {
                data: vec![0; size as usize],
                times: Timestamps {
                    created: now,
                    modified: now,
                },
            },
        );
        Ok(())
    }

    fn create_dir(&self, path: &str) -> io::Result<()> {
        self.check_writable()?;
        let key = norm(path);
        let now = self.tick();
        let mut nodes = self
            .inner
            .nodes
            .lock()
            .map_err(|_| io::Error::other("poisoned lock"))?;
        Self::require_dir(&nodes, &parent_of(&key))?;
        if nodes.contains_key(&key) {
            return Err(io::ErrorKind::AlreadyExists.into());
        }
        nodes.insert(
            key,
            Node::Dir {
                times: Timestamps {
                    created: now,
                    modified: now,
                },
            },
        );
        Ok(())
    }

    fn rename_file(&self, from: &str, to: &str) -> io::Result<()> {
        self.check_writable()?;
        let (from, to) = (norm(from), norm(to));
        let mut nodes = self
            .inner
            .nodes
            .lock()
            .map_err(|_| io::Error::other("poisoned lock"))?;
        Self::require_dir(&nodes, &parent_of(&to))?;
        match nodes.remove(&from) {
            Some(node @ Node::File { .. }) => {
                nodes.insert(to, node);
                Ok(())
            }
            Some(node) => {
                nodes.insert(from, node);
                Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "is a directory",
                ))
            }
            None => Err(io::ErrorKind::NotFound.into()),
        }
    }

    fn rename_dir(&self, from: &str, to: &str) -> io::Result<()> {
        self.check_writable()?;
        let (from, to) = (norm(from), norm(to));
        if from == "/" {
            return Err(denied());
        }
        let mut nodes = self
            .inner
            .nodes
            .lock()
            .map_err(|_| io::Error::other("poisoned lock"))?;
        Self::require_dir(&nodes, &from)?;
        Self::require_dir(&nodes, &parent_of(&to))?;

        let prefix = format!("{from}/");
        let moved: Vec<String> = nodes
            .keys()
            .filter(|k| *k == &from || k.starts_with(&prefix))
            .cloned()
            .collect();
        for key in moved {
            if let Some(node) = nodes.remove(&key) {
                let new_key = format!("{to}{}", &key[from.len()..]);
                nodes.insert(new_key, node);
            }
        }
        Ok(())
    }

    fn remove_file(&self, path: &str) -> io::Result<()> {
        self.check_writable()?;
        let key = norm(path);
        let mut nodes = self
            .inner
            .nodes
            .lock()
            .map_err(|_| io::Error::other("poisoned lock"))?;
        match nodes.get(&key) {
            Some(Node::File { .. }) => {
                nodes.remove(&key);
                Ok(())
            }
            Some(Node::Dir { .. }) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "is a directory",
            )),
            None => Err(io::ErrorKind::NotFound.into()),
        }
    }

    fn remove_dir_all(&self, path: &str) -> io::Result<()> {
        self.check_writable()?;
        let key = norm(path);
        if key == "/" {
            return Err(denied());
        }
        let mut nodes = self
            .inner
            .nodes
            .lock()
            .map_err(|_| io::Error::other("poisoned lock"))?;
        Self::require_dir(&nodes, &key)?;
        let prefix = format!("{key}/");
        nodes.retain(|k, _| k != &key && !k.starts_with(&prefix));
        Ok(())
    }

    fn entry_kind(&self, path: &str) -> io::Result<EntryKind> {
        let nodes = self
            .inner
            .nodes
            .lock()
            .map_err(|_| io::Error::other("poisoned lock"))?;
        match nodes.get(&norm(path)) {
            Some(Node::File { .. }) => Ok(EntryKind::File),
            Some(Node::Dir { .. }) => Ok(EntryKind::Directory),
            None => Err(io::ErrorKind::NotFound.into()),
        }
    }

    fn timestamps(&self, path: &str) -> io::Result<Timestamps> {
        let nodes = self
            .inner
            .nodes
            .lock()
            .map_err(|_| io::Error::other("poisoned lock"))?;
        match nodes.get(&norm(path)) {
            Some(Node::File { times, .. }) | Some(Node::Dir { times }) => {
                Ok(*times)
            }
            None => Err(io::ErrorKind::NotFound.into()),
        }
    }

    fn free_space(&self) -> u64 {
        let used: u64 = self
            .inner
            .nodes
            .lock()
            .map(|nodes| {
                nodes
                    .values()
                    .map(|n| match n {
                        Node::File { data, .. } => data.len() as u64,
                        Node::Dir { .. } => 0,
                    })
                    .sum()
            })
            .unwrap_or(0);
        CAPACITY.saturating_sub(used)
    }

    fn total_space(&self) -> u64 {
        CAPACITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_basics() {
        let fs = MemFs::new();
        fs.create_dir("/music").unwrap();
        fs.create_file("/music/track.ogg", 3).unwrap();

        let entries = fs.read_dir("/").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "music");
        assert_eq!(entries[0].kind, EntryKind::Directory);

        let entries = fs.read_dir("/music/").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].size, 3);

        // nested creates need an existing parent
        assert!(fs.create_file("/nope/x", 0).is_err());
    }

    #[test]
    fn file_io() {
        let fs = MemFs::new();
        fs.create_file("/f", 0).unwrap();
        {
            let mut f = fs.open_file("/f", true).unwrap();
            f.write_at(b"hello", 0).unwrap();
            f.write_at(b"HE", 0).unwrap();
        }
        let mut f = fs.open_file("/f", false).unwrap();
        assert_eq!(f.size().unwrap(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(f.read_at(&mut buf, 0).unwrap(), 5);
        assert_eq!(&buf, b"HEllo");
    }

    #[test]
    fn dir_rename_moves_children() {
        let fs = MemFs::new();
        fs.create_dir("/a").unwrap();
        fs.create_dir("/a/b").unwrap();
        fs.create_file("/a/b/f", 1).unwrap();
        fs.rename_dir("/a", "/z").unwrap();
        assert_eq!(fs.entry_kind("/z/b/f").unwrap(), EntryKind::File);
        assert!(fs.entry_kind("/a").is_err());
    }

    #[test]
    fn read_only_volume() {
        let fs = MemFs::new();
        fs.create_file("/f", 0).unwrap();
        fs.set_read_only(true);
        assert!(fs.remove_file("/f").is_err());
        assert!(fs.create_file("/g", 0).is_err());
        assert!(fs.open_file("/f", true).is_err());
        fs.set_read_only(false);
        fs.remove_file("/f").unwrap();
    }

    #[test]
    fn root_is_protected() {
        let fs = MemFs::new();
        assert!(fs.remove_dir_all("/").is_err());
        assert!(fs.remove_dir_all("").is_err());
    }

    #[test]
    fn capacities() {
        let fs = MemFs::new();
        let free = fs.free_space();
        fs.create_file("/f", 1024).unwrap();
        assert_eq!(fs.free_space(), free - 1024);
        assert!(fs.total_space() >= free);
    }
}
