// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * MTP object entity and handle allocation.
 */

//! The object entity backing the MTP object graph, and the process-wide
//! handle allocator.

use std::sync::atomic::{AtomicU32, Ordering};

use mtp::{Handle, ObjectFormat, HANDLE_ROOT};

use crate::codec::MtpString;
use crate::vfs::{DirEntry, EntryKind};

static NEXT_HANDLE: AtomicU32 = AtomicU32::new(0);

/// Allocate a fresh object handle.
///
/// Handles are unique for the process lifetime and never zero; the
/// counter skips zero when it wraps.
pub fn next_handle() -> Handle {
    loop {
        let h = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if h != 0 {
            return Handle(h);
        }
    }
}

/// What an object is on the backing filesystem.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ObjectKind {
    /// A regular file.
    File,
    /// A directory (an MTP association).
    Directory,
}

impl From<EntryKind> for ObjectKind {
    fn from(kind: EntryKind) -> Self {
        match kind {
            EntryKind::File => Self::File,
            EntryKind::Directory => Self::Directory,
        }
    }
}

/// One node of a storage's object graph.
///
/// Directory paths carry a trailing slash, file paths never do. The
/// parent link is a handle into the owning storage's object map; the root
/// object is its own parent.
#[derive(Clone, Debug)]
pub struct Object {
    /// File or directory.
    pub kind: ObjectKind,
    /// File byte length; zero for directories.
    pub size: u64,
    /// The leaf name.
    pub name: MtpString,
    /// Absolute slash-separated path within the storage.
    pub path: String,
    /// This object's handle.
    pub handle: Handle,
    /// The parent object's handle.
    pub parent: Handle,
}

impl Object {
    /// The root object installed in every storage.
    pub fn root() -> Self {
        Self {
            kind: ObjectKind::Directory,
            size: 0,
            name: MtpString::default(),
            path: String::from("/"),
            handle: HANDLE_ROOT,
            parent: HANDLE_ROOT,
        }
    }

    /// An object materialised from a directory listing entry.
    pub fn from_entry(
        entry: &DirEntry,
        path: String,
        handle: Handle,
        parent: Handle,
    ) -> Self {
        Self {
            kind: entry.kind.into(),
            size: entry.size,
            name: MtpString::from(entry.name.as_str()),
            path,
            handle,
            parent,
        }
    }

    /// Classify a wire format code: associations are directories, every
    /// other format is treated as a file.
    pub fn kind_of(format: ObjectFormat) -> ObjectKind {
        if format.is_association() {
            ObjectKind::Directory
        } else {
            ObjectKind::File
        }
    }

    /// The wire format code for this object.
    pub fn format(&self) -> ObjectFormat {
        match self.kind {
            ObjectKind::File => ObjectFormat::UNDEFINED,
            ObjectKind::Directory => ObjectFormat::ASSOCIATION,
        }
    }

    /// Returns `true` for files.
    pub fn is_file(&self) -> bool {
        self.kind == ObjectKind::File
    }

    /// Returns `true` for directories.
    pub fn is_directory(&self) -> bool {
        self.kind == ObjectKind::Directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn handles_unique_and_nonzero() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let h = next_handle();
            assert_ne!(h.0, 0);
            assert!(seen.insert(h));
        }
    }

    #[test]
    fn root_is_its_own_parent() {
        let root = Object::root();
        assert_eq!(root.handle, HANDLE_ROOT);
        assert_eq!(root.parent, HANDLE_ROOT);
        assert_eq!(root.path, "/");
        assert!(root.is_directory());
        assert_eq!(root.format(), ObjectFormat::ASSOCIATION);
    }

    #[test]
    fn format_classification() {
        assert_eq!(
            Object::kind_of(ObjectFormat::ASSOCIATION),
            ObjectKind::Directory
        );
        assert_eq!(Object::kind_of(ObjectFormat::UNDEFINED), ObjectKind::File);
        // arbitrary wire formats are files
        assert_eq!(Object::kind_of(ObjectFormat(0x3801)), ObjectKind::File);
    }
}
