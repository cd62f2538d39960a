// SPDX-License-Identifier: MIT OR Apache-2.0
/*
 * MTP storage: one backing volume and its lazily built object graph.
 */

//! Storages and the storage manager.
//!
//! A [`Storage`] owns one [`Filesystem`] and materialises its tree as MTP
//! objects on demand, keeping the handle→object and path→handle indices
//! consistent across create, move, copy, rename and delete. The
//! [`StorageManager`] composes several storages behind the unified handle
//! space.

use std::collections::{BTreeMap, HashMap};

use log::{debug, error, trace, warn};

use mtp::{
    AccessCapability, DataType, FilesystemType, Handle, ObjectPropertyCode,
    ResponseCode, StorageId, StorageType, Transport, HANDLE_ROOT, PROP_ALL,
};

use crate::codec::{MtpDateTime, MtpString, ObjectInfo};
use crate::object::{next_handle, Object};
use crate::packet::DataPacket;
use crate::vfs::{EntryKind, Filesystem};
use crate::CommandResult;

/// Static description of a storage, serialised by `GetStorageInfo`.
///
/// The capacity fields are refreshed from the backend on every query.
#[derive(Clone, Debug)]
pub struct StorageInfo {
    /// Hardware classification.
    pub storage_type: StorageType,
    /// Filesystem classification.
    pub filesystem_type: FilesystemType,
    /// Read/write capability advertised to the host.
    pub access_capability: AccessCapability,
    /// Total capacity in bytes.
    pub max_capacity: u64,
    /// Free space in bytes.
    pub free_space: u64,
    /// Free space in objects; `0xffff_ffff` = not tracked.
    pub free_space_objects: u32,
    /// Human-readable description.
    pub description: MtpString,
    /// Volume label.
    pub volume_identifier: MtpString,
}

impl Default for StorageInfo {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Undefined,
            filesystem_type: FilesystemType::Undefined,
            access_capability: AccessCapability::ReadWrite,
            max_capacity: 0,
            free_space: 0,
            free_space_objects: 0xffff_ffff,
            description: MtpString::default(),
            volume_identifier: MtpString::default(),
        }
    }
}

impl ObjectInfo {
    /// The ObjectInfo dataset describing `object`.
    ///
    /// Timestamps are left for the caller, which fills them for files
    /// only.
    pub fn for_object(storage_id: StorageId, object: &Object) -> Self {
        Self {
            storage_id,
            format: object.format(),
            compressed_size: u32::try_from(object.size)
                .unwrap_or(0xffff_ffff),
            parent: if object.handle == HANDLE_ROOT {
                Handle(0)
            } else {
                object.parent
            },
            filename: object.name.clone(),
            ..Default::default()
        }
    }
}

/// One backing volume and its object graph.
pub struct Storage {
    id: StorageId,
    fs: Box<dyn Filesystem>,
    info: StorageInfo,
    objects: HashMap<Handle, Object>,
    known_paths: HashMap<String, Handle>,
}

/// The `known_paths` key for a path: directories are indexed without
/// their trailing slash; the root keeps its single slash.
fn index_key(path: &str) -> &str {
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}

impl Storage {
    /// A storage over `fs`, with the root object installed.
    pub fn new(
        fs: Box<dyn Filesystem>,
        id: StorageId,
        info: StorageInfo,
    ) -> Self {
        let mut storage = Self {
            id,
            fs,
            info,
            objects: HashMap::new(),
            known_paths: HashMap::new(),
        };
        let root = Object::root();
        storage.known_paths.insert(root.path.clone(), root.handle);
        storage.objects.insert(root.handle, root);
        storage.refresh_info();
        storage
    }

    /// This storage's id.
    pub fn id(&self) -> StorageId {
        self.id
    }

    /// Look up an object by handle.
    pub fn object(&self, handle: Handle) -> Option<&Object> {
        self.objects.get(&handle)
    }

    /// Whether `handle` names a live object in this storage.
    pub fn contains(&self, handle: Handle) -> bool {
        self.objects.contains_key(&handle)
    }

    /// The handle cached for `path`, if any.
    pub fn handle_for_path(&self, path: &str) -> Option<Handle> {
        self.known_paths.get(index_key(path)).copied()
    }

    fn refresh_info(&mut self) {
        self.info.free_space = self.fs.free_space();
        self.info.max_capacity = self.fs.total_space();
    }

    /// Materialise the children of `handle` down to `depth` levels,
    /// returning the handles found at exactly that depth.
    ///
    /// Already-cached paths keep their handles. A depth of zero returns
    /// the object itself; a backend listing failure yields an empty
    /// result.
    pub fn cache_directory(
        &mut self,
        handle: Handle,
        depth: u32,
    ) -> Vec<Handle> {
        self.cache_at(handle, depth, 1)
    }

    fn cache_at(
        &mut self,
        handle: Handle,
        depth: u32,
        cur_depth: u32,
    ) -> Vec<Handle> {
        if depth == 0 {
            return vec![handle];
        }

        let dir_path = match self.objects.get(&handle) {
            Some(object) => object.path.clone(),
            None => return Vec::new(),
        };
        let entries = match self.fs.read_dir(&dir_path) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("listing {dir_path} failed: {e}");
                return Vec::new();
            }
        };

        let mut handles = Vec::with_capacity(entries.len());
        for entry in entries {
            let key = format!("{dir_path}{}", entry.name);
            let child = match self.known_paths.get(&key) {
                // already cached, keep the existing handle
                Some(cached) => *cached,
                None => {
                    let new = next_handle();
                    self.known_paths.insert(key.clone(), new);

                    let mut path = key;
                    if entry.kind == EntryKind::Directory {
                        path.push('/');
                    }
                    self.objects.insert(
                        new,
                        Object::from_entry(&entry, path, new, handle),
                    );
                    new
                }
            };

            if cur_depth == depth {
                handles.push(child);
            }
            if cur_depth < depth
                && self
                    .objects
                    .get(&child)
                    .is_some_and(|o| o.is_directory())
            {
                handles.extend(self.cache_at(child, depth, cur_depth + 1));
            }
        }
        handles
    }

    /// Serialise StorageInfo with freshly queried capacities.
    pub fn get_storage_info(&mut self, data: &mut DataPacket) -> CommandResult {
        self.refresh_info();
        data.put(&self.info.storage_type);
        data.put(&self.info.filesystem_type);
        data.put(&self.info.access_capability);
        data.put(&self.info.max_capacity);
        data.put(&self.info.free_space);
        data.put(&self.info.free_space_objects);
        data.put(&self.info.description);
        data.put(&self.info.volume_identifier);
        Ok(())
    }

    /// Serialise the child handles of `handle` as an array.
    pub fn get_object_handles(
        &mut self,
        data: &mut DataPacket,
        handle: Handle,
    ) -> CommandResult {
        if let Some(object) = self.objects.get(&handle) {
            trace!("listing directory {}", object.path);
        }
        let handles: Vec<u32> = self
            .cache_directory(handle, 1)
            .iter()
            .map(|h| h.0)
            .collect();
        data.put(&handles);
        Ok(())
    }

    /// Serialise the ObjectInfo dataset for `handle`.
    pub fn get_object_info(
        &mut self,
        data: &mut DataPacket,
        handle: Handle,
    ) -> CommandResult {
        let object = self
            .objects
            .get(&handle)
            .ok_or(ResponseCode::InvalidObjectHandle)?;
        trace!("getting info for {}", object.path);

        let mut info = ObjectInfo::for_object(self.id, object);
        if object.is_file() {
            if let Ok(ts) = self.fs.timestamps(&object.path) {
                info.created = MtpDateTime::from_unix(ts.created);
                info.modified = MtpDateTime::from_unix(ts.modified);
            }
        }
        data.put(&info);
        Ok(())
    }

    /// Stream the object's file contents to the host.
    pub fn get_object<T: Transport>(
        &mut self,
        transport: &mut T,
        data: &mut DataPacket,
        handle: Handle,
    ) -> CommandResult {
        let object = self
            .objects
            .get(&handle)
            .ok_or(ResponseCode::InvalidObjectHandle)?;
        trace!("getting object {} (size {:#x})", object.path, object.size);

        let mut file = self
            .fs
            .open_file(&object.path, false)
            .map_err(|_| ResponseCode::AccessDenied)?;
        data.stream_from_file(transport, file.as_mut(), object.size, 0)
            .map_err(|_| ResponseCode::IncompleteTransfer)
    }

    /// Stream `[offset, offset + size)` of the object's file contents,
    /// clamped to the file length. Returns the byte count streamed.
    pub fn get_partial_object<T: Transport>(
        &mut self,
        transport: &mut T,
        data: &mut DataPacket,
        handle: Handle,
        offset: u64,
        size: u64,
    ) -> CommandResult<u64> {
        let object = self
            .objects
            .get(&handle)
            .ok_or(ResponseCode::InvalidObjectHandle)?;
        trace!(
            "getting partial object {} (offset {offset:#x}, size {size:#x})",
            object.path
        );

        let len = size.min(object.size.saturating_sub(offset));
        let mut file = self
            .fs
            .open_file(&object.path, false)
            .map_err(|_| ResponseCode::AccessDenied)?;
        data.stream_from_file(transport, file.as_mut(), len, offset)
            .map_err(|_| ResponseCode::IncompleteTransfer)?;
        Ok(len)
    }

    /// Delete the object and drop it from both indices.
    pub fn delete_object(&mut self, handle: Handle) -> CommandResult {
        if handle == HANDLE_ROOT {
            return Err(ResponseCode::ObjectWriteProtected);
        }
        let object = self
            .objects
            .get(&handle)
            .ok_or(ResponseCode::InvalidObjectHandle)?;
        trace!("deleting object {}", object.path);

        let result = if object.is_file() {
            self.fs.remove_file(&object.path)
        } else {
            self.fs.remove_dir_all(&object.path)
        };
        result.map_err(|_| ResponseCode::ObjectWriteProtected)?;

        if let Some(object) = self.objects.remove(&handle) {
            self.known_paths.remove(index_key(&object.path));
        }
        Ok(())
    }

    /// Decode an ObjectInfo dataset and create the described file or
    /// directory under `parent`. Returns the new object's handle.
    ///
    /// A failing backend create aborts with `Access_Denied` before the
    /// object is indexed.
    pub fn send_object_info(
        &mut self,
        data: &mut DataPacket,
        parent: Handle,
    ) -> CommandResult<Handle> {
        let info: ObjectInfo =
            data.pop().map_err(|_| ResponseCode::GeneralError)?;
        let parent_path = self
            .objects
            .get(&parent)
            .ok_or(ResponseCode::InvalidObjectHandle)?
            .path
            .clone();

        let destination = format!("{parent_path}{}", info.filename.as_str());
        let handle = next_handle();
        let mut object = Object {
            kind: Object::kind_of(info.format),
            size: info.compressed_size as u64,
            name: info.filename.clone(),
            path: destination.clone(),
            handle,
            parent,
        };

        let created = if object.is_file() {
            self.fs.create_file(&object.path, object.size)
        } else {
            self.fs.create_dir(&object.path)
        };
        if let Err(e) = created {
            warn!("creating {} failed: {e}", object.path);
            return Err(ResponseCode::AccessDenied);
        }

        trace!(
            "adding object {} (kind {:?}, size {:#x})",
            object.path,
            object.kind,
            object.size
        );
        self.known_paths.insert(destination, handle);
        if object.is_directory() {
            object.path.push('/');
        }
        self.objects.insert(handle, object);
        Ok(handle)
    }

    /// Stream the host's data stage into the object created by the
    /// preceding [`send_object_info`](Storage::send_object_info).
    pub fn send_object<T: Transport>(
        &mut self,
        transport: &mut T,
        data: &mut DataPacket,
        handle: Handle,
    ) -> CommandResult {
        let object = self
            .objects
            .get(&handle)
            .ok_or(ResponseCode::InvalidObjectHandle)?;
        trace!("receiving object {} (size {:#x})", object.path, object.size);

        let mut file = self
            .fs
            .open_file(&object.path, true)
            .map_err(|_| ResponseCode::AccessDenied)?;
        data.stream_to_file(transport, file.as_mut(), object.size, 0)
            .map_err(|_| ResponseCode::IncompleteTransfer)
    }

    /// Move the object under a new parent within this storage. The handle
    /// is preserved.
    pub fn move_object(
        &mut self,
        handle: Handle,
        parent: Handle,
    ) -> CommandResult<Handle> {
        let parent_path = self
            .objects
            .get(&parent)
            .ok_or(ResponseCode::InvalidObjectHandle)?
            .path
            .clone();
        let object = self
            .objects
            .get(&handle)
            .ok_or(ResponseCode::InvalidObjectHandle)?;

        let old_path = object.path.clone();
        let mut new_path = format!("{parent_path}{}", object.name.as_str());
        trace!("moving object {old_path} to {new_path}");

        let renamed = if object.is_file() {
            self.fs.rename_file(&old_path, &new_path)
        } else {
            self.fs.rename_dir(&old_path, &new_path)
        };
        renamed.map_err(|_| ResponseCode::GeneralError)?;

        self.known_paths.remove(index_key(&old_path));
        self.known_paths.insert(new_path.clone(), handle);
        if let Some(object) = self.objects.get_mut(&handle) {
            if object.is_directory() {
                new_path.push('/');
            }
            object.path = new_path;
            object.parent = parent;
        }
        Ok(handle)
    }

    /// Copy the object under a new parent within this storage, assigning
    /// a fresh handle. Directories are copied as an empty directory, not
    /// recursively. Backend create or copy failures abort with
    /// `Store_Not_Available` before the copy is indexed.
    pub fn copy_object(
        &mut self,
        handle: Handle,
        parent: Handle,
    ) -> CommandResult<Handle> {
        let parent_path = self
            .objects
            .get(&parent)
            .ok_or(ResponseCode::InvalidObjectHandle)?
            .path
            .clone();
        let source = self
            .objects
            .get(&handle)
            .ok_or(ResponseCode::InvalidObjectHandle)?
            .clone();

        let destination = format!("{parent_path}{}", source.name.as_str());
        trace!("copying object {} to {destination}", source.path);

        let new_handle = next_handle();
        if source.is_file() {
            if let Err(e) = self.fs.create_file(&destination, source.size) {
                warn!("creating {destination} failed: {e}");
                return Err(ResponseCode::StoreNotAvailable);
            }
            self.fs
                .copy_file(&source.path, &destination)
                .map_err(|_| ResponseCode::StoreNotAvailable)?;
        } else if let Err(e) = self.fs.create_dir(&destination) {
            warn!("creating {destination} failed: {e}");
            return Err(ResponseCode::StoreNotAvailable);
        }

        self.known_paths.insert(destination.clone(), new_handle);
        let mut path = destination;
        if source.is_directory() {
            path.push('/');
        }
        self.objects.insert(
            new_handle,
            Object {
                kind: source.kind,
                size: source.size,
                name: source.name.clone(),
                path,
                handle: new_handle,
                parent,
            },
        );
        Ok(new_handle)
    }

    /// Serialise one object property value.
    pub fn get_object_prop_value(
        &mut self,
        data: &mut DataPacket,
        handle: Handle,
        property: ObjectPropertyCode,
    ) -> CommandResult {
        let object = self
            .objects
            .get(&handle)
            .ok_or(ResponseCode::InvalidObjectHandle)?;
        trace!("getting prop {property:?} for {}", object.path);

        match property {
            ObjectPropertyCode::StorageId => data.put(&self.id),
            ObjectPropertyCode::ObjectFormat => data.put(&object.format()),
            ObjectPropertyCode::ObjectSize => {
                if object.is_directory() {
                    return Err(ResponseCode::InvalidObjectPropCode);
                }
                data.put(&object.size);
            }
            ObjectPropertyCode::ObjectFileName => data.put(&object.name),
            ObjectPropertyCode::DateCreated => {
                if object.is_directory() {
                    return Err(ResponseCode::InvalidObjectPropCode);
                }
                let created = self
                    .fs
                    .timestamps(&object.path)
                    .map(|ts| ts.created)
                    .unwrap_or_default();
                data.put(&MtpDateTime::from_unix(created));
            }
            ObjectPropertyCode::DateModified => {
                if object.is_directory() {
                    return Err(ResponseCode::InvalidObjectPropCode);
                }
                let modified = self
                    .fs
                    .timestamps(&object.path)
                    .map(|ts| ts.modified)
                    .unwrap_or_default();
                data.put(&MtpDateTime::from_unix(modified));
            }
            ObjectPropertyCode::ParentObject => {
                let parent = if object.handle == HANDLE_ROOT {
                    0
                } else {
                    object.parent.0
                };
                data.put(&parent);
            }
            _ => {
                error!("object prop value {property:?} not implemented");
                return Err(ResponseCode::InvalidObjectPropCode);
            }
        }
        Ok(())
    }

    /// Apply one object property write. Only the file name is writable;
    /// the rename keeps the handle and re-indexes the path.
    pub fn set_object_prop_value(
        &mut self,
        data: &mut DataPacket,
        handle: Handle,
        property: ObjectPropertyCode,
    ) -> CommandResult {
        if property != ObjectPropertyCode::ObjectFileName {
            error!("object prop value {property:?} not writable");
            return Err(ResponseCode::InvalidObjectPropCode);
        }

        let name: MtpString =
            data.pop().map_err(|_| ResponseCode::GeneralError)?;
        let object = self
            .objects
            .get(&handle)
            .ok_or(ResponseCode::InvalidObjectHandle)?;
        let parent_path = self
            .objects
            .get(&object.parent)
            .ok_or(ResponseCode::InvalidObjectHandle)?
            .path
            .clone();

        let old_path = object.path.clone();
        let is_file = object.is_file();
        let mut new_path = format!("{parent_path}{}", name.as_str());
        trace!("renaming object {old_path} to {new_path}");

        let renamed = if is_file {
            self.fs.rename_file(&old_path, &new_path)
        } else {
            self.fs.rename_dir(&old_path, &new_path)
        };
        renamed.map_err(|_| ResponseCode::GeneralError)?;

        self.known_paths.remove(index_key(&old_path));
        self.known_paths.insert(new_path.clone(), handle);
        if let Some(object) = self.objects.get_mut(&handle) {
            object.name = name;
            if object.is_directory() {
                new_path.push('/');
            }
            object.path = new_path;
        }
        Ok(())
    }

    /// Serialise the property quadruples for the objects below `handle`.
    ///
    /// The leading element count is back-filled once the loop has run.
    pub fn get_object_prop_list(
        &mut self,
        data: &mut DataPacket,
        handle: Handle,
        format: u32,
        property: u32,
        group_code: u32,
        depth: u32,
    ) -> CommandResult {
        if group_code != 0 {
            return Err(ResponseCode::SpecificationByGroupUnsupported);
        }

        let handles = self.cache_directory(handle, depth);
        data.put(&0u32); // element count, patched below
        let mut count = 0u32;

        let want = |code: ObjectPropertyCode| {
            property == PROP_ALL || property == code as u32
        };

        for h in handles {
            let Some(object) = self.objects.get(&h) else {
                continue;
            };
            if format != 0 && object.format().0 as u32 != format {
                continue;
            }

            if want(ObjectPropertyCode::StorageId) {
                data.put(&h);
                data.put(&ObjectPropertyCode::StorageId);
                data.put(&DataType::Uint32);
                data.put(&self.id);
                count += 1;
            }
            if want(ObjectPropertyCode::ObjectFormat) {
                data.put(&h);
                data.put(&ObjectPropertyCode::ObjectFormat);
                data.put(&DataType::Uint16);
                data.put(&object.format());
                count += 1;
            }
            if want(ObjectPropertyCode::ObjectFileName) {
                data.put(&h);
                data.put(&ObjectPropertyCode::ObjectFileName);
                data.put(&DataType::Str);
                data.put(&object.name);
                count += 1;
            }
            if want(ObjectPropertyCode::ParentObject) {
                data.put(&h);
                data.put(&ObjectPropertyCode::ParentObject);
                data.put(&DataType::Uint32);
                data.put(&object.parent);
                count += 1;
            }
            if object.is_file() {
                if want(ObjectPropertyCode::ObjectSize) {
                    data.put(&h);
                    data.put(&ObjectPropertyCode::ObjectSize);
                    data.put(&DataType::Uint64);
                    data.put(&object.size);
                    count += 1;
                }
                if want(ObjectPropertyCode::DateCreated)
                    || want(ObjectPropertyCode::DateModified)
                {
                    let ts =
                        self.fs.timestamps(&object.path).unwrap_or_default();
                    if want(ObjectPropertyCode::DateCreated) {
                        data.put(&h);
                        data.put(&ObjectPropertyCode::DateCreated);
                        data.put(&DataType::Str);
                        data.put(&MtpDateTime::from_unix(ts.created));
                        count += 1;
                    }
                    if want(ObjectPropertyCode::DateModified) {
                        data.put(&h);
                        data.put(&ObjectPropertyCode::DateModified);
                        data.put(&DataType::Str);
                        data.put(&MtpDateTime::from_unix(ts.modified));
                        count += 1;
                    }
                }
            }
        }

        data.patch_lead_count(count);
        Ok(())
    }
}

/// The set of storages served by one responder, keyed by storage id.
#[derive(Default)]
pub struct StorageManager {
    storages: BTreeMap<u32, Storage>,
}

impl StorageManager {
    /// An empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a storage under its id.
    pub fn add_storage(&mut self, storage: Storage) {
        self.storages.insert(storage.id().0, storage);
    }

    /// Look up a storage by id.
    pub fn storage(&self, id: StorageId) -> Option<&Storage> {
        self.storages.get(&id.0)
    }

    /// Look up a storage by id, or fail with `Invalid_StorageID`.
    pub fn storage_mut(&mut self, id: StorageId) -> CommandResult<&mut Storage> {
        self.storages
            .get_mut(&id.0)
            .ok_or(ResponseCode::InvalidStorageId)
    }

    /// Find the storage owning `handle`, or fail with
    /// `Invalid_ObjectHandle`.
    pub fn find_handle_mut(
        &mut self,
        handle: Handle,
    ) -> CommandResult<&mut Storage> {
        self.storages
            .values_mut()
            .find(|s| s.contains(handle))
            .ok_or(ResponseCode::InvalidObjectHandle)
    }

    /// Serialise the array of storage ids.
    pub fn get_storage_ids(&self, data: &mut DataPacket) -> CommandResult {
        let ids: Vec<u32> = self.storages.keys().copied().collect();
        data.put(&ids);
        Ok(())
    }
}
