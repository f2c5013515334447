//! # Device Paths
//!
//! An owned copy of a UEFI device path: a sequence of `(type, subtype,
//! length)` nodes closed by an end-of-path node. Only the handful of node
//! kinds the boot policy looks at are named here; everything else is carried
//! as opaque bytes and handed back to the firmware untouched.

use alloc::vec::Vec;
use core::ptr::read_unaligned;

const NODE_HEADER_LEN: usize = 4;

/// Upper bound for paths read from raw firmware pointers.
const MAX_RAW_PATH_LEN: usize = 64 * 1024;

pub const TYPE_MEDIA: u8 = 0x04;
pub const TYPE_BBS: u8 = 0x05;
pub const TYPE_END: u8 = 0x7F;

pub const SUBTYPE_HARD_DRIVE: u8 = 0x01;
pub const SUBTYPE_FILE_PATH: u8 = 0x04;
pub const SUBTYPE_BBS: u8 = 0x01;
pub const SUBTYPE_END_ENTIRE: u8 = 0xFF;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DevicePathError {
    #[error("device path node at offset {0} is truncated or has an invalid length")]
    MalformedNode(usize),
    #[error("device path has no end node")]
    MissingEnd,
}

/// A single device path node.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Node<'a> {
    pub device_type: u8,
    pub sub_type: u8,
    /// The complete node, header included.
    pub bytes: &'a [u8],
}

impl Node<'_> {
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.bytes[NODE_HEADER_LEN..]
    }

    #[must_use]
    pub const fn is_end_entire(&self) -> bool {
        self.device_type == TYPE_END && self.sub_type == SUBTYPE_END_ENTIRE
    }
}

/// Reads the node header at `offset`, returning `(type, subtype, length)`.
fn node_header(bytes: &[u8], offset: usize) -> Result<(u8, u8, usize), DevicePathError> {
    let header = bytes
        .get(offset..offset + NODE_HEADER_LEN)
        .ok_or(DevicePathError::MalformedNode(offset))?;
    let len = usize::from(u16::from_le_bytes([header[2], header[3]]));
    if len < NODE_HEADER_LEN || offset + len > bytes.len() {
        return Err(DevicePathError::MalformedNode(offset));
    }
    Ok((header[0], header[1], len))
}

/// An owned, validated device path ending in an end-entire node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DevicePathBuf(Vec<u8>);

impl DevicePathBuf {
    /// Validates the first device path instance in `bytes` and copies it.
    /// Bytes following the end-entire node are ignored.
    ///
    /// # Errors
    /// If a node is truncated or the end node is missing.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DevicePathError> {
        let mut offset = 0;
        while offset < bytes.len() {
            let (device_type, sub_type, len) = node_header(bytes, offset)?;
            offset += len;
            if device_type == TYPE_END && sub_type == SUBTYPE_END_ENTIRE {
                return Ok(Self(bytes[..offset].to_vec()));
            }
        }
        Err(DevicePathError::MissingEnd)
    }

    /// Copies a device path owned by the firmware.
    ///
    /// # Errors
    /// If a node is malformed or no end node appears within 64 KiB.
    ///
    /// # Safety
    /// `ptr` must point to a readable device path.
    pub unsafe fn from_raw(ptr: *const u8) -> Result<Self, DevicePathError> {
        let mut len = 0;
        loop {
            if len + NODE_HEADER_LEN > MAX_RAW_PATH_LEN {
                return Err(DevicePathError::MissingEnd);
            }
            let header = unsafe { read_unaligned(ptr.add(len).cast::<[u8; 4]>()) };
            let node_len = usize::from(u16::from_le_bytes([header[2], header[3]]));
            if node_len < NODE_HEADER_LEN {
                return Err(DevicePathError::MalformedNode(len));
            }
            len += node_len;
            if header[0] == TYPE_END && header[1] == SUBTYPE_END_ENTIRE {
                break;
            }
        }
        let bytes = unsafe { core::slice::from_raw_parts(ptr, len) };
        Self::from_bytes(bytes)
    }

    /// The path consisting only of the end-entire node.
    #[must_use]
    pub fn end() -> Self {
        Self(alloc::vec![TYPE_END, SUBTYPE_END_ENTIRE, 4, 0])
    }

    /// A single media file path node, e.g. `\EFI\Boot\driver.efi`.
    #[must_use]
    pub fn file_path(path: &str) -> Self {
        Self::end().join_file_path(path)
    }

    /// Serialized form including the end node.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.0.as_ptr()
    }

    /// The nodes of the path, excluding the end node.
    pub fn nodes(&self) -> impl Iterator<Item = Node<'_>> {
        let bytes = self.0.as_slice();
        let mut offset = 0;
        core::iter::from_fn(move || {
            // Validated on construction.
            let (device_type, sub_type, len) = node_header(bytes, offset).ok()?;
            let node = Node {
                device_type,
                sub_type,
                bytes: &bytes[offset..offset + len],
            };
            if node.is_end_entire() {
                return None;
            }
            offset += len;
            Some(node)
        })
    }

    #[must_use]
    pub fn first_node(&self) -> Option<Node<'_>> {
        self.nodes().next()
    }

    #[must_use]
    pub fn last_node(&self) -> Option<Node<'_>> {
        self.nodes().last()
    }

    #[must_use]
    pub fn is_end(&self) -> bool {
        self.first_node().is_none()
    }

    /// A legacy BIOS (BBS) boot target.
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        self.first_node()
            .is_some_and(|n| n.device_type == TYPE_BBS && n.sub_type == SUBTYPE_BBS)
    }

    /// A short-form path that starts at a partition rather than a controller.
    #[must_use]
    pub fn starts_with_hard_drive(&self) -> bool {
        self.first_node()
            .is_some_and(|n| n.device_type == TYPE_MEDIA && n.sub_type == SUBTYPE_HARD_DRIVE)
    }

    #[must_use]
    pub fn has_file_path(&self) -> bool {
        self.nodes()
            .any(|n| n.device_type == TYPE_MEDIA && n.sub_type == SUBTYPE_FILE_PATH)
    }

    /// Bytes of the path without its end node.
    fn body(&self) -> &[u8] {
        &self.0[..self.0.len() - NODE_HEADER_LEN]
    }

    /// The path with its first node removed.
    #[must_use]
    pub fn without_first_node(&self) -> Self {
        match self.first_node() {
            Some(node) => Self(self.0[node.bytes.len()..].to_vec()),
            None => self.clone(),
        }
    }

    /// Concatenates two paths.
    #[must_use]
    pub fn join(&self, tail: &Self) -> Self {
        let mut bytes = Vec::with_capacity(self.0.len() + tail.0.len() - NODE_HEADER_LEN);
        bytes.extend_from_slice(self.body());
        bytes.extend_from_slice(&tail.0);
        Self(bytes)
    }

    /// Appends a media file path node naming `path`.
    ///
    /// # Panics
    /// If `path` is too long for a single node.
    #[must_use]
    pub fn join_file_path(&self, path: &str) -> Self {
        let name: Vec<u16> = path.encode_utf16().chain(core::iter::once(0)).collect();
        let node_len = u16::try_from(NODE_HEADER_LEN + name.len() * 2)
            .expect("file path too long for a device path node");

        let mut bytes = Vec::with_capacity(self.0.len() + usize::from(node_len));
        bytes.extend_from_slice(self.body());
        bytes.extend_from_slice(&[TYPE_MEDIA, SUBTYPE_FILE_PATH]);
        bytes.extend_from_slice(&node_len.to_le_bytes());
        bytes.extend(name.iter().flat_map(|c| c.to_le_bytes()));
        bytes.extend_from_slice(&[TYPE_END, SUBTYPE_END_ENTIRE, 4, 0]);
        Self(bytes)
    }
}

/// Case-insensitive (ASCII) suffix test, as used for loader file names.
#[must_use]
pub fn ends_with_ignore_ascii_case(text: &str, suffix: &str) -> bool {
    text.len() >= suffix.len()
        && text
            .as_bytes()
            .get(text.len() - suffix.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix.as_bytes()))
}
