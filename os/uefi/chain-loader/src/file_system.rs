use crate::firmware::{device_path_of, device_path_text, get_protocol};
use boot_chain::DevicePathBuf;
use log::debug;
use uefi::boot::{self, SearchType};
use uefi::proto::media::file::{File, FileAttribute, FileMode};
use uefi::proto::media::fs::SimpleFileSystem;
use uefi::{CString16, Handle, Identify, Status};

/// Finds `path` on any mounted file system.
///
/// Returns the full device path of the first volume that has the file.
///
/// # Errors
/// `NOT_FOUND` if no volume has it, or the status of enumerating the volumes.
pub fn locate_file(path: &str) -> Result<DevicePathBuf, Status> {
    let name = CString16::try_from(path).map_err(|_| Status::INVALID_PARAMETER)?;
    let handles = boot::locate_handle_buffer(SearchType::ByProtocol(&SimpleFileSystem::GUID))
        .map_err(|e| e.status())?;
    debug!("Number of UEFI file systems: {}", handles.len());

    for &handle in handles.iter() {
        if !volume_has_file(handle, &name) {
            continue;
        }
        let Some(volume) = device_path_of(handle) else {
            continue;
        };

        let found = volume.join_file_path(path);
        debug!(
            "Found file at {}",
            device_path_text(&found).as_deref().unwrap_or(path)
        );
        return Ok(found);
    }

    Err(Status::NOT_FOUND)
}

pub(crate) fn volume_has_file(handle: Handle, name: &CString16) -> bool {
    let Ok(mut fs) = get_protocol::<SimpleFileSystem>(handle) else {
        return false;
    };
    let Ok(mut volume) = fs.open_volume() else {
        return false;
    };
    // Closed on drop.
    volume
        .open(name, FileMode::Read, FileAttribute::empty())
        .is_ok()
}
