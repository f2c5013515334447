//! Reading the persisted boot configuration.

use alloc::vec::Vec;
use boot_chain::load_option::{self, parse_boot_order};
use boot_chain::{BootOption, LoadOptionError};
use log::{debug, warn};
use uefi::runtime::{self, VariableVendor};
use uefi::{CString16, Status, cstr16};

#[derive(Debug, thiserror::Error)]
pub enum BootOptionError {
    #[error("failed to read Boot{id:04X}: {status:?}")]
    Variable { id: u16, status: Status },
    #[error("Boot{id:04X} is malformed: {source}")]
    Malformed { id: u16, source: LoadOptionError },
}

impl From<BootOptionError> for Status {
    fn from(value: BootOptionError) -> Self {
        match value {
            BootOptionError::Variable { status, .. } => status,
            BootOptionError::Malformed { source, .. } => source.into(),
        }
    }
}

/// Reads `BootCurrent`, the option this loader was started from.
///
/// # Errors
/// If the variable is missing or has the wrong size.
pub fn read_boot_current() -> Result<u16, Status> {
    let mut buffer = [0u8; 2];
    let (data, _) = runtime::get_variable(cstr16!("BootCurrent"), &VariableVendor::GLOBAL_VARIABLE, &mut buffer)
        .map_err(|e| e.status())?;
    let bytes: [u8; 2] = (&*data).try_into().map_err(|_| Status::BAD_BUFFER_SIZE)?;
    Ok(u16::from_le_bytes(bytes))
}

fn read_boot_option(id: u16) -> Result<BootOption, BootOptionError> {
    // "Boot####" is always ASCII.
    let name = CString16::try_from(load_option::variable_name(id).as_str()).map_err(|_| {
        BootOptionError::Variable {
            id,
            status: Status::INVALID_PARAMETER,
        }
    })?;
    let (data, _) = runtime::get_variable_boxed(&name, &VariableVendor::GLOBAL_VARIABLE)
        .map_err(|e| BootOptionError::Variable { id, status: e.status() })?;
    BootOption::parse(id, &data).map_err(|source| BootOptionError::Malformed { id, source })
}

/// Reads every option listed in `BootOrder`, in that order.
///
/// Options that cannot be read are skipped.
#[must_use]
pub fn read_boot_options() -> Vec<BootOption> {
    let order = match runtime::get_variable_boxed(cstr16!("BootOrder"), &VariableVendor::GLOBAL_VARIABLE) {
        Ok((data, _)) => parse_boot_order(&data),
        Err(e) => {
            warn!("Failed to read BootOrder: {:?}", e.status());
            return Vec::new();
        }
    };

    let options: Vec<BootOption> = order
        .into_iter()
        .filter_map(|id| {
            read_boot_option(id)
                .inspect_err(|error| warn!("Skipping boot option: {error}"))
                .ok()
        })
        .collect();

    for option in &options {
        debug!(
            "Boot{:04X}: {} (active: {}, category: {})",
            option.id,
            option.description,
            option.attributes.active(),
            option.attributes.category()
        );
    }
    options
}
