use crate::file_system::locate_file;
use crate::firmware::{get_protocol, load_image, start_image};
use crate::protocols::PatchDriver;
use boot_chain::config::RawDriverConfig;
use boot_chain::{DevicePathBuf, DriverConfig, DriverHost};
use log::warn;
use uefi::boot;
use uefi::{Handle, Status};

/// Brings up the patch driver through boot services.
pub struct UefiDriverHost;

impl DriverHost for UefiDriverHost {
    type Image = Handle;

    fn probe(&mut self) -> Result<(), Status> {
        boot::get_handle_for_protocol::<PatchDriver>()
            .map(|_| ())
            .map_err(|e| e.status())
    }

    fn locate(&mut self, path: &str) -> Result<DevicePathBuf, Status> {
        locate_file(path)
    }

    fn load(&mut self, path: &DevicePathBuf) -> Result<Handle, Status> {
        load_image(false, path).map_err(|failure| {
            if let Some(image) = failure.image
                && let Err(e) = boot::unload_image(image)
            {
                warn!("UnloadImage failed: {:?}", e.status());
            }
            failure.status
        })
    }

    fn start(&mut self, image: Handle) -> Result<(), Status> {
        let outcome = start_image(image);
        if outcome.status.is_error() {
            Err(outcome.status)
        } else {
            Ok(())
        }
    }

    fn configure(&mut self, config: &DriverConfig) -> Result<(), Status> {
        let handle = boot::get_handle_for_protocol::<PatchDriver>().map_err(|e| e.status())?;
        let driver = get_protocol::<PatchDriver>(handle).map_err(|e| e.status())?;

        let status = driver.configure(&RawDriverConfig::from(*config));
        if status.is_error() { Err(status) } else { Ok(()) }
    }
}
