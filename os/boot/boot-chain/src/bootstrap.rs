//! # Patch Driver Bootstrap
//!
//! Brings the patch driver up before anything is chain-loaded: detect a
//! driver that is already running, otherwise find its image on one of the
//! mounted volumes, load and start it, and confirm it published its protocol.
//! Optionally asks the operator for a configuration and sends it over.

use crate::config::{BypassStrategy, DriverConfig};
use crate::device_path::DevicePathBuf;
use alloc::format;
use alloc::string::String;
use log::{debug, info, warn};
use patch_primitives::PatchLog;
use patch_primitives::patch_log;
use uefi::Status;

/// Directories searched for the driver image, in order.
pub const DRIVER_DIRECTORIES: [&str; 3] = ["\\EFI\\Boot\\", "\\EFI\\", "\\"];

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The driver was loaded and started by us.
    Started,
    /// The driver protocol was already published; nothing was loaded.
    AlreadyStarted,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootstrapError {
    #[error("the driver image was not found on any volume")]
    NotFound,
    #[error("loading the driver image failed: {0:?}")]
    Load(Status),
    #[error("starting the driver image failed: {0:?}")]
    Start(Status),
    #[error("the driver started but its protocol is missing: {0:?}")]
    ProtocolMissing(Status),
}

impl From<BootstrapError> for Status {
    fn from(value: BootstrapError) -> Self {
        match value {
            BootstrapError::NotFound => Self::NOT_FOUND,
            BootstrapError::Load(status)
            | BootstrapError::Start(status)
            | BootstrapError::ProtocolMissing(status) => status,
        }
    }
}

/// The firmware services needed to bring up the driver.
pub trait DriverHost {
    type Image;

    /// Checks whether the driver protocol is published.
    ///
    /// # Errors
    /// `NOT_FOUND` if it is not.
    fn probe(&mut self) -> Result<(), Status>;

    /// Finds `path` on any mounted volume.
    ///
    /// # Errors
    /// If no volume has the file.
    fn locate(&mut self, path: &str) -> Result<DevicePathBuf, Status>;

    /// Loads the driver as a regular image, not on behalf of the boot manager.
    ///
    /// # Errors
    /// The `LoadImage` status.
    fn load(&mut self, path: &DevicePathBuf) -> Result<Self::Image, Status>;

    /// # Errors
    /// The `StartImage` status.
    fn start(&mut self, image: Self::Image) -> Result<(), Status>;

    /// Sends `config` to the driver's configuration entry point.
    ///
    /// # Errors
    /// Whatever the driver returns.
    fn configure(&mut self, config: &DriverConfig) -> Result<(), Status>;
}

/// Single-key operator prompts.
pub trait KeyPrompt {
    fn show(&mut self, text: &str);

    /// Blocks until one of `accepted` is pressed; Enter selects `default`.
    fn read_choice(&mut self, accepted: &[char], default: char) -> char;
}

/// The three locations tried for `file_name`.
#[must_use]
pub fn candidate_paths(file_name: &str) -> [String; 3] {
    DRIVER_DIRECTORIES.map(|dir| format!("{dir}{file_name}"))
}

/// Makes sure the driver is running, loading it from disk if needed.
///
/// When `prompt` is given, the operator picks a configuration that is sent
/// to the driver; a failure to apply it is only logged. Progress is recorded
/// in `log` for display once the driver is up.
///
/// # Errors
/// If the driver is not running and could not be brought up.
pub fn start_and_configure<H: DriverHost, const N: usize>(
    host: &mut H,
    file_name: &str,
    prompt: Option<&mut dyn KeyPrompt>,
    log: &mut PatchLog<N>,
) -> Result<BootstrapOutcome, BootstrapError> {
    match host.probe() {
        Ok(()) => {
            info!("The driver is already loaded");
            return Ok(BootstrapOutcome::AlreadyStarted);
        }
        Err(status) if status == Status::NOT_FOUND => {}
        Err(status) => warn!("Probing for the driver protocol returned {status:?}"),
    }

    info!("Locating and loading driver file {file_name}");
    let path = candidate_paths(file_name)
        .iter()
        .find_map(|candidate| match host.locate(candidate) {
            Ok(path) => {
                patch_log!(log, "Found driver at {candidate}\r\n");
                Some(path)
            }
            Err(status) => {
                debug!("{candidate} not found: {status:?}");
                None
            }
        })
        .ok_or(BootstrapError::NotFound)?;

    let image = host.load(&path).map_err(BootstrapError::Load)?;
    host.start(image).map_err(BootstrapError::Start)?;

    // Starting the image does not imply it installed its protocol.
    host.probe().map_err(BootstrapError::ProtocolMissing)?;
    patch_log!(log, "Driver started\r\n");

    if let Some(prompt) = prompt {
        let config = prompt_configuration(prompt);
        match host.configure(&config) {
            Ok(()) => patch_log!(
                log,
                "Driver configured: {:?}, pause after each stage: {}\r\n",
                config.bypass,
                config.pause_after_each_stage
            ),
            Err(status) => warn!("Driver Configure() returned {status:?}"),
        }
    }

    Ok(BootstrapOutcome::Started)
}

/// Asks for the bypass strategy and the debug pause.
#[must_use]
pub fn prompt_configuration(prompt: &mut dyn KeyPrompt) -> DriverConfig {
    prompt.show(
        "\nChoose the type of DSE bypass to use, or press ENTER for default:\n    \
         [1] No DSE bypass\n    \
         [2] Boot time DSE bypass\n    \
         [3] Runtime SetVariable hook (default)\n    ",
    );
    let bypass = BypassStrategy::from_choice(prompt.read_choice(&['1', '2', '3'], '3')).unwrap_or_default();

    prompt.show(
        "Wait for a keypress to continue after each patch stage? (for debugging)\n    \
         [1] Yes\n    \
         [2] No (default)\n    ",
    );
    let pause_after_each_stage = prompt.read_choice(&['1', '2'], '2') == '1';

    DriverConfig {
        bypass,
        pause_after_each_stage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    const DRIVER: &str = "EfiGuardDxe.efi";

    #[derive(Default)]
    struct FakeHost {
        running: bool,
        /// Whether starting the image publishes the protocol.
        publishes: bool,
        files: Vec<&'static str>,
        located: Vec<String>,
        load_status: Option<Status>,
        start_status: Option<Status>,
        configure_status: Option<Status>,
        loads: usize,
        configured: Option<DriverConfig>,
    }

    impl DriverHost for FakeHost {
        type Image = ();

        fn probe(&mut self) -> Result<(), Status> {
            if self.running { Ok(()) } else { Err(Status::NOT_FOUND) }
        }

        fn locate(&mut self, path: &str) -> Result<DevicePathBuf, Status> {
            self.located.push(path.into());
            if self.files.contains(&path) {
                Ok(DevicePathBuf::file_path(path))
            } else {
                Err(Status::NOT_FOUND)
            }
        }

        fn load(&mut self, _path: &DevicePathBuf) -> Result<(), Status> {
            self.loads += 1;
            self.load_status.map_or(Ok(()), Err)
        }

        fn start(&mut self, (): ()) -> Result<(), Status> {
            if let Some(status) = self.start_status {
                return Err(status);
            }
            self.running = self.publishes;
            Ok(())
        }

        fn configure(&mut self, config: &DriverConfig) -> Result<(), Status> {
            self.configured = Some(*config);
            self.configure_status.map_or(Ok(()), Err)
        }
    }

    struct ScriptedPrompt {
        keys: VecDeque<Option<char>>,
        shown: usize,
    }

    impl KeyPrompt for ScriptedPrompt {
        fn show(&mut self, _text: &str) {
            self.shown += 1;
        }

        fn read_choice(&mut self, accepted: &[char], default: char) -> char {
            // `None` stands for Enter.
            let key = self.keys.pop_front().expect("scripted key");
            key.map_or(default, |k| {
                assert!(accepted.contains(&k));
                k
            })
        }
    }

    fn installed() -> FakeHost {
        FakeHost {
            publishes: true,
            files: vec!["\\EFI\\EfiGuardDxe.efi", "\\EfiGuardDxe.efi"],
            ..FakeHost::default()
        }
    }

    #[test]
    fn running_driver_is_not_loaded_again() {
        let mut host = FakeHost {
            running: true,
            ..installed()
        };
        let mut log = PatchLog::<128>::new();
        assert_eq!(
            start_and_configure(&mut host, DRIVER, None, &mut log),
            Ok(BootstrapOutcome::AlreadyStarted)
        );
        assert!(host.located.is_empty());
        assert_eq!(host.loads, 0);
    }

    #[test]
    fn first_matching_candidate_wins() {
        let mut host = installed();
        let mut log = PatchLog::<128>::new();
        assert_eq!(
            start_and_configure(&mut host, DRIVER, None, &mut log),
            Ok(BootstrapOutcome::Started)
        );
        assert_eq!(host.located, ["\\EFI\\Boot\\EfiGuardDxe.efi", "\\EFI\\EfiGuardDxe.efi"]);
        assert_eq!(host.loads, 1);
        assert_eq!(host.configured, None);
        assert_eq!(log.segments().count(), 2);
    }

    #[test]
    fn missing_file_is_not_found() {
        let mut host = FakeHost::default();
        let mut log = PatchLog::<128>::new();
        let result = start_and_configure(&mut host, DRIVER, None, &mut log);
        assert_eq!(result, Err(BootstrapError::NotFound));
        assert_eq!(host.located.len(), 3);
        assert_eq!(Status::from(BootstrapError::NotFound), Status::NOT_FOUND);
    }

    #[test]
    fn load_and_start_failures_carry_their_status() {
        let mut log = PatchLog::<128>::new();

        let mut host = FakeHost {
            load_status: Some(Status::SECURITY_VIOLATION),
            ..installed()
        };
        assert_eq!(
            start_and_configure(&mut host, DRIVER, None, &mut log),
            Err(BootstrapError::Load(Status::SECURITY_VIOLATION))
        );

        let mut host = FakeHost {
            start_status: Some(Status::ABORTED),
            ..installed()
        };
        assert_eq!(
            start_and_configure(&mut host, DRIVER, None, &mut log),
            Err(BootstrapError::Start(Status::ABORTED))
        );
    }

    #[test]
    fn started_driver_without_protocol_is_an_error() {
        let mut host = FakeHost {
            publishes: false,
            ..installed()
        };
        let mut log = PatchLog::<128>::new();
        let result = start_and_configure(&mut host, DRIVER, None, &mut log);
        assert_eq!(result, Err(BootstrapError::ProtocolMissing(Status::NOT_FOUND)));
    }

    #[test]
    fn prompted_configuration_is_sent() {
        let mut host = installed();
        let mut prompt = ScriptedPrompt {
            keys: VecDeque::from([Some('2'), Some('1')]),
            shown: 0,
        };
        let mut log = PatchLog::<256>::new();
        let result = start_and_configure(&mut host, DRIVER, Some(&mut prompt), &mut log);

        assert_eq!(result, Ok(BootstrapOutcome::Started));
        assert_eq!(prompt.shown, 2);
        assert_eq!(
            host.configured,
            Some(DriverConfig {
                bypass: BypassStrategy::BootTimeOnly,
                pause_after_each_stage: true,
            })
        );
    }

    #[test]
    fn enter_selects_defaults_and_configure_failure_is_not_fatal() {
        let mut host = FakeHost {
            configure_status: Some(Status::INVALID_PARAMETER),
            ..installed()
        };
        let mut prompt = ScriptedPrompt {
            keys: VecDeque::from([None, None]),
            shown: 0,
        };
        let mut log = PatchLog::<256>::new();
        let result = start_and_configure(&mut host, DRIVER, Some(&mut prompt), &mut log);

        assert_eq!(result, Ok(BootstrapOutcome::Started));
        assert_eq!(host.configured, Some(DriverConfig::default()));
    }
}
