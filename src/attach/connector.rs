//! Attacher that delegates to an external connector utility.
//!
//! The utility owns the iSCSI/multipath plumbing; this wrapper builds the
//! argument vector, checks the exit status, and parses the JSON the
//! utility prints, surfacing failures as [`AttachError`].

use std::ffi::OsString;

use camino::Utf8PathBuf;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use super::runner::{CommandOutput, CommandRunner, ProcessCommandRunner};
use super::{AttachError, AttachFuture, AttachedDevice, DeviceAttacher};

/// Default connector utility binary name.
pub const DEFAULT_CONNECTOR_BIN: &str = "volume-connector";

#[derive(Deserialize)]
struct AttachReport {
    device_path: Utf8PathBuf,
    #[serde(default)]
    multipath: bool,
}

#[derive(Deserialize)]
struct CapabilityReport {
    #[serde(default)]
    multipath: bool,
}

/// Attaches volumes by shelling out to the connector utility.
#[derive(Clone, Debug)]
pub struct ConnectorAttacher<R: CommandRunner> {
    connector_bin: String,
    mount_point_base: Option<String>,
    runner: R,
}

impl ConnectorAttacher<ProcessCommandRunner> {
    /// Creates an attacher wired to the real process runner.
    #[must_use]
    pub const fn with_process_runner(
        connector_bin: String,
        mount_point_base: Option<String>,
    ) -> Self {
        Self::new(connector_bin, mount_point_base, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> ConnectorAttacher<R> {
    /// Creates an attacher using the provided runner.
    #[must_use]
    pub const fn new(connector_bin: String, mount_point_base: Option<String>, runner: R) -> Self {
        Self {
            connector_bin,
            mount_point_base,
            runner,
        }
    }

    fn base_args(&self, subcommand: &str) -> Vec<OsString> {
        let mut args = vec![OsString::from(subcommand)];
        if let Some(ref base) = self.mount_point_base {
            args.push(OsString::from("--mount-base"));
            args.push(OsString::from(base));
        }
        args.push(OsString::from("--format"));
        args.push(OsString::from("json"));
        args
    }

    fn checked_run(
        &self,
        args: &[OsString],
        volume_id: Uuid,
    ) -> Result<CommandOutput, AttachError> {
        let output = self.runner.run(&self.connector_bin, args, volume_id)?;
        if output.is_success() {
            return Ok(output);
        }
        Err(AttachError::Failed {
            volume_id,
            message: format!(
                "{} exited with status {}: {}",
                self.connector_bin,
                output
                    .code
                    .map_or_else(|| String::from("unknown"), |code| code.to_string()),
                output.stderr
            ),
        })
    }

    fn parse_report<T: serde::de::DeserializeOwned>(
        &self,
        output: &CommandOutput,
        volume_id: Uuid,
    ) -> Result<T, AttachError> {
        serde_json::from_str(&output.stdout).map_err(|err| AttachError::Failed {
            volume_id,
            message: format!("failed to parse {} output: {err}", self.connector_bin),
        })
    }

    fn attach_blocking(
        &self,
        volume_id: Uuid,
        use_multipath: bool,
    ) -> Result<AttachedDevice, AttachError> {
        let mut args = self.base_args("attach");
        args.push(OsString::from("--volume"));
        args.push(OsString::from(volume_id.to_string()));
        if use_multipath {
            args.push(OsString::from("--multipath"));
        }

        let output = self.checked_run(&args, volume_id)?;
        let report: AttachReport = self.parse_report(&output, volume_id)?;
        Ok(AttachedDevice {
            volume_id,
            device_path: report.device_path,
            multipath: report.multipath,
        })
    }

    fn detach_blocking(&self, device: &AttachedDevice) -> Result<(), AttachError> {
        let mut args = self.base_args("detach");
        args.push(OsString::from("--volume"));
        args.push(OsString::from(device.volume_id.to_string()));
        args.push(OsString::from("--device"));
        args.push(OsString::from(device.device_path.as_str()));

        self.checked_run(&args, device.volume_id).map(|_| ())
    }
}

impl<R: CommandRunner> DeviceAttacher for ConnectorAttacher<R> {
    fn multipath_supported(&self) -> bool {
        let args = self.base_args("capabilities");
        match self.checked_run(&args, Uuid::nil()) {
            Ok(output) => self
                .parse_report::<CapabilityReport>(&output, Uuid::nil())
                .map(|report| report.multipath)
                .unwrap_or(false),
            Err(err) => {
                warn!("multipath capability probe failed, assuming single path: {err}");
                false
            }
        }
    }

    fn attach(&self, volume_id: Uuid, use_multipath: bool) -> AttachFuture<'_, AttachedDevice> {
        let result = self.attach_blocking(volume_id, use_multipath);
        Box::pin(async move { result })
    }

    fn detach<'a>(&'a self, device: &'a AttachedDevice) -> AttachFuture<'a, ()> {
        let result = self.detach_blocking(device);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct ScriptedConnector {
        responses: Mutex<Vec<CommandOutput>>,
        invocations: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedConnector {
        fn push(&self, code: Option<i32>, stdout: &str, stderr: &str) {
            self.responses
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(CommandOutput {
                    code,
                    stdout: stdout.to_owned(),
                    stderr: stderr.to_owned(),
                });
        }

        fn invocations(&self) -> Vec<Vec<String>> {
            self.invocations
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
        }
    }

    impl CommandRunner for &ScriptedConnector {
        fn run(
            &self,
            program: &str,
            args: &[OsString],
            volume_id: Uuid,
        ) -> Result<CommandOutput, AttachError> {
            let mut argv = vec![program.to_owned()];
            argv.extend(args.iter().map(|arg| arg.to_string_lossy().into_owned()));
            self.invocations
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(argv);
            let mut responses = self
                .responses
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if responses.is_empty() {
                return Err(AttachError::Failed {
                    volume_id,
                    message: String::from("no scripted response available"),
                });
            }
            Ok(responses.remove(0))
        }
    }

    #[tokio::test]
    async fn attach_parses_the_reported_device() {
        let connector = ScriptedConnector::default();
        connector.push(Some(0), r#"{"device_path":"/dev/dm-3","multipath":true}"#, "");

        let attacher =
            ConnectorAttacher::new(String::from("volume-connector"), None, &connector);
        let volume_id = Uuid::new_v4();
        let device = attacher
            .attach(volume_id, true)
            .await
            .expect("attach should succeed");

        assert_eq!(device.device_path, Utf8PathBuf::from("/dev/dm-3"));
        assert!(device.multipath);

        let invocations = connector.invocations();
        let argv = invocations.first().expect("one invocation");
        assert!(argv.contains(&String::from("attach")));
        assert!(argv.contains(&String::from("--multipath")));
        assert!(argv.contains(&volume_id.to_string()));
    }

    #[tokio::test]
    async fn attach_surfaces_nonzero_exit_as_failure() {
        let connector = ScriptedConnector::default();
        connector.push(Some(2), "", "no such volume");

        let attacher =
            ConnectorAttacher::new(String::from("volume-connector"), None, &connector);
        let err = attacher
            .attach(Uuid::new_v4(), false)
            .await
            .expect_err("attach should fail");
        assert!(matches!(err, AttachError::Failed { .. }));
    }

    #[tokio::test]
    async fn detach_passes_volume_and_device() {
        let connector = ScriptedConnector::default();
        connector.push(Some(0), "{}", "");

        let attacher = ConnectorAttacher::new(
            String::from("volume-connector"),
            Some(String::from("/var/lib/store/mnt")),
            &connector,
        );
        let device = AttachedDevice {
            volume_id: Uuid::new_v4(),
            device_path: Utf8PathBuf::from("/dev/sdb"),
            multipath: false,
        };
        attacher.detach(&device).await.expect("detach should succeed");

        let invocations = connector.invocations();
        let argv = invocations.first().expect("one invocation");
        assert!(argv.contains(&String::from("detach")));
        assert!(argv.contains(&String::from("/dev/sdb")));
        assert!(argv.contains(&String::from("--mount-base")));
    }

    #[test]
    fn capability_probe_failure_falls_back_to_single_path() {
        let connector = ScriptedConnector::default();
        let attacher =
            ConnectorAttacher::new(String::from("volume-connector"), None, &connector);
        assert!(!attacher.multipath_supported());
    }
}
