use tokio::process::Command;

/// Captured result of one remote command invocation.
#[derive(Debug, Clone)]
pub struct RemoteOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Capability contract for running one privileged command on a remote
/// host. Failures of the remote side (non-zero exit, stderr output)
/// are reported in the output, not as an error; `Err` means the local
/// invocation itself could not be started or completed.
pub trait RemoteRunner {
    async fn run(
        &self,
        user: &str,
        password: &str,
        host: &str,
        port: u16,
        command: &str,
    ) -> std::io::Result<RemoteOutput>;
}

/// Runs the command through `sshpass`/`ssh` with an interactive tty,
/// feeding the password to the remote sudo prompt over a pipe.
pub struct SshRunner;

impl RemoteRunner for SshRunner {
    async fn run(
        &self,
        user: &str,
        password: &str,
        host: &str,
        port: u16,
        command: &str,
    ) -> std::io::Result<RemoteOutput> {
        // The password lands inside a remote shell line, so it must be
        // quoted against that shell, not the local one.
        let remote_line = format!(
            "echo {}|sudo -S bash -c \"{}\"",
            shell_words::quote(password),
            command
        );

        let output = Command::new("sshpass")
            .arg("-p")
            .arg(password)
            .arg("ssh")
            .arg("-p")
            .arg(port.to_string())
            .arg("-t")
            .arg(format!("{user}@{host}"))
            .arg(remote_line)
            .output()
            .await?;

        Ok(RemoteOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}
