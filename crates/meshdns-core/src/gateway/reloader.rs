// # Gateway Reload Strategies
//
// Implementations of GatewayReloader.
//
// - CommandReloader: runs a fixed sequence of commands, stopping at the
//   first failure (supervisor-managed or directly invoked gateway)
// - NoopReloader: for gateways that watch their config file, and for tests

use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use crate::Error;
use crate::traits::GatewayReloader;

/// Placeholder replaced by the rendered config path in command arguments
pub const CONFIG_PLACEHOLDER: &str = "{config}";

/// Runs a sequence of commands to reload the gateway
#[derive(Debug, Clone)]
pub struct CommandReloader {
    name: &'static str,
    commands: Vec<Vec<String>>,
}

impl CommandReloader {
    /// Create a reloader from `program arg...` command lines
    ///
    /// Empty command lines are dropped.
    pub fn new(commands: Vec<Vec<String>>) -> Self {
        Self {
            name: "command",
            commands: commands.into_iter().filter(|c| !c.is_empty()).collect(),
        }
    }

    /// Reread the supervisor config, then update `program`
    pub fn supervisor(program: impl Into<String>) -> Self {
        Self {
            name: "supervisor",
            commands: vec![
                vec!["supervisorctl".to_string(), "reread".to_string()],
                vec!["supervisorctl".to_string(), "update".to_string(), program.into()],
            ],
        }
    }

    /// `<binary> reload --config {config}`
    pub fn caddy(binary: impl Into<String>) -> Self {
        Self {
            name: "caddy",
            commands: vec![vec![
                binary.into(),
                "reload".to_string(),
                "--config".to_string(),
                CONFIG_PLACEHOLDER.to_string(),
            ]],
        }
    }

    /// Command lines run on every reload
    pub fn commands(&self) -> &[Vec<String>] {
        &self.commands
    }

    async fn run(&self, command: &[String], config_path: &Path) -> Result<(), Error> {
        let config = config_path.display().to_string();
        let args: Vec<String> = command
            .iter()
            .map(|arg| arg.replace(CONFIG_PLACEHOLDER, &config))
            .collect();

        let Some((program, rest)) = args.split_first() else {
            return Ok(());
        };

        debug!("Running reload command: {} {}", program, rest.join(" "));

        let output = Command::new(program)
            .args(rest)
            .output()
            .await
            .map_err(|e| Error::reload(format!("failed to execute {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::reload(format!(
                "{} {} exited with {}: {}",
                program,
                rest.join(" "),
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl GatewayReloader for CommandReloader {
    async fn reload(&self, config_path: &Path) -> Result<(), Error> {
        for command in &self.commands {
            self.run(command, config_path).await?;
        }
        info!("Gateway reloaded via {}", self.name);
        Ok(())
    }

    fn reloader_name(&self) -> &'static str {
        self.name
    }
}

/// Reloader that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReloader;

#[async_trait]
impl GatewayReloader for NoopReloader {
    async fn reload(&self, config_path: &Path) -> Result<(), Error> {
        debug!("No reload configured for {}", config_path.display());
        Ok(())
    }

    fn reloader_name(&self) -> &'static str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_supervisor_commands() {
        let reloader = CommandReloader::supervisor("caddy");
        assert_eq!(reloader.reloader_name(), "supervisor");
        assert_eq!(
            reloader.commands(),
            &[
                vec!["supervisorctl".to_string(), "reread".to_string()],
                vec!["supervisorctl".to_string(), "update".to_string(), "caddy".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn test_noop_reloader() {
        assert!(NoopReloader.reload(&PathBuf::from("/tmp/Caddyfile")).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_sequence_substitutes_config_path() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("reloaded");
        let config = dir.path().join("Caddyfile");

        let reloader = CommandReloader::new(vec![vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("echo \"$0\" > {}", marker.display()),
            CONFIG_PLACEHOLDER.to_string(),
        ]]);

        reloader.reload(&config).await.unwrap();

        let written = std::fs::read_to_string(&marker).unwrap();
        assert_eq!(written.trim(), config.display().to_string());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_first_failure_aborts_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("second");

        let reloader = CommandReloader::new(vec![
            vec!["false".to_string()],
            vec!["touch".to_string(), marker.display().to_string()],
        ]);

        let result = reloader.reload(&dir.path().join("Caddyfile")).await;
        assert!(matches!(result, Err(Error::Reload(_))));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_missing_program_is_reload_error() {
        let reloader = CommandReloader::new(vec![vec!["/nonexistent/meshdns-reload".to_string()]]);
        let result = reloader.reload(&PathBuf::from("/tmp/Caddyfile")).await;
        assert!(matches!(result, Err(Error::Reload(_))));
    }
}
