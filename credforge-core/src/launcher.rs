//! Process-launch collaborator.
//!
//! Opens the system browser for the out-of-band leg of an OAuth
//! authorization-code flow. Launching is fire-and-forget: only whether the
//! launch itself succeeded is reported.

use std::process::{Command, Stdio};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("refusing to open URL: {0}")]
    Rejected(String),

    #[error("failed to launch browser: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("no browser launcher for this platform")]
    Unsupported,
}

/// Opens a URL outside the process.
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> Result<(), LaunchError>;
}

/// Launches the platform's default browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl SystemBrowser {
    /// Only plain http(s) URLs without embedded credentials are opened.
    fn validate(url: &str) -> Result<Url, LaunchError> {
        let parsed = Url::parse(url).map_err(|e| LaunchError::Rejected(e.to_string()))?;

        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(LaunchError::Rejected(format!(
                    "scheme '{}' is not http or https",
                    scheme
                )));
            }
        }

        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(LaunchError::Rejected("URL embeds credentials".to_string()));
        }

        Ok(parsed)
    }

    fn command(url: &str) -> Result<Command, LaunchError> {
        if cfg!(target_os = "macos") {
            let mut cmd = Command::new("open");
            cmd.arg("--").arg(url);
            Ok(cmd)
        } else if cfg!(target_os = "windows") {
            let mut cmd = Command::new("rundll32");
            cmd.arg("url.dll,FileProtocolHandler").arg(url);
            Ok(cmd)
        } else if cfg!(unix) {
            let mut cmd = Command::new("xdg-open");
            cmd.arg(url);
            Ok(cmd)
        } else {
            Err(LaunchError::Unsupported)
        }
    }
}

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> Result<(), LaunchError> {
        let parsed = Self::validate(url)?;
        Self::command(parsed.as_str())?
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(())
    }
}
