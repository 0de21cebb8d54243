//! Git credential-helper wire format.
//!
//! Git writes `key=value` lines terminated by a blank line or EOF, and reads
//! the same format back. See `gitcredentials(7)`.

use anyhow::{bail, Context, Result};
use credforge_core::{Credential, Secret, TargetUri};
use std::io::{BufRead, Write};

/// Attributes git sent for one request.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CredentialRequest {
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub path: Option<String>,
    pub username: Option<String>,
    pub password: Option<Secret>,
    pub url: Option<String>,
}

impl CredentialRequest {
    /// Read attributes until a blank line or EOF. Unknown keys are ignored.
    pub fn read<R: BufRead>(reader: R) -> Result<Self> {
        let mut request = Self::default();

        for line in reader.lines() {
            let line = line.context("Failed to read credential request")?;
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                break;
            }

            let Some((key, value)) = line.split_once('=') else {
                bail!("Malformed credential attribute: {:?}", line);
            };
            let value = value.to_string();

            match key {
                "protocol" => request.protocol = Some(value),
                "host" => request.host = Some(value),
                "path" => request.path = Some(value),
                "username" => request.username = Some(value),
                "password" => request.password = Some(Secret::new(value)),
                "url" => request.url = Some(value),
                other => tracing::debug!("Ignoring credential attribute {}", other),
            }
        }

        Ok(request)
    }

    /// The remote this request is about.
    ///
    /// The `username` attribute is not folded into the target: git sends it
    /// on `store` but not always on `get`, and both must map to one key.
    pub fn target(&self) -> Result<TargetUri> {
        let raw = match (&self.url, &self.protocol, &self.host) {
            (Some(url), _, _) => url.clone(),
            (None, Some(protocol), Some(host)) => match &self.path {
                Some(path) => format!("{}://{}/{}", protocol, host, path.trim_start_matches('/')),
                None => format!("{}://{}/", protocol, host),
            },
            _ => bail!("Credential request needs either url or protocol and host"),
        };

        Ok(TargetUri::parse(&raw)?)
    }

    /// The credential carried by a `store` request.
    pub fn credential(&self) -> Result<Credential> {
        let password = self
            .password
            .clone()
            .context("Credential request carries no password")?;
        Ok(Credential {
            username: self.username.clone(),
            secret: password,
            expires_at: None,
        })
    }
}

/// Write a credential back to git.
pub fn write_credential<W: Write>(mut writer: W, credential: &Credential) -> Result<()> {
    if let Some(username) = &credential.username {
        writeln!(writer, "username={}", username)?;
    }
    writeln!(writer, "password={}", credential.secret.expose())?;
    writer.flush()?;
    Ok(())
}

/// Tell git to stop asking other helpers and the terminal.
pub fn write_quit<W: Write>(mut writer: W) -> Result<()> {
    writeln!(writer, "quit=1")?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_attributes() {
        let input = "protocol=https\nhost=github.com\npath=owner/repo.git\nusername=octocat\ncapability[]=authtype\n\nignored=after-blank\n";
        let request = CredentialRequest::read(Cursor::new(input)).unwrap();

        assert_eq!(request.protocol.as_deref(), Some("https"));
        assert_eq!(request.host.as_deref(), Some("github.com"));
        assert_eq!(request.path.as_deref(), Some("owner/repo.git"));
        assert_eq!(request.username.as_deref(), Some("octocat"));
        assert!(request.password.is_none());

        let target = request.target().unwrap();
        assert_eq!(target.as_str(), "https://github.com/owner/repo.git");
    }

    #[test]
    fn test_target_from_url_attribute() {
        let request =
            CredentialRequest::read(Cursor::new("url=https://example.com:8443/scm/repo\n")).unwrap();
        let target = request.target().unwrap();

        assert_eq!(target.host(), "example.com");
        assert_eq!(target.port(), Some(8443));
    }

    #[test]
    fn test_target_without_path() {
        let request = CredentialRequest::read(Cursor::new("protocol=https\nhost=gist.github.com\n")).unwrap();
        assert_eq!(request.target().unwrap().as_str(), "https://gist.github.com/");
    }

    #[test]
    fn test_missing_host_is_error() {
        let request = CredentialRequest::read(Cursor::new("protocol=https\n")).unwrap();
        assert!(request.target().is_err());
    }

    #[test]
    fn test_malformed_line_is_error() {
        assert!(CredentialRequest::read(Cursor::new("protocol https\n")).is_err());
    }

    #[test]
    fn test_store_request_credential() {
        let request = CredentialRequest::read(Cursor::new(
            "protocol=https\nhost=example.com\nusername=bob\npassword=p=ss\n",
        ))
        .unwrap();
        let credential = request.credential().unwrap();

        assert_eq!(credential.username.as_deref(), Some("bob"));
        assert_eq!(credential.secret.expose(), "p=ss");
    }

    #[test]
    fn test_write_credential() {
        let mut out = Vec::new();
        write_credential(&mut out, &Credential::new("bob", "token")).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "username=bob\npassword=token\n");

        let mut out = Vec::new();
        write_quit(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "quit=1\n");
    }
}
