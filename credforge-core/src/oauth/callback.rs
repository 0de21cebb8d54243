//! Loopback listener receiving the authorization-code redirect.

use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const CALLBACK_PATH: &str = "/callback";

/// How long a connection may take to send its request line.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

const SUCCESS_PAGE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n\
    <html><body><h1>Authentication complete</h1>\
    <p>You can close this window and return to your terminal.</p></body></html>";

const FAILURE_PAGE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n\
    <html><body><h1>Authentication failed</h1>\
    <p>Return to your terminal for details.</p></body></html>";

const NOT_FOUND: &[u8] = b"HTTP/1.1 404 Not Found\r\nConnection: close\r\n\r\n";

#[derive(Debug, Error)]
pub enum CallbackError {
    /// The provider redirected back with an `error` parameter.
    #[error("authorization server returned {code}")]
    Denied {
        code: String,
        description: Option<String>,
    },

    #[error("state parameter mismatch")]
    StateMismatch,

    #[error("callback listener failed: {0}")]
    Io(#[from] std::io::Error),
}

/// What a single redirect request carried.
#[derive(Debug, Default, PartialEq, Eq)]
struct RedirectParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl RedirectParams {
    /// Parse the request line of a redirect. `None` when the request is not
    /// for the callback path.
    fn from_request(request: &str) -> Option<Self> {
        let target = request.lines().next()?.split_whitespace().nth(1)?;
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        if path != CALLBACK_PATH {
            return None;
        }

        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "code" => params.code = Some(value.into_owned()),
                "state" => params.state = Some(value.into_owned()),
                "error" => params.error = Some(value.into_owned()),
                "error_description" => params.error_description = Some(value.into_owned()),
                _ => {}
            }
        }
        Some(params)
    }
}

/// A bound loopback listener for one authorization-code flow.
pub struct CallbackListener {
    listener: TcpListener,
    port: u16,
    read_timeout: Duration,
}

impl CallbackListener {
    /// Bind `127.0.0.1:port`; port 0 picks a free one.
    pub async fn bind(port: u16) -> Result<Self, CallbackError> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let port = listener.local_addr()?.port();
        tracing::debug!("Listening for authorization redirect on 127.0.0.1:{}", port);
        Ok(Self {
            listener,
            port,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    /// Drop connections that send nothing within `timeout`.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The redirect URI to register in the authorization request.
    pub fn redirect_url(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.port, CALLBACK_PATH)
    }

    /// Wait for the redirect and return the authorization code.
    ///
    /// Requests for other paths (e.g. favicon requests) are answered with 404
    /// and ignored, as are connections that stay silent past the read
    /// timeout. The state is checked before anything else the redirect
    /// carries, so only the real authorization server can end the flow.
    pub async fn accept(&self, expected_state: &str) -> Result<String, CallbackError> {
        loop {
            let (mut socket, _) = self.listener.accept().await?;

            let request =
                match tokio::time::timeout(self.read_timeout, read_request(&mut socket)).await {
                    Ok(Ok(request)) => request,
                    Ok(Err(e)) => {
                        tracing::debug!("Ignoring unreadable callback request: {}", e);
                        continue;
                    }
                    Err(_) => {
                        tracing::debug!("Dropping silent callback connection");
                        continue;
                    }
                };

            let Some(params) = RedirectParams::from_request(&request) else {
                let _ = socket.write_all(NOT_FOUND).await;
                continue;
            };

            if params.state.as_deref() != Some(expected_state) {
                let _ = socket.write_all(FAILURE_PAGE).await;
                return Err(CallbackError::StateMismatch);
            }

            if let Some(code) = params.error {
                let _ = socket.write_all(FAILURE_PAGE).await;
                return Err(CallbackError::Denied {
                    code,
                    description: params.error_description,
                });
            }

            match params.code {
                Some(code) => {
                    let _ = socket.write_all(SUCCESS_PAGE).await;
                    return Ok(code);
                }
                None => {
                    let _ = socket.write_all(NOT_FOUND).await;
                }
            }
        }
    }
}

async fn read_request(socket: &mut TcpStream) -> std::io::Result<String> {
    let mut buffer = [0u8; 4096];
    let n = socket.read(&mut buffer).await?;
    Ok(String::from_utf8_lossy(&buffer[..n]).into_owned())
}
