//! Terminal prompts.
//!
//! Stdin and stdout carry the git protocol, so prompts talk to the
//! controlling terminal directly.

use async_trait::async_trait;
use credforge_core::prompt::{PromptError, Prompter};
use credforge_core::{Credential, TargetUri};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};

#[cfg(windows)]
const TERMINAL_INPUT: &str = "CONIN$";
#[cfg(windows)]
const TERMINAL_OUTPUT: &str = "CONOUT$";
#[cfg(not(windows))]
const TERMINAL_INPUT: &str = "/dev/tty";
#[cfg(not(windows))]
const TERMINAL_OUTPUT: &str = "/dev/tty";

struct Terminal {
    input: BufReader<File>,
    output: File,
}

impl Terminal {
    fn open() -> Result<Self, PromptError> {
        let input = OpenOptions::new()
            .read(true)
            .open(TERMINAL_INPUT)
            .map_err(|_| PromptError::NoTerminal)?;
        let output = OpenOptions::new()
            .write(true)
            .open(TERMINAL_OUTPUT)
            .map_err(|_| PromptError::NoTerminal)?;
        Ok(Self {
            input: BufReader::new(input),
            output,
        })
    }

    fn say(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.output, "{}", message)?;
        self.output.flush()
    }

    /// Read one visible line. `None` on EOF or an empty answer.
    fn ask(&mut self, label: &str) -> io::Result<Option<String>> {
        write!(self.output, "{}", label)?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let answer = line.trim().to_string();
        Ok(Some(answer).filter(|a| !a.is_empty()))
    }
}

/// Hidden input through `rpassword`. `None` for an empty answer.
fn ask_hidden(label: &str) -> io::Result<Option<String>> {
    let answer = rpassword::prompt_password(label)?;
    Ok(Some(answer).filter(|a| !a.is_empty()))
}

fn read_credentials(message: &str, username: Option<String>) -> Result<Option<Credential>, PromptError> {
    let mut terminal = Terminal::open()?;
    terminal.say(message)?;

    let username = match username {
        Some(username) => username,
        None => match terminal.ask("Username: ")? {
            Some(username) => username,
            None => return Ok(None),
        },
    };

    Ok(ask_hidden("Password: ")?.map(|password| Credential::new(username, password)))
}

fn read_second_factor(message: &str) -> Result<Option<String>, PromptError> {
    let mut terminal = Terminal::open()?;
    terminal.say(message)?;
    Ok(terminal.ask("Code: ")?)
}

async fn blocking<T, F>(f: F) -> Result<T, PromptError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PromptError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PromptError::Io(io::Error::other(e)))?
}

/// Prompts on the controlling terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompter;

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn prompt_credentials(
        &self,
        target: &TargetUri,
        message: &str,
    ) -> Result<Option<Credential>, PromptError> {
        let message = message.to_string();
        let username = target.username().map(str::to_string);
        blocking(move || read_credentials(&message, username)).await
    }

    async fn prompt_second_factor(
        &self,
        _target: &TargetUri,
        message: &str,
    ) -> Result<Option<String>, PromptError> {
        let message = message.to_string();
        blocking(move || read_second_factor(&message)).await
    }
}
