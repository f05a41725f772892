// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Console command grammar.

use serde_json::Value;

pub const HELP: &str = "\
commands:
  get <path>           authenticated GET
  post <path> <json>   authenticated POST with a JSON body
  hide | show          simulate the view losing or regaining visibility
  whoami               current user and session deadlines
  logout               end the session
  quit                 exit, keeping the session for next time";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Get { path: String },
    Post { path: String, body: Value },
    Hide,
    Show,
    WhoAmI,
    Logout,
    Quit,
    Help,
    /// Blank line; still counts as activity.
    Nothing,
}

impl Command {
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        let cmd = match verb {
            "" => Self::Nothing,
            "get" => Self::Get { path: api_path(rest)? },
            "post" => {
                let (path, body) = match rest.split_once(char::is_whitespace) {
                    Some((path, body)) => (path, body.trim()),
                    None => (rest, "{}"),
                };
                let body = serde_json::from_str(body)
                    .map_err(|e| anyhow::anyhow!("invalid JSON body: {e}"))?;
                Self::Post { path: api_path(path)?, body }
            }
            "hide" => Self::Hide,
            "show" => Self::Show,
            "whoami" => Self::WhoAmI,
            "logout" => Self::Logout,
            "quit" | "exit" => Self::Quit,
            "help" | "?" => Self::Help,
            other => anyhow::bail!("unknown command: {other} (try `help`)"),
        };
        Ok(cmd)
    }
}

fn api_path(raw: &str) -> anyhow::Result<String> {
    match raw {
        "" => anyhow::bail!("missing path"),
        p if p.starts_with('/') => Ok(p.to_owned()),
        p => Ok(format!("/{p}")),
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
