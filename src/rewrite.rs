//! Rewrite lit RUN lines so sandboxed binaries run under the VM shell.
//!
//! Given a pipeline such as
//!
//! ```text
//! /build/bin/opt < in.ll -S | /build/bin/FileCheck in.ll
//! ```
//!
//! every command whose head is a sandboxed binary is prefixed with the
//! launcher, and its file arguments are marked so the launcher maps them into
//! the sandbox:
//!
//! ```text
//! zvsh /build/bin/opt < in.ll -S | zvsh /build/bin/FileCheck @in.ll
//! ```
//!
//! Files redirected with `<`, `>` or `>>` are left alone: the launcher wires
//! stdin/stdout itself. The null device is mapped to its sandbox name.

use std::path::Path;

use tracing::{debug, warn};

use crate::classify::{Classifier, HeaderClassifier};
use crate::config::Config;
use crate::quote;

/// Redirection operators whose target must not be marked.
const REDIRECTIONS: &[&str] = &["<", ">", ">>"];

#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("invalid input: expected a string, got {0}")]
    InvalidInput(&'static str),
}

/// Decides whether an argument of a sandboxed command names a file.
pub trait FileDetector {
    fn looks_like_file(&self, token: &str) -> bool;
}

/// Checks the real filesystem, relative to the current directory.
///
/// Arguments containing the temp hint count as files even when missing, since
/// lit passes output paths that the test has not created yet. The result
/// depends on the working directory and on what exists at call time.
#[derive(Debug, Clone)]
pub struct HostFiles {
    temp_hint: String,
}

impl HostFiles {
    pub fn new(temp_hint: impl Into<String>) -> Self {
        Self {
            temp_hint: temp_hint.into(),
        }
    }
}

impl FileDetector for HostFiles {
    fn looks_like_file(&self, token: &str) -> bool {
        if Path::new(token).is_file() {
            return true;
        }
        !self.temp_hint.is_empty() && token.contains(self.temp_hint.as_str())
    }
}

/// Output conventions of the sandbox launcher.
#[derive(Debug, Clone)]
pub struct Markers {
    pub launcher: String,
    pub path_marker: String,
    pub null_device: String,
    pub null_replacement: String,
}

impl Markers {
    pub fn from_config(config: &Config) -> Self {
        Self {
            launcher: config.launcher().to_string(),
            path_marker: config.path_marker().to_string(),
            null_device: config.null_device().to_string(),
            null_replacement: config.null_replacement().to_string(),
        }
    }
}

impl Default for Markers {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct Rewriter<C = HeaderClassifier, F = HostFiles> {
    markers: Markers,
    classifier: C,
    files: F,
}

impl Rewriter {
    /// Build a rewriter backed by the real filesystem.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Markers::from_config(config),
            HeaderClassifier::new(config.search_path(), config.os_abi()),
            HostFiles::new(config.temp_hint()),
        )
    }
}

impl<C: Classifier, F: FileDetector> Rewriter<C, F> {
    pub fn new(markers: Markers, classifier: C, files: F) -> Self {
        Self {
            markers,
            classifier,
            files,
        }
    }

    /// Rewrite a whole RUN line.
    pub fn rewrite(&self, script: &str) -> String {
        if script.is_empty() {
            return String::new();
        }

        let (shielded, quotes) = quote::shield(script);
        let commands: Vec<String> = shielded
            .split('|')
            .map(|command| self.rewrite_command(command, script))
            .collect();
        let joined = commands.join("|");

        let mut result = quote::restore(&joined, &quotes);
        if !self.markers.null_device.is_empty() {
            result = result.replace(&self.markers.null_device, &self.markers.null_replacement);
        }
        debug!(input = script, output = %result, "rewrite:done");
        result
    }

    /// Rewrite a JSON value, rejecting anything but a string.
    pub fn rewrite_value(&self, value: &serde_json::Value) -> Result<String, RewriteError> {
        use serde_json::Value;
        match value {
            Value::String(s) => Ok(self.rewrite(s)),
            Value::Null => Err(RewriteError::InvalidInput("null")),
            Value::Bool(_) => Err(RewriteError::InvalidInput("a boolean")),
            Value::Number(n) if n.is_f64() => Err(RewriteError::InvalidInput("a float")),
            Value::Number(_) => Err(RewriteError::InvalidInput("an integer")),
            Value::Array(_) => Err(RewriteError::InvalidInput("a list")),
            Value::Object(_) => Err(RewriteError::InvalidInput("a mapping")),
        }
    }

    /// Rewrite raw bytes, rejecting input that is not UTF-8 text.
    pub fn rewrite_bytes(&self, bytes: &[u8]) -> Result<String, RewriteError> {
        let script =
            std::str::from_utf8(bytes).map_err(|_| RewriteError::InvalidInput("non-UTF-8 bytes"))?;
        Ok(self.rewrite(script))
    }

    /// Rewrite one pipe segment. `script` is the original line, for diagnostics.
    fn rewrite_command(&self, command: &str, script: &str) -> String {
        let mut out: Vec<String> = Vec::new();
        let mut head_seen = false;
        let mut sandboxed = false;
        let mut previous: Option<&str> = None;

        for token in command.split(' ') {
            if token.is_empty() {
                out.push(String::new());
                continue;
            }

            if !head_seen {
                head_seen = true;
                sandboxed = match self.classifier.classify(token) {
                    Ok(class) => class.is_sandboxed(),
                    Err(err) => {
                        warn!(
                            token,
                            script,
                            error = %err,
                            "Couldn't classify command, treating it as a host binary; check it manually"
                        );
                        false
                    }
                };
                if sandboxed {
                    out.push(format!("{} {}", self.markers.launcher, token));
                } else {
                    out.push(token.to_string());
                }
                // The head never counts as a redirection operator.
                continue;
            }

            if sandboxed
                && !previous.is_some_and(|p| REDIRECTIONS.contains(&p))
                && self.files.looks_like_file(token)
            {
                out.push(format!("{}{}", self.markers.path_marker, token));
            } else {
                out.push(token.to_string());
            }
            previous = Some(token);
        }

        out.join(" ")
    }
}
