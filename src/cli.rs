use std::ffi::OsString;
use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use tracing::debug;

use crate::classify::{Classifier, HeaderClassifier};
use crate::config::Config;
use crate::quote::{self, QuoteMap};
use crate::rewrite::Rewriter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "lit-sandbox")]
#[command(about = "Rewrite lit RUN lines to execute sandboxed binaries under a VM shell")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Overrides applied on top of the loaded configuration.
#[derive(clap::Args, Debug, Default)]
struct Overrides {
    /// Wrapper command prepended to sandboxed binaries (default: zvsh)
    #[arg(long)]
    launcher: Option<String>,

    /// Directories to search for command heads, PATH syntax (default: $PATH)
    #[arg(long)]
    search_path: Option<String>,
}

impl Overrides {
    fn apply(self, mut config: Config) -> Config {
        if self.launcher.is_some() {
            config.launcher = self.launcher;
        }
        if self.search_path.is_some() {
            config.search_path = self.search_path;
        }
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite RUN lines (arguments, or one per stdin line)
    Rewrite {
        /// Lines to rewrite. Reads stdin when omitted.
        lines: Vec<String>,

        /// Read stdin as JSON values, one per line; only strings are accepted
        #[arg(long, conflicts_with = "lines")]
        json: bool,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Show how quoted text is shielded before tokenizing
    Shield {
        /// Line to shield
        line: String,
    },

    /// Put shielded quotes back into a line
    Restore {
        /// Shielded line
        line: String,

        /// The `quotes` object printed by `shield`, as JSON
        #[arg(long)]
        quotes: String,
    },

    /// Report whether commands resolve to sandboxed or host binaries
    Classify {
        /// Command names or paths
        #[arg(required = true)]
        names: Vec<String>,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Generate example .lit-sandbox.yaml configuration file
    Init,

    /// Generate shell completions
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// --- Public Entry Point ---
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Rewrite {
            lines,
            json,
            overrides,
        } => {
            let config = overrides.apply(Config::load()?);
            rewrite_lines(&config, lines, json)
        }
        Commands::Shield { line } => {
            println!("{}", shield_report(&line)?);
            Ok(())
        }
        Commands::Restore { line, quotes } => {
            println!("{}", restore_line(&line, &quotes)?);
            Ok(())
        }
        Commands::Classify { names, overrides } => {
            let config = overrides.apply(Config::load()?);
            classify_names(&config, &names);
            Ok(())
        }
        Commands::Init => Config::init(),
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    }
}

fn rewrite_lines(config: &Config, lines: Vec<String>, json: bool) -> Result<()> {
    let rewriter = Rewriter::from_config(config);
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if !lines.is_empty() {
        for line in &lines {
            writeln!(out, "{}", rewriter.rewrite(line))?;
        }
        return Ok(());
    }

    let stdin = io::stdin();
    for (index, line) in stdin.lock().split(b'\n').enumerate() {
        let mut line = line.context("Failed to read stdin")?;
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        let rewritten = if json {
            let value: serde_json::Value = serde_json::from_slice(&line)
                .with_context(|| format!("Line {}: invalid JSON", index + 1))?;
            rewriter
                .rewrite_value(&value)
                .with_context(|| format!("Line {}", index + 1))?
        } else {
            rewriter
                .rewrite_bytes(&line)
                .with_context(|| format!("Line {}", index + 1))?
        };
        debug!(line = index + 1, "cli:rewrote line");
        writeln!(out, "{rewritten}")?;
    }
    Ok(())
}

fn shield_report(line: &str) -> Result<String> {
    let (shielded, map) = quote::shield(line);
    let report = serde_json::json!({
        "shielded": shielded,
        "quotes": map,
    });
    Ok(serde_json::to_string_pretty(&report)?)
}

fn restore_line(line: &str, quotes: &str) -> Result<String> {
    let map: QuoteMap =
        serde_json::from_str(quotes).context("--quotes must be a JSON object of placeholders")?;
    Ok(quote::restore(line, &map))
}

fn classify_names(config: &Config, names: &[String]) {
    let search_path: Option<OsString> = config.search_path();
    let classifier = HeaderClassifier::new(search_path, config.os_abi());
    for name in names {
        match classifier.classify(name) {
            Ok(class) => println!("{name}: {}", class.as_str()),
            Err(err) => println!("{name}: host ({err})"),
        }
    }
}

fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_rewrite_args_parse() {
        let cli = Cli::try_parse_from([
            "lit-sandbox",
            "rewrite",
            "--launcher",
            "sandbox-run",
            "opt < in.ll -S",
        ])
        .unwrap();
        match cli.command {
            Commands::Rewrite {
                lines,
                json,
                overrides,
            } => {
                assert_eq!(lines, vec!["opt < in.ll -S"]);
                assert!(!json);
                assert_eq!(overrides.launcher.as_deref(), Some("sandbox-run"));
            }
            _ => panic!("expected rewrite"),
        }
    }

    #[test]
    fn test_json_conflicts_with_lines() {
        assert!(Cli::try_parse_from(["lit-sandbox", "rewrite", "--json", "opt"]).is_err());
    }

    #[test]
    fn test_classify_requires_names() {
        assert!(Cli::try_parse_from(["lit-sandbox", "classify"]).is_err());
    }

    #[test]
    fn test_restore_args_parse() {
        let cli = Cli::try_parse_from([
            "lit-sandbox",
            "restore",
            "grep abc",
            "--quotes",
            "{}",
        ])
        .unwrap();
        match cli.command {
            Commands::Restore { line, quotes } => {
                assert_eq!(line, "grep abc");
                assert_eq!(quotes, "{}");
            }
            _ => panic!("expected restore"),
        }
        assert!(Cli::try_parse_from(["lit-sandbox", "restore", "grep abc"]).is_err());
    }

    #[test]
    fn test_shield_output_restores_line() {
        let line = r#"not grep "fadd\|fsub" | FileCheck "a | b""#;
        let report: serde_json::Value = serde_json::from_str(&shield_report(line).unwrap()).unwrap();
        let shielded = report["shielded"].as_str().unwrap();
        assert!(!shielded.contains('"'));

        let quotes = report["quotes"].to_string();
        assert_eq!(restore_line(shielded, &quotes).unwrap(), line);
    }

    #[test]
    fn test_restore_rejects_bad_quotes() {
        assert!(restore_line("grep abc", "[1, 2]").is_err());
        assert!(restore_line("grep abc", "not json").is_err());
    }

    #[test]
    fn test_overrides_replace_config() {
        let config = Config {
            launcher: Some("zvsh".to_string()),
            search_path: Some("/usr/bin".to_string()),
            ..Default::default()
        };
        let overrides = Overrides {
            launcher: Some("other".to_string()),
            search_path: None,
        };
        let config = overrides.apply(config);
        assert_eq!(config.launcher(), "other");
        assert_eq!(config.search_path.as_deref(), Some("/usr/bin"));
    }
}
