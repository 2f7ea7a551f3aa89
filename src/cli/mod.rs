mod prune;
mod serve;

use anyhow::{Result, bail};
use console::style;
use std::path::PathBuf;

use crate::core::config::EngineConfig;
use crate::core::terminal::{self, GuideSection, print_error};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Core")
        .command("serve", "Start the workflow API and stream server")
        .print();

    GuideSection::new("Maintenance")
        .command("prune", "Delete expired events and finished runs")
        .command("config", "Print the effective configuration")
        .print();

    GuideSection::new("Flags")
        .text("--config <path>      Configuration file (default: <data_dir>/memoria.toml)")
        .text("--api-host <host>    Bind address for serve")
        .text("--api-port <port>    Listen port for serve")
        .text("--dry-run            prune: report without deleting")
        .blank()
        .text("Environment: MEMORIA_DATA_DIR, MEMORIA_API_HOST, MEMORIA_API_PORT, MEMORIA_LOG_LEVEL")
        .print();

    println!(
        "\n {} {} <command> [flags]\n",
        style("Usage:").bold(),
        style("memoria").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CommandFlags {
    pub config: Option<PathBuf>,
    pub api_host: Option<String>,
    pub api_port: Option<u16>,
    pub dry_run: bool,
}

pub(crate) fn parse_command_flags(args: &[String], start: usize) -> Result<CommandFlags> {
    let mut flags = CommandFlags::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    flags.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    bail!("--config needs a path");
                }
            }
            "--api-host" => {
                if i + 1 < args.len() {
                    flags.api_host = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    bail!("--api-host needs a value");
                }
            }
            "--api-port" => {
                if i + 1 < args.len() {
                    match args[i + 1].parse() {
                        Ok(port) => flags.api_port = Some(port),
                        Err(_) => bail!("invalid --api-port value '{}'", args[i + 1]),
                    }
                    i += 2;
                } else {
                    bail!("--api-port needs a value");
                }
            }
            "--dry-run" => {
                flags.dry_run = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    Ok(flags)
}

/// File, then environment, then command-line flags.
pub(crate) async fn resolve_config(flags: &CommandFlags) -> Result<EngineConfig> {
    let mut config = EngineConfig::load(flags.config.as_deref()).await?;
    config.apply_env(|key| std::env::var(key).ok());
    if let Some(host) = &flags.api_host {
        config.server.host = host.clone();
    }
    if let Some(port) = flags.api_port {
        config.server.port = port;
    }
    Ok(config)
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(String::as_str).unwrap_or("help");

    match cmd {
        "serve" => {
            let flags = parse_command_flags(&args, 2)?;
            let config = resolve_config(&flags).await?;
            serve::run_serve(config).await
        }
        "prune" => {
            let flags = parse_command_flags(&args, 2)?;
            let config = resolve_config(&flags).await?;
            prune::run_prune(&config, flags.dry_run).await
        }
        "config" => {
            let flags = parse_command_flags(&args, 2)?;
            let config = resolve_config(&flags).await?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            print_error(&format!("Unknown command '{}'.", other));
            print_help();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn serve_flags_parse() {
        let parsed = parse_command_flags(
            &args(&[
                "memoria",
                "serve",
                "--api-host",
                "0.0.0.0",
                "--api-port",
                "18000",
                "--config",
                "/etc/memoria.toml",
            ]),
            2,
        )
        .unwrap();
        assert_eq!(parsed.api_host.as_deref(), Some("0.0.0.0"));
        assert_eq!(parsed.api_port, Some(18000));
        assert_eq!(parsed.config, Some(PathBuf::from("/etc/memoria.toml")));
        assert!(!parsed.dry_run);
    }

    #[test]
    fn prune_dry_run_and_unknown_flags_are_skipped() {
        let parsed =
            parse_command_flags(&args(&["memoria", "prune", "--verbose", "--dry-run"]), 2).unwrap();
        assert!(parsed.dry_run);
        assert_eq!(parsed.api_port, None);
    }

    #[test]
    fn bad_or_missing_values_are_errors() {
        assert!(parse_command_flags(&args(&["memoria", "serve", "--api-port", "http"]), 2).is_err());
        assert!(parse_command_flags(&args(&["memoria", "serve", "--api-port"]), 2).is_err());
        assert!(parse_command_flags(&args(&["memoria", "serve", "--config"]), 2).is_err());
    }

    #[tokio::test]
    async fn flags_override_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memoria.toml");
        tokio::fs::write(&path, "[server]\nhost = \"10.0.0.1\"\nport = 9000\n")
            .await
            .unwrap();
        let flags = CommandFlags {
            config: Some(path),
            api_port: Some(9100),
            ..Default::default()
        };
        let config = resolve_config(&flags).await.unwrap();
        assert_eq!(config.server.port, 9100);
    }
}
