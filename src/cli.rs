//! Command-line interface definitions for the briefing collector.
//!
//! Every credential can come from a flag or from the environment, so
//! scheduled runs never need secrets on the command line.

use crate::session::Credentials;
use clap::Parser;
use std::path::PathBuf;

/// Collect an aviation weather briefing into one output directory.
///
/// # Examples
///
/// ```sh
/// # Built-in providers (IR satellite and surface pressure charts)
/// met_brief -o ./out
///
/// # Configured providers, credentials from the environment
/// METIE_USERNAME=pilot METIE_PASSWORD=... met_brief -c briefing.yaml
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML provider configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output directory (overrides the config file)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Met Éireann briefing username
    #[arg(long, env = "METIE_USERNAME")]
    pub metie_username: Option<String>,

    /// Met Éireann briefing password
    #[arg(long, env = "METIE_PASSWORD", hide_env_values = true)]
    pub metie_password: Option<String>,

    /// MetWeb username
    #[arg(long, env = "METWEB_USERNAME")]
    pub metweb_username: Option<String>,

    /// MetWeb password
    #[arg(long, env = "METWEB_PASSWORD", hide_env_values = true)]
    pub metweb_password: Option<String>,
}

/// Per-source credentials resolved from the command line.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub metie: Option<Credentials>,
    pub metweb: Option<Credentials>,
}

impl Cli {
    pub fn secrets(&self) -> Secrets {
        Secrets {
            metie: Credentials::from_parts(self.metie_username.clone(), self.metie_password.clone()),
            metweb: Credentials::from_parts(self.metweb_username.clone(), self.metweb_password.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "met_brief",
            "--config",
            "./briefing.yaml",
            "--output-dir",
            "./out",
        ]);

        assert_eq!(cli.config, Some(PathBuf::from("./briefing.yaml")));
        assert_eq!(cli.output_dir, Some(PathBuf::from("./out")));
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from(["met_brief", "-c", "/etc/brief.yaml", "-o", "/tmp/out"]);

        assert_eq!(cli.config, Some(PathBuf::from("/etc/brief.yaml")));
        assert_eq!(cli.output_dir, Some(PathBuf::from("/tmp/out")));
    }

    #[test]
    fn test_secrets_need_both_parts() {
        let cli = Cli::parse_from([
            "met_brief",
            "--metie-username",
            "pilot",
            "--metie-password",
            "hunter2",
            "--metweb-username",
            "pilot",
        ]);
        let secrets = cli.secrets();

        let metie = secrets.metie.unwrap();
        assert_eq!(metie.username, "pilot");
        assert_eq!(metie.password, "hunter2");
        // METWEB_PASSWORD in the environment would complete the pair.
        if std::env::var_os("METWEB_PASSWORD").is_none() {
            assert!(secrets.metweb.is_none());
        }
    }
}
