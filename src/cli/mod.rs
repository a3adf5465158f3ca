//! `tripctl` command line definitions

pub mod auth;
pub mod form;
pub mod health;
pub mod plan;

use clap::{Parser, Subcommand};

/// Command line client for the trip planning service
#[derive(Parser)]
#[command(name = "tripctl")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Base URL of the planning service (overrides config and env)
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,

    /// Storage profile for credentials and saved forms
    #[arg(short, long, global = true, env = "TRIP_PLANNER_PROFILE", default_value = "default")]
    pub profile: String,

    /// Log level used when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a trip plan
    Plan(plan::PlanArgs),

    /// Check that the planning service is reachable
    Health,

    /// Inspect or clear the last submitted trip form
    #[command(subcommand)]
    Form(form::FormCommand),

    /// Manage stored credentials
    #[command(subcommand)]
    Auth(auth::AuthCommand),

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Shorten an id for display.
pub fn truncate_id(id: &str, max_len: usize) -> &str {
    match id.char_indices().nth(max_len) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_truncate_id() {
        assert_eq!(truncate_id("0f8fad5b-d9cb-469f", 8), "0f8fad5b");
        assert_eq!(truncate_id("short", 8), "short");
        assert_eq!(truncate_id("", 8), "");
    }

    #[test]
    fn test_parse_plan_args() {
        let cli = Cli::try_parse_from([
            "tripctl",
            "--profile",
            "work",
            "plan",
            "--city",
            "Suzhou",
            "--start-date",
            "2026-11-01",
            "--end-date",
            "2026-11-02",
            "--preference",
            "gardens",
            "--preference",
            "tea",
        ])
        .unwrap();

        assert_eq!(cli.profile, "work");
        let Commands::Plan(args) = cli.command else {
            panic!("expected plan command");
        };
        let form = args.to_form_data().unwrap();
        assert_eq!(form.city, "Suzhou");
        assert_eq!(form.travel_days, 2);
        assert_eq!(form.preferences, vec!["gardens", "tea"]);
    }

    #[test]
    fn test_parse_auth_login() {
        let cli = Cli::try_parse_from([
            "tripctl", "auth", "login", "-u", "zhao", "--password", "pw",
        ])
        .unwrap();

        let Commands::Auth(auth::AuthCommand::Login { username, password }) = cli.command else {
            panic!("expected auth login command");
        };
        assert_eq!(username, "zhao");
        assert_eq!(password.as_deref(), Some("pw"));
    }
}
