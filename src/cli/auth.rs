//! `tripctl auth` command implementation

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use clap::Subcommand;

use super::truncate_id;
use crate::api::TripClient;
use crate::config::Config;
use crate::store::Storage;

#[derive(Subcommand)]
pub enum AuthCommand {
    /// Log in and store the issued token
    Login {
        /// Username or email
        #[arg(long, short)]
        username: String,

        /// Password (read from stdin when omitted)
        #[arg(long, env = "TRIP_PLANNER_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Create an account on the planning service
    Register {
        #[arg(long, short)]
        username: String,

        #[arg(long, short)]
        email: String,

        /// Password (read from stdin when omitted)
        #[arg(long, env = "TRIP_PLANNER_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Fetch the profile of the logged-in user
    Whoami,
    /// Store an access token issued by the planning service
    SetToken {
        /// Bearer token
        token: String,
    },
    /// Show whether a token and user profile are stored
    Status,
    /// Remove the stored token and user profile
    Logout,
}

pub async fn run(profile: &str, config: &Config, command: AuthCommand) -> Result<()> {
    let storage = Storage::new(profile)?;

    match command {
        AuthCommand::Login { username, password } => {
            let password = password_or_prompt(password)?;
            let client = TripClient::new(config)?.with_storage(storage.clone());
            let user = client
                .login(username.trim(), &password)
                .await
                .context("Login failed")?;
            println!(
                "✓ Logged in as {} (profile '{}')",
                user.username,
                storage.profile()
            );
        }
        AuthCommand::Register {
            username,
            email,
            password,
        } => {
            let password = password_or_prompt(password)?;
            let client = TripClient::new(config)?;
            let response = client
                .register(username.trim(), email.trim(), &password)
                .await
                .context("Registration failed")?;
            if !response.success {
                bail!("Registration failed: {}", response.message);
            }
            println!("✓ Registered {}", username.trim());
            println!("Run `tripctl auth login -u {}` to sign in.", username.trim());
        }
        AuthCommand::Whoami => {
            let client = TripClient::new(config)?.with_storage(storage.clone());
            match client.current_user().await {
                Ok(Some(user)) => {
                    println!("{}", user.username);
                    if let Some(email) = &user.email {
                        println!("Email: {}", email);
                    }
                }
                Ok(None) => bail!("Not logged in (profile '{}')", storage.profile()),
                Err(e) if e.is_unauthorized() => {
                    bail!("Stored token was rejected; log in again")
                }
                Err(e) => bail!("Failed to fetch user profile: {}", e),
            }
        }
        AuthCommand::SetToken { token } => {
            let token = token.trim();
            if token.is_empty() {
                bail!("Token must not be empty");
            }
            storage.set_token(token)?;
            println!("✓ Token stored for profile '{}'", storage.profile());
        }
        AuthCommand::Status => match storage.token() {
            Some(token) => {
                println!("Logged in (token {}…)", truncate_id(&token, 8));
                if let Some(user) = storage.user() {
                    println!("User: {}", user.username);
                }
            }
            None => println!("Not logged in (profile '{}')", storage.profile()),
        },
        AuthCommand::Logout => {
            storage.clear_credentials()?;
            println!("✓ Logged out of profile '{}'", storage.profile());
        }
    }

    Ok(())
}

fn password_or_prompt(password: Option<String>) -> Result<String> {
    if let Some(password) = password {
        return non_empty(password);
    }

    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password")?;
    non_empty(line.trim_end_matches(['\r', '\n']).to_string())
}

fn non_empty(password: String) -> Result<String> {
    if password.is_empty() {
        bail!("Password must not be empty");
    }
    Ok(password)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_password_is_used() {
        assert_eq!(password_or_prompt(Some("s3cret".to_string())).unwrap(), "s3cret");
        assert!(password_or_prompt(Some(String::new())).is_err());
    }
}
