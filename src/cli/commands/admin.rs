//! `create-admin` subcommand: provision an administrator account.

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const COMMAND: &str = "create-admin";
pub const ARG_ADMIN_NAME: &str = "name";
pub const ARG_ADMIN_EMAIL: &str = "email";
pub const ARG_ADMIN_PASSWORD: &str = "password";

#[derive(Debug)]
pub struct Options {
    pub name: String,
    pub email: String,
    pub password: SecretString,
}

impl Options {
    /// # Errors
    /// Returns an error if the email or password is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let name = matches
            .get_one::<String>(ARG_ADMIN_NAME)
            .cloned()
            .unwrap_or_else(|| "Admin User".to_string());
        let email = matches
            .get_one::<String>(ARG_ADMIN_EMAIL)
            .cloned()
            .context("missing required argument: --email")?;
        let password = matches
            .get_one::<String>(ARG_ADMIN_PASSWORD)
            .map(|value| SecretString::from(value.clone()))
            .context("missing required argument: --password")?;

        Ok(Self {
            name,
            email,
            password,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.subcommand(
        Command::new(COMMAND)
            .about("Create an administrator, or promote an existing account, with a verified email")
            .arg(
                Arg::new(ARG_ADMIN_NAME)
                    .long(ARG_ADMIN_NAME)
                    .help("Display name for a newly created administrator")
                    .env("CLIPFORGE_ADMIN_NAME")
                    .default_value("Admin User"),
            )
            .arg(
                Arg::new(ARG_ADMIN_EMAIL)
                    .long(ARG_ADMIN_EMAIL)
                    .help("Administrator email address")
                    .env("CLIPFORGE_ADMIN_EMAIL")
                    .required(true),
            )
            .arg(
                Arg::new(ARG_ADMIN_PASSWORD)
                    .long(ARG_ADMIN_PASSWORD)
                    .help("Password for a newly created administrator; existing accounts keep theirs")
                    .env("CLIPFORGE_ADMIN_PASSWORD")
                    .hide_env_values(true)
                    .required(true),
            ),
    )
}
