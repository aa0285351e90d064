use crate::{
    api::{self, handlers::auth::utils::validate_signup, Backends},
    auth::{AdminProvision, CredentialStore},
    cli::telemetry,
    store::AuthStore,
};
use anyhow::{Context, Result};
use argon2::Params;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub dsn: String,
    pub name: String,
    pub email: String,
    pub password: SecretString,
}

/// Execute the create-admin action.
/// # Errors
/// Returns an error if the input is invalid or the store is unreachable.
pub async fn execute(args: Args) -> Result<()> {
    let result = connect_and_provision(&args).await;

    telemetry::shutdown_tracer();

    result.map(|_| ())
}

async fn connect_and_provision(args: &Args) -> Result<AdminProvision> {
    let Backends { store, .. } = api::connect(&args.dsn).await?;
    provision(store, args, Params::default()).await
}

/// Validate `args` with the signup rules, then create or promote the account.
pub(crate) async fn provision(
    store: Arc<dyn AuthStore>,
    args: &Args,
    params: Params,
) -> Result<AdminProvision> {
    let password = args.password.expose_secret();
    let (name, email) =
        validate_signup(&args.name, &args.email, password).context("Invalid admin account")?;

    let provision = CredentialStore::new(store, params)
        .ensure_admin(&name, &email, password)
        .await
        .context("Failed to provision admin account")?;

    match &provision {
        AdminProvision::Created(user) => {
            info!(user_id = %user.id, email = %user.email, "Admin account created");
        }
        AdminProvision::Promoted(user) => {
            info!(user_id = %user.id, email = %user.email, "Existing account promoted to admin");
        }
        AdminProvision::Unchanged(user) => {
            info!(user_id = %user.id, email = %user.email, "Account is already an admin");
        }
    }
    Ok(provision)
}
