//! Password rotation, recovery and token revocation commands

use clap::Args;

use super::connect::{
    open_recovery, open_session, prompt_secret, read_secret, resolve_username, Backend,
    NEW_PASSWORD_ENV, PASSWORD_ENV,
};
use crate::config::Settings;
use crate::crypto::Credential;
use crate::display::{format_key_check, format_rotation_aborted, format_rotation_commit};
use crate::error::{CipherbookError, CipherbookResult};
use crate::models::EntityKind;
use crate::session::SessionLifecycle;

const MIN_PASSWORD_LEN: usize = 8;

/// Flags shared by the account commands
#[derive(Args, Debug)]
pub struct AccountArgs {
    /// Account name (defaults to the configured one)
    #[arg(short, long)]
    pub user: Option<String>,

    /// Use an in-process demo server instead of the configured one
    #[arg(long)]
    pub offline: bool,
}

/// Rotate every repository to a key derived from a new password
pub async fn handle_change_password(
    settings: &Settings,
    args: AccountArgs,
) -> CipherbookResult<()> {
    let username = resolve_username(settings, args.user)?;
    let current = read_secret("Current password: ", PASSWORD_ENV)?;
    let new = prompt_new_password()?;

    let mut session =
        open_session(settings, Backend::from_flag(args.offline), &username, &current).await?;

    println!("Re-encrypting records...");
    let result = session.change_credential(&current, &new).await;
    session.logout();

    match result {
        Ok(commit) => {
            print!("{}", format_rotation_commit(&commit));
            Ok(())
        }
        Err(CipherbookError::RotationAborted { cause, diverged }) => {
            eprint!("{}", format_rotation_aborted(&cause.to_string(), &diverged));
            Err(CipherbookError::RotationAborted { cause, diverged })
        }
        Err(e) => Err(e),
    }
}

/// Start a recovery session, then check which repositories open under the
/// key of the entered password
pub async fn handle_recover(settings: &Settings, args: AccountArgs) -> CipherbookResult<()> {
    let username = resolve_username(settings, args.user)?;
    let credential = read_secret("Password: ", PASSWORD_ENV)?;

    let mut session =
        open_recovery(settings, Backend::from_flag(args.offline), &username, &credential).await?;
    println!("Recovery session started for '{}'.", username);

    session.login(&username, &credential).await?;
    let results = key_check(&session).await;
    session.logout();

    print!("{}", format_key_check(&results?));
    Ok(())
}

/// Try to open every repository; `None` where the payloads are sealed under
/// another key
async fn key_check(
    session: &SessionLifecycle,
) -> CipherbookResult<Vec<(EntityKind, Option<usize>)>> {
    let keys = session.key_store();
    let server = session.server()?;
    let repos = session.repositories();

    let mut results = Vec::with_capacity(EntityKind::ALL.len());
    for kind in EntityKind::ALL {
        let opened = match kind {
            EntityKind::Category => repos.categories.read_all(keys, server).await.map(|r| r.len()),
            EntityKind::Transaction => {
                repos.transactions.read_all(keys, server).await.map(|r| r.len())
            }
            EntityKind::Change => repos.changes.read_all(keys, server).await.map(|r| r.len()),
            EntityKind::Goal => repos.goals.read_all(keys, server).await.map(|r| r.len()),
        };
        let opened = match opened {
            Ok(count) => Some(count),
            Err(CipherbookError::Encryption(_))
            | Err(CipherbookError::PartialRotationInconsistency { .. }) => None,
            Err(e) => return Err(e),
        };
        results.push((kind, opened));
    }
    Ok(results)
}

/// Revoke the account's token on the server
pub async fn handle_revoke(settings: &Settings, args: AccountArgs) -> CipherbookResult<()> {
    let username = resolve_username(settings, args.user)?;
    let credential = read_secret("Password: ", PASSWORD_ENV)?;

    let mut session =
        open_recovery(settings, Backend::from_flag(args.offline), &username, &credential).await?;
    session.revoke_token().await?;

    println!("Token revoked for '{}'.", username);
    Ok(())
}

fn check_new_password(password: &Credential) -> CipherbookResult<()> {
    if password.expose().chars().count() < MIN_PASSWORD_LEN {
        return Err(CipherbookError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Read the new password from the environment, or prompt twice
fn prompt_new_password() -> CipherbookResult<Credential> {
    if let Ok(value) = std::env::var(NEW_PASSWORD_ENV) {
        if !value.is_empty() {
            let password = Credential::new(value);
            check_new_password(&password)?;
            return Ok(password);
        }
    }

    loop {
        let first = prompt_secret("New password: ")?;
        if let Err(e) = check_new_password(&first) {
            println!("{} Please try again.", e);
            continue;
        }

        let second = prompt_secret("Confirm password: ")?;
        if first.expose() != second.expose() {
            println!("Passwords do not match. Please try again.");
            continue;
        }

        return Ok(first);
    }
}
