//! Session setup shared by the commands

use std::sync::Arc;

use chrono::{Duration as Days, Utc};
use tracing::debug;

use crate::config::Settings;
use crate::crypto::Credential;
use crate::error::{CipherbookError, CipherbookResult};
use crate::models::{AccountId, Category, Change, Goal, Money, Transaction};
use crate::remote::{HttpRemote, MemoryRemote};
use crate::session::SessionLifecycle;

/// Password environment variable, read instead of prompting
pub const PASSWORD_ENV: &str = "CIPHERBOOK_PASSWORD";

/// New-password environment variable for `change-password`
pub const NEW_PASSWORD_ENV: &str = "CIPHERBOOK_NEW_PASSWORD";

/// Where a command's session talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// The server named in the settings
    Server,
    /// A throwaway in-process server seeded with demo records
    Offline,
}

impl Backend {
    pub fn from_flag(offline: bool) -> Self {
        if offline {
            Backend::Offline
        } else {
            Backend::Server
        }
    }
}

/// Read a secret from `env_var`, or prompt for it without echo
pub fn read_secret(prompt: &str, env_var: &str) -> CipherbookResult<Credential> {
    if let Ok(value) = std::env::var(env_var) {
        if !value.is_empty() {
            return Ok(Credential::new(value));
        }
    }
    prompt_secret(prompt)
}

pub fn prompt_secret(prompt: &str) -> CipherbookResult<Credential> {
    rpassword::prompt_password(prompt)
        .map(Credential::new)
        .map_err(|e| CipherbookError::Io(format!("Failed to read password: {}", e)))
}

/// `--user` wins over the configured account name
pub fn resolve_username(settings: &Settings, flag: Option<String>) -> CipherbookResult<String> {
    flag.or_else(|| settings.username.clone())
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| {
            CipherbookError::Config(
                "No username configured. Pass --user or run 'cipherbook init --user <name>'"
                    .into(),
            )
        })
}

/// A logged-in session against `backend`
pub async fn open_session(
    settings: &Settings,
    backend: Backend,
    username: &str,
    credential: &Credential,
) -> CipherbookResult<SessionLifecycle> {
    let mut session = match backend {
        Backend::Server => {
            let http = Arc::new(HttpRemote::new(settings.request_timeout())?);
            SessionLifecycle::new(settings, http.clone(), http)?
        }
        Backend::Offline => {
            let memory = Arc::new(MemoryRemote::new().with_user(username, credential.expose()));
            SessionLifecycle::new(settings, memory.clone(), memory)?
        }
    };

    session.login(username, credential).await?;

    if backend == Backend::Offline {
        seed_demo(&session).await?;
    }
    Ok(session)
}

/// Start a recovery session; offline recovery gets a server with the demo
/// records already on it
pub async fn open_recovery(
    settings: &Settings,
    backend: Backend,
    username: &str,
    credential: &Credential,
) -> CipherbookResult<SessionLifecycle> {
    match backend {
        Backend::Server => {
            let http = Arc::new(HttpRemote::new(settings.request_timeout())?);
            let mut session = SessionLifecycle::new(settings, http.clone(), http)?;
            session.recover(username, credential).await?;
            Ok(session)
        }
        Backend::Offline => {
            let mut session = open_session(settings, backend, username, credential).await?;
            session.logout();
            session.recover(username, credential).await?;
            Ok(session)
        }
    }
}

/// Write a small budget through the repositories, so every kind has records
async fn seed_demo(session: &SessionLifecycle) -> CipherbookResult<()> {
    let keys = session.key_store();
    let server = session.server()?;
    let repos = session.repositories();
    let today = Utc::now().date_naive();
    let account = AccountId::new();

    let groceries = Category::new("Groceries");
    let mut salary = Category::new("Salary");
    salary.income = true;

    let transactions = vec![
        Transaction::new(account, today, Money::from_cents(-5423))
            .named("Corner market")
            .in_category(groceries.id),
        Transaction::new(account, today - Days::days(3), Money::from_cents(310000))
            .named("Payroll")
            .in_category(salary.id),
    ];

    let mut goal = Goal::new("Emergency fund", Money::from_cents(500000));
    goal.saved = Money::from_cents(125000);
    goal.due = Some(today + Days::days(180));

    for category in [groceries, salary] {
        repos.changes.put(keys, server, Change::created(&category)).await?;
        repos.categories.put(keys, server, category).await?;
    }
    for txn in transactions {
        repos.changes.put(keys, server, Change::created(&txn)).await?;
        repos.transactions.put(keys, server, txn).await?;
    }
    repos.changes.put(keys, server, Change::created(&goal)).await?;
    repos.goals.put(keys, server, goal).await?;

    debug!("demo records written");
    Ok(())
}
