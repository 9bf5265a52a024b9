//! `list`: decrypt and print one repository

use chrono::NaiveDate;
use clap::Args;

use super::connect::{open_session, read_secret, resolve_username, Backend, PASSWORD_ENV};
use crate::config::Settings;
use crate::display::{format_categories, format_changes, format_goals, format_transactions};
use crate::error::{CipherbookError, CipherbookResult};
use crate::models::{EntityKind, TransactionFilter};
use crate::session::SessionLifecycle;

/// Arguments for `cipherbook list`
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Record kind: categories, transactions, changes or goals
    pub kind: EntityKind,

    /// Account name (defaults to the configured one)
    #[arg(short, long)]
    pub user: Option<String>,

    /// Use an in-process demo server instead of the configured one
    #[arg(long)]
    pub offline: bool,

    /// Only transactions on or after this date (YYYY-MM-DD)
    #[arg(long)]
    pub since: Option<String>,

    /// Only transactions on or before this date (YYYY-MM-DD)
    #[arg(long)]
    pub until: Option<String>,
}

fn parse_date(s: &str) -> CipherbookResult<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| CipherbookError::Validation(format!("Invalid date '{}': use YYYY-MM-DD", s)))
}

pub async fn handle_list(settings: &Settings, args: ListArgs) -> CipherbookResult<()> {
    let filter = TransactionFilter {
        since: args.since.as_deref().map(parse_date).transpose()?,
        until: args.until.as_deref().map(parse_date).transpose()?,
        ..TransactionFilter::default()
    };

    let username = resolve_username(settings, args.user)?;
    let credential = read_secret("Password: ", PASSWORD_ENV)?;
    let mut session =
        open_session(settings, Backend::from_flag(args.offline), &username, &credential).await?;

    let result = render_kind(&session, args.kind, &filter).await;
    session.logout();
    print!("{}", result?);
    Ok(())
}

async fn render_kind(
    session: &SessionLifecycle,
    kind: EntityKind,
    filter: &TransactionFilter,
) -> CipherbookResult<String> {
    let keys = session.key_store();
    let server = session.server()?;
    let repos = session.repositories();

    Ok(match kind {
        EntityKind::Category => format_categories(&repos.categories.read_all(keys, server).await?),
        EntityKind::Transaction => format_transactions(
            &repos
                .transactions
                .read(keys, server, |t| filter.matches(t))
                .await?,
        ),
        EntityKind::Change => format_changes(&repos.changes.read_all(keys, server).await?),
        EntityKind::Goal => format_goals(&repos.goals.read_all(keys, server).await?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Credential;
    use crate::test_support::fast_kdf;

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2025-02-28").unwrap(),
            NaiveDate::from_ymd_opt(2025, 2, 28).unwrap()
        );
        assert!(parse_date("28/02/2025").unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_render_offline_goals() {
        let settings = Settings {
            key_derivation: fast_kdf(),
            ..Settings::default()
        };
        let session = open_session(
            &settings,
            Backend::Offline,
            "demo",
            &Credential::from("demo-pass"),
        )
        .await
        .unwrap();

        let output = render_kind(&session, EntityKind::Goal, &TransactionFilter::default())
            .await
            .unwrap();
        assert!(output.contains("Emergency fund"));
        assert!(output.contains("25%"));

        let far_future = TransactionFilter {
            since: NaiveDate::from_ymd_opt(2999, 1, 1),
            ..TransactionFilter::default()
        };
        let output = render_kind(&session, EntityKind::Transaction, &far_future)
            .await
            .unwrap();
        assert_eq!(output, "No transactions found.\n");
    }
}
