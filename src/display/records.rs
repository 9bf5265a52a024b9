//! Record list formatting

use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::models::{Category, Change, Goal, Transaction};

#[derive(Tabled)]
struct CategoryRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    kind: &'static str,
}

#[derive(Tabled)]
struct TransactionRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Amount")]
    amount: String,
    #[tabled(rename = "Memo")]
    memo: String,
}

#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "When")]
    when: String,
    #[tabled(rename = "Op")]
    operation: String,
    #[tabled(rename = "Record")]
    record: String,
    #[tabled(rename = "Summary")]
    summary: String,
}

#[derive(Tabled)]
struct GoalRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Saved")]
    saved: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Progress")]
    progress: String,
    #[tabled(rename = "Due")]
    due: String,
}

fn render<R: Tabled>(rows: Vec<R>) -> String {
    let mut table = Table::new(rows);
    table.with(Style::psql());
    format!("{}\n", table)
}

/// Truncate a string to a maximum length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

pub fn format_categories(categories: &[Category]) -> String {
    if categories.is_empty() {
        return "No categories found.\n".to_string();
    }

    let mut sorted: Vec<&Category> = categories.iter().collect();
    sorted.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));

    render(
        sorted
            .into_iter()
            .map(|c| CategoryRow {
                id: c.id.to_string(),
                name: c.name.clone(),
                kind: if c.income { "income" } else { "expense" },
            })
            .collect(),
    )
}

/// Newest first
pub fn format_transactions(transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return "No transactions found.\n".to_string();
    }

    let mut sorted: Vec<&Transaction> = transactions.iter().collect();
    sorted.sort_by(|a, b| b.date.cmp(&a.date).then(b.created_at.cmp(&a.created_at)));

    render(
        sorted
            .into_iter()
            .map(|t| TransactionRow {
                date: t.date.format("%Y-%m-%d").to_string(),
                name: if t.name.is_empty() {
                    "(unnamed)".to_string()
                } else {
                    truncate(&t.name, 30)
                },
                amount: t.amount.to_string(),
                memo: truncate(&t.memo, 30),
            })
            .collect(),
    )
}

pub fn format_changes(changes: &[Change]) -> String {
    if changes.is_empty() {
        return "No changes recorded.\n".to_string();
    }

    let mut sorted: Vec<&Change> = changes.iter().collect();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    render(
        sorted
            .into_iter()
            .map(|c| ChangeRow {
                when: c.timestamp.format("%Y-%m-%d %H:%M").to_string(),
                operation: c.operation.to_string(),
                record: format!("{} {}", c.entity_kind, truncate(&c.entity_id, 8 + 3)),
                summary: c.summary.as_deref().map(|s| truncate(s, 40)).unwrap_or_default(),
            })
            .collect(),
    )
}

pub fn format_goals(goals: &[Goal]) -> String {
    if goals.is_empty() {
        return "No goals found.\n".to_string();
    }

    let mut sorted: Vec<&Goal> = goals.iter().collect();
    sorted.sort_by(|a, b| a.due.cmp(&b.due).then(a.name.cmp(&b.name)));

    render(
        sorted
            .into_iter()
            .map(|g| GoalRow {
                name: g.name.clone(),
                saved: g.saved.to_string(),
                target: g.target.to_string(),
                progress: format!("{}%", g.progress_percent()),
                due: g.due.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
            })
            .collect(),
    )
}
