//! Row-limit enforcement on a parsed query.

use crate::policy::SqlDialect;
use crate::validator::LimitAction;
use sqlparser::ast::{Expr, Fetch, Query, SetExpr, Top, Value};

/// Integer value of a literal row bound, looking through parentheses.
pub fn literal_rows(expr: &Expr) -> Option<u64> {
    match expr {
        Expr::Value(Value::Number(text, _)) => text.parse::<u64>().ok(),
        Expr::Nested(inner) => literal_rows(inner),
        _ => None,
    }
}

/// Any other numeric literal (`1e9`, `10.5`), as a float.
fn literal_number(expr: &Expr) -> Option<f64> {
    match expr {
        Expr::Value(Value::Number(text, _)) => text.parse::<f64>().ok().filter(|n| n.is_finite()),
        Expr::Nested(inner) => literal_number(inner),
        _ => None,
    }
}

fn rows_expr(rows: u64) -> Expr {
    Expr::Value(Value::Number(rows.to_string(), false))
}

/// Clamp a single bound expression. Returns the action and the replacement, if any.
fn clamp(quantity: Option<&Expr>, max_rows: u64) -> (LimitAction, Option<Expr>) {
    match quantity.map(literal_rows) {
        // `FETCH FIRST ROW ONLY` and friends: one row.
        None => (LimitAction::Unchanged, None),
        Some(Some(rows)) if rows > max_rows => {
            (LimitAction::Clamped { from: rows }, Some(rows_expr(max_rows)))
        }
        Some(Some(_)) => (LimitAction::Unchanged, None),
        Some(None) => match quantity.and_then(literal_number) {
            Some(rows) if rows > max_rows as f64 => (
                LimitAction::Clamped { from: rows as u64 },
                Some(rows_expr(max_rows)),
            ),
            _ => (LimitAction::Deferred, None),
        },
    }
}

/// Make the outermost query return at most `max_rows` rows.
///
/// Only the top-level bound is touched; subqueries keep their own limits.
pub fn enforce_row_limit(
    query: &mut Query,
    dialect: SqlDialect,
    max_rows: u64,
    warnings: &mut Vec<String>,
) -> LimitAction {
    if let Some(limit) = query.limit.as_ref() {
        let (action, replacement) = clamp(Some(limit), max_rows);
        if let Some(expr) = replacement {
            query.limit = Some(expr);
        }
        return note(action, "LIMIT", max_rows, warnings);
    }

    if let Some(fetch) = query.fetch.as_mut() {
        if fetch.percent || fetch.with_ties {
            return note(LimitAction::Deferred, "FETCH", max_rows, warnings);
        }
        let (action, replacement) = clamp(fetch.quantity.as_ref(), max_rows);
        if replacement.is_some() {
            fetch.quantity = replacement;
        }
        return note(action, "FETCH", max_rows, warnings);
    }

    if let SetExpr::Select(select) = query.body.as_mut() {
        if let Some(top) = select.top.as_mut() {
            if top.percent || top.with_ties || top.quantity.is_none() {
                return note(LimitAction::Deferred, "TOP", max_rows, warnings);
            }
            let (action, replacement) = clamp(top.quantity.as_ref(), max_rows);
            if replacement.is_some() {
                top.quantity = replacement;
            }
            return note(action, "TOP", max_rows, warnings);
        }
    }

    if !dialect.uses_top() {
        query.limit = Some(rows_expr(max_rows));
        return LimitAction::Injected;
    }

    // T-SQL: FETCH must follow OFFSET, otherwise TOP goes on the SELECT.
    if query.offset.is_some() {
        query.fetch = Some(Fetch {
            with_ties: false,
            percent: false,
            quantity: Some(rows_expr(max_rows)),
        });
        return LimitAction::Injected;
    }

    match query.body.as_mut() {
        SetExpr::Select(select) => {
            select.top = Some(Top {
                with_ties: false,
                percent: false,
                quantity: Some(rows_expr(max_rows)),
            });
            LimitAction::Injected
        }
        _ => note(LimitAction::Deferred, "TOP", max_rows, warnings),
    }
}

fn note(action: LimitAction, clause: &str, max_rows: u64, warnings: &mut Vec<String>) -> LimitAction {
    match action {
        LimitAction::Clamped { from } => {
            warnings.push(format!("{} {} lowered to {}", clause, from, max_rows));
        }
        LimitAction::Deferred => {
            warnings.push(format!(
                "{} bound cannot be checked before execution; results are truncated to {} rows",
                clause, max_rows
            ));
        }
        LimitAction::Unchanged | LimitAction::Injected => {}
    }
    action
}
