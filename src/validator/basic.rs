//! Keyword validation for SQL variants without a parser grammar (Cosmos DB).

use crate::policy::AgentPolicy;
use crate::validator::{AcceptedQuery, LimitAction, Rejection, RejectionReason, ValidationOutcome};
use regex::Regex;

const DISALLOWED_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "MERGE", "GRANT",
    "REVOKE",
];

/// Blank out quoted literals so keyword and call scans only see SQL text.
fn mask_literals(sql: &str) -> String {
    let mut masked = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    for c in sql.chars() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                masked.push(c);
            }
            Some(_) => masked.push(' '),
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                }
                masked.push(c);
            }
        }
    }
    masked
}

/// Leading `SELECT` keyword, matched on ASCII letters only so byte offsets
/// into the original text stay valid.
fn starts_with_select(sql: &str) -> bool {
    let trimmed = sql.trim_start();
    trimmed.get(..6).is_some_and(|head| head.eq_ignore_ascii_case("SELECT"))
        && !trimmed[6..].starts_with(|c: char| c.is_alphanumeric() || c == '_')
}

pub fn validate_basic(sql: &str, policy: &AgentPolicy) -> ValidationOutcome {
    let masked = mask_literals(sql);
    let upper = masked.to_uppercase();

    if !starts_with_select(&masked) {
        return ValidationOutcome::Rejected(Rejection::new(
            RejectionReason::NotReadOnly,
            upper.split_whitespace().next().map(|word| word.to_string()),
            "Query must start with SELECT",
        ));
    }

    if masked.contains(';') {
        return ValidationOutcome::Rejected(Rejection::new(
            RejectionReason::NotReadOnly,
            Some("multiple statements".to_string()),
            "Exactly one SELECT statement is allowed",
        ));
    }

    for keyword in DISALLOWED_KEYWORDS {
        let pattern = format!(r"\b{}\b", keyword);
        if let Ok(re) = Regex::new(&pattern) {
            if re.is_match(&upper) {
                return ValidationOutcome::Rejected(Rejection::new(
                    RejectionReason::NotReadOnly,
                    Some(keyword.to_string()),
                    format!("Keyword {} is not allowed", keyword),
                ));
            }
        }
    }

    if let Ok(re) = Regex::new(r"([A-Za-z_][A-Za-z0-9_.]*)\s*\(") {
        for caps in re.captures_iter(&masked) {
            let full = &caps[1];
            let name = full.rsplit('.').next().unwrap_or(full).to_lowercase();
            if policy.is_blocked(&name) {
                return ValidationOutcome::Rejected(Rejection::new(
                    RejectionReason::BlockedFunction,
                    Some(name.clone()),
                    format!("Function '{}' is not allowed", name),
                ));
            }
        }
    }

    let mut warnings = Vec::new();
    let (sql, action) = enforce_top(sql, policy.max_rows(), &mut warnings);
    ValidationOutcome::Accepted(AcceptedQuery::new(sql, action, policy.max_rows(), warnings))
}

/// Clamp or inject `TOP n` directly after `SELECT`.
fn enforce_top(sql: &str, max_rows: u64, warnings: &mut Vec<String>) -> (String, LimitAction) {
    let select_end = sql.len() - sql.trim_start().len() + "SELECT".len();

    if let Ok(re) = Regex::new(r"(?i)^\s*SELECT\s+(?:DISTINCT\s+)?TOP\s+(\S+)") {
        if let Some(caps) = re.captures(sql) {
            if let Some(quantity) = caps.get(1) {
                return match quantity.as_str().parse::<u64>() {
                    Ok(rows) if rows > max_rows => {
                        warnings.push(format!("TOP {} lowered to {}", rows, max_rows));
                        let rewritten = format!(
                            "{}{}{}",
                            &sql[..quantity.start()],
                            max_rows,
                            &sql[quantity.end()..]
                        );
                        (rewritten, LimitAction::Clamped { from: rows })
                    }
                    Ok(_) => (sql.to_string(), LimitAction::Unchanged),
                    Err(_) => {
                        warnings.push(format!(
                            "TOP bound cannot be checked before execution; results are truncated to {} rows",
                            max_rows
                        ));
                        (sql.to_string(), LimitAction::Deferred)
                    }
                };
            }
        }
    }

    let has_distinct = Regex::new(r"(?i)^\s*SELECT\s+DISTINCT\b")
        .map(|re| re.is_match(sql))
        .unwrap_or(false);
    let has_offset_limit = Regex::new(r"(?i)\bOFFSET\s+\S+\s+LIMIT\b")
        .map(|re| re.is_match(sql))
        .unwrap_or(false);
    if has_distinct || has_offset_limit {
        warnings.push(format!(
            "No TOP could be placed; results are truncated to {} rows",
            max_rows
        ));
        return (sql.to_string(), LimitAction::Deferred);
    }

    let rewritten = format!("{} TOP {}{}", &sql[..select_end], max_rows, &sql[select_end..]);
    (rewritten, LimitAction::Injected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::SqlDialect;

    fn policy() -> AgentPolicy {
        AgentPolicy::new(SqlDialect::CosmosDb, 100, Vec::<String>::new(), "")
    }

    #[test]
    fn test_keywords_inside_literals_are_ignored() {
        let outcome = validate_basic("SELECT * FROM c WHERE c.status = 'deleted; update'", &policy());
        assert!(outcome.is_accepted());
    }

    #[test]
    fn test_blocked_call_found_by_scan() {
        let outcome = validate_basic("SELECT udf.SLEEP(1) FROM c", &policy());
        assert_eq!(
            outcome.rejection().map(|r| r.reason),
            Some(RejectionReason::BlockedFunction)
        );
    }

    #[test]
    fn test_distinct_without_top_is_deferred() {
        let outcome = validate_basic("SELECT DISTINCT c.city FROM c", &policy());
        let accepted = outcome.accepted().expect("accepted");
        assert_eq!(accepted.limit_action(), LimitAction::Deferred);
        assert_eq!(accepted.sql(), "SELECT DISTINCT c.city FROM c");
    }

    #[test]
    fn test_parameter_top_is_deferred() {
        let outcome = validate_basic("SELECT TOP @n c.id FROM c", &policy());
        assert_eq!(outcome.accepted().map(|q| q.limit_action()), Some(LimitAction::Deferred));
    }

    #[test]
    fn test_select_prefix_is_ascii_only() {
        // U+017F uppercases to 'S' but is two bytes long.
        let outcome = validate_basic("\u{17f}elect c.id FROM c", &policy());
        assert_eq!(outcome.rejection().map(|r| r.reason), Some(RejectionReason::NotReadOnly));

        let outcome = validate_basic("SELECTED c.id FROM c", &policy());
        assert!(!outcome.is_accepted());

        let outcome = validate_basic("  select c.id FROM c", &policy());
        assert_eq!(outcome.accepted().map(|q| q.sql()), Some("  select TOP 100 c.id FROM c"));
    }
}
