//! Parser-backed validation for dialects with a sqlparser grammar.

use crate::policy::AgentPolicy;
use crate::validator::limit::enforce_row_limit;
use crate::validator::{AcceptedQuery, LimitAction, Rejection, RejectionReason, ValidationOutcome};
use sqlparser::ast::{Expr, ObjectName, Query, SetExpr, Statement, TableFactor, Visit, Visitor};
use sqlparser::dialect::Dialect;
use sqlparser::parser::Parser;
use std::ops::ControlFlow;
use tracing::debug;

/// Walks every statement, table factor and expression in the tree and stops
/// at the first construct the policy forbids.
///
/// The derived visitor has no query hook, so query-level clauses (`INTO`,
/// row locks) are checked wherever a query can start: the top statement,
/// derived tables, CTEs and subquery expressions.
struct SafetyVisitor<'a> {
    policy: &'a AgentPolicy,
}

impl SafetyVisitor<'_> {
    fn check_name(&self, name: &ObjectName) -> ControlFlow<Rejection> {
        match name.0.last() {
            Some(last) => self.check_function(&last.value),
            None => ControlFlow::Continue(()),
        }
    }

    fn check_function(&self, name: &str) -> ControlFlow<Rejection> {
        let function = name.to_lowercase();
        if self.policy.is_blocked(&function) {
            return ControlFlow::Break(Rejection::new(
                RejectionReason::BlockedFunction,
                Some(function.clone()),
                format!("Function '{}' is not allowed", function),
            ));
        }
        ControlFlow::Continue(())
    }

    fn check_query(&self, query: &Query) -> ControlFlow<Rejection> {
        if !query.locks.is_empty() {
            return ControlFlow::Break(not_read_only("FOR UPDATE", "Row-locking clauses are not allowed"));
        }
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.check_query(&cte.query)?;
            }
        }
        self.check_body(&query.body)
    }

    fn check_body(&self, body: &SetExpr) -> ControlFlow<Rejection> {
        match body {
            SetExpr::Select(select) if select.into.is_some() => {
                ControlFlow::Break(not_read_only("SELECT INTO", "SELECT ... INTO writes a table"))
            }
            SetExpr::Query(query) => self.check_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.check_body(left)?;
                self.check_body(right)
            }
            _ => ControlFlow::Continue(()),
        }
    }
}

impl Visitor for SafetyVisitor<'_> {
    type Break = Rejection;

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<Self::Break> {
        match statement {
            Statement::Query(query) => self.check_query(query),
            other => ControlFlow::Break(not_read_only(
                statement_kind(other),
                "Only read-only SELECT queries are allowed",
            )),
        }
    }

    /// Table-valued calls in FROM: `pg_ls_dir('/')`, `LATERAL pg_ls_dir('/')`
    /// and derived tables. `TABLE(f(...))` reaches `pre_visit_expr` as a call.
    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        match factor {
            TableFactor::Table { name, args: Some(_), .. } => self.check_name(name),
            TableFactor::Function { name, .. } => self.check_name(name),
            TableFactor::TableFunction { expr: Expr::Function(function), .. } => {
                self.check_name(&function.name)
            }
            TableFactor::Derived { subquery, .. } => self.check_query(subquery),
            _ => ControlFlow::Continue(()),
        }
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Function(function) => self.check_name(&function.name),
            Expr::Subquery(query) | Expr::ArraySubquery(query) => self.check_query(query),
            Expr::Exists { subquery, .. } | Expr::InSubquery { subquery, .. } => {
                self.check_query(subquery)
            }
            other => match keyword_call(other) {
                Some(name) => self.check_function(name),
                None => ControlFlow::Continue(()),
            },
        }
    }
}

/// Built-ins the grammar parses into dedicated nodes instead of
/// `Expr::Function`, keyed by the name a blocklist would use.
fn keyword_call(expr: &Expr) -> Option<&'static str> {
    let name = match expr {
        Expr::Cast { .. } => "cast",
        Expr::TryCast { .. } => "try_cast",
        Expr::SafeCast { .. } => "safe_cast",
        Expr::Extract { .. } => "extract",
        Expr::Ceil { .. } => "ceil",
        Expr::Floor { .. } => "floor",
        Expr::Position { .. } => "position",
        Expr::Substring { .. } => "substring",
        Expr::Trim { .. } => "trim",
        Expr::Overlay { .. } => "overlay",
        Expr::ListAgg(_) => "listagg",
        Expr::ArrayAgg(_) => "array_agg",
        Expr::MatchAgainst { .. } => "match",
        _ => return None,
    };
    Some(name)
}

fn not_read_only(construct: &str, message: &str) -> Rejection {
    Rejection::new(RejectionReason::NotReadOnly, Some(construct.to_string()), message)
}

/// Leading keyword of a statement, for rejection messages.
fn statement_kind(statement: &Statement) -> &'static str {
    match statement {
        Statement::Query(_) => "SELECT",
        Statement::Insert { .. } => "INSERT",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete { .. } => "DELETE",
        Statement::Merge { .. } => "MERGE",
        Statement::Truncate { .. } => "TRUNCATE",
        Statement::Drop { .. } => "DROP",
        Statement::AlterTable { .. } => "ALTER",
        Statement::CreateTable { .. } | Statement::CreateView { .. } => "CREATE",
        Statement::Grant { .. } => "GRANT",
        Statement::Revoke { .. } => "REVOKE",
        _ => "non-query statement",
    }
}

/// Validate `sql` (already stripped of fences) with the given grammar.
pub fn validate_parsed(sql: &str, dialect: &dyn Dialect, policy: &AgentPolicy) -> ValidationOutcome {
    let mut statements = match Parser::parse_sql(dialect, sql) {
        Ok(statements) => statements,
        Err(e) => {
            debug!("SQL parse failed: {}", e);
            return ValidationOutcome::Rejected(Rejection::new(
                RejectionReason::SyntaxError,
                None,
                e.to_string(),
            ));
        }
    };

    if statements.len() != 1 {
        return ValidationOutcome::Rejected(not_read_only(
            "multiple statements",
            "Exactly one SELECT statement is allowed",
        ));
    }
    let mut statement = statements.remove(0);

    let mut visitor = SafetyVisitor { policy };
    if let ControlFlow::Break(rejection) = statement.visit(&mut visitor) {
        return ValidationOutcome::Rejected(rejection);
    }

    let mut warnings = Vec::new();
    let action = match &mut statement {
        Statement::Query(query) => enforce_row_limit(
            query,
            policy.dialect(),
            policy.max_rows(),
            &mut warnings,
        ),
        other => {
            return ValidationOutcome::Rejected(not_read_only(
                statement_kind(other),
                "Only read-only SELECT queries are allowed",
            ))
        }
    };

    let sql = match action {
        LimitAction::Unchanged | LimitAction::Deferred => sql.to_string(),
        LimitAction::Injected | LimitAction::Clamped { .. } => statement.to_string(),
    };

    ValidationOutcome::Accepted(AcceptedQuery::new(sql, action, policy.max_rows(), warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::SqlDialect;
    use sqlparser::dialect::{GenericDialect, PostgreSqlDialect};

    #[test]
    fn test_cte_with_write_never_accepted() {
        let policy = AgentPolicy::with_defaults(SqlDialect::Postgres);
        let outcome = validate_parsed(
            "WITH added AS (INSERT INTO orders (id) VALUES (1) RETURNING id) SELECT * FROM added",
            &PostgreSqlDialect {},
            &policy,
        );
        assert!(!outcome.is_accepted());
    }

    #[test]
    fn test_nested_blocked_function_in_cte() {
        let policy = AgentPolicy::with_defaults(SqlDialect::Generic);
        let outcome = validate_parsed(
            "WITH t AS (SELECT sleep(10) AS s) SELECT s FROM t",
            &GenericDialect {},
            &policy,
        );
        let rejection = outcome.rejection().expect("rejected");
        assert_eq!(rejection.construct.as_deref(), Some("sleep"));
    }

    #[test]
    fn test_statement_kind_reported() {
        let policy = AgentPolicy::with_defaults(SqlDialect::Postgres);
        let outcome = validate_parsed("TRUNCATE orders", &PostgreSqlDialect {}, &policy);
        let rejection = outcome.rejection().expect("rejected");
        assert_eq!(rejection.construct.as_deref(), Some("TRUNCATE"));
    }

    #[test]
    fn test_lateral_function_call_checked() {
        let policy = AgentPolicy::with_defaults(SqlDialect::Postgres);
        let outcome = validate_parsed(
            "SELECT * FROM orders, LATERAL pg_ls_dir('/') AS f",
            &PostgreSqlDialect {},
            &policy,
        );
        let rejection = outcome.rejection().expect("rejected");
        assert_eq!(rejection.reason, RejectionReason::BlockedFunction);
        assert_eq!(rejection.construct.as_deref(), Some("pg_ls_dir"));
    }

    #[test]
    fn test_table_function_in_derived_table_checked() {
        let policy = AgentPolicy::with_defaults(SqlDialect::Postgres);
        let outcome = validate_parsed(
            "SELECT * FROM (SELECT * FROM pg_read_file('/etc/passwd')) AS t",
            &PostgreSqlDialect {},
            &policy,
        );
        let rejection = outcome.rejection().expect("rejected");
        assert_eq!(rejection.construct.as_deref(), Some("pg_read_file"));
    }

    #[test]
    fn test_row_locks_rejected_in_subqueries() {
        let policy = AgentPolicy::with_defaults(SqlDialect::Postgres);
        for sql in [
            "SELECT * FROM orders WHERE id = 1 FOR UPDATE",
            "SELECT * FROM (SELECT * FROM orders WHERE id = 1 FOR UPDATE) AS t",
            "SELECT * FROM orders WHERE id IN (SELECT id FROM refunds WHERE id > 0 FOR SHARE)",
            "WITH locked AS (SELECT id FROM orders WHERE id = 1 FOR UPDATE) SELECT * FROM locked",
        ] {
            let outcome = validate_parsed(sql, &PostgreSqlDialect {}, &policy);
            let rejection = outcome.rejection().expect(sql);
            assert_eq!(rejection.reason, RejectionReason::NotReadOnly, "{}", sql);
            assert_eq!(rejection.construct.as_deref(), Some("FOR UPDATE"), "{}", sql);
        }
    }

    #[test]
    fn test_keyword_builtins_go_through_blocklist() {
        let policy = AgentPolicy::new(
            SqlDialect::Postgres,
            100,
            vec!["substring".to_string(), "extract".to_string()],
            "",
        );
        let outcome = validate_parsed(
            "SELECT SUBSTRING(name FROM 1 FOR 3) FROM customers",
            &PostgreSqlDialect {},
            &policy,
        );
        assert_eq!(outcome.rejection().expect("rejected").construct.as_deref(), Some("substring"));

        let outcome = validate_parsed(
            "SELECT id FROM orders WHERE EXTRACT(YEAR FROM created_at) = 2024",
            &PostgreSqlDialect {},
            &policy,
        );
        assert_eq!(outcome.rejection().expect("rejected").construct.as_deref(), Some("extract"));

        let outcome = validate_parsed("SELECT TRIM(name) FROM customers", &PostgreSqlDialect {}, &policy);
        assert!(outcome.is_accepted());
    }

    #[test]
    fn test_ordinary_tables_named_like_functions_are_allowed() {
        let policy = AgentPolicy::with_defaults(SqlDialect::Postgres);
        let outcome = validate_parsed("SELECT * FROM system LIMIT 5", &PostgreSqlDialect {}, &policy);
        assert!(outcome.is_accepted());
    }
}
