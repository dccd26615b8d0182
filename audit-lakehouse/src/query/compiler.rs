//! Query compiler: filter + authorised services -> statement text
//!
//! Every caller-supplied value is embedded as a single-quoted literal with
//! embedded quotes doubled, so no filter value can end the literal early.
//! Column names come only from [`crate::schema`].
//!
//! Predicates are ANDed in a fixed order: dates, `who`, subject pair,
//! `service`, `correlationId`, authorised services.

use chrono::{Days, NaiveDate};

use crate::query::filter::AuditFilter;
use crate::schema::{
    COL_CORRELATION_ID, COL_SERVICE, COL_SUBJECT_ID, COL_SUBJECT_TYPE, COL_WHEN, COL_WHO,
};
use crate::scope::AuthorisedServices;

/// Predicate used when the caller may see no service at all
pub const NO_ROWS_PREDICATE: &str = "FALSE";

/// Quote `value` as a SQL string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quote a column name when the engine would otherwise fold or misread it
pub fn quote_ident(name: &str) -> String {
    let plain = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain && !is_reserved(name) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

fn is_reserved(name: &str) -> bool {
    matches!(name, "when" | "select" | "from" | "where" | "order" | "group" | "user")
}

/// Filter predicates only: no service scope, no ordering
///
/// Shared with the row store, which applies no authorisation scope.
pub fn filter_predicates(filter: &AuditFilter) -> Vec<String> {
    let mut predicates = Vec::new();
    let when = quote_ident(COL_WHEN);

    if let Some(start) = filter.start_date {
        predicates.push(format!("{when} >= {}", date_literal(start)));
    }
    if let Some(end) = filter.end_date {
        // Inclusive end day: everything before the following midnight
        match end.checked_add_days(Days::new(1)) {
            Some(next) => predicates.push(format!("{when} < {}", date_literal(next))),
            None => predicates.push(format!("{when} <= {}", date_literal(end))),
        }
    }

    let equalities = [
        (COL_WHO, &filter.who),
        (COL_SUBJECT_ID, &filter.subject_id),
        (COL_SUBJECT_TYPE, &filter.subject_type),
        (COL_SERVICE, &filter.service),
        (COL_CORRELATION_ID, &filter.correlation_id),
    ];
    for (column, value) in equalities {
        if let Some(value) = value {
            predicates.push(format!("{} = {}", quote_ident(column), quote_literal(value)));
        }
    }
    predicates
}

/// Restrict to the authorised services; an empty set matches nothing
pub fn service_scope_predicate(scope: &AuthorisedServices) -> String {
    if scope.is_empty() {
        return NO_ROWS_PREDICATE.to_string();
    }
    let list = scope.iter().map(quote_literal).collect::<Vec<_>>().join(", ");
    format!("{} IN ({list})", quote_ident(COL_SERVICE))
}

/// Full `WHERE` body for an analytical query
pub fn predicate(filter: &AuditFilter, scope: &AuthorisedServices) -> String {
    let mut predicates = filter_predicates(filter);
    predicates.push(service_scope_predicate(scope));
    predicates.join(" AND ")
}

fn date_literal(date: NaiveDate) -> String {
    quote_literal(&date.format("%Y-%m-%d").to_string())
}

/// Compiles statements against one `<database>.<table>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryCompiler {
    qualified_table: String,
}

impl QueryCompiler {
    pub fn new(qualified_table: impl Into<String>) -> Self {
        Self {
            qualified_table: qualified_table.into(),
        }
    }

    pub fn compile(&self, filter: &AuditFilter, scope: &AuthorisedServices) -> String {
        format!(
            "SELECT * FROM {} WHERE {} ORDER BY {} DESC",
            self.qualified_table,
            predicate(filter, scope),
            quote_ident(COL_WHEN)
        )
    }
}
