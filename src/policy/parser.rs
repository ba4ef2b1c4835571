//! SQL parsing for the read-only check.
//!
//! Uses sqlparser-rs with the dialect of the connected backend. A statement
//! counts as read-only only if it parses to exactly one query whose body
//! (including CTEs and derived tables) never writes.

use sqlparser::ast::{Query, Select, SetExpr, Statement, TableFactor, TableWithJoins};
use sqlparser::dialect::{Dialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;

use crate::db::Backend;

use super::StatementKind;

/// Outcome of a successful parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// A single query that only reads.
    ReadOnly,
    /// More than one statement.
    Multiple,
    /// A single statement that writes.
    Writes(StatementKind),
}

/// SQL classifier for one backend dialect.
#[derive(Debug, Clone, Copy)]
pub struct SqlClassifier {
    backend: Backend,
}

impl SqlClassifier {
    /// Creates a classifier using the dialect of `backend`.
    pub fn for_backend(backend: Backend) -> Self {
        Self { backend }
    }

    /// Classifies `sql`, returning the parser's message if it cannot be read.
    pub fn classify(&self, sql: &str) -> Result<Classification, String> {
        let statements = match self.backend {
            Backend::Postgres => parse(&PostgreSqlDialect {}, sql)?,
            Backend::Sqlite => parse(&SQLiteDialect {}, sql)?,
        };

        match statements.as_slice() {
            [] => Err("no statement found".to_string()),
            [statement] => Ok(classify_statement(statement)),
            _ => Ok(Classification::Multiple),
        }
    }
}

/// Convenience function to classify SQL without keeping a classifier around.
pub fn classify_sql(sql: &str, backend: Backend) -> Result<Classification, String> {
    SqlClassifier::for_backend(backend).classify(sql)
}

fn parse(dialect: &dyn Dialect, sql: &str) -> Result<Vec<Statement>, String> {
    Parser::parse_sql(dialect, sql).map_err(|e| e.to_string())
}

fn classify_statement(statement: &Statement) -> Classification {
    match statement {
        Statement::Query(query) => classify_query(query),
        other => Classification::Writes(StatementKind::from_leading_keyword(&other.to_string())),
    }
}

/// Walks CTEs and the query body; the first write found wins.
fn classify_query(query: &Query) -> Classification {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            let classification = classify_query(&cte.query);
            if classification != Classification::ReadOnly {
                return classification;
            }
        }
    }

    classify_set_expr(&query.body)
}

fn classify_set_expr(set_expr: &SetExpr) -> Classification {
    match set_expr {
        SetExpr::Select(select) => classify_select(select),
        SetExpr::Query(query) => classify_query(query),
        SetExpr::SetOperation { left, right, .. } => match classify_set_expr(left) {
            Classification::ReadOnly => classify_set_expr(right),
            writes => writes,
        },
        SetExpr::Values(_) | SetExpr::Table(_) => Classification::ReadOnly,
        // Data-modifying CTE bodies and anything newer than this walker
        other => Classification::Writes(StatementKind::from_leading_keyword(&other.to_string())),
    }
}

fn classify_select(select: &Select) -> Classification {
    if select.into.is_some() {
        return Classification::Writes(StatementKind::SelectInto);
    }

    select
        .from
        .iter()
        .map(classify_table_with_joins)
        .find(|c| *c != Classification::ReadOnly)
        .unwrap_or(Classification::ReadOnly)
}

fn classify_table_with_joins(twj: &TableWithJoins) -> Classification {
    std::iter::once(&twj.relation)
        .chain(twj.joins.iter().map(|join| &join.relation))
        .map(classify_table_factor)
        .find(|c| *c != Classification::ReadOnly)
        .unwrap_or(Classification::ReadOnly)
}

fn classify_table_factor(factor: &TableFactor) -> Classification {
    match factor {
        TableFactor::Derived { subquery, .. } => classify_query(subquery),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => classify_table_with_joins(table_with_joins),
        _ => Classification::ReadOnly,
    }
}
