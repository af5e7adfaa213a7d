use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::*;
use crate::model::Timestamp;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    SelectAvailability {
        starts: Timestamp,
        ends: Timestamp,
        exclude_id: Option<Ulid>,
    },
    /// Create when `id` is None, edit otherwise.
    PlaceReservation {
        id: Option<Ulid>,
        user_identification: Option<String>,
        starts: Timestamp,
        ends: Timestamp,
    },
    CancelReservation {
        id: Ulid,
    },
    SelectReservation {
        id: Ulid,
    },
    /// `WHERE starts >= S AND ends <= E`. Not a containment filter: matches
    /// reservations whose start or whose end falls in `[S, E]`.
    SelectReservationsBetween {
        starts: Timestamp,
        ends: Timestamp,
        active: bool,
    },
    SelectConfiguration,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("one statement per query".into()));
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }
    let values = extract_insert_values(insert)?;
    if values.len() != 4 {
        return Err(SqlError::WrongArity("reservations", 4, values.len()));
    }

    let id = parse_ulid_or_null(&values[0])?;
    let user_identification = parse_string_or_null(&values[1])?;
    let starts = parse_instant(&values[2])?;
    let ends = parse_instant(&values[3])?;

    if let Some(user) = &user_identification {
        if user.len() > MAX_USER_IDENTIFICATION_LEN {
            return Err(SqlError::LimitExceeded("user_identification too long"));
        }
    }
    // A new reservation needs an owner; an edit keeps the one it has.
    if id.is_none() && user_identification.as_deref().is_none_or(|u| u.trim().is_empty()) {
        return Err(SqlError::MissingValue("user_identification"));
    }

    Ok(Command::PlaceReservation {
        id,
        user_identification,
        starts,
        ends,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }
    let filters = collect_where(delete.selection.as_ref())?;
    let id = find(&filters, "id", FilterOp::Eq).ok_or(SqlError::MissingFilter("id"))?;
    Ok(Command::CancelReservation { id: parse_ulid(id)? })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = collect_where(select.selection.as_ref())?;

    match table.as_str() {
        "availability" => Ok(Command::SelectAvailability {
            starts: required_instant(&filters, "starts", FilterOp::Eq)?,
            ends: required_instant(&filters, "ends", FilterOp::Eq)?,
            exclude_id: find(&filters, "exclude_id", FilterOp::Eq)
                .map(parse_ulid_or_null)
                .transpose()?
                .flatten(),
        }),
        "reservations" => {
            if let Some(id) = find(&filters, "id", FilterOp::Eq) {
                return Ok(Command::SelectReservation { id: parse_ulid(id)? });
            }
            Ok(Command::SelectReservationsBetween {
                starts: required_instant(&filters, "starts", FilterOp::GtEq)?,
                ends: required_instant(&filters, "ends", FilterOp::LtEq)?,
                active: find(&filters, "active", FilterOp::Eq)
                    .map(parse_bool)
                    .transpose()?
                    .unwrap_or(true),
            })
        }
        "configuration" => Ok(Command::SelectConfiguration),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── WHERE clauses ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOp {
    Eq,
    GtEq,
    LtEq,
}

#[derive(Debug)]
struct Filter<'a> {
    column: String,
    op: FilterOp,
    value: &'a Expr,
}

/// Flatten a conjunction of `column <op> value` comparisons.
fn collect_where(selection: Option<&Expr>) -> Result<Vec<Filter<'_>>, SqlError> {
    let mut filters = Vec::new();
    if let Some(expr) = selection {
        collect_filters(expr, &mut filters)?;
    }
    Ok(filters)
}

fn collect_filters<'a>(expr: &'a Expr, out: &mut Vec<Filter<'a>>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp { left, op, right } => {
            let op = match op {
                ast::BinaryOperator::And => {
                    collect_filters(left, out)?;
                    return collect_filters(right, out);
                }
                ast::BinaryOperator::Eq => FilterOp::Eq,
                ast::BinaryOperator::GtEq => FilterOp::GtEq,
                ast::BinaryOperator::LtEq => FilterOp::LtEq,
                other => return Err(SqlError::Unsupported(format!("operator {other}"))),
            };
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
            out.push(Filter {
                column,
                op,
                value: right,
            });
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn find<'a>(filters: &[Filter<'a>], column: &str, op: FilterOp) -> Option<&'a Expr> {
    filters
        .iter()
        .find(|f| f.column == column && f.op == op)
        .map(|f| f.value)
}

fn required_instant(
    filters: &[Filter<'_>],
    column: &'static str,
    op: FilterOp,
) -> Result<Timestamp, SqlError> {
    let expr = find(filters, column, op).ok_or(SqlError::MissingFilter(column))?;
    parse_instant(expr)
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.as_slice()),
            _ => Err(SqlError::Unsupported("one reservation per INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid(expr).map(Some),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string or NULL, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        parse_i64_expr(expr)?
            .checked_neg()
            .ok_or_else(|| SqlError::Parse("i64 out of range".into()))
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn is_integer(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// RFC 3339 text, a plain `YYYY-MM-DD` date (midnight UTC), or Unix
/// milliseconds as a number or numeric string.
fn parse_instant(expr: &Expr) -> Result<Timestamp, SqlError> {
    let instant = match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) if !is_integer(s) => parse_instant_text(s)?,
        _ => {
            let ms = parse_i64_expr(expr)?;
            DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| SqlError::Parse(format!("timestamp out of range: {ms}")))?
        }
    };
    if !(MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&instant.year()) {
        return Err(SqlError::LimitExceeded("instant outside supported years"));
    }
    Ok(instant)
}

fn parse_instant_text(s: &str) -> Result<Timestamp, SqlError> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
        .ok_or_else(|| SqlError::Parse(format!("bad instant: {s:?}")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    MissingValue(&'static str),
    LimitExceeded(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::MissingValue(col) => write!(f, "missing value: {col}"),
            SqlError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    fn ts(y: i32, m: u32, d: u32, h: u32) -> Timestamp {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn parse_select_availability() {
        let sql = "SELECT * FROM availability WHERE starts = '2026-10-20T09:00:00Z' AND ends = '2026-10-22'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailability {
                starts: ts(2026, 10, 20, 9),
                ends: ts(2026, 10, 22, 0),
                exclude_id: None,
            }
        );
    }

    #[test]
    fn parse_select_availability_excluding() {
        let sql = format!(
            "SELECT * FROM availability WHERE starts = '2026-10-20' AND ends = '2026-10-22' AND exclude_id = '{ID}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectAvailability { exclude_id, .. } => {
                assert_eq!(exclude_id.unwrap().to_string(), ID);
            }
            cmd => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn availability_needs_both_instants() {
        let sql = "SELECT * FROM availability WHERE starts = '2026-10-20'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("ends"))));
    }

    #[test]
    fn instants_accept_offsets_and_millis() {
        let sql = "SELECT * FROM availability WHERE starts = '2026-10-20T11:00:00+02:00' AND ends = 1792836000000";
        match parse_sql(sql).unwrap() {
            Command::SelectAvailability { starts, ends, .. } => {
                assert_eq!(starts, ts(2026, 10, 20, 9));
                assert_eq!(ends, DateTime::from_timestamp_millis(1_792_836_000_000).unwrap());
            }
            cmd => panic!("expected SelectAvailability, got {cmd:?}"),
        }
        // Bound parameters arrive quoted.
        let quoted = "SELECT * FROM availability WHERE starts = '1792836000000' AND ends = '1792836000000'";
        assert!(parse_sql(quoted).is_ok());
    }

    #[test]
    fn instants_outside_supported_years_rejected() {
        let sql = "SELECT * FROM availability WHERE starts = '1969-12-31' AND ends = '2026-10-22'";
        assert!(matches!(parse_sql(sql), Err(SqlError::LimitExceeded(_))));
        let garbage = "SELECT * FROM availability WHERE starts = 'next tuesday' AND ends = '2026-10-22'";
        assert!(matches!(parse_sql(garbage), Err(SqlError::Parse(_))));
    }

    #[test]
    fn negated_i64_min_is_a_parse_error() {
        let sql = "SELECT * FROM availability WHERE starts = -'-9223372036854775808' AND ends = '2026-10-22'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_create_reservation() {
        let sql = "INSERT INTO reservations (id, user_identification, starts, ends) VALUES (NULL, 'alice@example.com', '2026-10-20', '2026-10-22')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::PlaceReservation {
                id: None,
                user_identification: Some("alice@example.com".into()),
                starts: ts(2026, 10, 20, 0),
                ends: ts(2026, 10, 22, 0),
            }
        );
    }

    #[test]
    fn create_requires_user() {
        for user in ["NULL", "'   '"] {
            let sql = format!(
                "INSERT INTO reservations (id, user_identification, starts, ends) VALUES (NULL, {user}, '2026-10-20', '2026-10-22')"
            );
            assert!(matches!(
                parse_sql(&sql),
                Err(SqlError::MissingValue("user_identification"))
            ));
        }
    }

    #[test]
    fn parse_edit_reservation() {
        let sql = format!(
            "INSERT INTO reservations (id, user_identification, starts, ends) VALUES ('{ID}', NULL, '2026-10-20', '2026-10-22')"
        );
        match parse_sql(&sql).unwrap() {
            Command::PlaceReservation {
                id,
                user_identification,
                ..
            } => {
                assert_eq!(id.unwrap().to_string(), ID);
                assert_eq!(user_identification, None);
            }
            cmd => panic!("expected PlaceReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn insert_shape_is_checked() {
        let short = "INSERT INTO reservations (id, starts, ends) VALUES (NULL, '2026-10-20', '2026-10-22')";
        assert!(matches!(parse_sql(short), Err(SqlError::WrongArity("reservations", 4, 3))));

        let long_user = "x".repeat(MAX_USER_IDENTIFICATION_LEN + 1);
        let sql = format!(
            "INSERT INTO reservations (id, user_identification, starts, ends) VALUES (NULL, '{long_user}', '2026-10-20', '2026-10-22')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::LimitExceeded(_))));

        let bad_id = "INSERT INTO reservations (id, user_identification, starts, ends) VALUES ('nope', NULL, '2026-10-20', '2026-10-22')";
        assert!(matches!(parse_sql(bad_id), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_cancel() {
        let sql = format!("DELETE FROM reservations WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::CancelReservation { id } => assert_eq!(id.to_string(), ID),
            cmd => panic!("expected CancelReservation, got {cmd:?}"),
        }
        assert!(matches!(
            parse_sql("DELETE FROM reservations"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn parse_select_reservation_by_id() {
        let sql = format!("SELECT * FROM reservations WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::SelectReservation { .. }));
    }

    #[test]
    fn parse_select_reservations_between() {
        let sql = "SELECT * FROM reservations WHERE starts >= '2026-10-01' AND ends <= '2026-10-31'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectReservationsBetween {
                starts: ts(2026, 10, 1, 0),
                ends: ts(2026, 10, 31, 0),
                active: true,
            }
        );
        let cancelled = "SELECT * FROM reservations WHERE (starts >= '2026-10-01' AND ends <= '2026-10-31') AND active = false";
        match parse_sql(cancelled).unwrap() {
            Command::SelectReservationsBetween { active, .. } => assert!(!active),
            cmd => panic!("expected SelectReservationsBetween, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_configuration() {
        assert_eq!(
            parse_sql("SELECT * FROM configuration").unwrap(),
            Command::SelectConfiguration
        );
    }

    #[test]
    fn unsupported_shapes_error() {
        assert!(matches!(
            parse_sql("SELECT * FROM guests"),
            Err(SqlError::UnknownTable(_))
        ));
        assert!(matches!(
            parse_sql("SELECT * FROM reservations WHERE starts > '2026-10-01' AND ends <= '2026-10-31'"),
            Err(SqlError::Unsupported(_))
        ));
        assert!(matches!(
            parse_sql("SELECT * FROM configuration; SELECT * FROM configuration"),
            Err(SqlError::Unsupported(_))
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
