use std::ops::Bound;

use sqlparser::ast::{
    self, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{NewAppointment, NewBlock, NewClient, NewProfessional, NewRecurringRule};

/// Parsed command from SQL input.
///
/// Values stay as text where the engine owns their format (dates, times,
/// prices), so malformed input is reported as a data error, not a syntax error.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertProfessional(NewProfessional),
    SelectProfessionals,
    InsertClient(NewClient),
    SelectClients {
        professional_id: Ulid,
    },
    InsertAppointment(NewAppointment),
    SelectAppointments {
        professional_id: Ulid,
        from: Bound<String>,
        to: Bound<String>,
    },
    InsertRecurringRule(NewRecurringRule),
    SelectRecurringRules {
        professional_id: Ulid,
    },
    /// Multi-row INSERT into `schedule`: the rows become the whole schedule.
    ReplaceSchedule {
        professional_id: Ulid,
        blocks: Vec<NewBlock>,
    },
    ClearSchedule {
        professional_id: Ulid,
    },
    SelectSchedule {
        professional_id: Ulid,
    },
    SelectAvailability {
        professional_id: Ulid,
        date: String,
        start: String,
        duration_minutes: i64,
    },
    SelectOccurrences {
        rule_id: Ulid,
        weeks: Option<u32>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
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
    let rows = extract_insert_rows(insert)?;
    if table != "schedule" && rows.len() > 1 {
        return Err(SqlError::Unsupported(format!("multi-row INSERT into {table}")));
    }
    let values = &rows[0];

    match table.as_str() {
        "professionals" => {
            arity("professionals", values, 2)?;
            Ok(Command::InsertProfessional(NewProfessional {
                name: parse_text(&values[0])?,
                email: parse_text(&values[1])?,
                phone: optional(values, 2, parse_text_or_null)?,
                cancellation_window_hours: optional(values, 3, parse_i64_or_null)?,
            }))
        }
        "clients" => {
            arity("clients", values, 2)?;
            Ok(Command::InsertClient(NewClient {
                professional_id: parse_ulid(&values[0])?,
                name: parse_text(&values[1])?,
                email: optional(values, 2, parse_text_or_null)?,
                phone: optional(values, 3, parse_text_or_null)?,
            }))
        }
        "appointments" => {
            arity("appointments", values, 5)?;
            Ok(Command::InsertAppointment(NewAppointment {
                professional_id: parse_ulid(&values[0])?,
                client_id: parse_ulid(&values[1])?,
                date: parse_text(&values[2])?,
                start: parse_text(&values[3])?,
                duration_minutes: parse_i64(&values[4])?,
                price: optional(values, 5, parse_text_or_null)?,
                note: optional(values, 6, parse_text_or_null)?,
            }))
        }
        "recurring_rules" => {
            arity("recurring_rules", values, 5)?;
            Ok(Command::InsertRecurringRule(NewRecurringRule {
                professional_id: parse_ulid(&values[0])?,
                client_id: parse_ulid(&values[1])?,
                day_of_week: parse_i64(&values[2])?,
                start: parse_text(&values[3])?,
                duration_minutes: parse_i64(&values[4])?,
                price: optional(values, 5, parse_text_or_null)?,
                activation_date: optional(values, 6, parse_text_or_null)?,
            }))
        }
        "schedule" => parse_schedule_rows(&rows),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_schedule_rows(rows: &[Vec<Expr>]) -> Result<Command, SqlError> {
    let mut professional_id = None;
    let mut blocks = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        arity("schedule", row, 4)?;
        let row_err = |e: SqlError| SqlError::Parse(format!("row {i}: {e}"));
        let pid = parse_ulid(&row[0]).map_err(row_err)?;
        match professional_id {
            None => professional_id = Some(pid),
            Some(first) if first != pid => {
                return Err(SqlError::Parse(
                    "schedule rows must share one professional_id".into(),
                ));
            }
            Some(_) => {}
        }
        blocks.push(NewBlock {
            day_of_week: parse_i64(&row[1]).map_err(row_err)?,
            start: parse_text(&row[2]).map_err(row_err)?,
            end: parse_text(&row[3]).map_err(row_err)?,
        });
    }
    let professional_id = professional_id.ok_or(SqlError::Parse("empty VALUES".into()))?;
    Ok(Command::ReplaceSchedule {
        professional_id,
        blocks,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::from_selection(delete.selection.as_ref())?;

    match table.as_str() {
        "schedule" => Ok(Command::ClearSchedule {
            professional_id: filters.ulid("professional_id")?,
        }),
        "professionals" | "clients" | "appointments" | "recurring_rules" => {
            Err(SqlError::Unsupported(format!("DELETE FROM {table}")))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
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
    let filters = Filters::from_selection(select.selection.as_ref())?;

    match table.as_str() {
        "professionals" => Ok(Command::SelectProfessionals),
        "clients" => Ok(Command::SelectClients {
            professional_id: filters.ulid("professional_id")?,
        }),
        "appointments" => {
            let (from, to) = filters.date_bounds("date")?;
            Ok(Command::SelectAppointments {
                professional_id: filters.ulid("professional_id")?,
                from,
                to,
            })
        }
        "recurring_rules" => Ok(Command::SelectRecurringRules {
            professional_id: filters.ulid("professional_id")?,
        }),
        "schedule" => Ok(Command::SelectSchedule {
            professional_id: filters.ulid("professional_id")?,
        }),
        "availability" => Ok(Command::SelectAvailability {
            professional_id: filters.ulid("professional_id")?,
            date: parse_text(filters.eq("date")?)?,
            start: parse_text(filters.eq("start_time")?)?,
            duration_minutes: parse_i64(filters.eq("duration_minutes")?)?,
        }),
        "occurrences" => {
            let weeks = match filters.find("weeks", &BinaryOperator::Eq) {
                Some(expr) => Some(parse_u32(expr)?),
                None => None,
            };
            Ok(Command::SelectOccurrences {
                rule_id: filters.ulid("rule_id")?,
                weeks,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// The `column <op> value` terms of a WHERE clause made only of ANDs.
struct Filters<'a> {
    terms: Vec<(String, BinaryOperator, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn from_selection(selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut terms = Vec::new();
        if let Some(expr) = selection {
            collect_terms(expr, &mut terms)?;
        }
        Ok(Self { terms })
    }

    fn find(&self, column: &str, op: &BinaryOperator) -> Option<&'a Expr> {
        self.terms
            .iter()
            .find(|(c, o, _)| c == column && o == op)
            .map(|(_, _, e)| *e)
    }

    fn eq(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.find(column, &BinaryOperator::Eq)
            .ok_or(SqlError::MissingFilter(column))
    }

    fn ulid(&self, column: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid(self.eq(column)?)
    }

    /// `col = d` pins both ends; otherwise `>=`/`>` and `<=`/`<` set each side.
    fn date_bounds(&self, column: &str) -> Result<(Bound<String>, Bound<String>), SqlError> {
        let mut from = Bound::Unbounded;
        let mut to = Bound::Unbounded;
        for (c, op, expr) in &self.terms {
            if c != column {
                continue;
            }
            let text = parse_text(expr)?;
            match op {
                BinaryOperator::Eq => {
                    from = Bound::Included(text.clone());
                    to = Bound::Included(text);
                }
                BinaryOperator::GtEq => from = Bound::Included(text),
                BinaryOperator::Gt => from = Bound::Excluded(text),
                BinaryOperator::LtEq => to = Bound::Included(text),
                BinaryOperator::Lt => to = Bound::Excluded(text),
                other => {
                    return Err(SqlError::Unsupported(format!("{column} {other} filter")));
                }
            }
        }
        Ok((from, to))
    }
}

fn collect_terms<'a>(
    expr: &'a Expr,
    terms: &mut Vec<(String, BinaryOperator, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_terms(inner, terms),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_terms(left, terms)?;
            collect_terms(right, terms)
        }
        Expr::BinaryOp { left, op, right } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
            terms.push((column, op.clone(), right.as_ref()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn arity(table: &'static str, values: &[Expr], min: usize) -> Result<(), SqlError> {
    if values.len() < min {
        return Err(SqlError::WrongArity(table, min, values.len()));
    }
    Ok(())
}

/// Parse the trailing positional value at `index`, or `None` when it was omitted.
fn optional<T>(
    values: &[Expr],
    index: usize,
    parse: fn(&Expr) -> Result<Option<T>, SqlError>,
) -> Result<Option<T>, SqlError> {
    match values.get(index) {
        Some(expr) => parse(expr),
        None => Ok(None),
    }
}

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

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(&values.rows)
        }
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
    let text = parse_text(expr)?;
    Ulid::from_string(&text).map_err(|e| SqlError::Parse(format!("bad ULID {text:?}: {e}")))
}

/// A string or numeric literal, as written.
fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_text(expr).map(Some),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return parse_i64(expr).map(|v| -v);
    }
    let text = parse_text(expr)?;
    text.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad integer {text:?}: {e}")))
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_i64(expr).map(Some),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
