use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::lifecycle::{ComplaintStatus, Lifecycle, PaymentStatus, RefundStatus, ReservationStatus};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    RegisterResource {
        id: Ulid,
        kind: ResourceKind,
        capacity: u32,
        name: Option<String>,
    },
    UpdateResource {
        id: Ulid,
        capacity: u32,
        name: Option<String>,
    },
    Reserve {
        id: Ulid,
        resource_id: Ulid,
        start: Ms,
        end: Ms,
        quantity: u32,
        customer_ref: String,
        amount: u64,
    },
    Transition {
        reservation_id: Ulid,
        status: ReservationStatus,
        reason: Option<String>,
    },
    BulkTransition {
        reservation_ids: Vec<Ulid>,
        status: ReservationStatus,
        reason: Option<String>,
    },
    UpdatePayment {
        reservation_id: Ulid,
        status: PaymentStatus,
    },
    RequestRefund {
        id: Ulid,
        reservation_id: Ulid,
        amount: u64,
    },
    TransitionRefund {
        refund_id: Ulid,
        status: RefundStatus,
        amount: Option<u64>,
        reference: Option<String>,
        notes: Option<String>,
    },
    OpenComplaint {
        id: Ulid,
        subject_ref: String,
        priority: Priority,
        detail: Option<String>,
    },
    TransitionComplaint {
        complaint_id: Ulid,
        status: ComplaintStatus,
        detail: Option<String>,
    },
    AssignComplaint {
        complaint_id: Ulid,
        assignee: String,
    },
    SelectResources,
    SelectAvailability {
        resource_id: Ulid,
        start: Ms,
        end: Ms,
    },
    SelectReservation {
        id: Ulid,
    },
    SelectReservationByCode {
        code: String,
    },
    SelectReservations {
        resource_id: Ulid,
    },
    SelectOverdue,
    SelectRefund {
        id: Ulid,
    },
    SelectRefundForReservation {
        reservation_id: Ulid,
    },
    SelectComplaint {
        id: Ulid,
    },
}

/// Writable tables and their positional column order, used when an INSERT
/// omits its column list.
const INSERT_TABLES: &[(&str, &[&str])] = &[
    ("resources", &["id", "kind", "capacity", "name"]),
    ("resource_updates", &["id", "capacity", "name"]),
    ("reservations", &["id", "resource_id", "start", "end", "quantity", "customer_ref", "amount"]),
    ("reservation_transitions", &["reservation_id", "status", "reason"]),
    ("payments", &["reservation_id", "status"]),
    ("refunds", &["id", "reservation_id", "amount"]),
    ("refund_transitions", &["refund_id", "status", "amount", "reference", "notes"]),
    ("complaints", &["id", "subject_ref", "priority", "detail"]),
    ("complaint_transitions", &["complaint_id", "status", "detail"]),
    ("complaint_assignments", &["complaint_id", "assignee"]),
];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// One VALUES row with each expression bound to its column name.
struct Row<'a> {
    table: &'static str,
    values: Vec<(&'static str, &'a Expr)>,
}

impl<'a> Row<'a> {
    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.values
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, expr)| *expr)
            .filter(|expr| !is_null(expr))
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column)
            .ok_or(SqlError::MissingColumn(self.table, column))
    }
}

fn bind_rows(insert: &ast::Insert) -> Result<Vec<Row<'_>>, SqlError> {
    let table = insert_table_name(insert)?;
    let (table, defaults) = INSERT_TABLES
        .iter()
        .find(|(name, _)| *name == table)
        .copied()
        .ok_or(SqlError::UnknownTable(table))?;

    let columns: Vec<&'static str> = if insert.columns.is_empty() {
        defaults.to_vec()
    } else {
        insert
            .columns
            .iter()
            .map(|ident| {
                let name = ident.value.to_lowercase();
                defaults
                    .iter()
                    .find(|c| **c == name)
                    .copied()
                    .ok_or(SqlError::UnknownColumn(table, name))
            })
            .collect::<Result<_, _>>()?
    };

    extract_all_insert_rows(insert)?
        .iter()
        .map(|row| {
            if row.len() != columns.len() {
                return Err(SqlError::WrongArity(table, columns.len(), row.len()));
            }
            Ok(Row {
                table,
                values: columns.iter().copied().zip(row.iter()).collect(),
            })
        })
        .collect()
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let rows = bind_rows(insert)?;
    let first = &rows[0];
    if rows.len() > 1 && first.table != "reservation_transitions" {
        return Err(SqlError::Unsupported(format!("multi-row INSERT into {}", first.table)));
    }

    match first.table {
        "resources" => {
            let kind_label = parse_string(first.required("kind")?)?;
            Ok(Command::RegisterResource {
                id: parse_ulid(first.required("id")?)?,
                kind: ResourceKind::from_label(&kind_label)
                    .ok_or(SqlError::UnknownValue("kind", kind_label))?,
                capacity: first.get("capacity").map(parse_u32).transpose()?.unwrap_or(1),
                name: first.get("name").map(parse_string).transpose()?,
            })
        }
        "resource_updates" => Ok(Command::UpdateResource {
            id: parse_ulid(first.required("id")?)?,
            capacity: parse_u32(first.required("capacity")?)?,
            name: first.get("name").map(parse_string).transpose()?,
        }),
        "reservations" => Ok(Command::Reserve {
            id: parse_ulid(first.required("id")?)?,
            resource_id: parse_ulid(first.required("resource_id")?)?,
            start: parse_i64(first.required("start")?)?,
            end: parse_i64(first.required("end")?)?,
            quantity: first.get("quantity").map(parse_u32).transpose()?.unwrap_or(1),
            customer_ref: parse_string(first.required("customer_ref")?)?,
            amount: first.get("amount").map(parse_u64).transpose()?.unwrap_or(0),
        }),
        "reservation_transitions" => parse_reservation_transitions(&rows),
        "payments" => Ok(Command::UpdatePayment {
            reservation_id: parse_ulid(first.required("reservation_id")?)?,
            status: parse_status(first.required("status")?)?,
        }),
        "refunds" => Ok(Command::RequestRefund {
            id: parse_ulid(first.required("id")?)?,
            reservation_id: parse_ulid(first.required("reservation_id")?)?,
            amount: parse_u64(first.required("amount")?)?,
        }),
        "refund_transitions" => Ok(Command::TransitionRefund {
            refund_id: parse_ulid(first.required("refund_id")?)?,
            status: parse_status(first.required("status")?)?,
            amount: first.get("amount").map(parse_u64).transpose()?,
            reference: first.get("reference").map(parse_string).transpose()?,
            notes: first.get("notes").map(parse_string).transpose()?,
        }),
        "complaints" => {
            let priority = match first.get("priority") {
                Some(expr) => {
                    let label = parse_string(expr)?;
                    Priority::from_label(&label).ok_or(SqlError::UnknownValue("priority", label))?
                }
                None => Priority::Medium,
            };
            Ok(Command::OpenComplaint {
                id: parse_ulid(first.required("id")?)?,
                subject_ref: parse_string(first.required("subject_ref")?)?,
                priority,
                detail: first.get("detail").map(parse_string).transpose()?,
            })
        }
        "complaint_transitions" => Ok(Command::TransitionComplaint {
            complaint_id: parse_ulid(first.required("complaint_id")?)?,
            status: parse_status(first.required("status")?)?,
            detail: first.get("detail").map(parse_string).transpose()?,
        }),
        "complaint_assignments" => Ok(Command::AssignComplaint {
            complaint_id: parse_ulid(first.required("complaint_id")?)?,
            assignee: parse_string(first.required("assignee")?)?,
        }),
        other => Err(SqlError::UnknownTable(other.to_string())),
    }
}

/// A single row is a transition; several rows are a bulk transition and must
/// agree on status and reason.
fn parse_reservation_transitions(rows: &[Row<'_>]) -> Result<Command, SqlError> {
    let mut parsed = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let at_row = |e: SqlError| SqlError::Parse(format!("row {i}: {e}"));
        let id = parse_ulid(row.required("reservation_id")?).map_err(at_row)?;
        let status: ReservationStatus = parse_status(row.required("status")?).map_err(at_row)?;
        let reason = row.get("reason").map(parse_string).transpose().map_err(at_row)?;
        parsed.push((id, status, reason));
    }

    let mut iter = parsed.into_iter();
    let Some((first_id, status, reason)) = iter.next() else {
        return Err(SqlError::Parse("empty VALUES".into()));
    };
    let rest: Vec<_> = iter.collect();
    if rest.is_empty() {
        return Ok(Command::Transition {
            reservation_id: first_id,
            status,
            reason,
        });
    }

    let mut reservation_ids = vec![first_id];
    for (id, row_status, row_reason) in rest {
        if row_status != status || row_reason != reason {
            return Err(SqlError::Parse(
                "bulk transition rows must share status and reason".into(),
            ));
        }
        reservation_ids.push(id);
    }
    Ok(Command::BulkTransition {
        reservation_ids,
        status,
        reason,
    })
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

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "resources" => Ok(Command::SelectResources),
        "availability" => Ok(Command::SelectAvailability {
            resource_id: parse_ulid(filters.eq("resource_id")?)?,
            start: parse_i64(filters.start.ok_or(SqlError::MissingFilter("start"))?)?,
            end: parse_i64(filters.end.ok_or(SqlError::MissingFilter("end"))?)?,
        }),
        "reservations" => {
            if let Some(id) = filters.find("id") {
                Ok(Command::SelectReservation { id: parse_ulid(id)? })
            } else if let Some(code) = filters.find("code") {
                Ok(Command::SelectReservationByCode { code: parse_string(code)? })
            } else {
                Ok(Command::SelectReservations {
                    resource_id: parse_ulid(filters.eq("resource_id")?)?,
                })
            }
        }
        "overdue" => Ok(Command::SelectOverdue),
        "refunds" => {
            if let Some(id) = filters.find("id") {
                Ok(Command::SelectRefund { id: parse_ulid(id)? })
            } else {
                Ok(Command::SelectRefundForReservation {
                    reservation_id: parse_ulid(filters.eq("reservation_id")?)?,
                })
            }
        }
        "complaints" => Ok(Command::SelectComplaint {
            id: parse_ulid(filters.eq("id")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// WHERE clause conjuncts the front end understands: `col = value`,
/// `start >= value` and `"end" <= value`.
#[derive(Default)]
struct Filters<'a> {
    equalities: Vec<(String, &'a Expr)>,
    start: Option<&'a Expr>,
    end: Option<&'a Expr>,
}

impl<'a> Filters<'a> {
    fn find(&self, column: &str) -> Option<&'a Expr> {
        self.equalities
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, expr)| *expr)
    }

    fn eq(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.find(column).ok_or(SqlError::MissingFilter(column))
    }
}

fn extract_filters<'a>(expr: &'a Expr, filters: &mut Filters<'a>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => extract_filters(inner, filters)?,
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                extract_filters(left, filters)?;
                extract_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => {
                if let Some(col) = expr_column_name(left) {
                    filters.equalities.push((col, &**right));
                }
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("start") {
                    filters.start = Some(&**right);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("end") {
                    filters.end = Some(&**right);
                }
            }
            _ => {}
        },
        _ => {}
    }
    Ok(())
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

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
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
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_u64(expr: &Expr) -> Result<u64, SqlError> {
    let v = parse_i64(expr)?;
    u64::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u64 range")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_status<S: Lifecycle>(expr: &Expr) -> Result<S, SqlError> {
    let label = parse_string(expr)?;
    S::from_label(&label).ok_or(SqlError::UnknownValue(S::ENTITY, label))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    /// A status, kind or priority label that names nothing.
    UnknownValue(&'static str, String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::UnknownValue(what, v) => write!(f, "unknown {what} value: {v}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing value for {c}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
