use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::engine::{BulkReport, Engine, EngineError};
use crate::lifecycle::{Lifecycle, RefundStatus};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};

pub struct ReservdHandler {
    engine: Arc<Engine>,
    query_parser: Arc<ReservdQueryParser>,
}

impl ReservdHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(ReservdQueryParser),
        }
    }

    /// Timed, counted execution of one parsed command.
    async fn execute<C: ClientInfo>(&self, client: &C, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let actor = client.metadata().get("user").cloned();
        let started = Instant::now();
        let result = self.execute_command(cmd, actor).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command, actor: Option<String>) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::RegisterResource { id, kind, capacity, name } => {
                engine
                    .register_resource(id, kind, capacity, name)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateResource { id, capacity, name } => {
                engine
                    .update_resource(id, capacity, name)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::Reserve {
                id,
                resource_id,
                start,
                end,
                quantity,
                customer_ref,
                amount,
            } => {
                if start >= end {
                    return Err(engine_err(EngineError::InvalidWindow { start, end }));
                }
                let reservation = engine
                    .reserve(
                        id,
                        resource_id,
                        Span::new(start, end),
                        quantity,
                        CustomerInfo::new(customer_ref, amount),
                        actor,
                    )
                    .await
                    .map_err(engine_err)?;
                self.reservation_response(reservation.id).await
            }
            Command::Transition {
                reservation_id,
                status,
                reason,
            } => {
                engine
                    .transition_reservation(reservation_id, status, reason, actor)
                    .await
                    .map_err(engine_err)?;
                self.reservation_response(reservation_id).await
            }
            Command::BulkTransition {
                reservation_ids,
                status,
                reason,
            } => {
                let report = engine
                    .bulk_transition(&reservation_ids, status, reason, actor)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![bulk_response(&report)?])
            }
            Command::UpdatePayment { reservation_id, status } => {
                engine
                    .update_payment(reservation_id, status, actor)
                    .await
                    .map_err(engine_err)?;
                self.reservation_response(reservation_id).await
            }
            Command::RequestRefund { id, reservation_id, amount } => {
                let refund = engine
                    .request_refund(id, reservation_id, amount, actor)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![refund_response(&[refund])?])
            }
            Command::TransitionRefund {
                refund_id,
                status,
                amount,
                reference,
                notes,
            } => {
                let refund = match status {
                    RefundStatus::Approved => {
                        let amount = match amount {
                            Some(amount) => amount,
                            None => engine.refund(refund_id).await.map_err(engine_err)?.requested_amount,
                        };
                        engine.approve_refund(refund_id, amount, notes, actor).await
                    }
                    RefundStatus::Rejected => engine.reject_refund(refund_id, notes, actor).await,
                    RefundStatus::Completed => match reference {
                        Some(reference) => engine.complete_refund(refund_id, reference, actor).await,
                        None => Err(EngineError::TransactionRefRequired),
                    },
                    // Nothing leads back to requested; report it against the current status.
                    RefundStatus::Requested => match engine.refund(refund_id).await {
                        Ok(refund) => refund
                            .status
                            .check_transition(RefundStatus::Requested)
                            .map(|()| refund),
                        Err(e) => Err(e),
                    },
                }
                .map_err(engine_err)?;
                Ok(vec![refund_response(&[refund])?])
            }
            Command::OpenComplaint {
                id,
                subject_ref,
                priority,
                detail,
            } => {
                let complaint = engine
                    .open_complaint(id, subject_ref, priority, detail, actor)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![complaint_response(&complaint)?])
            }
            Command::TransitionComplaint {
                complaint_id,
                status,
                detail,
            } => {
                let complaint = engine
                    .transition_complaint(complaint_id, status, detail, actor)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![complaint_response(&complaint)?])
            }
            Command::AssignComplaint { complaint_id, assignee } => {
                let complaint = engine
                    .assign_complaint(complaint_id, assignee, actor)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![complaint_response(&complaint)?])
            }
            Command::SelectResources => {
                let resources = engine.list_resources().await;
                Ok(vec![resources_response(&resources)?])
            }
            Command::SelectAvailability { resource_id, start, end } => {
                if start >= end {
                    return Err(engine_err(EngineError::InvalidWindow { start, end }));
                }
                let windows = engine
                    .availability(resource_id, Span::new(start, end))
                    .await
                    .map_err(engine_err)?;
                Ok(vec![availability_response(resource_id, &windows)?])
            }
            Command::SelectReservation { id } => self.reservation_response(id).await,
            Command::SelectReservationByCode { code } => {
                let info = engine.reservation_by_code(&code).await.map_err(engine_err)?;
                Ok(vec![reservations_response(&[info])?])
            }
            Command::SelectReservations { resource_id } => {
                let infos = engine
                    .reservations_for_resource(resource_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![reservations_response(&infos)?])
            }
            Command::SelectOverdue => {
                let infos = engine.overdue_reservations(crate::engine::now_ms()).await;
                Ok(vec![reservations_response(&infos)?])
            }
            Command::SelectRefund { id } => {
                let refund = engine.refund(id).await.map_err(engine_err)?;
                Ok(vec![refund_response(&[refund])?])
            }
            Command::SelectRefundForReservation { reservation_id } => {
                let refund = engine
                    .refund_for_reservation(reservation_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![refund_response(&[refund])?])
            }
            Command::SelectComplaint { id } => {
                let complaint = engine.complaint(id).await.map_err(engine_err)?;
                Ok(vec![complaint_response(&complaint)?])
            }
        }
    }

    async fn reservation_response(&self, id: ulid::Ulid) -> PgWireResult<Vec<Response>> {
        let info = self.engine.reservation(id).await.map_err(engine_err)?;
        Ok(vec![reservations_response(&[info])?])
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn resource_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("kind", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("capacity", Type::INT8),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("resource_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("free_quantity", Type::INT8),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("code", Type::VARCHAR),
        field("resource_id", Type::VARCHAR),
        field("kind", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("quantity", Type::INT8),
        field("status", Type::VARCHAR),
        field("payment_status", Type::VARCHAR),
        field("customer_ref", Type::VARCHAR),
        field("amount", Type::INT8),
        field("overdue", Type::BOOL),
        field("created_at", Type::INT8),
        field("timeline", Type::VARCHAR),
    ]
}

fn bulk_schema() -> Vec<FieldInfo> {
    vec![
        field("reservation_id", Type::VARCHAR),
        field("outcome", Type::VARCHAR),
        field("error", Type::VARCHAR),
    ]
}

fn refund_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("reservation_id", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("requested_amount", Type::INT8),
        field("approved_amount", Type::INT8),
        field("transaction_ref", Type::VARCHAR),
        field("admin_notes", Type::VARCHAR),
        field("created_at", Type::INT8),
        field("timeline", Type::VARCHAR),
    ]
}

fn complaint_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("subject_ref", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("priority", Type::VARCHAR),
        field("assigned_to", Type::VARCHAR),
        field("created_at", Type::INT8),
        field("timeline", Type::VARCHAR),
    ]
}

/// Result columns for a statement, judged from its target table. Used by
/// Describe before parameters are bound.
fn schema_for_sql(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let Some(table) = target_table(&lower) else {
        return vec![];
    };
    match table {
        "resources" if lower.trim_start().starts_with("select") => resource_schema(),
        "availability" => availability_schema(),
        "reservation_transitions" if values_rows(&lower) > 1 => bulk_schema(),
        "reservations" | "reservation_transitions" | "payments" | "overdue" => reservation_schema(),
        "refunds" | "refund_transitions" => refund_schema(),
        "complaints" | "complaint_transitions" | "complaint_assignments" => complaint_schema(),
        _ => vec![],
    }
}

/// The identifier following the first INTO or FROM.
fn target_table(lower: &str) -> Option<&str> {
    let mut words = lower.split_whitespace();
    while let Some(word) = words.next() {
        if word == "into" || word == "from" {
            return words
                .next()
                .map(|t| t.split('(').next().unwrap_or(t).trim_matches(|c| c == '"' || c == ';'));
        }
    }
    None
}

/// Number of parenthesised rows after VALUES.
fn values_rows(lower: &str) -> usize {
    lower
        .split_once("values")
        .map(|(_, rest)| {
            let mut depth = 0usize;
            let mut rows = 0usize;
            let mut in_string = false;
            for c in rest.chars() {
                match c {
                    '\'' => in_string = !in_string,
                    '(' if !in_string => {
                        if depth == 0 {
                            rows += 1;
                        }
                        depth += 1;
                    }
                    ')' if !in_string => depth = depth.saturating_sub(1),
                    _ => {}
                }
            }
            rows
        })
        .unwrap_or(0)
}

// ── Row encoding ─────────────────────────────────────────────────

fn timeline_json(timeline: &[TimelineEntry]) -> PgWireResult<String> {
    serde_json::to_string(timeline).map_err(|e| PgWireError::ApiError(Box::new(e)))
}

fn resources_response(resources: &[ResourceInfo]) -> PgWireResult<Response> {
    let schema = Arc::new(resource_schema());
    let rows: Vec<PgWireResult<_>> = resources
        .iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.kind.label())?;
            encoder.encode_field(&r.name)?;
            encoder.encode_field(&i64::from(r.capacity))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn availability_response(resource_id: ulid::Ulid, windows: &[FreeWindow]) -> PgWireResult<Response> {
    let schema = Arc::new(availability_schema());
    let rid_str = resource_id.to_string();
    let rows: Vec<PgWireResult<_>> = windows
        .iter()
        .map(|w| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&rid_str)?;
            encoder.encode_field(&w.span.start)?;
            encoder.encode_field(&w.span.end)?;
            encoder.encode_field(&i64::from(w.free))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn reservations_response(infos: &[ReservationInfo]) -> PgWireResult<Response> {
    let schema = Arc::new(reservation_schema());
    let rows: Vec<PgWireResult<_>> = infos
        .iter()
        .map(|info| {
            let r = &info.reservation;
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.code)?;
            encoder.encode_field(&r.resource_id.to_string())?;
            encoder.encode_field(&info.kind.label())?;
            encoder.encode_field(&r.window.start)?;
            encoder.encode_field(&r.window.end)?;
            encoder.encode_field(&i64::from(r.quantity))?;
            encoder.encode_field(&r.status.to_string())?;
            encoder.encode_field(&r.payment_status.to_string())?;
            encoder.encode_field(&r.customer_ref)?;
            encoder.encode_field(&amount_i64(r.amount))?;
            encoder.encode_field(&info.overdue)?;
            encoder.encode_field(&r.created_at)?;
            encoder.encode_field(&timeline_json(&r.timeline)?)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn bulk_response(report: &BulkReport) -> PgWireResult<Response> {
    let schema = Arc::new(bulk_schema());
    let mut rows: Vec<PgWireResult<_>> = Vec::with_capacity(report.total());
    for id in &report.succeeded {
        let mut encoder = DataRowEncoder::new(schema.clone());
        encoder.encode_field(&id.to_string())?;
        encoder.encode_field(&"ok")?;
        encoder.encode_field(&None::<String>)?;
        rows.push(Ok(encoder.take_row()));
    }
    for failure in &report.failed {
        let mut encoder = DataRowEncoder::new(schema.clone());
        encoder.encode_field(&failure.id.to_string())?;
        encoder.encode_field(&failure.error.code())?;
        encoder.encode_field(&Some(failure.error.to_string()))?;
        rows.push(Ok(encoder.take_row()));
    }
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn refund_response(refunds: &[RefundRequest]) -> PgWireResult<Response> {
    let schema = Arc::new(refund_schema());
    let rows: Vec<PgWireResult<_>> = refunds
        .iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.reservation_id.to_string())?;
            encoder.encode_field(&r.status.to_string())?;
            encoder.encode_field(&amount_i64(r.requested_amount))?;
            encoder.encode_field(&r.approved_amount.map(amount_i64))?;
            encoder.encode_field(&r.transaction_ref)?;
            encoder.encode_field(&r.admin_notes)?;
            encoder.encode_field(&r.created_at)?;
            encoder.encode_field(&timeline_json(&r.timeline)?)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn complaint_response(complaint: &Complaint) -> PgWireResult<Response> {
    let schema = Arc::new(complaint_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&complaint.id.to_string())?;
    encoder.encode_field(&complaint.subject_ref)?;
    encoder.encode_field(&complaint.status.to_string())?;
    encoder.encode_field(&complaint.priority.label())?;
    encoder.encode_field(&complaint.assigned_to)?;
    encoder.encode_field(&complaint.created_at)?;
    encoder.encode_field(&timeline_json(&complaint.timeline)?)?;
    let rows: Vec<PgWireResult<_>> = vec![Ok(encoder.take_row())];
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn amount_i64(amount: u64) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}

// ── Simple Query Protocol ────────────────────────────────────────

#[async_trait]
impl SimpleQueryHandler for ReservdHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute(&*client, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ReservdQueryParser;

#[async_trait]
impl QueryParser for ReservdQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for_sql(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ReservdHandler {
    type Statement = String;
    type QueryParser = ReservdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute(&*client, cmd).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for_sql(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for_sql(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute(&portal.statement.statement, &params)
}

/// One left-to-right pass over the statement text. Bound values are emitted as
/// quoted literals and never scanned again. Placeholders inside string
/// literals, and indexes with no bound value, are left as written.
fn substitute(sql: &str, params: &[Option<String>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut in_string = false;
    let mut chars = sql.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            in_string = !in_string;
            result.push(c);
            continue;
        }
        if c != '$' || in_string {
            result.push(c);
            continue;
        }
        let digits_start = i + 1;
        let mut digits_end = digits_start;
        while let Some(&(j, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            digits_end = j + 1;
            chars.next();
        }
        let param = sql[digits_start..digits_end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| params.get(idx));
        match param {
            Some(Some(text)) => {
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            Some(None) => result.push_str("NULL"),
            None => result.push_str(&sql[i..digits_end]),
        }
    }
    result
}

// ── Auth ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ReservdAuthSource {
    password: String,
}

impl ReservdAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for ReservdAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ReservdFactory {
    handler: Arc<ReservdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<ReservdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ReservdFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = ReservdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ReservdHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ReservdFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(ReservdFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE for each engine error kind.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) | EngineError::CodeNotFound(_) => "P0002",
        EngineError::AlreadyExists(_) | EngineError::RefundExists(_) => "23505",
        EngineError::InvalidWindow { .. }
        | EngineError::InvalidQuantity { .. }
        | EngineError::InvalidCapacity(_)
        | EngineError::InvalidAmount(_)
        | EngineError::AmountExceeded { .. } => "22023",
        EngineError::ResourceUnavailable { .. } => "23P01",
        EngineError::InvalidTransition { .. } | EngineError::NotRefundable(_) => "55000",
        EngineError::ReasonRequired | EngineError::TransactionRefRequired => "23502",
        EngineError::CapacityBelowUsage { .. } => "23514",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
