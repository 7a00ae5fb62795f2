use std::fmt::Debug;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
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
use pgwire::tokio::{TlsAcceptor, process_socket};
use tokio::net::TcpStream;
use tracing::debug;

use crate::clock::{format_minutes, parse_clock, parse_date};
use crate::engine::{Collision, EngineError, Outcome};
use crate::limits::MATERIALIZE_WEEKS;
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, Command};
use crate::tenant::{TenantEngine, TenantManager};

pub struct CadenceHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<CadenceQueryParser>,
}

impl CadenceHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(CadenceQueryParser),
        }
    }

    async fn resolve_engine<C: ClientInfo + Sync>(
        &self,
        client: &C,
    ) -> PgWireResult<Arc<TenantEngine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .await
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    /// Parse and execute one statement, recording query metrics.
    async fn run<C: ClientInfo + Sync>(&self, client: &C, query: &str) -> PgWireResult<Vec<Response>> {
        let engine = self.resolve_engine(client).await?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        debug!(command = label, "executing");

        let started = Instant::now();
        let result = self.execute_command(&engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        engine: &TenantEngine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertProfessional(new) => {
                let professional = engine.register_professional(new).await.map_err(engine_err)?;
                Ok(vec![rows(professional_schema(), [professional], encode_professional)])
            }
            Command::SelectProfessionals => {
                let all = engine.list_professionals().await.map_err(engine_err)?;
                Ok(vec![rows(professional_schema(), all, encode_professional)])
            }
            Command::InsertClient(new) => {
                let client = engine.register_client(new).await.map_err(engine_err)?;
                Ok(vec![rows(client_schema(), [client], encode_client)])
            }
            Command::SelectClients { professional_id } => {
                let clients = engine.list_clients(professional_id).await.map_err(engine_err)?;
                Ok(vec![rows(client_schema(), clients, encode_client)])
            }
            Command::InsertAppointment(new) => {
                let appointment = engine.create_appointment(new).await.map_err(engine_err)?;
                Ok(vec![rows(appointment_schema(), [appointment], encode_appointment)])
            }
            Command::SelectAppointments {
                professional_id,
                from,
                to,
            } => {
                let range = DateRange {
                    start: date_bound(from).map_err(engine_err)?,
                    end: date_bound(to).map_err(engine_err)?,
                };
                let appointments = engine
                    .list_appointments(professional_id, range)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![rows(appointment_schema(), appointments, encode_appointment)])
            }
            Command::InsertRecurringRule(new) => {
                // The projection's outcome is logged and counted by the engine.
                let created = engine.create_recurring_rule(new).await.map_err(engine_err)?;
                Ok(vec![rows(rule_schema(), [created.rule], encode_rule)])
            }
            Command::SelectRecurringRules { professional_id } => {
                let rules = engine
                    .list_recurring_rules(professional_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![rows(rule_schema(), rules, encode_rule)])
            }
            Command::ReplaceSchedule {
                professional_id,
                blocks,
            } => {
                let schedule = engine
                    .replace_schedule(professional_id, blocks)
                    .await
                    .map_err(engine_err)?;
                let encode = move |enc: &mut DataRowEncoder, block: AvailabilityBlock| {
                    encode_block(enc, professional_id, block)
                };
                Ok(vec![rows(schedule_schema(), schedule, encode)])
            }
            Command::ClearSchedule { professional_id } => {
                let before = engine
                    .list_schedule(professional_id)
                    .await
                    .map_err(engine_err)?;
                engine
                    .replace_schedule(professional_id, Vec::new())
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(before.len()))])
            }
            Command::SelectSchedule { professional_id } => {
                let schedule = engine
                    .list_schedule(professional_id)
                    .await
                    .map_err(engine_err)?;
                let encode = move |enc: &mut DataRowEncoder, block: AvailabilityBlock| {
                    encode_block(enc, professional_id, block)
                };
                Ok(vec![rows(schedule_schema(), schedule, encode)])
            }
            Command::SelectAvailability {
                professional_id,
                date,
                start,
                duration_minutes,
            } => {
                let day = parse_date(&date).map_err(|e| engine_err(e.into()))?;
                let conflict = match engine
                    .check_availability(professional_id, day, &start, duration_minutes)
                    .await
                {
                    Ok(()) => None,
                    Err(EngineError::Conflict(collision)) => Some(collision_text(&collision)),
                    Err(e) => return Err(engine_err(e)),
                };
                // Both values were validated by the check above.
                let clock = parse_clock(&start).map_err(|e| engine_err(e.into()))?;
                let end = format_minutes(clock.end(duration_minutes as u32));
                let row = AvailabilityRow {
                    professional_id,
                    date: day,
                    start: clock.to_string(),
                    end,
                    conflict,
                };
                Ok(vec![rows(availability_schema(), [row], encode_availability)])
            }
            Command::SelectOccurrences { rule_id, weeks } => {
                let report = engine
                    .materialize_rule(rule_id, weeks.unwrap_or(MATERIALIZE_WEEKS))
                    .await
                    .map_err(engine_err)?;
                let encode = move |enc: &mut DataRowEncoder, occ: crate::engine::Occurrence| {
                    encode_occurrence(enc, rule_id, occ)
                };
                Ok(vec![rows(occurrence_schema(), report.occurrences, encode)])
            }
        }
    }
}

fn date_bound(bound: Bound<String>) -> Result<Bound<chrono::NaiveDate>, EngineError> {
    Ok(match bound {
        Bound::Included(s) => Bound::Included(parse_date(&s)?),
        Bound::Excluded(s) => Bound::Excluded(parse_date(&s)?),
        Bound::Unbounded => Bound::Unbounded,
    })
}

fn collision_text(collision: &Collision) -> String {
    match collision {
        Collision::Overlap { window, .. } => window.to_string(),
        Collision::SlotTaken { start, .. } => start.to_string(),
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn rows<T>(
    schema: Vec<FieldInfo>,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn boolean(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn professional_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("name"),
        text("email"),
        text("phone"),
        int8("cancellation_window_hours"),
        int8("created_at"),
    ]
}

fn encode_professional(enc: &mut DataRowEncoder, p: Professional) -> PgWireResult<()> {
    enc.encode_field(&p.id.to_string())?;
    enc.encode_field(&p.name)?;
    enc.encode_field(&p.email)?;
    enc.encode_field(&p.phone)?;
    enc.encode_field(&(p.cancellation_window_hours as i64))?;
    enc.encode_field(&p.created_at)?;
    Ok(())
}

fn client_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("professional_id"),
        text("name"),
        text("email"),
        text("phone"),
        int8("created_at"),
    ]
}

fn encode_client(enc: &mut DataRowEncoder, c: Client) -> PgWireResult<()> {
    enc.encode_field(&c.id.to_string())?;
    enc.encode_field(&c.professional_id.to_string())?;
    enc.encode_field(&c.name)?;
    enc.encode_field(&c.email)?;
    enc.encode_field(&c.phone)?;
    enc.encode_field(&c.created_at)?;
    Ok(())
}

fn appointment_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("professional_id"),
        text("client_id"),
        text("date"),
        text("start_time"),
        text("end_time"),
        int8("duration_minutes"),
        text("status"),
        text("price"),
        text("note"),
        text("provenance"),
        text("rule_id"),
        int8("created_at"),
    ]
}

fn encode_appointment(enc: &mut DataRowEncoder, a: Appointment) -> PgWireResult<()> {
    let provenance = match a.provenance {
        Provenance::Manual => "manual",
        Provenance::Generated { .. } => "generated",
    };
    enc.encode_field(&a.id.to_string())?;
    enc.encode_field(&a.professional_id.to_string())?;
    enc.encode_field(&a.client_id.to_string())?;
    enc.encode_field(&a.date.to_string())?;
    enc.encode_field(&a.start.to_string())?;
    enc.encode_field(&format_minutes(a.window().end))?;
    enc.encode_field(&(a.duration_minutes as i64))?;
    enc.encode_field(&a.status.as_str().to_string())?;
    enc.encode_field(&a.price.map(|p| p.to_string()))?;
    enc.encode_field(&a.note)?;
    enc.encode_field(&provenance.to_string())?;
    enc.encode_field(&a.provenance.rule_id().map(|id| id.to_string()))?;
    enc.encode_field(&a.created_at)?;
    Ok(())
}

fn rule_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("professional_id"),
        text("client_id"),
        int8("day_of_week"),
        text("start_time"),
        int8("duration_minutes"),
        text("price"),
        text("activation_date"),
        boolean("active"),
        int8("created_at"),
    ]
}

fn encode_rule(enc: &mut DataRowEncoder, r: RecurringRule) -> PgWireResult<()> {
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.professional_id.to_string())?;
    enc.encode_field(&r.client_id.to_string())?;
    enc.encode_field(&(r.day_of_week as i64))?;
    enc.encode_field(&r.start.to_string())?;
    enc.encode_field(&(r.duration_minutes as i64))?;
    enc.encode_field(&r.price.map(|p| p.to_string()))?;
    enc.encode_field(&r.activation_date.map(|d| d.to_string()))?;
    enc.encode_field(&r.active)?;
    enc.encode_field(&r.created_at)?;
    Ok(())
}

fn schedule_schema() -> Vec<FieldInfo> {
    vec![
        text("professional_id"),
        int8("day_of_week"),
        text("start_time"),
        text("end_time"),
    ]
}

fn encode_block(
    enc: &mut DataRowEncoder,
    professional_id: ulid::Ulid,
    b: AvailabilityBlock,
) -> PgWireResult<()> {
    enc.encode_field(&professional_id.to_string())?;
    enc.encode_field(&(b.day_of_week as i64))?;
    enc.encode_field(&b.start.to_string())?;
    enc.encode_field(&b.end.to_string())?;
    Ok(())
}

struct AvailabilityRow {
    professional_id: ulid::Ulid,
    date: chrono::NaiveDate,
    start: String,
    end: String,
    conflict: Option<String>,
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text("professional_id"),
        text("date"),
        text("start_time"),
        text("end_time"),
        boolean("available"),
        text("conflict"),
    ]
}

fn encode_availability(enc: &mut DataRowEncoder, row: AvailabilityRow) -> PgWireResult<()> {
    enc.encode_field(&row.professional_id.to_string())?;
    enc.encode_field(&row.date.to_string())?;
    enc.encode_field(&row.start)?;
    enc.encode_field(&row.end)?;
    enc.encode_field(&row.conflict.is_none())?;
    enc.encode_field(&row.conflict)?;
    Ok(())
}

fn occurrence_schema() -> Vec<FieldInfo> {
    vec![
        text("rule_id"),
        text("date"),
        text("outcome"),
        text("appointment_id"),
        text("detail"),
    ]
}

fn encode_occurrence(
    enc: &mut DataRowEncoder,
    rule_id: ulid::Ulid,
    occ: crate::engine::Occurrence,
) -> PgWireResult<()> {
    let (appointment_id, detail) = match &occ.outcome {
        Outcome::Booked(a) => (Some(a.id.to_string()), None),
        Outcome::Skipped(skip) => (None, Some(skip.to_string())),
    };
    enc.encode_field(&rule_id.to_string())?;
    enc.encode_field(&occ.date.to_string())?;
    enc.encode_field(&occ.outcome.label().to_string())?;
    enc.encode_field(&appointment_id)?;
    enc.encode_field(&detail)?;
    Ok(())
}

/// Result columns for a statement, keyed on the table it names. Statements
/// that answer with a command tag have none.
fn schema_for(sql: &str) -> Vec<FieldInfo> {
    let mut tokens = sql
        .split(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | ',' | ';'))
        .filter(|t| !t.is_empty());
    let Some(first) = tokens.next() else {
        return vec![];
    };
    if first.eq_ignore_ascii_case("delete") {
        return vec![];
    }
    let table = tokens
        .skip_while(|t| !t.eq_ignore_ascii_case("from") && !t.eq_ignore_ascii_case("into"))
        .nth(1)
        .map(|t| t.trim_matches('"').to_ascii_lowercase());
    match table.as_deref() {
        Some("professionals") => professional_schema(),
        Some("clients") => client_schema(),
        Some("appointments") => appointment_schema(),
        Some("recurring_rules") => rule_schema(),
        Some("schedule") => schedule_schema(),
        Some("availability") => availability_schema(),
        Some("occurrences") => occurrence_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for CadenceHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(&*client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CadenceQueryParser;

#[async_trait]
impl QueryParser for CadenceQueryParser {
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
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for CadenceHandler {
    type Statement = String;
    type QueryParser = CadenceQueryParser;

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
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        let mut responses = self.run(&*client, &sql).await?;
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
            schema_for(&target.statement),
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
        Ok(DescribePortalResponse::new(schema_for(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
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
    }
    max
}

/// Inline bound parameters (text format) as quoted literals. One pass over
/// the SQL; inserted values are never scanned again, and `$N` past the
/// bound parameters is left as written.
fn substitute_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let bytes = sql.as_bytes();
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let dollar = i;
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let Ok(n) = sql[start..i].parse::<usize>() else {
            continue;
        };
        let Some(param) = n.checked_sub(1).and_then(|idx| params.get(idx)) else {
            continue;
        };
        result.push_str(&sql[copied..dollar]);
        match param {
            Some(value) => {
                let text = String::from_utf8_lossy(value.as_ref());
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        copied = i;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Auth ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct CadenceAuthSource {
    password: String,
}

impl CadenceAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for CadenceAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CadenceFactory {
    handler: Arc<CadenceHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<CadenceAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl CadenceFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(CadenceHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                CadenceAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CadenceFactory {
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
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = CadenceFactory::new(tenant_manager, password);
    process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidFormat(_) | EngineError::InvalidInput(_) => "22023",
        EngineError::Conflict(_) | EngineError::AlreadyExists(_) => "23505",
        EngineError::NotFound(..) => "23503",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Storage(_) => "58000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(schema: Vec<FieldInfo>) -> Vec<String> {
        schema.iter().map(|f| f.name().to_string()).collect()
    }

    #[test]
    fn count_params_takes_the_highest_index() {
        assert_eq!(count_params("SELECT * FROM professionals"), 0);
        assert_eq!(
            count_params("INSERT INTO clients VALUES ($1, $2, $3)"),
            3
        );
        assert_eq!(count_params("SELECT $2, $11, $1"), 11);
        assert_eq!(count_params("SELECT '$' || $"), 0);
    }

    #[test]
    fn substitute_quotes_and_escapes() {
        let params = vec![Some(b"O'Neil".to_vec()), None];
        assert_eq!(
            substitute_params("VALUES ($1, $2)", &params),
            "VALUES ('O''Neil', NULL)"
        );
    }

    #[test]
    fn substitute_handles_double_digit_placeholders() {
        let params: Vec<Option<Vec<u8>>> = (1..=10)
            .map(|i| Some(i.to_string().into_bytes()))
            .collect();
        assert_eq!(substitute_params("$1 $10", &params), "'1' '10'");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let params = vec![Some("01ARZ"), Some("pay $1 deposit")];
        assert_eq!(
            substitute_params("INSERT INTO appointments VALUES ($1, $2)", &params),
            "INSERT INTO appointments VALUES ('01ARZ', 'pay $1 deposit')"
        );
        // Unbound or malformed placeholders pass through.
        assert_eq!(substitute_params("$0 $3 $", &params), "$0 $3 $");
    }

    #[test]
    fn schema_follows_the_named_table() {
        assert_eq!(
            names(schema_for("SELECT * FROM availability WHERE date = $1")),
            ["professional_id", "date", "start_time", "end_time", "available", "conflict"]
        );
        assert_eq!(
            names(schema_for("insert into clients values ($1, $2)")).len(),
            6
        );
        assert_eq!(
            names(schema_for("SELECT * FROM \"occurrences\" WHERE rule_id = $1"))[2],
            "outcome"
        );
        assert!(schema_for("DELETE FROM schedule WHERE professional_id = $1").is_empty());
        assert!(schema_for("SELECT * FROM nowhere").is_empty());
        assert!(schema_for("").is_empty());
    }

    #[test]
    fn sqlstates_by_error_kind() {
        assert_eq!(sqlstate(&EngineError::InvalidFormat("x".into())), "22023");
        assert_eq!(sqlstate(&EngineError::InvalidInput("x".into())), "22023");
        assert_eq!(sqlstate(&EngineError::AlreadyExists("email")), "23505");
        assert_eq!(
            sqlstate(&EngineError::NotFound("clients", ulid::Ulid::new())),
            "23503"
        );
        assert_eq!(sqlstate(&EngineError::LimitExceeded("x")), "54000");
        assert_eq!(sqlstate(&EngineError::Storage("x".into())), "58000");
    }

    #[test]
    fn open_bounds_survive_date_conversion() {
        assert_eq!(date_bound(Bound::Unbounded).unwrap(), Bound::Unbounded);
        assert_eq!(
            date_bound(Bound::Excluded("2030-02-01".into())).unwrap(),
            Bound::Excluded(chrono::NaiveDate::from_ymd_opt(2030, 2, 1).unwrap())
        );
        assert!(matches!(
            date_bound(Bound::Included("2030-13-01".into())),
            Err(EngineError::InvalidFormat(_))
        ));
    }
}
