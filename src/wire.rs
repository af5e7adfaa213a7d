use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::SecondsFormat;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
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
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::BookdAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};

pub struct BookdHandler {
    engine: Arc<Engine>,
    query_parser: Arc<BookdQueryParser>,
}

impl BookdHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(BookdQueryParser),
        }
    }

    async fn run(&self, query: &str) -> PgWireResult<Response> {
        let cmd = match sql::parse_sql(query) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(QUERIES_TOTAL, "command" => "invalid", "status" => "error")
                    .increment(1);
                return Err(sql_err(e));
            }
        };
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::SelectAvailability {
                starts,
                ends,
                exclude_id,
            } => {
                let decision = engine.check_availability(starts, ends, exclude_id).await;
                let schema = Arc::new(availability_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&decision.is_available)?;
                encode_window(&mut encoder, &decision.window)?;
                encoder.encode_field(&problems_json(&decision.errors))?;
                Ok(single_row(schema, encoder.take_row()))
            }
            Command::PlaceReservation {
                id,
                user_identification,
                starts,
                ends,
            } => {
                let placement = engine
                    .place_reservation(PlacementRequest {
                        user_identification,
                        starts,
                        ends,
                        reservation_id: id,
                    })
                    .await;
                let schema = Arc::new(placement_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&placement.id.map(|id| id.to_string()))?;
                encode_window(&mut encoder, &placement.window)?;
                encoder.encode_field(&problems_json(&placement.errors))?;
                Ok(single_row(schema, encoder.take_row()))
            }
            Command::CancelReservation { id } => {
                let rows = match engine.cancel_reservation(id).await.map_err(engine_err)? {
                    Cancellation::Cancelled => 1,
                    Cancellation::AlreadyCancelled => 0,
                };
                Ok(Response::Execution(Tag::new("DELETE").with_rows(rows)))
            }
            Command::SelectReservation { id } => {
                let found = engine.get_reservation(id).await.map_err(engine_err)?;
                reservation_rows(found.into_iter().collect())
            }
            Command::SelectReservationsBetween {
                starts,
                ends,
                active,
            } => {
                let mut found = engine
                    .reservations_between(starts, ends, active)
                    .await
                    .map_err(engine_err)?;
                found.sort_by_key(|r| (r.starts, r.id));
                reservation_rows(found)
            }
            Command::SelectConfiguration => {
                let policy = engine.configuration().await.map_err(engine_err)?;
                let schema = Arc::new(configuration_schema());
                let rows: Vec<PgWireResult<DataRow>> = policy
                    .into_iter()
                    .map(|p| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&p.day_window_start.format("%H:%M:%S").to_string())?;
                        encoder.encode_field(&p.day_window_end.format("%H:%M:%S").to_string())?;
                        encoder.encode_field(&p.max_stay_days)?;
                        encoder.encode_field(&p.max_advance_days)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
        }
    }
}

// ── Result rows ──────────────────────────────────────────────────

fn format_instant(t: &Timestamp) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn encode_window(encoder: &mut DataRowEncoder, window: &Window) -> PgWireResult<()> {
    encoder.encode_field(&format_instant(&window.starts))?;
    encoder.encode_field(&format_instant(&window.ends))
}

/// `[{"kind": ..., "message": ...}, ...]` in detection order.
fn problems_json(problems: &[Problem]) -> String {
    let list: Vec<serde_json::Value> = problems
        .iter()
        .map(|p| serde_json::json!({ "kind": p.kind(), "message": p.to_string() }))
        .collect();
    serde_json::Value::Array(list).to_string()
}

fn single_row(schema: Arc<Vec<FieldInfo>>, row: DataRow) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(vec![Ok(row)])))
}

fn reservation_rows(reservations: Vec<Reservation>) -> PgWireResult<Response> {
    let schema = Arc::new(reservation_schema());
    let rows: Vec<PgWireResult<DataRow>> = reservations
        .into_iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.user_identification)?;
            encoder.encode_field(&format_instant(&r.starts))?;
            encoder.encode_field(&format_instant(&r.ends))?;
            encoder.encode_field(&r.active)?;
            encoder.encode_field(&format_instant(&r.created_at))?;
            encoder.encode_field(&format_instant(&r.modified_at))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("is_available", Type::BOOL),
        field("starts", Type::VARCHAR),
        field("ends", Type::VARCHAR),
        field("errors", Type::VARCHAR),
    ]
}

fn placement_schema() -> Vec<FieldInfo> {
    vec![
        field("reservation_id", Type::VARCHAR),
        field("starts", Type::VARCHAR),
        field("ends", Type::VARCHAR),
        field("errors", Type::VARCHAR),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("user_identification", Type::VARCHAR),
        field("starts", Type::VARCHAR),
        field("ends", Type::VARCHAR),
        field("active", Type::BOOL),
        field("created_at", Type::VARCHAR),
        field("modified_at", Type::VARCHAR),
    ]
}

fn configuration_schema() -> Vec<FieldInfo> {
    vec![
        field("day_window_start", Type::VARCHAR),
        field("day_window_end", Type::VARCHAR),
        field("max_stay_days", Type::INT8),
        field("max_advance_days", Type::INT8),
    ]
}

/// Which result columns a statement produces, judged from its text so that
/// unbound statements can be described.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultShape {
    Availability,
    Placement,
    Reservation,
    Configuration,
    Empty,
}

impl ResultShape {
    fn of(sql: &str) -> Self {
        let normalized = sql.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
        if normalized.starts_with("INSERT INTO RESERVATIONS") {
            ResultShape::Placement
        } else if !normalized.starts_with("SELECT") {
            ResultShape::Empty
        } else if normalized.contains("FROM AVAILABILITY") {
            ResultShape::Availability
        } else if normalized.contains("FROM RESERVATIONS") {
            ResultShape::Reservation
        } else if normalized.contains("FROM CONFIGURATION") {
            ResultShape::Configuration
        } else {
            ResultShape::Empty
        }
    }

    fn schema(self) -> Vec<FieldInfo> {
        match self {
            ResultShape::Availability => availability_schema(),
            ResultShape::Placement => placement_schema(),
            ResultShape::Reservation => reservation_schema(),
            ResultShape::Configuration => configuration_schema(),
            ResultShape::Empty => vec![],
        }
    }
}

fn schema_for(sql: &str) -> Vec<FieldInfo> {
    ResultShape::of(sql).schema()
}

#[async_trait]
impl SimpleQueryHandler for BookdHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct BookdQueryParser;

#[async_trait]
impl QueryParser for BookdQueryParser {
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
impl ExtendedQueryHandler for BookdHandler {
    type Statement = String;
    type QueryParser = BookdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
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
        self.run(&sql).await
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
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Replace `$1, $2, ...` with bound text-format values, quoted, or NULL.
/// Highest index first so `$1` never eats the prefix of `$10`.
fn substitute_params(sql: &str, params: &[Option<impl AsRef<[u8]>>]) -> String {
    let mut result = sql.to_string();
    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct BookdFactory {
    handler: Arc<BookdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<BookdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl BookdFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = BookdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(BookdHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for BookdFactory {
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
) -> io::Result<()> {
    let factory = Arc::new(BookdFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) => "P0002",
        EngineError::Store(_) => "XX000",
        EngineError::LimitExceeded(_) => "54000",
    }
}

fn sql_sqlstate(e: &SqlError) -> &'static str {
    match e {
        SqlError::LimitExceeded(_) => "54000",
        _ => "42601",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(engine_sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error(sql_sqlstate(&e), e.to_string())
}
