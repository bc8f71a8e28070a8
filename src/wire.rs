use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
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
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::BookdAuthSource;
use crate::engine::Engine;
use crate::model::*;
use crate::sql::{self, Command};
use crate::stores::StoreDirectory;

pub struct BookdHandler {
    stores: Arc<StoreDirectory>,
    query_parser: Arc<BookdQueryParser>,
}

impl BookdHandler {
    pub fn new(stores: Arc<StoreDirectory>) -> Self {
        Self {
            stores,
            query_parser: Arc::new(BookdQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.stores.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("store error: {e}"),
            )))
        })
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let label = crate::observability::command_label(&cmd);
        let started = std::time::Instant::now();
        let result = self.dispatch(engine, cmd).await;
        metrics::histogram!(crate::observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(crate::observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn dispatch(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::DefineService { id, name, duration } => {
                engine
                    .define_service(id, name, duration)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::PublishShift {
                id,
                staff_id,
                start,
                end,
            } => {
                engine
                    .publish_shift(id, staff_id, Window::new(start, end))
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::RevokeShift { id } => {
                engine.revoke_shift(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::PublishSlot {
                id,
                shift_id,
                service_id,
                start,
                end,
                capacity,
            } => {
                engine
                    .publish_slot(id, shift_id, service_id, Window::new(start, end), capacity)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::RevokeSlot { id } => {
                engine.revoke_slot(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::Book {
                id,
                slot_id,
                customer_id,
                note,
                actor,
                actor_role,
            } => {
                // Without explicit actor columns the customer books for
                // themselves; the identity collaborator resolved them upstream.
                let actor = Actor::new(
                    actor.unwrap_or(customer_id),
                    actor_role.unwrap_or(Role::Customer),
                );
                engine
                    .book(id, slot_id, customer_id, note, actor)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SetStatus {
                id,
                status,
                actor,
                actor_role,
            } => {
                let actor = Actor::new(actor, actor_role);
                match status {
                    AppointmentStatus::Confirmed => {
                        engine.confirm(id, actor).await.map_err(engine_err)?;
                    }
                    AppointmentStatus::Canceled => {
                        engine.cancel(id, actor).await.map_err(engine_err)?;
                    }
                    AppointmentStatus::Missed => {
                        engine.mark_missed(id, actor).await.map_err(engine_err)?;
                    }
                    AppointmentStatus::Pending => {
                        return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                            "ERROR".into(),
                            "P0001".into(),
                            "pending is the initial status; it cannot be set".into(),
                        ))));
                    }
                }
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectSlots {
                staff_id,
                service_id,
                start,
                end,
            } => {
                let slots = engine
                    .find_slots(staff_id, service_id, Window::new(start, end))
                    .await
                    .map_err(engine_err)?;
                Ok(vec![slot_rows(slots)])
            }
            Command::SelectSlot { id } => {
                let summary = engine.slot_summary(&id).await.map_err(engine_err)?;
                Ok(vec![slot_rows(vec![summary])])
            }
            Command::SelectAppointment { id } => {
                let info = engine.get_appointment(&id).await.map_err(engine_err)?;
                Ok(vec![appointment_rows(vec![info])])
            }
            Command::SelectAppointments { customer_id } => {
                let infos = engine.list_appointments_for_customer(&customer_id).await;
                Ok(vec![appointment_rows(infos)])
            }
            Command::SelectHistory { appointment_id } => {
                let entries = engine.list_history(&appointment_id).map_err(engine_err)?;
                Ok(vec![history_rows(entries)])
            }
            Command::SelectNotices { recipient_id } => {
                let notices = engine.notify.mailbox(&recipient_id);
                Ok(vec![notice_rows(recipient_id, notices)])
            }
        }
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("staff_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("service_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("start".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("capacity".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("remaining".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("active".into(), None, None, Type::BOOL, FieldFormat::Text),
    ]
}

fn appointments_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("slot_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("customer_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("staff_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("service_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("start".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("note".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("created_at".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("updated_at".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

fn history_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("appointment_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("actor".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("at".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

fn notices_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("recipient_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("kind".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("appointment_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("message".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("payload".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("occurred_at".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

fn slot_rows(slots: Vec<SlotSummary>) -> Response {
    let schema = Arc::new(slots_schema());
    let rows: Vec<PgWireResult<_>> = slots
        .into_iter()
        .map(|s| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&s.id.to_string())?;
            encoder.encode_field(&s.staff_id.to_string())?;
            encoder.encode_field(&s.service_id.to_string())?;
            encoder.encode_field(&s.window.start)?;
            encoder.encode_field(&s.window.end)?;
            encoder.encode_field(&(s.capacity as i32))?;
            encoder.encode_field(&(s.remaining as i32))?;
            encoder.encode_field(&s.active)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn appointment_rows(infos: Vec<AppointmentInfo>) -> Response {
    let schema = Arc::new(appointments_schema());
    let rows: Vec<PgWireResult<_>> = infos
        .into_iter()
        .map(|a| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&a.id.to_string())?;
            encoder.encode_field(&a.slot_id.to_string())?;
            encoder.encode_field(&a.customer_id.to_string())?;
            encoder.encode_field(&a.staff_id.to_string())?;
            encoder.encode_field(&a.service_id.to_string())?;
            encoder.encode_field(&a.window.start)?;
            encoder.encode_field(&a.window.end)?;
            encoder.encode_field(&a.status.as_str())?;
            encoder.encode_field(&a.note.as_deref())?;
            encoder.encode_field(&a.created_at)?;
            encoder.encode_field(&a.updated_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn history_rows(entries: Vec<HistoryEntry>) -> Response {
    let schema = Arc::new(history_schema());
    let rows: Vec<PgWireResult<_>> = entries
        .into_iter()
        .map(|e| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&e.appointment_id.to_string())?;
            encoder.encode_field(&e.status.as_str())?;
            encoder.encode_field(&e.actor.map(|a| a.to_string()))?;
            encoder.encode_field(&e.at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn notice_rows(recipient_id: Ulid, notices: Vec<crate::notify::Notice>) -> Response {
    let schema = Arc::new(notices_schema());
    let recipient = recipient_id.to_string();
    let rows: Vec<PgWireResult<_>> = notices
        .into_iter()
        .map(|n| {
            let payload = serde_json::to_string(&n).map_err(|e| {
                PgWireError::ApiError(Box::new(e))
            })?;
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&recipient)?;
            encoder.encode_field(&n.kind.as_str())?;
            encoder.encode_field(&n.appointment_id.to_string())?;
            encoder.encode_field(&n.message)?;
            encoder.encode_field(&payload)?;
            encoder.encode_field(&n.occurred_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn schema_for_statement(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("SLOTS") {
        slots_schema()
    } else if upper.contains("APPOINTMENTS") {
        appointments_schema()
    } else if upper.contains("HISTORY") {
        history_schema()
    } else if upper.contains("NOTICES") {
        notices_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for BookdHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute_command(&engine, cmd).await
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
        Ok(schema_for_statement(stmt))
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
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&engine, cmd).await?;
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
            schema_for_statement(&target.statement),
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
        Ok(DescribePortalResponse::new(schema_for_statement(
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
                && n > max {
                    max = n;
                }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
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
    pub fn new(stores: Arc<StoreDirectory>, password: String) -> Self {
        let auth_source = BookdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(BookdHandler::new(stores)),
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

/// Serve one accepted TCP connection to completion.
pub async fn process_connection(
    socket: TcpStream,
    stores: Arc<StoreDirectory>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let factory = Arc::new(BookdFactory::new(stores, password));
    pgwire::tokio::process_socket(socket, tls, factory).await?;
    Ok(())
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
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
