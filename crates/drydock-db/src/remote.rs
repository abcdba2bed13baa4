//! Remote managed SQL backend: a libSQL server reached over HTTP.
//!
//! Speaks the Hrana v2 pipeline protocol: every call is a single
//! `POST {base}/v2/pipeline` carrying the statement(s) followed by a `close`
//! request, so no stream state is kept between calls.

use crate::backend::{SqlBackend, Statement};
use crate::error::DbError;
use crate::value::{QueryResult, SqlValue};
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An HTTP client for a remote libSQL database.
///
/// Construction performs no network I/O; the first statement opens the
/// first connection.
#[derive(Clone)]
pub struct RemoteDatabase {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl fmt::Debug for RemoteDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteDatabase")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl RemoteDatabase {
    /// Creates a client for `url` authenticated with `token`.
    ///
    /// `libsql://` and `wss://` URLs are rewritten to `https://`, `ws://` to
    /// `http://`.
    ///
    /// # Errors
    ///
    /// Returns `DbError::InvalidUrl` if the URL cannot be parsed or uses an
    /// unsupported scheme.
    pub fn new(url: &str, token: &str) -> Result<Self, DbError> {
        let base_url = normalize_url(url)?;
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url,
            token: token.to_string(),
        })
    }

    /// The HTTP base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn pipeline(&self, request: StreamRequest<'_>) -> Result<StreamResponse, DbError> {
        let body = PipelineRequest {
            baton: None,
            requests: vec![request, StreamRequest::Close],
        };

        let response: PipelineResponse = self
            .client
            .post(format!("{}/v2/pipeline", self.base_url))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match response.results.into_iter().next() {
            Some(StreamResult::Ok { response }) => Ok(response),
            Some(StreamResult::Error { error }) => Err(DbError::Remote(error.message)),
            None => Err(DbError::Remote("empty pipeline response".to_string())),
        }
    }

    async fn execute_stmt(&self, sql: &str, params: &[SqlValue]) -> Result<StmtResult, DbError> {
        let stmt = Stmt::new(sql, params, true);
        match self.pipeline(StreamRequest::Execute { stmt }).await? {
            StreamResponse::Execute { result } => Ok(result),
            other => Err(unexpected_response("execute", &other)),
        }
    }
}

fn normalize_url(url: &str) -> Result<String, DbError> {
    let trimmed = url.trim().trim_end_matches('/');
    let rewritten = if let Some(rest) = trimmed.strip_prefix("libsql://") {
        format!("https://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        trimmed.to_string()
    };

    let parsed = url::Url::parse(&rewritten).map_err(|_| DbError::InvalidUrl(url.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(DbError::InvalidUrl(url.to_string()));
    }
    Ok(rewritten)
}

fn unexpected_response(expected: &str, got: &StreamResponse) -> DbError {
    let kind = match got {
        StreamResponse::Execute { .. } => "execute",
        StreamResponse::Batch { .. } => "batch",
        StreamResponse::Close => "close",
    };
    DbError::Remote(format!("expected {expected} response, got {kind}"))
}

#[async_trait]
impl SqlBackend for RemoteDatabase {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        Ok(self.execute_stmt(sql, params).await?.affected_row_count)
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DbError> {
        let result = self.execute_stmt(sql, params).await?;
        let columns = result
            .cols
            .into_iter()
            .map(|col| col.name.unwrap_or_default())
            .collect();
        let rows = result
            .rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(SqlValue::try_from)
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, DbError>>()?;
        Ok(QueryResult { columns, rows })
    }

    async fn transaction(&self, statements: &[Statement]) -> Result<(), DbError> {
        let batch = transaction_batch(statements);
        let result = match self.pipeline(StreamRequest::Batch { batch }).await? {
            StreamResponse::Batch { result } => result,
            other => return Err(unexpected_response("batch", &other)),
        };

        // Only the first failing step matters; later steps are skipped by
        // their conditions and the rollback step runs.
        match result.step_errors.into_iter().flatten().next() {
            Some(error) => Err(DbError::Remote(error.message)),
            None => Ok(()),
        }
    }
}

/// Builds `BEGIN; s1; ...; sN; COMMIT` where each step only runs if the
/// previous one succeeded, plus a trailing `ROLLBACK` that runs only if the
/// commit did not.
fn transaction_batch(statements: &[Statement]) -> Batch<'_> {
    let mut steps = Vec::with_capacity(statements.len() + 3);
    steps.push(BatchStep {
        condition: None,
        stmt: Stmt::new("BEGIN", &[], false),
    });
    for statement in statements {
        let prev = steps.len() as u32 - 1;
        steps.push(BatchStep {
            condition: Some(BatchCond::Ok { step: prev }),
            stmt: Stmt::new(&statement.sql, &statement.params, false),
        });
    }
    let commit = steps.len() as u32;
    steps.push(BatchStep {
        condition: Some(BatchCond::Ok { step: commit - 1 }),
        stmt: Stmt::new("COMMIT", &[], false),
    });
    steps.push(BatchStep {
        condition: Some(BatchCond::Not {
            cond: Box::new(BatchCond::Ok { step: commit }),
        }),
        stmt: Stmt::new("ROLLBACK", &[], false),
    });
    Batch { steps }
}

#[derive(Debug, Serialize)]
struct PipelineRequest<'a> {
    baton: Option<String>,
    requests: Vec<StreamRequest<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamRequest<'a> {
    Execute { stmt: Stmt<'a> },
    Batch { batch: Batch<'a> },
    Close,
}

#[derive(Debug, Serialize)]
struct Stmt<'a> {
    sql: &'a str,
    args: Vec<HranaValue>,
    want_rows: bool,
}

impl<'a> Stmt<'a> {
    fn new(sql: &'a str, params: &[SqlValue], want_rows: bool) -> Self {
        Self {
            sql,
            args: params.iter().map(HranaValue::from).collect(),
            want_rows,
        }
    }
}

#[derive(Debug, Serialize)]
struct Batch<'a> {
    steps: Vec<BatchStep<'a>>,
}

#[derive(Debug, Serialize)]
struct BatchStep<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    condition: Option<BatchCond>,
    stmt: Stmt<'a>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BatchCond {
    Ok { step: u32 },
    Not { cond: Box<BatchCond> },
}

/// Wire representation of a value. Integers travel as strings to keep
/// 64-bit precision; blobs travel base64-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HranaValue {
    Null,
    Integer { value: String },
    Float { value: f64 },
    Text { value: String },
    Blob { base64: String },
}

impl From<&SqlValue> for HranaValue {
    fn from(value: &SqlValue) -> Self {
        match value {
            SqlValue::Null => Self::Null,
            SqlValue::Integer(v) => Self::Integer {
                value: v.to_string(),
            },
            SqlValue::Real(v) => Self::Float { value: *v },
            SqlValue::Text(s) => Self::Text { value: s.clone() },
            SqlValue::Blob(b) => Self::Blob {
                base64: STANDARD.encode(b),
            },
        }
    }
}

impl TryFrom<HranaValue> for SqlValue {
    type Error = DbError;

    fn try_from(value: HranaValue) -> Result<Self, Self::Error> {
        Ok(match value {
            HranaValue::Null => Self::Null,
            HranaValue::Integer { value } => Self::Integer(
                value
                    .parse()
                    .map_err(|_| DbError::Remote(format!("invalid integer value '{value}'")))?,
            ),
            HranaValue::Float { value } => Self::Real(value),
            HranaValue::Text { value } => Self::Text(value),
            HranaValue::Blob { base64 } => Self::Blob(
                STANDARD_NO_PAD
                    .decode(base64.trim_end_matches('='))
                    .map_err(|e| DbError::Remote(format!("invalid blob value: {e}")))?,
            ),
        })
    }
}

#[derive(Debug, Deserialize)]
struct PipelineResponse {
    results: Vec<StreamResult>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamResult {
    Ok { response: StreamResponse },
    Error { error: HranaError },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamResponse {
    Execute { result: StmtResult },
    Batch { result: BatchResult },
    Close,
}

#[derive(Debug, Deserialize)]
struct StmtResult {
    #[serde(default)]
    cols: Vec<Col>,
    #[serde(default)]
    rows: Vec<Vec<HranaValue>>,
    #[serde(default)]
    affected_row_count: u64,
}

#[derive(Debug, Deserialize)]
struct Col {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchResult {
    #[serde(default)]
    step_errors: Vec<Option<HranaError>>,
}

#[derive(Debug, Deserialize)]
struct HranaError {
    message: String,
}
