//! SQL-like database destination.
//!
//! `run-statements` loads a whole batch inside one transaction and reports a
//! single outcome for every job of the batch. `run-operation` renders an SQL
//! template file per job and executes it.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

use super::driver;
use crate::action::{Action, Destination};
use crate::codec::{self, Payload};
use crate::core::{Batch, DestinationOptions, Event, Job, Outcome, Schedule};
use crate::errors::{RelayError, SqlError, ValidationError};
use crate::executor::{load_each, JobDelivery};
use crate::reporter::OutcomeReporter;
use crate::transport::{SqlConnection, SqlTransaction};

static PLACEHOLDER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*\.?([A-Za-z_][A-Za-z0-9_]*)\s*\}\}"));

/// Options of a SQL-like destination.
#[derive(Clone, Default)]
pub struct SqlikeOptions {
    /// Name of the destination, e.g. `warehouse`.
    pub name: String,
    /// Connection shared by every load.
    pub db: Option<Arc<dyn SqlConnection>>,
    /// Directory relative operation filenames are resolved from.
    pub operations_dir: Option<PathBuf>,
    /// Schedule shared by every action.
    pub schedule: Schedule,
}

impl fmt::Debug for SqlikeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlikeOptions")
            .field("name", &self.name)
            .field("db", &self.db.is_some())
            .field("operations_dir", &self.operations_dir)
            .field("schedule", &self.schedule)
            .finish()
    }
}

impl SqlikeOptions {
    /// Creates options for a named database.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the connection.
    #[must_use]
    pub fn with_db(mut self, db: Arc<dyn SqlConnection>) -> Self {
        self.db = Some(db);
        self
    }

    /// Sets the directory operation files are read from.
    #[must_use]
    pub fn with_operations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.operations_dir = Some(dir.into());
        self
    }

    /// Returns the computed destination name, `sqlike(<name>)`.
    #[must_use]
    pub fn destination_name(&self) -> String {
        format!("sqlike({})", self.name)
    }

    /// Fills schedule defaults and checks the name and connection.
    pub fn validate(&mut self) -> Result<(), ValidationError> {
        self.schedule.fill_defaults();
        let mut fail = ValidationError::new("sqlike: Failed to load");
        if self.name.is_empty() {
            fail.push("Database name must be set", &driver::path("sqlike", Some("Name")));
        }
        if self.db.is_none() {
            fail.push(
                "Database client connection must be set",
                &driver::path(&self.destination_name(), Some("DB")),
            );
        }
        fail.into_result()
    }
}

/// A SQL-like database destination.
pub struct Sqlike {
    name: String,
    db: Arc<dyn SqlConnection>,
    operations_dir: Option<PathBuf>,
    options: DestinationOptions,
}

impl Sqlike {
    /// Validates the options.
    pub fn new(mut options: SqlikeOptions) -> Result<Self, ValidationError> {
        options.validate()?;
        let name = options.destination_name();
        let Some(db) = options.db else {
            return Err(ValidationError::new("sqlike: Failed to load"));
        };
        Ok(Self {
            name,
            db,
            operations_dir: options.operations_dir,
            options: DestinationOptions::unversioned(options.schedule),
        })
    }
}

#[async_trait]
impl Destination for Sqlike {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn options(&self) -> &DestinationOptions {
        &self.options
    }

    fn actions(&self) -> HashMap<String, Arc<dyn Action>> {
        let statements = RunStatements {
            statements: Vec::new(),
            db: Some(self.db.clone()),
        };
        let operation = RunOperation {
            db: Some(self.db.clone()),
            operations_dir: self.operations_dir.clone(),
            ..RunOperation::default()
        };
        HashMap::from([
            ("run-statements".to_string(), Arc::new(statements) as Arc<dyn Action>),
            ("run-operation".to_string(), Arc::new(operation) as Arc<dyn Action>),
        ])
    }

    async fn shutdown(&self) -> Result<(), RelayError> {
        self.db.close().await;
        Ok(())
    }
}

/// A prepared statement and the argument rows it is executed with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    /// The query, with positional placeholders.
    pub query: String,
    /// One row of arguments per execution.
    #[serde(default)]
    pub values: Vec<Vec<Value>>,
}

impl Statement {
    /// Creates a statement without arguments.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            values: Vec::new(),
        }
    }

    /// Adds an argument row.
    #[must_use]
    pub fn with_row(mut self, row: Vec<Value>) -> Self {
        self.values.push(row);
        self
    }

    async fn execute(&self, tx: &mut dyn SqlTransaction) -> Result<(), SqlError> {
        if self.values.is_empty() {
            tx.execute(&self.query, &[]).await?;
            return Ok(());
        }
        for row in &self.values {
            tx.execute(&self.query, row).await?;
        }
        Ok(())
    }
}

/// Executes statements for the whole batch inside one transaction.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct RunStatements {
    /// Statements, executed in order.
    pub statements: Vec<Statement>,
    #[serde(skip)]
    db: Option<Arc<dyn SqlConnection>>,
}

impl RunStatements {
    /// Creates the action around its statements.
    #[must_use]
    pub fn new(statements: Vec<Statement>) -> Self {
        Self {
            statements,
            db: None,
        }
    }

    /// Runs every job's statements; stops at the first failure. The flag of
    /// the error tells whether the failure is terminal.
    async fn run(db: &dyn SqlConnection, batch: &Batch) -> Result<(), (RelayError, bool)> {
        let mut tx = db.begin().await.map_err(|err| (RelayError::from(err), false))?;

        for (_, job) in batch.jobs() {
            let run: RunStatements = match codec::decode(job) {
                Ok(run) => run,
                Err(err) => {
                    rollback(tx).await;
                    return Err((err, true));
                }
            };
            for statement in &run.statements {
                if let Err(err) = statement.execute(tx.as_mut()).await {
                    rollback(tx).await;
                    return Err((err.into(), false));
                }
            }
        }

        tx.commit().await.map_err(|err| (RelayError::from(err), false))
    }
}

async fn rollback(tx: Box<dyn SqlTransaction>) {
    if let Err(err) = tx.rollback().await {
        warn!(error = %err, "Rollback failed");
    }
}

impl fmt::Debug for RunStatements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunStatements")
            .field("statements", &self.statements)
            .finish_non_exhaustive()
    }
}

impl Payload for RunStatements {}

#[async_trait]
impl Action for RunStatements {
    fn name(&self) -> &str {
        "run-statements"
    }

    fn marshal(&self) -> Result<Job, RelayError> {
        codec::marshal(self, None)
    }

    async fn load(&self, batch: &Batch, reporter: &OutcomeReporter) {
        if batch.is_empty() {
            return;
        }
        let jobs = batch.job_ids();

        if let Some(error) = reporter.cancellation_error() {
            reporter.report(Outcome::failed(jobs, error, false)).await;
            return;
        }
        let Some(db) = &self.db else {
            let err = RelayError::config("sqlike: action is not bound to a connection");
            reporter.report(Outcome::failed(jobs, err.to_job_error(), false)).await;
            return;
        };

        let outcome = match Self::run(db.as_ref(), batch).await {
            Ok(()) => {
                debug!(jobs = jobs.len(), "Transaction committed");
                Outcome::succeeded_all(jobs)
            }
            Err((err, discard)) => Outcome::failed(jobs, err.to_job_error(), discard),
        };
        reporter.report(outcome).await;
    }
}

/// Renders an SQL template file with the job's data and executes it.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct RunOperation {
    /// Path of the SQL template, e.g. `operations/refresh.sql`.
    pub filename: String,
    /// Values substituted for `{{ key }}` placeholders.
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(skip)]
    db: Option<Arc<dyn SqlConnection>>,
    #[serde(skip)]
    operations_dir: Option<PathBuf>,
}

impl RunOperation {
    /// Creates the action for a template file.
    #[must_use]
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Self::default()
        }
    }

    /// Sets a template value.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    async fn compile(&self, run: &RunOperation) -> Result<String, RelayError> {
        let path = match &self.operations_dir {
            Some(dir) => dir.join(&run.filename),
            None => PathBuf::from(&run.filename),
        };
        let template = tokio::fs::read_to_string(&path).await?;
        render(&template, &run.data)
    }
}

/// Substitutes every `{{ key }}` placeholder. Strings are inserted as is,
/// other values as JSON. A placeholder without a value is an error.
pub fn render(template: &str, data: &Map<String, Value>) -> Result<String, RelayError> {
    let placeholder = PLACEHOLDER
        .as_ref()
        .map_err(|err| RelayError::config(err.to_string()))?;
    let mut missing = Vec::new();
    let rendered = placeholder.replace_all(template, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        match data.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                missing.push(key.to_string());
                String::new()
            }
        }
    });
    if missing.is_empty() {
        Ok(rendered.into_owned())
    } else {
        Err(RelayError::config(format!(
            "missing template values: {}",
            missing.join(", ")
        )))
    }
}

impl fmt::Debug for RunOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOperation")
            .field("filename", &self.filename)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

impl Payload for RunOperation {}

#[async_trait]
impl Action for RunOperation {
    fn name(&self) -> &str {
        "run-operation"
    }

    fn marshal(&self) -> Result<Job, RelayError> {
        codec::marshal(self, None)
    }

    async fn load(&self, batch: &Batch, reporter: &OutcomeReporter) {
        load_each(self, batch, reporter).await;
    }
}

#[async_trait]
impl JobDelivery for RunOperation {
    async fn deliver_job(&self, _event: &Event, job: &Job) -> Outcome {
        let run: RunOperation = match codec::decode(job) {
            Ok(run) => run,
            Err(err) => return Outcome::from_error(job.id.clone(), &err),
        };
        let Some(db) = &self.db else {
            return super::unbound(job, "sqlike");
        };

        let sql = match self.compile(&run).await {
            Ok(sql) => sql,
            Err(err) => return Outcome::retry(job.id.clone(), err.to_job_error()),
        };
        match db.execute(&sql, &[]).await {
            Ok(rows) => {
                debug!(filename = %run.filename, rows, "Operation executed");
                Outcome::succeeded(job.id.clone())
            }
            Err(err) => Outcome::retry(job.id.clone(), RelayError::from(err).to_job_error()),
        }
    }
}
