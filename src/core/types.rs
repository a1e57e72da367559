use super::{DbError, Result};
use serde::{Deserialize, Serialize};

pub type Row = Vec<serde_json::Value>;

/// Fully-qualified database identifier.
///
/// Rendered as `projects/<project>/instances/<instance>/databases/<database>`,
/// the same form the service embeds in session names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatabaseId {
    project: String,
    instance: String,
    database: String,
}

impl DatabaseId {
    pub fn new(
        project: impl Into<String>,
        instance: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            instance: instance.into(),
            database: database.into(),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Parse from the canonical resource path.
    pub fn parse(path: &str) -> Result<Self> {
        let parts: Vec<&str> = path.split('/').collect();
        match parts.as_slice() {
            ["projects", project, "instances", instance, "databases", database]
                if !project.is_empty() && !instance.is_empty() && !database.is_empty() =>
            {
                Ok(Self::new(*project, *instance, *database))
            }
            _ => Err(DbError::InvalidArgument(format!(
                "'{path}' is not a valid database path"
            ))),
        }
    }

    /// Extract the owning database from a session name of the form
    /// `<database path>/sessions/<id>`.
    pub fn from_session_name(name: &str) -> Result<Self> {
        let (prefix, _) = name.rsplit_once("/sessions/").ok_or_else(|| {
            DbError::InvalidArgument(format!("'{name}' is not a valid session name"))
        })?;
        Self::parse(prefix)
    }
}

impl std::fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "projects/{}/instances/{}/databases/{}",
            self.project, self.instance, self.database
        )
    }
}

/// A single read, query or update statement issued inside a transaction.
///
/// The SQL text and parameters are opaque to this crate; encoding them for
/// the wire is the transport's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    sql: String,
    params: Vec<(String, serde_json::Value)>,
}

impl Operation {
    pub fn sql(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Bind a named parameter.
    pub fn bind(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.push((name.into(), value));
        self
    }

    pub fn sql_text(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[(String, serde_json::Value)] {
        &self.params
    }
}

/// Result of executing one operation.
#[derive(Debug, Clone, Default)]
pub struct ExecuteResult {
    pub rows: Vec<Row>,
    pub affected_rows: u64,
}

impl ExecuteResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Opaque server-assigned transaction id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionHandle(String);

impl TransactionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    ReadOnly,
    ReadWrite,
}
