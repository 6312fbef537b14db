use crate::{
    core::identifiers::{TableRef, quote_ident, quote_literal},
    execution::{connection::EndpointConfig, errors::ConfigError},
};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

pub const DEFAULT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_MERGE_KEY: &str = "id";
pub const DEFAULT_UPDATE_COLUMN: &str = "updated_at";
/// Column the daily incremental filter is derived from.
pub const DEFAULT_DAILY_COLUMN: &str = "created_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Truncate the destination, then append every source row.
    Full,
    /// Upsert rows matching the filter; defaults to yesterday's rows.
    Incremental,
    /// Upsert rows matching a caller-supplied filter.
    Custom,
}

impl TransferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferMode::Full => "full",
            TransferMode::Incremental => "incremental",
            TransferMode::Custom => "custom",
        }
    }
}

impl FromStr for TransferMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(TransferMode::Full),
            "incremental" | "daily" => Ok(TransferMode::Incremental),
            "custom" => Ok(TransferMode::Custom),
            other => Err(ConfigError::Invalid {
                field: "transfer_mode",
                message: format!("unknown mode '{other}' (expected full, daily, incremental or custom)"),
            }),
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How staged rows are merged into the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeMode {
    Append,
    /// On key conflict only `update_column` is taken from the incoming row.
    Upsert { key: String, update_column: String },
}

/// Read-only description of one transfer job.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub source: EndpointConfig,
    pub destination: EndpointConfig,
    pub source_table: TableRef,
    pub dest_table: TableRef,
    pub batch_size: usize,
    pub mode: TransferMode,
    pub filter: Option<String>,
    pub verify: bool,
    pub merge_key: String,
    pub update_column: String,
    /// Monotonic key used to order extraction windows. Without it the source
    /// must not be written to while the job runs.
    pub order_by: Option<String>,
}

impl JobConfig {
    pub fn new(
        source: EndpointConfig,
        destination: EndpointConfig,
        source_table: TableRef,
        dest_table: TableRef,
    ) -> Self {
        JobConfig {
            source,
            destination,
            source_table,
            dest_table,
            batch_size: DEFAULT_BATCH_SIZE,
            mode: TransferMode::Full,
            filter: None,
            verify: false,
            merge_key: DEFAULT_MERGE_KEY.to_string(),
            update_column: DEFAULT_UPDATE_COLUMN.to_string(),
            order_by: None,
        }
    }

    pub fn with_mode(mut self, mode: TransferMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by = Some(column.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.source.validate("source")?;
        self.destination.validate("destination")?;

        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "batch_size",
                message: "must be a positive integer".to_string(),
            });
        }

        for (field, table) in [("source_table", &self.source_table), ("dest_table", &self.dest_table)] {
            if table.name.trim().is_empty() || table.schema.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field,
                    message: "schema and table name must not be empty".to_string(),
                });
            }
        }

        if self.mode == TransferMode::Custom && self.filter().is_none() {
            return Err(ConfigError::Missing(
                "row filter (required by custom mode)".to_string(),
            ));
        }

        if self.mode != TransferMode::Full
            && (self.merge_key.trim().is_empty() || self.update_column.trim().is_empty())
        {
            return Err(ConfigError::Invalid {
                field: "merge_key",
                message: "upsert modes need a key column and an update column".to_string(),
            });
        }

        Ok(())
    }

    /// The caller-supplied filter, ignoring blank strings.
    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref().map(str::trim).filter(|f| !f.is_empty())
    }

    /// Resolves the filter the whole job runs under. Incremental jobs without
    /// an explicit filter select the rows created the day before `today`.
    pub fn effective_filter(&self, today: NaiveDate) -> Option<String> {
        match (self.mode, self.filter()) {
            (_, Some(filter)) => Some(filter.to_string()),
            (TransferMode::Incremental, None) => Some(daily_filter(today)),
            _ => None,
        }
    }

    pub fn merge_mode(&self) -> MergeMode {
        match self.mode {
            TransferMode::Full => MergeMode::Append,
            TransferMode::Incremental | TransferMode::Custom => MergeMode::Upsert {
                key: self.merge_key.clone(),
                update_column: self.update_column.clone(),
            },
        }
    }
}

fn daily_filter(today: NaiveDate) -> String {
    let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
    format!(
        "DATE({}) = {}",
        quote_ident(DEFAULT_DAILY_COLUMN),
        quote_literal(&yesterday.format("%Y-%m-%d").to_string())
    )
}
