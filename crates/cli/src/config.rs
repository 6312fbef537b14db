use crate::{commands::JobArgs, env::EnvManager, error::CliError};
use model::{
    core::identifiers::TableRef,
    execution::{
        connection::{DEFAULT_PORT, EndpointConfig, SslPreference},
        job::{DEFAULT_BATCH_SIZE, JobConfig, TransferMode},
    },
};
use tracing::info;

const DEFAULT_SOURCE_SCHEMA: &str = "public";
const DEFAULT_DEST_SCHEMA: &str = "my";
const DEFAULT_MODE: &str = "daily";

const LOGGED_KEYS: &[&str] = &[
    "SOURCE_HOST",
    "SOURCE_PORT",
    "SOURCE_DB",
    "SOURCE_USER",
    "SOURCE_PASSWORD",
    "DEST_HOST",
    "DEST_PORT",
    "DEST_DB",
    "DEST_USER",
    "DEST_PASSWORD",
    "TABLE_NAME",
    "WAREHOUSE_TABLE",
    "TRANSFER_MODE",
    "BATCH_SIZE",
    "SSL_MODE",
];

fn endpoint(env: &EnvManager, prefix: &str, ssl_mode: SslPreference) -> Result<EndpointConfig, CliError> {
    let key = |name: &str| format!("{prefix}_{name}");
    let port = env.parse::<u16>(&key("PORT"))?.unwrap_or(DEFAULT_PORT);

    Ok(EndpointConfig::new(
        env.require(&key("HOST"))?,
        env.require(&key("DB"))?,
        env.require(&key("USER"))?,
        env.get_or(&key("PASSWORD"), ""),
    )
    .with_port(port)
    .with_ssl_mode(ssl_mode))
}

/// Assembles the job from environment settings, with flags taking precedence.
pub fn build_job(env: &EnvManager, args: &JobArgs, verify_flag: bool) -> Result<JobConfig, CliError> {
    let ssl_mode: SslPreference = match &args.ssl_mode {
        Some(raw) => raw.parse()?,
        None => env.get_or("SSL_MODE", "prefer").parse()?,
    };

    let table = match &args.table {
        Some(t) => t.clone(),
        None => env.require("TABLE_NAME")?.to_string(),
    };
    let warehouse_table = args
        .warehouse_table
        .clone()
        .or_else(|| env.get("WAREHOUSE_TABLE").map(str::to_string))
        .unwrap_or_else(|| table.clone());
    let source_schema = args
        .source_schema
        .clone()
        .unwrap_or_else(|| env.get_or("SOURCE_DB_SCHEMA", DEFAULT_SOURCE_SCHEMA).to_string());
    let dest_schema = args
        .dest_schema
        .clone()
        .unwrap_or_else(|| env.get_or("DEST_DB_SCHEMA", DEFAULT_DEST_SCHEMA).to_string());

    let mode: TransferMode = match &args.mode {
        Some(raw) => raw.parse()?,
        None => env.get_or("TRANSFER_MODE", DEFAULT_MODE).parse()?,
    };
    let batch_size = match args.batch_size {
        Some(n) => n,
        None => env.parse::<usize>("BATCH_SIZE")?.unwrap_or(DEFAULT_BATCH_SIZE),
    };

    let mut job = JobConfig::new(
        endpoint(env, "SOURCE", ssl_mode)?,
        endpoint(env, "DEST", ssl_mode)?,
        TableRef::new(source_schema, table),
        TableRef::new(dest_schema, warehouse_table),
    )
    .with_mode(mode)
    .with_batch_size(batch_size)
    .with_verify(verify_flag || env.flag("VERIFY_TRANSFER"));

    if let Some(filter) = args.filter.as_deref().or_else(|| env.get("DATE_FILTER")) {
        job = job.with_filter(filter);
    }
    if let Some(order_by) = args.order_by.as_deref().or_else(|| env.get("ORDER_BY")) {
        job = job.with_order_by(order_by);
    }
    if let Some(key) = env.get("MERGE_KEY") {
        job.merge_key = key.to_string();
    }
    if let Some(column) = env.get("UPDATE_COLUMN") {
        job.update_column = column.to_string();
    }

    job.validate()?;

    for key in LOGGED_KEYS {
        if let Some(value) = env.display_value(key) {
            info!(key = *key, value = %value, "Setting");
        }
    }
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::execution::job::MergeMode;

    fn base() -> Vec<(&'static str, &'static str)> {
        vec![
            ("SOURCE_HOST", "src.internal"),
            ("SOURCE_DB", "app"),
            ("SOURCE_USER", "reader"),
            ("SOURCE_PASSWORD", "pw1"),
            ("DEST_HOST", "dwh.internal"),
            ("DEST_PORT", "6543"),
            ("DEST_DB", "warehouse"),
            ("DEST_USER", "writer"),
            ("DEST_PASSWORD", "pw2"),
            ("TABLE_NAME", "orders"),
        ]
    }

    #[test]
    fn defaults_follow_the_daily_deployment() {
        let env = EnvManager::from_vars(base());
        let job = build_job(&env, &JobArgs::default(), false).unwrap();

        assert_eq!(job.source_table.to_string(), "public.orders");
        assert_eq!(job.dest_table.to_string(), "my.orders");
        assert_eq!(job.mode, TransferMode::Incremental);
        assert_eq!(job.batch_size, 10_000);
        assert_eq!(job.source.port, 5432);
        assert_eq!(job.destination.port, 6543);
        assert_eq!(job.source.ssl_mode, SslPreference::Prefer);
        assert!(!job.verify);
        assert!(job.filter.is_none());
        assert!(matches!(job.merge_mode(), MergeMode::Upsert { .. }));
    }

    #[test]
    fn flags_override_environment() {
        let mut vars = base();
        vars.extend([
            ("TRANSFER_MODE", "full"),
            ("BATCH_SIZE", "5000"),
            ("WAREHOUSE_TABLE", "orders_dw"),
            ("VERIFY_TRANSFER", "true"),
            ("SSL_MODE", "require"),
        ]);
        let env = EnvManager::from_vars(vars);
        let args = JobArgs {
            mode: Some("custom".into()),
            batch_size: Some(250),
            filter: Some("id > 100".into()),
            order_by: Some("id".into()),
            ..JobArgs::default()
        };

        let job = build_job(&env, &args, false).unwrap();
        assert_eq!(job.mode, TransferMode::Custom);
        assert_eq!(job.batch_size, 250);
        assert_eq!(job.filter.as_deref(), Some("id > 100"));
        assert_eq!(job.order_by.as_deref(), Some("id"));
        assert_eq!(job.dest_table.to_string(), "my.orders_dw");
        assert_eq!(job.destination.ssl_mode, SslPreference::Require);
        assert!(job.verify);
    }

    #[test]
    fn missing_or_invalid_settings_are_reported() {
        let env = EnvManager::from_vars(
            base().into_iter().filter(|(k, _)| *k != "SOURCE_HOST"),
        );
        let err = build_job(&env, &JobArgs::default(), false).unwrap_err();
        assert!(err.to_string().contains("SOURCE_HOST"));

        let mut vars = base();
        vars.push(("TRANSFER_MODE", "custom"));
        let err = build_job(&EnvManager::from_vars(vars), &JobArgs::default(), false).unwrap_err();
        assert!(err.to_string().contains("custom mode"));

        let mut vars = base();
        vars.push(("BATCH_SIZE", "0"));
        assert!(build_job(&EnvManager::from_vars(vars), &JobArgs::default(), false).is_err());
    }
}
