use clap::{Args, Subcommand, ValueEnum};

/// Flags that override the environment. Unset flags fall back to env vars.
#[derive(Args, Debug, Clone, Default)]
pub struct JobArgs {
    #[arg(long, help = "Source table name (TABLE_NAME)")]
    pub table: Option<String>,

    #[arg(long, help = "Destination table name (WAREHOUSE_TABLE)")]
    pub warehouse_table: Option<String>,

    #[arg(long, help = "Source schema (SOURCE_DB_SCHEMA, default public)")]
    pub source_schema: Option<String>,

    #[arg(long, help = "Destination schema (DEST_DB_SCHEMA, default my)")]
    pub dest_schema: Option<String>,

    #[arg(long, help = "full, daily, incremental or custom (TRANSFER_MODE)")]
    pub mode: Option<String>,

    #[arg(long, help = "Rows per batch (BATCH_SIZE)")]
    pub batch_size: Option<usize>,

    #[arg(long, help = "SQL row filter (DATE_FILTER)")]
    pub filter: Option<String>,

    #[arg(long, help = "Column to page the source by (ORDER_BY)")]
    pub order_by: Option<String>,

    #[arg(long, help = "disable, prefer, require, verify-ca or verify-full (SSL_MODE)")]
    pub ssl_mode: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Target {
    Source,
    Dest,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transfer the configured table and report the outcome
    Run {
        #[command(flatten)]
        job: JobArgs,

        #[arg(long, help = "Compare row counts after the transfer (VERIFY_TRANSFER)")]
        verify: bool,

        #[arg(long, default_value_t = 1000, help = "Progress poll interval in milliseconds")]
        poll_ms: u64,

        #[arg(long, help = "Print the final report as JSON")]
        json: bool,
    },
    /// Connect to one endpoint and report its server and SSL details
    TestConn {
        #[command(flatten)]
        job: JobArgs,

        #[arg(long, value_enum, default_value_t = Target::Source)]
        target: Target,

        #[arg(long)]
        json: bool,
    },
    /// Compare source and destination row counts under the job filter
    Verify {
        #[command(flatten)]
        job: JobArgs,

        #[arg(long)]
        json: bool,
    },
    /// Count the source rows the job would transfer
    Count {
        #[command(flatten)]
        job: JobArgs,

        #[arg(long)]
        json: bool,
    },
}
