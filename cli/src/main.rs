use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::macros::format_description;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway returned HTTP {status}")]
    HttpStatus { status: u16 },
    #[error("Error from stock API: {0}")]
    Gateway(String),
    #[error("invalid --param `{0}`; expected key=value")]
    InvalidParam(String),
    #[error("date format failed: {0}")]
    DateFormat(#[from] time::error::Format),
}

#[derive(Parser, Debug)]
#[command(name = "tushare-cli", about = "Query financial data through a tushare-gateway")]
struct Cli {
    #[arg(long, env = "TUSHARE_GATEWAY_URL", default_value = "http://127.0.0.1:8000")]
    base_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the gateway is up.
    Ping,
    /// Print today's date as `yyyy-MM-dd`.
    Date,
    /// Query daily bars (or another interface) for one security and date range.
    Query(QueryArgs),
}

#[derive(Args, Debug)]
struct QueryArgs {
    #[arg(long, default_value = "daily")]
    api_name: String,

    #[arg(long, help = "Security code, e.g. 000001.SZ")]
    ts_code: String,

    #[arg(long, help = "Start date, e.g. 20250401")]
    start_date: String,

    #[arg(long, help = "End date, e.g. 20250421")]
    end_date: String,

    #[arg(long, default_value = "", help = "Comma-separated columns; empty for all")]
    fields: String,

    #[arg(long = "param", value_name = "KEY=VALUE", help = "Extra interface argument, repeatable")]
    params: Vec<String>,
}

#[derive(Debug, Serialize)]
struct QueryRequest {
    api_name: String,
    params: Map<String, Value>,
    fields: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    code: i32,
    msg: String,
    data: String,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let base_url = cli.base_url.trim_end_matches('/').to_owned();

    match cli.command {
        Command::Ping => run_ping(&base_url).await,
        Command::Date => run_date(),
        Command::Query(args) => run_query(&base_url, args).await,
    }
}

async fn run_ping(base_url: &str) -> Result<(), CliError> {
    check_health(&reqwest::Client::new(), base_url).await?;
    println!("ok");
    Ok(())
}

fn run_date() -> Result<(), CliError> {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    println!("Today's date is {}", format_date(now)?);
    Ok(())
}

async fn run_query(base_url: &str, args: QueryArgs) -> Result<(), CliError> {
    let request = build_request(args)?;
    let data = fetch_query(&reqwest::Client::new(), base_url, &request).await?;
    print!("{data}");
    Ok(())
}

async fn check_health(client: &reqwest::Client, base_url: &str) -> Result<(), CliError> {
    let response = client.get(format!("{base_url}/healthz")).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::HttpStatus { status: status.as_u16() });
    }
    Ok(())
}

async fn fetch_query(client: &reqwest::Client, base_url: &str, request: &QueryRequest) -> Result<String, CliError> {
    let response = client
        .post(format!("{base_url}/api"))
        .json(request)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::HttpStatus { status: status.as_u16() });
    }
    let envelope = response.json::<Envelope>().await?;
    envelope_data(envelope)
}

fn format_date(now: OffsetDateTime) -> Result<String, CliError> {
    Ok(now.format(format_description!("[year]-[month]-[day]"))?)
}

fn build_request(args: QueryArgs) -> Result<QueryRequest, CliError> {
    let mut params = Map::new();
    params.insert("ts_code".to_owned(), Value::String(args.ts_code));
    params.insert("start_date".to_owned(), Value::String(args.start_date));
    params.insert("end_date".to_owned(), Value::String(args.end_date));
    for raw in &args.params {
        let (key, value) = parse_param(raw)?;
        params.insert(key, Value::String(value));
    }
    Ok(QueryRequest { api_name: args.api_name, params, fields: args.fields })
}

fn parse_param(raw: &str) -> Result<(String, String), CliError> {
    let Some((key, value)) = raw.split_once('=') else {
        return Err(CliError::InvalidParam(raw.to_owned()));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(CliError::InvalidParam(raw.to_owned()));
    }
    Ok((key.to_owned(), value.to_owned()))
}

fn envelope_data(envelope: Envelope) -> Result<String, CliError> {
    if envelope.code == 0 {
        Ok(envelope.data)
    } else {
        Err(CliError::Gateway(envelope.msg))
    }
}
