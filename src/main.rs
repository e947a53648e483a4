mod api_client;
mod config;
mod data;
mod error;
mod rate_limit;
mod runner;
mod warehouse;

use api_client::ApiClient;
use chrono::NaiveDate;
use clap::Parser;
use config::Config;
use error::Error;
use log::error;
use warehouse::BigQueryWarehouse;

#[derive(Parser)]
struct Args {
    #[command(flatten)]
    config: Config,

    #[arg(long, help = "Date should be in the form YYYY-MM-DD", value_parser = validate_date)]
    start_date: NaiveDate,

    /// Destination cloud project for the warehouse table.
    #[arg(long = "project_id")]
    project_id: String,
}

fn validate_date(s: &str) -> Result<NaiveDate, String> {
    let error_message = "Invalid date, expected YYYY-MM-DD";

    let parts = s
        .split("-")
        .map(|part| part.parse::<u16>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| error_message)?;

    match parts.as_slice() {
        &[year, month, day] if month <= 12 && day <= 31 => {
            Ok(
                NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                    .ok_or(error_message)?,
            )
        }
        _ => Err(error_message.to_string()),
    }
}

async fn run(args: Args) -> Result<(), Error> {
    let api = ApiClient::new(&args.config)?;
    let warehouse =
        BigQueryWarehouse::connect(&args.project_id, &args.config.dataset, &args.config.table)
            .await?;

    runner::sync_ads_data(&api, &warehouse, args.start_date).await
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    env_logger::init();

    if let Err(err) = run(args).await {
        error!("failed to sync ads data: {}", err);
        std::process::exit(1);
    }
}
