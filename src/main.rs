use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wind_station_pipeline::config::Config;
use wind_station_pipeline::fetcher::TabularFetcher;
use wind_station_pipeline::forecast_run::{self, Domain, ForecastRunRequest, RunMode, WeatherModel};
use wind_station_pipeline::observations::{self, GustPolicy};
use wind_station_pipeline::publish::{LocalPublisher, Publisher};
use wind_station_pipeline::station_inputs::{StationInputsBuilder, StationInputsRequest};
use wind_station_pipeline::stations::{keystone_stations, select_stations};

#[derive(Parser)]
#[command(name = "wind-station-pipeline")]
#[command(about = "Station observations and solver runs for the Keystone wind model", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build hourly station files and a manifest for a UTC window
    StationInputs {
        /// Window end (UTC). Truncated to the hour. Defaults to now.
        #[arg(long, value_parser = parse_utc)]
        end_utc: Option<DateTime<Utc>>,

        /// Number of hourly files to produce
        #[arg(long, default_value = "18")]
        hours: u32,

        #[arg(long)]
        out_dir: PathBuf,

        /// CSV whose header defines the station file columns
        #[arg(long)]
        template_csv: PathBuf,

        /// Unit flag sent to the station service ('e' for imperial)
        #[arg(long, default_value = "e")]
        unit: String,

        /// Hours of history requested per station
        #[arg(long, default_value = "48")]
        range_hours: u32,

        /// Save each fetched page next to the outputs
        #[arg(long)]
        cache_raw: bool,

        /// Succeed even when some stations could not be fetched
        #[arg(long)]
        best_effort: bool,
    },

    /// Export recent observations per station as metric CSV
    Observations {
        /// Station codes (defaults to every registry station)
        #[arg(long = "station")]
        stations: Vec<String>,

        #[arg(long, default_value = "24")]
        hours_back: u32,

        #[arg(long)]
        out_dir: PathBuf,

        /// 'blank' or 'fallback-to-speed'
        #[arg(long, default_value = "blank")]
        gust_policy: GustPolicy,
    },

    /// Run the wind solver for a forecast or reanalysis window
    Forecast {
        /// forecast, full_forecast, am_forecast, pm_forecast or reanalysis
        #[arg(long, default_value = "full_forecast")]
        mode: RunMode,

        #[arg(long, default_value = "12")]
        hours: u32,

        /// 'small' or 'large'
        #[arg(long, default_value = "small")]
        domain: Domain,

        /// HRRR, NBM or NAM
        #[arg(long, default_value = "HRRR")]
        model: WeatherModel,

        /// Write the solver config only
        #[arg(long)]
        dry_run: bool,

        /// Keep the run directory instead of archiving it
        #[arg(long)]
        keep_temp: bool,

        /// Skip status, archive and index publishing
        #[arg(long)]
        no_publish: bool,
    },

    /// Rebuild the published index
    PublishIndex,
}

/// Accepts RFC 3339 or a bare `YYYY-MM-DDTHH:MM[:SS]` read as UTC.
fn parse_utc(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    let trimmed = value.trim_end_matches('Z');
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("invalid UTC timestamp '{value}'"))
}

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing with environment filter support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,wind_station_pipeline=debug")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    // Load .env before reading configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env();
    let cli = Cli::parse();
    let now = Utc::now();

    match cli.command {
        Command::StationInputs {
            end_utc,
            hours,
            out_dir,
            template_csv,
            unit,
            range_hours,
            cache_raw,
            best_effort,
        } => {
            let fetcher = TabularFetcher::new(config.tabular_url.clone(), config.fetch_policy())?;
            let stations = keystone_stations();

            let mut request = StationInputsRequest::new(end_utc.unwrap_or(now), out_dir, template_csv);
            request.hours = hours;
            request.unit = unit;
            request.range_hours = range_hours;
            request.cache_raw = cache_raw;
            request.best_effort = best_effort;
            request.time_zone = config.station_time_zone.clone();

            let report = StationInputsBuilder::new(&fetcher, &stations)
                .with_pacing(config.station_pacing())
                .build(&request, now)
                .await?;
            info!(
                "Wrote {} station file(s); manifest at {}",
                report.manifest.outputs.csv_files.len(),
                report.manifest_path.display()
            );
        }

        Command::Observations {
            stations,
            hours_back,
            out_dir,
            gust_policy,
        } => {
            let fetcher = TabularFetcher::new(config.tabular_url.clone(), config.fetch_policy())?;
            let selected = select_stations(keystone_stations(), &stations);

            let written = observations::export_observations(
                &fetcher,
                &selected,
                now,
                hours_back,
                &config.station_time_zone,
                &out_dir,
                gust_policy,
            )
            .await?;
            info!("Wrote {} observation file(s)", written.len());
        }

        Command::Forecast {
            mode,
            hours,
            domain,
            model,
            dry_run,
            keep_temp,
            no_publish,
        } => {
            let request = ForecastRunRequest {
                mode,
                hours,
                domain,
                model,
                dry_run,
                keep_temp,
            };
            let publisher = LocalPublisher::new(config.publish_dir.clone(), config.public_url_base.clone());
            let publisher: Option<&dyn Publisher> = if config.publish_enabled && !no_publish {
                Some(&publisher)
            } else {
                None
            };

            let report = forecast_run::execute(&config, &request, publisher, now).await?;
            if let Some(archive) = &report.archive_path {
                info!("Archive: {}", archive.display());
            }
        }

        Command::PublishIndex => {
            let publisher = LocalPublisher::new(config.publish_dir.clone(), config.public_url_base.clone());
            let index = publisher.update_index(now)?;
            info!("Index lists {} forecast(s)", index.forecasts.len());
        }
    }

    Ok(())
}
