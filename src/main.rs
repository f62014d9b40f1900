use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use reqwest::Client;
use std::path::PathBuf;
use tokio::sync::broadcast::error::TryRecvError;

use energy_admin::config::Config;
use energy_admin::projector;
use energy_admin::render;
use energy_admin::selection::Selection;
use energy_admin::types::{DetailKind, JobAction, SeriesQuery, TimeFilter};
use energy_admin::{Dispatcher, Gateway, Notice, Store, Update};

#[derive(Parser, Debug)]
#[command(name = "energy-admin", about = "Admin console for the energy-modeling backend")]
struct Cli {
    /// Overrides BACKEND_URL / config file.
    #[arg(long, global = true)]
    backend_url: Option<String>,
    #[arg(long, global = true)]
    data_center: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Database model catalog.
    Models,
    /// Time-series measurement catalog.
    Measurements,
    /// Model types available for the data center.
    ModelTypes,
    /// Raw device-type series.
    DeviceType { device_type: String },
    /// Measurement series, or a single device when one is given.
    Series {
        device_type: String,
        measurement: String,
        device: Option<String>,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, value_enum, default_value_t = View::Table)]
        view: View,
    },
    Build { model_type: String },
    Train { model_type: String, #[command(flatten)] filter: FilterArgs },
    Test { model_type: String, #[command(flatten)] filter: FilterArgs },
    Apply { model_type: String, #[command(flatten)] filter: FilterArgs },
    /// Job list with statistics.
    Jobs,
    /// Prediction vs expectation chart for one job and device.
    JobDetail {
        job: String,
        #[arg(long)]
        device_type: Option<String>,
        #[arg(long)]
        measurement: Option<String>,
        #[arg(long)]
        device: Option<String>,
        /// Whole-job result instead of one device.
        #[arg(long, conflicts_with_all = ["device_type", "measurement", "device"])]
        whole: bool,
        /// With --whole, fetch only this half.
        #[arg(long, value_enum, requires = "whole")]
        kind: Option<Kind>,
    },
    /// Upload a model artifact.
    ImportModel { model: String, file: PathBuf },
    /// Upload series for a device type, or one of its measurements.
    Import {
        device_type: String,
        #[arg(long)]
        measurement: Option<String>,
        file: PathBuf,
    },
    /// Download series for a device type, or one of its measurements.
    Export {
        device_type: String,
        #[arg(long)]
        measurement: Option<String>,
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Write the effective configuration to $CONFIG_DIR/admin_config.json.
    InitConfig,
}

#[derive(Args, Debug, Clone)]
struct FilterArgs {
    #[arg(long)]
    start: Option<NaiveDate>,
    #[arg(long)]
    end: Option<NaiveDate>,
    /// Aggregation window in seconds.
    #[arg(long)]
    window: Option<u64>,
    #[arg(long)]
    aggregation: Option<String>,
}

impl FilterArgs {
    fn apply(&self, base: &TimeFilter) -> TimeFilter {
        let mut filter = base.clone();
        if let Some(start) = self.start {
            filter.start_date = start;
        }
        if let Some(end) = self.end {
            filter.end_date = end;
        }
        if let Some(window) = self.window {
            filter.aggregation_window_secs = window;
        }
        if let Some(aggregation) = &self.aggregation {
            filter.aggregation_fn = aggregation.clone();
        }
        filter
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Table,
    Chart,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Prediction,
    Expectation,
}

impl From<Kind> for DetailKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Prediction => DetailKind::Prediction,
            Kind::Expectation => DetailKind::Expectation,
        }
    }
}

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,energy_admin=info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    let result = if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|err| anyhow::anyhow!(err.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(url) = cli.backend_url.clone() {
        config.backend_url = url;
    }
    if let Some(dc) = cli.data_center.clone() {
        config.data_center = dc;
    }
    tracing::debug!(?config, "starting");

    let gateway = Gateway::new(Client::new(), &config.backend_url);
    let mut busy = gateway.busy();
    tokio::spawn(async move {
        while busy.changed().await.is_ok() {
            tracing::debug!(busy = *busy.borrow(), "busy changed");
        }
    });
    let mut notices = gateway.notices();
    let dispatcher = Dispatcher::new(gateway);
    let store = Store::new();

    let outcome = run(cli.command, &config, &dispatcher, &store).await;
    drain_notices(&mut notices);
    outcome
}

async fn run(command: Command, config: &Config, dispatcher: &Dispatcher, store: &Store) -> Result<()> {
    let dc = config.data_center.as_str();
    match command {
        Command::Models => {
            let state = store.apply(dispatcher.fetch_model_list().await?).state;
            print!("{}", render::table(&projector::model_table(&state.models)));
        }
        Command::Measurements => {
            let state = store.apply(dispatcher.fetch_measurement_list().await?).state;
            for section in projector::measurement_sections(&state.measurements) {
                println!("== {} / {}", section.data_center, section.device_type);
                print!("{}", render::table(&section.table));
            }
        }
        Command::ModelTypes => {
            let state = store.apply(dispatcher.fetch_model_types(dc).await?).state;
            for model_type in &state.model_types {
                println!("{}", model_type);
            }
        }
        Command::DeviceType { device_type } => {
            store.apply(Dispatcher::clear_series());
            let state = store
                .apply(dispatcher.fetch_device_type_data(dc, &device_type).await?)
                .state;
            print!(
                "{}",
                render::table_projection(&projector::multi_series_table(&state.device_type_data))
            );
        }
        Command::Series {
            device_type,
            measurement,
            device,
            filter,
            view,
        } => {
            store.apply(Dispatcher::clear_series());
            let query = SeriesQuery {
                data_center: dc.to_string(),
                device_type,
                measurement,
                device,
                filter: filter.apply(&config.filter),
            };
            let state = store.apply(dispatcher.search(&query).await?).state;
            let out = match (&query.device, view) {
                (Some(device), View::Table) => {
                    render::table_projection(&projector::single_series_table(device, &state.device_data))
                }
                (Some(device), View::Chart) => {
                    render::chart_projection(&projector::single_series_chart(device, &state.device_data))
                }
                (None, View::Table) => {
                    render::table_projection(&projector::multi_series_table(&state.measurement_data))
                }
                (None, View::Chart) => render::chart_projection(&projector::multi_series_chart(
                    &query.measurement,
                    &state.measurement_data,
                )),
            };
            print!("{}", out);
        }
        Command::Build { model_type } => {
            dispatcher.trigger(JobAction::Build, dc, &model_type).await?;
        }
        Command::Train { model_type, filter } => {
            let range = filter.apply(&config.filter).time_range();
            dispatcher.trigger(JobAction::Train(range), dc, &model_type).await?;
        }
        Command::Test { model_type, filter } => {
            let range = filter.apply(&config.filter).time_range();
            dispatcher.trigger(JobAction::Test(range), dc, &model_type).await?;
        }
        Command::Apply { model_type, filter } => {
            let range = filter.apply(&config.filter).time_range();
            dispatcher.trigger(JobAction::Apply(range), dc, &model_type).await?;
        }
        Command::Jobs => {
            let state = store.apply(dispatcher.fetch_job_list(dc).await?).state;
            print!("{}", render::table(&projector::job_table(&state.jobs)));
        }
        Command::JobDetail {
            job,
            whole: true,
            kind,
            ..
        } => {
            let kind = kind.map(DetailKind::from);
            let state = store
                .apply_all(dispatcher.search_job_result(dc, &job, kind).await)
                .state;
            let detail = &state.job_detail;
            let out = match kind {
                Some(kind) => {
                    let half = match kind {
                        DetailKind::Prediction => detail.prediction.clone(),
                        DetailKind::Expectation => detail.expectation.clone(),
                    };
                    render::chart_projection(&projector::single_series_chart(
                        kind.as_str(),
                        &half.unwrap_or_default(),
                    ))
                }
                None => render::chart_projection(&projector::job_detail_chart(&job, detail)),
            };
            print!("{}", out);
            store.apply(Update::JobDetailClear);
        }
        Command::JobDetail {
            job,
            device_type,
            measurement,
            device,
            whole: false,
            ..
        } => {
            let state = store
                .apply(dispatcher.fetch_job_model_mapping(dc, &job).await?)
                .state;
            let mapping = state
                .job_model_mapping
                .as_ref()
                .map(|m| m.properties.device_type_mapping.clone())
                .unwrap_or_default();

            let mut selection = Selection::from_mapping(&mapping);
            if let Some(device_type) = &device_type {
                selection = selection.derive_from_device_type(&mapping, device_type);
            }
            if let Some(measurement) = &measurement {
                selection = selection.derive_from_measurement(&mapping, measurement);
            }
            if let Some(device) = &device {
                selection = selection.with_device(device);
            }
            let Some(target) = selection.device_ref() else {
                bail!("job {} has no device to chart (selection {:?})", job, selection.phase);
            };
            tracing::info!(
                device_type = %target.device_type,
                measurement = %target.measurement,
                device = %target.device,
                "charting job detail"
            );

            let updates = dispatcher.search_job_detail(dc, &job, &target).await;
            let state = store.apply_all(updates).state;
            print!(
                "{}",
                render::chart_projection(&projector::job_detail_chart(&job, &state.job_detail))
            );
            store.apply(Update::JobDetailClear);
        }
        Command::ImportModel { model, file } => {
            dispatcher.import_model(&model, &file).await?;
        }
        Command::Import {
            device_type,
            measurement,
            file,
        } => match measurement {
            Some(measurement) => {
                dispatcher
                    .import_measurement_series(dc, &device_type, &measurement, &file)
                    .await?
            }
            None => dispatcher.import_device_type_series(dc, &device_type, &file).await?,
        },
        Command::Export {
            device_type,
            measurement,
            output,
            filter,
        } => {
            let filter = filter.apply(&config.filter);
            let bytes = match measurement {
                Some(measurement) => {
                    dispatcher
                        .export_measurement_series(dc, &device_type, &measurement, &filter)
                        .await?
                }
                None => {
                    dispatcher
                        .export_device_type_series(dc, &device_type, &filter)
                        .await?
                }
            };
            tokio::fs::write(&output, &bytes)
                .await
                .with_context(|| format!("writing {}", output.display()))?;
            println!("wrote {} bytes to {}", bytes.len(), output.display());
        }
        Command::InitConfig => {
            let path = config.save_to_file()?;
            println!("wrote {}", path.display());
        }
    }
    Ok(())
}

fn drain_notices(notices: &mut tokio::sync::broadcast::Receiver<Notice>) {
    loop {
        match notices.try_recv() {
            Ok(Notice::Alert(alert)) => eprintln!("request failed:\n{}", alert),
            Ok(Notice::JobQueued { action, model_type }) => {
                println!("{} job queued for {}", action, model_type)
            }
            Ok(Notice::Uploaded { target }) => println!("upload to {} succeeded", target),
            Err(TryRecvError::Lagged(missed)) => {
                tracing::warn!(missed, "notices dropped");
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}
