use clap::Parser;
use log::LevelFilter;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use sha2::{Digest, Sha256};

use ca1_analysis::config::AnalysisConfig;
use ca1_analysis::error::AnalysisError;
use ca1_analysis::store::JsonResultStore;
use ca1_analysis::sweep::{DirectoryTrialSource, ParameterGrid, Sweep, VariantAxis};

#[derive(Parser, Debug)]
struct Args {
    /// The directory holding one subdirectory of trials per variant
    #[arg(long)]
    data: String,
    /// The directory where the variant results are stored
    #[arg(long, default_value = "results")]
    results: String,
    /// An optional configuration file, defaults are used otherwise
    #[arg(long)]
    config: Option<String>,
    /// The sodium conductance scales
    #[arg(long, value_delimiter = ',', default_value = "0.8,1.0,1.2")]
    gna: Vec<f64>,
    /// The potassium conductance scales
    #[arg(long, value_delimiter = ',', default_value = "0.8,1.0,1.2")]
    gk: Vec<f64>,
    /// The third swept parameter, must be one of: noise, weight
    #[arg(long, default_value = "noise")]
    axis: String,
    /// The values of the third swept parameter
    #[arg(long, value_delimiter = ',', default_value = "1.0")]
    values: Vec<f64>,
    /// The number of trials per variant
    #[arg(short = 'n', long, default_value = "15")]
    num_trials: usize,
}

fn main() -> Result<(), AnalysisError> {
    let args = Args::parse();

    let mut hasher = Sha256::new();
    hasher.update(format!("{:?}", args));
    let hash = hasher.finalize();
    let log_path = format!("log/{:x}.log", hash);

    let logfile = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{l} - {m}\n")))
        .build(log_path)
        .map_err(|e| AnalysisError::IOError(e.to_string()))?;

    let config = Config::builder()
        .appender(Appender::builder().build("logfile", Box::new(logfile)))
        .build(Root::builder().appender("logfile").build(LevelFilter::Info))
        .map_err(|e| AnalysisError::IOError(e.to_string()))?;

    log4rs::init_config(config).map_err(|e| AnalysisError::IOError(e.to_string()))?;

    log::info!("{:?}", args);

    let analysis_config = match &args.config {
        Some(path) => AnalysisConfig::load_from(path)?,
        None => AnalysisConfig::default(),
    };

    let axis = match args.axis.as_str() {
        "noise" => VariantAxis::Noise,
        "weight" => VariantAxis::RecurrentWeight,
        other => {
            return Err(AnalysisError::InvalidParameter(format!(
                "Unknown sweep axis {}, must be one of: noise, weight",
                other
            )))
        }
    };
    let grid = ParameterGrid {
        gna: args.gna.clone(),
        gk: args.gk.clone(),
        axis,
        values: args.values.clone(),
    };

    let store = JsonResultStore::new(&args.results, &analysis_config)?;
    log::info!("Results stored in {}", store.dir().display());

    let sweep = Sweep::new(analysis_config, grid, args.num_trials)?;
    let source = DirectoryTrialSource::new(&args.data);
    let summaries = sweep.run(&source, &store)?;
    log::info!("Sweep: done! {} variants summarized", summaries.len());

    for (tag, summary) in summaries.iter() {
        log::info!(
            "{}: {} events {}, delay {:.1} +/- {:.1} ms, mean block duration {:.1} ms, {} failed trials",
            tag,
            summary.event_count,
            summary.percentage_label(),
            summary.average_delay,
            summary.std_delay,
            summary.mean_block_duration,
            summary.failed_trials,
        );
        log::info!(
            "{}: theta {:.3} mV^2 at {:.1} Hz, gamma {:.3} mV^2 at {:.1} Hz over {} trials",
            tag,
            summary.spectral.theta_power,
            summary.spectral.theta_frequency,
            summary.spectral.gamma_power,
            summary.spectral.gamma_frequency,
            summary.spectral.num_trials,
        );
        for (label, rate) in summary.firing_rates.iter() {
            log::info!(
                "{}: {} firing rate {:.2} +/- {:.2} Hz (sem {:.2})",
                tag,
                label,
                rate.mean,
                rate.std,
                rate.sem
            );
        }
    }
    Ok(())
}
