use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::Parser;
use log::{debug, info, LevelFilter};
use sdfsyde_core::{
    headers::DecisionModelHeader, DecisionModel, ExplorationConfiguration,
    ExplorationConfigurationBuilder, ExplorationSolution, SynthesisError,
};
use sdfsyde_exploration::{
    JobSchedulingSolution, ObjectiveWeights, SearchConfiguration, SearchConfigurationBuilder,
};

#[derive(Parser, Debug)]
#[command(
    author = "Rodolfo Jordao",
    about = "Maps and schedules SDF applications onto communicating multicores."
)]
pub struct SynthesisArgs {
    #[arg(
        help = "Decision model files (.json, .msgpack or .cbor) describing the problem, whole or in parts."
    )]
    pub inputs: Vec<PathBuf>,
    #[arg(
        short = 'o',
        long = "output",
        default_value = "run",
        help = "The path where solved decision models (and headers) are stored."
    )]
    pub output_path: PathBuf,
    #[arg(long = "throughput-weight", help = "Weight of the throughput in the cost.")]
    pub throughput_weight: Option<u64>,
    #[arg(long = "latency-weight", help = "Weight of the latency in the cost.")]
    pub latency_weight: Option<u64>,
    #[arg(long, default_value_t = 0, help = "Seed of the randomised tie breaking after restarts.")]
    pub seed: u64,
    #[arg(
        short = 't',
        long = "timeout",
        default_value_t = 0,
        help = "Total exploration time in seconds, 0 for no limit."
    )]
    pub total_timeout: u64,
    #[arg(
        long = "max-sols",
        default_value_t = 0,
        help = "Maximum number of improving solutions, 0 for no limit."
    )]
    pub max_sols: u64,
    #[arg(short = 'w', long = "workers", default_value_t = 1)]
    pub parallel_workers: usize,
    #[arg(long = "max-restarts", default_value_t = 16)]
    pub max_restarts: u64,
    #[arg(
        short = 'v',
        long,
        help = "Log level (error, warn, info, debug or trace). RUST_LOG is used when absent."
    )]
    pub verbosity: Option<String>,
    #[arg(
        long = "schemas",
        help = "Prints decision model schemas from this module.",
        default_value = "false"
    )]
    pub print_schema: bool,
}

impl SynthesisArgs {
    /// The search configuration requested; both weights must be given.
    pub fn search_configuration(&self) -> Result<SearchConfiguration, SynthesisError> {
        let mut builder = SearchConfigurationBuilder::default();
        builder
            .seed(self.seed)
            .max_restarts(self.max_restarts)
            .parallel_workers(self.parallel_workers.max(1))
            .total_timeout(self.total_timeout)
            .max_sols(self.max_sols);
        if let (Some(throughput), Some(latency)) = (self.throughput_weight, self.latency_weight) {
            builder.weights(ObjectiveWeights {
                throughput,
                latency,
            });
        }
        builder.build()
    }

    pub fn exploration_configuration(&self) -> Result<ExplorationConfiguration, SynthesisError> {
        ExplorationConfigurationBuilder::default()
            .total_timeout(self.total_timeout)
            .max_sols(self.max_sols)
            .build()
            .map_err(|e| SynthesisError::MalformedModel(e.to_string()))
    }
}

/// Starts the global logger once; later calls are ignored.
pub fn init_logging(verbosity: Option<&str>) {
    let mut builder = match verbosity {
        Some(v) => {
            let mut b = env_logger::Builder::new();
            b.filter_level(v.parse::<LevelFilter>().unwrap_or(LevelFilter::Info));
            b
        }
        None => env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")),
    };
    if builder.try_init().is_err() {
        debug!("Logger already initialised");
    }
}

/// The JSON schemas of every decision model read or written by the tool.
pub fn decision_models_schemas() -> Vec<String> {
    let mut schemas = sdfsyde_common::decision_models_schemas();
    schemas.extend(sdfsyde_core::decision_models_schemas_gen![JobSchedulingSolution]);
    schemas
}

pub fn load_decision_models(
    paths: &[PathBuf],
) -> Result<Vec<Arc<dyn DecisionModel>>, SynthesisError> {
    let mut models = Vec::with_capacity(paths.len());
    for p in paths {
        let m = sdfsyde_common::load_known_decision_model(p)?;
        debug!("Read {} from {}", m.category(), p.display());
        models.push(m);
    }
    Ok(models)
}

/// Writes every solution, body and header, under `output_path`, numbered in order.
pub fn write_solutions(
    output_path: &Path,
    solutions: &[ExplorationSolution],
) -> Result<Vec<DecisionModelHeader>, SynthesisError> {
    std::fs::create_dir_all(output_path)?;
    let mut headers = Vec::with_capacity(solutions.len());
    for (i, (m, objs)) in solutions.iter().enumerate() {
        let h = m.write_to_dir(output_path, format!("{:0>16}", i).as_str(), "sdfsyde")?;
        info!(
            "Wrote solution {} with {}",
            i,
            sdfsyde_core::objectives_to_string(objs)
        );
        headers.push(h);
    }
    Ok(headers)
}
