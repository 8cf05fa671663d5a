use std::cell::RefCell;
use std::path::PathBuf;
use std::process::exit;
use std::rc::Rc;

use clap::Parser;
use log::LevelFilter;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use spikegrad::error::SpikeGradError;
use spikegrad::model::Model;
use spikegrad::optim::GradientDescent;
use spikegrad::simulator::{RateConfig, RateSim};
use spikegrad::train::{parse_features, parse_labels, Trainer};

#[derive(Parser, Debug)]
#[command(about = "Train a simulated spiking network and report as JSON")]
struct Args {
    /// JSON array of feature rows
    xs: Option<String>,
    /// JSON array of labels (class ids or one-hot rows)
    ys: Option<String>,
    /// The population sizes, input first
    #[arg(short = 'L', long, value_delimiter = ',', default_value = "2,2")]
    layers: Vec<usize>,
    /// The learning rate of the surrogate gradient descent
    #[arg(long, default_value = "0.1")]
    learning_rate: f64,
    /// The number of training epochs
    #[arg(long, default_value = "10")]
    epochs: usize,
    /// The training/testing split
    #[arg(long, default_value = "0.8")]
    split: f64,
    /// The seed for the simulator and for tie-breaking
    #[arg(long, default_value = "42")]
    seed: u64,
    /// Optional JSON parameter file with pretrained weights and biases
    #[arg(long)]
    parameters: Option<PathBuf>,
    /// Optional log file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(path: &PathBuf) -> Result<(), SpikeGradError> {
    let appender = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d} {l} - {m}\n")))
        .build(path)
        .map_err(|e| SpikeGradError::IOError(e.to_string()))?;
    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(appender)))
        .build(Root::builder().appender("file").build(LevelFilter::Info))
        .map_err(|e| SpikeGradError::IOError(e.to_string()))?;
    log4rs::init_config(config).map_err(|e| SpikeGradError::IOError(e.to_string()))?;
    Ok(())
}

fn run(args: Args) -> Result<(), SpikeGradError> {
    if let Some(path) = &args.log_file {
        init_logging(path)?;
    }
    if args.layers.len() < 2 {
        return Err(SpikeGradError::InvalidParameter(
            "At least an input and an output population are required".to_string(),
        ));
    }

    let sim = Rc::new(RefCell::new(RateSim::new(RateConfig::default(), args.seed)));
    let mut model = Model::build(sim, args.layers[0])?;
    for &size in &args.layers[1..] {
        model.push_dense(size)?;
    }

    let mut trainer = Trainer::new(model);
    if let Some(path) = &args.parameters {
        trainer.load_parameter_file(path)?;
    }

    let data = match (&args.xs, &args.ys) {
        (Some(xs), Some(ys)) => {
            let features = trainer.normaliser().normalise(&parse_features(xs)?);
            let labels = parse_labels(ys, trainer.model().output_size())?;
            Some((features, labels))
        }
        _ => None,
    };

    let mut optimiser = GradientDescent::new(args.learning_rate, args.epochs, args.seed);
    let (xs, ys) = match data {
        Some((xs, ys)) => (Some(xs), Some(ys)),
        None => (None, None),
    };
    trainer.train(&mut optimiser, xs, ys, args.split)?;
    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("{}", e);
        exit(1);
    }
}
