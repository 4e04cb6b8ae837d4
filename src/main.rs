use clap::Parser;
use log::{error, info};
use rayon::current_num_threads;
use regex::Regex;

use issdecode::assign::assign_by_label;
use issdecode::codebook::Codebook;
use issdecode::decode::QualityThresholds;
use issdecode::error::Result;
use issdecode::expression::ExpressionMatrix;
use issdecode::input::{read_label_image, read_spot_table, SpotTableColumns};
use issdecode::intensity::IntensityTable;
use issdecode::output::{write_decoded_spots, write_expression_matrix, write_target_counts};
use issdecode::schemas::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "issdecode")]
#[command(about = "Decode in situ sequencing spots against a codebook by per-round maximum.")]
struct Args {
    /// Spot table (csv or csv.gz), one row per (spot, round, channel).
    spots: String,

    /// Codebook: SpaceTx json, or csv with `target` and `code` columns.
    codebook: String,

    /// Symbols of a csv codebook's code strings, in channel order.
    #[arg(long, default_value = "0123456789")]
    code_alphabet: String,

    /// Treat every row as a separate spot instead of matching spots across
    /// (round, channel) by spot id.
    #[arg(long, default_value_t = false)]
    sequential: bool,

    #[arg(long, default_value = "spot_id")]
    spot_id_column: String,

    #[arg(long, default_value = "round")]
    round_column: String,

    #[arg(long, default_value = "ch")]
    ch_column: String,

    #[arg(long, default_value = "y")]
    y_column: String,

    #[arg(long, default_value = "x")]
    x_column: String,

    #[arg(long, default_value = "z")]
    z_column: String,

    #[arg(long, default_value = "radius")]
    radius_column: String,

    #[arg(long, default_value = "intensity")]
    intensity_column: String,

    /// Every round's selected intensity must be at least this.
    #[arg(long, default_value = None)]
    min_intensity: Option<f32>,

    /// Every round's selected intensity over the round's L2 norm must be at
    /// least this.
    #[arg(long, default_value = None)]
    min_distinctness: Option<f32>,

    /// Count targets over all matched spots, not only those passing thresholds.
    #[arg(long, default_value_t = false)]
    count_failing: bool,

    /// Regex of targets left out of target counts and the expression matrix.
    #[arg(long, default_value = None)]
    excluded_targets: Option<String>,

    /// Segmentation label image as a headerless csv grid (0 is background).
    #[arg(long, default_value = None)]
    labels: Option<String>,

    #[arg(long, default_value = "decoded-spots.csv.gz")]
    output_decoded_spots: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Infer)]
    output_decoded_spots_fmt: OutputFormat,

    #[arg(long, default_value = "target-counts.csv")]
    output_target_counts: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Infer)]
    output_target_counts_fmt: OutputFormat,

    #[arg(long, default_value = "expression.csv.gz")]
    output_expression: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Infer)]
    output_expression_fmt: OutputFormat,

    #[arg(long, default_value = None)]
    nthreads: Option<usize>,
}

fn run(args: Args) -> Result<()> {
    let columns = SpotTableColumns {
        spot_id: args.spot_id_column,
        round: args.round_column,
        ch: args.ch_column,
        y: args.y_column,
        x: args.x_column,
        intensity: args.intensity_column,
        z: Some(args.z_column),
        radius: Some(args.radius_column),
    };

    let results = read_spot_table(&args.spots, &columns)?;
    let codebook = Codebook::read(&args.codebook, &args.code_alphabet)?;

    let table = if args.sequential {
        IntensityTable::from_spot_results_sequential(&results)?
    } else {
        IntensityTable::from_spot_results_exact_match(&results)?
    };

    let thresholds = QualityThresholds {
        min_intensity: args.min_intensity,
        min_distinctness: args.min_distinctness,
    };
    let decoded = codebook.decode_per_round_max(table, &thresholds)?;

    let excluded_targets = args
        .excluded_targets
        .as_deref()
        .map(Regex::new)
        .transpose()?;

    if let Some(output_decoded_spots) = &args.output_decoded_spots {
        write_decoded_spots(output_decoded_spots, args.output_decoded_spots_fmt, &decoded)?;
    }

    if let Some(output_target_counts) = &args.output_target_counts {
        let counts: Vec<(String, usize)> = decoded
            .target_counts(!args.count_failing)
            .into_iter()
            .filter(|(target, _)| {
                !excluded_targets
                    .as_ref()
                    .is_some_and(|re| re.is_match(target))
            })
            .collect();
        for (target, count) in counts.iter().take(10) {
            info!("  {}: {}", target, count);
        }
        write_target_counts(output_target_counts, args.output_target_counts_fmt, &counts)?;
    }

    if let Some(labels) = &args.labels {
        let labels = read_label_image(labels)?;
        let assignments = assign_by_label(&decoded, labels.view());
        let matrix = ExpressionMatrix::from_decoded(&decoded, &assignments, excluded_targets.as_ref())?;
        if let Some(output_expression) = &args.output_expression {
            write_expression_matrix(output_expression, args.output_expression_fmt, &matrix)?;
        }
    }

    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if let Some(nthreads) = args.nthreads {
        if let Err(err) = rayon::ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .build_global()
        {
            error!("Unable to set up thread pool: {}", err);
            std::process::exit(1);
        }
    }
    info!("Using {} threads", current_num_threads());

    if let Err(err) = run(args) {
        error!("{}", err);
        std::process::exit(1);
    }
}
