use anyhow::{anyhow, Context};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use stvi::color::categorical_palette_named;
use stvi::data::{self, DatasetPayload, DownloadJob, JobOutcome};
use stvi::settings::{CountRange, PoolingMode, VisualMode};
use stvi::synthetic::{self, SyntheticParams};
use stvi::{GeneView, Region, SelectionMode, VisualSettings};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Pooling {
    Reads,
    Genes,
    Tpm,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Normal,
    DynamicRange,
    HeatMap,
    ColorRange,
}

#[derive(Parser)]
#[command(name = "stvi")]
#[command(about = "Load a spatial transcriptomics dataset and report what the gene view would draw.", long_about = None)]
struct Args {
    /// Dataset JSON (chip + features).
    #[arg(value_name = "FILE", conflicts_with = "mock", help_heading = "Input")]
    input: Option<PathBuf>,

    /// Generate a synthetic dataset with about N spots instead of reading one.
    #[arg(long = "mock", value_name = "N", help_heading = "Input")]
    mock: Option<u32>,

    #[arg(long = "seed", value_name = "N", default_value_t = 1, help_heading = "Input")]
    seed: u64,

    /// Save the synthetic dataset here.
    #[arg(long = "write-mock", value_name = "FILE", requires = "mock", help_heading = "Input")]
    write_mock: Option<PathBuf>,

    /// Parse the dataset on a background job instead of memory-mapping it.
    #[arg(long = "background", help_heading = "Input")]
    background: bool,

    /// Visual settings JSON; flags below override it.
    #[arg(short = 's', long = "settings", value_name = "FILE", help_heading = "Settings")]
    settings: Option<PathBuf>,

    #[arg(long = "min-reads", value_name = "N", help_heading = "Settings")]
    min_reads: Option<u32>,

    #[arg(long = "max-reads", value_name = "N", help_heading = "Settings")]
    max_reads: Option<u32>,

    #[arg(long = "pooling", value_enum, help_heading = "Settings")]
    pooling: Option<Pooling>,

    #[arg(long = "mode", value_enum, help_heading = "Settings")]
    mode: Option<Mode>,

    /// Drop features below their gene's estimated read cut-off.
    #[arg(long = "cutoff", help_heading = "Settings")]
    cutoff: bool,

    /// Genes to show (comma separated). Default: all.
    #[arg(short = 'g', long = "genes", value_name = "LIST", value_delimiter = ',', help_heading = "Genes")]
    genes: Vec<String>,

    /// Assign gene colors from a categorical palette (tab10, set1, ...).
    #[arg(long = "palette", value_name = "NAME", help_heading = "Genes")]
    palette: Option<String>,

    /// Select features inside a rectangle: X,Y,W,H.
    #[arg(short = 'r', long = "region", value_name = "X,Y,W,H", value_delimiter = ',', num_args = 4, help_heading = "Selection")]
    region: Vec<f32>,

    /// Print a heat-map legend with N rows.
    #[arg(long = "legend", value_name = "N", help_heading = "Output")]
    legend: Option<usize>,

    #[arg(short = 'v', long = "verbose", value_name = "N", default_value_t = 1, help_heading = "Output")]
    verbose: u8,
}

fn read_payload(args: &Args) -> anyhow::Result<DatasetPayload> {
    if let Some(spots) = args.mock {
        let payload = synthetic::generate(&SyntheticParams::with_spots(spots), args.seed);
        if let Some(path) = &args.write_mock {
            data::write_dataset_file(path, &payload)?;
            log::info!("wrote synthetic dataset to {}", path.display());
        }
        return Ok(payload);
    }
    let path = args
        .input
        .clone()
        .ok_or_else(|| anyhow!("no dataset given (pass a FILE or --mock N)"))?;
    if !args.background {
        return data::load_dataset_file(&path);
    }

    let mut job = DownloadJob::spawn_file(path);
    loop {
        if let Some(outcome) = job.poll() {
            return match outcome {
                JobOutcome::Loaded(payload) => Ok(payload),
                JobOutcome::Failed(e) => Err(e),
                JobOutcome::Cancelled => Err(anyhow!("load cancelled")),
            };
        }
        log::debug!("waiting for job: {}", job.stage());
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn settings_from(args: &Args) -> anyhow::Result<VisualSettings> {
    let mut s = match &args.settings {
        Some(path) => VisualSettings::from_json_file(path)?,
        None => VisualSettings::default(),
    };
    if args.min_reads.is_some() || args.max_reads.is_some() {
        s.reads = CountRange::new(
            args.min_reads.unwrap_or(s.reads.lower),
            args.max_reads.unwrap_or(s.reads.upper),
        );
    }
    if let Some(p) = args.pooling {
        s.pooling = match p {
            Pooling::Reads => PoolingMode::PoolReadsCount,
            Pooling::Genes => PoolingMode::PoolNumberGenes,
            Pooling::Tpm => PoolingMode::PoolTpm,
        };
    }
    if let Some(m) = args.mode {
        s.visual_mode = match m {
            Mode::Normal => VisualMode::Normal,
            Mode::DynamicRange => VisualMode::DynamicRange,
            Mode::HeatMap => VisualMode::HeatMap,
            Mode::ColorRange => VisualMode::ColorRange,
        };
    }
    if args.cutoff {
        s.use_gene_cutoff = true;
    }
    Ok(s)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(match args.verbose {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();

    let payload = read_payload(&args)?;
    let mut view = GeneView::new(settings_from(&args)?);
    if let Some(chip) = &payload.chip {
        view.set_chip(chip.geometry()).context("chip geometry")?;
    }
    view.load(&payload.features).context("load features")?;

    if let Some(palette) = &args.palette {
        let names: Vec<String> = view.catalog().gene_list().iter().map(|g| g.read().name.clone()).collect();
        for (name, color) in names.iter().zip(categorical_palette_named(palette, names.len())) {
            view.set_gene_color(name, color);
        }
    }

    if args.genes.is_empty() {
        view.set_all_genes_selected(true);
    } else {
        let names: Vec<&str> = args.genes.iter().map(String::as_str).collect();
        let missing: Vec<&str> = names.iter().copied().filter(|n| view.catalog().gene(n).is_none()).collect();
        if !missing.is_empty() {
            log::warn!("unknown genes: {}", missing.join(", "));
        }
        view.set_genes_selected(&names, true);
    }

    if let &[x, y, w, h] = args.region.as_slice() {
        view.select_region(&Region::rect(x, y, w, h), SelectionMode::New);
    }

    let summary = view.summary();
    let stats = view.catalog().stats();
    println!("features:        {}", summary.features);
    println!("genes:           {}", summary.genes);
    println!("slots:           {}", summary.slots);
    println!("visible slots:   {}", summary.visible_slots);
    println!("local range:     {} .. {}", summary.local_range.0, summary.local_range.1);
    println!("reads range:     {} .. {}", stats.reads.lower, stats.reads.upper);
    println!("genes per spot:  {} .. {}", stats.genes_per_spot.lower, stats.genes_per_spot.upper);
    println!("selected:        {}", summary.selected);
    if summary.selected > 0 {
        let reads: u64 = view.selected_features().iter().map(|f| f.hits as u64).sum();
        println!("selected reads:  {reads}");
    }

    if let Some(rows) = args.legend {
        for c in view.legend(rows) {
            println!("#{:02x}{:02x}{:02x}", c & 0xff, (c >> 8) & 0xff, (c >> 16) & 0xff);
        }
    }
    Ok(())
}
