use clap::Parser;
use serde::{Deserialize, Serialize};
use sparsedet::io::load_rgb_image;
use sparsedet::model::ProposalConfig;
use sparsedet::{
    export_state, load_state, ArchConfig, ConvItem, Detections, DetectorConfig, NonzeroReport,
    Preset, PruneSummary, StateDict, TensorRecord,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const SCHEMA_JSON: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/config.schema.json"));
const EXAMPLE_JSON: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/config.example.json"));

#[derive(Parser, Debug)]
#[command(author, version, about = "SparseDet CLI (JSON config driven)")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "config.json")]
    config: PathBuf,
    /// Print the JSON schema and exit.
    #[arg(long)]
    print_schema: bool,
    /// Print an example config and exit.
    #[arg(long)]
    print_example: bool,
    /// Enable tracing output for performance profiling.
    #[arg(long)]
    trace: bool,
}

/// A backbone entry: an output channel count or `"M"` for max pooling.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConvItemConfig {
    Conv(usize),
    Pool(String),
}

impl TryFrom<ConvItemConfig> for ConvItem {
    type Error = String;

    fn try_from(value: ConvItemConfig) -> Result<Self, Self::Error> {
        match value {
            ConvItemConfig::Conv(channels) => Ok(ConvItem::Conv(channels)),
            ConvItemConfig::Pool(tag) if tag == "M" => Ok(ConvItem::MaxPool),
            ConvItemConfig::Pool(tag) => Err(format!("unknown backbone entry '{tag}'")),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ArchConfigJson {
    in_channels: usize,
    features: Vec<ConvItemConfig>,
    mask_conv: bool,
    mask_linear: bool,
    sparse_dense: bool,
    hidden: Vec<usize>,
    pool_size: usize,
    n_class: usize,
    anchor_scales: Vec<f32>,
    anchor_ratios: Vec<f32>,
}

impl Default for ArchConfigJson {
    fn default() -> Self {
        let cfg = ArchConfig::default();
        Self {
            in_channels: cfg.in_channels,
            features: cfg
                .features
                .iter()
                .map(|item| match item {
                    ConvItem::Conv(channels) => ConvItemConfig::Conv(*channels),
                    ConvItem::MaxPool => ConvItemConfig::Pool("M".to_string()),
                })
                .collect(),
            mask_conv: cfg.mask_conv,
            mask_linear: cfg.mask_linear,
            sparse_dense: cfg.sparse_dense,
            hidden: cfg.hidden,
            pool_size: cfg.pool_size,
            n_class: cfg.n_class,
            anchor_scales: cfg.proposals.anchor_scales,
            anchor_ratios: cfg.proposals.anchor_ratios,
        }
    }
}

impl TryFrom<ArchConfigJson> for ArchConfig {
    type Error = String;

    fn try_from(value: ArchConfigJson) -> Result<Self, Self::Error> {
        let features = value
            .features
            .into_iter()
            .map(ConvItem::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ArchConfig {
            in_channels: value.in_channels,
            features,
            mask_conv: value.mask_conv,
            mask_linear: value.mask_linear,
            sparse_dense: value.sparse_dense,
            hidden: value.hidden,
            pool_size: value.pool_size,
            n_class: value.n_class,
            proposals: ProposalConfig {
                anchor_scales: value.anchor_scales,
                anchor_ratios: value.anchor_ratios,
                ..ProposalConfig::default()
            },
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct DetectorConfigJson {
    preset: String,
    score_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    max_candidates_per_class: Option<usize>,
    parallel: bool,
}

impl Default for DetectorConfigJson {
    fn default() -> Self {
        let cfg = DetectorConfig::default();
        Self {
            preset: "evaluate".to_string(),
            score_threshold: None,
            iou_threshold: None,
            max_candidates_per_class: cfg.max_candidates_per_class,
            parallel: cfg.parallel,
        }
    }
}

impl DetectorConfigJson {
    fn to_config(&self) -> Result<DetectorConfig, sparsedet::SparseDetError> {
        let preset: Preset = self.preset.parse()?;
        let mut cfg = DetectorConfig::from_preset(preset);
        if let Some(score) = self.score_threshold {
            cfg.score_threshold = score;
        }
        if let Some(iou) = self.iou_threshold {
            cfg.iou_threshold = iou;
        }
        cfg.max_candidates_per_class = self.max_candidates_per_class;
        cfg.parallel = self.parallel;
        Ok(cfg)
    }
}

fn default_percentile() -> f32 {
    sparsedet::PruningPolicy::DEFAULT_PERCENTILE
}

fn default_sensitivity() -> f32 {
    sparsedet::PruningPolicy::DEFAULT_SENSITIVITY
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum StepConfig {
    PrunePercentile {
        #[serde(default = "default_percentile")]
        q: f32,
    },
    PruneStd {
        #[serde(default = "default_sensitivity")]
        sensitivity: f32,
    },
    Bake,
    Convert,
    ConvertLayer {
        name: String,
    },
    Sparse,
    Dense,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Config {
    checkpoint_path: Option<String>,
    output_checkpoint_path: Option<String>,
    output_path: Option<String>,
    arch: ArchConfigJson,
    detector: DetectorConfigJson,
    compression: Vec<StepConfig>,
    images: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TensorRecordJson {
    shape: Vec<usize>,
    data: Vec<f32>,
}

fn read_state(path: &str) -> Result<StateDict, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(path)?;
    let raw: BTreeMap<String, TensorRecordJson> = serde_json::from_str(&text)?;
    let mut state = StateDict::new();
    for (key, record) in raw {
        state.insert(key, TensorRecord::new(record.shape, record.data)?);
    }
    Ok(state)
}

fn write_state(path: &str, state: StateDict) -> Result<(), Box<dyn std::error::Error>> {
    let raw: BTreeMap<String, TensorRecordJson> = state
        .into_iter()
        .map(|(key, record)| {
            (
                key,
                TensorRecordJson {
                    shape: record.shape,
                    data: record.data,
                },
            )
        })
        .collect();
    fs::write(path, serde_json::to_string(&raw)?)?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct ThresholdRecord {
    layer: String,
    threshold: f32,
}

#[derive(Debug, Serialize)]
struct StepRecord {
    op: &'static str,
    /// Newly pruned weights for prune steps, affected layers otherwise.
    changed: usize,
    thresholds: Vec<ThresholdRecord>,
}

impl StepRecord {
    fn layers(op: &'static str, changed: usize) -> Self {
        Self {
            op,
            changed,
            thresholds: Vec::new(),
        }
    }

    fn pruned(op: &'static str, summary: PruneSummary) -> Self {
        Self {
            op,
            changed: summary.newly_pruned,
            thresholds: summary
                .thresholds
                .into_iter()
                .map(|(layer, threshold)| ThresholdRecord { layer, threshold })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct LayerRecord {
    name: String,
    kind: &'static str,
    nonzero: usize,
    total: usize,
}

#[derive(Debug, Serialize)]
struct NonzeroRecord {
    layers: Vec<LayerRecord>,
    nonzero: usize,
    total: usize,
    compression_rate: Option<f64>,
}

impl From<&NonzeroReport> for NonzeroRecord {
    fn from(report: &NonzeroReport) -> Self {
        Self {
            layers: report
                .layers
                .iter()
                .map(|l| LayerRecord {
                    name: l.name.clone(),
                    kind: l.kind,
                    nonzero: l.nonzero,
                    total: l.total,
                })
                .collect(),
            nonzero: report.nonzero(),
            total: report.total(),
            compression_rate: report.compression_rate(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DetectionRecord {
    image: String,
    boxes: Vec<[f32; 4]>,
    labels: Vec<usize>,
    scores: Vec<f32>,
}

impl DetectionRecord {
    fn new(image: String, detections: Detections) -> Self {
        Self {
            image,
            boxes: detections.boxes.iter().map(|b| b.to_array()).collect(),
            labels: detections.labels,
            scores: detections.scores,
        }
    }
}

#[derive(Debug, Serialize)]
struct Output {
    steps: Vec<StepRecord>,
    nonzeros: NonzeroRecord,
    detections: Vec<DetectionRecord>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive("sparsedet=info".parse()?))
            .with_target(false)
            .init();
    }

    if cli.print_schema {
        println!("{SCHEMA_JSON}");
        return Ok(());
    }
    if cli.print_example {
        println!("{EXAMPLE_JSON}");
        return Ok(());
    }

    let config_text = fs::read_to_string(&cli.config)?;
    let config: Config = serde_json::from_str(&config_text)?;
    if config.arch.n_class < 2 {
        return Err("arch.n_class must count background plus at least one class".into());
    }

    let arch = ArchConfig::try_from(config.arch)?;
    let mut detector = arch.build(config.detector.to_config()?)?;
    if let Some(path) = &config.checkpoint_path {
        load_state(&mut detector, &read_state(path)?)?;
    }

    let mut steps = Vec::with_capacity(config.compression.len());
    let report = {
        let mut ctl = detector.compression();
        for step in config.compression {
            let record = match step {
                StepConfig::PrunePercentile { q } => {
                    StepRecord::pruned("prune_percentile", ctl.prune_global_percentile(q)?)
                }
                StepConfig::PruneStd { sensitivity } => {
                    StepRecord::pruned("prune_std", ctl.prune_by_std(sensitivity)?)
                }
                StepConfig::Bake => StepRecord::layers("bake", ctl.bake_all()?),
                StepConfig::Convert => StepRecord::layers("convert", ctl.convert_to_sparse_dense()?),
                StepConfig::ConvertLayer { name } => {
                    ctl.convert_layer(&name)?;
                    StepRecord::layers("convert_layer", 1)
                }
                StepConfig::Sparse => StepRecord::layers("sparse", ctl.set_sparse()?),
                StepConfig::Dense => StepRecord::layers("dense", ctl.set_dense()?),
            };
            tracing::info!(op = record.op, changed = record.changed, "compression step");
            steps.push(record);
        }
        ctl.nonzero_report()
    };
    tracing::info!("nonzero weights per layer\n{report}");

    if let Some(path) = &config.output_checkpoint_path {
        write_state(path, export_state(&detector))?;
    }

    let mut images = Vec::with_capacity(config.images.len());
    for path in &config.images {
        images.push(load_rgb_image(path)?);
    }
    let detections = detector
        .predict(&images)?
        .into_iter()
        .zip(config.images)
        .map(|(det, image)| DetectionRecord::new(image, det))
        .collect();

    let output = Output {
        steps,
        nonzeros: NonzeroRecord::from(&report),
        detections,
    };
    let json = serde_json::to_string_pretty(&output)?;

    match config.output_path {
        Some(path) => fs::write(path, json)?,
        None => println!("{json}"),
    }

    Ok(())
}
