//! Binary entry point for the histree inspection CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use histree::{
    admin::{open_history, stats, verify, AdminOpenOptions, VerifyLevel},
    node::Node,
    tree::IGNORE_PROVIDER_VERSION,
    Interval, SeqNum,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "histree",
    version,
    about = "Inspect interval history files",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    open: OpenArgs,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(
        long,
        global = true,
        env = "HISTREE_PROVIDER_VERSION",
        help = "Refuse files written by another provider version"
    )]
    provider_version: Option<u32>,

    #[arg(long, global = true, help = "Override the node cache size (nodes)")]
    cache_nodes: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Print the file header")]
    Info {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },

    #[command(about = "Check the structure of a history file")]
    Verify {
        #[arg(value_name = "FILE")]
        path: PathBuf,
        #[arg(
            long,
            value_enum,
            default_value_t = VerifyLevelArg::Fast,
            help = "Verification level"
        )]
        level: VerifyLevelArg,
    },

    #[command(about = "Report node, interval and cache statistics")]
    Stats {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },

    #[command(about = "List intervals valid at a point in time")]
    Query {
        #[arg(value_name = "FILE")]
        path: PathBuf,
        #[arg(long, allow_hyphen_values = true, help = "Query time")]
        at: i64,
        #[arg(long, help = "Only report this attribute")]
        attribute: Option<u32>,
    },

    #[command(about = "List intervals overlapping a time range")]
    Range {
        #[arg(value_name = "FILE")]
        path: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        start: i64,
        #[arg(long, allow_hyphen_values = true)]
        end: i64,
        #[arg(long, help = "Stop after this many intervals")]
        limit: Option<usize>,
    },

    #[command(about = "Show one node block")]
    Dump {
        #[arg(value_name = "FILE")]
        path: PathBuf,
        #[arg(long, help = "Sequence number of the node")]
        node: u32,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum VerifyLevelArg {
    Fast,
    Full,
}

impl From<VerifyLevelArg> for VerifyLevel {
    fn from(level: VerifyLevelArg) -> Self {
        match level {
            VerifyLevelArg::Fast => VerifyLevel::Fast,
            VerifyLevelArg::Full => VerifyLevel::Full,
        }
    }
}

#[derive(Serialize)]
struct IntervalList {
    count: usize,
    truncated: bool,
    intervals: Vec<Interval>,
}

#[derive(Serialize)]
struct NodeDump {
    kind: histree::node::NodeKind,
    seq: SeqNum,
    parent: SeqNum,
    level: u16,
    start: i64,
    end: i64,
    closed: bool,
    usage_percent: f64,
    children: Vec<histree::node::ChildRef>,
    intervals: Vec<Interval>,
}

impl NodeDump {
    fn new(node: &Node) -> Self {
        Self {
            kind: node.kind(),
            seq: node.seq(),
            parent: node.parent(),
            level: node.level(),
            start: node.start(),
            end: node.end(),
            closed: node.is_closed(),
            usage_percent: node.usage_percent(),
            children: node.children().to_vec(),
            intervals: node.intervals().to_vec(),
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("HISTREE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let open_opts = build_open_options(&cli.open);

    match cli.command {
        Command::Info { path } => {
            let header = open_history(&path, &open_opts)?.header();
            emit(&cli.format, &header, |_| println!("{header}"))?;
        }
        Command::Verify { path, level } => {
            let report = verify(&path, &open_opts, level.into())?;
            emit(&cli.format, &report, |fmt| print_verify_text(fmt, &report))?;
            if !report.success {
                std::process::exit(2);
            }
        }
        Command::Stats { path } => {
            let report = stats(&path, &open_opts)?;
            emit(&cli.format, &report, |fmt| print_stats_text(fmt, &report))?;
        }
        Command::Query {
            path,
            at,
            attribute,
        } => {
            let tree = open_history(&path, &open_opts)?;
            let intervals = match attribute {
                Some(attribute) => tree.query_attribute(at, attribute)?.into_iter().collect(),
                None => tree.query(at)?,
            };
            let list = IntervalList {
                count: intervals.len(),
                truncated: false,
                intervals,
            };
            emit(&cli.format, &list, |fmt| print_intervals_text(fmt, &list))?;
        }
        Command::Range {
            path,
            start,
            end,
            limit,
        } => {
            let list = collect_range(&path, &open_opts, start, end, limit)?;
            emit(&cli.format, &list, |fmt| print_intervals_text(fmt, &list))?;
        }
        Command::Dump { path, node } => {
            let tree = open_history(&path, &open_opts)?;
            let node = tree.read_node(SeqNum(node))?;
            let dump = NodeDump::new(&node);
            emit(&cli.format, &dump, |fmt| print_node_text(fmt, &dump))?;
        }
    }

    Ok(())
}

fn build_open_options(args: &OpenArgs) -> AdminOpenOptions {
    let mut opts = AdminOpenOptions::default();
    opts.provider_version = args.provider_version.unwrap_or(IGNORE_PROVIDER_VERSION);
    if let Some(nodes) = args.cache_nodes {
        opts.node_cache_capacity = nodes.max(1);
    }
    opts
}

fn collect_range(
    path: &Path,
    opts: &AdminOpenOptions,
    start: i64,
    end: i64,
    limit: Option<usize>,
) -> Result<IntervalList, Box<dyn Error>> {
    let tree = open_history(path, opts)?;
    let limit = limit.unwrap_or(usize::MAX);
    let mut intervals = Vec::new();
    let mut truncated = false;
    for item in tree.query_range(start, end)? {
        if intervals.len() == limit {
            truncated = true;
            break;
        }
        intervals.push(item?);
    }
    Ok(IntervalList {
        count: intervals.len(),
        truncated,
        intervals,
    })
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(OutputFormat),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(OutputFormat::Text),
    }
    Ok(())
}

fn print_intervals_text(_: OutputFormat, list: &IntervalList) {
    for interval in &list.intervals {
        println!("{interval}");
    }
    if list.truncated {
        println!("({} intervals shown, more available)", list.count);
    } else {
        println!("({} intervals)", list.count);
    }
}

fn print_node_text(_: OutputFormat, dump: &NodeDump) {
    println!(
        "Node {} ({:?}, level {}) parent={} range=[{}, {}] closed={} usage={:.1}%",
        dump.seq,
        dump.kind,
        dump.level,
        dump.parent,
        dump.start,
        dump.end,
        dump.closed,
        dump.usage_percent
    );
    for child in &dump.children {
        println!("  child {} [{}, {}]", child.seq, child.start, child.end);
    }
    for interval in &dump.intervals {
        println!("  {interval}");
    }
}

fn print_stats_text(_: OutputFormat, report: &histree::admin::StatsReport) {
    println!("{}", report.tree);
    println!();
    println!(
        "Nodes: leaves={} branches={} intervals={} branch_intervals={}",
        report.nodes.leaves,
        report.nodes.branches,
        report.nodes.intervals,
        report.nodes.branch_intervals
    );
    println!(
        "       avg_leaf_usage={:.1}% avg_branch_usage={:.1}% used_bytes={}",
        report.nodes.avg_leaf_usage_percent,
        report.nodes.avg_branch_usage_percent,
        report.nodes.used_bytes
    );
    println!(
        "Cache: capacity={} hits={} misses={}",
        report.cache.capacity, report.cache.hits, report.cache.misses
    );
    println!(
        "Filesystem: size={} expected={} path={}",
        report.filesystem.size_bytes,
        report.filesystem.expected_size_bytes,
        report.filesystem.path
    );
}

fn print_verify_text(_: OutputFormat, report: &histree::admin::VerifyReport) {
    println!(
        "Verify ({:?}) => success={} nodes={} checked={} leaves={} branches={} intervals={}",
        report.level,
        report.success,
        report.counts.node_count,
        report.counts.nodes_checked,
        report.counts.leaves,
        report.counts.branches,
        report.counts.intervals,
    );
    for finding in &report.findings {
        println!("- {:?}: {}", finding.severity, finding.message);
    }
}
