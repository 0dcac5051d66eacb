use crate::constants::CLI_HEADINGS;
use crate::types::ScoringMode;
use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "loris",
    about = "loris - taxonomic profiling of long-read metagenomes over universal marker genes.\n\nEXAMPLE (Nanopore): loris nanopore_reads.fq.gz -d loris_db -o output_directory -t 50\nEXAMPLE (prebuilt SAM): loris -d loris_db --sam-input alignments.sam -o output_directory",
    version,
    author
)]
#[derive(Clone)]
pub struct Cli {
    /// Input read file (FASTA/FASTQ, possibly gzipped); handed to the aligner
    #[arg(value_name = "READS", required_unless_present = "sam_input")]
    pub input: Option<String>,

    /// Output directory for results; recreated if it already exists
    #[arg(short, long, default_value = "loris-out")]
    pub output: String,

    /// Directory containing the marker-gene reference and its auxiliary tables
    #[arg(short, long, required = true)]
    pub db_prefix: String,

    /// Taxonomy file; defaults to taxonomy.tsv under the database directory
    #[arg(long)]
    pub tax_path: Option<String>,

    /// Number of threads to use for processing
    #[arg(short = 't', long, default_value_t = 20)]
    pub num_threads: usize,

    /// Scoring model for read-to-target likelihoods
    #[arg(long, value_enum, default_value = "AS", help_heading = CLI_HEADINGS[0])]
    pub aln_score: ScoringMode,

    /// Train one CIGAR model per marker gene instead of a single global model
    #[arg(long, help_heading = CLI_HEADINGS[0])]
    pub aln_score_gene: bool,

    /// Taxonomic rank for the collapsed abundance table
    #[arg(long, default_value = "species", help_heading = CLI_HEADINGS[2])]
    pub rank: String,

    /// Discard alignments covering less than this fraction of the marker gene
    #[arg(long, default_value_t = 0.75, help_heading = CLI_HEADINGS[1])]
    pub min_aln_len_ratio: f64,

    /// Minimum per-base alignment fidelity
    #[arg(long, default_value_t = 0.50, help_heading = CLI_HEADINGS[1])]
    pub min_fidelity: f64,

    /// Weight applied to the log length-ratio when adjusting likelihoods
    #[arg(long, default_value_t = 1.0, help_heading = CLI_HEADINGS[1])]
    pub ref_weight: f64,

    /// Use this alignment file and skip the aligner invocation
    #[arg(long, value_name = "SAM/BAM")]
    pub sam_input: Option<String>,

    /// Write the abundance estimate after every EM iteration
    #[arg(long, help_heading = CLI_HEADINGS[2])]
    pub save_intermediate_profile: bool,

    /// Remove targets whose read support spans too few marker genes
    #[arg(long, help_heading = CLI_HEADINGS[1])]
    pub width_filter: bool,

    /// Reference names use the <target>_<suffix> form
    #[arg(long)]
    pub gid_name: bool,

    /// Keep the alignment file produced by the aligner after the run
    #[arg(long, help_heading = CLI_HEADINGS[2])]
    pub keep_alignments: bool,

    /// Verbosity level. Warning: trace is very verbose
    #[arg(short, long, value_enum, default_value = "debug")]
    pub log_level: LogLevel,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Debug
    }
}

impl Cli {
    pub fn log_level_filter(&self) -> log::LevelFilter {
        match self.log_level {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}
