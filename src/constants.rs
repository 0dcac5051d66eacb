use crate::types::CigarOp;
use fxhash::FxHashMap;
use std::sync::OnceLock;

/// The fixed panel of universal single-copy marker genes. Alignments tagged
/// with a gene outside this panel are ignored everywhere.
pub const MARKER_GENES: [&str; 40] = [
    "COG0012", "COG0016", "COG0018", "COG0048", "COG0049", "COG0052", "COG0080", "COG0081",
    "COG0085", "COG0087", "COG0088", "COG0090", "COG0091", "COG0092", "COG0093", "COG0094",
    "COG0096", "COG0097", "COG0098", "COG0099", "COG0100", "COG0102", "COG0103", "COG0124",
    "COG0172", "COG0184", "COG0185", "COG0186", "COG0197", "COG0200", "COG0201", "COG0202",
    "COG0215", "COG0256", "COG0495", "COG0522", "COG0525", "COG0533", "COG0541", "COG0552",
];

pub fn marker_gene_index(tag: &str) -> Option<u8> {
    static LOOKUP: OnceLock<FxHashMap<&'static str, u8>> = OnceLock::new();
    let lookup = LOOKUP.get_or_init(|| {
        MARKER_GENES
            .iter()
            .enumerate()
            .map(|(i, &g)| (g, i as u8))
            .collect()
    });
    lookup.get(tag).copied()
}

/// Fallback per-operation costs used when a model has no mass for an op.
pub fn default_cost(op: CigarOp) -> f64 {
    match op {
        CigarOp::Match | CigarOp::Eq => 1.0,
        CigarOp::Ins | CigarOp::Del => 0.005,
        CigarOp::Diff => 0.01,
        CigarOp::HardClip => 0.001,
        CigarOp::SoftClip => 0.05,
    }
}

pub const EM_CONVERGENCE: f64 = 0.01;
pub const MAX_EM_ITERATIONS: usize = 1000;

/// AS-mode relative score cutoff: rows below this multiple of the per-read
/// best log-likelihood are discarded.
pub const AS_SCORE_SLACK: f64 = 1.1;

pub const WIDTH_MIN_READS: usize = 10;
pub const WIDTH_GENE_RATIO: f64 = 0.7;
pub const WIDTH_SD_MULTIPLIER: f64 = 3.0;

pub const TS_DASHES_BLANK_COLONS_DOT_BLANK: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub const MINIMAP2_BIN: &str = "minimap2";
pub const ALIGNMENT_FILE: &str = "alignments.sam";

pub const REFERENCE_FASTA: &str = "reference.fasta";
pub const TAXONOMY_FILE: &str = "taxonomy.tsv";
pub const GENE2LEN_FILE: &str = "gene2len.tsv";
pub const REF2GENOME_FILE: &str = "reference2genome.tsv";

pub const RAW_TABLE_FILE: &str = "P_rgs_df_raw.tsv";
pub const GENE_TABLE_FILE: &str = "gene_P_rgs_df_raw.tsv";
pub const FILTERED_TABLE_FILE: &str = "P_rgs_df.tsv";
pub const ABUNDANCE_FILE: &str = "relative_abundance.tsv";

pub const CLI_HEADINGS: [&str; 3] = [
    "Scoring Model",
    "Filtering Thresholds",
    "Output Options",
];
