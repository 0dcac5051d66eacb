use clap::ValueEnum;
use fxhash::FxHashMap;
use std::ops::Range;
use std::path::PathBuf;
use thiserror::Error;

pub const OP_COUNT: usize = 7;
/// Markov model states: the seven CIGAR ops plus a terminal symbol.
pub const STATE_COUNT: usize = OP_COUNT + 1;
pub const TERMINAL_STATE: usize = OP_COUNT;

/// CIGAR operations the profiler distinguishes. RefSkip and Pad never occur
/// in the alignments we consume and are dropped at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CigarOp {
    Match,
    Ins,
    Del,
    SoftClip,
    HardClip,
    Eq,
    Diff,
}

impl CigarOp {
    pub const ALL: [CigarOp; OP_COUNT] = [
        CigarOp::Match,
        CigarOp::Ins,
        CigarOp::Del,
        CigarOp::SoftClip,
        CigarOp::HardClip,
        CigarOp::Eq,
        CigarOp::Diff,
    ];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            CigarOp::Match => 0,
            CigarOp::Ins => 1,
            CigarOp::Del => 2,
            CigarOp::SoftClip => 3,
            CigarOp::HardClip => 4,
            CigarOp::Eq => 5,
            CigarOp::Diff => 6,
        }
    }

    /// Ops that accrue edit cost in the multinomial model; Match and Eq are free.
    #[inline]
    pub fn is_cost_bearing(self) -> bool {
        !matches!(self, CigarOp::Match | CigarOp::Eq)
    }

    /// Ops counted towards the alignment length.
    #[inline]
    pub fn in_aln_len(self) -> bool {
        matches!(self, CigarOp::Ins | CigarOp::Eq | CigarOp::Diff)
    }
}

/// One mapped, non-supplementary alignment, already resolved against the
/// reference-name schema and the marker-gene panel.
#[derive(Debug, Clone)]
pub struct AlnRecord {
    pub read_id: String,
    pub target_id: u32,
    pub gene: u8,
    pub reference_name: String,
    pub aln_score: i64,
    /// Not secondary and not supplementary.
    pub primary: bool,
    pub cigar: Vec<(CigarOp, u32)>,
}

impl AlnRecord {
    pub fn aln_len(&self) -> u32 {
        self.cigar
            .iter()
            .filter(|(op, _)| op.in_aln_len())
            .map(|&(_, len)| len)
            .sum()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum ScoringMode {
    /// Aligner-reported score passthrough.
    #[value(name = "AS")]
    AlnScore,
    /// Per-operation multinomial over edit costs.
    #[value(name = "edit")]
    Edit,
    /// First-order Markov chain over CIGAR operations.
    #[value(name = "markov")]
    Markov,
}

/// How reference sequence names encode the target and gene.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReferenceSchema {
    /// `<target_id>:<...>/<gene_tag>` -- the gene tag is the final
    /// `/`-separated component of the second colon field.
    ColonGene,
    /// `<target_id>_<suffix>` with the gene tag at the end of the suffix.
    UnderscoreSuffix,
}

/// Relative abundance estimate over targets; values strictly positive.
pub type Frequencies = FxHashMap<u32, f64>;

/// String interner used for read and reference identifiers.
#[derive(Default)]
pub struct Interner {
    lookup: FxHashMap<String, u32>,
    pub names: Vec<String>,
}

impl Interner {
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.lookup.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.lookup.insert(name.to_string(), id);
        self.names.push(name.to_string());
        id
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// The P(r|t) likelihood table in columnar form. Rows are sorted by
/// (read, target); `read_offsets` indexes the contiguous span of each read
/// and the target grouping indexes rows per distinct target for the M-step.
pub struct LikelihoodTable {
    pub read_names: Vec<String>,
    pub reference_names: Vec<String>,
    pub read: Vec<u32>,
    pub target: Vec<u32>,
    pub gene: Vec<u8>,
    pub reference: Vec<u32>,
    pub aln_len: Vec<u32>,
    pub log_p: Vec<f64>,
    /// Length `read_names.len() + 1`; empty spans are allowed for reads whose
    /// rows were all filtered away.
    pub read_offsets: Vec<usize>,
    /// Distinct targets in ascending order.
    pub targets: Vec<u32>,
    /// Row indices grouped by target, indexed by `target_offsets`.
    pub target_rows: Vec<u32>,
    pub target_offsets: Vec<usize>,
}

impl LikelihoodTable {
    pub fn n_rows(&self) -> usize {
        self.read.len()
    }

    pub fn n_read_slots(&self) -> usize {
        self.read_names.len()
    }

    /// Distinct reads that still own at least one row.
    pub fn n_reads(&self) -> usize {
        (0..self.n_read_slots())
            .filter(|&r| self.read_offsets[r + 1] > self.read_offsets[r])
            .count()
    }

    pub fn read_range(&self, r: usize) -> Range<usize> {
        self.read_offsets[r]..self.read_offsets[r + 1]
    }

    pub fn target_range(&self, i: usize) -> Range<usize> {
        self.target_offsets[i]..self.target_offsets[i + 1]
    }
}

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("aligner exited with code {code}: {stderr}")]
    AlignerFailed { code: i32, stderr: String },

    #[error("required input file not found: {0}")]
    MissingInputFile(PathBuf),

    #[error("{path}: {detail}")]
    SchemaMismatch { path: PathBuf, detail: String },

    #[error(
        "no alignments passed filtering; consider lowering --min-aln-len-ratio or --min-fidelity"
    )]
    NoAlignments,

    #[error("unknown taxonomic rank: {0}")]
    InvalidRank(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("alignment file: {0}")]
    Hts(#[from] rust_htslib::errors::Error),
}

impl ProfileError {
    /// Process exit code reported for this error; aligner failures propagate
    /// the aligner's own code.
    pub fn exit_code(&self) -> i32 {
        match self {
            ProfileError::AlignerFailed { code, .. } => *code,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_indices_are_dense() {
        for (i, op) in CigarOp::ALL.iter().enumerate() {
            assert_eq!(op.index(), i);
        }
        assert!(TERMINAL_STATE >= OP_COUNT);
    }

    #[test]
    fn aln_len_counts_ins_eq_diff() {
        let rec = AlnRecord {
            read_id: "r".to_string(),
            target_id: 1,
            gene: 0,
            reference_name: "1:COG0012".to_string(),
            aln_score: 10,
            primary: true,
            cigar: vec![
                (CigarOp::SoftClip, 5),
                (CigarOp::Eq, 40),
                (CigarOp::Ins, 3),
                (CigarOp::Del, 2),
                (CigarOp::Diff, 7),
                (CigarOp::HardClip, 11),
            ],
        };
        assert_eq!(rec.aln_len(), 50);
    }

    #[test]
    fn interner_round_trip() {
        let mut interner = Interner::default();
        let a = interner.intern("read_1");
        let b = interner.intern("read_2");
        assert_eq!(interner.intern("read_1"), a);
        assert_ne!(a, b);
        assert_eq!(interner.names[a as usize], "read_1");
    }
}
