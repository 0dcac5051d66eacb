use crate::constants::default_cost;
use crate::types::{AlnRecord, CigarOp, ScoringMode, OP_COUNT, STATE_COUNT, TERMINAL_STATE};
use fxhash::FxHashMap;

/// A trained CIGAR scoring model.
///
/// Multinomial: per-operation cost probabilities, Match and Eq fixed at 1.
/// Markov: row-stochastic transition matrix over the op alphabet plus the
/// terminal symbol; rows with no observed mass are all-zero.
#[derive(Debug, Clone)]
pub enum CigarModel {
    Multinomial([f64; OP_COUNT]),
    Markov([[f64; STATE_COUNT]; STATE_COUNT]),
}

impl CigarModel {
    pub fn score(&self, cigar: &[(CigarOp, u32)]) -> f64 {
        match self {
            CigarModel::Multinomial(costs) => score_multinomial(cigar, costs),
            CigarModel::Markov(transitions) => score_markov(cigar, transitions),
        }
    }
}

/// Log-likelihood of a CIGAR under the multinomial model. Terminal HardClips
/// are charged here, unlike in the Markov model.
pub fn score_multinomial(cigar: &[(CigarOp, u32)], costs: &[f64; OP_COUNT]) -> f64 {
    cigar
        .iter()
        .map(|&(op, len)| len as f64 * costs[op.index()].ln())
        .sum()
}

/// Log-likelihood of a CIGAR under the Markov model. Leading and trailing
/// HardClips are skipped; Match never participates since the aligner
/// invocation emits Eq/X in its place.
pub fn score_markov(
    cigar: &[(CigarOp, u32)],
    transitions: &[[f64; STATE_COUNT]; STATE_COUNT],
) -> f64 {
    let last = cigar.len().saturating_sub(1);
    let mut log_p = 0.0;
    let mut prev: Option<usize> = None;
    for (i, &(op, len)) in cigar.iter().enumerate() {
        if op == CigarOp::HardClip && (i == 0 || i == last) {
            continue;
        }
        if op == CigarOp::Match {
            continue;
        }
        let run = (len as f64) - 1.0;
        let self_p = transitions[op.index()][op.index()];
        if self_p > 0.0 {
            log_p += run * self_p.ln();
        } else {
            log_p += run * default_cost(op).ln();
        }
        if let Some(p) = prev {
            let step = transitions[p][op.index()];
            if step > 0.0 {
                log_p += step.ln();
            }
        }
        prev = Some(op.index());
    }
    log_p
}

/// Empirical multinomial costs over cost-bearing ops: each cost is the base
/// fraction of that op among all cost-bearing bases. Falls back to the fixed
/// defaults for ops with no observations.
pub fn train_multinomial<'a, I>(cigars: I) -> [f64; OP_COUNT]
where
    I: Iterator<Item = &'a [(CigarOp, u32)]>,
{
    let mut counts = [0u64; OP_COUNT];
    for cigar in cigars {
        for &(op, len) in cigar {
            if op.is_cost_bearing() {
                counts[op.index()] += len as u64;
            }
        }
    }
    let total: u64 = counts.iter().sum();

    let mut costs = [1.0; OP_COUNT];
    for op in CigarOp::ALL {
        if !op.is_cost_bearing() {
            continue;
        }
        let n = counts[op.index()];
        if total == 0 || n == 0 {
            costs[op.index()] = default_cost(op);
        } else {
            costs[op.index()] = n as f64 / total as f64;
        }
    }
    costs
}

/// Transition matrix over CIGAR ops: within-run self transitions weighted by
/// run length, one count per op-to-op step, and a final step into the
/// terminal state. Rows with zero mass stay zero.
pub fn train_markov<'a, I>(cigars: I) -> [[f64; STATE_COUNT]; STATE_COUNT]
where
    I: Iterator<Item = &'a [(CigarOp, u32)]>,
{
    let mut counts = [[0u64; STATE_COUNT]; STATE_COUNT];
    for cigar in cigars {
        let last = cigar.len().saturating_sub(1);
        let mut prev: Option<usize> = None;
        for (i, &(op, len)) in cigar.iter().enumerate() {
            if op == CigarOp::HardClip && (i == 0 || i == last) {
                continue;
            }
            let idx = op.index();
            counts[idx][idx] += (len as u64).saturating_sub(1);
            if let Some(p) = prev {
                counts[p][idx] += 1;
            }
            prev = Some(idx);
        }
        if let Some(p) = prev {
            counts[p][TERMINAL_STATE] += 1;
        }
    }

    let mut transitions = [[0.0; STATE_COUNT]; STATE_COUNT];
    for (row, count_row) in counts.iter().enumerate() {
        let row_sum: u64 = count_row.iter().sum();
        if row_sum == 0 {
            continue;
        }
        for (col, &c) in count_row.iter().enumerate() {
            transitions[row][col] = c as f64 / row_sum as f64;
        }
    }
    transitions
}

/// A global model plus optional per-gene overrides; genes with no training
/// data score with the global model.
pub struct ModelSet {
    pub global: CigarModel,
    pub per_gene: FxHashMap<u8, CigarModel>,
}

impl ModelSet {
    pub fn score(&self, gene: u8, cigar: &[(CigarOp, u32)]) -> f64 {
        self.per_gene
            .get(&gene)
            .unwrap_or(&self.global)
            .score(cigar)
    }
}

fn train_one<'a, I>(mode: ScoringMode, cigars: I) -> CigarModel
where
    I: Iterator<Item = &'a [(CigarOp, u32)]>,
{
    match mode {
        ScoringMode::Edit => CigarModel::Multinomial(train_multinomial(cigars)),
        ScoringMode::Markov => CigarModel::Markov(train_markov(cigars)),
        ScoringMode::AlnScore => unreachable!("AS mode does not train a model"),
    }
}

/// Train the CIGAR model(s) from primary alignments. Returns None in AS mode.
pub fn train_models(
    records: &[AlnRecord],
    mode: ScoringMode,
    per_gene: bool,
) -> Option<ModelSet> {
    if mode == ScoringMode::AlnScore {
        return None;
    }
    let primaries = || {
        records
            .iter()
            .filter(|r| r.primary)
            .map(|r| r.cigar.as_slice())
    };
    let global = train_one(mode, primaries());

    let mut gene_models = FxHashMap::default();
    if per_gene {
        let mut by_gene: FxHashMap<u8, Vec<&[(CigarOp, u32)]>> = FxHashMap::default();
        for record in records.iter().filter(|r| r.primary) {
            by_gene
                .entry(record.gene)
                .or_default()
                .push(record.cigar.as_slice());
        }
        for (gene, cigars) in by_gene {
            gene_models.insert(gene, train_one(mode, cigars.into_iter()));
        }
        log::debug!("Trained {} per-gene CIGAR models", gene_models.len());
    }

    Some(ModelSet {
        global,
        per_gene: gene_models,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn markov_training_single_cigar() {
        let cigar: Vec<(CigarOp, u32)> = vec![(CigarOp::Eq, 5), (CigarOp::Diff, 1), (CigarOp::Eq, 5)];
        let t = train_markov(std::iter::once(cigar.as_slice()));

        let eq = CigarOp::Eq.index();
        let x = CigarOp::Diff.index();
        assert_relative_eq!(t[eq][eq], 8.0 / 10.0);
        assert_relative_eq!(t[eq][x], 1.0 / 10.0);
        assert_relative_eq!(t[eq][TERMINAL_STATE], 1.0 / 10.0);
        assert_relative_eq!(t[x][eq], 1.0);
        for col in 0..STATE_COUNT {
            if col != eq && col != x && col != TERMINAL_STATE {
                assert_eq!(t[eq][col], 0.0);
            }
        }
    }

    #[test]
    fn edit_training_base_fractions() {
        let a: Vec<(CigarOp, u32)> = vec![(CigarOp::Eq, 100), (CigarOp::Ins, 10), (CigarOp::Diff, 2)];
        let b: Vec<(CigarOp, u32)> = vec![(CigarOp::Del, 5), (CigarOp::Diff, 3), (CigarOp::Eq, 50)];
        let costs = train_multinomial([a.as_slice(), b.as_slice()].into_iter());

        assert_relative_eq!(costs[CigarOp::Ins.index()], 0.5);
        assert_relative_eq!(costs[CigarOp::Del.index()], 0.25);
        assert_relative_eq!(costs[CigarOp::Diff.index()], 0.25);
        assert_relative_eq!(costs[CigarOp::Match.index()], 1.0);
        assert_relative_eq!(costs[CigarOp::Eq.index()], 1.0);
        // unobserved cost-bearing ops fall back to the fixed defaults
        assert_relative_eq!(costs[CigarOp::SoftClip.index()], 0.05);
        assert_relative_eq!(costs[CigarOp::HardClip.index()], 0.001);
    }

    #[test]
    fn edit_training_empty_falls_back() {
        let costs = train_multinomial(std::iter::empty::<&[(CigarOp, u32)]>());
        assert_relative_eq!(costs[CigarOp::Ins.index()], 0.005);
        assert_relative_eq!(costs[CigarOp::Del.index()], 0.005);
        assert_relative_eq!(costs[CigarOp::Diff.index()], 0.01);
        assert_relative_eq!(costs[CigarOp::SoftClip.index()], 0.05);
        assert_relative_eq!(costs[CigarOp::HardClip.index()], 0.001);
    }

    #[test]
    fn multinomial_score_is_additive_over_concatenation() {
        let costs = train_multinomial(std::iter::empty::<&[(CigarOp, u32)]>());
        let a: Vec<(CigarOp, u32)> = vec![(CigarOp::Eq, 30), (CigarOp::Ins, 2)];
        let b: Vec<(CigarOp, u32)> = vec![(CigarOp::Diff, 1), (CigarOp::Eq, 20)];
        let joined: Vec<(CigarOp, u32)> = a.iter().chain(b.iter()).copied().collect();

        let sum = score_multinomial(&a, &costs) + score_multinomial(&b, &costs);
        assert_relative_eq!(score_multinomial(&joined, &costs), sum, epsilon = 1e-12);
    }

    #[test]
    fn hardclip_only_cigar() {
        let cigar: Vec<(CigarOp, u32)> = vec![(CigarOp::HardClip, 7)];
        let costs = train_multinomial(std::iter::empty::<&[(CigarOp, u32)]>());
        assert_relative_eq!(
            score_multinomial(&cigar, &costs),
            7.0 * 0.001f64.ln(),
            epsilon = 1e-12
        );

        let t = [[0.0; STATE_COUNT]; STATE_COUNT];
        assert_eq!(score_markov(&cigar, &t), 0.0);
    }

    #[test]
    fn markov_score_uses_defaults_for_zero_rows() {
        // no mass anywhere: every self transition falls back to default costs
        let t = [[0.0; STATE_COUNT]; STATE_COUNT];
        let cigar: Vec<(CigarOp, u32)> = vec![(CigarOp::Eq, 5), (CigarOp::Diff, 2)];
        let expected = 4.0 * 1.0f64.ln() + 1.0 * 0.01f64.ln();
        assert_relative_eq!(score_markov(&cigar, &t), expected, epsilon = 1e-12);
    }

    #[test]
    fn markov_score_skips_terminal_hardclips_only() {
        let mut t = [[0.0; STATE_COUNT]; STATE_COUNT];
        let eq = CigarOp::Eq.index();
        let h = CigarOp::HardClip.index();
        t[eq][eq] = 0.9;
        t[eq][h] = 0.05;
        t[h][eq] = 1.0;

        // interior hardclip is charged, terminal ones are not
        let cigar: Vec<(CigarOp, u32)> = vec![
            (CigarOp::HardClip, 3),
            (CigarOp::Eq, 4),
            (CigarOp::HardClip, 2),
            (CigarOp::Eq, 4),
            (CigarOp::HardClip, 5),
        ];
        let expected = 3.0 * 0.9f64.ln()
            + 1.0 * 0.001f64.ln() // interior hardclip self-run, zero self mass
            + 0.05f64.ln()
            + 3.0 * 0.9f64.ln()
            + 1.0f64.ln();
        assert_relative_eq!(score_markov(&cigar, &t), expected, epsilon = 1e-12);
    }
}
