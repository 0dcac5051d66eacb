use crate::constants::{EM_CONVERGENCE, MAX_EM_ITERATIONS};
use crate::types::{Frequencies, LikelihoodTable};
use rayon::prelude::*;

/// Numerically stable log(sum(exp(x))). A non-finite maximum is coerced to
/// zero, matching the behavior expected downstream of degenerate inputs.
pub fn log_sum_exp(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let mut max = f64::NEG_INFINITY;
    for v in values.clone() {
        if v > max {
            max = v;
        }
    }
    if !max.is_finite() {
        max = 0.0;
    }
    let sum: f64 = values.map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

pub fn log_sum_exp_slice(values: &[f64]) -> f64 {
    log_sum_exp(values.iter().copied())
}

pub struct EmResult {
    pub frequencies: Frequencies,
    pub iterations: usize,
    pub log_likelihood: f64,
}

struct EStep {
    /// Per-row posterior log P(t|r); NaN for rows dropped this iteration.
    posteriors: Vec<f64>,
    /// Number of distinct reads contributing this iteration.
    n_reads: usize,
    log_likelihood: f64,
}

/// One E-step: per-row joint log-likelihoods, the parallel per-read
/// log-sum-exp reduction, and posterior normalization.
fn e_step(table: &LikelihoodTable, freqs: &Frequencies, joint: &mut Vec<f64>) -> EStep {
    joint.clear();
    joint.par_extend((0..table.n_rows()).into_par_iter().map(|i| {
        match freqs.get(&table.target[i]) {
            Some(&f) => table.log_p[i] + f.ln(),
            None => f64::NAN,
        }
    }));
    let joint: &[f64] = joint;

    // Reads are contiguous after the sort, so each group reduces on its own.
    let per_read: Vec<Option<f64>> = (0..table.n_read_slots())
        .into_par_iter()
        .map(|r| {
            let range = table.read_range(r);
            let live = joint[range].iter().copied().filter(|v| v.is_finite());
            if live.clone().next().is_none() {
                None
            } else {
                Some(log_sum_exp(live))
            }
        })
        .collect();

    let n_reads = per_read.iter().flatten().count();
    let log_likelihood = per_read.iter().flatten().sum();

    let posteriors: Vec<f64> = (0..table.n_rows())
        .into_par_iter()
        .map(|i| match per_read[table.read[i] as usize] {
            Some(s) if joint[i].is_finite() => joint[i] - s,
            _ => f64::NAN,
        })
        .collect();

    EStep {
        posteriors,
        n_reads,
        log_likelihood,
    }
}

/// One M-step: per-target log-sum-exp over posteriors, normalized by the
/// number of contributing reads. Zero entries are dropped.
fn m_step(table: &LikelihoodTable, e: &EStep) -> Frequencies {
    let log_n = (e.n_reads as f64).ln();
    (0..table.targets.len())
        .into_par_iter()
        .filter_map(|i| {
            let rows = table.target_range(i);
            let live = table.target_rows[rows]
                .iter()
                .map(|&row| e.posteriors[row as usize])
                .filter(|v| v.is_finite());
            if live.clone().next().is_none() {
                return None;
            }
            let f = (log_sum_exp(live) - log_n).exp();
            (f > 0.0).then_some((table.targets[i], f))
        })
        .collect()
}

/// Run the EM loop to convergence, then prune low-abundance targets and
/// refit once with the pruned support as the prior.
pub fn run_em(
    table: &LikelihoodTable,
    initial: Frequencies,
    mut on_iteration: impl FnMut(usize, &Frequencies),
) -> EmResult {
    let mut freqs = initial;
    let mut prev_ll = f64::NEG_INFINITY;
    let mut iterations = 0;
    let mut joint = Vec::with_capacity(table.n_rows());

    loop {
        iterations += 1;
        let e = e_step(table, &freqs, &mut joint);
        freqs = m_step(table, &e);
        on_iteration(iterations, &freqs);

        let delta = e.log_likelihood - prev_ll;
        log::debug!(
            "EM iteration {}: LL = {:.6}, delta = {:.6e}, {} targets",
            iterations,
            e.log_likelihood,
            delta,
            freqs.len()
        );
        if delta < -1e-9 {
            log::warn!(
                "EM log-likelihood decreased by {:.3e} at iteration {}",
                -delta,
                iterations
            );
        }
        if delta < EM_CONVERGENCE || iterations >= MAX_EM_ITERATIONS {
            if iterations >= MAX_EM_ITERATIONS {
                log::warn!("EM hit the iteration cap before converging");
            }
            prev_ll = e.log_likelihood;
            break;
        }
        prev_ll = e.log_likelihood;
    }

    // Prune targets below one read's worth of mass, then refit once.
    let low_threshold = 1.0 / table.n_reads() as f64;
    let before = freqs.len();
    freqs.retain(|_, f| *f >= low_threshold);
    log::debug!(
        "Pruned {} low-abundance targets below {:.3e}",
        before - freqs.len(),
        low_threshold
    );

    let e = e_step(table, &freqs, &mut joint);
    let frequencies = m_step(table, &e);

    log::info!(
        "EM converged after {} iterations, final LL = {:.6}, {} targets retained",
        iterations,
        prev_ll,
        frequencies.len()
    );
    EmResult {
        frequencies,
        iterations,
        log_likelihood: e.log_likelihood,
    }
}
