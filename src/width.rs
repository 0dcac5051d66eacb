use crate::constants::{WIDTH_GENE_RATIO, WIDTH_MIN_READS, WIDTH_SD_MULTIPLIER};
use crate::db::GeneLengths;
use crate::types::{Frequencies, LikelihoodTable};
use fxhash::{FxHashMap, FxHashSet};

/// Observed support for one target: distinct reads and distinct marker genes
/// among its likelihood rows, plus the genes the database carries for it.
#[derive(Debug, Clone, Copy)]
struct Support {
    reads: usize,
    genes: usize,
    genes_in_db: usize,
}

/// Expected number of distinct genes hit, and its variance, when `reads`
/// reads each land uniformly on one of `genes_in_db` genes.
fn uniform_hit_moments(genes_in_db: usize, reads: usize) -> (f64, f64) {
    let g = genes_in_db as f64;
    let r = reads as i32;
    let miss = 1.0 - 1.0 / g;
    let expected = g * (1.0 - miss.powi(r));
    let variance = g * miss.powi(r) + g * g * miss * (1.0 - 2.0 / g).powi(r)
        - g * g * miss.powi(2 * r);
    (expected, variance)
}

fn retain(support: Support) -> bool {
    if support.reads == 0 {
        return false;
    }
    if support.reads <= WIDTH_MIN_READS {
        return true;
    }
    let (expected, variance) = uniform_hit_moments(support.genes_in_db, support.reads);
    let genes = support.genes as f64;
    if genes / expected > WIDTH_GENE_RATIO {
        return true;
    }
    support.genes > 1 && expected - genes <= WIDTH_SD_MULTIPLIER * variance.max(0.0).sqrt()
}

/// Remove from the candidate set every target whose read support is spread
/// over implausibly few marker genes under the uniform-hit model.
pub fn apply_width_filter(
    table: &LikelihoodTable,
    gene_lengths: &GeneLengths,
    freqs: &mut Frequencies,
) {
    let mut observed: FxHashMap<u32, (FxHashSet<u32>, FxHashSet<u8>)> = FxHashMap::default();
    for i in 0..table.n_rows() {
        let entry = observed.entry(table.target[i]).or_default();
        entry.0.insert(table.read[i]);
        entry.1.insert(table.gene[i]);
    }

    let before = freqs.len();
    freqs.retain(|target, _| {
        let Some((reads, genes)) = observed.get(target).map(|(r, g)| (r.len(), g.len())) else {
            return false;
        };
        let genes_in_db = gene_lengths
            .genes_per_target
            .get(target)
            .copied()
            .unwrap_or(0) as usize;
        if genes_in_db == 0 {
            log::debug!("Target {} has no gene-length entries; keeping", target);
            return true;
        }
        let support = Support {
            reads,
            genes,
            genes_in_db,
        };
        let keep = retain(support);
        if !keep {
            log::debug!(
                "Width filter removed target {}: {} reads over {}/{} genes",
                target,
                support.reads,
                support.genes,
                support.genes_in_db
            );
        }
        keep
    });
    log::info!(
        "Width filter retained {}/{} candidate targets",
        freqs.len(),
        before
    );
}
