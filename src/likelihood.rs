use crate::constants::AS_SCORE_SLACK;
use crate::db::{gene_tag, GeneLengths};
use crate::model::ModelSet;
use crate::types::{AlnRecord, Interner, LikelihoodTable, ProfileError, ScoringMode};
use fxhash::FxHashMap;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// One scored alignment row, before the gene-length join.
#[derive(Debug, Clone, Copy)]
pub struct RawRow {
    pub read: u32,
    pub target: u32,
    pub gene: u8,
    pub reference: u32,
    pub aln_len: u32,
    pub log_p: f64,
}

pub struct RawTable {
    pub reads: Interner,
    pub references: Interner,
    pub rows: Vec<RawRow>,
}

/// Raw row joined with the gene-length table.
#[derive(Debug, Clone, Copy)]
pub struct GeneRow {
    pub read: u32,
    pub target: u32,
    pub gene: u8,
    pub reference: u32,
    pub aln_len: u32,
    pub gene_len: u32,
    pub aln_len_ratio: f64,
    pub fidelity: f64,
    pub log_p: f64,
}

pub struct GeneTable {
    pub read_names: Vec<String>,
    pub reference_names: Vec<String>,
    pub rows: Vec<GeneRow>,
}

/// Score every mapped alignment with a positive aligner score. CIGAR scoring
/// runs in parallel against the shared read-only model; with no model the
/// aligner score passthrough is used.
pub fn build_raw_table(records: &[AlnRecord], models: Option<&ModelSet>) -> RawTable {
    let mut reads = Interner::default();
    let mut references = Interner::default();
    let mut rows = Vec::new();
    let mut kept: Vec<&AlnRecord> = Vec::new();

    for record in records {
        if record.aln_score <= 0 {
            continue;
        }
        let aln_len = record.aln_len();
        if aln_len == 0 {
            continue;
        }
        rows.push(RawRow {
            read: reads.intern(&record.read_id),
            target: record.target_id,
            gene: record.gene,
            reference: references.intern(&record.reference_name),
            aln_len,
            log_p: 0.0,
        });
        kept.push(record);
    }

    rows.par_iter_mut()
        .zip(kept.par_iter())
        .for_each(|(row, record)| {
            row.log_p = match models {
                None => (record.aln_score as f64 / (2.0 * row.aln_len as f64)).ln(),
                Some(models) => models.score(record.gene, &record.cigar),
            };
        });

    log::info!(
        "Scored {} alignments over {} reads",
        rows.len(),
        reads.len()
    );
    RawTable {
        reads,
        references,
        rows,
    }
}

/// Rescale each row by its read's maximum alignment length so that
/// differently-covered alignments of the same read are comparable.
pub fn normalize_by_read_length(table: &mut RawTable) {
    let mut max_len = vec![0u32; table.reads.len()];
    for row in &table.rows {
        let slot = &mut max_len[row.read as usize];
        *slot = (*slot).max(row.aln_len);
    }
    table
        .rows
        .par_iter_mut()
        .for_each(|row| row.log_p *= max_len[row.read as usize] as f64 / row.aln_len as f64);
}

/// Join rows with the gene-length table, deriving the covered-length ratio
/// and per-base fidelity, and fold the log length-ratio into the
/// log-likelihood. Rows whose reference has no gene-length entry are dropped.
pub fn join_gene_lengths(
    table: RawTable,
    gene_lengths: &GeneLengths,
    ref_weight: f64,
) -> GeneTable {
    let mut rows = Vec::with_capacity(table.rows.len());
    let mut missing = 0usize;
    for row in table.rows {
        let reference = &table.references.names[row.reference as usize];
        let Some(info) = gene_lengths.by_reference.get(reference) else {
            missing += 1;
            continue;
        };
        let aln_len_ratio = row.aln_len as f64 / info.length as f64;
        let fidelity = row.log_p / row.aln_len as f64;
        let mut log_p = row.log_p;
        if ref_weight != 0.0 {
            log_p += ref_weight * aln_len_ratio.ln();
        }
        rows.push(GeneRow {
            read: row.read,
            target: row.target,
            gene: row.gene,
            reference: row.reference,
            aln_len: row.aln_len,
            gene_len: info.length,
            aln_len_ratio,
            fidelity,
            log_p,
        });
    }
    if missing > 0 {
        log::warn!(
            "Dropped {} alignments whose reference is missing from the gene-length table",
            missing
        );
    }
    GeneTable {
        read_names: table.reads.names,
        reference_names: table.references.names,
        rows,
    }
}

/// Apply the quality filters. AS mode compares each row against the read's
/// best log-likelihood and against log(min_fidelity); the CIGAR models
/// threshold the per-base fidelity directly.
pub fn filter_rows(
    table: &mut GeneTable,
    mode: ScoringMode,
    min_aln_len_ratio: f64,
    min_fidelity: f64,
) {
    let before = table.rows.len();
    table
        .rows
        .retain(|r| r.aln_len_ratio >= min_aln_len_ratio && r.log_p.is_finite());
    let after_ratio = table.rows.len();

    match mode {
        ScoringMode::AlnScore => {
            let mut max_log_p = vec![f64::NEG_INFINITY; table.read_names.len()];
            for row in &table.rows {
                let slot = &mut max_log_p[row.read as usize];
                *slot = slot.max(row.log_p);
            }
            let floor = min_fidelity.ln();
            table.rows.retain(|r| {
                r.log_p >= AS_SCORE_SLACK * max_log_p[r.read as usize] && r.log_p >= floor
            });
        }
        ScoringMode::Edit | ScoringMode::Markov => {
            table.rows.retain(|r| r.fidelity >= min_fidelity);
        }
    }
    log::debug!(
        "Filtering: {} rows -> {} after length-ratio -> {} after fidelity",
        before,
        after_ratio,
        table.rows.len()
    );
}

/// Collapse duplicate (read, target) pairs to the best-scoring row and build
/// the columnar table with read and target group indexes.
pub fn dedup_and_finalize(table: GeneTable) -> Result<LikelihoodTable, ProfileError> {
    if table.rows.is_empty() {
        return Err(ProfileError::NoAlignments);
    }
    let mut rows = table.rows;
    rows.par_sort_by(|a, b| {
        a.read
            .cmp(&b.read)
            .then(a.target.cmp(&b.target))
            .then(b.log_p.partial_cmp(&a.log_p).unwrap())
    });
    rows.dedup_by_key(|r| (r.read, r.target));
    Ok(finalize(table.read_names, table.reference_names, rows))
}

fn finalize(
    read_names: Vec<String>,
    reference_names: Vec<String>,
    rows: Vec<GeneRow>,
) -> LikelihoodTable {
    let n_slots = read_names.len();
    let mut read_offsets = vec![0usize; n_slots + 1];
    for row in &rows {
        read_offsets[row.read as usize + 1] += 1;
    }
    for r in 0..n_slots {
        read_offsets[r + 1] += read_offsets[r];
    }

    let mut order: Vec<u32> = (0..rows.len() as u32).collect();
    order.sort_by_key(|&i| rows[i as usize].target);
    let mut targets = Vec::new();
    let mut target_offsets = Vec::new();
    for (pos, &i) in order.iter().enumerate() {
        let t = rows[i as usize].target;
        if targets.last() != Some(&t) {
            targets.push(t);
            target_offsets.push(pos);
        }
    }
    target_offsets.push(order.len());

    LikelihoodTable {
        read_names,
        reference_names,
        read: rows.iter().map(|r| r.read).collect(),
        target: rows.iter().map(|r| r.target).collect(),
        gene: rows.iter().map(|r| r.gene).collect(),
        reference: rows.iter().map(|r| r.reference).collect(),
        aln_len: rows.iter().map(|r| r.aln_len).collect(),
        log_p: rows.iter().map(|r| r.log_p).collect(),
        read_offsets,
        targets,
        target_rows: order,
        target_offsets,
    }
}

pub fn write_raw_table(path: &Path, table: &RawTable) -> std::io::Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "read_id\ttarget_id\tgene\treference\taln_len\tlog_P")?;
    for row in &table.rows {
        writeln!(
            file,
            "{}\t{}\t{}\t{}\t{}\t{}",
            table.reads.names[row.read as usize],
            row.target,
            gene_tag(row.gene),
            table.references.names[row.reference as usize],
            row.aln_len,
            row.log_p
        )?;
    }
    Ok(())
}

pub fn write_gene_table(
    path: &Path,
    table: &GeneTable,
    ref2genome: &FxHashMap<String, String>,
) -> std::io::Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(
        file,
        "read_id\ttarget_id\tgene\treference\tgenome\taln_len\tgene_len\taln_len_ratio\tfidelity\tlog_P"
    )?;
    for row in &table.rows {
        let reference = &table.reference_names[row.reference as usize];
        let genome = ref2genome.get(reference).map(String::as_str).unwrap_or("");
        writeln!(
            file,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            table.read_names[row.read as usize],
            row.target,
            gene_tag(row.gene),
            reference,
            genome,
            row.aln_len,
            row.gene_len,
            row.aln_len_ratio,
            row.fidelity,
            row.log_p
        )?;
    }
    Ok(())
}

pub fn write_filtered_table(path: &Path, table: &LikelihoodTable) -> std::io::Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "read_id\ttarget_id\tgene\treference\taln_len\tlog_P")?;
    for i in 0..table.n_rows() {
        writeln!(
            file,
            "{}\t{}\t{}\t{}\t{}\t{}",
            table.read_names[table.read[i] as usize],
            table.target[i],
            gene_tag(table.gene[i]),
            table.reference_names[table.reference[i] as usize],
            table.aln_len[i],
            table.log_p[i]
        )?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::GeneInfo;
    use crate::types::CigarOp;
    use approx::assert_relative_eq;

    /// Build a finalized table straight from (read, target, gene, reference,
    /// aln_len, log_p) tuples.
    pub(crate) fn table_from_rows(
        row_specs: &[(&str, u32, u8, &str, u32, f64)],
    ) -> LikelihoodTable {
        let mut reads = Interner::default();
        let mut references = Interner::default();
        let rows: Vec<GeneRow> = row_specs
            .iter()
            .map(|&(read, target, gene, reference, aln_len, log_p)| GeneRow {
                read: reads.intern(read),
                target,
                gene,
                reference: references.intern(reference),
                aln_len,
                gene_len: aln_len,
                aln_len_ratio: 1.0,
                fidelity: log_p / aln_len as f64,
                log_p,
            })
            .collect();
        let table = GeneTable {
            read_names: reads.names,
            reference_names: references.names,
            rows,
        };
        dedup_and_finalize(table).unwrap()
    }

    fn gene_lengths_with(entries: &[(&str, u32, u8, u32)]) -> GeneLengths {
        let mut by_reference = FxHashMap::default();
        let mut genes: FxHashMap<u32, fxhash::FxHashSet<u8>> = FxHashMap::default();
        for &(reference, target_id, gene, length) in entries {
            by_reference.insert(
                reference.to_string(),
                GeneInfo {
                    target_id,
                    gene,
                    length,
                },
            );
            genes.entry(target_id).or_default().insert(gene);
        }
        GeneLengths {
            by_reference,
            genes_per_target: genes
                .into_iter()
                .map(|(t, g)| (t, g.len() as u32))
                .collect(),
        }
    }

    fn record(read: &str, reference: &str, score: i64, cigar: Vec<(CigarOp, u32)>) -> AlnRecord {
        AlnRecord {
            read_id: read.to_string(),
            target_id: reference.split(':').next().unwrap().parse().unwrap(),
            gene: 0,
            reference_name: reference.to_string(),
            aln_score: score,
            primary: true,
            cigar,
        }
    }

    #[test]
    fn aligner_score_passthrough() {
        let records = vec![record("r1", "1:COG0012", 100, vec![(CigarOp::Eq, 50)])];
        let table = build_raw_table(&records, None);
        assert_eq!(table.rows.len(), 1);
        assert_relative_eq!(table.rows[0].log_p, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_score_and_zero_length_rows_are_dropped() {
        let records = vec![
            record("r1", "1:COG0012", 0, vec![(CigarOp::Eq, 50)]),
            record("r2", "1:COG0012", 10, vec![(CigarOp::HardClip, 50)]),
            record("r3", "1:COG0012", 10, vec![(CigarOp::Eq, 50)]),
        ];
        let table = build_raw_table(&records, None);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.reads.names, vec!["r3".to_string()]);
    }

    #[test]
    fn normalization_rescales_to_longest_alignment() {
        let records = vec![
            record("r1", "1:COG0012", 100, vec![(CigarOp::Eq, 100)]),
            record("r1", "2:COG0012", 40, vec![(CigarOp::Eq, 50)]),
        ];
        let mut table = build_raw_table(&records, None);
        let short = table.rows[1].log_p;
        normalize_by_read_length(&mut table);
        assert_relative_eq!(table.rows[0].log_p, (100.0f64 / 200.0).ln(), epsilon = 1e-12);
        assert_relative_eq!(table.rows[1].log_p, short * 2.0, epsilon = 1e-12);
    }

    #[test]
    fn length_ratio_filter_drops_short_alignments() {
        let records = vec![
            record("r1", "1:COG0012", 120, vec![(CigarOp::Eq, 60)]),
            record("r2", "1:COG0012", 160, vec![(CigarOp::Eq, 80)]),
        ];
        let table = build_raw_table(&records, None);
        let lengths = gene_lengths_with(&[("1:COG0012", 1, 0, 100)]);
        let mut gene_table = join_gene_lengths(table, &lengths, 0.0);
        filter_rows(&mut gene_table, ScoringMode::AlnScore, 0.75, 0.5);
        assert_eq!(gene_table.rows.len(), 1);
        assert_eq!(
            gene_table.read_names[gene_table.rows[0].read as usize],
            "r2"
        );
    }

    #[test]
    fn reweighting_adds_scaled_log_ratio() {
        let records = vec![record("r1", "1:COG0012", 160, vec![(CigarOp::Eq, 80)])];
        let table = build_raw_table(&records, None);
        let base = table.rows[0].log_p;
        let lengths = gene_lengths_with(&[("1:COG0012", 1, 0, 100)]);
        let gene_table = join_gene_lengths(table, &lengths, 2.0);
        assert_relative_eq!(
            gene_table.rows[0].log_p,
            base + 2.0 * 0.8f64.ln(),
            epsilon = 1e-12
        );
        assert_relative_eq!(gene_table.rows[0].fidelity, base / 80.0, epsilon = 1e-12);
    }

    #[test]
    fn as_mode_keeps_only_near_best_rows() {
        let mut gene_table = GeneTable {
            read_names: vec!["r1".to_string()],
            reference_names: vec!["1:COG0012".to_string(), "2:COG0012".to_string()],
            rows: vec![
                GeneRow {
                    read: 0,
                    target: 1,
                    gene: 0,
                    reference: 0,
                    aln_len: 100,
                    gene_len: 100,
                    aln_len_ratio: 1.0,
                    fidelity: -0.001,
                    log_p: -0.1,
                },
                GeneRow {
                    read: 0,
                    target: 2,
                    gene: 0,
                    reference: 1,
                    aln_len: 100,
                    gene_len: 100,
                    aln_len_ratio: 1.0,
                    fidelity: -0.002,
                    log_p: -0.2,
                },
            ],
        };
        filter_rows(&mut gene_table, ScoringMode::AlnScore, 0.0, 0.5);
        assert_eq!(gene_table.rows.len(), 1);
        assert_eq!(gene_table.rows[0].target, 1);
    }

    #[test]
    fn fidelity_filter_applies_in_model_modes() {
        let mut gene_table = GeneTable {
            read_names: vec!["r1".to_string()],
            reference_names: vec!["1:COG0012".to_string(), "2:COG0012".to_string()],
            rows: vec![
                GeneRow {
                    read: 0,
                    target: 1,
                    gene: 0,
                    reference: 0,
                    aln_len: 100,
                    gene_len: 100,
                    aln_len_ratio: 1.0,
                    fidelity: -0.04,
                    log_p: -4.0,
                },
                GeneRow {
                    read: 0,
                    target: 2,
                    gene: 0,
                    reference: 1,
                    aln_len: 100,
                    gene_len: 100,
                    aln_len_ratio: 1.0,
                    fidelity: -0.7,
                    log_p: -70.0,
                },
            ],
        };
        filter_rows(&mut gene_table, ScoringMode::Edit, 0.0, -0.1);
        assert_eq!(gene_table.rows.len(), 1);
        assert_eq!(gene_table.rows[0].target, 1);
    }

    #[test]
    fn dedup_keeps_best_scoring_row_per_read_target() {
        let table = table_from_rows(&[
            ("r1", 1, 0, "1:COG0012", 100, -12.0),
            ("r1", 1, 1, "1:COG0016", 100, -8.0),
            ("r1", 2, 0, "2:COG0012", 100, -9.0),
        ]);
        assert_eq!(table.n_rows(), 2);
        let r1_rows = table.read_range(0);
        let log_ps: Vec<f64> = table.log_p[r1_rows].to_vec();
        assert!(log_ps.contains(&-8.0));
        assert!(!log_ps.contains(&-12.0));
    }

    #[test]
    fn empty_table_is_a_fatal_error() {
        let gene_table = GeneTable {
            read_names: vec![],
            reference_names: vec![],
            rows: vec![],
        };
        assert!(matches!(
            dedup_and_finalize(gene_table),
            Err(ProfileError::NoAlignments)
        ));
    }

    #[test]
    fn finalized_groups_are_consistent() {
        let table = table_from_rows(&[
            ("r1", 5, 0, "5:COG0012", 100, -1.0),
            ("r2", 3, 0, "3:COG0012", 100, -2.0),
            ("r2", 5, 1, "5:COG0016", 100, -3.0),
            ("r3", 3, 1, "3:COG0016", 100, -4.0),
        ]);
        assert_eq!(table.n_reads(), 3);
        assert_eq!(table.targets, vec![3, 5]);
        let rows_of_3: Vec<u32> = table.target_rows[table.target_range(0)].to_vec();
        assert_eq!(rows_of_3.len(), 2);
        for &row in &rows_of_3 {
            assert_eq!(table.target[row as usize], 3);
        }
    }
}
