use crate::alignment;
use crate::cli::Cli;
use crate::constants::*;
use crate::db::{self, GeneLengths, Taxonomy};
use crate::em;
use crate::likelihood;
use crate::model;
use crate::types::{ProfileError, ReferenceSchema};
use crate::utils::log_memory_usage;
use crate::width;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Run one full profiling pass: alignment, model training, likelihood table
/// construction, EM, and output tables.
pub fn run(args: &Cli) -> Result<(), ProfileError> {
    let total_start = Instant::now();
    let out_dir = Path::new(&args.output);
    let db_dir = Path::new(&args.db_prefix);
    let schema = if args.gid_name {
        ReferenceSchema::UnderscoreSuffix
    } else {
        ReferenceSchema::ColonGene
    };

    // Validate the requested rank before doing any heavy lifting.
    let rank = db::rank_index(&args.rank)?;

    let tax_path = args
        .tax_path
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| db_dir.join(TAXONOMY_FILE));
    let taxonomy = Taxonomy::load(&tax_path)?;
    log::info!("Loaded {} taxonomy entries", taxonomy.lineages.len());
    let gene_lengths = GeneLengths::load(&db_dir.join(GENE2LEN_FILE), schema)?;
    log::info!(
        "Loaded {} gene-length entries over {} targets",
        gene_lengths.by_reference.len(),
        gene_lengths.genes_per_target.len()
    );
    let ref2genome = db::load_reference2genome(&db_dir.join(REF2GENOME_FILE))?;
    log_memory_usage(false, "Loaded database tables");

    let (sam_path, user_supplied_sam) = match &args.sam_input {
        Some(path) => (PathBuf::from(path), true),
        None => {
            let sam_path = out_dir.join(ALIGNMENT_FILE);
            let reads = args.input.as_deref().unwrap_or_default();
            let start = Instant::now();
            alignment::run_aligner(
                Path::new(reads),
                &db_dir.join(REFERENCE_FASTA),
                &sam_path,
                args.num_threads,
            )?;
            log::info!("Time elapsed for alignment: {:?}", start.elapsed());
            (sam_path, false)
        }
    };

    let start = Instant::now();
    let records = alignment::read_alignments(&sam_path, schema)?;
    log::info!("Time elapsed for reading alignments: {:?}", start.elapsed());
    log_memory_usage(true, "STAGE 1: Read alignments");

    let start = Instant::now();
    let models = model::train_models(&records, args.aln_score, args.aln_score_gene);
    if models.is_some() {
        log::info!("Time elapsed for model training: {:?}", start.elapsed());
    }

    let start = Instant::now();
    let mut raw = likelihood::build_raw_table(&records, models.as_ref());
    drop(records);
    likelihood::normalize_by_read_length(&mut raw);
    likelihood::write_raw_table(&out_dir.join(RAW_TABLE_FILE), &raw)?;

    let mut gene_table = likelihood::join_gene_lengths(raw, &gene_lengths, args.ref_weight);
    likelihood::write_gene_table(&out_dir.join(GENE_TABLE_FILE), &gene_table, &ref2genome)?;
    likelihood::filter_rows(
        &mut gene_table,
        args.aln_score,
        args.min_aln_len_ratio,
        args.min_fidelity,
    );
    let table = likelihood::dedup_and_finalize(gene_table)?;
    likelihood::write_filtered_table(&out_dir.join(FILTERED_TABLE_FILE), &table)?;
    log::info!(
        "Likelihood table: {} rows, {} reads, {} targets",
        table.n_rows(),
        table.n_reads(),
        table.targets.len()
    );
    log::info!("Time elapsed for likelihood table: {:?}", start.elapsed());
    log_memory_usage(true, "STAGE 2: Built likelihood table");

    let mut freqs = taxonomy.uniform_frequencies();
    if args.width_filter {
        width::apply_width_filter(&table, &gene_lengths, &mut freqs);
        if freqs.is_empty() {
            log::warn!("Width filter removed every candidate target");
        }
    }

    let start = Instant::now();
    let result = em::run_em(&table, freqs, |iteration, snapshot| {
        if args.save_intermediate_profile {
            let path = out_dir.join(format!("relative_abundance-EM-{}.tsv", iteration));
            if let Err(e) = db::write_abundance(&path, snapshot, &taxonomy) {
                log::warn!("Failed to write EM snapshot {}: {}", path.display(), e);
            }
        }
    });
    log::info!("Time elapsed for EM: {:?}", start.elapsed());
    log_memory_usage(true, "STAGE 3: EM finished");

    db::write_abundance(&out_dir.join(ABUNDANCE_FILE), &result.frequencies, &taxonomy)?;
    let rank_path = out_dir.join(format!("relative_abundance-{}.tsv", args.rank));
    db::write_abundance_at_rank(&rank_path, &result.frequencies, &taxonomy, rank)?;
    log::info!(
        "Wrote relative abundances for {} targets to {}",
        result.frequencies.len(),
        out_dir.display()
    );

    if !user_supplied_sam && !args.keep_alignments {
        if let Err(e) = std::fs::remove_file(&sam_path) {
            log::warn!("Could not remove {}: {}", sam_path.display(), e);
        }
    }

    log::info!("Total time elapsed: {:?}", total_start.elapsed());
    Ok(())
}
