use crate::constants::{marker_gene_index, MINIMAP2_BIN};
use crate::types::{AlnRecord, CigarOp, ProfileError, ReferenceSchema};
use rust_htslib::bam::record::{Aux, Cigar};
use rust_htslib::bam::{self, Read};
use std::path::Path;
use std::process::Command;

/// Split a reference sequence name into (target_id, gene_tag).
///
/// Colon schema: `<target_id>:<field>` where the gene tag is the final
/// `/`-separated component of the second colon field. Underscore schema:
/// `<target_id>_<suffix>` with the gene tag at the end of the suffix.
pub fn parse_reference_name(name: &str, schema: ReferenceSchema) -> Option<(u32, String)> {
    match schema {
        ReferenceSchema::ColonGene => {
            let mut fields = name.split(':');
            let target_id = fields.next()?.parse::<u32>().ok()?;
            let gene_field = fields.next()?;
            let gene_tag = gene_field.split('/').next_back()?;
            Some((target_id, gene_tag.to_string()))
        }
        ReferenceSchema::UnderscoreSuffix => {
            let (target, suffix) = name.split_once('_')?;
            let target_id = target.parse::<u32>().ok()?;
            let gene_tag = suffix.split('/').next_back()?;
            Some((target_id, gene_tag.to_string()))
        }
    }
}

/// Invoke the external long-read aligner once, writing SAM to `sam_path`.
/// The aligner's exit code is propagated verbatim on failure.
pub fn run_aligner(
    reads: &Path,
    reference: &Path,
    sam_path: &Path,
    threads: usize,
) -> Result<(), ProfileError> {
    if !reads.exists() {
        return Err(ProfileError::MissingInputFile(reads.to_path_buf()));
    }
    if !reference.exists() {
        return Err(ProfileError::MissingInputFile(reference.to_path_buf()));
    }

    // --eqx so that matches surface as =/X, -N to keep secondary hits for
    // multi-mapped reads.
    let mut command = Command::new(MINIMAP2_BIN);
    command
        .args(["-ax", "map-ont", "--eqx", "--sam-hit-only"])
        .args(["-N", "50", "-p", "0.9"])
        .arg("-t")
        .arg(threads.to_string())
        .arg("-o")
        .arg(sam_path)
        .arg(reference)
        .arg(reads);
    log::info!("Invoking aligner: {:?}", command);

    let output = command.output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(ProfileError::AlignerFailed {
            code: output.status.code().unwrap_or(128),
            stderr,
        });
    }
    log::debug!("Aligner finished, output at {}", sam_path.display());
    Ok(())
}

fn convert_cigar(cigar: &Cigar) -> Option<(CigarOp, u32)> {
    match *cigar {
        Cigar::Match(len) => Some((CigarOp::Match, len)),
        Cigar::Ins(len) => Some((CigarOp::Ins, len)),
        Cigar::Del(len) => Some((CigarOp::Del, len)),
        Cigar::SoftClip(len) => Some((CigarOp::SoftClip, len)),
        Cigar::HardClip(len) => Some((CigarOp::HardClip, len)),
        Cigar::Equal(len) => Some((CigarOp::Eq, len)),
        Cigar::Diff(len) => Some((CigarOp::Diff, len)),
        Cigar::RefSkip(_) | Cigar::Pad(_) => None,
    }
}

/// Extract an integer from any numeric aux tag variant.
fn aux_as_int(aux: Aux) -> Option<i64> {
    match aux {
        Aux::I8(v) => Some(v as i64),
        Aux::U8(v) => Some(v as i64),
        Aux::I16(v) => Some(v as i64),
        Aux::U16(v) => Some(v as i64),
        Aux::I32(v) => Some(v as i64),
        Aux::U32(v) => Some(v as i64),
        _ => None,
    }
}

/// Stream the alignment file into memory, keeping mapped, non-supplementary
/// records whose reference resolves to a marker-panel gene.
pub fn read_alignments(
    path: &Path,
    schema: ReferenceSchema,
) -> Result<Vec<AlnRecord>, ProfileError> {
    if !path.exists() {
        return Err(ProfileError::MissingInputFile(path.to_path_buf()));
    }
    let mut reader = bam::Reader::from_path(path)?;
    let header = reader.header().clone();

    let mut records = Vec::new();
    let mut n_total = 0usize;
    let mut n_off_panel = 0usize;
    for result in reader.records() {
        let record = result?;
        n_total += 1;
        if record.is_unmapped() || record.is_supplementary() {
            continue;
        }
        let tid = record.tid();
        if tid < 0 {
            continue;
        }
        let reference_name = String::from_utf8_lossy(header.tid2name(tid as u32)).to_string();
        let Some((target_id, gene_tag)) = parse_reference_name(&reference_name, schema) else {
            n_off_panel += 1;
            continue;
        };
        let Some(gene) = marker_gene_index(&gene_tag) else {
            n_off_panel += 1;
            continue;
        };

        let cigar: Vec<(CigarOp, u32)> = record
            .cigar()
            .iter()
            .filter_map(convert_cigar)
            .collect();
        let aln_score = record
            .aux(b"AS")
            .ok()
            .and_then(aux_as_int)
            .unwrap_or(0);

        records.push(AlnRecord {
            read_id: String::from_utf8_lossy(record.qname()).to_string(),
            target_id,
            gene,
            reference_name,
            aln_score,
            primary: !record.is_secondary(),
            cigar,
        });
    }

    log::info!(
        "Read {} alignment records, kept {} ({} outside the marker panel)",
        n_total,
        records.len(),
        n_off_panel
    );
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colon_schema_takes_last_path_component() {
        let (target, gene) =
            parse_reference_name("1234:cluster/rep/COG0012", ReferenceSchema::ColonGene).unwrap();
        assert_eq!(target, 1234);
        assert_eq!(gene, "COG0012");

        let (target, gene) =
            parse_reference_name("77:COG0541", ReferenceSchema::ColonGene).unwrap();
        assert_eq!(target, 77);
        assert_eq!(gene, "COG0541");
    }

    #[test]
    fn underscore_schema_splits_on_first_underscore() {
        let (target, gene) =
            parse_reference_name("99_acc/COG0016", ReferenceSchema::UnderscoreSuffix).unwrap();
        assert_eq!(target, 99);
        assert_eq!(gene, "COG0016");
    }

    #[test]
    fn malformed_names_are_rejected() {
        assert!(parse_reference_name("no-colon", ReferenceSchema::ColonGene).is_none());
        assert!(parse_reference_name("abc:COG0012", ReferenceSchema::ColonGene).is_none());
        assert!(parse_reference_name("nounderscore", ReferenceSchema::UnderscoreSuffix).is_none());
    }
}
