use crate::alignment::parse_reference_name;
use crate::constants::{marker_gene_index, MARKER_GENES};
use crate::types::{Frequencies, ProfileError, ReferenceSchema};
use crate::utils::open_maybe_gz;
use fxhash::{FxHashMap, FxHashSet};
use std::fs::File;
use std::io::{BufRead, Write};
use std::path::Path;

/// Lineage columns in collapse order, most specific first.
pub const RANK_COLUMNS: [&str; 8] = [
    "species",
    "genus",
    "family",
    "order",
    "class",
    "phylum",
    "clade",
    "superkingdom",
];

pub fn rank_index(name: &str) -> Result<usize, ProfileError> {
    RANK_COLUMNS
        .iter()
        .position(|&r| r == name)
        .ok_or_else(|| ProfileError::InvalidRank(name.to_string()))
}

/// One taxonomy row; `ranks` is indexed parallel to `RANK_COLUMNS`.
#[derive(Debug, Clone)]
pub struct Lineage {
    pub ranks: [String; 8],
}

pub struct Taxonomy {
    pub lineages: FxHashMap<u32, Lineage>,
}

impl Taxonomy {
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        if !path.exists() {
            return Err(ProfileError::MissingInputFile(path.to_path_buf()));
        }
        let reader = open_maybe_gz(path)?;
        let mut lines = reader.lines();

        let header = match lines.next() {
            Some(line) => line?,
            None => {
                return Err(ProfileError::SchemaMismatch {
                    path: path.to_path_buf(),
                    detail: "empty taxonomy file".to_string(),
                })
            }
        };
        let columns: Vec<&str> = header.split('\t').collect();
        let tax_col = columns.iter().position(|&c| c == "tax_id").ok_or_else(|| {
            ProfileError::SchemaMismatch {
                path: path.to_path_buf(),
                detail: "missing column tax_id".to_string(),
            }
        })?;
        let mut rank_cols = [0usize; 8];
        for (i, rank) in RANK_COLUMNS.iter().enumerate() {
            rank_cols[i] = columns.iter().position(|c| c == rank).ok_or_else(|| {
                ProfileError::SchemaMismatch {
                    path: path.to_path_buf(),
                    detail: format!("missing column {}", rank),
                }
            })?;
        }

        let mut lineages = FxHashMap::default();
        for (line_num, line) in lines.enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            let tax_id = match fields.get(tax_col).and_then(|f| f.parse::<u32>().ok()) {
                Some(id) => id,
                None => {
                    log::warn!("Skipping malformed taxonomy line {}: bad tax_id", line_num + 2);
                    continue;
                }
            };
            let mut ranks: [String; 8] = Default::default();
            for (i, &col) in rank_cols.iter().enumerate() {
                ranks[i] = fields.get(col).unwrap_or(&"").to_string();
            }
            lineages.insert(tax_id, Lineage { ranks });
        }

        Ok(Taxonomy { lineages })
    }

    /// Uniform prior over every known target.
    pub fn uniform_frequencies(&self) -> Frequencies {
        let n = self.lineages.len() as f64;
        self.lineages.keys().map(|&t| (t, 1.0 / n)).collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GeneInfo {
    pub target_id: u32,
    pub gene: u8,
    pub length: u32,
}

/// The gene-length table, keyed by full reference identifier, plus the
/// per-target count of distinct marker genes present in the database.
pub struct GeneLengths {
    pub by_reference: FxHashMap<String, GeneInfo>,
    pub genes_per_target: FxHashMap<u32, u32>,
}

impl GeneLengths {
    pub fn load(path: &Path, schema: ReferenceSchema) -> Result<Self, ProfileError> {
        if !path.exists() {
            return Err(ProfileError::MissingInputFile(path.to_path_buf()));
        }
        let reader = open_maybe_gz(path)?;
        let mut lines = reader.lines();

        let header = match lines.next() {
            Some(line) => line?,
            None => {
                return Err(ProfileError::SchemaMismatch {
                    path: path.to_path_buf(),
                    detail: "empty gene-length file".to_string(),
                })
            }
        };
        let columns: Vec<&str> = header.split('\t').collect();
        let id_col = columns.iter().position(|&c| c == "#id").ok_or_else(|| {
            ProfileError::SchemaMismatch {
                path: path.to_path_buf(),
                detail: "missing column #id".to_string(),
            }
        })?;
        let len_col = columns.iter().position(|&c| c == "length").ok_or_else(|| {
            ProfileError::SchemaMismatch {
                path: path.to_path_buf(),
                detail: "missing column length".to_string(),
            }
        })?;

        let mut by_reference = FxHashMap::default();
        let mut target_genes: FxHashMap<u32, FxHashSet<u8>> = FxHashMap::default();
        let mut skipped = 0usize;
        for (line_num, line) in lines.enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            let reference = match fields.get(id_col) {
                Some(&r) => r,
                None => continue,
            };
            let length = match fields.get(len_col).and_then(|f| f.parse::<u32>().ok()) {
                Some(l) if l > 0 => l,
                _ => {
                    log::warn!(
                        "Skipping malformed gene-length line {}: bad length",
                        line_num + 2
                    );
                    continue;
                }
            };
            let Some((target_id, gene_tag)) = parse_reference_name(reference, schema) else {
                skipped += 1;
                continue;
            };
            let Some(gene) = marker_gene_index(&gene_tag) else {
                skipped += 1;
                continue;
            };
            target_genes.entry(target_id).or_default().insert(gene);
            by_reference.insert(
                reference.to_string(),
                GeneInfo {
                    target_id,
                    gene,
                    length,
                },
            );
        }
        if skipped > 0 {
            log::debug!(
                "Ignored {} gene-length entries outside the marker panel",
                skipped
            );
        }

        let genes_per_target = target_genes
            .into_iter()
            .map(|(t, genes)| (t, genes.len() as u32))
            .collect();
        Ok(GeneLengths {
            by_reference,
            genes_per_target,
        })
    }
}

/// Two-column reference-to-genome map, no header.
pub fn load_reference2genome(path: &Path) -> Result<FxHashMap<String, String>, ProfileError> {
    if !path.exists() {
        return Err(ProfileError::MissingInputFile(path.to_path_buf()));
    }
    let reader = open_maybe_gz(path)?;
    let mut map = FxHashMap::default();
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let (Some(reference), Some(genome)) = (fields.next(), fields.next()) else {
            return Err(ProfileError::SchemaMismatch {
                path: path.to_path_buf(),
                detail: "expected two tab-separated columns".to_string(),
            });
        };
        map.insert(reference.to_string(), genome.to_string());
    }
    Ok(map)
}

fn sorted_by_abundance(freqs: &Frequencies) -> Vec<(u32, f64)> {
    let mut rows: Vec<(u32, f64)> = freqs.iter().map(|(&t, &f)| (t, f)).collect();
    rows.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));
    rows
}

/// Write the abundance vector joined with the full taxonomy table.
pub fn write_abundance(
    path: &Path,
    freqs: &Frequencies,
    taxonomy: &Taxonomy,
) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "tax_id\tabundance\t{}", RANK_COLUMNS.join("\t"))?;
    for (tax_id, abundance) in sorted_by_abundance(freqs) {
        let lineage = taxonomy.lineages.get(&tax_id);
        let ranks = lineage
            .map(|l| l.ranks.join("\t"))
            .unwrap_or_else(|| vec![""; RANK_COLUMNS.len()].join("\t"));
        writeln!(file, "{}\t{}\t{}", tax_id, abundance, ranks)?;
    }
    Ok(())
}

/// Group-sum the abundance vector at the requested rank; lineage columns from
/// the rank upward are retained.
pub fn write_abundance_at_rank(
    path: &Path,
    freqs: &Frequencies,
    taxonomy: &Taxonomy,
    rank: usize,
) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "abundance\t{}", RANK_COLUMNS[rank..].join("\t"))?;

    let mut grouped: FxHashMap<String, f64> = FxHashMap::default();
    for (&tax_id, &abundance) in freqs.iter() {
        let key = match taxonomy.lineages.get(&tax_id) {
            Some(lineage) => lineage.ranks[rank..].join("\t"),
            None => vec![""; RANK_COLUMNS.len() - rank].join("\t"),
        };
        *grouped.entry(key).or_insert(0.0) += abundance;
    }

    let mut rows: Vec<(String, f64)> = grouped.into_iter().collect();
    rows.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));
    for (key, abundance) in rows {
        writeln!(file, "{}\t{}", abundance, key)?;
    }
    Ok(())
}

pub fn gene_tag(gene: u8) -> &'static str {
    MARKER_GENES[gene as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_lookup() {
        assert_eq!(rank_index("species").unwrap(), 0);
        assert_eq!(rank_index("superkingdom").unwrap(), 7);
        assert!(matches!(
            rank_index("kingdom"),
            Err(ProfileError::InvalidRank(_))
        ));
    }

    #[test]
    fn abundance_rows_sorted_desc_with_tiebreak() {
        let mut freqs = Frequencies::default();
        freqs.insert(7, 0.25);
        freqs.insert(3, 0.5);
        freqs.insert(5, 0.25);
        let rows = sorted_by_abundance(&freqs);
        assert_eq!(rows[0].0, 3);
        assert_eq!(rows[1].0, 5);
        assert_eq!(rows[2].0, 7);
    }
}
