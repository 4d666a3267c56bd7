//! Markdown rendering of analysis results.

use diffcluster_core::bicluster::BiclusterResult;
use diffcluster_core::coverage::CoverageClustering;
use diffcluster_core::dedupe::FingerprintCluster;
use diffcluster_core::fingerprint::{SPECIAL_FIELD_NAMES, SpecialFields};
use diffcluster_core::matrix::{FingerprintReport, PairMatrix, ResolverPair};
use std::fmt::{self, Write};

pub fn coverage_section(clustering: &CoverageClustering) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(
        out,
        "# {} (threshold {}, {} counters)",
        clustering.config.method,
        clustering.config.threshold,
        clustering.leaves.len()
    )?;
    for leaf in &clustering.leaves {
        writeln!(out, "{:>4}  {}", leaf.cluster, leaf.label())?;
    }
    Ok(out)
}

fn field_row(side: &str, fields: &SpecialFields) -> String {
    let values: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
    format!("    | {side:<3} | {} |", values.join(" | "))
}

fn cluster_entry(
    out: &mut String,
    pair: &ResolverPair,
    cluster: &FingerprintCluster,
) -> fmt::Result {
    writeln!(
        out,
        "* Cluster of size {}: `{}`",
        cluster.size(),
        cluster.representative()
    )?;
    writeln!(out, "    resolvers: `{}`", pair.args())?;
    writeln!(out, "    |     | {} |", SPECIAL_FIELD_NAMES.join(" | "))?;
    writeln!(
        out,
        "    | :-- | {} |",
        vec!["--:"; SPECIAL_FIELD_NAMES.len()].join(" | ")
    )?;
    let (left, right) = cluster.fingerprint.special_fields();
    writeln!(out, "{}", field_row("L", left))?;
    writeln!(out, "{}", field_row("R", right))?;
    writeln!(out, "    **Key Differences**")?;
    writeln!(out, "    ```")?;
    for key in cluster.fingerprint.key_diffs() {
        writeln!(out, "    {key}")?;
    }
    writeln!(out, "    ```")?;
    let members: Vec<&str> = cluster.members().iter().map(|m| m.as_str()).collect();
    writeln!(out, "    All: {}", members.join(", "))
}

pub fn fingerprint_sections(
    report: &FingerprintReport,
    top: usize,
) -> Result<String, fmt::Error> {
    let mut out = String::new();
    for analysis in &report.pairs {
        writeln!(
            out,
            "# {} (Clusters: {})",
            analysis.pair, analysis.metrics.cluster_count
        )?;
        for cluster in analysis.clusters.iter().take(top) {
            cluster_entry(&mut out, &analysis.pair, cluster)?;
        }
        out.push('\n');
    }
    Ok(out)
}

pub fn matrix_table(title: &str, matrix: &PairMatrix) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "# {title}")?;
    writeln!(out, "|  | {} |", matrix.resolvers().join(" | "))?;
    writeln!(
        out,
        "| :-- | {} |",
        vec!["--:"; matrix.resolvers().len()].join(" | ")
    )?;
    for (name, row) in matrix.resolvers().iter().zip(matrix.rows()) {
        let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        writeln!(out, "| {name} | {} |", cells.join(" | "))?;
    }
    Ok(out)
}

pub fn bicluster_section(
    pair: &ResolverPair,
    result: &BiclusterResult,
) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(
        out,
        "# {pair} (Converged with ({}, {}))",
        result.row_clusters, result.column_clusters
    )?;
    for summary in result.row_cluster_representatives() {
        writeln!(
            out,
            "* `{}` (Size: {})",
            summary.representative, summary.size
        )?;
    }
    Ok(out)
}
