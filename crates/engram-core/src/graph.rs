//! Evolution graph rendering
//!
//! Renders the supersession graph as a Mermaid `graph TD` document: one node
//! per artifact labelled with target, status and evidence count, one edge
//! per supersession link.

use crate::engine::MemoryEngine;
use crate::error::Result;

impl MemoryEngine {
    /// Mermaid rendering of the evolution graph, optionally filtered to one
    /// target.
    pub fn evolution_graph(&self, target_filter: Option<&str>) -> Result<String> {
        let mut rows = self.meta_store().list_all()?;
        if let Some(target) = target_filter {
            rows.retain(|row| row.target == target);
        }

        let mut lines = vec![
            "graph TD".to_string(),
            "  classDef active fill:#9f9,stroke:#333,stroke-width:2px;".to_string(),
            "  classDef superseded fill:#eee,stroke:#999,stroke-dasharray: 5 5;".to_string(),
            "  classDef proposal fill:#fff,stroke:#00f,stroke-dasharray: 5 5;".to_string(),
        ];
        if rows.is_empty() {
            return Ok(lines.join("\n"));
        }

        let fids: Vec<String> = rows.iter().map(|row| row.fid.clone()).collect();
        let link_stats = self.episodic().count_links_batch(&fids)?;

        for row in &rows {
            let evidence_label = match link_stats.get(&row.fid) {
                Some((count, _)) if *count > 0 => format!("<br/>[{} evidence]", count),
                _ => String::new(),
            };
            let node_id = mermaid_id(&row.fid);
            let display = format!("{}<br/>({}){}", row.target, row.status, evidence_label);

            let class = match (row.kind, row.status) {
                (crate::artifact::ArtifactKind::Proposal, _) => "proposal",
                (_, crate::artifact::ArtifactStatus::Active) => "active",
                (_, crate::artifact::ArtifactStatus::Superseded) => "superseded",
                _ => "",
            };
            let mut node = format!("  {}[\"{}\"]", node_id, display);
            if !class.is_empty() {
                node.push_str(&format!(":::{}", class));
            }
            lines.push(node);

            if let Some(successor) = &row.superseded_by {
                lines.push(format!(
                    "  {} -->|superseded by| {}",
                    node_id,
                    mermaid_id(successor)
                ));
            }
        }

        Ok(lines.join("\n"))
    }
}

/// fids contain characters Mermaid treats as syntax
fn mermaid_id(fid: &str) -> String {
    fid.replace(['.', '-', '/'], "_")
}
