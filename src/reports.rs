//! Deadlock report writers (A5).
//!
//! Three output formats, all driven from the same [`crate::wfg::Wfg`]
//! snapshot: a Graphviz `.dot` file for visualizing the wait-for graph, an
//! HTML summary for a human skimming results, and a reproducer log
//! listing each blocked rank's call site in deadlock-core order so a user
//! can find the offending code without reading the graph at all.

use crate::blocking_state::{WaitNode, WfgShard};
use crate::errors::Result;
use crate::types::{CallSite, Rank};
use crate::wfg::DeadlockReport;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

fn edges_from(node: &WaitNode) -> Vec<Rank> {
    let mut ranks = node.referenced_ranks();
    ranks.sort();
    ranks.dedup();
    ranks
}

pub fn write_dot<W: Write>(out: &mut W, shards: &[WfgShard], report: &DeadlockReport) -> Result<()> {
    writeln!(out, "digraph deadlock {{")?;
    for shard in shards {
        let style = if report.core.contains(&shard.rank) {
            " [style=filled,color=red]"
        } else {
            ""
        };
        writeln!(out, "  \"rank{}\"{style};", shard.rank.0)?;
        for target in edges_from(&shard.node) {
            writeln!(out, "  \"rank{}\" -> \"rank{}\";", shard.rank.0, target.0)?;
        }
    }
    writeln!(out, "}}")?;
    Ok(())
}

pub fn write_dot_file(path: &Path, shards: &[WfgShard], report: &DeadlockReport) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    write_dot(&mut file, shards, report)
}

pub fn write_html<W: Write>(out: &mut W, shards: &[WfgShard], report: &DeadlockReport) -> Result<()> {
    writeln!(out, "<!doctype html><html><head><title>deadlock report</title></head><body>")?;
    if report.is_deadlocked() {
        writeln!(out, "<h1>Deadlock detected</h1>")?;
        writeln!(out, "<p>Core ranks: {}</p>", ranks_csv(&report.core))?;
        writeln!(out, "<ul>")?;
        for shard in shards.iter().filter(|s| report.core.contains(&s.rank)) {
            writeln!(
                out,
                "<li>rank {} waits for {}</li>",
                shard.rank.0,
                ranks_csv(&edges_from(&shard.node))
            )?;
        }
        writeln!(out, "</ul>")?;
    } else {
        writeln!(out, "<h1>No deadlock detected</h1>")?;
    }
    writeln!(out, "</body></html>")?;
    Ok(())
}

pub fn write_html_file(path: &Path, shards: &[WfgShard], report: &DeadlockReport) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    write_html(&mut file, shards, report)
}

fn ranks_csv(ranks: &[Rank]) -> String {
    ranks.iter().map(|r| r.0.to_string()).collect::<Vec<_>>().join(", ")
}

/// One blocked rank's call site, for the reproducer log.
pub struct ReproducerEntry {
    pub rank: Rank,
    pub site: CallSite,
    pub description: String,
}

pub fn write_reproducer_log<W: Write>(
    out: &mut W,
    report: &DeadlockReport,
    entries: &[ReproducerEntry],
) -> Result<()> {
    let by_rank: HashMap<Rank, &ReproducerEntry> = entries.iter().map(|e| (e.rank, e)).collect();
    writeln!(out, "# deadlock core: {} ranks", report.core.len())?;
    for rank in &report.core {
        match by_rank.get(rank) {
            Some(entry) => writeln!(out, "{}: {} ({})", rank, entry.site, entry.description)?,
            None => writeln!(out, "{rank}: <no call site recorded>")?,
        }
    }
    Ok(())
}

pub fn write_reproducer_log_file(
    path: &Path,
    report: &DeadlockReport,
    entries: &[ReproducerEntry],
) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    write_reproducer_log(&mut file, report, entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LocationId, ParallelId};

    fn shard(rank: u32, node: WaitNode) -> WfgShard {
        WfgShard { rank: Rank(rank), node }
    }

    #[test]
    fn dot_output_marks_core_ranks() {
        let shards = vec![
            shard(0, WaitNode::Edge(Rank(1))),
            shard(1, WaitNode::Edge(Rank(0))),
        ];
        let report = DeadlockReport { core: vec![Rank(0), Rank(1)], progressing: vec![] };
        let mut buf = Vec::new();
        write_dot(&mut buf, &shards, &report).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("digraph deadlock"));
        assert!(text.contains("\"rank0\" -> \"rank1\""));
        assert!(text.contains("color=red"));
    }

    #[test]
    fn html_reports_no_deadlock_when_core_is_empty() {
        let report = DeadlockReport { core: vec![], progressing: vec![Rank(0)] };
        let mut buf = Vec::new();
        write_html(&mut buf, &[], &report).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("No deadlock detected"));
    }

    #[test]
    fn reproducer_log_lists_core_ranks_with_sites() {
        let report = DeadlockReport { core: vec![Rank(0), Rank(2)], progressing: vec![] };
        let entries = vec![ReproducerEntry {
            rank: Rank(0),
            site: CallSite { pid: ParallelId(0), lid: LocationId(7) },
            description: "MPI_Recv".to_string(),
        }];
        let mut buf = Vec::new();
        write_reproducer_log(&mut buf, &report, &entries).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("MPI_Recv"));
        assert!(text.contains("<no call site recorded>"));
    }
}
