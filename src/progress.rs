//! Indexing progress reporting.
//!
//! Reports observable progress during `dqa index` and `dqa serve` so users
//! see how many documents were found, what will be re-indexed, and how far
//! embedding has got. Progress is emitted on **stderr** so stdout remains
//! parseable for scripts.

use std::io::Write;

use docs_qa_core::index::{IndexEvent, IndexMode, IndexProgress, NoProgress};

/// Human-friendly progress on stderr: "index  embedding  1,234 / 5,000 chunks".
pub struct StderrProgress;

impl IndexProgress for StderrProgress {
    fn report(&self, event: IndexEvent) {
        let line = match &event {
            IndexEvent::Discovered { documents } => {
                format!("index  discovered {} documents\n", format_number(*documents))
            }
            IndexEvent::Planned {
                mode,
                reindex,
                unchanged,
                prune,
            } => format!(
                "index  {}: {} to index, {} unchanged, {} to prune\n",
                mode_name(*mode),
                format_number(*reindex),
                format_number(*unchanged),
                format_number(*prune)
            ),
            IndexEvent::Embedding { n, total } => format!(
                "index  embedding  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
            IndexEvent::Committing { chunks } => {
                format!("index  committing {} chunks\n", format_number(*chunks))
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IndexProgress for JsonProgress {
    fn report(&self, event: IndexEvent) {
        let obj = event_json(&event);
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

fn event_json(event: &IndexEvent) -> serde_json::Value {
    match event {
        IndexEvent::Discovered { documents } => serde_json::json!({
            "event": "progress",
            "phase": "discovered",
            "documents": documents
        }),
        IndexEvent::Planned {
            mode,
            reindex,
            unchanged,
            prune,
        } => serde_json::json!({
            "event": "progress",
            "phase": "planned",
            "mode": mode_name(*mode),
            "reindex": reindex,
            "unchanged": unchanged,
            "prune": prune
        }),
        IndexEvent::Embedding { n, total } => serde_json::json!({
            "event": "progress",
            "phase": "embedding",
            "n": n,
            "total": total
        }),
        IndexEvent::Committing { chunks } => serde_json::json!({
            "event": "progress",
            "phase": "committing",
            "chunks": chunks
        }),
    }
}

fn mode_name(mode: IndexMode) -> &'static str {
    match mode {
        IndexMode::Full => "full",
        IndexMode::Incremental => "incremental",
    }
}

fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Parse `off`, `human`, or `json`.
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => {
                anyhow::bail!("Unknown progress mode: '{}'. Must be off, human, or json.", other)
            }
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn IndexProgress> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
