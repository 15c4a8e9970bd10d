use chrono::{DateTime, Utc};
use std::fmt::Write as _;

/// Per-file counters collected during a job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSummary {
    pub file: String,
    pub total: usize,
    pub added: usize,
    pub updated: usize,
    pub repaired: usize,
    pub classified: usize,
    pub written: bool,
}

impl FileSummary {
    pub fn new(file: &str) -> Self {
        Self {
            file: file.to_string(),
            ..Default::default()
        }
    }
}

/// Plain-text run summary written at the end of every job
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub job: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub files: Vec<FileSummary>,
    pub notes: Vec<String>,
}

impl RunSummary {
    pub fn start(job: &str) -> Self {
        Self {
            job: job.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            files: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn files_written(&self) -> usize {
        self.files.iter().filter(|f| f.written).count()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "job: {}", self.job);
        let _ = writeln!(out, "started: {}", self.started_at.to_rfc3339());
        if let Some(finished) = self.finished_at {
            let _ = writeln!(out, "finished: {}", finished.to_rfc3339());
        }
        let _ = writeln!(
            out,
            "files: {} processed, {} written",
            self.files.len(),
            self.files_written()
        );

        for f in &self.files {
            let _ = writeln!(
                out,
                "  {}: total={} added={} updated={} repaired={} classified={} {}",
                f.file,
                f.total,
                f.added,
                f.updated,
                f.repaired,
                f.classified,
                if f.written { "written" } else { "unchanged" }
            );
        }

        if !self.notes.is_empty() {
            let _ = writeln!(out, "notes:");
            for note in &self.notes {
                let _ = writeln!(out, "  - {}", note);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lists_files_and_notes() {
        let mut summary = RunSummary::start("update");
        summary.files.push(FileSummary {
            file: "india.json".into(),
            total: 12,
            added: 2,
            written: true,
            ..Default::default()
        });
        summary.files.push(FileSummary::new("uk.json"));
        summary.note("catalog: 3 channels, 5 streams");
        summary.finish();

        let text = summary.render();
        assert!(text.starts_with("job: update\n"));
        assert!(text.contains("files: 2 processed, 1 written"));
        assert!(text.contains("india.json: total=12 added=2"));
        assert!(text.contains("uk.json: total=0 added=0 updated=0 repaired=0 classified=0 unchanged"));
        assert!(text.contains("  - catalog: 3 channels, 5 streams"));
    }
}
