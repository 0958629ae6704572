//! Report generation for search results
//!
//! - **JSON**: the full outcome, population statistics included
//! - **CSV**: one row per ranked track, spreadsheet friendly
//!
//! # Usage
//!
//! ```ignore
//! use asse::report;
//!
//! // Automatically picks format based on extension
//! report::generate("neighbours.json", &outcome)?;  // JSON
//! report::generate("neighbours.csv", &outcome)?;   // CSV
//! ```

use crate::db::TrackRef;
use crate::search::SearchOutcome;
use std::io::{self, Write};
use std::path::Path;

/// Generate a report in the appropriate format based on file extension
pub fn generate<P: AsRef<Path>>(path: P, outcome: &SearchOutcome<TrackRef>) -> io::Result<()> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let mut file = std::fs::File::create(path)?;

    match ext.as_str() {
        "json" => write_json(&mut file, outcome),
        _ => write_csv(&mut file, outcome),
    }
}

pub fn write_json<W: Write>(out: &mut W, outcome: &SearchOutcome<TrackRef>) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, outcome)?;
    writeln!(out)
}

pub fn write_csv<W: Write>(out: &mut W, outcome: &SearchOutcome<TrackRef>) -> io::Result<()> {
    writeln!(out, "rank,track_id,name,path,similarity,standardized")?;
    for (i, r) in outcome.results.iter().enumerate() {
        writeln!(
            out,
            "{},{},{},{},{:.6},{:.6}",
            i + 1,
            r.reference.track_id,
            csv_field(&r.reference.name),
            csv_field(&r.reference.path),
            r.similarity,
            r.standardized
        )?;
    }
    Ok(())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::RankedResult;

    fn outcome() -> SearchOutcome<TrackRef> {
        let track = |id: i32, name: &str| TrackRef {
            track_id: id,
            name: name.to_string(),
            path: format!("/music/{}", name),
        };
        SearchOutcome {
            results: vec![
                RankedResult { reference: track(4, "b.flac"), similarity: 0.9, standardized: 0.75 },
                RankedResult { reference: track(2, "a, live.mp3"), similarity: 0.5, standardized: 0.25 },
            ],
            population: 5,
            skipped: 1,
            mean: 0.5,
            std_dev: 0.2,
        }
    }

    // ==========================================================================
    // CSV
    // ==========================================================================

    #[test]
    fn test_csv_rows_in_rank_order() {
        let mut buf = Vec::new();
        write_csv(&mut buf, &outcome()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "rank,track_id,name,path,similarity,standardized");
        assert_eq!(lines[1], "1,4,b.flac,/music/b.flac,0.900000,0.750000");
        assert!(lines[2].starts_with("2,2,\"a, live.mp3\",\"/music/a, live.mp3\","));
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    // ==========================================================================
    // JSON & DISPATCH
    // ==========================================================================

    #[test]
    fn test_json_keeps_statistics() {
        let mut buf = Vec::new();
        write_json(&mut buf, &outcome()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();

        assert_eq!(value["population"], 5);
        assert_eq!(value["skipped"], 1);
        assert_eq!(value["results"][0]["reference"]["track_id"], 4);
        assert_eq!(value["results"][1]["standardized"], 0.25);
    }

    #[test]
    fn test_generate_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("out.JSON");
        let csv_path = dir.path().join("out.csv");

        generate(&json_path, &outcome()).unwrap();
        generate(&csv_path, &outcome()).unwrap();

        assert!(std::fs::read_to_string(json_path).unwrap().trim_start().starts_with('{'));
        assert!(std::fs::read_to_string(csv_path).unwrap().starts_with("rank,"));
    }
}
