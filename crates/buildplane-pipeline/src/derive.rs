//! Snapshot and Full derivation from Delta files.
//!
//! Files are tab-separated with a header line. The first column identifies a
//! component, the second is its effective time (`YYYYMMDD`, so string order
//! is time order).

use std::collections::HashMap;

use crate::collaborators::ReleaseType;

/// Swap the `Delta` token in a file name for `target`.
pub fn derived_name(delta_name: &str, target: ReleaseType) -> Option<String> {
    delta_name
        .contains(ReleaseType::Delta.as_str())
        .then(|| delta_name.replacen(ReleaseType::Delta.as_str(), target.as_str(), 1))
}

/// Previous full rows followed by the delta rows, under the delta's header.
pub fn derive_full(previous_full: Option<&str>, delta: &str) -> String {
    let ending = line_ending(delta);
    let mut lines = delta.lines();
    let header = lines.next();

    let previous_rows = previous_full
        .into_iter()
        .flat_map(|full| full.lines().skip(1));
    let rows: Vec<&str> = previous_rows
        .chain(lines)
        .filter(|row| !row.is_empty())
        .collect();
    join(header, &rows, ending)
}

/// For each component keep the row with the latest effective time.
///
/// Components appear in order of first occurrence. On equal effective times
/// the later row wins.
pub fn derive_snapshot(full: &str) -> String {
    let ending = line_ending(full);
    let mut lines = full.lines();
    let header = lines.next();

    let mut order: Vec<&str> = Vec::new();
    let mut latest: HashMap<&str, (&str, &str)> = HashMap::new();
    for row in lines.filter(|row| !row.is_empty()) {
        let mut columns = row.split('\t');
        let id = columns.next().unwrap_or_default();
        let effective = columns.next().unwrap_or_default();
        match latest.get(id) {
            Some((current, _)) if *current > effective => {}
            Some(_) => {
                latest.insert(id, (effective, row));
            }
            None => {
                order.push(id);
                latest.insert(id, (effective, row));
            }
        }
    }

    let rows: Vec<&str> = order
        .iter()
        .filter_map(|id| latest.get(id).map(|(_, row)| *row))
        .collect();
    join(header, &rows, ending)
}

fn line_ending(content: &str) -> &'static str {
    if content.contains("\r\n") { "\r\n" } else { "\n" }
}

fn join(header: Option<&str>, rows: &[&str], ending: &str) -> String {
    let mut out = String::new();
    for line in header.into_iter().chain(rows.iter().copied()) {
        out.push_str(line);
        out.push_str(ending);
    }
    out
}
