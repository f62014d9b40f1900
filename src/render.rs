use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::projector::{Chart, Projection, Table};

const EMPTY: &str = "(no data)";

/// Plain-text grid, columns padded to their widest cell.
pub fn table(table: &Table) -> String {
    let body: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|row| {
            std::iter::once(row.label.clone())
                .chain(row.cells.iter().map(|c| c.to_string()))
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> = table.columns.iter().map(|c| c.chars().count()).collect();
    for line in &body {
        for (idx, cell) in line.iter().enumerate() {
            let len = cell.chars().count();
            match widths.get_mut(idx) {
                Some(w) => *w = (*w).max(len),
                None => widths.push(len),
            }
        }
    }

    let mut out = String::new();
    push_line(&mut out, &table.columns, &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    push_line(&mut out, &rule, &widths);
    for line in &body {
        push_line(&mut out, line, &widths);
    }
    out
}

fn push_line(out: &mut String, cells: &[String], widths: &[usize]) {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
        .collect::<Vec<_>>()
        .join(" | ");
    out.push_str(line.trim_end());
    out.push('\n');
}

pub fn chart(chart: &Chart) -> String {
    let mut out = format!("# {}\n", chart.title);
    for series in &chart.series {
        let _ = writeln!(out, "[{}] {} points", series.name, series.points.len());
        for (millis, value) in &series.points {
            let at = DateTime::<Utc>::from_timestamp_millis(*millis)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| millis.to_string());
            let _ = writeln!(out, "  {}  {}", at, value);
        }
    }
    out
}

pub fn table_projection(projection: &Projection<Table>) -> String {
    match projection {
        Projection::Ready(t) => table(t),
        Projection::Empty => format!("{}\n", EMPTY),
    }
}

pub fn chart_projection(projection: &Projection<Chart>) -> String {
    match projection {
        Projection::Ready(c) => chart(c),
        Projection::Empty => format!("{}\n", EMPTY),
    }
}
