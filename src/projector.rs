//! Table and chart shapes derived from store payloads.
//!
//! Time-series keys arrive unsorted; everything here orders them
//! chronologically before building rows or points. Missing values are shown
//! as [`NO_DATA`], never as zero.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::fmt;

use crate::types::{Job, JobDetail, MeasurementCatalog, ModelCatalog, TimeSeries};

pub const NO_DATA: &str = "-";

/// Statistics group shown in the job table.
pub const POWER_TOTAL_GROUP: &str = "controller_power_supply_attribute.power.total";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Projection<T> {
    Empty,
    Ready(T),
}

impl<T> Projection<T> {
    pub fn is_empty(&self) -> bool {
        matches!(self, Projection::Empty)
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Projection::Ready(value) => Some(value),
            Projection::Empty => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Value(Value),
    NoData,
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Value(Value::String(s)) => f.write_str(s),
            Cell::Value(Value::Null) => f.write_str(""),
            Cell::Value(value) => write!(f, "{}", value),
            Cell::NoData => f.write_str(NO_DATA),
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Value(Value::String(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub label: String,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    pub name: String,
    /// (epoch millis, value)
    pub points: Vec<(i64, Value)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub title: String,
    pub series: Vec<ChartSeries>,
}

/// Parses RFC 3339, then naive date-times (as UTC), then bare dates
/// (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn timestamp_millis(raw: &str) -> Option<i64> {
    parse_timestamp(raw).map(|dt| dt.timestamp_millis())
}

/// Stable chronological sort. Unparseable keys go last in input order.
pub fn sort_timestamps<'a, I>(keys: I) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut keyed: Vec<(Option<i64>, &str)> =
        keys.into_iter().map(|k| (timestamp_millis(k), k)).collect();
    keyed.sort_by_key(|(millis, _)| (millis.is_none(), *millis));
    keyed.into_iter().map(|(_, k)| k).collect()
}

fn sorted_points(data: &TimeSeries) -> Vec<(i64, Value)> {
    sort_timestamps(data.keys().map(String::as_str))
        .into_iter()
        .filter_map(|key| Some((timestamp_millis(key)?, data[key].clone())))
        .collect()
}

/// One row per timestamp, one value column named after the device.
pub fn single_series_table(device: &str, data: &TimeSeries) -> Projection<Table> {
    if data.is_empty() {
        return Projection::Empty;
    }
    let rows = sort_timestamps(data.keys().map(String::as_str))
        .into_iter()
        .map(|key| Row {
            label: key.to_string(),
            cells: vec![Cell::Value(data[key].clone())],
        })
        .collect();
    Projection::Ready(Table {
        columns: vec!["Date".to_string(), device.to_string()],
        rows,
    })
}

pub fn single_series_chart(device: &str, data: &TimeSeries) -> Projection<Chart> {
    if data.is_empty() {
        return Projection::Empty;
    }
    Projection::Ready(Chart {
        title: device.to_string(),
        series: vec![ChartSeries {
            name: device.to_string(),
            points: sorted_points(data),
        }],
    })
}

fn as_series(value: &Value) -> Option<&TimeSeries> {
    value.as_object()
}

/// Rows come from the first series' timestamps only. Timestamps that appear
/// solely in later series are not shown in the table.
pub fn multi_series_table(data: &TimeSeries) -> Projection<Table> {
    let Some((_, first)) = data.iter().next() else {
        return Projection::Empty;
    };

    let dates = match as_series(first) {
        Some(first) => sort_timestamps(first.keys().map(String::as_str)),
        None => Vec::new(),
    };

    let mut columns = Vec::with_capacity(data.len() + 1);
    columns.push("Date".to_string());
    columns.extend(data.keys().cloned());

    let rows = dates
        .into_iter()
        .map(|date| Row {
            label: date.to_string(),
            cells: data
                .values()
                .map(|series| {
                    as_series(series)
                        .and_then(|s| s.get(date))
                        .map(|v| Cell::Value(v.clone()))
                        .unwrap_or(Cell::NoData)
                })
                .collect(),
        })
        .collect();

    Projection::Ready(Table { columns, rows })
}

/// One chart series per name, each built from its own timestamps.
pub fn multi_series_chart(title: &str, data: &TimeSeries) -> Projection<Chart> {
    if data.is_empty() {
        return Projection::Empty;
    }
    let series = data
        .iter()
        .map(|(name, value)| ChartSeries {
            name: name.clone(),
            points: as_series(value).map(sorted_points).unwrap_or_default(),
        })
        .collect();
    Projection::Ready(Chart {
        title: title.to_string(),
        series,
    })
}

/// Drawn only once both halves have arrived.
pub fn job_detail_chart(title: &str, detail: &JobDetail) -> Projection<Chart> {
    let (Some(prediction), Some(expectation)) = (&detail.prediction, &detail.expectation) else {
        return Projection::Empty;
    };
    Projection::Ready(Chart {
        title: title.to_string(),
        series: vec![
            ChartSeries {
                name: "prediction".to_string(),
                points: sorted_points(prediction),
            },
            ChartSeries {
                name: "expectation".to_string(),
                points: sorted_points(expectation),
            },
        ],
    })
}

pub fn model_table(models: &ModelCatalog) -> Table {
    Table {
        columns: vec!["Name".to_string(), "Attribute".to_string()],
        rows: models
            .iter()
            .map(|(name, attributes)| Row {
                label: name.clone(),
                cells: vec![Cell::from(attributes.join(", ").as_str())],
            })
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSection {
    pub data_center: String,
    pub device_type: String,
    pub table: Table,
}

pub fn measurement_sections(catalog: &MeasurementCatalog) -> Vec<CatalogSection> {
    let mut sections = Vec::new();
    for (data_center, center) in catalog {
        for (device_type, measurements) in &center.device_types {
            let rows = measurements
                .iter()
                .map(|(name, info)| {
                    let attributes = info
                        .attribute
                        .iter()
                        .map(|(key, value)| match value {
                            Value::String(s) => format!("{}: {}", key, s),
                            other => format!("{}: {}", key, other),
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    Row {
                        label: name.clone(),
                        cells: vec![
                            Cell::from(attributes.as_str()),
                            Cell::from(info.devices.join(", ").as_str()),
                        ],
                    }
                })
                .collect();
            sections.push(CatalogSection {
                data_center: data_center.clone(),
                device_type: device_type.clone(),
                table: Table {
                    columns: vec![
                        "Name".to_string(),
                        "Attribute".to_string(),
                        "Devices".to_string(),
                    ],
                    rows,
                },
            });
        }
    }
    sections
}

pub fn job_table(jobs: &[Job]) -> Table {
    let rows = jobs
        .iter()
        .enumerate()
        .map(|(idx, job)| {
            let props = job.properties.as_ref();
            let text = |value: Option<&String>| match value {
                Some(v) => Cell::from(v.as_str()),
                None => Cell::from(""),
            };
            let stat = |metric: &str| match job.statistic(POWER_TOTAL_GROUP, metric) {
                Some(v) => Cell::Value(Value::from(v)),
                None => Cell::from(""),
            };
            Row {
                label: idx.to_string(),
                cells: vec![
                    Cell::from(job.name.as_str()),
                    Cell::from(job.status.to_string().as_str()),
                    text(props.and_then(|p| p.model.as_ref())),
                    text(props.and_then(|p| p.model_type.as_ref())),
                    stat("MSE"),
                    stat("rsquare"),
                ],
            }
        })
        .collect();
    Table {
        columns: ["#", "Name", "Status", "Model", "Model Type", "MSE", "rsquare"]
            .iter()
            .map(|c| c.to_string())
            .collect(),
        rows,
    }
}
