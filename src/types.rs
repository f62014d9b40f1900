use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Time-indexed payload as returned by the backend. Key order is kept as sent.
pub type TimeSeries = Map<String, Value>;

/// Model name -> ordered attribute labels.
pub type ModelCatalog = BTreeMap<String, Vec<String>>;

/// Device type -> measurement -> devices.
pub type DeviceTypeMapping = IndexMap<String, IndexMap<String, Vec<String>>>;

pub type DeviceTypeCatalog = IndexMap<String, IndexMap<String, MeasurementInfo>>;

/// Data center -> per-data-center catalog.
pub type MeasurementCatalog = IndexMap<String, DataCenterCatalog>;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MeasurementInfo {
    #[serde(default)]
    pub attribute: IndexMap<String, Value>,
    #[serde(default)]
    pub devices: Vec<String>,
}

/// Device types of one data center. Accepts both `{"device_types": {...}}` and
/// the flat `{device_type: {...}}` layout.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(try_from = "IndexMap<String, Value>")]
pub struct DataCenterCatalog {
    pub device_types: DeviceTypeCatalog,
}

impl TryFrom<IndexMap<String, Value>> for DataCenterCatalog {
    type Error = serde_json::Error;

    fn try_from(mut raw: IndexMap<String, Value>) -> Result<Self, Self::Error> {
        let wrapped = raw.len() == 1
            && raw
                .get("device_types")
                .map_or(false, |inner| !is_measurement_map(inner));
        let device_types = if wrapped {
            serde_json::from_value(raw.swap_remove("device_types").unwrap_or_default())?
        } else {
            serde_json::from_value(Value::Object(raw.into_iter().collect()))?
        };
        Ok(DataCenterCatalog { device_types })
    }
}

// A flat device type named `device_types` maps measurements straight to
// `{attribute, devices}` entries; the wrapped form nests one level deeper.
fn is_measurement_map(value: &Value) -> bool {
    match value.as_object() {
        Some(map) if !map.is_empty() => map.values().all(|entry| {
            entry
                .as_object()
                .map_or(false, |e| e.contains_key("devices") || e.contains_key("attribute"))
        }),
        _ => false,
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
    Other(String),
}

impl From<String> for JobStatus {
    fn from(raw: String) -> Self {
        // Exact spellings only; anything else is kept as sent.
        match raw.as_str() {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "success" => JobStatus::Success,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Other(raw),
        }
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => f.write_str("pending"),
            JobStatus::Running => f.write_str("running"),
            JobStatus::Success => f.write_str("success"),
            JobStatus::Failed => f.write_str("failed"),
            JobStatus::Other(raw) => f.write_str(raw),
        }
    }
}

/// metric group -> metric name -> value
pub type JobStatistics = IndexMap<String, IndexMap<String, f64>>;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct JobProperties {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub statistics: Option<JobStatistics>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Job {
    pub name: String,
    pub status: JobStatus,
    #[serde(default)]
    pub properties: Option<JobProperties>,
}

impl Job {
    pub fn statistic(&self, group: &str, metric: &str) -> Option<f64> {
        self.properties
            .as_ref()?
            .statistics
            .as_ref()?
            .get(group)?
            .get(metric)
            .copied()
    }
}

/// Prediction/expectation payloads of one job, filled by independent fetches.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct JobDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction: Option<TimeSeries>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expectation: Option<TimeSeries>,
}

impl JobDetail {
    /// Fields present in `other` win; absent ones keep their current value.
    pub fn merge(mut self, other: JobDetail) -> JobDetail {
        if other.prediction.is_some() {
            self.prediction = other.prediction;
        }
        if other.expectation.is_some() {
            self.expectation = other.expectation;
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.prediction.is_none() && self.expectation.is_none()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MappingProperties {
    #[serde(default)]
    pub device_type_mapping: DeviceTypeMapping,
}

/// Model-type mapping attached to a job; drives the job-detail selection cascade.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ModelTypeMapping {
    #[serde(default)]
    pub properties: MappingProperties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailKind {
    Prediction,
    Expectation,
}

impl DetailKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailKind::Prediction => "prediction",
            DetailKind::Expectation => "expectation",
        }
    }
}

// Body of train/test/apply requests.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TimeRange {
    pub starttime: String,
    pub endtime: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobAction {
    Build,
    Train(TimeRange),
    Test(TimeRange),
    Apply(TimeRange),
}

impl JobAction {
    pub fn name(&self) -> &'static str {
        match self {
            JobAction::Build => "build",
            JobAction::Train(_) => "train",
            JobAction::Test(_) => "test",
            JobAction::Apply(_) => "apply",
        }
    }

    pub fn range(&self) -> Option<&TimeRange> {
        match self {
            JobAction::Build => None,
            JobAction::Train(range) | JobAction::Test(range) | JobAction::Apply(range) => {
                Some(range)
            }
        }
    }
}

/// Date range and server-side downsampling applied to time-series requests.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TimeFilter {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub aggregation_window_secs: u64,
    pub aggregation_fn: String,
}

impl Default for TimeFilter {
    fn default() -> Self {
        TimeFilter {
            start_date: NaiveDate::from_ymd_opt(2017, 7, 5).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2017, 7, 6).unwrap_or_default(),
            aggregation_window_secs: 300,
            aggregation_fn: "mean".to_string(),
        }
    }
}

impl TimeFilter {
    /// Start of the first day, e.g. `2017-07-05T00:00:00`.
    pub fn start_time(&self) -> String {
        format!("{}T00:00:00", self.start_date.format("%Y-%m-%d"))
    }

    /// End of the last day, e.g. `2017-07-06T23:59:59`.
    pub fn end_time(&self) -> String {
        format!("{}T23:59:59", self.end_date.format("%Y-%m-%d"))
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("aggregation", self.aggregation_fn.clone()),
            ("group_by", format!("time({}s)", self.aggregation_window_secs)),
            ("starttime", self.start_time()),
            ("endtime", self.end_time()),
        ]
    }

    pub fn time_range(&self) -> TimeRange {
        TimeRange {
            starttime: self.start_time(),
            endtime: self.end_time(),
        }
    }
}

/// Query descriptor for measurement and device series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesQuery {
    pub data_center: String,
    pub device_type: String,
    pub measurement: String,
    pub device: Option<String>,
    pub filter: TimeFilter,
}

impl SeriesQuery {
    pub fn path_args(&self) -> Vec<&str> {
        let mut args = vec![
            self.data_center.as_str(),
            self.device_type.as_str(),
            self.measurement.as_str(),
        ];
        if let Some(device) = &self.device {
            args.push(device.as_str());
        }
        args
    }
}
