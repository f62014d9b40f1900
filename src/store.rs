//! Versioned snapshot store.
//!
//! Every change goes through [`reduce`], a pure function from the previous
//! state and one [`Update`] to the next state. [`Store`] wraps it with a
//! version counter and publishes each snapshot on a watch channel.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::types::{
    Job, JobDetail, MeasurementCatalog, ModelCatalog, ModelTypeMapping, TimeSeries,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct State {
    pub models: ModelCatalog,
    pub measurements: MeasurementCatalog,
    pub model_types: Vec<String>,
    pub device_type_data: TimeSeries,
    pub measurement_data: TimeSeries,
    pub device_data: TimeSeries,
    pub jobs: Vec<Job>,
    pub job_detail: JobDetail,
    pub job_model_mapping: Option<ModelTypeMapping>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    ModelList(ModelCatalog),
    MeasurementList(MeasurementCatalog),
    ModelTypes(Vec<String>),
    DeviceTypeData(TimeSeries),
    MeasurementData(TimeSeries),
    DeviceData(TimeSeries),
    ClearSeries,
    JobList(Vec<Job>),
    JobResult(JobDetail),
    JobPrediction(TimeSeries),
    JobExpectation(TimeSeries),
    JobDetailClear,
    JobModelMapping(ModelTypeMapping),
}

impl Update {
    pub fn slice(&self) -> &'static str {
        match self {
            Update::ModelList(_) => "model-list",
            Update::MeasurementList(_) => "measurement-list",
            Update::ModelTypes(_) => "model-types",
            Update::DeviceTypeData(_) => "device-type-data",
            Update::MeasurementData(_) => "measurement-data",
            Update::DeviceData(_) => "device-data",
            Update::ClearSeries => "series-clear",
            Update::JobList(_) => "job-list",
            Update::JobResult(_) => "job-detail",
            Update::JobPrediction(_) => "job-detail-prediction",
            Update::JobExpectation(_) => "job-detail-expectation",
            Update::JobDetailClear => "job-detail-clear",
            Update::JobModelMapping(_) => "job-model-mapping",
        }
    }
}

/// Catalogs and series are replaced wholesale; job detail fields merge.
pub fn reduce(state: &State, update: Update) -> State {
    let mut next = state.clone();
    match update {
        Update::ModelList(models) => next.models = models,
        Update::MeasurementList(measurements) => next.measurements = measurements,
        Update::ModelTypes(model_types) => next.model_types = model_types,
        Update::DeviceTypeData(data) => next.device_type_data = data,
        Update::MeasurementData(data) => next.measurement_data = data,
        Update::DeviceData(data) => next.device_data = data,
        Update::ClearSeries => {
            next.device_type_data.clear();
            next.measurement_data.clear();
            next.device_data.clear();
        }
        Update::JobList(jobs) => next.jobs = jobs,
        Update::JobResult(detail) => {
            next.job_detail = std::mem::take(&mut next.job_detail).merge(detail);
        }
        Update::JobPrediction(data) => next.job_detail.prediction = Some(data),
        Update::JobExpectation(data) => next.job_detail.expectation = Some(data),
        Update::JobDetailClear => next.job_detail = JobDetail::default(),
        Update::JobModelMapping(mapping) => next.job_model_mapping = Some(mapping),
    }
    next
}

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub version: u64,
    pub state: Arc<State>,
}

#[derive(Debug)]
pub struct Store {
    tx: watch::Sender<Snapshot>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Snapshot::default());
        Store { tx }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    pub fn apply(&self, update: Update) -> Snapshot {
        let slice = update.slice();
        self.tx.send_modify(|snapshot| {
            let next = reduce(&snapshot.state, update);
            snapshot.version += 1;
            snapshot.state = Arc::new(next);
        });
        let snapshot = self.snapshot();
        debug!(slice, version = snapshot.version, "store updated");
        snapshot
    }

    pub fn apply_all(&self, updates: impl IntoIterator<Item = Update>) -> Snapshot {
        for update in updates {
            self.apply(update);
        }
        self.snapshot()
    }
}
