use std::path::Path;

use crate::endpoint::Endpoint;
use crate::error::GatewayError;
use crate::net::{Gateway, Notice};
use crate::selection::DeviceRef;
use crate::store::Update;
use crate::types::{
    DetailKind, Job, JobAction, JobDetail, MeasurementCatalog, ModelCatalog, ModelTypeMapping,
    SeriesQuery, TimeFilter, TimeSeries,
};

/// Turns operator intents into gateway calls. Fetches resolve to an
/// [`Update`] for the store; a failed fetch yields no update.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    gateway: Gateway,
}

impl Dispatcher {
    pub fn new(gateway: Gateway) -> Self {
        Dispatcher { gateway }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub async fn fetch_model_list(&self) -> Result<Update, GatewayError> {
        let models: ModelCatalog = self.gateway.get_json(Endpoint::ModelList, &[], &[]).await?;
        log::info!("Fetched {} models.", models.len());
        Ok(Update::ModelList(models))
    }

    pub async fn fetch_measurement_list(&self) -> Result<Update, GatewayError> {
        let catalog: MeasurementCatalog = self
            .gateway
            .get_json(Endpoint::MeasurementList, &[], &[])
            .await?;
        log::info!("Fetched measurement catalog for {} data centers.", catalog.len());
        Ok(Update::MeasurementList(catalog))
    }

    pub async fn fetch_device_type_data(
        &self,
        data_center: &str,
        device_type: &str,
    ) -> Result<Update, GatewayError> {
        let data: TimeSeries = self
            .gateway
            .get_json(Endpoint::DeviceTypeData, &[data_center, device_type], &[])
            .await?;
        Ok(Update::DeviceTypeData(data))
    }

    pub async fn fetch_measurement_data(&self, query: &SeriesQuery) -> Result<Update, GatewayError> {
        let data = self.fetch_series(Endpoint::MeasurementData, query).await?;
        Ok(Update::MeasurementData(data))
    }

    pub async fn fetch_device_data(&self, query: &SeriesQuery) -> Result<Update, GatewayError> {
        let data = self.fetch_series(Endpoint::DeviceData, query).await?;
        Ok(Update::DeviceData(data))
    }

    /// Search action of the data screen: device series when a device is
    /// chosen, measurement series otherwise.
    pub async fn search(&self, query: &SeriesQuery) -> Result<Update, GatewayError> {
        if query.device.is_some() {
            self.fetch_device_data(query).await
        } else {
            self.fetch_measurement_data(query).await
        }
    }

    async fn fetch_series(
        &self,
        endpoint: Endpoint,
        query: &SeriesQuery,
    ) -> Result<TimeSeries, GatewayError> {
        let data: TimeSeries = self
            .gateway
            .get_json(endpoint, &query.path_args(), &query.filter.query_pairs())
            .await?;
        log::info!(
            "Fetched {} series keys for {}/{}/{}.",
            data.len(),
            query.data_center,
            query.device_type,
            query.measurement
        );
        Ok(data)
    }

    pub async fn fetch_model_types(&self, data_center: &str) -> Result<Update, GatewayError> {
        let model_types: Vec<String> = self
            .gateway
            .get_json(Endpoint::ModelTypes, &[data_center], &[])
            .await?;
        Ok(Update::ModelTypes(model_types))
    }

    pub async fn fetch_job_list(&self, data_center: &str) -> Result<Update, GatewayError> {
        let jobs: Vec<Job> = self
            .gateway
            .get_json(Endpoint::JobList, &[data_center], &[])
            .await?;
        log::info!("Fetched {} jobs for {}.", jobs.len(), data_center);
        Ok(Update::JobList(jobs))
    }

    pub async fn fetch_job_result(
        &self,
        data_center: &str,
        job: &str,
    ) -> Result<Update, GatewayError> {
        let detail: JobDetail = self
            .gateway
            .get_json(Endpoint::JobResult, &[data_center, job], &[])
            .await?;
        Ok(Update::JobResult(detail))
    }

    pub async fn fetch_job_detail(
        &self,
        data_center: &str,
        job: &str,
        kind: DetailKind,
    ) -> Result<Update, GatewayError> {
        let data: TimeSeries = self
            .gateway
            .get_json(Endpoint::JobAttribute, &[data_center, job, kind.as_str()], &[])
            .await?;
        Ok(detail_update(kind, data))
    }

    pub async fn fetch_job_detail_by_device(
        &self,
        data_center: &str,
        job: &str,
        kind: DetailKind,
        target: &DeviceRef,
    ) -> Result<Update, GatewayError> {
        let args = [
            data_center,
            job,
            kind.as_str(),
            target.device_type.as_str(),
            target.measurement.as_str(),
            target.device.as_str(),
        ];
        let data: TimeSeries = self
            .gateway
            .get_json(Endpoint::JobAttributeByDevice, &args, &[])
            .await?;
        Ok(detail_update(kind, data))
    }

    /// Search action of the job-detail screen. Clears the detail, then fetches
    /// prediction and expectation concurrently. Failed halves are left out.
    pub async fn search_job_detail(
        &self,
        data_center: &str,
        job: &str,
        target: &DeviceRef,
    ) -> Vec<Update> {
        let (prediction, expectation) = tokio::join!(
            self.fetch_job_detail_by_device(data_center, job, DetailKind::Prediction, target),
            self.fetch_job_detail_by_device(data_center, job, DetailKind::Expectation, target),
        );
        let mut updates = vec![Self::clear_job_detail()];
        updates.extend(prediction.ok());
        updates.extend(expectation.ok());
        updates
    }

    /// Whole-job counterpart of [`Dispatcher::search_job_detail`]: clears the
    /// detail, then either fetches one half or the merged result object.
    pub async fn search_job_result(
        &self,
        data_center: &str,
        job: &str,
        kind: Option<DetailKind>,
    ) -> Vec<Update> {
        let fetched = match kind {
            Some(kind) => self.fetch_job_detail(data_center, job, kind).await,
            None => self.fetch_job_result(data_center, job).await,
        };
        let mut updates = vec![Self::clear_job_detail()];
        updates.extend(fetched.ok());
        updates
    }

    pub async fn fetch_job_model_mapping(
        &self,
        data_center: &str,
        job: &str,
    ) -> Result<Update, GatewayError> {
        let mapping: ModelTypeMapping = self
            .gateway
            .get_json(Endpoint::JobModelMapping, &[data_center, job], &[])
            .await?;
        Ok(Update::JobModelMapping(mapping))
    }

    /// Fire-and-acknowledge. Success is announced as a notice; the store is
    /// not touched.
    pub async fn trigger(
        &self,
        action: JobAction,
        data_center: &str,
        model_type: &str,
    ) -> Result<(), GatewayError> {
        self.gateway.trigger(&action, data_center, model_type).await?;
        log::info!("Queued {} for {}/{}.", action.name(), data_center, model_type);
        self.gateway.notify(Notice::JobQueued {
            action: action.name(),
            model_type: model_type.to_string(),
        });
        Ok(())
    }

    pub async fn import_model(&self, model_name: &str, file: &Path) -> Result<(), GatewayError> {
        self.upload(Endpoint::ModelImport, &[model_name], file).await
    }

    pub async fn import_device_type_series(
        &self,
        data_center: &str,
        device_type: &str,
        file: &Path,
    ) -> Result<(), GatewayError> {
        self.upload(Endpoint::DeviceTypeImport, &[data_center, device_type], file)
            .await
    }

    pub async fn import_measurement_series(
        &self,
        data_center: &str,
        device_type: &str,
        measurement: &str,
        file: &Path,
    ) -> Result<(), GatewayError> {
        self.upload(
            Endpoint::MeasurementImport,
            &[data_center, device_type, measurement],
            file,
        )
        .await
    }

    async fn upload(
        &self,
        endpoint: Endpoint,
        args: &[&str],
        file: &Path,
    ) -> Result<(), GatewayError> {
        let response = self.gateway.post_file(endpoint, args, file).await?;
        let target = response.url().path().to_string();
        log::info!("Uploaded {} to {}.", file.display(), target);
        self.gateway.notify(Notice::Uploaded { target });
        Ok(())
    }

    pub async fn export_device_type_series(
        &self,
        data_center: &str,
        device_type: &str,
        filter: &TimeFilter,
    ) -> Result<Vec<u8>, GatewayError> {
        self.gateway
            .download(
                Endpoint::DeviceTypeExport,
                &[data_center, device_type],
                &filter.query_pairs(),
            )
            .await
    }

    pub async fn export_measurement_series(
        &self,
        data_center: &str,
        device_type: &str,
        measurement: &str,
        filter: &TimeFilter,
    ) -> Result<Vec<u8>, GatewayError> {
        self.gateway
            .download(
                Endpoint::MeasurementExport,
                &[data_center, device_type, measurement],
                &filter.query_pairs(),
            )
            .await
    }

    pub fn clear_series() -> Update {
        Update::ClearSeries
    }

    pub fn clear_job_detail() -> Update {
        Update::JobDetailClear
    }
}

fn detail_update(kind: DetailKind, data: TimeSeries) -> Update {
    match kind {
        DetailKind::Prediction => Update::JobPrediction(data),
        DetailKind::Expectation => Update::JobExpectation(data),
    }
}
