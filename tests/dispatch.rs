use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, Uri};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use energy_admin::endpoint::Endpoint;
use energy_admin::projector::{self, Cell};
use energy_admin::selection::{DeviceRef, Selection};
use energy_admin::types::{DetailKind, JobAction, SeriesQuery, TimeFilter};
use energy_admin::{Dispatcher, Gateway, GatewayError, Notice, Store, Update};

#[derive(Clone, Default)]
struct Recorded {
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    bodies: Arc<Mutex<Vec<String>>>,
    paths: Arc<Mutex<Vec<String>>>,
}

async fn export_series(
    State(rec): State<Recorded>,
    uri: Uri,
    Query(q): Query<HashMap<String, String>>,
) -> String {
    rec.paths.lock().unwrap().push(uri.path().to_string());
    rec.queries.lock().unwrap().push(q);
    "time,value\n2017-08-01T00:00:00,1\n".to_string()
}

async fn import_series(State(rec): State<Recorded>, uri: Uri, body: Bytes) -> Json<Value> {
    rec.paths.lock().unwrap().push(uri.path().to_string());
    rec.bodies
        .lock()
        .unwrap()
        .push(String::from_utf8_lossy(&body).into_owned());
    Json(json!({}))
}

async fn spawn_backend() -> (String, Recorded) {
    let recorded = Recorded::default();
    let app = Router::new()
        .route(
            "/api/metadata/database/models",
            get(|| async { Json(json!({"sensor": ["id", "name"], "datacenter": ["id"]})) }),
        )
        .route(
            "/api/timeseries/{dc}/{dt}/{m}",
            get(|State(rec): State<Recorded>, Query(q): Query<HashMap<String, String>>| async move {
                rec.queries.lock().unwrap().push(q);
                Json(json!({
                    "dev1": {"2017-07-06": 5},
                    "dev2": {"2017-07-05": 1, "2017-07-06": 2}
                }))
            }),
        )
        .route(
            "/api/timeseries/{dc}/{dt}/{m}/{device}",
            get(|| async { Json(json!({"2017-07-06": 20, "2017-07-05": 10})) }),
        )
        .route(
            "/api/models/{dc}",
            get(|Path(dc): Path<String>| async move {
                if dc == "broken" {
                    return Err((StatusCode::INTERNAL_SERVER_ERROR, "model store offline"));
                }
                if dc == "slow" {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                }
                Ok(Json(json!(["pue_prediction", "sensor_attribute_prediction"])))
            }),
        )
        .route(
            "/api/models/{dc}/{mt}/{action}",
            post(|State(rec): State<Recorded>, body: Bytes| async move {
                rec.bodies
                    .lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&body).into_owned());
                Json(json!({}))
            }),
        )
        .route(
            "/api/import/database/{model}",
            post(|State(rec): State<Recorded>, body: Bytes| async move {
                rec.bodies
                    .lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&body).into_owned());
                Json(json!({}))
            }),
        )
        .route(
            "/api/results/{dc}/{job}/models",
            get(|| async {
                Json(json!({
                    "properties": {"device_type_mapping": {
                        "controller_power_supply_attribute": {"power": ["ps1", "ps2"]},
                        "sensor_attribute": {"temperature": ["s1"]}
                    }}
                }))
            }),
        )
        .route(
            "/api/results/{dc}/{job}/{attr}/{dt}/{m}/{device}",
            get(|Path((_, _, attr, _, _, device)): Path<(String, String, String, String, String, String)>| async move {
                if device == "ps2" && attr == "expectation" {
                    return Err(StatusCode::NOT_FOUND);
                }
                let value = if attr == "prediction" { 1.5 } else { 1.0 };
                Ok(Json(json!({"2017-07-06": value, "2017-07-05": value})))
            }),
        )
        .route(
            "/api/results/{dc}/{job}",
            get(|Path((_, job)): Path<(String, String)>| async move {
                if job == "missing" {
                    return Err(StatusCode::NOT_FOUND);
                }
                Ok(Json(json!({"prediction": {"2017-07-06": 3.0, "2017-07-05": 2.5}})))
            }),
        )
        .route(
            "/api/results/{dc}/{job}/{attr}",
            get(|Path((_, _, attr)): Path<(String, String, String)>| async move {
                let value = if attr == "prediction" { 2.5 } else { 2.0 };
                Json(json!({"2017-07-05": value}))
            }),
        )
        .route("/api/export/timeseries/{dc}/{dt}", get(export_series))
        .route("/api/export/timeseries/{dc}/{dt}/{m}", get(export_series))
        .route("/api/import/timeseries/{dc}/{dt}", post(import_series))
        .route("/api/import/timeseries/{dc}/{dt}/{m}", post(import_series))
        .with_state(recorded.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), recorded)
}

async fn dispatcher() -> (Dispatcher, Recorded) {
    let (url, recorded) = spawn_backend().await;
    (Dispatcher::new(Gateway::new(Client::new(), &url)), recorded)
}

fn query(device: Option<&str>) -> SeriesQuery {
    SeriesQuery {
        data_center: "openlab".into(),
        device_type: "sensor_attribute".into(),
        measurement: "temperature".into(),
        device: device.map(str::to_string),
        filter: TimeFilter::default(),
    }
}

#[tokio::test]
async fn model_list_lands_in_store() {
    let (dispatcher, _) = dispatcher().await;
    let store = Store::new();

    let update = dispatcher.fetch_model_list().await.unwrap();
    let snapshot = store.apply(update);

    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.state.models["sensor"], vec!["id", "name"]);
    assert!(!dispatcher.gateway().is_busy());
}

#[tokio::test]
async fn measurement_search_sends_filter_and_projects_first_series_rows() {
    let (dispatcher, recorded) = dispatcher().await;
    let store = Store::new();

    let update = dispatcher.search(&query(None)).await.unwrap();
    assert_eq!(update.slice(), "measurement-data");
    let state = store.apply(update).state;

    let sent = recorded.queries.lock().unwrap().pop().unwrap();
    assert_eq!(sent["aggregation"], "mean");
    assert_eq!(sent["group_by"], "time(300s)");
    assert_eq!(sent["starttime"], "2017-07-05T00:00:00");
    assert_eq!(sent["endtime"], "2017-07-06T23:59:59");

    let table = projector::multi_series_table(&state.measurement_data).ready().unwrap();
    assert_eq!(table.rows.len(), 1);
    assert_eq!(table.rows[0].label, "2017-07-06");
    assert_eq!(table.rows[0].cells, vec![Cell::Value(json!(5)), Cell::Value(json!(2))]);

    let chart = projector::multi_series_chart("temperature", &state.measurement_data)
        .ready()
        .unwrap();
    assert_eq!(chart.series[1].points.len(), 2);
}

#[tokio::test]
async fn device_search_renders_sorted_rows() {
    let (dispatcher, _) = dispatcher().await;
    let store = Store::new();

    let update = dispatcher.search(&query(Some("B"))).await.unwrap();
    let state = store.apply(update).state;

    let table = projector::single_series_table("B", &state.device_data).ready().unwrap();
    let rows: Vec<_> = table
        .rows
        .iter()
        .map(|r| (r.label.as_str(), r.cells[0].to_string()))
        .collect();
    assert_eq!(
        rows,
        vec![("2017-07-05", "10".to_string()), ("2017-07-06", "20".to_string())]
    );
}

#[tokio::test]
async fn server_error_yields_no_update_and_alerts() {
    let (dispatcher, _) = dispatcher().await;
    let mut notices = dispatcher.gateway().notices();
    let store = Store::new();

    let result = dispatcher.fetch_model_types("broken").await;
    match result {
        Err(GatewayError::Status { status, body, .. }) => {
            assert_eq!(status.as_u16(), 500);
            assert_eq!(body, "model store offline");
        }
        other => panic!("expected status error, got {:?}", other),
    }
    assert_eq!(store.snapshot().version, 0);
    assert!(!dispatcher.gateway().is_busy());
    assert_eq!(dispatcher.gateway().in_flight(), 0);

    match notices.try_recv() {
        Ok(Notice::Alert(alert)) => assert!(alert.contains("\"status\": 500")),
        other => panic!("expected alert, got {:?}", other),
    }

    let ok = dispatcher.fetch_model_types("openlab").await.unwrap();
    assert_eq!(
        ok,
        Update::ModelTypes(vec!["pue_prediction".into(), "sensor_attribute_prediction".into()])
    );
}

#[tokio::test]
async fn train_posts_range_and_notifies_without_touching_store() {
    let (dispatcher, recorded) = dispatcher().await;
    let mut notices = dispatcher.gateway().notices();

    let range = TimeFilter::default().time_range();
    dispatcher
        .trigger(JobAction::Train(range), "openlab", "pue_prediction")
        .await
        .unwrap();
    dispatcher
        .trigger(JobAction::Build, "openlab", "pue_prediction")
        .await
        .unwrap();

    let bodies = recorded.bodies.lock().unwrap().clone();
    let train: Value = serde_json::from_str(&bodies[0]).unwrap();
    assert_eq!(
        train,
        json!({"starttime": "2017-07-05T00:00:00", "endtime": "2017-07-06T23:59:59"})
    );
    assert!(bodies[1].is_empty());

    assert_eq!(
        notices.try_recv().unwrap(),
        Notice::JobQueued {
            action: "train",
            model_type: "pue_prediction".into()
        }
    );
    assert!(matches!(
        notices.try_recv().unwrap(),
        Notice::JobQueued { action: "build", .. }
    ));
}

#[tokio::test]
async fn model_import_uploads_file_field() {
    let (dispatcher, recorded) = dispatcher().await;
    let mut notices = dispatcher.gateway().notices();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("model.csv");
    std::fs::write(&file, "id,name\n1,alpha\n").unwrap();

    dispatcher.import_model("sensor", &file).await.unwrap();

    let body = recorded.bodies.lock().unwrap().pop().unwrap();
    assert!(body.contains("name=\"file\""));
    assert!(body.contains("1,alpha"));
    assert_eq!(
        notices.try_recv().unwrap(),
        Notice::Uploaded {
            target: "/api/import/database/sensor".into()
        }
    );
}

#[tokio::test]
async fn job_detail_cascade_and_concurrent_fetches() {
    let (dispatcher, _) = dispatcher().await;
    let store = Store::new();

    let state = store
        .apply(dispatcher.fetch_job_model_mapping("openlab", "job-1").await.unwrap())
        .state;
    let mapping = &state.job_model_mapping.as_ref().unwrap().properties.device_type_mapping;
    let selection = Selection::from_mapping(mapping);
    let target = selection.device_ref().unwrap();
    assert_eq!(
        target,
        DeviceRef {
            device_type: "controller_power_supply_attribute".into(),
            measurement: "power".into(),
            device: "ps1".into(),
        }
    );

    let state = store
        .apply_all(dispatcher.search_job_detail("openlab", "job-1", &target).await)
        .state;
    let chart = projector::job_detail_chart("job-1", &state.job_detail).ready().unwrap();
    assert_eq!(chart.series[0].name, "prediction");
    assert_eq!(chart.series[0].points[0].1, json!(1.5));
    assert_eq!(chart.series[1].points.len(), 2);

    // Expectation for ps2 is missing on the server: only the prediction half lands.
    let ps2 = selection.with_device("ps2").device_ref().unwrap();
    let updates = dispatcher.search_job_detail("openlab", "job-1", &ps2).await;
    assert_eq!(updates.len(), 2);
    let state = store.apply_all(updates).state;
    assert!(state.job_detail.prediction.is_some());
    assert!(state.job_detail.expectation.is_none());
    assert!(projector::job_detail_chart("job-1", &state.job_detail).is_empty());
}

#[tokio::test]
async fn single_detail_fetch_tags_its_kind() {
    let (dispatcher, _) = dispatcher().await;
    let target = DeviceRef {
        device_type: "sensor_attribute".into(),
        measurement: "temperature".into(),
        device: "s1".into(),
    };
    let update = dispatcher
        .fetch_job_detail_by_device("openlab", "job-1", DetailKind::Expectation, &target)
        .await
        .unwrap();
    assert_eq!(update.slice(), "job-detail-expectation");
}

#[tokio::test]
async fn whole_job_result_merges_with_earlier_half() {
    let (dispatcher, _) = dispatcher().await;
    let store = Store::new();

    store.apply(
        dispatcher
            .fetch_job_detail("openlab", "job-1", DetailKind::Expectation)
            .await
            .unwrap(),
    );
    let update = dispatcher.fetch_job_result("openlab", "job-1").await.unwrap();
    assert_eq!(update.slice(), "job-detail");
    let state = store.apply(update).state;

    let expectation = state.job_detail.expectation.as_ref().unwrap();
    assert_eq!(expectation["2017-07-05"], json!(2.0));
    let chart = projector::job_detail_chart("job-1", &state.job_detail).ready().unwrap();
    assert_eq!(chart.series[0].points.len(), 2);
    assert_eq!(chart.series[1].points.len(), 1);
}

#[tokio::test]
async fn whole_job_search_clears_then_fetches() {
    let (dispatcher, _) = dispatcher().await;
    let store = Store::new();

    let state = store
        .apply_all(dispatcher.search_job_result("openlab", "job-1", None).await)
        .state;
    assert!(state.job_detail.prediction.is_some());
    assert!(state.job_detail.expectation.is_none());

    let updates = dispatcher
        .search_job_result("openlab", "job-1", Some(DetailKind::Prediction))
        .await;
    assert_eq!(
        updates.iter().map(Update::slice).collect::<Vec<_>>(),
        vec!["job-detail-clear", "job-detail-prediction"]
    );

    let mut notices = dispatcher.gateway().notices();
    let updates = dispatcher.search_job_result("openlab", "missing", None).await;
    assert_eq!(updates, vec![Update::JobDetailClear]);
    let state = store.apply_all(updates).state;
    assert!(state.job_detail.is_empty());
    assert!(matches!(notices.try_recv(), Ok(Notice::Alert(_))));
}

#[tokio::test]
async fn export_sends_widened_filter_and_returns_bytes() {
    let (dispatcher, recorded) = dispatcher().await;
    let filter = TimeFilter {
        start_date: NaiveDate::from_ymd_opt(2017, 8, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2017, 8, 2).unwrap(),
        aggregation_window_secs: 60,
        aggregation_fn: "max".into(),
    };

    let bytes = dispatcher
        .export_measurement_series("openlab", "sensor_attribute", "temperature", &filter)
        .await
        .unwrap();
    assert_eq!(bytes, b"time,value\n2017-08-01T00:00:00,1\n".to_vec());

    dispatcher
        .export_device_type_series("openlab", "sensor_attribute", &filter)
        .await
        .unwrap();

    assert_eq!(
        recorded.paths.lock().unwrap().clone(),
        vec![
            "/api/export/timeseries/openlab/sensor_attribute/temperature",
            "/api/export/timeseries/openlab/sensor_attribute",
        ]
    );
    for sent in recorded.queries.lock().unwrap().iter() {
        assert_eq!(sent["starttime"], "2017-08-01T00:00:00");
        assert_eq!(sent["endtime"], "2017-08-02T23:59:59");
        assert_eq!(sent["group_by"], "time(60s)");
        assert_eq!(sent["aggregation"], "max");
    }
    assert!(!dispatcher.gateway().is_busy());
}

#[tokio::test]
async fn series_imports_route_by_device_type_and_measurement() {
    let (dispatcher, recorded) = dispatcher().await;
    let mut notices = dispatcher.gateway().notices();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("series.csv");
    std::fs::write(&file, "time,value\n2017-07-05T00:00:00,1\n").unwrap();

    dispatcher
        .import_device_type_series("openlab", "sensor_attribute", &file)
        .await
        .unwrap();
    dispatcher
        .import_measurement_series("openlab", "sensor_attribute", "temperature", &file)
        .await
        .unwrap();

    let device_type_path = "/api/import/timeseries/openlab/sensor_attribute";
    let measurement_path = "/api/import/timeseries/openlab/sensor_attribute/temperature";
    assert_eq!(
        recorded.paths.lock().unwrap().clone(),
        vec![device_type_path, measurement_path]
    );
    assert!(recorded
        .bodies
        .lock()
        .unwrap()
        .iter()
        .all(|body| body.contains("name=\"file\"") && body.contains("2017-07-05T00:00:00,1")));

    for target in [device_type_path, measurement_path] {
        assert_eq!(
            notices.try_recv().unwrap(),
            Notice::Uploaded {
                target: target.into()
            }
        );
    }
}

#[tokio::test]
async fn busy_holds_until_last_concurrent_call_finishes() {
    let (url, _) = spawn_backend().await;
    let gateway = Gateway::new(Client::new(), &url);
    let mut busy = gateway.busy();
    assert!(!*busy.borrow_and_update());

    let check_mid_flight = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        gateway.is_busy()
    };
    let (fast, slow, busy_mid_flight) = tokio::join!(
        gateway.get_json::<Value>(Endpoint::ModelTypes, &["openlab"], &[]),
        gateway.get_json::<Value>(Endpoint::ModelTypes, &["slow"], &[]),
        check_mid_flight
    );

    assert!(fast.is_ok() && slow.is_ok());
    assert!(busy_mid_flight);
    assert!(!gateway.is_busy());
    assert_eq!(gateway.in_flight(), 0);
    assert!(busy.has_changed().unwrap());
}
