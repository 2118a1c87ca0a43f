// End-to-end station input builds against a mock station service

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use mockito::{Matcher, Mock, Server, ServerGuard};
use tempfile::TempDir;
use wind_station_pipeline::error::PipelineError;
use wind_station_pipeline::fetcher::{FetchPolicy, TabularFetcher};
use wind_station_pipeline::manifest::{FailureStep, RunManifest};
use wind_station_pipeline::station_file::DEFAULT_STATION_FIELDS;
use wind_station_pipeline::station_inputs::{StationInputsBuilder, StationInputsRequest, MANIFEST_FILE};
use wind_station_pipeline::stations::keystone_stations;

// Local times are MST (UTC-7): 09:00 am = 16:00Z
const WIND_STUDY_PAGE: &str = r#"
<HTML><BODY>
<H2>Keystone SA - Wind Study</H2>
<PRE>
Date        Time      Temp  Spd  Dir  Gst
2025 Dec 14 11:00 am    22   15  270   24
2025 Dec 14 10:10 am    21   12  265   20
2025 Dec 14 09:00 am    20   10  260    M
</PRE>
</BODY></HTML>
"#;

fn fast_policy() -> FetchPolicy {
    FetchPolicy {
        max_tries: 2,
        timeout: Duration::from_secs(5),
        backoff_base: Duration::from_millis(1),
        throttle: Duration::ZERO,
    }
}

fn end_utc() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 12, 14, 18, 20, 0).unwrap()
}

fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 12, 14, 18, 30, 0).unwrap()
}

fn write_template(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("template.csv");
    fs::write(&path, format!("{}\n", DEFAULT_STATION_FIELDS.join(","))).unwrap();
    path
}

async fn mock_station(server: &mut ServerGuard, code: &str, status: usize, body: &str) -> Mock {
    server
        .mock("GET", "/tabular.php")
        .match_query(Matcher::UrlEncoded("st".into(), code.into()))
        .with_status(status)
        .with_body(body)
        .create_async()
        .await
}

fn request(tmp: &TempDir, best_effort: bool) -> StationInputsRequest {
    let mut request = StationInputsRequest::new(
        end_utc(),
        tmp.path().join("out"),
        write_template(tmp.path()),
    );
    request.hours = 3;
    request.best_effort = best_effort;
    request
}

#[tokio::test]
async fn test_best_effort_run_records_failed_station() {
    let mut server = Server::new_async().await;
    let ok = mock_station(&mut server, "CAKWS", 200, WIND_STUDY_PAGE).await;
    let failing = server
        .mock("GET", "/tabular.php")
        .match_query(Matcher::UrlEncoded("st".into(), "CAKWP".into()))
        .with_status(500)
        .expect(2)
        .create_async()
        .await;

    let tmp = TempDir::new().unwrap();
    let fetcher = TabularFetcher::new(format!("{}/tabular.php", server.url()), fast_policy()).unwrap();
    let stations = keystone_stations();

    let report = StationInputsBuilder::new(&fetcher, &stations)
        .with_pacing(Duration::ZERO)
        .build(&request(&tmp, true), fixed_now())
        .await
        .unwrap();

    ok.assert_async().await;
    failing.assert_async().await;

    let manifest = &report.manifest;
    assert_eq!(manifest.created_utc, fixed_now());
    assert_eq!(manifest.requested.end_utc_aligned, Utc.with_ymd_and_hms(2025, 12, 14, 18, 0, 0).unwrap());
    assert_eq!(manifest.window.hours_utc.len(), 3);
    assert_eq!(manifest.window.start_utc, Utc.with_ymd_and_hms(2025, 12, 14, 16, 0, 0).unwrap());
    assert_eq!(manifest.outputs.csv_files.len(), 3);

    assert_eq!(manifest.errors.len(), 1);
    assert_eq!(manifest.errors[0].station, "CAKWP");
    assert_eq!(manifest.errors[0].step, FailureStep::Fetch);
    assert_eq!(manifest.fetch_failures(), 1);

    let wind_study = &manifest.stations[0];
    assert!(wind_study.fetch_ok);
    assert_eq!(wind_study.parsed_records, 3);
    assert_eq!(wind_study.parsed_columns, vec!["Temp", "Spd", "Dir", "Gst"]);
    assert!(wind_study.hourly_missing_hours_utc.is_empty());

    let wapiti = &manifest.stations[1];
    assert!(!wapiti.fetch_ok);
    assert!(wapiti.fetch_error.is_some());
    assert_eq!(wapiti.hourly_missing_hours_utc.len(), 3);

    let on_disk = RunManifest::read(&report.manifest_path).unwrap();
    assert_eq!(&on_disk, manifest);

    let hour_17 = fs::read_to_string(tmp.path().join("out/stations_20251214_1700Z.csv")).unwrap();
    let lines: Vec<&str> = hour_17.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], DEFAULT_STATION_FIELDS.join(","));
    assert!(lines[1].starts_with("CAKWS,GEOGCS,WGS84,39.56216,-105.91444,10,meters,"));
    assert!(lines[1].contains(",12,mph,265,21,F,"));
    assert!(lines[2].starts_with("CAKWP,"));
    assert!(lines[2].contains(",,mph,,,F,"));
}

#[tokio::test]
async fn test_fetch_failure_fails_run_but_writes_manifest() {
    let mut server = Server::new_async().await;
    let _ok = mock_station(&mut server, "CAKWS", 200, WIND_STUDY_PAGE).await;
    let _failing = mock_station(&mut server, "CAKWP", 503, "").await;

    let tmp = TempDir::new().unwrap();
    let fetcher = TabularFetcher::new(format!("{}/tabular.php", server.url()), fast_policy()).unwrap();
    let stations = keystone_stations();

    let result = StationInputsBuilder::new(&fetcher, &stations)
        .with_pacing(Duration::ZERO)
        .build(&request(&tmp, false), fixed_now())
        .await;

    match result {
        Err(PipelineError::StationFetchFailures { count, manifest }) => {
            assert_eq!(count, 1);
            assert_eq!(manifest, tmp.path().join("out").join(MANIFEST_FILE));
            assert!(manifest.exists());
        }
        other => panic!("Expected StationFetchFailures, got {:?}", other),
    }
    assert!(tmp.path().join("out/stations_20251214_1800Z.csv").exists());
}

#[tokio::test]
async fn test_parse_failure_is_recorded_not_fatal() {
    let mut server = Server::new_async().await;
    let _ok = mock_station(&mut server, "CAKWS", 200, WIND_STUDY_PAGE).await;
    let _garbled = mock_station(&mut server, "CAKWP", 200, "<html>maintenance</html>").await;

    let tmp = TempDir::new().unwrap();
    let fetcher = TabularFetcher::new(format!("{}/tabular.php", server.url()), fast_policy()).unwrap();
    let stations = keystone_stations();

    let report = StationInputsBuilder::new(&fetcher, &stations)
        .with_pacing(Duration::ZERO)
        .build(&request(&tmp, false), fixed_now())
        .await
        .unwrap();

    assert_eq!(report.manifest.errors.len(), 1);
    assert_eq!(report.manifest.errors[0].step, FailureStep::Parse);
    assert_eq!(report.manifest.fetch_failures(), 0);
    assert!(report.manifest.stations[1].fetch_ok);
    assert_eq!(report.manifest.stations[1].parsed_records, 0);
}

#[tokio::test]
async fn test_rerun_produces_identical_outputs() {
    let mut server = Server::new_async().await;
    let _a = mock_station(&mut server, "CAKWS", 200, WIND_STUDY_PAGE).await;
    let _b = mock_station(&mut server, "CAKWP", 200, WIND_STUDY_PAGE).await;

    let tmp = TempDir::new().unwrap();
    let fetcher = TabularFetcher::new(format!("{}/tabular.php", server.url()), fast_policy()).unwrap();
    let stations = keystone_stations();
    let mut req = request(&tmp, false);
    req.cache_raw = true;
    let builder = StationInputsBuilder::new(&fetcher, &stations).with_pacing(Duration::ZERO);

    let first = builder.build(&req, fixed_now()).await.unwrap();
    let snapshot: Vec<Vec<u8>> = first
        .manifest
        .outputs
        .csv_files
        .iter()
        .chain(std::iter::once(&first.manifest_path))
        .map(|p| fs::read(p).unwrap())
        .collect();

    let second = builder.build(&req, fixed_now()).await.unwrap();
    let rerun: Vec<Vec<u8>> = second
        .manifest
        .outputs
        .csv_files
        .iter()
        .chain(std::iter::once(&second.manifest_path))
        .map(|p| fs::read(p).unwrap())
        .collect();

    assert_eq!(snapshot, rerun);
    assert_eq!(second.manifest.outputs.raw_html_files.len(), 2);
    assert!(tmp
        .path()
        .join("out/caic_CAKWS_end_20251214_1800Z.html")
        .exists());
}

#[tokio::test]
async fn test_bad_template_fails_before_fetching() {
    let mut server = Server::new_async().await;
    let untouched = server
        .mock("GET", "/tabular.php")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let tmp = TempDir::new().unwrap();
    let fetcher = TabularFetcher::new(format!("{}/tabular.php", server.url()), fast_policy()).unwrap();
    let stations = keystone_stations();
    let mut req = request(&tmp, true);
    req.template_csv = tmp.path().join("missing.csv");

    let result = StationInputsBuilder::new(&fetcher, &stations)
        .with_pacing(Duration::ZERO)
        .build(&req, fixed_now())
        .await;

    assert!(matches!(result, Err(PipelineError::StationFile(_))));
    untouched.assert_async().await;
}

#[tokio::test]
async fn test_zero_range_rejected_before_fetching() {
    let mut server = Server::new_async().await;
    let untouched = server
        .mock("GET", "/tabular.php")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let tmp = TempDir::new().unwrap();
    let fetcher = TabularFetcher::new(format!("{}/tabular.php", server.url()), fast_policy()).unwrap();
    let stations = keystone_stations();
    let mut req = request(&tmp, true);
    req.range_hours = 0;

    let result = StationInputsBuilder::new(&fetcher, &stations)
        .with_pacing(Duration::ZERO)
        .build(&req, fixed_now())
        .await;

    match result {
        Err(PipelineError::InvalidRequest(message)) => assert!(message.contains("range_hours")),
        other => panic!("Expected InvalidRequest, got {:?}", other),
    }
    untouched.assert_async().await;
    assert!(!tmp.path().join("out").join(MANIFEST_FILE).exists());
}

#[tokio::test]
async fn test_station_file_write_failure_still_writes_manifest() {
    let mut server = Server::new_async().await;
    let _a = mock_station(&mut server, "CAKWS", 200, WIND_STUDY_PAGE).await;
    let _b = mock_station(&mut server, "CAKWP", 200, WIND_STUDY_PAGE).await;

    let tmp = TempDir::new().unwrap();
    // A directory squatting on one hour's file name makes that write fail
    fs::create_dir_all(tmp.path().join("out/stations_20251214_1700Z.csv")).unwrap();

    let fetcher = TabularFetcher::new(format!("{}/tabular.php", server.url()), fast_policy()).unwrap();
    let stations = keystone_stations();

    let result = StationInputsBuilder::new(&fetcher, &stations)
        .with_pacing(Duration::ZERO)
        .build(&request(&tmp, true), fixed_now())
        .await;

    assert!(matches!(result, Err(PipelineError::StationFile(_))));

    let manifest = RunManifest::read(&tmp.path().join("out").join(MANIFEST_FILE)).unwrap();
    assert_eq!(manifest.outputs.csv_files.len(), 2);
    assert_eq!(manifest.errors.len(), 1);
    assert_eq!(manifest.errors[0].step, FailureStep::Write);
    assert!(manifest.errors[0].error.contains("stations_20251214_1700Z.csv"));
    assert!(tmp.path().join("out/stations_20251214_1800Z.csv").exists());
}
