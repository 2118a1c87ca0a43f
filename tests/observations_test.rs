// Observation export against a mock station service

use std::fs;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use mockito::{Matcher, Server};
use tempfile::TempDir;
use wind_station_pipeline::fetcher::{FetchPolicy, TabularFetcher};
use wind_station_pipeline::observations::{export_observations, GustPolicy};
use wind_station_pipeline::stations::keystone_stations;

// Local times are MST (UTC-7)
const WIND_STUDY_PAGE: &str = r#"
<HTML><BODY>
<PRE>
Date        Time      Temp  Spd  Dir  Gst
2025 Dec 14 10:00 am    21   15  270   24
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

#[tokio::test]
async fn test_export_skips_failed_station_and_converts_units() {
    let mut server = Server::new_async().await;
    let ok = server
        .mock("GET", "/tabular.php")
        .match_query(Matcher::UrlEncoded("st".into(), "CAKWS".into()))
        .with_status(200)
        .with_body(WIND_STUDY_PAGE)
        .create_async()
        .await;
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
    let now = Utc.with_ymd_and_hms(2025, 12, 14, 18, 0, 0).unwrap();

    let written = export_observations(
        &fetcher,
        &stations,
        now,
        24,
        "America/Denver",
        tmp.path(),
        GustPolicy::Blank,
    )
    .await
    .unwrap();

    ok.assert_async().await;
    failing.assert_async().await;

    assert_eq!(written, vec![tmp.path().join("obs_CAKWS.csv")]);
    assert!(!tmp.path().join("obs_CAKWP.csv").exists());

    let contents = fs::read_to_string(&written[0]).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "timestamp_utc,speed_mps,direction_deg,gust_mps");
    assert_eq!(lines[1], "2025-12-14T16:00:00+00:00,4.470,260.000,");
    assert_eq!(lines[2], "2025-12-14T17:00:00+00:00,6.706,270.000,10.729");
}
