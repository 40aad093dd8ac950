// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Integration tests for the Atlas client against a mockito server

use futures::StreamExt;
use meshfetch_atlas::{AtlasError, ClientConfig, DiskCache, MemoryCache, NoCache, RemoteClient};
use meshfetch_core::{MeasurementAf, MeasurementType, ResultsMeta};
use mockito::{Matcher, Mock, ServerGuard};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const PAGE_SIZE: usize = 3;

fn items(ids: impl IntoIterator<Item = u64>) -> Vec<Value> {
    ids.into_iter().map(|id| json!({"id": id, "type": "ping"})).collect()
}

fn config(server: &ServerGuard) -> ClientConfig {
    ClientConfig::new(format!("{}/api/v2", server.url()))
        .with_page_size(PAGE_SIZE)
        .with_max_workers(2)
        .with_read_timeout(Duration::from_secs(5))
}

fn meta() -> ResultsMeta {
    ResultsMeta::from_timestamps(
        MeasurementAf::V4,
        MeasurementType::Ping,
        1001,
        1546300800,
        1546304400,
        false,
    )
    .unwrap()
}

fn list_path(endpoint: &str) -> Matcher {
    Matcher::Regex(format!(r"^/api/v2/{}(\?|$)", endpoint))
}

/// Mount one mock per page of `items`, each expected `hits` times.
///
/// The first page is requested without a `page` parameter.
async fn mock_pages(
    server: &mut ServerGuard,
    endpoint: &str,
    items: &[Value],
    hits: usize,
) -> Vec<Mock> {
    let pages: Vec<&[Value]> = if items.is_empty() {
        vec![&[]]
    } else {
        items.chunks(PAGE_SIZE).collect()
    };

    let mut mocks = Vec::with_capacity(pages.len());
    for (i, page) in pages.into_iter().enumerate() {
        let query = if i == 0 {
            Matcher::Regex(format!("page_size={}$", PAGE_SIZE))
        } else {
            Matcher::AllOf(vec![
                Matcher::UrlEncoded("page_size".into(), PAGE_SIZE.to_string()),
                Matcher::UrlEncoded("page".into(), (i + 1).to_string()),
            ])
        };
        let body = json!({"count": items.len(), "results": page});
        let mock = server
            .mock("GET", list_path(endpoint))
            .match_query(query)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .expect(hits)
            .create_async()
            .await;
        mocks.push(mock);
    }
    mocks
}

async fn assert_all(mocks: &[Mock]) {
    for mock in mocks {
        mock.assert_async().await;
    }
}

/// Log output captured from a scoped subscriber
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// fetch_all returns exactly `count` items across pages
#[tokio::test]
async fn test_pagination_completeness() {
    let mut server = mockito::Server::new_async().await;
    let all = items(1..=10);
    // 4 pages of 3
    let mocks = mock_pages(&mut server, "measurements", &all, 1).await;
    assert_eq!(mocks.len(), 4);
    let client = RemoteClient::new(config(&server), Arc::new(NoCache)).unwrap();

    let mut results = client.fetch_all("measurements", &[]).await.unwrap();
    results.sort_by_key(|r| r["id"].as_u64());
    assert_eq!(results, all);
    assert_all(&mocks).await;
}

/// Single-page listings issue exactly one request
#[tokio::test]
async fn test_single_page() {
    let mut server = mockito::Server::new_async().await;
    let mocks = mock_pages(&mut server, "anchors", &items(1..=2), 1).await;
    let client = RemoteClient::new(config(&server), Arc::new(NoCache)).unwrap();

    assert_eq!(client.fetch_anchors().await.unwrap().len(), 2);
    assert_all(&mocks).await;
}

/// Duplicate ids across pages are kept, with a warning
#[tokio::test]
async fn test_duplicates_preserved() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let mut server = mockito::Server::new_async().await;
    let _mocks = mock_pages(&mut server, "measurements", &items([1, 2, 3, 3, 4, 4]), 1).await;
    let client = RemoteClient::new(config(&server), Arc::new(NoCache)).unwrap();

    let results = client.fetch_all("measurements", &[]).await.unwrap();
    assert_eq!(results.len(), 6);

    let output = logs.contents();
    assert!(
        output.contains("Unexpected number of results for measurements: 4 distinct vs 6 total"),
        "missing warning in: {}",
        output
    );
    assert!(output.contains("WARN"));
}

/// Distinct ids produce no warning
#[tokio::test]
async fn test_distinct_ids_do_not_warn() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let mut server = mockito::Server::new_async().await;
    let _mocks = mock_pages(&mut server, "measurements", &items(1..=5), 1).await;
    let client = RemoteClient::new(config(&server), Arc::new(NoCache)).unwrap();

    assert_eq!(client.fetch_all("measurements", &[]).await.unwrap().len(), 5);
    assert!(!logs.contents().contains("Unexpected number of results"));
}

/// Cached pages are not requested again
#[tokio::test]
async fn test_cache_hit_skips_network() {
    let mut server = mockito::Server::new_async().await;
    let mocks = mock_pages(&mut server, "measurements", &items(1..=7), 1).await;
    let client = RemoteClient::new(config(&server), Arc::new(MemoryCache::default())).unwrap();
    let params = [("type", "ping".to_string())];

    let first = client.fetch_all("measurements", &params).await.unwrap();
    assert_all(&mocks).await;

    let second = client.fetch_all("measurements", &params).await.unwrap();
    assert_all(&mocks).await;
    assert_eq!(first.len(), second.len());
}

/// The disk cache survives client instances
#[tokio::test]
async fn test_disk_cache_shared_between_clients() {
    let dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new_async().await;
    let mocks = mock_pages(&mut server, "anchors", &items(1..=2), 1).await;

    for _ in 0..2 {
        let cache = Arc::new(DiskCache::new(dir.path()).unwrap());
        let client = RemoteClient::new(config(&server), cache).unwrap();
        assert_eq!(client.fetch_all("anchors", &[]).await.unwrap().len(), 2);
    }
    assert_all(&mocks).await;
}

/// A slow response surfaces as a timeout
#[tokio::test]
async fn test_read_timeout() {
    let mut server = mockito::Server::new_async().await;
    let body = json!({"count": 2, "results": items(1..=2)}).to_string();
    let _mock = server
        .mock("GET", list_path("anchors"))
        .with_status(200)
        .with_chunked_body(move |w| {
            std::thread::sleep(Duration::from_millis(500));
            w.write_all(body.as_bytes())
        })
        .create_async()
        .await;
    let client = RemoteClient::new(
        config(&server).with_read_timeout(Duration::from_millis(100)),
        Arc::new(NoCache),
    )
    .unwrap();

    let err = client.fetch_all("anchors", &[]).await.unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {}", err);
}

/// Error statuses on list endpoints are API errors and are not cached
#[tokio::test]
async fn test_api_error_not_cached() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", list_path("anchors"))
        .with_status(503)
        .with_body("unavailable")
        .expect(2)
        .create_async()
        .await;
    let client = RemoteClient::new(config(&server), Arc::new(MemoryCache::default())).unwrap();

    for _ in 0..2 {
        match client.fetch_all("anchors", &[]).await {
            Err(AtlasError::Api { status, message }) => {
                assert_eq!(status, 503);
                assert_eq!(message, "unavailable");
            }
            other => panic!("unexpected result: {:?}", other.map(|r| r.len())),
        }
    }
    mock.assert_async().await;
}

/// The API key is sent as an Authorization header
#[tokio::test]
async fn test_api_key_header() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", list_path("anchors"))
        .match_header("authorization", "Key secret")
        .with_status(200)
        .with_body(json!({"count": 1, "results": items(1..=1)}).to_string())
        .expect(1)
        .create_async()
        .await;
    let client = RemoteClient::new(
        config(&server).with_api_key(Some("secret".to_string())),
        Arc::new(NoCache),
    )
    .unwrap();

    client.fetch_anchors().await.unwrap();
    mock.assert_async().await;
}

/// Results stream skips empty and undecodable lines
#[tokio::test]
async fn test_results_stream() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock(
            "GET",
            Matcher::Regex(r"^/api/v2/measurements/1001/results/".into()),
        )
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("start".into(), "1546300800".into()),
            Matcher::UrlEncoded("stop".into(), "1546304400".into()),
            Matcher::UrlEncoded("probe_ids".into(), "1,2".into()),
            Matcher::UrlEncoded("format".into(), "txt".into()),
        ]))
        .with_status(200)
        .with_body("{\"msm_id\":1001,\"prb_id\":1}\n\nnot json\n{\"msm_id\":1001,\"prb_id\":2}")
        .expect(1)
        .create_async()
        .await;
    let client = RemoteClient::new(config(&server), Arc::new(NoCache)).unwrap();

    let records: Vec<Value> = client
        .fetch_results(&meta(), &[1, 2])
        .await
        .unwrap()
        .map(|r| r.unwrap())
        .collect()
        .await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[1]["prb_id"], 2);
    mock.assert_async().await;
}

/// Non-200 results responses yield an empty stream
#[tokio::test]
async fn test_results_error_status_is_empty() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", Matcher::Regex(r"/results/".into()))
        .with_status(404)
        .with_body("{}")
        .create_async()
        .await;
    let client = RemoteClient::new(config(&server), Arc::new(NoCache)).unwrap();

    let count = client.fetch_results(&meta(), &[]).await.unwrap().count().await;
    assert_eq!(count, 0);
}

/// A stalled results body surfaces a timeout from the stream
#[tokio::test]
async fn test_results_stream_timeout() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", Matcher::Regex(r"/results/".into()))
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(Duration::from_millis(500));
            w.write_all(b"{\"msm_id\":1,\"prb_id\":1}\n")
        })
        .create_async()
        .await;
    let client = RemoteClient::new(
        config(&server).with_read_timeout(Duration::from_millis(100)),
        Arc::new(NoCache),
    )
    .unwrap();

    let mut stream = client.fetch_results(&meta(), &[]).await.unwrap();
    let first = stream.next().await.unwrap();
    assert!(matches!(first, Err(AtlasError::Timeout(_))));
    assert!(stream.next().await.is_none());
}

/// Anchoring measurements are joined with their target anchor
#[tokio::test]
async fn test_anchoring_measurements() {
    let mut server = mockito::Server::new_async().await;
    let anchors = mock_pages(
        &mut server,
        "anchors",
        &[json!({"id": 1, "probe": 6001, "fqdn": "a.example"})],
        1,
    )
    .await;
    let measurements = server
        .mock("GET", list_path("measurements"))
        .match_query(Matcher::UrlEncoded(
            "description__startswith".into(),
            "Anchoring Mesh Measurement:".into(),
        ))
        .with_status(200)
        .with_body(
            json!({
                "count": 2,
                "results": [
                    {"id": 10, "target": "a.example"},
                    {"id": 11, "target": "gone.example"},
                ],
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let client = RemoteClient::new(config(&server), Arc::new(NoCache)).unwrap();

    let joined = client.fetch_anchoring_measurements().await.unwrap();
    assert_eq!(joined.len(), 1);
    assert_eq!(joined[0].measurement["id"], 10);
    assert_eq!(joined[0].target["fqdn"], "a.example");
    assert_all(&anchors).await;
    measurements.assert_async().await;
}
