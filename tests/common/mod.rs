//! Shared helpers for the pipeline tests

#![allow(dead_code)]

use order_dl::{Config, DownloadSpec, FulfillmentJob, OrderId, OrderService, TaskId, TaskStatus};
use rand::RngCore;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Largest chunk the tests allow
pub const MAX_ZIP_SIZE: u64 = 50_000;

/// Config rooted in `dir` with fast retries and no real network waits
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config {
        data_dir: dir.path().join("data"),
        ..Config::default()
    };
    config.archive.max_zip_size = MAX_ZIP_SIZE;
    config.network.timeout = Duration::from_secs(5);
    config.network.retry.max_attempts = 0;
    config.lock.poll_interval_ms = 10;
    config.api.public_url = "http://files.test".to_string();
    config
}

/// Incompressible payload, so archive sizes track file sizes
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

/// Serve `body` at `/files/<name>`
pub async fn serve_file(server: &MockServer, name: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!("/files/{name}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

/// Order every test works on
pub fn order() -> OrderId {
    OrderId::new("acme", "1042").unwrap()
}

/// Job fetching `names` from the mock server
pub fn job(server: &MockServer, request_id: &str, names: &[&str]) -> FulfillmentJob {
    FulfillmentJob {
        request_id: request_id.to_string(),
        tenant_id: "acme".to_string(),
        order_number: "1042".to_string(),
        downloads: names
            .iter()
            .enumerate()
            .map(|(line, name)| DownloadSpec {
                url: format!("{}/files/{name}", server.uri()),
                filename: (*name).to_string(),
                order_line: (line + 1).to_string(),
            })
            .collect(),
        debug: false,
    }
}

/// Poll until the task leaves `Queued`/`Running`
pub async fn wait_for_task(service: &OrderService, id: TaskId) -> TaskStatus {
    for _ in 0..1000 {
        match service.task_status(&id).await {
            Some(TaskStatus::Queued | TaskStatus::Running) => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Some(status) => return status,
            None => panic!("unknown task {id}"),
        }
    }
    panic!("task {id} did not finish");
}

/// Paths of the published chunks, resolved through freshly minted links
pub async fn published_chunks(service: &OrderService) -> Vec<PathBuf> {
    let links = service.request_links(&order()).await.unwrap();

    let mut paths = Vec::new();
    for link in links.urls {
        let token = link.url.rsplit('/').next().unwrap().to_string();
        let resolved = service.open_download(&token).await.unwrap();
        assert_eq!(resolved.size, link.size);
        paths.push(resolved.path);
    }
    paths
}

/// Entry names of one zip file
pub fn entry_names(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).unwrap();
    let archive = zip::ZipArchive::new(file).unwrap();
    archive.file_names().map(str::to_string).collect()
}

/// Number of files in the order's download cache
pub fn cache_file_count(config: &Config) -> usize {
    std::fs::read_dir(config.data_dir.join("acme/1042/cache"))
        .unwrap()
        .count()
}
