//! HTTP read API tests against a live server on a free port.

use schedule_harvester::config::Config;
use schedule_harvester::db;
use schedule_harvester::importer;
use schedule_harvester::migrate;
use schedule_harvester::server;
use schedule_harvester::store::ImportStore;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;
use tokio::sync::watch;

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

async fn seeded_store(tmp: &TempDir) -> ImportStore {
    let cfg: Config = toml::from_str(&format!(
        "[db]\npath = \"{}/harvester.sqlite\"\n",
        tmp.path().display()
    ))
    .unwrap();
    let pool = db::connect(&cfg).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    let store = ImportStore::new(pool);

    let (_, done) = store.create_if_absent(Path::new("a.jpg"), 1).await.unwrap();
    store.create_if_absent(Path::new("b.jpg"), 2).await.unwrap();

    let records = importer::parse_deliveries(
        "date,schedule,location_type,location_name\n\
         2025-03-14,Matutino,COLONIA,Centro\n\
         2025-03-15,nocturno,fraccionamiento,Las Palmas\n",
    )
    .unwrap();
    assert!(importer::commit_import(store.pool(), done, &records).await.unwrap());
    store
}

#[tokio::test]
async fn read_api_serves_deliveries_and_imports() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp).await;
    let port = find_free_port();

    let (tx, rx) = watch::channel(false);
    let bind = format!("127.0.0.1:{}", port);
    let handle = tokio::spawn(async move { server::serve(store, &bind, rx).await });
    wait_for_server(port).await;

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}", port);

    // Health
    let body: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");

    // All deliveries, newest first
    let resp = client.get(format!("{}/deliveries", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["count"], 2);
    assert_eq!(body["deliveries"][0]["date"], "2025-03-15");
    assert_eq!(body["deliveries"][1]["schedule"], "matutino");
    assert_eq!(body["deliveries"][1]["location_type"], "colonia");

    // Filtered by location and date
    let body: Value = client
        .get(format!("{}/deliveries?location=centro&until=2025-03-14", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["count"], 1);
    assert_eq!(body["deliveries"][0]["location_name"], "Centro");

    // Bad date
    let resp = client
        .get(format!("{}/deliveries?since=14-03-2025", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    // Imports by state
    let body: Value = client
        .get(format!("{}/imports?state=pending", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let imports = body["imports"].as_array().unwrap();
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0]["source_path"], "b.jpg");
    assert_eq!(imports[0]["content_hash"], "0000000000000002");

    let resp = client
        .get(format!("{}/imports?state=archived", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Single import
    let body: Value = client
        .get(format!("{}/imports/1", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["state"], "completed");
    assert!(body["completed_at"].is_string());

    let resp = client.get(format!("{}/imports/999", base)).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = client.get(format!("{}/imports/abc", base)).send().await.unwrap();
    assert_eq!(resp.status(), 400);

    // Graceful stop
    tx.send(true).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
