mod archive_stub;

use std::sync::Arc;

use archive_stub::{ArchiveStub, Route};
use archiscribe::app::producer::{TaskProducer, pick_volume};
use archiscribe::catalog::ArchiveClient;
use archiscribe::config::Endpoints;
use archiscribe::formats::ProgressStep;
use archiscribe::identifiers::IdentifierCache;
use archiscribe::line_cache::LineImageCache;

fn fraktur_volume_routes() -> Vec<Route> {
    let paths = Endpoints::new("http://stub", "http://stub/iiif");
    let mut routes = vec![
        Route::ok("/download/latin/latin_djvu.txt", b"Plain roman type text".to_vec()),
        Route::ok(
            "/download/frak/frak_djvu.txt",
            "Es ift gut , ift ift wahr ift ift ift .".as_bytes().to_vec(),
        ),
        Route::ok(
            "/metadata/frak",
            br#"{"metadata": {"identifier": "frak", "title": "Gedichte"}}"#.to_vec(),
        ),
        Route::ok("/iiif/frak$0/info.json", b"{}".to_vec()),
        Route::ok("/download/frak/frak_abbyy.gz", archive_stub::simple_export(3)),
    ];
    for idx in 0..3_i64 {
        let top = 200 + idx;
        let url = paths.tile_url("frak", 10 + idx as u32, 100, top, 1400, 50);
        let path = url.trim_start_matches("http://stub").to_owned();
        routes.push(Route::ok(path, b"\x89PNG".to_vec()));
    }
    routes
}

#[tokio::test]
async fn produces_sampled_task_from_fraktur_volume() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let stub = ArchiveStub::spawn(fraktur_volume_routes());
    let endpoints = stub.endpoints();
    let routes_base = stub.base_url.clone();

    let mut identifiers = IdentifierCache::new(temp.path().join("identifiers.json"));
    identifiers.add("latin", 120, 1850);
    identifiers.add("frak", 300, 1850);
    identifiers.write()?;

    let client = ArchiveClient::new(endpoints.clone())?;
    let cache = Arc::new(LineImageCache::open(
        temp.path().join("line_images"),
        client.http().clone(),
    )?);
    let producer = TaskProducer::new(client, identifiers, Arc::clone(&cache));

    let mut progress = Vec::new();
    let document = producer
        .produce_task(1850, 2, |message| progress.push(message))
        .await?;

    assert_eq!(document.identifier, "frak");
    assert_eq!(document.title, "Gedichte");
    assert_eq!(document.year, 1850);
    assert_eq!(document.manifest_url, endpoints.manifest_url("frak"));
    assert_eq!(document.lines.len(), 2);
    assert!(document.lines.iter().all(|l| l.image_url.starts_with(&routes_base)));

    let fetch: Vec<_> = progress.iter().filter(|m| m.step == ProgressStep::Fetch).collect();
    let cache_steps: Vec<_> = progress.iter().filter(|m| m.step == ProgressStep::Cache).collect();
    assert!(!fetch.is_empty());
    assert!(fetch.iter().all(|m| m.progress <= 0.5));
    assert_eq!(cache_steps.len(), 2);
    assert!((cache_steps[0].progress - 0.75).abs() < 1e-9);
    assert!((cache_steps[1].progress - 1.0).abs() < 1e-9);

    for line in &document.lines {
        assert!(cache.get_path(&line.line_id("frak")).is_some());
    }
    assert!(producer.remaining(1850).await <= 1);
    Ok(())
}

#[tokio::test]
async fn exhausted_pool_is_not_found() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let stub = ArchiveStub::spawn(vec![Route::ok(
        "/download/latin/latin_djvu.txt",
        b"roman".to_vec(),
    )]);
    let client = ArchiveClient::new(stub.endpoints())?;
    let mut identifiers = IdentifierCache::new(temp.path().join("identifiers.json"));
    identifiers.add("latin", 80, 1871);
    identifiers.add("missing", 80, 1871);

    let result = pick_volume(&mut identifiers, &client, 1871).await;

    assert!(matches!(result, Err(archiscribe::Error::NotFound(_))));
    assert_eq!(identifiers.remaining(1871), 0);
    Ok(())
}

fn fraktur_without_metadata() -> Route {
    Route::ok(
        "/download/nometa/nometa_djvu.txt",
        "Es ift gut , ift ift wahr ift ift ift .".as_bytes().to_vec(),
    )
}

#[tokio::test]
async fn missing_metadata_moves_on_to_the_next_volume() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let mut routes = fraktur_volume_routes();
    routes.push(fraktur_without_metadata());
    let stub = ArchiveStub::spawn(routes);

    let mut identifiers = IdentifierCache::new(temp.path().join("identifiers.json"));
    identifiers.add("nometa", 200, 1852);
    identifiers.add("frak", 300, 1852);

    let client = ArchiveClient::new(stub.endpoints())?;
    let cache = Arc::new(LineImageCache::open(
        temp.path().join("line_images"),
        client.http().clone(),
    )?);
    let producer = TaskProducer::new(client, identifiers, cache);

    let document = producer.produce_task(1852, 2, |_| {}).await?;

    assert_eq!(document.identifier, "frak");
    Ok(())
}

#[tokio::test]
async fn volumes_without_metadata_exhaust_the_pool() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let stub = ArchiveStub::spawn(vec![fraktur_without_metadata()]);

    let mut identifiers = IdentifierCache::new(temp.path().join("identifiers.json"));
    identifiers.add("nometa", 200, 1853);

    let client = ArchiveClient::new(stub.endpoints())?;
    let cache = Arc::new(LineImageCache::open(
        temp.path().join("line_images"),
        client.http().clone(),
    )?);
    let producer = TaskProducer::new(client, identifiers, cache);

    let result = producer.produce_task(1853, 2, |_| {}).await;

    assert!(matches!(result, Err(archiscribe::Error::NotFound(_))));
    assert_eq!(producer.remaining(1853).await, 0);
    Ok(())
}
