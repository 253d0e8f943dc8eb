mod archive_stub;

use archive_stub::{ArchiveStub, Route};
use archiscribe::catalog::ArchiveClient;
use archiscribe::identifiers::IdentifierCache;

const SEARCH: &str = "/services/search/v1/scrape";

#[tokio::test]
async fn scrape_pages_with_cursor_and_persists_pool() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let stub = ArchiveStub::spawn(vec![
        Route::ok(SEARCH, br#"{"total": 3}"#.to_vec()).with_query("total_only=true"),
        Route::ok(
            SEARCH,
            br#"{"items": [{"identifier": "c", "imagecount": "60", "year": "1851"}], "count": 1}"#
                .to_vec(),
        )
        .with_query("cursor=next-page"),
        Route::ok(
            SEARCH,
            br#"{"items": [
                {"identifier": "a", "imagecount": 120, "year": "1850"},
                {"identifier": "b", "imagecount": 20, "year": "1850"}
            ], "count": 2, "cursor": "next-page"}"#
                .to_vec(),
        ),
    ]);
    let client = ArchiveClient::new(stub.endpoints())?;
    let path = temp.path().join("identifiers.json");
    let mut cache = IdentifierCache::load(&path)?;

    let added = client.scrape_identifiers(&mut cache).await?;

    assert_eq!(added, 2);
    let reloaded = IdentifierCache::load(&path)?;
    assert_eq!(reloaded.remaining(1850), 1);
    assert_eq!(reloaded.remaining(1851), 1);
    assert_eq!(reloaded.years().collect::<Vec<_>>(), vec![1850, 1851]);
    Ok(())
}

#[tokio::test]
async fn metadata_and_start_page_probe() -> anyhow::Result<()> {
    let stub = ArchiveStub::spawn(vec![
        Route::ok(
            "/metadata/vol",
            br#"{"metadata": {"title": ["Gedichte", "Zweiter Band"]}}"#.to_vec(),
        ),
        Route::ok("/metadata/empty", br#"{}"#.to_vec()),
        Route::status("/iiif/late$0/info.json", 404),
        Route::ok("/iiif/vol$0/info.json", b"{}".to_vec()),
    ]);
    let client = ArchiveClient::new(stub.endpoints())?;

    assert_eq!(client.fetch_metadata("vol").await?.title(), Some("Gedichte"));
    assert!(matches!(
        client.fetch_metadata("empty").await,
        Err(archiscribe::Error::NotFound(_))
    ));
    assert_eq!(client.start_page_offset("vol").await, 0);
    assert_eq!(client.start_page_offset("late").await, 1);
    Ok(())
}
