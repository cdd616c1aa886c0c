use berriz_core::{CookieStore, NetscapeJar};
use tempfile::TempDir;

const JAR: &str = "# Netscape HTTP Cookie File\n\
.berriz.in\tTRUE\t/\tTRUE\t1999999999\tpcid\tpcid-0123456789abcdef0123\n\
.berriz.in\tTRUE\t/\tTRUE\t1999999999\tbz_a\tinitial-access\n\
.berriz.in\tTRUE\t/\tTRUE\t1999999999\tbz_r\tinitial-refresh\n\
.berriz.in\tTRUE\t/\tFALSE\t0\tlocale\ten\n";

#[tokio::test]
async fn jar_and_side_car_agree_after_token_update() {
    let dir = TempDir::new().unwrap();
    let store = CookieStore::new(
        dir.path().join("default.txt"),
        dir.path().join("cookie_temp.json"),
    );
    tokio::fs::write(store.netscape_path(), JAR).await.unwrap();

    store
        .update_tokens("refreshed-access-token", "refreshed-refresh-token")
        .await
        .unwrap();

    let jar = store.read_jar().await.unwrap();
    let cache = store.read_cache().await.unwrap();
    assert_eq!(jar.get("bz_a"), Some("refreshed-access-token"));
    assert_eq!(jar.get("bz_r"), Some("refreshed-refresh-token"));
    assert_eq!(cache.bz_a, "refreshed-access-token");
    assert_eq!(cache.bz_r, "refreshed-refresh-token");
    // Unrelated rows survive the in-place rewrite.
    assert_eq!(jar.get("locale"), Some("en"));
    assert_eq!(jar.get("pcid"), Some("pcid-0123456789abcdef0123"));
}

#[tokio::test]
async fn atomic_writes_leave_no_temp_files() {
    let dir = TempDir::new().unwrap();
    let store = CookieStore::new(
        dir.path().join("default.txt"),
        dir.path().join("cookie_temp.json"),
    );
    tokio::fs::write(store.netscape_path(), JAR).await.unwrap();
    store.update_tokens("a", "r").await.unwrap();
    store.set_refresh_time(1_700_000_000.0).await.unwrap();

    let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        let name = entry.file_name();
        let name = name.to_string_lossy().to_string();
        assert!(!name.ends_with(".tmp"), "leftover temp file: {name}");
    }
}

#[test]
fn serialized_jar_parses_back() {
    let jar = NetscapeJar::parse(JAR).unwrap();
    let round_tripped = NetscapeJar::parse(&jar.serialize()).unwrap();
    assert_eq!(round_tripped.get("bz_r"), Some("initial-refresh"));
}
