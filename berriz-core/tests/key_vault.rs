use std::path::Path;

use berriz_core::{KeyVault, VaultValue};
use tempfile::TempDir;

fn vault_in(dir: &Path) -> KeyVault {
    let vault = KeyVault::builder()
        .path(dir.join("local_key_vault.db"))
        .create_if_missing(true)
        .build()
        .expect("create vault");
    vault.initialize().expect("initialize vault");
    vault
}

#[test]
fn store_retrieve_and_replace() {
    let dir = TempDir::new().unwrap();
    let vault = vault_in(dir.path());

    vault
        .store_key("pssh-one", "00112233:aabbccdd", "wv")
        .unwrap();
    assert_eq!(
        vault
            .retrieve("pssh-one")
            .unwrap()
            .unwrap()
            .as_key_string(),
        "00112233:aabbccdd"
    );

    vault
        .store_key("pssh-one", "00112233:eeff0011", "cdrm_wv")
        .unwrap();
    let (value, drm_type) = vault.retrieve_with_drm("pssh-one").unwrap().unwrap();
    assert_eq!(value.as_key_string(), "00112233:eeff0011");
    assert_eq!(drm_type, "cdrm_wv");
    assert_eq!(vault.count().unwrap(), 1);
}

#[test]
fn persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let vault = vault_in(dir.path());
        vault.store_key("pssh-persist", "11:22", "mspr").unwrap();
    }
    let reopened = KeyVault::new(dir.path().join("local_key_vault.db")).unwrap();
    assert!(reopened.contains("pssh-persist").unwrap());
    let listed = reopened.list_by_drm("mspr").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].0, "pssh-persist");
}

#[test]
fn typed_values_round_trip() {
    let dir = TempDir::new().unwrap();
    let vault = vault_in(dir.path());

    vault
        .store("int-entry", &VaultValue::Int(42), "wv")
        .unwrap();
    vault
        .store("bool-entry", &VaultValue::Bool(true), "wv")
        .unwrap();
    vault
        .store(
            "json-entry",
            &VaultValue::Json(serde_json::json!({"kid": "value"})),
            "wv",
        )
        .unwrap();

    assert_eq!(
        vault.retrieve("int-entry").unwrap().unwrap(),
        VaultValue::Int(42)
    );
    assert_eq!(
        vault.retrieve("bool-entry").unwrap().unwrap(),
        VaultValue::Bool(true)
    );
    match vault.retrieve("json-entry").unwrap().unwrap() {
        VaultValue::Json(value) => assert_eq!(value["kid"], "value"),
        other => panic!("unexpected value: {other:?}"),
    }
}
