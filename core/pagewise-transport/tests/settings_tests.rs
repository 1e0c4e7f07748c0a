use pagewise_transport::settings::{keys, load_transport_settings};
use pagewise_transport::{BackendKind, JsonFileSettings, SettingsStore, TransportError};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

#[test]
fn missing_file_opens_empty() {
    let dir = TempDir::new().unwrap();
    let store = JsonFileSettings::open(dir.path().join("settings.json")).unwrap();
    assert_eq!(store.get(keys::BASE_URL), None);
    assert!(!store.path().exists());
}

#[test]
fn set_persists_and_reopens() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("settings.json");

    let store = JsonFileSettings::open(&file).unwrap();
    store.set(keys::BASE_URL, "http://svc/odata").unwrap();
    store.set(keys::BACKEND, "raw").unwrap();
    assert!(file.exists());

    let reopened = JsonFileSettings::open(&file).unwrap();
    assert_eq!(reopened.get(keys::BASE_URL).as_deref(), Some("http://svc/odata"));

    let (kind, config) = load_transport_settings(&reopened).unwrap();
    assert_eq!(kind, BackendKind::Raw);
    assert_eq!(config.base_url, "http://svc/odata");
}

#[test]
fn numbers_in_file_read_as_text() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("settings.json");
    std::fs::write(
        &file,
        r#"{ "transport.base_url": "http://svc", "transport.timeout_secs": 5 }"#,
    )
    .unwrap();

    let store = JsonFileSettings::open(&file).unwrap();
    assert_eq!(store.get(keys::TIMEOUT_SECS).as_deref(), Some("5"));
    let (_, config) = load_transport_settings(&store).unwrap();
    assert_eq!(config.timeout_secs, 5);
}

#[test]
fn malformed_file_is_a_settings_error() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("settings.json");
    std::fs::write(&file, "this is not json {{").unwrap();

    let err = JsonFileSettings::open(&file).unwrap_err();
    assert!(matches!(err, TransportError::Settings(_)));
}

#[test]
fn unwritable_location_fails_on_set() {
    let dir = TempDir::new().unwrap();
    let store = JsonFileSettings::open(dir.path().join("missing-dir").join("settings.json")).unwrap();
    let err = store.set(keys::BACKEND, "native").unwrap_err();
    assert!(matches!(err, TransportError::Settings(_)));
}
