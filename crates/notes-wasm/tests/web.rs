//! Browser tests for notes-wasm. Run with `wasm-pack test --headless --firefox`.

#![cfg(target_arch = "wasm32")]

use notes_core::{IdentityStore, PersistedSession};
use notes_wasm::{LocalStorageStore, WasmNotesClient};
use wasm_bindgen::JsValue;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

#[wasm_bindgen_test]
fn local_storage_roundtrip() {
    let store = LocalStorageStore::new("notes-wasm-test:roundtrip");
    store.erase().unwrap();
    assert_eq!(store.read().unwrap(), None);

    store.write("{\"version\":1,\"identity\":null}").unwrap();
    let raw = store.read().unwrap().unwrap();
    assert_eq!(PersistedSession::decode(&raw), None);

    store.erase().unwrap();
    assert_eq!(store.read().unwrap(), None);
}

#[wasm_bindgen_test]
async fn restore_without_record_is_signed_out() {
    LocalStorageStore::new("notes-wasm-test:empty").erase().unwrap();
    let options = js_sys::Object::new();
    js_sys::Reflect::set(&options, &"storageKey".into(), &"notes-wasm-test:empty".into()).unwrap();

    let client = WasmNotesClient::new(options.into()).map_err(JsValue::from).unwrap();
    assert!(client.restore().await.map_err(JsValue::from).unwrap().is_undefined());
    assert!(!client.is_authenticated());
    assert_eq!(client.cache_state().map_err(JsValue::from).unwrap(), JsValue::from_str("uninitialized"));
}

#[wasm_bindgen_test]
async fn invalid_email_is_rejected_locally() {
    let client = WasmNotesClient::new(JsValue::UNDEFINED)
        .map_err(JsValue::from)
        .unwrap();
    assert!(client.request_signin_code("not-an-email".into()).await.is_err());
}
