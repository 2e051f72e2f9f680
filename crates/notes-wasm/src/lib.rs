//! WASM bindings for notes-core.
//!
//! Exposes `NotesClient` to the browser front end. Requests go through
//! `fetch` with credentials included, so the service's session cookie rides
//! along; the signed-in identity is kept in `localStorage`.
//!
//! ```text
//! TypeScript                    WASM (Rust)
//! ──────────                    ───────────
//! forms / views ──calls──> WasmNotesClient
//!                                   │
//!                                   ▼
//!                     NotesClient<HttpRemote>
//!                          │              │
//!                          ▼              ▼
//!                  fetch (reqwest)   LocalStorageStore
//! ```
//!
//! Errors thrown to JS carry the error kind as a prefix, e.g.
//! `"Unauthorized: Not authorized: Session expired"`, so the UI can branch on it.
//!
//! **Note**: This crate only compiles for `wasm32` targets. When building for native
//! targets (e.g., during `cargo check --workspace`), this crate provides no exports.

#[cfg(target_arch = "wasm32")]
mod local_storage;

#[cfg(target_arch = "wasm32")]
pub use local_storage::{DEFAULT_STORAGE_KEY, LocalStorageStore};

// ============================================================================
// All WASM-specific code is gated behind target_arch = "wasm32"
// This allows `cargo check --workspace` to succeed on native targets.
// ============================================================================

#[cfg(target_arch = "wasm32")]
mod wasm_impl {
    use super::*;
    use notes_core::{ClientConfig, ClientError, CodeRequest, HttpRemote, NotesClient};
    use serde::Deserialize;
    use std::cell::RefCell;
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;
    use wasm_bindgen::prelude::*;

    // ========== Callback Logger Layer ==========

    thread_local! {
        static LOGGER_CALLBACK: RefCell<Option<js_sys::Function>> = const { RefCell::new(None) };
    }

    /// A tracing layer that forwards each log event to a JavaScript callback.
    struct JsCallbackLayer;

    impl<S> tracing_subscriber::Layer<S> for JsCallbackLayer
    where
        S: tracing::Subscriber,
    {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            LOGGER_CALLBACK.with(|cb| {
                let Some(callback) = cb.borrow().clone() else {
                    return;
                };
                let metadata = event.metadata();
                let mut visitor = MessageVisitor::default();
                event.record(&mut visitor);

                let js_event = js_sys::Object::new();
                let _ = js_sys::Reflect::set(&js_event, &"level".into(), &metadata.level().as_str().into());
                let _ = js_sys::Reflect::set(&js_event, &"target".into(), &metadata.target().into());
                let _ = js_sys::Reflect::set(&js_event, &"message".into(), &visitor.message.into());
                let _ = js_sys::Reflect::set(
                    &js_event,
                    &"timestamp".into(),
                    &notes_core::events::now_millis().into(),
                );
                let _ = callback.call1(&JsValue::NULL, &js_event);
            });
        }
    }

    /// Flattens an event's fields into `message key=value ...`.
    #[derive(Default)]
    struct MessageVisitor {
        message: String,
    }

    impl MessageVisitor {
        fn push(&mut self, name: &str, value: String) {
            if name == "message" {
                if self.message.is_empty() {
                    self.message = value;
                } else {
                    self.message = format!("{} {}", value, self.message);
                }
            } else {
                if !self.message.is_empty() {
                    self.message.push(' ');
                }
                self.message.push_str(&format!("{}={}", name, value));
            }
        }
    }

    impl tracing::field::Visit for MessageVisitor {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            self.push(field.name(), format!("{:?}", value));
        }

        fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
            self.push(field.name(), value.to_string());
        }
    }

    /// Initialize the WASM module (panic hook and tracing).
    ///
    /// - `init()` - console-only logging
    /// - `init({ logger: (event) => {...} })` - callback + console logging
    ///
    /// The logger callback receives `{ level, target, message, timestamp }`.
    #[wasm_bindgen]
    pub fn init(config: Option<js_sys::Object>) {
        console_error_panic_hook::set_once();

        let callback = config
            .as_ref()
            .and_then(|cfg| js_sys::Reflect::get(cfg, &"logger".into()).ok())
            .and_then(|v| v.dyn_into::<js_sys::Function>().ok());

        let console_config = tracing_wasm::WASMLayerConfigBuilder::new()
            .set_max_level(tracing::Level::DEBUG)
            .build();

        match callback {
            Some(cb) => {
                LOGGER_CALLBACK.with(|cell| *cell.borrow_mut() = Some(cb));
                let subscriber = tracing_subscriber::registry()
                    .with(JsCallbackLayer)
                    .with(tracing_wasm::WASMLayer::new(console_config));
                tracing::subscriber::set_global_default(subscriber).ok();
            }
            None => tracing_wasm::set_as_global_default_with_config(console_config),
        }

        tracing::info!("notes-wasm initialized");
    }

    fn to_js_error(err: ClientError) -> JsError {
        JsError::new(&format!("{}: {}", err.kind().as_str(), err))
    }

    fn to_js_value<T: serde::Serialize>(value: &T) -> Result<JsValue, JsError> {
        serde_wasm_bindgen::to_value(value).map_err(|e| JsError::new(&e.to_string()))
    }

    // ========== WASM Subscription Handle ==========

    /// Subscription handle exposed to JavaScript.
    ///
    /// Call `dispose()` to unsubscribe, or let the JS garbage collector
    /// collect it (the Rust Drop will run via FinalizationRegistry).
    #[wasm_bindgen]
    pub struct WasmSubscription {
        inner: RefCell<Option<notes_core::Subscription>>,
    }

    #[wasm_bindgen]
    impl WasmSubscription {
        /// Unsubscribe from events. Safe to call multiple times.
        pub fn dispose(&self) {
            self.inner.borrow_mut().take();
        }
    }

    /// Options accepted by the `WasmNotesClient` constructor. All optional.
    #[derive(Default, Deserialize)]
    #[serde(default, rename_all = "camelCase")]
    struct ClientOptions {
        user_api_base: Option<String>,
        note_api_base: Option<String>,
        storage_key: Option<String>,
    }

    /// Signup form fields as sent from JS.
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct SignupForm {
        name: String,
        date_of_birth: String,
        email: String,
    }

    /// Notes client exposed to TypeScript.
    #[wasm_bindgen]
    pub struct WasmNotesClient {
        inner: NotesClient<HttpRemote>,
    }

    #[wasm_bindgen]
    impl WasmNotesClient {
        /// `new WasmNotesClient({ userApiBase, noteApiBase, storageKey })`
        #[wasm_bindgen(constructor)]
        pub fn new(options: JsValue) -> Result<WasmNotesClient, JsError> {
            let options: ClientOptions = if options.is_undefined() || options.is_null() {
                ClientOptions::default()
            } else {
                serde_wasm_bindgen::from_value(options)
                    .map_err(|e| JsError::new(&format!("Invalid options: {}", e)))?
            };

            let config = ClientConfig::default()
                .with_overrides(options.user_api_base, options.note_api_base)
                .map_err(|e| JsError::new(&e.to_string()))?;
            let remote = HttpRemote::new(&config).map_err(|e| JsError::new(&e.to_string()))?;
            let store = match options.storage_key {
                Some(key) => LocalStorageStore::new(key),
                None => LocalStorageStore::default(),
            };

            Ok(WasmNotesClient {
                inner: NotesClient::new(Arc::new(remote), Box::new(store)),
            })
        }

        /// Adopt the identity saved by a previous page load and fetch its notes.
        ///
        /// Resolves to the identity, or `undefined` when signed out.
        #[wasm_bindgen]
        pub async fn restore(&self) -> Result<JsValue, JsError> {
            let identity = self.inner.restore().await.map_err(to_js_error)?;
            to_js_value(&identity)
        }

        /// Email a signup code. `form` is `{ name, dateOfBirth, email }`.
        #[wasm_bindgen(js_name = requestSignupCode)]
        pub async fn request_signup_code(&self, form: JsValue) -> Result<JsValue, JsError> {
            let form: SignupForm = serde_wasm_bindgen::from_value(form)
                .map_err(|e| JsError::new(&format!("ValidationError: {}", e)))?;
            let ack = self
                .inner
                .request_signup_code(CodeRequest::signup(form.name, form.date_of_birth, form.email))
                .await
                .map_err(to_js_error)?;
            to_js_value(&ack.message)
        }

        #[wasm_bindgen(js_name = requestSigninCode)]
        pub async fn request_signin_code(&self, email: String) -> Result<JsValue, JsError> {
            let ack = self
                .inner
                .request_signin_code(&email)
                .await
                .map_err(to_js_error)?;
            to_js_value(&ack.message)
        }

        #[wasm_bindgen(js_name = verifySignupCode)]
        pub async fn verify_signup_code(&self, code: String) -> Result<JsValue, JsError> {
            let identity = self
                .inner
                .verify_signup_code(&code)
                .await
                .map_err(to_js_error)?;
            to_js_value(&identity)
        }

        #[wasm_bindgen(js_name = verifySigninCode)]
        pub async fn verify_signin_code(&self, code: String) -> Result<JsValue, JsError> {
            let identity = self
                .inner
                .verify_signin_code(&code)
                .await
                .map_err(to_js_error)?;
            to_js_value(&identity)
        }

        #[wasm_bindgen(js_name = cancelSignup)]
        pub fn cancel_signup(&self) -> Result<(), JsError> {
            self.inner.cancel_signup().map_err(to_js_error)
        }

        #[wasm_bindgen(js_name = cancelSignin)]
        pub fn cancel_signin(&self) -> Result<(), JsError> {
            self.inner.cancel_signin().map_err(to_js_error)
        }

        #[wasm_bindgen(js_name = signOut)]
        pub async fn sign_out(&self) -> Result<(), JsError> {
            self.inner.sign_out().await.map_err(to_js_error)
        }

        #[wasm_bindgen(js_name = loadNotes)]
        pub async fn load_notes(&self) -> Result<(), JsError> {
            self.inner.load_notes().await.map_err(to_js_error)
        }

        /// Create a note. The list is re-fetched afterwards.
        #[wasm_bindgen(js_name = createNote)]
        pub async fn create_note(&self, title: String, content: String) -> Result<(), JsError> {
            self.inner
                .create_note(&title, &content)
                .await
                .map_err(to_js_error)
        }

        /// Delete a note. Resolves to whether a cached entry was removed.
        #[wasm_bindgen(js_name = deleteNote)]
        pub async fn delete_note(&self, note_id: String) -> Result<bool, JsError> {
            self.inner.delete_note(&note_id).await.map_err(to_js_error)
        }

        // ========== Synchronous Getters ==========

        #[wasm_bindgen(getter)]
        pub fn identity(&self) -> Result<JsValue, JsError> {
            to_js_value(&self.inner.identity())
        }

        #[wasm_bindgen(getter, js_name = isAuthenticated)]
        pub fn is_authenticated(&self) -> bool {
            self.inner.is_authenticated()
        }

        /// Cached notes in server order.
        #[wasm_bindgen(getter)]
        pub fn notes(&self) -> Result<JsValue, JsError> {
            to_js_value(&self.inner.notes())
        }

        /// One of `"uninitialized"`, `"loading"`, `"ready"`.
        #[wasm_bindgen(getter, js_name = cacheState)]
        pub fn cache_state(&self) -> Result<JsValue, JsError> {
            to_js_value(&self.inner.cache_state())
        }

        #[wasm_bindgen(getter, js_name = signupAttempt)]
        pub fn signup_attempt(&self) -> Result<JsValue, JsError> {
            to_js_value(&self.inner.signup_attempt())
        }

        #[wasm_bindgen(getter, js_name = signinAttempt)]
        pub fn signin_attempt(&self) -> Result<JsValue, JsError> {
            to_js_value(&self.inner.signin_attempt())
        }

        // ========== Event Subscriptions ==========

        /// Subscribe to client events (code sent, notes loaded, failures...).
        ///
        /// Returns a `WasmSubscription` handle. Call `dispose()` on it to unsubscribe,
        /// or let the JS garbage collector clean it up.
        #[wasm_bindgen(js_name = onEvent)]
        pub fn on_event(&self, callback: js_sys::Function) -> WasmSubscription {
            let rust_closure = move |event: &notes_core::ClientEvent| {
                if let Ok(js_event) = serde_wasm_bindgen::to_value(event) {
                    let _ = callback.call1(&JsValue::NULL, &js_event);
                }
            };

            WasmSubscription {
                inner: RefCell::new(Some(self.inner.events().subscribe(rust_closure))),
            }
        }
    }
}

// Re-export wasm_impl contents at crate root for wasm32 targets
#[cfg(target_arch = "wasm32")]
pub use wasm_impl::*;
