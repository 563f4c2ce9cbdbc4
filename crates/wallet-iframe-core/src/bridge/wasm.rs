//! Real `PlatformBridge` backed by `web-sys`, compiled only for
//! `wasm32-unknown-unknown` — this is what actually runs inside the
//! parent page.

use super::{PlatformBridge, PortHandle, ResponseEnvelopeOrRequest};
use crate::error::{ErrorKind, WalletError, WalletResult};
use crate::overlay::{OverlayMode, OverlayState};
use async_trait::async_trait;
use js_sys::{Array, Reflect};
use std::cell::RefCell;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{HtmlIFrameElement, MessageChannel, MessagePort};

const WALLET_IFRAME_ID: &str = "__wallet_service_iframe__";

pub struct WebSysBridge {
    booted: RefCell<bool>,
    opaque_origin_warned: RefCell<bool>,
}

impl Default for WebSysBridge {
    fn default() -> Self {
        Self {
            booted: RefCell::new(false),
            opaque_origin_warned: RefCell::new(false),
        }
    }
}

impl WebSysBridge {
    pub fn new() -> Self {
        Self::default()
    }

    fn window() -> WalletResult<web_sys::Window> {
        web_sys::window().ok_or_else(|| WalletError::new(ErrorKind::PortMissing, "no window"))
    }

    fn document() -> WalletResult<web_sys::Document> {
        Self::window()?
            .document()
            .ok_or_else(|| WalletError::new(ErrorKind::PortMissing, "no document"))
    }

    fn iframe_element() -> WalletResult<HtmlIFrameElement> {
        let doc = Self::document()?;
        doc.get_element_by_id(WALLET_IFRAME_ID)
            .and_then(|el| el.dyn_into::<HtmlIFrameElement>().ok())
            .ok_or_else(|| WalletError::new(ErrorKind::PortMissing, "wallet iframe not mounted"))
    }

    /// Marks the internal "booted" flag when a `SERVICE_HOST_BOOTED`
    /// hint arrives from the wallet origin. Exposed so the caller's
    /// global `window` message listener can forward hints here.
    pub fn note_booted_hint(&self) {
        *self.booted.borrow_mut() = true;
    }

    fn timeout_promise(millis: u64) -> WalletResult<js_sys::Promise> {
        let window = Self::window()?;
        Ok(js_sys::Promise::new(&mut |resolve, _reject| {
            let _ = window
                .set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, millis as i32);
        }))
    }
}

#[async_trait(?Send)]
impl PlatformBridge for WebSysBridge {
    async fn mount_iframe(&self, wallet_service_url: &str) -> WalletResult<()> {
        let doc = Self::document()?;
        if doc.get_element_by_id(WALLET_IFRAME_ID).is_some() {
            return Ok(());
        }
        let element = doc
            .create_element("iframe")
            .map_err(|_| WalletError::new(ErrorKind::PortMissing, "failed to create iframe"))?;
        let iframe: HtmlIFrameElement = element
            .dyn_into()
            .map_err(|_| WalletError::new(ErrorKind::PortMissing, "iframe cast failed"))?;

        iframe.set_id(WALLET_IFRAME_ID);
        iframe.set_src(wallet_service_url);
        iframe
            .set_attribute(
                "allow",
                "publickey-credentials-get *; publickey-credentials-create *; clipboard-read; clipboard-write",
            )
            .ok();
        iframe.set_attribute("aria-hidden", "true").ok();
        iframe.set_attribute("tabindex", "-1").ok();

        let style = iframe.style();
        style.set_property("width", "0px").ok();
        style.set_property("height", "0px").ok();
        style.set_property("opacity", "0").ok();
        style.set_property("pointer-events", "none").ok();
        style.set_property("position", "fixed").ok();
        style.set_property("border", "none").ok();

        let body = doc
            .body()
            .ok_or_else(|| WalletError::new(ErrorKind::PortMissing, "no document body"))?;
        body.append_child(&iframe)
            .map_err(|_| WalletError::new(ErrorKind::PortMissing, "failed to mount iframe"))?;
        Ok(())
    }

    /// Races the iframe's `load` event against a safety timeout via
    /// `Promise.race`, the standard wasm-bindgen idiom for "whichever
    /// happens first".
    async fn await_iframe_load(&self, safety_timeout_ms: u64) -> WalletResult<()> {
        let iframe = Self::iframe_element()?;
        let load_promise = js_sys::Promise::new(&mut |resolve, _reject| {
            let closure = Closure::once_into_js(move || {
                let _ = resolve.call0(&JsValue::NULL);
            });
            iframe.set_onload(Some(closure.unchecked_ref()));
        });
        let timeout_promise = Self::timeout_promise(safety_timeout_ms)?;
        let race = js_sys::Promise::race(&Array::of2(&load_promise, &timeout_promise));
        JsFuture::from(race)
            .await
            .map_err(|_| WalletError::new(ErrorKind::PortMissing, "iframe load race failed"))?;
        Ok(())
    }

    fn has_booted_hint(&self) -> bool {
        *self.booted.borrow()
    }

    async fn post_connect(
        &self,
        wallet_origin: &str,
        allow_wildcard_fallback: bool,
    ) -> WalletResult<Box<dyn PortHandle>> {
        let iframe = Self::iframe_element()?;
        let content_window = iframe
            .content_window()
            .ok_or_else(|| WalletError::new(ErrorKind::PortMissing, "no content window"))?;

        let channel = MessageChannel::new()
            .map_err(|_| WalletError::new(ErrorKind::PortMissing, "MessageChannel failed"))?;
        let port1 = channel.port1();
        let port2 = channel.port2();

        let msg = js_sys::Object::new();
        Reflect::set(&msg, &"type".into(), &"CONNECT".into()).ok();

        let transfer = Array::new();
        transfer.push(&port2);
        let post_result = content_window.post_message_with_transfer(&msg, wallet_origin, &transfer);

        if post_result.is_err() {
            if !allow_wildcard_fallback {
                return Err(WalletError::new(
                    ErrorKind::PortMissing,
                    "post to wallet origin failed",
                ));
            }
            if !*self.opaque_origin_warned.borrow() {
                *self.opaque_origin_warned.borrow_mut() = true;
                tracing::warn!(
                    wallet_origin = %wallet_origin,
                    "opaque parent origin: falling back to wildcard-origin postMessage"
                );
            }
            // One-time wildcard-origin fallback for an opaque parent
            // origin — a fresh transfer list since the first `port2`
            // was already detached by the failed attempt.
            let channel_retry = MessageChannel::new()
                .map_err(|_| WalletError::new(ErrorKind::PortMissing, "MessageChannel failed"))?;
            let port1 = channel_retry.port1();
            let port2 = channel_retry.port2();
            let transfer_retry = Array::new();
            transfer_retry.push(&port2);
            content_window
                .post_message_with_transfer(&msg, "*", &transfer_retry)
                .map_err(|_| {
                    WalletError::new(ErrorKind::PortMissing, "wildcard fallback post failed")
                })?;
            return Ok(Box::new(WasmPortHandle { port: port1 }));
        }

        Ok(Box::new(WasmPortHandle { port: port1 }))
    }

    fn apply_overlay(&self, state: &OverlayState) {
        let Ok(iframe) = Self::iframe_element() else {
            return;
        };
        let style = iframe.style();
        match state.mode {
            OverlayMode::Hidden => {
                style.set_property("width", "0px").ok();
                style.set_property("height", "0px").ok();
                style.set_property("opacity", "0").ok();
                style.set_property("pointer-events", "none").ok();
                iframe.set_attribute("aria-hidden", "true").ok();
                iframe.set_attribute("tabindex", "-1").ok();
            }
            OverlayMode::Fullscreen => {
                style.set_property("width", "100vw").ok();
                style.set_property("height", "100vh").ok();
                style.set_property("top", "0").ok();
                style.set_property("left", "0").ok();
                style.set_property("opacity", "1").ok();
                style.set_property("pointer-events", "auto").ok();
                style
                    .set_property("z-index", &crate::overlay::OVERLAY_Z_INDEX.to_string())
                    .ok();
                iframe.set_attribute("aria-hidden", "false").ok();
                iframe.remove_attribute("tabindex").ok();
            }
            OverlayMode::Anchored => {
                if let Some(rect) = state.rect {
                    style.set_property("width", &format!("{}px", rect.width)).ok();
                    style.set_property("height", &format!("{}px", rect.height)).ok();
                    style.set_property("top", &format!("{}px", rect.top)).ok();
                    style.set_property("left", &format!("{}px", rect.left)).ok();
                    style.set_property("opacity", "1").ok();
                    style.set_property("pointer-events", "auto").ok();
                    iframe.set_attribute("aria-hidden", "false").ok();
                    iframe.remove_attribute("tabindex").ok();
                }
            }
        }
        if !state.visible && state.mode != OverlayMode::Hidden {
            style.set_property("opacity", "0").ok();
            style.set_property("pointer-events", "none").ok();
        }
    }

    async fn sleep(&self, millis: u64) {
        if let Ok(promise) = Self::timeout_promise(millis) {
            let _ = JsFuture::from(promise).await;
        }
    }
}

#[derive(Debug)]
struct WasmPortHandle {
    port: MessagePort,
}

impl PortHandle for WasmPortHandle {
    fn post(&self, envelope: &ResponseEnvelopeOrRequest) -> WalletResult<()> {
        let value = match envelope {
            ResponseEnvelopeOrRequest::Response(r) => serde_json::to_value(r),
            ResponseEnvelopeOrRequest::Request(r) => serde_json::to_value(r),
            ResponseEnvelopeOrRequest::Control(v) => Ok(v.clone()),
        }
        .map_err(|e| WalletError::new(ErrorKind::Unknown, e.to_string()))?;

        let js_value = json_to_js_value(&value)?;
        self.port
            .post_message(&js_value)
            .map_err(|_| WalletError::new(ErrorKind::PortMissing, "port.postMessage threw"))
    }
}

/// Round-trips a `serde_json::Value` through `JSON.parse` to build the
/// equivalent `JsValue` without pulling in `serde-wasm-bindgen` for this
/// one call site.
fn json_to_js_value(value: &serde_json::Value) -> WalletResult<JsValue> {
    js_sys::JSON::parse(&value.to_string())
        .map_err(|_| WalletError::new(ErrorKind::Unknown, "failed to build JsValue from JSON"))
}
