//! `ProgressBus`: routes per-request progress payloads to subscribers
//! and computes the aggregate overlay intent across all concurrently
//! active requests.

use crate::envelope::{ErrorPayload, ProgressPayload, ProgressStatus};
use std::collections::HashMap;
use std::collections::HashMap as Map;

/// What a single phase observation wants the overlay to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseIntent {
    Show,
    Hide,
    None,
}

/// Phases requiring a fresh WebAuthn user-activation gesture.
const SHOW_PHASES: &[&str] = &[
    "user-confirmation",
    "webauthn-authentication",
    "link-device-credential-collection",
    "recovery-credential-collection",
    "webauthn-verification",
];

/// Phases indicating post-activation or terminal work.
const HIDE_PHASES: &[&str] = &[
    "authentication-complete",
    "transaction-signing-start",
    "transaction-signing-end",
    "contract-verification",
    "broadcasting",
    "action-complete",
    "login-complete",
    "registration-complete",
    "device-linking-complete",
];

/// Pure phase-classification heuristic.
///
/// `transaction-signing-*` is matched by prefix since the vocabulary
/// documents it as a wildcard family rather than a single literal phase.
pub fn classify_phase(phase: &str, status: ProgressStatus) -> PhaseIntent {
    if status == ProgressStatus::Error {
        return PhaseIntent::Hide;
    }
    if SHOW_PHASES.contains(&phase) {
        return PhaseIntent::Show;
    }
    if HIDE_PHASES.contains(&phase) || phase.starts_with("transaction-signing-") {
        return PhaseIntent::Hide;
    }
    PhaseIntent::None
}

struct Subscriber {
    sticky: bool,
    on_progress: Box<dyn FnMut(&ProgressPayload) + Send>,
    last_intent: PhaseIntent,
}

/// Registers/unregisters per-request subscribers and aggregates overlay
/// intent across them.
pub struct ProgressBus {
    subscribers: HashMap<String, Subscriber>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBus {
    pub fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        request_id: impl Into<String>,
        sticky: bool,
        on_progress: impl FnMut(&ProgressPayload) + Send + 'static,
    ) {
        self.subscribers.insert(
            request_id.into(),
            Subscriber {
                sticky,
                on_progress: Box::new(on_progress),
                last_intent: PhaseIntent::None,
            },
        );
    }

    pub fn is_registered(&self, request_id: &str) -> bool {
        self.subscribers.contains_key(request_id)
    }

    pub fn is_sticky(&self, request_id: &str) -> bool {
        self.subscribers
            .get(request_id)
            .map(|s| s.sticky)
            .unwrap_or(false)
    }

    /// Removes the subscriber and returns the aggregate overlay intent
    /// across whatever remains.
    pub fn unregister(&mut self, request_id: &str) -> PhaseIntent {
        self.subscribers.remove(request_id);
        self.aggregate_intent()
    }

    /// Dispatches a progress payload: invokes the subscriber (swallowing
    /// panics from the callback is out of scope in Rust — callbacks are
    /// plain closures, not foreign code — but failures to find a
    /// subscriber are tolerated), classifies the phase, and returns the
    /// new aggregate overlay intent.
    pub fn dispatch(&mut self, request_id: &str, payload: &ProgressPayload) -> PhaseIntent {
        let intent = classify_phase(&payload.phase, payload.status);
        if let Some(sub) = self.subscribers.get_mut(request_id) {
            (sub.on_progress)(payload);
            sub.last_intent = intent;
        }
        self.aggregate_intent()
    }

    /// Translates a terminal ERROR envelope into a synthetic
    /// `{phase:"error", status:"error"}` progress payload for the
    /// subscriber, then unregisters it.
    pub fn dispatch_error(&mut self, request_id: &str, error: &ErrorPayload) -> PhaseIntent {
        let payload = ProgressPayload {
            step: 0,
            phase: "error".to_string(),
            status: ProgressStatus::Error,
            message: Some(error.message.clone()),
            error: Some(error.code.clone()),
            extra: Map::new(),
        };
        if let Some(sub) = self.subscribers.get_mut(request_id) {
            (sub.on_progress)(&payload);
        }
        self.unregister(request_id)
    }

    /// `show` iff any active subscriber's last observed intent is
    /// `Show`.
    pub fn aggregate_intent(&self) -> PhaseIntent {
        if self
            .subscribers
            .values()
            .any(|s| s.last_intent == PhaseIntent::Show)
        {
            PhaseIntent::Show
        } else if self.subscribers.is_empty() {
            PhaseIntent::None
        } else {
            PhaseIntent::Hide
        }
    }

    pub fn active_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn classify_phase_show_hide_none() {
        assert_eq!(
            classify_phase("user-confirmation", ProgressStatus::Progress),
            PhaseIntent::Show
        );
        assert_eq!(
            classify_phase("broadcasting", ProgressStatus::Progress),
            PhaseIntent::Hide
        );
        assert_eq!(
            classify_phase("transaction-signing-anything", ProgressStatus::Progress),
            PhaseIntent::Hide
        );
        assert_eq!(
            classify_phase("key-generation", ProgressStatus::Progress),
            PhaseIntent::None
        );
        assert_eq!(
            classify_phase("user-confirmation", ProgressStatus::Error),
            PhaseIntent::Hide
        );
    }

    fn progress(phase: &str) -> ProgressPayload {
        ProgressPayload {
            step: 1,
            phase: phase.to_string(),
            status: ProgressStatus::Progress,
            message: None,
            error: None,
            extra: Map::new(),
        }
    }

    #[test]
    fn concurrent_requests_overlay_stays_visible_until_all_hide() {
        let mut bus = ProgressBus::new();
        let calls: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let calls_a = calls.clone();
        bus.register("a", false, move |p: &ProgressPayload| {
            calls_a.lock().unwrap().push(format!("a:{}", p.phase));
        });
        let calls_b = calls.clone();
        bus.register("b", false, move |p: &ProgressPayload| {
            calls_b.lock().unwrap().push(format!("b:{}", p.phase));
        });

        assert_eq!(
            bus.dispatch("a", &progress("user-confirmation")),
            PhaseIntent::Show
        );
        assert_eq!(
            bus.dispatch("b", &progress("user-confirmation")),
            PhaseIntent::Show
        );
        // a finishes activation, but b is still showing -> overlay stays visible
        assert_eq!(bus.dispatch("a", &progress("broadcasting")), PhaseIntent::Show);
        // both terminal -> overlay hides
        assert_eq!(bus.dispatch("b", &progress("action-complete")), PhaseIntent::Hide);

        assert_eq!(calls.lock().unwrap().len(), 4);
    }

    #[test]
    fn unregister_removes_subscriber_and_recomputes_aggregate() {
        let mut bus = ProgressBus::new();
        bus.register("a", false, |_p: &ProgressPayload| {});
        bus.dispatch("a", &progress("user-confirmation"));
        assert_eq!(bus.aggregate_intent(), PhaseIntent::Show);
        assert_eq!(bus.unregister("a"), PhaseIntent::None);
        assert!(!bus.is_registered("a"));
    }

    #[test]
    fn sticky_flag_is_preserved_until_unregister() {
        let mut bus = ProgressBus::new();
        bus.register("a", true, |_p: &ProgressPayload| {});
        assert!(bus.is_sticky("a"));
        bus.unregister("a");
        assert!(!bus.is_sticky("a"));
    }

    #[test]
    fn dispatch_error_synthesizes_error_progress_and_unregisters() {
        let mut bus = ProgressBus::new();
        let seen: Arc<Mutex<Option<ProgressPayload>>> = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        bus.register("a", false, move |p: &ProgressPayload| {
            *seen2.lock().unwrap() = Some(p.clone());
        });
        let err = ErrorPayload {
            code: "RELAYER_FAILURE".into(),
            message: "boom".into(),
            details: None,
        };
        bus.dispatch_error("a", &err);
        let payload = seen.lock().unwrap().clone().unwrap();
        assert_eq!(payload.phase, "error");
        assert_eq!(payload.status, ProgressStatus::Error);
        assert!(!bus.is_registered("a"));
    }
}
