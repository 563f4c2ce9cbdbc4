//! `OverlayController`: a pure state machine over the
//! invisible-vs-fullscreen-vs-anchored display of the wallet service
//! iframe. This module never touches the DOM itself — it only computes
//! the authoritative [`OverlayState`]; a [`crate::bridge::PlatformBridge`]
//! applies it.

use serde::{Deserialize, Serialize};

/// Clamped pixel rectangle for anchored placement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    /// Clamps `top`/`left` to `>= 0` and `width`/`height` to `>= 1`.
    pub fn clamped(top: f64, left: f64, width: f64, height: f64) -> Self {
        Rect {
            top: top.max(0.0),
            left: left.max(0.0),
            width: width.max(1.0),
            height: height.max(1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlayMode {
    Hidden,
    Fullscreen,
    Anchored,
}

/// Near-max z-index so the expanded overlay always wins stacking
/// contexts.
pub const OVERLAY_Z_INDEX: i64 = 2_147_483_646;

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayState {
    pub mode: OverlayMode,
    pub visible: bool,
    pub sticky: bool,
    pub rect: Option<Rect>,
}

impl OverlayState {
    pub fn initial() -> Self {
        OverlayState {
            mode: OverlayMode::Hidden,
            visible: false,
            sticky: false,
            rect: None,
        }
    }
}

impl Default for OverlayState {
    fn default() -> Self {
        Self::initial()
    }
}

/// Pure, authoritative writer of overlay state — it never reads DOM
/// state back.
pub struct OverlayController {
    state: OverlayState,
}

impl Default for OverlayController {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayController {
    pub fn new() -> Self {
        Self {
            state: OverlayState::initial(),
        }
    }

    pub fn state(&self) -> &OverlayState {
        &self.state
    }

    pub fn show_fullscreen(&mut self) {
        self.state.mode = OverlayMode::Fullscreen;
        self.state.visible = true;
        self.state.rect = None;
    }

    pub fn show_anchored(&mut self, top: f64, left: f64, width: f64, height: f64) {
        self.state.mode = OverlayMode::Anchored;
        self.state.visible = true;
        self.state.rect = Some(Rect::clamped(top, left, width, height));
    }

    pub fn set_anchored_rect(&mut self, top: f64, left: f64, width: f64, height: f64) {
        if self.state.mode == OverlayMode::Anchored {
            self.state.rect = Some(Rect::clamped(top, left, width, height));
        }
    }

    pub fn clear_anchored_rect(&mut self) {
        if self.state.mode == OverlayMode::Anchored {
            self.state.rect = None;
        }
    }

    /// Prefers the existing anchored rect if one is set, otherwise
    /// behaves like `show_fullscreen`.
    pub fn show_prefer_anchored(&mut self) {
        if self.state.mode == OverlayMode::Anchored && self.state.rect.is_some() {
            self.state.visible = true;
        } else {
            self.show_fullscreen();
        }
    }

    /// No-op while `sticky` is set.
    pub fn hide(&mut self) {
        if self.state.sticky {
            return;
        }
        self.state.mode = OverlayMode::Hidden;
        self.state.visible = false;
    }

    pub fn set_sticky(&mut self, sticky: bool) {
        self.state.sticky = sticky;
    }

    pub fn get_state(&self) -> OverlayState {
        self.state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_clamps_negative_origin_and_degenerate_size() {
        let rect = Rect::clamped(-10.0, -5.0, 0.0, -1.0);
        assert_eq!(rect.top, 0.0);
        assert_eq!(rect.left, 0.0);
        assert_eq!(rect.width, 1.0);
        assert_eq!(rect.height, 1.0);
    }

    #[test]
    fn hide_is_noop_when_sticky() {
        let mut ctl = OverlayController::new();
        ctl.show_fullscreen();
        ctl.set_sticky(true);
        ctl.hide();
        assert!(ctl.state().visible);
        assert_eq!(ctl.state().mode, OverlayMode::Fullscreen);
    }

    #[test]
    fn show_fullscreen_then_hide_returns_to_initial_state() {
        let mut ctl = OverlayController::new();
        let initial = ctl.get_state();
        ctl.show_fullscreen();
        ctl.hide();
        assert_eq!(ctl.get_state(), initial);
    }

    #[test]
    fn show_prefer_anchored_keeps_anchored_rect_when_present() {
        let mut ctl = OverlayController::new();
        ctl.show_anchored(10.0, 10.0, 200.0, 100.0);
        ctl.hide();
        ctl.show_prefer_anchored();
        assert_eq!(ctl.state().mode, OverlayMode::Anchored);
        assert!(ctl.state().rect.is_some());
    }

    #[test]
    fn show_prefer_anchored_falls_back_to_fullscreen_without_rect() {
        let mut ctl = OverlayController::new();
        ctl.show_prefer_anchored();
        assert_eq!(ctl.state().mode, OverlayMode::Fullscreen);
    }

    #[test]
    fn clear_anchored_rect_only_applies_in_anchored_mode() {
        let mut ctl = OverlayController::new();
        ctl.show_fullscreen();
        ctl.clear_anchored_rect();
        assert_eq!(ctl.state().mode, OverlayMode::Fullscreen);

        ctl.show_anchored(1.0, 1.0, 10.0, 10.0);
        ctl.clear_anchored_rect();
        assert!(ctl.state().rect.is_none());
    }
}
