//! Overlay state
//!
//! Interaction logic for the speed widget injected into the player's control
//! bar, and for the full-page block overlay shown when a time limit is
//! exceeded. Element construction lives with the platform; everything here
//! is plain state so it can be exercised without a browser.

use crate::playback::{clamp_speed, DEFAULT_SPEED};
use crate::types::BlockSignal;

/// Control-bar element the speed widget is prepended to.
pub const ANCHOR_SELECTOR: &str = ".ytp-right-controls";
pub const OVERLAY_ID: &str = "aqt-speed-overlay";
pub const MENU_ID: &str = "aqt-speed-menu";
pub const SLIDER_STYLE_ID: &str = "aqt-slider-css";
pub const BLOCK_OVERLAY_ID: &str = "aqt-block-overlay";

pub const WHEEL_STEP: f64 = 0.25;
pub const SLIDER_MIN: f64 = 0.25;
pub const SLIDER_MAX: f64 = 3.0;
pub const SLIDER_STEP: f64 = 0.05;

/// Readout text: whole speeds without decimals, others with two.
pub fn format_speed(speed: f64) -> String {
    if speed.fract() == 0.0 {
        format!("{:.0}x", speed)
    } else {
        format!("{:.2}x", speed)
    }
}

/// Target speed after one wheel notch. Scrolling down slows playback.
pub fn wheel_target(current: f64, delta_y: f64) -> f64 {
    let direction = if delta_y > 0.0 { -1.0 } else { 1.0 };
    clamp_speed(current + direction * WHEEL_STEP)
}

/// What to do when the control bar changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Injection {
    /// The widget is still in the page
    Present,
    /// The control bar is not rendered yet; retry on the next change
    AnchorMissing,
    /// Build the widget and prepend it to the anchor
    Inject,
}

pub fn injection_decision(overlay_present: bool, anchor_present: bool) -> Injection {
    match (overlay_present, anchor_present) {
        (true, _) => Injection::Present,
        (false, false) => Injection::AnchorMissing,
        (false, true) => Injection::Inject,
    }
}

/// Values to push into the widget after a rate change.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayUpdate {
    pub text: String,
    /// New slider position; `None` while the user is dragging it
    pub slider: Option<f64>,
}

/// Hover menu visibility with a delayed hide.
#[derive(Debug, Clone, Default)]
pub struct MenuState {
    visible: bool,
    hide_at_ms: Option<f64>,
}

impl MenuState {
    /// Show the menu and cancel any pending hide. Returns whether the menu
    /// was hidden before.
    pub fn show(&mut self) -> bool {
        self.hide_at_ms = None;
        !std::mem::replace(&mut self.visible, true)
    }

    pub fn schedule_hide(&mut self, now_ms: f64, delay_ms: u32) {
        self.hide_at_ms = Some(now_ms + f64::from(delay_ms));
    }

    /// Hide if the scheduled deadline has passed. Returns whether the menu
    /// was hidden by this call.
    pub fn hide_if_due(&mut self, now_ms: f64) -> bool {
        match self.hide_at_ms {
            Some(at) if now_ms >= at => {
                self.hide_at_ms = None;
                std::mem::replace(&mut self.visible, false)
            }
            _ => false,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }
}

/// Interaction state of the speed widget. Every handler returns the speed
/// to hand to the enforcer.
#[derive(Debug, Clone)]
pub struct SpeedWidget {
    menu: MenuState,
    slider_focused: bool,
    hide_delay_ms: u32,
}

impl SpeedWidget {
    pub fn new(hide_delay_ms: u32) -> Self {
        Self {
            menu: MenuState::default(),
            slider_focused: false,
            hide_delay_ms,
        }
    }

    pub fn on_pointer_enter(&mut self) -> bool {
        self.menu.show()
    }

    pub fn on_pointer_leave(&mut self, now_ms: f64) -> u32 {
        self.menu.schedule_hide(now_ms, self.hide_delay_ms);
        self.hide_delay_ms
    }

    pub fn on_hide_timer(&mut self, now_ms: f64) -> bool {
        self.menu.hide_if_due(now_ms)
    }

    /// Clicking the readout or the reset icon.
    pub fn on_reset(&self) -> f64 {
        DEFAULT_SPEED
    }

    pub fn on_wheel(&self, current_rate: f64, delta_y: f64) -> f64 {
        wheel_target(current_rate, delta_y)
    }

    /// Slider dragged: keeps the menu open.
    pub fn on_slider_input(&mut self, value: f64) -> f64 {
        self.menu.show();
        clamp_speed(value)
    }

    pub fn set_slider_focused(&mut self, focused: bool) {
        self.slider_focused = focused;
    }

    pub fn display(&self, speed: f64) -> DisplayUpdate {
        DisplayUpdate {
            text: format_speed(speed),
            slider: (!self.slider_focused).then_some(speed),
        }
    }

    pub fn menu_visible(&self) -> bool {
        self.menu.is_visible()
    }
}

/// Page-side action for a block signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAction {
    Mount,
    Unmount,
}

/// Mounted state of the block overlay, so repeated signals are no-ops.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockOverlayState {
    mounted: bool,
}

impl BlockOverlayState {
    pub fn on_signal(&mut self, signal: BlockSignal) -> Option<BlockAction> {
        match (signal, self.mounted) {
            (BlockSignal::Show, false) => {
                self.mounted = true;
                Some(BlockAction::Mount)
            }
            (BlockSignal::Hide, true) => {
                self.mounted = false;
                Some(BlockAction::Unmount)
            }
            _ => None,
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(1.0), "1x");
        assert_eq!(format_speed(2.0), "2x");
        assert_eq!(format_speed(1.25), "1.25x");
        assert_eq!(format_speed(0.5), "0.50x");
    }

    #[test]
    fn test_wheel_target() {
        assert_eq!(wheel_target(1.0, 100.0), 0.75);
        assert_eq!(wheel_target(1.0, -100.0), 1.25);
        assert_eq!(wheel_target(0.25, 100.0), 0.25);
        assert_eq!(wheel_target(16.0, -1.0), 16.0);
        assert_eq!(wheel_target(1.1, -1.0), 1.35);
    }

    #[test]
    fn test_injection_decision() {
        assert_eq!(injection_decision(true, true), Injection::Present);
        assert_eq!(injection_decision(false, false), Injection::AnchorMissing);
        assert_eq!(injection_decision(false, true), Injection::Inject);
    }

    #[test]
    fn test_menu_hide_is_cancelled_by_reentry() {
        let mut widget = SpeedWidget::new(300);
        assert!(widget.on_pointer_enter());
        widget.on_pointer_leave(1000.0);
        assert!(!widget.on_hide_timer(1200.0));
        assert!(!widget.on_pointer_enter());
        assert!(!widget.on_hide_timer(1300.0));
        assert!(widget.menu_visible());

        widget.on_pointer_leave(2000.0);
        assert!(widget.on_hide_timer(2300.0));
        assert!(!widget.menu_visible());
    }

    #[test]
    fn test_slider_drag_keeps_menu_open() {
        let mut widget = SpeedWidget::new(300);
        widget.on_pointer_leave(0.0);
        assert_eq!(widget.on_slider_input(1.5), 1.5);
        assert!(!widget.on_hide_timer(500.0));
        assert!(widget.menu_visible());
    }

    #[test]
    fn test_focused_slider_not_updated() {
        let mut widget = SpeedWidget::new(300);
        assert_eq!(widget.display(1.5).slider, Some(1.5));
        widget.set_slider_focused(true);
        let update = widget.display(2.0);
        assert_eq!(update.text, "2x");
        assert_eq!(update.slider, None);
    }

    #[test]
    fn test_block_overlay_idempotent() {
        let mut state = BlockOverlayState::default();
        assert_eq!(state.on_signal(BlockSignal::Hide), None);
        assert_eq!(state.on_signal(BlockSignal::Show), Some(BlockAction::Mount));
        assert_eq!(state.on_signal(BlockSignal::Show), None);
        assert_eq!(state.on_signal(BlockSignal::Hide), Some(BlockAction::Unmount));
        assert!(!state.is_mounted());
    }
}
