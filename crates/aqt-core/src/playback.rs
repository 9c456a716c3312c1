//! Playback Speed Enforcer
//!
//! Holds the player to the user's chosen rate. The host page resets the rate
//! on navigation, ad breaks and quality changes, so the target is re-asserted
//! on a fixed interval and whenever the video reports a rate change. Writes
//! only happen when the live rate diverges beyond a tolerance, which keeps
//! the enforcer from fighting float jitter or its own rate-change events.

use std::time::Duration;

use log::{debug, info, warn};
use serde_json::Value;

use crate::config::ContentConfig;
use crate::dom::{Dom, DomError, Media};

pub const MIN_SPEED: f64 = 0.25;
pub const MAX_SPEED: f64 = 16.0;
pub const DEFAULT_SPEED: f64 = 1.0;

/// Marks videos that already carry our rate-change listener.
pub const ATTACHED_MARKER: &str = "data-aqt-speed-attached";

/// Clamp to the supported range, rounded to two decimals. Non-finite input
/// yields the default speed.
pub fn clamp_speed(value: f64) -> f64 {
    if !value.is_finite() {
        return DEFAULT_SPEED;
    }
    ((value * 100.0).round() / 100.0).clamp(MIN_SPEED, MAX_SPEED)
}

/// Speed from a stored value. Anything but a finite number is the default.
pub fn speed_from_stored(value: Option<&Value>) -> f64 {
    value.and_then(Value::as_f64).map_or(DEFAULT_SPEED, clamp_speed)
}

/// Best-effort detection of pages where the speed should be left alone.
///
/// Implementations inspect page structure and may produce false negatives.
pub trait ContentProbe<D: Dom> {
    fn is_exempt(&self, dom: &D) -> bool;
}

impl<D: Dom, F: Fn(&D) -> bool> ContentProbe<D> for F {
    fn is_exempt(&self, dom: &D) -> bool {
        self(dom)
    }
}

/// Exempts music videos published by official artist channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtistChannelProbe;

/// Verified-artist badge next to the channel name under the player.
pub const ARTIST_BADGE_SELECTOR: &str = "ytd-video-owner-renderer .badge-style-type-verified-artist";

impl<D: Dom> ContentProbe<D> for ArtistChannelProbe {
    fn is_exempt(&self, dom: &D) -> bool {
        dom.query(ARTIST_BADGE_SELECTOR).is_some()
    }
}

pub struct SpeedEnforcer<D: Media> {
    speed: f64,
    tolerance: f64,
    interval: Duration,
    initialized: bool,
    probe: Box<dyn ContentProbe<D>>,
}

impl<D: Media> SpeedEnforcer<D> {
    pub fn new(config: &ContentConfig, probe: Box<dyn ContentProbe<D>>) -> Self {
        Self {
            speed: DEFAULT_SPEED,
            tolerance: config.speed_tolerance,
            interval: Duration::from_millis(u64::from(config.enforcement_interval_ms)),
            initialized: false,
            probe,
        }
    }

    /// Load the stored target and apply it once. The caller starts the
    /// re-assertion loop at [`Self::enforcement_interval`]. Repeated calls
    /// are ignored.
    pub fn initialize(&mut self, dom: &D, stored: Option<&Value>) -> f64 {
        if self.initialized {
            return self.speed;
        }
        self.speed = speed_from_stored(stored);
        info!("Playback speed initialized at {}x", self.speed);

        if let Some(video) = dom.main_video() {
            self.attach(dom, &video);
        }
        self.apply_speed(dom);
        self.initialized = true;
        self.speed
    }

    /// Validate, store and immediately apply a new target.
    pub fn set_speed(&mut self, dom: &D, value: f64) -> f64 {
        self.speed = clamp_speed(value);
        debug!("Playback speed set to {}x", self.speed);
        self.apply_speed(dom);
        self.speed
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn enforcement_interval(&self) -> Duration {
        self.interval
    }

    /// Write the target to the main video if it diverged. Returns whether a
    /// write happened.
    pub fn apply_speed(&self, dom: &D) -> bool {
        let Some(video) = dom.main_video() else {
            return false;
        };
        if self.probe.is_exempt(dom) {
            return false;
        }
        let Some(live) = dom.playback_rate(&video) else {
            return false;
        };
        if (live - self.speed).abs() <= self.tolerance {
            return false;
        }

        match dom.set_playback_rate(&video, self.speed) {
            Ok(()) => {
                debug!("Re-asserted playback speed {}x (was {}x)", self.speed, live);
                true
            }
            Err(e) => {
                debug!("Video refused playback speed {}x: {}", self.speed, e);
                false
            }
        }
    }

    /// A video reported a rate change.
    pub fn on_rate_change(&self, dom: &D, video: &D::Node) -> bool {
        match dom.playback_rate(video) {
            Some(live) if (live - self.speed).abs() > self.tolerance => self.apply_speed(dom),
            _ => false,
        }
    }

    /// Nodes were added to the page; a new player may have appeared.
    pub fn on_nodes_added(&self, dom: &D) {
        if let Some(video) = dom.main_video() {
            self.attach(dom, &video);
            self.apply_speed(dom);
        }
    }

    /// Re-attach and re-apply after navigation.
    pub fn reapply(&self, dom: &D) {
        self.on_nodes_added(dom);
    }

    /// Install the rate-change listener once per video.
    pub fn attach_video_listeners(&self, dom: &D, video: &D::Node) -> Result<bool, DomError> {
        if dom.attribute(video, ATTACHED_MARKER).is_some() {
            return Ok(false);
        }
        dom.watch_rate_changes(video)?;
        dom.set_attribute(video, ATTACHED_MARKER, "true")?;
        Ok(true)
    }

    fn attach(&self, dom: &D, video: &D::Node) {
        if let Err(e) = self.attach_video_listeners(dom, video) {
            warn!("Failed to watch video rate changes: {}", e);
        }
    }

    /// Stop enforcing. The caller clears its interval and observer.
    pub fn destroy(&mut self) {
        self.initialized = false;
    }
}
