//! Two-step click sequencing against the shared surface.
//!
//! Acting on a decision means clicking the chosen side's button and then the
//! confirm tick, with a human-ish 50–100 ms pause between the two. Click
//! emission is the only cross-table serialized step: all clicks funnel
//! through one [`ClickGate`] that keeps a 10–20 ms jittered gap between any
//! two clicks, while the pause between a table's own two steps happens
//! outside the gate so other tables' computation never waits on it.

use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::debug;

use crate::geometry::{to_absolute, ButtonLayout, Point, Region};
use crate::surface::Surface;
use crate::types::{AutomationError, Side};

/// Delay bounds for click pacing, in milliseconds
#[derive(Debug, Clone, Copy)]
pub struct ClickTiming {
    pub phase_delay_min_ms: u64,
    pub phase_delay_max_ms: u64,
    pub gap_min_ms: u64,
    pub gap_max_ms: u64,
}

impl Default for ClickTiming {
    fn default() -> Self {
        Self {
            phase_delay_min_ms: 50,
            phase_delay_max_ms: 100,
            gap_min_ms: 10,
            gap_max_ms: 20,
        }
    }
}

impl ClickTiming {
    fn jittered(min_ms: u64, max_ms: u64) -> Duration {
        let ms = if max_ms > min_ms {
            rand::thread_rng().gen_range(min_ms..=max_ms)
        } else {
            min_ms
        };
        Duration::from_millis(ms)
    }

    fn phase_delay(&self) -> Duration {
        Self::jittered(self.phase_delay_min_ms, self.phase_delay_max_ms)
    }

    fn gap(&self) -> Duration {
        Self::jittered(self.gap_min_ms, self.gap_max_ms)
    }
}

/// Serializes click emission across all tables
#[derive(Debug, Default)]
pub struct ClickGate {
    last_click: Option<Instant>,
}

impl ClickGate {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Emit a single click through the shared gate, honoring the inter-click gap
pub async fn serialized_click(
    surface: &dyn Surface,
    gate: &Mutex<ClickGate>,
    point: Point,
    timing: &ClickTiming,
) -> Result<(), AutomationError> {
    let mut gate = gate.lock().await;
    if let Some(last) = gate.last_click {
        sleep_until(last + timing.gap()).await;
    }
    surface.click_at(point).await?;
    gate.last_click = Some(Instant::now());
    Ok(())
}

/// Execute the full choose-then-confirm sequence for one decision.
///
/// `frame_origin` is the surface's current reference frame; both button
/// offsets go through the coordinate transform so the calibration offset is
/// applied consistently.
pub async fn two_step_click(
    surface: &dyn Surface,
    gate: &Mutex<ClickGate>,
    frame_origin: Point,
    region: &Region,
    buttons: &ButtonLayout,
    side: Side,
    timing: &ClickTiming,
) -> Result<(), AutomationError> {
    let choose = to_absolute(frame_origin, region, buttons.choose(side));
    serialized_click(surface, gate, choose, timing).await?;

    sleep(timing.phase_delay()).await;

    let confirm = to_absolute(frame_origin, region, buttons.confirm);
    serialized_click(surface, gate, confirm, timing).await?;

    debug!(
        "two-step click for {} at ({}, {}) then ({}, {})",
        side.as_str(),
        choose.x,
        choose.y,
        confirm.x,
        confirm.y
    );
    Ok(())
}

/// Fetch the reference frame, retrying over a short bounded window.
///
/// The frame may be briefly missing right after process start or a reload;
/// that is retryable, not fatal.
pub async fn resolve_frame(
    surface: &dyn Surface,
    attempts: u32,
    wait: Duration,
) -> Result<Point, AutomationError> {
    let mut remaining = attempts.max(1);
    loop {
        match surface.reference_frame().await {
            Ok(origin) => return Ok(origin),
            Err(err) => {
                remaining -= 1;
                if remaining == 0 {
                    return Err(err);
                }
                sleep(wait).await;
            }
        }
    }
}
