//! Browser-automation collaborator boundary.
//!
//! The live driver (a real browser with the rendered game canvas) sits
//! behind the [`Surface`] trait: region capture, reference-frame lookup,
//! click synthesis, and reload detection. [`ReplaySurface`] is the
//! deterministic stand-in used by tests and the binary's replay mode: it
//! serves scripted snapshots as probe frames, records every click, and can
//! inject capture failures, a late-appearing reference frame, and reloads.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::DynamicImage;
use tracing::debug;

use crate::extract::encode_probe_frame;
use crate::geometry::{Point, Region};
use crate::types::{AutomationError, Side, Snapshot, TableId};

/// The shared interactive surface all tables live on.
///
/// All tables read it concurrently every tick; nothing here mutates it. A
/// missing reference frame is retryable: the surface may still be loading at
/// process start.
#[async_trait]
pub trait Surface: Send + Sync {
    /// Capture the pixels of one table's region
    async fn capture_region(
        &self,
        table_id: TableId,
        region: &Region,
    ) -> Result<DynamicImage, AutomationError>;

    /// Current origin of the surface's bounding box within the display
    async fn reference_frame(&self) -> Result<Point, AutomationError>;

    /// Synthesize a click at an absolute point
    async fn click_at(&self, point: Point) -> Result<(), AutomationError>;

    /// Whether the surface reloaded since the last check
    async fn detect_reload(&self) -> bool;

    /// Block until the surface is usable again, up to `timeout`
    async fn wait_until_ready(&self, timeout: Duration) -> bool;
}

/// A click observed by the replay surface
#[derive(Debug, Clone, Copy)]
pub struct ClickRecord {
    pub point: Point,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct ReplayScript {
    steps: Vec<Snapshot>,
    cursor: usize,
}

impl ReplayScript {
    /// Next snapshot; the script holds its last frame once exhausted
    fn advance(&mut self) -> Snapshot {
        if self.steps.is_empty() {
            return Snapshot::default();
        }
        let snapshot = self.steps[self.cursor.min(self.steps.len() - 1)];
        if self.cursor < self.steps.len() - 1 {
            self.cursor += 1;
        }
        snapshot
    }
}

#[derive(Debug)]
struct ReplayState {
    scripts: HashMap<TableId, ReplayScript>,
    pending_capture_failures: HashMap<TableId, u32>,
    frame_origin: Point,
    frame_unavailable_for: u32,
    reload_pending: bool,
    clicks: Vec<ClickRecord>,
}

/// Deterministic scripted surface
pub struct ReplaySurface {
    state: tokio::sync::Mutex<ReplayState>,
}

impl ReplaySurface {
    pub fn new(frame_origin: Point) -> Self {
        Self {
            state: tokio::sync::Mutex::new(ReplayState {
                scripts: HashMap::new(),
                pending_capture_failures: HashMap::new(),
                frame_origin,
                frame_unavailable_for: 0,
                reload_pending: false,
                clicks: Vec::new(),
            }),
        }
    }

    /// Install the snapshot sequence a table's captures will replay
    pub async fn script_table(&self, table_id: TableId, steps: Vec<Snapshot>) {
        let mut state = self.state.lock().await;
        state
            .scripts
            .insert(table_id, ReplayScript { steps, cursor: 0 });
    }

    /// Make the next `count` captures of a table fail
    pub async fn inject_capture_failures(&self, table_id: TableId, count: u32) {
        let mut state = self.state.lock().await;
        *state.pending_capture_failures.entry(table_id).or_default() += count;
    }

    /// Make the next `count` reference-frame lookups fail
    pub async fn frame_unavailable_for(&self, count: u32) {
        self.state.lock().await.frame_unavailable_for = count;
    }

    /// Signal a reload on the next `detect_reload` call
    pub async fn trigger_reload(&self) {
        self.state.lock().await.reload_pending = true;
    }

    /// Every click recorded so far, in emission order
    pub async fn clicks(&self) -> Vec<ClickRecord> {
        self.state.lock().await.clicks.clone()
    }
}

#[async_trait]
impl Surface for ReplaySurface {
    async fn capture_region(
        &self,
        table_id: TableId,
        _region: &Region,
    ) -> Result<DynamicImage, AutomationError> {
        let mut state = self.state.lock().await;

        if let Some(remaining) = state.pending_capture_failures.get_mut(&table_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(AutomationError::CaptureFailure {
                    table_id,
                    reason: "scripted capture failure".into(),
                });
            }
        }

        let snapshot = state
            .scripts
            .get_mut(&table_id)
            .map(|script| script.advance())
            .unwrap_or_default();
        Ok(encode_probe_frame(&snapshot))
    }

    async fn reference_frame(&self) -> Result<Point, AutomationError> {
        let mut state = self.state.lock().await;
        if state.frame_unavailable_for > 0 {
            state.frame_unavailable_for -= 1;
            return Err(AutomationError::ReferenceFrameUnavailable);
        }
        Ok(state.frame_origin)
    }

    async fn click_at(&self, point: Point) -> Result<(), AutomationError> {
        let mut state = self.state.lock().await;
        state.clicks.push(ClickRecord {
            point,
            at: Instant::now(),
        });
        debug!("replay click at ({}, {})", point.x, point.y);
        Ok(())
    }

    async fn detect_reload(&self) -> bool {
        let mut state = self.state.lock().await;
        std::mem::take(&mut state.reload_pending)
    }

    async fn wait_until_ready(&self, _timeout: Duration) -> bool {
        true
    }
}

/// Build a scripted snapshot sequence covering `rounds` full rounds.
///
/// Each round counts the timer down from a starting duration through the
/// interactive window into the tail, then starts the next round with the
/// winning side's score bumped. Winners follow a fixed repeating sequence so
/// replays are stable run to run.
pub fn demo_round_script(rounds: u32) -> Vec<Snapshot> {
    const TIMER_STEPS: [u8; 6] = [15, 12, 9, 6, 3, 0];
    const WINNERS: [Side; 4] = [Side::Red, Side::Red, Side::Blue, Side::Red];

    let mut steps = Vec::new();
    let mut blue = 0u32;
    let mut red = 0u32;
    for round in 0..rounds {
        for timer in TIMER_STEPS {
            steps.push(Snapshot::new(timer, blue, red));
        }
        match WINNERS[(round as usize) % WINNERS.len()] {
            Side::Blue => blue += 1,
            Side::Red => red += 1,
        }
    }
    // The score bump lands on the next round's opening frame.
    steps.push(Snapshot::new(15, blue, red));
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::decode_probe_frame;

    fn region() -> Region {
        Region::new(0, 0, 240, 180)
    }

    #[tokio::test]
    async fn test_scripted_captures_advance_and_hold_last_frame() {
        let surface = ReplaySurface::new(Point::new(0, 0));
        surface
            .script_table(1, vec![Snapshot::new(15, 0, 0), Snapshot::new(12, 0, 0)])
            .await;

        let first = surface.capture_region(1, &region()).await.unwrap();
        assert_eq!(decode_probe_frame(&first).timer, Some(15));
        let second = surface.capture_region(1, &region()).await.unwrap();
        assert_eq!(decode_probe_frame(&second).timer, Some(12));
        // Exhausted scripts repeat their final frame.
        let third = surface.capture_region(1, &region()).await.unwrap();
        assert_eq!(decode_probe_frame(&third).timer, Some(12));
    }

    #[tokio::test]
    async fn test_injected_capture_failures_then_recovery() {
        let surface = ReplaySurface::new(Point::new(0, 0));
        surface.script_table(2, vec![Snapshot::new(15, 0, 0)]).await;
        surface.inject_capture_failures(2, 2).await;

        assert!(surface.capture_region(2, &region()).await.is_err());
        assert!(surface.capture_region(2, &region()).await.is_err());
        assert!(surface.capture_region(2, &region()).await.is_ok());
    }

    #[tokio::test]
    async fn test_reference_frame_can_appear_late() {
        let surface = ReplaySurface::new(Point::new(100, 50));
        surface.frame_unavailable_for(1).await;

        assert!(matches!(
            surface.reference_frame().await,
            Err(AutomationError::ReferenceFrameUnavailable)
        ));
        assert_eq!(surface.reference_frame().await.unwrap(), Point::new(100, 50));
    }

    #[tokio::test]
    async fn test_reload_flag_clears_after_detection() {
        let surface = ReplaySurface::new(Point::new(0, 0));
        assert!(!surface.detect_reload().await);
        surface.trigger_reload().await;
        assert!(surface.detect_reload().await);
        assert!(!surface.detect_reload().await);
    }

    #[test]
    fn test_demo_script_counts_full_rounds() {
        let steps = demo_round_script(3);
        assert_eq!(steps.len(), 3 * 6 + 1);
        // Exactly three score increases across the whole script.
        let mut increases = 0;
        for pair in steps.windows(2) {
            let before = pair[0].blue_score.unwrap() + pair[0].red_score.unwrap();
            let after = pair[1].blue_score.unwrap() + pair[1].red_score.unwrap();
            if after > before {
                increases += 1;
            }
        }
        assert_eq!(increases, 3);
    }
}
