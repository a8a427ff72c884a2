//! Frame lifecycle across successive mosaic resolutions.
//!
//! Each pump hands the manager the frames selected for the current view.
//! The manager diffs them against what it holds and reports transitions:
//!
//! ```text
//!            selected                      unselected, still in view
//!   unseen ───────────► Visible ────────────────────────► Zombie
//!                        ▲   │                              │ │
//!                        │   │ unselected, out of view      │ │ sweep: nothing
//!                        │   ▼                              │ │ resolving, or
//!                        │ Released ◄───────────────────────┘ │ out of view
//!                        │                                    │
//!                        └──────── selected again (same handle)┘
//! ```
//!
//! Zombies keep drawing until the frames replacing them are resolved, so a
//! view change never leaves holes. Released frames are announced on an
//! unbounded channel that the consumer drains on its own thread.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::mosaic::{Frame, FrameOrder, Region};

/// Identifies one held frame for the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderableHandle(u64);

impl RenderableHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RenderableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Resolving,
    Resolved,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameEntry {
    pub frame: Frame,
    pub handle: RenderableHandle,
    pub state: RenderState,
}

/// Sent when a frame is dropped for good.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseNotice {
    pub frame: Frame,
    pub handle: RenderableHandle,
}

/// Transitions produced by one update or sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PumpDelta {
    pub created: Vec<RenderableHandle>,
    pub resurrected: Vec<RenderableHandle>,
    pub retained: Vec<RenderableHandle>,
    pub zombied: Vec<RenderableHandle>,
    pub released: Vec<RenderableHandle>,
}

impl PumpDelta {
    /// True when nothing was created, resurrected, zombied or released.
    pub fn is_quiet(&self) -> bool {
        self.created.is_empty()
            && self.resurrected.is_empty()
            && self.zombied.is_empty()
            && self.released.is_empty()
    }
}

pub struct FrameLifecycleManager {
    visible: Vec<FrameEntry>,
    zombies: Vec<FrameEntry>,
    resurrected: Vec<RenderableHandle>,
    next_handle: u64,
    releases: mpsc::UnboundedSender<ReleaseNotice>,
}

impl FrameLifecycleManager {
    /// Creates a manager and the receiving end of its release queue.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReleaseNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Self {
            visible: Vec::new(),
            zombies: Vec::new(),
            resurrected: Vec::new(),
            next_handle: 1,
            releases: tx,
        };
        (manager, rx)
    }

    /// Selected frames, back to front.
    pub fn visible(&self) -> &[FrameEntry] {
        &self.visible
    }

    pub fn zombies(&self) -> &[FrameEntry] {
        &self.zombies
    }

    /// Handles resurrected since the last sweep.
    pub fn resurrected(&self) -> &[RenderableHandle] {
        &self.resurrected
    }

    pub fn entry(&self, handle: RenderableHandle) -> Option<&FrameEntry> {
        self.visible
            .iter()
            .chain(self.zombies.iter())
            .find(|e| e.handle == handle)
    }

    /// Everything that should be drawn, visible and zombie, back to front.
    pub fn render_list(&self) -> Vec<&FrameEntry> {
        let mut list: Vec<&FrameEntry> = self.visible.iter().chain(self.zombies.iter()).collect();
        list.sort_by(|a, b| FrameOrder::CoarsestFirst.compare(&a.frame, &b.frame));
        list
    }

    /// Applies a new selection for `region`.
    pub fn update(&mut self, selection: &[Frame], region: &Region) -> PumpDelta {
        let selected: HashSet<&Path> = selection.iter().map(|f| f.path()).collect();
        let mut delta = PumpDelta::default();

        for entry in std::mem::take(&mut self.visible) {
            if selected.contains(entry.frame.path()) {
                delta.retained.push(entry.handle);
                self.visible.push(entry);
            } else if region.intersects_frame(&entry.frame) {
                delta.zombied.push(entry.handle);
                self.zombies.push(entry);
            } else {
                delta.released.push(entry.handle);
                self.release(entry);
            }
        }

        for frame in selection {
            if self.visible.iter().any(|e| e.frame == *frame) {
                continue;
            }
            if let Some(pos) = self.zombies.iter().position(|e| e.frame == *frame) {
                let entry = self.zombies.remove(pos);
                trace!(handle = %entry.handle, path = %frame.path.display(), "Frame resurrected");
                delta.resurrected.push(entry.handle);
                self.resurrected.push(entry.handle);
                self.visible.push(entry);
                continue;
            }

            let handle = RenderableHandle(self.next_handle);
            self.next_handle += 1;
            delta.created.push(handle);
            self.visible.push(FrameEntry {
                frame: frame.clone(),
                handle,
                state: RenderState::Resolving,
            });
        }

        self.visible
            .sort_by(|a, b| FrameOrder::CoarsestFirst.compare(&a.frame, &b.frame));

        debug!(
            created = delta.created.len(),
            resurrected = delta.resurrected.len(),
            retained = delta.retained.len(),
            zombied = delta.zombied.len(),
            released = delta.released.len(),
            "Lifecycle updated"
        );
        delta
    }

    /// Flags a visible frame as ready to draw.
    pub fn mark_resolved(&mut self, handle: RenderableHandle) -> bool {
        match self.visible.iter_mut().find(|e| e.handle == handle) {
            Some(entry) => {
                entry.state = RenderState::Resolved;
                true
            }
            None => false,
        }
    }

    /// Releases a visible frame that cannot be shown, e.g. one whose source
    /// failed to open.
    pub fn abandon(&mut self, handle: RenderableHandle) -> bool {
        let Some(pos) = self.visible.iter().position(|e| e.handle == handle) else {
            return false;
        };
        let entry = self.visible.remove(pos);
        self.release(entry);
        true
    }

    /// Releases zombies that are no longer needed.
    ///
    /// A zombie goes once nothing visible is still resolving, or once it
    /// leaves `region`. The resurrected list is cleared.
    pub fn sweep(&mut self, region: &Region) -> Vec<RenderableHandle> {
        let any_resolving = self
            .visible
            .iter()
            .any(|e| e.state == RenderState::Resolving);

        let (keep, expired): (Vec<_>, Vec<_>) = std::mem::take(&mut self.zombies)
            .into_iter()
            .partition(|z| any_resolving && region.intersects_frame(&z.frame));
        self.zombies = keep;
        self.resurrected.clear();

        expired
            .into_iter()
            .map(|entry| {
                let handle = entry.handle;
                self.release(entry);
                handle
            })
            .collect()
    }

    fn release(&self, entry: FrameEntry) {
        trace!(handle = %entry.handle, path = %entry.frame.path.display(), "Frame released");
        let notice = ReleaseNotice {
            frame: entry.frame,
            handle: entry.handle,
        };
        if self.releases.send(notice).is_err() {
            trace!("Release queue closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::Bounds;

    fn frame(path: &str, bounds: Bounds, gsd: f64) -> Frame {
        Frame::from_bounds(path, "ortho", bounds, gsd, gsd * 8.0)
    }

    fn view(west: f64, east: f64) -> Region {
        Region::new(west, 0.0, east, 1.0).unwrap()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ReleaseNotice>) -> Vec<RenderableHandle> {
        let mut handles = Vec::new();
        while let Ok(notice) = rx.try_recv() {
            handles.push(notice.handle);
        }
        handles
    }

    #[test]
    fn test_first_update_creates_resolving_entries() {
        let (mut manager, _rx) = FrameLifecycleManager::new();
        let a = frame("a", Bounds::new(0.0, 0.0, 1.0, 1.0), 1.0);
        let b = frame("b", Bounds::new(0.0, 0.0, 1.0, 1.0), 5.0);

        let delta = manager.update(&[a, b], &view(0.0, 1.0));
        assert_eq!(delta.created.len(), 2);
        assert!(manager
            .visible()
            .iter()
            .all(|e| e.state == RenderState::Resolving));

        // Coarsest drawn first
        let order: Vec<&str> = manager
            .render_list()
            .iter()
            .map(|e| e.frame.path.to_str().unwrap())
            .collect();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[test]
    fn test_same_selection_retains() {
        let (mut manager, _rx) = FrameLifecycleManager::new();
        let a = frame("a", Bounds::new(0.0, 0.0, 1.0, 1.0), 1.0);

        let first = manager.update(std::slice::from_ref(&a), &view(0.0, 1.0));
        let second = manager.update(std::slice::from_ref(&a), &view(0.0, 1.0));
        assert_eq!(second.retained, first.created);
        assert!(second.is_quiet());
    }

    #[test]
    fn test_unselected_in_view_becomes_zombie() {
        let (mut manager, mut rx) = FrameLifecycleManager::new();
        let a = frame("a", Bounds::new(0.0, 0.0, 1.0, 1.0), 1.0);
        let b = frame("b", Bounds::new(0.0, 0.0, 1.0, 1.0), 2.0);

        let first = manager.update(std::slice::from_ref(&a), &view(0.0, 1.0));
        let delta = manager.update(std::slice::from_ref(&b), &view(0.0, 1.0));

        assert_eq!(delta.zombied, first.created);
        assert_eq!(manager.zombies().len(), 1);
        assert_eq!(manager.render_list().len(), 2);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_unselected_out_of_view_released_immediately() {
        let (mut manager, mut rx) = FrameLifecycleManager::new();
        let a = frame("a", Bounds::new(0.0, 0.0, 1.0, 1.0), 1.0);

        let first = manager.update(&[a], &view(0.0, 1.0));
        let delta = manager.update(&[], &view(10.0, 11.0));

        assert_eq!(delta.released, first.created);
        assert!(manager.zombies().is_empty());
        assert_eq!(drain(&mut rx), first.created);
    }

    #[test]
    fn test_resurrect_reuses_handle_and_state() {
        let (mut manager, _rx) = FrameLifecycleManager::new();
        let a = frame("a", Bounds::new(0.0, 0.0, 1.0, 1.0), 1.0);
        let b = frame("b", Bounds::new(0.0, 0.0, 1.0, 1.0), 2.0);

        let created = manager.update(std::slice::from_ref(&a), &view(0.0, 1.0)).created[0];
        manager.mark_resolved(created);
        manager.update(std::slice::from_ref(&b), &view(0.0, 1.0));
        let delta = manager.update(std::slice::from_ref(&a), &view(0.0, 1.0));

        assert_eq!(delta.resurrected, vec![created]);
        assert_eq!(manager.resurrected(), &[created]);
        let entry = manager.entry(created).unwrap();
        assert_eq!(entry.state, RenderState::Resolved);
        assert!(manager.visible().iter().any(|e| e.handle == created));
    }

    #[test]
    fn test_sweep_waits_for_resolving_frames() {
        let (mut manager, mut rx) = FrameLifecycleManager::new();
        let a = frame("a", Bounds::new(0.0, 0.0, 1.0, 1.0), 1.0);
        let b = frame("b", Bounds::new(0.0, 0.0, 1.0, 1.0), 2.0);
        let region = view(0.0, 1.0);

        let old = manager.update(std::slice::from_ref(&a), &region).created[0];
        let new = manager.update(std::slice::from_ref(&b), &region).created[0];

        assert!(manager.sweep(&region).is_empty());
        assert_eq!(manager.zombies().len(), 1);

        manager.mark_resolved(new);
        assert_eq!(manager.sweep(&region), vec![old]);
        assert!(manager.zombies().is_empty());
        assert_eq!(drain(&mut rx), vec![old]);
    }

    #[test]
    fn test_sweep_releases_zombie_outside_view() {
        let (mut manager, _rx) = FrameLifecycleManager::new();
        let a = frame("a", Bounds::new(0.0, 0.0, 1.0, 1.0), 1.0);
        let wide = frame("wide", Bounds::new(0.0, 0.0, 20.0, 1.0), 2.0);

        let old = manager.update(std::slice::from_ref(&a), &view(0.0, 1.0)).created[0];
        manager.update(std::slice::from_ref(&wide), &view(0.5, 1.5));
        assert_eq!(manager.zombies().len(), 1);

        // "wide" is still resolving, but "a" has left the view
        assert_eq!(manager.sweep(&view(5.0, 6.0)), vec![old]);
    }

    #[test]
    fn test_sweep_clears_resurrected() {
        let (mut manager, _rx) = FrameLifecycleManager::new();
        let a = frame("a", Bounds::new(0.0, 0.0, 1.0, 1.0), 1.0);
        let region = view(0.0, 1.0);

        manager.update(std::slice::from_ref(&a), &region);
        manager.update(&[], &region);
        manager.update(std::slice::from_ref(&a), &region);
        assert_eq!(manager.resurrected().len(), 1);

        manager.sweep(&region);
        assert!(manager.resurrected().is_empty());
    }

    #[test]
    fn test_abandon_releases_visible() {
        let (mut manager, mut rx) = FrameLifecycleManager::new();
        let a = frame("a", Bounds::new(0.0, 0.0, 1.0, 1.0), 1.0);

        let handle = manager.update(&[a], &view(0.0, 1.0)).created[0];
        assert!(manager.abandon(handle));
        assert!(!manager.abandon(handle));
        assert!(manager.visible().is_empty());
        assert_eq!(drain(&mut rx), vec![handle]);
    }

    #[test]
    fn test_handles_are_unique() {
        let (mut manager, _rx) = FrameLifecycleManager::new();
        let region = view(0.0, 1.0);
        let mut seen = HashSet::new();

        for i in 0..5 {
            let f = frame(&format!("f{}", i), Bounds::new(0.0, 0.0, 1.0, 1.0), 1.0);
            for handle in manager.update(&[f], &region).created {
                assert!(seen.insert(handle));
            }
            manager.sweep(&region);
        }
    }
}
