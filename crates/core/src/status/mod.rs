//! Single current-status string shown to the user.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{config::StatusConfig, placement::PlacementKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStatus {
    Searching,
    SurfacePlaced,
    FloatingPlaced,
    Collected,
    /// Recognition has been in flight for longer than expected.
    Stalled,
}

impl From<PlacementKind> for PlacementStatus {
    fn from(kind: PlacementKind) -> Self {
        match kind {
            PlacementKind::Surface => Self::SurfacePlaced,
            PlacementKind::Floating => Self::FloatingPlaced,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: PlacementStatus,
    pub message: String,
    /// Incremented on every change.
    pub revision: u64,
}

/// Writer side, owned by the engine.
#[derive(Debug)]
pub struct StatusBoard {
    shared: Arc<RwLock<StatusSnapshot>>,
    messages: StatusConfig,
    marker: String,
}

impl StatusBoard {
    /// Starts in [`PlacementStatus::Searching`].
    pub fn new(messages: StatusConfig, marker: impl Into<String>) -> Self {
        let marker = marker.into();
        let message = render(&messages.searching, &marker);
        Self {
            shared: Arc::new(RwLock::new(StatusSnapshot {
                status: PlacementStatus::Searching,
                message,
                revision: 0,
            })),
            messages,
            marker,
        }
    }

    pub fn reader(&self) -> StatusReader {
        StatusReader {
            shared: self.shared.clone(),
        }
    }

    /// Publishes `status`; re-publishing the current status is a no-op.
    pub fn publish(&self, status: PlacementStatus) {
        let template = match status {
            PlacementStatus::Searching => &self.messages.searching,
            PlacementStatus::SurfacePlaced => &self.messages.surface_placed,
            PlacementStatus::FloatingPlaced => &self.messages.floating_placed,
            PlacementStatus::Collected => &self.messages.collected,
            PlacementStatus::Stalled => &self.messages.stalled,
        };

        let mut snapshot = self.shared.write();
        if snapshot.status == status {
            return;
        }
        snapshot.status = status;
        snapshot.message = render(template, &self.marker);
        snapshot.revision += 1;
        tracing::debug!(?status, message = %snapshot.message, "status updated");
    }

    pub fn current(&self) -> PlacementStatus {
        self.shared.read().status
    }
}

/// Read-only handle for the presentation layer.
#[derive(Debug, Clone)]
pub struct StatusReader {
    shared: Arc<RwLock<StatusSnapshot>>,
}

impl StatusReader {
    pub fn snapshot(&self) -> StatusSnapshot {
        self.shared.read().clone()
    }

    pub fn status(&self) -> PlacementStatus {
        self.shared.read().status
    }

    pub fn message(&self) -> String {
        self.shared.read().message.clone()
    }
}

fn render(template: &str, marker: &str) -> String {
    template.replace("{marker}", marker)
}
