//! Imagery lifecycle states.

use std::fmt;

/// Lifecycle state of one imagery tile.
///
/// ```text
///   Unloaded ──► Transitioning ──► Received ──► TextureLoaded ──► Ready
///      ▲              │  │             │  │
///      └── cancelled ─┘  ▼             ▼  ▼
///                      Failed       Invalid / Failed
/// ```
///
/// `Placeholder` stands in for a layer whose provider is not ready yet and
/// never transitions; it is replaced by real skeletons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageryState {
    #[default]
    Unloaded,
    Transitioning,
    Received,
    TextureLoaded,
    Ready,
    Failed,
    Invalid,
    Placeholder,
}

impl ImageryState {
    /// `Failed` and `Invalid` end the lifecycle of an imagery tile.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Invalid)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Leaving a terminal state is not a transition; it requires an explicit
    /// reset by the caller.
    pub fn can_transition_to(&self, next: ImageryState) -> bool {
        use ImageryState::*;

        matches!(
            (self, next),
            (Unloaded, Transitioning)
                | (Transitioning, Received)
                | (Transitioning, Unloaded)
                | (Transitioning, Failed)
                | (Received, TextureLoaded)
                | (Received, Invalid)
                | (Received, Failed)
                | (TextureLoaded, Ready)
        )
    }
}

impl fmt::Display for ImageryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unloaded => "unloaded",
            Self::Transitioning => "transitioning",
            Self::Received => "received",
            Self::TextureLoaded => "texture-loaded",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Invalid => "invalid",
            Self::Placeholder => "placeholder",
        };
        f.write_str(name)
    }
}
