//! Virtual media lifecycle.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaState {
    Absent,
    /// Growable disk exists (created or reused)
    Created,
    /// Flat boot image holds a FAT32 filesystem (formatted or reused)
    Formatted,
    /// Flat image loop-mounted at the scratch mountpoint
    Mounted,
    /// Boot files copied into the image
    Populated,
    /// Scratch mountpoint unmounted and removed
    Unmounted,
}

impl MediaState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaState::Absent => "absent",
            MediaState::Created => "created",
            MediaState::Formatted => "formatted",
            MediaState::Mounted => "mounted",
            MediaState::Populated => "populated",
            MediaState::Unmounted => "unmounted",
        }
    }

    /// `Formatted -> Populated` is the mtools path, which never mounts.
    /// `Mounted -> Unmounted` covers a failed or cancelled populate.
    pub fn valid_next_states(&self) -> &'static [MediaState] {
        use MediaState::*;
        match self {
            Absent => &[Created],
            Created => &[Formatted],
            Formatted => &[Mounted, Populated],
            Mounted => &[Populated, Unmounted],
            Populated => &[Unmounted],
            Unmounted => &[],
        }
    }

    pub fn can_transition_to(&self, next: MediaState) -> bool {
        self.valid_next_states().contains(&next)
    }
}

impl std::fmt::Display for MediaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one staging run through the lifecycle.
#[derive(Debug, Clone)]
pub struct MediaLifecycle {
    state: MediaState,
    history: Vec<MediaState>,
}

impl Default for MediaLifecycle {
    fn default() -> Self {
        MediaLifecycle {
            state: MediaState::Absent,
            history: vec![MediaState::Absent],
        }
    }
}

impl MediaLifecycle {
    pub fn state(&self) -> MediaState {
        self.state
    }

    pub fn history(&self) -> &[MediaState] {
        &self.history
    }

    pub fn transition_to(&mut self, next: MediaState) -> Result<(), String> {
        if !self.state.can_transition_to(next) {
            return Err(format!(
                "Invalid media transition: {} -> {}",
                self.state.as_str(),
                next.as_str()
            ));
        }
        log::debug!("[Media] [STATE] {} -> {}", self.state, next);
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}
