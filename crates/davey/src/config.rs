//! Tunable limits for group sessions.
//!
//! All limits have defaults sized for voice channels. Constructing a
//! session with [`GroupConfig::default`] matches the behavior of the
//! plain constructor.

use std::time::Duration;

/// Maximum number of members a group accepts.
pub const DEFAULT_MAX_MEMBERS: usize = 256;

/// Number of epochs whose media secrets stay decryptable, including the
/// current one. Frames from older epochs are rejected.
pub const DEFAULT_RETAINED_EPOCHS: usize = 3;

/// Grace window after passthrough mode is switched off during which
/// unencrypted frames are still accepted. Covers senders that have not
/// yet observed the transition.
pub const DEFAULT_PASSTHROUGH_TRANSITION: Duration = Duration::from_secs(10);

/// Group session configuration.
#[derive(Debug, Clone)]
pub struct GroupConfig {
    /// Maximum number of members, counting the local one.
    pub max_members: usize,
    /// Epochs retained for inbound media decryption, counting the
    /// current one. Must be at least 1.
    pub retained_epochs: usize,
    /// Grace window for unencrypted frames after passthrough is disabled.
    pub passthrough_transition: Duration,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            max_members: DEFAULT_MAX_MEMBERS,
            retained_epochs: DEFAULT_RETAINED_EPOCHS,
            passthrough_transition: DEFAULT_PASSTHROUGH_TRANSITION,
        }
    }
}
