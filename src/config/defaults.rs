//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

// =============================================================================
// Room Defaults
// =============================================================================

pub fn default_max_concurrent_rooms() -> usize {
    50
}

pub fn default_room_creation_delay_ms() -> u64 {
    100
}

pub fn default_room_name_template() -> String {
    "{display_name}'s Channel".to_string()
}

pub fn default_max_voice_errors_before_resync() -> u32 {
    5
}

pub fn default_coup_window_s() -> u64 {
    300
}

// =============================================================================
// Reconcile Defaults
// =============================================================================

pub fn default_reconcile_period_s() -> u64 {
    120
}

// =============================================================================
// Rate Limit Defaults
// =============================================================================

pub fn default_max_actions() -> u32 {
    5
}

pub fn default_time_window_ms() -> u64 {
    60_000
}

// =============================================================================
// Database Defaults
// =============================================================================

pub fn default_database_path() -> String {
    "atriumd.db".to_string()
}
