//! Constants for the operation engine.
//!
//! All reserved prefixes, format versions and default sizes are defined
//! here to ensure consistency and prevent magic numbers throughout the
//! codebase.

// =============================================================================
// Reference Tokens
// =============================================================================

/// Reserved prefix marking a cross-resource reference inside an attribute
/// tree. The byte sequence is part of the manifest wire format and must not
/// change.
///
/// A token has the shape `$kusion_path:<resourceID>.<segment>(.<segment>)*`
/// and is only valid as a string scalar inside `attributes`.
pub const IMPLICIT_REF_PREFIX: &str = "$kusion_path:";

// =============================================================================
// State Snapshot Format
// =============================================================================

/// Version of the state snapshot schema written by this engine.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// File name of a persisted snapshot inside its scope directory.
pub const STATE_FILE_NAME: &str = "state.json";

/// Subdirectory of the file backend's base directory holding snapshots.
pub const STATE_STORE_DIR: &str = "states";

// =============================================================================
// Walk Defaults
// =============================================================================

/// Default capacity of the progress event bus. Producers block once the
/// consumer falls this many events behind.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Fallback walk parallelism when the number of available cores cannot be
/// determined.
pub const FALLBACK_PARALLELISM: usize = 4;
