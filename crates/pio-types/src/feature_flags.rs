//! File-presence feature gates. See spec.md §6: the *presence* of the named
//! file under a node's root directory disables the corresponding surface.
//! Shared between `UnitAPI` and `LeaderAPI` since both gate on the same
//! files.

use std::path::Path;

pub const DISALLOW_UI_INSTALLS: &str = "DISALLOW_UI_INSTALLS";
pub const DISALLOW_UI_UPLOADS: &str = "DISALLOW_UI_UPLOADS";
pub const DISALLOW_UI_FILE_SYSTEM: &str = "DISALLOW_UI_FILE_SYSTEM";
pub const LOCAL_ACCESS_POINT: &str = "/boot/firmware/local_access_point";

/// Is the feature gated by `flag_file` (one of the constants above)
/// currently disabled under `root`?
pub fn is_disabled(root: &Path, flag_file: &str) -> bool {
    root.join(flag_file).exists()
}
