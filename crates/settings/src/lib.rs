//! 使用者偏好設定與資料路徑。 / User preferences and per-user data paths.

pub mod paths;
pub mod preferences;
pub mod recent;

pub use paths::AppPaths;
pub use preferences::{
    LimitPreferences, Preferences, PreferencesError, PreferencesStore, SessionPreferences,
};
pub use recent::{RecentFiles, RecentFilesStore, DEFAULT_RECENT_CAPACITY};
