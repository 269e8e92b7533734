use serde::{Deserialize, Serialize};

/// Native crash captured during a previous process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCrashData {
    #[serde(rename = "report_id")]
    pub native_crash_id: String,
    #[serde(rename = "sid")]
    pub session_id: String,
    #[serde(rename = "ts")]
    pub timestamp_ms: i64,
}

/// Supplies the most recent native crash, if the platform recorded one.
pub trait NativeCrashSource: Send + Sync {
    fn latest_crash(&self) -> Option<NativeCrashData>;
}

/// Crash source backed by a fixed value.
#[derive(Debug, Clone, Default)]
pub struct StaticCrashSource(pub Option<NativeCrashData>);

impl NativeCrashSource for StaticCrashSource {
    fn latest_crash(&self) -> Option<NativeCrashData> {
        self.0.clone()
    }
}
