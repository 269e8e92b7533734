//! Network reachability as observed by the host platform.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStatus {
    /// Not yet reported. Delivery is attempted.
    #[default]
    Unknown,
    Wifi,
    Wan,
    NotReachable,
}

impl NetworkStatus {
    /// Only an explicit `NotReachable` counts as offline.
    pub fn is_reachable(&self) -> bool {
        !matches!(self, NetworkStatus::NotReachable)
    }
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetworkStatus::Unknown => "unknown",
            NetworkStatus::Wifi => "wifi",
            NetworkStatus::Wan => "wan",
            NetworkStatus::NotReachable => "not_reachable",
        };
        f.write_str(name)
    }
}

/// Sending half, owned by the platform connectivity observer.
pub type ConnectivityPublisher = watch::Sender<NetworkStatus>;
/// Receiving half, subscribed to by the scheduler.
pub type ConnectivityFeed = watch::Receiver<NetworkStatus>;

pub fn connectivity_channel(initial: NetworkStatus) -> (ConnectivityPublisher, ConnectivityFeed) {
    watch::channel(initial)
}
