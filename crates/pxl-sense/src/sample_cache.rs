use std::collections::HashMap;
use std::sync::Arc;

use pxl_engine::{BeaconAddress, Sample};
use tokio::sync::RwLock;

/// Latest reading per beacon, written by the discovery task and read by the
/// control loop. Cloning shares the same map.
#[derive(Clone, Debug, Default)]
pub struct SampleCache {
    inner: Arc<RwLock<HashMap<BeaconAddress, Sample>>>,
}

impl SampleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored reading for `sample.address`.
    pub async fn record(&self, sample: Sample) {
        let mut map = self.inner.write().await;
        map.insert(sample.address.clone(), sample);
    }

    pub async fn latest(&self, address: &BeaconAddress) -> Option<Sample> {
        self.inner.read().await.get(address).cloned()
    }
}
