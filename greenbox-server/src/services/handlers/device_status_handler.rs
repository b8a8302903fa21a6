use std::collections::BTreeMap;

use greenbox_api::models::{DeviceDocument, DeviceId, DeviceStatus};
use serde::Serialize;

/// Connectivity of one actuator device as seen by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DeviceLink {
    pub status: DeviceStatus,
    pub consecutive_failures: u32,
    /// Intended state has not been confirmed by the device yet
    pub unconfirmed: bool,
}

/// What a dispatch outcome did to a device's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkChange {
    Unchanged,
    WentOffline,
    Recovered,
}

/// Tracks dispatch health per device of one greenhouse.
#[derive(Debug, Default)]
pub struct DeviceStatusHandler {
    links: BTreeMap<DeviceId, DeviceLink>,
    max_failures: u32,
}

impl DeviceStatusHandler {
    pub fn new(devices: &[DeviceDocument], max_failures: u32) -> Self {
        let links = devices
            .iter()
            .map(|device| {
                let link = DeviceLink {
                    status: device.status,
                    consecutive_failures: 0,
                    // An offline device gets probed with its intended state
                    unconfirmed: device.status == DeviceStatus::Offline,
                };
                (device.device_id.clone(), link)
            })
            .collect();

        Self {
            links,
            max_failures: max_failures.max(1),
        }
    }

    pub fn link(&self, device_id: &str) -> DeviceLink {
        self.links.get(device_id).copied().unwrap_or_default()
    }

    pub fn is_offline(&self, device_id: &str) -> bool {
        self.link(device_id).status == DeviceStatus::Offline
    }

    pub fn needs_resend(&self, device_id: &str) -> bool {
        self.link(device_id).unconfirmed
    }

    pub fn record_success(&mut self, device_id: &str) -> LinkChange {
        let link = self.links.entry(device_id.to_string()).or_default();
        let recovered = link.status == DeviceStatus::Offline;

        *link = DeviceLink::default();

        if recovered {
            tracing::info!(device_id, "device back online");
            LinkChange::Recovered
        } else {
            LinkChange::Unchanged
        }
    }

    pub fn record_failure(&mut self, device_id: &str) -> LinkChange {
        let link = self.links.entry(device_id.to_string()).or_default();
        link.consecutive_failures = link.consecutive_failures.saturating_add(1);
        link.unconfirmed = true;

        if link.status == DeviceStatus::Online && link.consecutive_failures >= self.max_failures {
            link.status = DeviceStatus::Offline;
            tracing::warn!(
                device_id,
                failures = link.consecutive_failures,
                "device marked offline"
            );
            LinkChange::WentOffline
        } else {
            LinkChange::Unchanged
        }
    }

    /// Status reported by the platform, e.g. after a maintenance visit.
    pub fn set_status(&mut self, device_id: &str, status: DeviceStatus) -> LinkChange {
        let link = self.links.entry(device_id.to_string()).or_default();
        let previous = link.status;

        link.status = status;
        match (previous, status) {
            (DeviceStatus::Offline, DeviceStatus::Online) => {
                link.consecutive_failures = 0;
                LinkChange::Recovered
            }
            (DeviceStatus::Online, DeviceStatus::Offline) => {
                link.unconfirmed = true;
                LinkChange::WentOffline
            }
            _ => LinkChange::Unchanged,
        }
    }

    pub fn links(&self) -> &BTreeMap<DeviceId, DeviceLink> {
        &self.links
    }
}
