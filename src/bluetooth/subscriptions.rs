use super::{
    profile::{self, AdjustReason},
    services::Attribute,
    transport::{PeerId, Transport},
    uuids,
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone};
use std::{
    collections::HashSet,
    sync::{Mutex, MutexGuard, PoisonError},
};

pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// Peers that enabled Current Time notifications
#[derive(Debug, Default)]
pub struct Subscriptions {
    peers: Mutex<HashSet<PeerId>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    fn peers(&self) -> MutexGuard<'_, HashSet<PeerId>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.peers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers().is_empty()
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.peers().contains(peer)
    }

    pub fn clear(&self) {
        self.peers().clear();
    }

    /// Client Characteristic Configuration write. Values other than
    /// enable/disable are rejected and leave the subscription untouched.
    pub fn on_descriptor_write(&self, peer: PeerId, value: &[u8]) -> Result<()> {
        if value == ENABLE_NOTIFICATION_VALUE {
            log::debug!("Subscribe device to notifications: {peer}");
            self.peers().insert(peer);
            Ok(())
        } else if value == DISABLE_NOTIFICATION_VALUE {
            log::debug!("Unsubscribe device from notifications: {peer}");
            self.peers().remove(&peer);
            Ok(())
        } else {
            Err(anyhow!("Invalid client configuration value from {peer}: {value:02x?}"))
        }
    }

    pub fn on_descriptor_read(&self, peer: &PeerId) -> [u8; 2] {
        if self.contains(peer) {
            ENABLE_NOTIFICATION_VALUE
        } else {
            DISABLE_NOTIFICATION_VALUE
        }
    }

    pub fn on_characteristic_read<Tz: TimeZone>(
        &self,
        peer: &PeerId,
        attribute: Attribute,
        time: &DateTime<Tz>,
    ) -> Result<Vec<u8>> {
        match attribute {
            Attribute::CurrentTime => {
                log::info!("Read CurrentTime from {peer}");
                Ok(profile::exact_time(time, AdjustReason::NONE).to_vec())
            }
            Attribute::LocalTimeInfo => {
                log::info!("Read LocalTimeInfo from {peer}");
                Ok(profile::local_time_info_at(time).to_vec())
            }
            Attribute::ClientConfig => Err(anyhow!("{} is a descriptor", uuids::DSC_CLIENT_CONFIG)),
            Attribute::Unknown(uuid) => Err(anyhow!("Invalid characteristic read: {uuid}")),
        }
    }

    pub fn on_peer_disconnected(&self, peer: &PeerId) {
        if self.peers().remove(peer) {
            log::debug!("Dropped subscription of {peer}");
        }
    }

    /// Send Current Time to every subscriber, returns the number
    /// of notifications handed over to the transport
    pub fn notify_all<T, Tz>(&self, transport: &T, time: &DateTime<Tz>, reason: AdjustReason) -> usize
    where
        T: Transport + ?Sized,
        Tz: TimeZone,
    {
        let peers = self.peers();
        if peers.is_empty() {
            log::info!("No subscribers registered");
            return 0;
        }

        let exact_time = profile::exact_time(time, reason);
        log::info!("Sending update to {} subscribers", peers.len());

        let mut sent = 0;
        for peer in peers.iter() {
            match transport.send_notification(*peer, uuids::CHR_CURRENT_TIME, &exact_time) {
                Ok(()) => sent += 1,
                Err(error) => log::warn!("Failed to notify {peer}: {error}"),
            }
        }
        sent
    }
}
