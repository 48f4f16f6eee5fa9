use super::services::ServiceDescription;
use anyhow::Result;
use bluer::Address;
use std::{fmt, future::Future};
use uuid::Uuid;

/// Identity of a connected central.
///
/// Some stacks only expose notification sessions and never tell which
/// device has subscribed, such peers are identified by a session number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerId {
    Device(Address),
    Session(u32),
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(address) => write!(f, "{address}"),
            Self::Session(id) => write!(f, "session #{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failure,
}

/// Requests and connection changes delivered by the GATT transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent {
    Connected(PeerId),
    Disconnected(PeerId),
    CharacteristicRead {
        peer: PeerId,
        request_id: u32,
        offset: u16,
        characteristic: Uuid,
    },
    DescriptorRead {
        peer: PeerId,
        request_id: u32,
        offset: u16,
        descriptor: Uuid,
    },
    DescriptorWrite {
        peer: PeerId,
        request_id: u32,
        descriptor: Uuid,
        response_needed: bool,
        offset: u16,
        value: Vec<u8>,
    },
}

/// GATT server side of a BLE stack
pub trait Transport: Send + Sync {
    type Server: Send;

    fn open_server(&self) -> impl Future<Output = Result<Self::Server>> + Send;

    fn add_service(
        &self,
        server: &mut Self::Server,
        service: &ServiceDescription,
    ) -> impl Future<Output = Result<()>> + Send;

    fn close_server(&self, server: Self::Server) -> impl Future<Output = ()> + Send;

    fn send_response(
        &self,
        peer: PeerId,
        request_id: u32,
        status: Status,
        offset: u16,
        value: Option<Vec<u8>>,
    );

    /// Queue a notification, without waiting for it to be delivered
    fn send_notification(&self, peer: PeerId, characteristic: Uuid, value: &[u8]) -> Result<()>;
}

/// LE advertising side of a BLE stack
pub trait Advertiser: Send + Sync {
    fn start_advertising(&self, service: Uuid) -> impl Future<Output = Result<()>> + Send;

    fn stop_advertising(&self) -> impl Future<Output = Result<()>> + Send;
}
