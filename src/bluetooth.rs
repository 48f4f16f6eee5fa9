mod bluez;
mod clock;
mod profile;
mod server;
mod services;
mod subscriptions;
mod transport;
pub mod uuids;

pub use bluez::{init_adapter, serve, BluezAdvertiser, BluezServer, BluezTransport};
pub use clock::{ClockEvent, ClockWatcher};
pub use profile::{
    dst_offset_code, exact_time, local_time_info, local_time_info_at, weekday_code, AdjustReason, DayOfWeek,
    DstOffset, ZoneOffsets,
};
pub use server::TimeServer;
pub use services::{
    time_service, Attribute, CharacteristicDescription, DescriptorDescription, Permissions, Properties,
    ServiceDescription,
};
pub use subscriptions::{Subscriptions, DISABLE_NOTIFICATION_VALUE, ENABLE_NOTIFICATION_VALUE};
pub use transport::{Advertiser, GattEvent, PeerId, Status, Transport};
