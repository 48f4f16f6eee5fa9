use super::uuids;
use uuid::Uuid;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Properties {
    pub read: bool,
    pub notify: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorDescription {
    pub uuid: Uuid,
    pub permissions: Permissions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDescription {
    pub uuid: Uuid,
    pub properties: Properties,
    pub permissions: Permissions,
    pub descriptors: Vec<DescriptorDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescription {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<CharacteristicDescription>,
}

/// Attributes of the Current Time Service that requests can refer to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    CurrentTime,
    LocalTimeInfo,
    ClientConfig,
    Unknown(Uuid),
}

impl From<Uuid> for Attribute {
    fn from(uuid: Uuid) -> Self {
        match uuid {
            uuids::CHR_CURRENT_TIME => Self::CurrentTime,
            uuids::CHR_LOCAL_TIME_INFO => Self::LocalTimeInfo,
            uuids::DSC_CLIENT_CONFIG => Self::ClientConfig,
            other => Self::Unknown(other),
        }
    }
}

/// Current Time Service: a readable, notifying Current Time characteristic
/// and a readable Local Time Information characteristic.
pub fn time_service() -> ServiceDescription {
    let current_time = CharacteristicDescription {
        uuid: uuids::CHR_CURRENT_TIME,
        properties: Properties { read: true, notify: true },
        permissions: Permissions { read: true, ..Default::default() },
        descriptors: vec![DescriptorDescription {
            uuid: uuids::DSC_CLIENT_CONFIG,
            permissions: Permissions { read: true, write: true },
        }],
    };

    let local_time_info = CharacteristicDescription {
        uuid: uuids::CHR_LOCAL_TIME_INFO,
        properties: Properties { read: true, ..Default::default() },
        permissions: Permissions { read: true, ..Default::default() },
        descriptors: Vec::new(),
    };

    ServiceDescription {
        uuid: uuids::SRV_CURRENT_TIME,
        primary: true,
        characteristics: vec![current_time, local_time_info],
    }
}
