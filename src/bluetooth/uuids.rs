use uuid::{uuid, Uuid};

pub const SRV_CURRENT_TIME: Uuid = uuid!("00001805-0000-1000-8000-00805f9b34fb");

pub const CHR_CURRENT_TIME: Uuid = uuid!("00002a2b-0000-1000-8000-00805f9b34fb");
pub const CHR_LOCAL_TIME_INFO: Uuid = uuid!("00002a0f-0000-1000-8000-00805f9b34fb");

pub const DSC_CLIENT_CONFIG: Uuid = uuid!("00002902-0000-1000-8000-00805f9b34fb");
