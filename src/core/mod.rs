mod change_bus;

pub use change_bus::{
    ChangeBus, ChangeEnvelope, ChangeEvent, ChangeOrigin, DEFAULT_CHANNEL_CAPACITY,
};
