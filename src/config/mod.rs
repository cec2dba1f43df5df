mod settings;

pub use settings::{
    AdapterConfig, CommsConfig, DispatchConfig, MissionConfig, SquadronConfig, DEFAULT_MODEL,
};
