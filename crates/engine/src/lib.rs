pub mod command;
pub mod config;
pub mod dispatch;
pub mod drivers;
pub mod error;
pub mod normalize;
pub mod registry;
pub mod script;

pub use command::{Command, CommandKind, Handle};
pub use config::{ConfigError, EngineConfig, Profile, ProfileSet};
pub use dispatch::Dispatcher;
pub use drivers::DriverKind;
pub use error::{EdgeError, ErrorKind, Result};
pub use normalize::{Reply, ResultSet};
pub use registry::HandleRegistry;
pub use script::ScriptReport;
