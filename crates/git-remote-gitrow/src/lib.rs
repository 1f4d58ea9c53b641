//! git remote helper for gitrow servers
//!
//! Installed as `git-remote-gitrow`, it lets `git clone gitrow::https://...`
//! push and fetch against a repository stored as rows.

pub mod credentials;
pub mod error;
pub mod helper;
pub mod protocol;

pub use credentials::{ChainProvider, CommandToken, EnvToken, StaticToken};
pub use error::HelperError;
pub use helper::RemoteHelper;
pub use protocol::{Command, ProtocolReader, ProtocolWriter, PushSpec};
