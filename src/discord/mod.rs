//! Discord connectivity: REST history fetching and gateway event streaming.

pub mod gateway;
pub mod rest;
pub mod types;

pub use gateway::DiscordGateway;
pub use rest::DiscordRestClient;
pub use types::{
    parse_snowflake, Attachment, Embed, EmbedMedia, Message, MessageSnapshot, SnapshotMessage, User,
};
