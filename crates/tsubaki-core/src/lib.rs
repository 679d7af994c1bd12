//! Core event model and collaborator interfaces for the Tsubaki bot
//! framework.
//!
//! This crate defines the normalized [`event::Event`] record, message
//! [`segment::Segment`]s, and the traits the dispatch core uses to talk to
//! its collaborators: the gateway ([`gateway::Endpoint`]), the configuration
//! store ([`settings::ConfigStore`]), and the economy ledger
//! ([`economy::Economy`]).

pub mod economy;
pub mod event;
pub mod gateway;
pub mod segment;
pub mod settings;

pub use economy::{BoxedEconomy, Economy, FreeEconomy};
pub use event::{Event, PostType, Sender};
pub use gateway::{ApiError, ApiResult, BoxedEndpoint, Endpoint, Endpoints};
pub use segment::Segment;
pub use settings::{BoxedConfigStore, ConfigStore, MemoryConfig, Settings};
