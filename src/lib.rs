//! Client core of the energy-modeling admin console: backend gateway,
//! intent dispatcher, snapshot store, view projections and selection state.

pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod net;
pub mod projector;
pub mod render;
pub mod selection;
pub mod store;
pub mod types;

pub use dispatch::Dispatcher;
pub use error::GatewayError;
pub use net::{Gateway, Notice};
pub use store::{reduce, State, Store, Update};
