//! `TaskSync` client library: real-time comment and status synchronization for task views.
//!
//! The sans-I/O core is [`session::SyncSession`], built on
//! [`reconcile::ReconciliationEngine`]. [`net::spawn_sync`] drives it over a
//! shared hub connection ([`connection::ConnectionManager`]) and a write path
//! ([`write::WriteApi`]).

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod groups;
pub mod http;
pub mod model;
pub mod net;
pub mod pending;
pub mod reconcile;
pub mod session;
pub mod status;
pub mod transport;
pub mod write;
