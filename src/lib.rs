//! Dining philosophers: one arbitration protocol, three ways to carry it.
//!
//! The protocol itself is [`policy::can_admit`] over an [`state::ArbitrationState`].
//! It is bound to a monitor ([`table::MonitorTable`]), to counting semaphores
//! over an atomic table ([`table::IpcTable`]) and to a coordinator process
//! reached over TCP ([`remote`]).

pub mod cancel;
pub mod config;
pub mod dinner;
pub mod error;
pub mod launcher;
pub mod pause;
pub mod philosopher;
pub mod policy;
pub mod remote;
pub mod semaphore;
pub mod state;
pub mod table;

pub use error::{Error, Result};
