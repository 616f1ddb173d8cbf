//! MTA hub client implementing [`mta_sync_core::ApplicationSource`].

mod client;
mod token;

pub use client::{MtaClient, decode_inventory};
pub use token::{EnvToken, StaticToken, TokenSource};
