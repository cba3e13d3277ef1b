//! Offline support for the KYC Lite intake app: a caching gateway that
//! answers requests when the network is gone, and a persisted queue that
//! replays dashboard mutations once it comes back.

pub mod app;
pub mod cache;
pub mod config;
pub mod db;
pub mod event;
pub mod gateway;
pub mod http;
pub mod logging;
pub mod network;
pub mod sync;

#[cfg(test)]
mod testing;
