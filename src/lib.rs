#![warn(clippy::pedantic, clippy::nursery, clippy::cargo)]
#![deny(clippy::use_self, rust_2018_idioms)]
#![allow(clippy::multiple_crate_versions, clippy::module_name_repetitions)]

//! Alarm scheduling and playback core of a clock app.
//!
//! The [`app::App`] root owns one of each service and drives them from a
//! single control loop; nothing here keeps global state.

pub mod alarm;
pub mod app;
/// alarm sound playback with fade-in and failover to a built-in tone
pub mod audio;
pub mod clock;
pub mod communication;
pub mod config;
pub mod detector;
pub mod error;
pub mod host;
pub mod scheduler;
pub mod sleep;
pub mod station;
pub mod store;
pub mod tasks;
pub mod timer;
