//! Reconciliation policies — backend finality semantics → normalized events.
//!
//! # Overview
//!
//! Each backend reports "finality" differently:
//!
//! - the on-device recognizer marks whole results final and sometimes replays
//!   history or reports cumulative text,
//! - generic streaming servers never revise text but signal (or merely imply)
//!   endpoints,
//! - the cloud API splits finality into stable partials and speech endpoints.
//!
//! The policies here are pure, synchronous state machines: a source driver
//! feeds them wire frames and forwards whatever [`crate::Transcript`]s come
//! back.  Keeping them free of I/O makes every finality rule testable with
//! plain data.
//!
//! All three share the segment-id rule: an internal monotonic counter that
//! only advances when an endpoint is committed, and that survives
//! reconnects and recognizer restarts for the life of the source.

pub mod cloud;
pub mod device;
pub mod server;

pub use cloud::CloudReconciler;
pub use device::DeviceReconciler;
pub use server::ServerReconciler;
