//! camstreamd - network camera streaming daemon
//!
//! Captures JPEG frames from an image sensor, fans them out to streaming
//! clients as a live multipart feed, answers still-capture and control
//! requests over HTTP, and watches network reachability with ICMP probes.

pub mod bytebuf;
pub mod config;
pub mod error;
pub mod frame_cache;
pub mod reachability;
pub mod scheduler;
pub mod sensor;
pub mod state;
pub mod stream_registry;
pub mod web_api;
