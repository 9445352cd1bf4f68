//! Bluetooth Module
//!
//! BLE communication with Onewheel-family boards.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     BoardService                        │
//! │   (Main coordinator - public API for the application)   │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!        ┌──────────────┼──────────────┐
//!        │              │              │
//!        ▼              ▼              ▼
//! ┌───────────┐  ┌─────────────┐  ┌──────────┐
//! │  Scanner  │  │   Session   │  │ Protocol │
//! │           │  │             │  │          │
//! │ - BLE     │  │ - Connect   │  │ - UUIDs  │
//! │  discovery│  │ - Auth      │  │ - Unlock │
//! │ - Filter  │  │ - Liveness  │  │ - Codec  │
//! └───────────┘  └─────────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Board protocol: identifiers, challenge-response, codec
//! - [`scanner`] - BLE device discovery and the board filter
//! - [`transport`] - The link seam and its btleplug implementation
//! - [`connection`] - Retry policies, discovery, characteristic registry
//! - [`auth`] - Model detection and the unlock strategy orchestrator
//! - [`session`] - Connection state machine, subscriptions, liveness
//! - [`service`] - Main service coordinator

pub mod auth;
pub mod connection;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod session;
pub mod transport;

// Re-export main service for convenience
pub use service::BoardService;
