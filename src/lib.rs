//! Cloudlink device connector library.
//!
//! Bridges a single-threaded, non-blocking protocol engine and the
//! application. The engine calls [`connector::Connector::dispatch`] with a
//! typed [`engine::Request`]; slow user code runs on per-service worker
//! threads, and application threads block only inside the send-style
//! rendezvous.
//!
//! ```text
//!  application threads          engine thread             worker threads
//!  ───────────────────          ─────────────             ──────────────
//!  send / ping / flush  ──▶  initiate_action ──▶ wire
//!        ▲ (semaphore)            │
//!        └──────────────  status callback
//!                          receive / cli  ──▶ mailbox ──▶ data handler
//!                          firmware data  ──▶ chunk ring ──▶ image writer
//!                          rci step       ──▶ descriptor ──▶ rci callbacks
//! ```

#![deny(unused_must_use)]

pub mod cli;
pub mod config;
pub mod connector;
pub mod datapoints;
pub mod engine;
pub mod error;
pub mod firmware;
pub mod ping;
pub mod ports;
pub mod rci;
pub mod receive;
pub mod rendezvous;
pub mod send;
pub mod slot;
pub mod sync;

pub use connector::{Connector, Services};
pub use engine::{CallbackStatus, Engine, Request, Transport};
