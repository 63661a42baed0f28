//! Receive loop, timers and UI-facing façade over a blocking chat backend.
//!
//! [`ChatClient`] owns one I/O thread that polls a [`Backend`], routes replies
//! to one-shot handlers and applies push events to the shared stores. The UI
//! thread issues commands and pulls results through the poll API.

mod backend;
mod client;
mod config;
mod handlers;
mod receive_loop;
mod shared;
mod timers;

pub use backend::{Backend, request_kind};
pub use client::{ChatClient, StartError};
pub use config::ClientConfig;
