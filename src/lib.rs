#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! screencontrol — privileged remote-control agent service.
//!
//! The agent keeps a persistent outbound WebSocket to a central control
//! server, executes server-issued commands (filesystem, shell, system, GUI
//! via a co-resident helper), exposes a loopback HTTP API for local
//! tooling, and installs its own updates in-band.
//!
//! ```text
//! main.rs          — entry point, clap flags, router setup, graceful shutdown
//! agent.rs         — root Agent value, event pump, reconnect supervisor
//! config.rs        — config.json + connection.json (atomic JSON persistence)
//! identity.rs      — machine id, hostname, OS/CPU facts, fingerprint
//! transport/       — TLS TCP + RFC 6455 client framing (masked)
//! protocol/        — registration, heartbeat, request/response, relay
//! dispatch/        — method routing, GUI proxy, tools/list catalogue
//! shell/           — PTY/pipe sessions, one-shot exec with timeout
//! tools/           — fs/system/machine handlers, command filter
//! server/          — loopback HTTP API (axum)
//! update/          — check → download → SHA-256 verify → self-replace
//! creds.rs         — OS-keyring credential store (write-only unlock surface)
//! ```

pub mod agent;
pub mod config;
pub mod creds;
pub mod dispatch;
pub mod identity;
pub mod protocol;
pub mod server;
pub mod shell;
pub mod tools;
pub mod transport;
pub mod update;
pub mod util;

// Re-export the key types at crate root for convenience.
pub use agent::Agent;
pub use config::{Config, ConnectionConfig};
pub use dispatch::Dispatcher;
pub use protocol::{AgentEvent, ControlClient, Permissions};
pub use shell::SessionManager;
pub use transport::{Transport, TransportError};
pub use update::{UpdateManager, UpdateStatus};
