// Copyright (c) 2025 taskloop contributors. Licensed under Apache License, Version 2.0.

//! Tracing setup for binaries embedding the scheduler.
//!
//! The scheduler itself only emits [`tracing`] events/spans (see the `scheduler` and
//! `dispatcher` modules) - it never installs a subscriber. This module is a small
//! opt-in helper for applications that want a reasonable default: a fmt layer plus an
//! `EnvFilter`, minus any terminal-aware writer routing, since a scheduler kernel has
//! no terminal output of its own to coordinate with.

use tracing_core::LevelFilter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs a global `tracing` subscriber that writes formatted events to stderr,
/// honoring `RUST_LOG` if set and otherwise defaulting to `default_level`.
///
/// # Errors
///
/// Returns an error if a global subscriber was already installed.
pub fn init_tracing(default_level: LevelFilter) -> Result<(), tracing_subscriber::util::TryInitError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
}
