// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{env, sync::Arc};

use anyhow::{Context, Result};
use memcache_server_rs::{
    cfg::{config::Config, logger::init_logger, resolve_config_path},
    network::server::Server,
    storage::Storage,
};
use tracing::info;

fn main() -> Result<()> {
    let raw_path = env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
    let config_path = resolve_config_path(&raw_path)?;

    let _log_guard = init_logger(&config_path)?;

    let cfg = Config::load_from_file(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let storage = Arc::new(Storage::new(cfg.storage.max_bytes));
    info!(
        max_bytes = cfg.storage.max_bytes,
        threading = %cfg.network.threading,
        "cache initialized"
    );

    let server = Server::new(&cfg, storage)?;
    server.run()
}
