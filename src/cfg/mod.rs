// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod config;
pub mod enums;
pub mod logger;

use std::path::PathBuf;

use anyhow::{Context, Result, ensure};

/// Turn a possibly relative CLI path into an absolute one, verifying it
/// exists up front so a typo fails before logging is initialized.
pub fn resolve_config_path(raw: &str) -> Result<PathBuf> {
    let path = PathBuf::from(raw);
    let abs = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .context("cannot get current working dir")?
            .join(path)
    };
    ensure!(abs.is_file(), "config file {abs:?} does not exist");
    Ok(abs)
}
