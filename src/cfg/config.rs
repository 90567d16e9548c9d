// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, net::SocketAddr, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::cfg::enums::Threading;

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Socket and reactor parameters.
    pub network: NetworkConfig,
    /// Cache sizing.
    pub storage: StorageConfig,
    /// Worker pool watermarks and queue bound; consulted in pooled mode.
    pub pool: PoolConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NetworkConfig {
    #[serde(rename = "ListenHost")]
    /// IP address the listener binds to.
    pub listen_host: String,

    #[serde(rename = "ListenPort")]
    /// TCP port; 0 asks the kernel for an ephemeral one.
    pub listen_port: u16,

    #[serde(rename = "MaxConnections")]
    /// Upper bound on simultaneously open client sockets.
    pub max_connections: usize,

    #[serde(rename = "Threading")]
    /// Where commands execute (reactor thread or worker pool).
    pub threading: Threading,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StorageConfig {
    #[serde(rename = "MaxBytes")]
    /// Cache capacity counted as the sum of key plus value lengths.
    pub max_bytes: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PoolConfig {
    #[serde(rename = "LowWatermark")]
    /// Workers kept resident while the pool runs.
    pub low_watermark: usize,

    #[serde(rename = "HighWatermark")]
    /// Hard ceiling on concurrently live workers.
    pub high_watermark: usize,

    #[serde(rename = "MaxQueue")]
    /// Bounded task queue length; submissions past it are rejected.
    pub max_queue: usize,

    #[serde(rename = "IdleTimeMs", with = "serde_millis")]
    /// How long a surplus worker may idle before reaping itself.
    pub idle_time: Duration,
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants across sections.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            self.network.listen_host.parse::<std::net::IpAddr>().is_ok(),
            "ListenHost must be an IP address, got {:?}",
            self.network.listen_host
        );
        ensure!(
            self.network.max_connections >= 1,
            "MaxConnections must be >= 1"
        );
        ensure!(self.storage.max_bytes >= 1, "storage MaxBytes must be >= 1");

        ensure!(
            self.pool.low_watermark <= self.pool.high_watermark,
            "LowWatermark must not exceed HighWatermark"
        );
        ensure!(self.pool.max_queue >= 1, "MaxQueue must be >= 1");
        if self.network.threading == Threading::Pooled {
            ensure!(
                self.pool.high_watermark >= 1,
                "HighWatermark must be >= 1 in pooled mode"
            );
        }

        Ok(())
    }

    /// Socket address assembled from the validated host and port.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip = self
            .network
            .listen_host
            .parse::<std::net::IpAddr>()
            .context("ListenHost is not an IP address")?;
        Ok(SocketAddr::new(ip, self.network.listen_port))
    }
}

/// Serde helpers for representing `Duration` as a number of milliseconds.
mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
