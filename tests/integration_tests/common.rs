// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpStream},
    sync::Arc,
    thread,
    time::Duration,
};

use anyhow::{Context, Result, ensure};
use memcache_server_rs::{
    cfg::{
        config::{Config, NetworkConfig, PoolConfig, StorageConfig},
        enums::Threading,
    },
    network::server::{Server, ServerHandle},
    storage::Storage,
};

/// Config bound to an ephemeral loopback port so tests never collide.
pub fn base_config(threading: Threading) -> Config {
    Config {
        network: NetworkConfig {
            listen_host: "127.0.0.1".to_string(),
            listen_port: 0,
            max_connections: 128,
            threading,
        },
        storage: StorageConfig {
            max_bytes: 64 * 1024,
        },
        pool: PoolConfig {
            low_watermark: 1,
            high_watermark: 4,
            max_queue: 64,
            idle_time: Duration::from_millis(500),
        },
    }
}

/// A live server on a background thread, shut down on drop.
pub struct TestServer {
    pub addr: SocketAddr,
    handle: ServerHandle,
    join: Option<thread::JoinHandle<()>>,
}

impl TestServer {
    pub fn spawn(cfg: Config) -> Result<Self> {
        let storage = Arc::new(Storage::new(cfg.storage.max_bytes));
        let server = Server::new(&cfg, storage).context("failed to build server")?;
        let addr = server.local_addr()?;
        let handle = server.handle();
        let join = thread::spawn(move || {
            if let Err(e) = server.run() {
                eprintln!("test server exited with error: {e}");
            }
        });
        Ok(Self {
            addr,
            handle,
            join: Some(join),
        })
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.shutdown();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

pub fn connect(addr: SocketAddr) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).context("connect to test server")?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

pub fn read_exactly(stream: &mut TcpStream, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    stream
        .read_exact(&mut buf)
        .context("short read from server")?;
    Ok(buf)
}

/// Send one request and insist the very next bytes on the wire equal the
/// expected reply.
pub fn roundtrip(stream: &mut TcpStream, request: &[u8], expect: &[u8]) -> Result<()> {
    stream.write_all(request)?;
    let got = read_exactly(stream, expect.len())?;
    ensure!(
        got == expect,
        "unexpected reply: got {:?}, want {:?}",
        String::from_utf8_lossy(&got),
        String::from_utf8_lossy(expect)
    );
    Ok(())
}
