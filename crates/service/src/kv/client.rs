//! Durable backend client over the Redis protocol.
//!
//! Thin adaptor: connection parameters come from `configs::ResolvedKv`, the
//! multiplexed connection is cheap to clone per call, and every trait method
//! maps one-to-one onto a protocol command. Timeouts and retries are the
//! client library's own defaults; no extra layer is imposed here.

use async_trait::async_trait;
use configs::ResolvedKv;
use redis::{AsyncCommands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use tracing::info;

use super::KvBackend;

pub struct RedisBackend {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisBackend {
    /// Connect once; the selector caches the result and retries on the next
    /// call after a failure.
    pub async fn connect(cfg: &ResolvedKv) -> anyhow::Result<Self> {
        let client = redis::Client::open(connection_info(cfg))?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        info!(host = %cfg.host, port = cfg.port, db = cfg.db, tls = cfg.tls, "kv_backend_connected");
        Ok(Self { conn })
    }
}

fn connection_info(cfg: &ResolvedKv) -> ConnectionInfo {
    let addr = if cfg.tls {
        ConnectionAddr::TcpTls {
            host: cfg.host.clone(),
            port: cfg.port,
            insecure: false,
            tls_params: None,
        }
    } else {
        ConnectionAddr::Tcp(cfg.host.clone(), cfg.port)
    };
    ConnectionInfo {
        addr,
        redis: RedisConnectionInfo {
            db: cfg.db,
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            ..Default::default()
        },
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn sadd(&self, key: &str, members: &[String]) -> anyhow::Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: i64 = conn.sadd(key, members).await?;
        Ok(())
    }

    async fn srem(&self, key: &str, members: &[String]) -> anyhow::Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: i64 = conn.srem(key, members).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_hosts_connect_without_tls() {
        let info = connection_info(&ResolvedKv {
            host: "kv.internal".into(),
            port: 6379,
            username: None,
            password: Some("secret".into()),
            db: 2,
            tls: false,
        });
        assert!(matches!(info.addr, ConnectionAddr::Tcp(ref host, 6379) if host == "kv.internal"));
        assert_eq!(info.redis.db, 2);
        assert_eq!(info.redis.password.as_deref(), Some("secret"));
    }

    #[test]
    fn tls_hosts_use_a_verified_tls_addr() {
        let info = connection_info(&ResolvedKv {
            host: "fond-koi-1234.upstash.io".into(),
            port: 6379,
            username: Some("default".into()),
            password: None,
            db: 0,
            tls: true,
        });
        match info.addr {
            ConnectionAddr::TcpTls { ref host, port, insecure, .. } => {
                assert_eq!(host, "fond-koi-1234.upstash.io");
                assert_eq!(port, 6379);
                assert!(!insecure);
            }
            other => panic!("expected TLS addr, got {other:?}"),
        }
        assert_eq!(info.redis.username.as_deref(), Some("default"));
    }
}
