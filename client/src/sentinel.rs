use crate::resp::{self, Reply};
use crate::{ClientConfig, MasterLocator};
use redis_k8s_common::{DiscoveryError, NodeAddr};
use tracing::debug;

/// Asks a sentinel which address currently holds the master role
pub struct SentinelLocator {
    master_name: String,
    config: ClientConfig,
}

impl SentinelLocator {
    pub fn new(master_name: impl Into<String>, config: ClientConfig) -> Self {
        Self {
            master_name: master_name.into(),
            config,
        }
    }
}

#[async_trait::async_trait]
impl MasterLocator for SentinelLocator {
    async fn query_master(&self, endpoint: &NodeAddr) -> Result<Option<NodeAddr>, DiscoveryError> {
        let target = endpoint.to_string();
        let reply = resp::command(
            &target,
            &["SENTINEL", "get-master-addr-by-name", &self.master_name],
            &self.config,
        )
        .await
        .map_err(|e| DiscoveryError::Unreachable {
            endpoint: target.clone(),
            reason: e.to_string(),
        })?;

        debug!("Sentinel {} replied {:?}", target, reply);
        parse_master_reply(&target, reply)
    }
}

/// `[ip, port]` names the master; a null reply means the sentinel does not monitor it (yet).
fn parse_master_reply(endpoint: &str, reply: Reply) -> Result<Option<NodeAddr>, DiscoveryError> {
    let malformed = |reason: String| DiscoveryError::Malformed {
        endpoint: endpoint.to_string(),
        reason,
    };

    match reply {
        Reply::Array(None) | Reply::Bulk(None) => Ok(None),
        Reply::Array(Some(items)) if items.is_empty() => Ok(None),
        Reply::Array(Some(items)) => {
            let [host, port] = items.as_slice() else {
                return Err(malformed(format!("expected 2 elements, got {}", items.len())));
            };
            let host = host
                .as_text()
                .ok_or_else(|| malformed("master host is not a string".to_string()))?;
            let port = port
                .as_text()
                .and_then(|p| p.parse::<u16>().ok())
                .ok_or_else(|| malformed("master port is not a number".to_string()))?;

            Ok(Some(NodeAddr::new(host, port)))
        }
        Reply::Error(e) => Err(malformed(e)),
        other => Err(malformed(format!("unexpected reply {:?}", other))),
    }
}
