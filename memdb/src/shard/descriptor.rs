use std::fmt::Display;

/// Identity and address of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
pub struct ShardDescriptor {
    id: String,
    host: String,
    port: u16,
}

impl ShardDescriptor {
    pub fn new(id: &str, host: &str, port: u16) -> Self {
        ShardDescriptor {
            id: id.to_string(),
            host: host.to_string(),
            port,
        }
    }

    /// A descriptor known only by address, as used by single-shard
    /// connections.
    pub fn address(host: &str, port: u16) -> Self {
        ShardDescriptor::new("", host, port)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }
}

impl Display for ShardDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.id.is_empty() {
            write!(f, "{}:{}", self.host, self.port)
        } else {
            write!(f, "{}@{}:{}", self.id, self.host, self.port)
        }
    }
}
