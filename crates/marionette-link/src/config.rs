use std::time::Duration;

use marionette_core::InstanceId;

/// Link layer configuration.
#[derive(Clone, Debug)]
pub struct LinkConfig {
    /// Host every instance listens on.
    pub host: String,
    /// Port of instance `0`; instance `n` listens on `base_port + n`.
    pub base_port: u16,
    /// Ids at or above this are unresolvable.
    pub max_instances: u32,
    pub connect_timeout: Duration,
    /// Longest accepted inbound line, in bytes.
    pub max_line_length: usize,
    /// Inbound lines retained per link.
    pub history_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            base_port: 12000,
            max_instances: 64,
            connect_timeout: Duration::from_secs(5),
            max_line_length: 1024 * 1024,
            history_size: 500,
        }
    }
}

impl LinkConfig {
    pub fn resolver(&self) -> AddressResolver {
        AddressResolver {
            host: self.host.clone(),
            base_port: self.base_port,
            max_instances: self.max_instances,
        }
    }
}

/// Pure mapping from instance id to `host:port`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressResolver {
    host: String,
    base_port: u16,
    max_instances: u32,
}

impl AddressResolver {
    pub fn new(host: impl Into<String>, base_port: u16, max_instances: u32) -> Self {
        Self {
            host: host.into(),
            base_port,
            max_instances,
        }
    }

    /// `None` for ids that are not numeric, not below `max_instances`,
    /// or whose port would overflow.
    pub fn resolve(&self, instance_id: &InstanceId) -> Option<String> {
        let index = instance_id.index()?;
        if index >= self.max_instances {
            return None;
        }
        let port = u16::try_from(u32::from(self.base_port).checked_add(index)?).ok()?;
        Some(format!("{}:{}", self.host, port))
    }
}
