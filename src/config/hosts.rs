//! Hosts file for `hosts_file` cluster mode
//!
//! Two shapes are accepted, in JSON or YAML:
//!
//! ```yaml
//! hosts: ["10.0.0.1:54321", "10.0.0.2:54321"]
//! ```
//!
//! ```yaml
//! ip: ["10.0.0.1", "10.0.0.2"]
//! base_port: 54321
//! ```

use serde::Deserialize;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::Path;

use crate::error::{ErrorCode, HarnessError, Result};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum HostsFile {
    Hosts { hosts: Vec<String> },
    IpList { ip: Vec<String>, base_port: u16 },
}

impl HostsFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::config_with_code(
                ErrorCode::CONFIG_HOSTS_FILE,
                format!("cannot read hosts file {}", path.display()),
            )
            .with_source(e)
        })?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        let parsed = if is_json {
            serde_json::from_str(content).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(content).map_err(|e| e.to_string())
        };
        parsed.map_err(|e| {
            HarnessError::config_with_code(
                ErrorCode::CONFIG_HOSTS_FILE,
                format!("invalid hosts file {}: {}", path.display(), e),
            )
        })
    }

    /// Resolve every entry to one socket address, in file order
    pub fn addresses(&self) -> Result<Vec<SocketAddr>> {
        let addresses = match self {
            HostsFile::Hosts { hosts } => hosts
                .iter()
                .map(|host| resolve(host))
                .collect::<Result<Vec<_>>>()?,
            HostsFile::IpList { ip, base_port } => ip
                .iter()
                .map(|addr| {
                    addr.parse::<IpAddr>()
                        .map(|ip| SocketAddr::new(ip, *base_port))
                        .map_err(|_| hosts_error(format!("'{}' is not an IP address", addr)))
                })
                .collect::<Result<Vec<_>>>()?,
        };
        if addresses.is_empty() {
            return Err(hosts_error("hosts file lists no nodes".to_string()));
        }
        Ok(addresses)
    }
}

fn resolve(host: &str) -> Result<SocketAddr> {
    host.to_socket_addrs()
        .map_err(|e| hosts_error(format!("cannot resolve '{}': {}", host, e)))?
        .next()
        .ok_or_else(|| hosts_error(format!("'{}' resolved to no address", host)))
}

fn hosts_error(message: String) -> HarnessError {
    HarnessError::config_with_code(ErrorCode::CONFIG_HOSTS_FILE, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hosts_list_yaml() {
        let hosts = HostsFile::parse(
            "hosts:\n  - 127.0.0.1:7001\n  - 127.0.0.1:7002\n",
            Path::new("hosts.yaml"),
        )
        .unwrap();
        let addrs = hosts.addresses().unwrap();
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[1].port(), 7002);
    }

    #[test]
    fn test_ip_list_json() {
        let hosts = HostsFile::parse(
            r#"{"ip": ["10.0.0.1", "10.0.0.2"], "base_port": 54321}"#,
            Path::new("hosts.json"),
        )
        .unwrap();
        let addrs = hosts.addresses().unwrap();
        assert_eq!(addrs[0], "10.0.0.1:54321".parse().unwrap());
    }

    #[test]
    fn test_empty_and_bad_entries() {
        let hosts = HostsFile::Hosts { hosts: Vec::new() };
        assert!(hosts.addresses().is_err());

        let hosts = HostsFile::IpList {
            ip: vec!["not-an-ip".to_string()],
            base_port: 1,
        };
        let err = hosts.addresses().unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_HOSTS_FILE);
    }
}
