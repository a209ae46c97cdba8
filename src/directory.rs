//! Device name resolution.
//!
//! A directory maps device names to the servers hosting them. Each server is
//! described by a string map; the connect address is stored under
//! [`ADDRESS_KEY`]. Only the lookup interface lives here: talking to a real
//! name service is left to implementors of [`DirectoryResolver`].

use std::collections::HashMap;

use crate::error::{CmwLightError, Result};

/// Key of the server address in a server description.
pub const ADDRESS_KEY: &str = "Address:";

/// Resolution result for one device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    pub name: String,
    pub servers: Vec<HashMap<String, String>>,
}

impl DeviceInfo {
    /// Address of the first server that advertises one.
    pub fn address(&self) -> Option<&str> {
        self.servers
            .iter()
            .find_map(|server| server.get(ADDRESS_KEY))
            .map(String::as_str)
    }
}

/// Resolves device names to server descriptions.
pub trait DirectoryResolver {
    /// Resolve every name in `devices`.
    ///
    /// # Errors
    ///
    /// `Directory` if a device is unknown or the lookup fails.
    fn resolve(&self, devices: &[String]) -> Result<Vec<DeviceInfo>>;
}

/// Fixed device-to-address table.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    devices: HashMap<String, String>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: &str, address: &str) -> Self {
        self.insert(device, address);
        self
    }

    pub fn insert(&mut self, device: &str, address: &str) {
        self.devices.insert(device.to_string(), address.to_string());
    }
}

impl DirectoryResolver for StaticDirectory {
    fn resolve(&self, devices: &[String]) -> Result<Vec<DeviceInfo>> {
        devices
            .iter()
            .map(|name| {
                let address = self.devices.get(name).ok_or_else(|| {
                    CmwLightError::Directory(format!("device '{name}' not found"))
                })?;
                Ok(DeviceInfo {
                    name: name.clone(),
                    servers: vec![HashMap::from([(ADDRESS_KEY.to_string(), address.clone())])],
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        let directory = StaticDirectory::new()
            .with_device("GSCD001", "tcp://fel0001:5000")
            .with_device("GSCD002", "tcp://fel0002:5000");
        let infos = directory
            .resolve(&["GSCD002".to_string(), "GSCD001".to_string()])
            .unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].name, "GSCD002");
        assert_eq!(infos[0].address(), Some("tcp://fel0002:5000"));
        assert_eq!(infos[1].address(), Some("tcp://fel0001:5000"));
    }

    #[test]
    fn test_unknown_device() {
        let err = StaticDirectory::new()
            .resolve(&["NOPE".to_string()])
            .unwrap_err();
        assert!(matches!(err, CmwLightError::Directory(msg) if msg.contains("NOPE")));
    }

    #[test]
    fn test_address_skips_servers_without_one() {
        let info = DeviceInfo {
            name: "DEV".into(),
            servers: vec![
                HashMap::from([("Name:".to_string(), "srv".to_string())]),
                HashMap::from([(ADDRESS_KEY.to_string(), "tcp://host:1".to_string())]),
            ],
        };
        assert_eq!(info.address(), Some("tcp://host:1"));
        assert_eq!(DeviceInfo::default().address(), None);
    }
}
