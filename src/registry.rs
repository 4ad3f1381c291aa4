//! Read-only, process-scoped mapping from short hostname to per-mechanism
//! credentials and addressing data, plus the per-hardware-type remap
//! table. Grounded on `original_source/.../ipmi.py` and `reimage.py`
//! (`config['servers']`, `config['types']`) and spec.md §3.

use std::collections::HashMap;
use std::path::Path;

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read worker config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse worker config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshCreds {
    pub user: String,
    pub key_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IpmiCreds {
    pub user: String,
    pub password: SecretString,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XenCreds {
    pub xen_uuid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IloCreds {
    pub host: String,
    pub login: Option<String>,
    pub password: Option<SecretString>,
}

/// A single row of the worker registry, keyed by short hostname.
///
/// A blade server has `parent` set to its chassis's short hostname and
/// `addr` set to its slot id; IPMI is then addressed through the chassis,
/// remapped via the chassis's `hw_type` entry in [`TypeRemap`].
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub addr: Option<String>,
    #[serde(rename = "type", default)]
    pub hw_type: Option<String>,
    #[serde(default)]
    pub ssh: Option<SshCreds>,
    #[serde(default)]
    pub ipmi: Option<IpmiCreds>,
    #[serde(default)]
    pub pdu: Option<String>,
    #[serde(default)]
    pub xen: Option<XenCreds>,
    #[serde(default)]
    pub ilo: Option<IloCreds>,
}

/// Per-hardware-type overrides applied before assembling ipmitool args.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TypeRemap {
    #[serde(default)]
    pub args: Vec<String>,
    /// blade slot id ("addr") -> extra ipmitool args.
    #[serde(default)]
    pub map: HashMap<String, Vec<String>>,
    /// ipmi subcommand name -> replacement arg list.
    #[serde(default)]
    pub commands: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    servers: HashMap<String, ServerConfig>,
    #[serde(default)]
    types: HashMap<String, TypeRemap>,
    #[serde(default)]
    snmp_community_string: Option<SecretString>,
}

pub struct Registry {
    servers: HashMap<String, ServerConfig>,
    types: HashMap<String, TypeRemap>,
    snmp_community_string: Option<SecretString>,
}

impl Registry {
    /// An empty registry, for unit tests of mechanisms that only need a
    /// `&Registry` to satisfy a signature.
    pub(crate) fn empty() -> Self {
        Registry {
            servers: HashMap::new(),
            types: HashMap::new(),
            snmp_community_string: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let raw = std::fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw, path)
    }

    fn from_json(raw: &str, path: &Path) -> Result<Self, RegistryError> {
        let file: RegistryFile = serde_json::from_str(raw).map_err(|source| RegistryError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self {
            servers: file.servers,
            types: file.types,
            snmp_community_string: file.snmp_community_string,
        })
    }

    /// Look up a server row, trying the short hostname first (everything
    /// before the first dot) then the literal key, mirroring
    /// `reimage.py`'s `servers[hostname.split('.')[0]]` fallback.
    pub fn lookup(&self, hostname: &str) -> Option<&ServerConfig> {
        let short = hostname.split('.').next().unwrap_or(hostname);
        self.servers.get(short).or_else(|| self.servers.get(hostname))
    }

    /// Resolve the parent chassis row for a blade server, if any.
    pub fn parent_of(&self, server: &ServerConfig) -> Option<&ServerConfig> {
        server.parent.as_deref().and_then(|p| self.lookup(p))
    }

    pub fn type_remap(&self, hw_type: &str) -> Option<&TypeRemap> {
        self.types.get(hw_type)
    }

    pub fn snmp_community_string(&self) -> Option<&SecretString> {
        self.snmp_community_string.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn sample_json() -> &'static str {
        r#"{
            "servers": {
                "t-w1064-ms-001": {
                    "ssh": {"user": "root", "key_file": "/keys/id_rsa"},
                    "ipmi": {"user": "admin", "password": "hunter2"},
                    "pdu": "pdu1.mdc1.mozilla.com:A1"
                },
                "blade-chassis-1": {
                    "type": "dell-m1000e",
                    "ipmi": {"user": "admin", "password": "chassis-secret"}
                },
                "blade-1": {
                    "parent": "blade-chassis-1",
                    "addr": "1"
                }
            },
            "types": {
                "dell-m1000e": {
                    "args": ["-B", "0"],
                    "map": {"1": ["-T", "1"]},
                    "commands": {"power_reset": ["power", "reset"]}
                }
            },
            "snmp_community_string": "private"
        }"#
    }

    #[test]
    fn looks_up_by_short_hostname_first() {
        let registry = Registry::from_json(sample_json(), Path::new("test.json")).unwrap();
        let server = registry.lookup("t-w1064-ms-001.test.releng.mdc1.mozilla.com").unwrap();
        assert_eq!(server.ssh.as_ref().unwrap().user, "root");
    }

    #[test]
    fn resolves_blade_through_parent_chassis() {
        let registry = Registry::from_json(sample_json(), Path::new("test.json")).unwrap();
        let blade = registry.lookup("blade-1").unwrap();
        assert_eq!(blade.addr.as_deref(), Some("1"));

        let chassis = registry.parent_of(blade).unwrap();
        assert_eq!(chassis.hw_type.as_deref(), Some("dell-m1000e"));

        let remap = registry.type_remap(chassis.hw_type.as_deref().unwrap()).unwrap();
        assert_eq!(remap.args, vec!["-B", "0"]);
        assert_eq!(remap.map.get("1").unwrap(), &vec!["-T".to_string(), "1".to_string()]);
    }

    #[test]
    fn exposes_snmp_community_string() {
        let registry = Registry::from_json(sample_json(), Path::new("test.json")).unwrap();
        assert_eq!(registry.snmp_community_string().unwrap().expose_secret(), "private");
    }

    #[test]
    fn unknown_host_returns_none() {
        let registry = Registry::from_json(sample_json(), Path::new("test.json")).unwrap();
        assert!(registry.lookup("does-not-exist").is_none());
    }
}
