use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::wol::HardwareAddress;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file {path}: {source}")]
    Unreadable { path: PathBuf, source: io::Error },

    #[error("configuration file {path} is not valid JSON: {source}")]
    Invalid {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid hardware address {0:?} for the primary node")]
    BadPrimaryMac(String),

    #[error("extra node lists must align: {names} names, {ips} ips, {macs} macs")]
    UnevenNodeLists {
        names: usize,
        ips: usize,
        macs: usize,
    },

    #[error("extra node option {key} has {got} entries for {nodes} nodes")]
    OptionOverflow {
        key: &'static str,
        got: usize,
        nodes: usize,
    },

    #[error("invalid ssh port {0:?} in extra node list")]
    BadPort(String),

    #[error("allowed_credits must align with allowed_senders: {senders} senders, {credits} credits")]
    UnevenCredits { senders: usize, credits: usize },

    #[error("invalid credit value {0:?}: credits are whole numbers")]
    BadCredit(String),

    #[error("hour value {0} is out of range")]
    BadHour(u32),

    #[error("minute value {0} is out of range")]
    BadMinutes(u32),

    #[error("extend_hours must be a positive number of hours")]
    BadExtendHours,

    #[error("section {0:?} is required for this action")]
    MissingSection(&'static str),

    #[error("option {key:?} in section {section:?} is required for this action")]
    MissingOption {
        section: &'static str,
        key: &'static str,
    },

    #[error("node {0:?} has no ssh credentials configured")]
    MissingCredentials(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralSettings {
    pub enabled: bool,
    pub dry_run: bool,
    pub verbose_logging: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailSettings {
    pub server: String,
    pub port: u16,
    pub login: String,
    pub password: String,
    pub sender: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushoverSettings {
    pub user_key: String,
    pub token_api: String,
    pub sound: String,
}

/// The node this installation primarily manages.
#[derive(Debug, Clone)]
pub struct PrimaryNode {
    pub name: String,
    pub mac: HardwareAddress,
    pub ip: String,
    pub port: u16,
    pub ssh_port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// One entry of the extra-nodes collection. The hardware address is
/// kept as configured and parsed at dispatch so one bad address does
/// not take the other nodes down with it.
#[derive(Debug, Clone)]
pub struct ExtraNode {
    pub name: String,
    pub ip: String,
    pub mac: String,
    pub ssh_port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Without all three of user, password and port the remote-shutdown
/// action is disabled for the target.
fn ssh_credentials<'a>(
    user: &'a Option<String>,
    password: &'a Option<String>,
    port: Option<u16>,
) -> Option<(&'a str, &'a str, u16)> {
    match (user, password, port) {
        (Some(u), Some(p), Some(port)) => Some((u.as_str(), p.as_str(), port)),
        _ => None,
    }
}

impl PrimaryNode {
    pub fn ssh_credentials(&self) -> Option<(&str, &str, u16)> {
        ssh_credentials(&self.user, &self.password, self.ssh_port)
    }
}

impl ExtraNode {
    pub fn ssh_credentials(&self) -> Option<(&str, &str, u16)> {
        ssh_credentials(&self.user, &self.password, self.ssh_port)
    }
}

/// An inbound-mail command: who may say the keyword, and (for power-on)
/// how often per week.
#[derive(Debug, Clone)]
pub struct MailCommand {
    pub keyword: String,
    pub allowed_senders: Vec<String>,
    pub allowed_credits: Option<Vec<i64>>,
}

impl MailCommand {
    /// Senders zipped with their configured weekly credits.
    pub fn credit_defaults(&self) -> Option<Vec<(String, i64)>> {
        let credits = self.allowed_credits.as_ref()?;
        Some(
            self.allowed_senders
                .iter()
                .cloned()
                .zip(credits.iter().copied())
                .collect(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct PowerOffSettings {
    pub keyword: Option<String>,
    pub allowed_senders: Option<Vec<String>>,
    pub command: String,
}

#[derive(Debug, Clone)]
pub struct ExtendSettings {
    pub default_hour: u32,
    pub default_minutes: u32,
    pub max_hour: u32,
    pub keyword: String,
    pub allowed_senders: Vec<String>,
    pub extend_hours: u32,
    pub job_marker: String,
}

/// Validated configuration handed to the engine.
#[derive(Debug, Clone)]
pub struct Config {
    pub general: GeneralSettings,
    pub node: PrimaryNode,
    pub extra_nodes: Vec<ExtraNode>,
    pub mail: Option<MailSettings>,
    pub power_on: Option<MailCommand>,
    pub power_off: Option<PowerOffSettings>,
    pub extend: Option<ExtendSettings>,
    pub pushover: PushoverSettings,
}

// ---------------------------------------------------------------
// File model. Multi-valued options are comma-separated strings,
// positionally aligned across related keys.
// ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ConfigFile {
    general: GeneralSettings,
    node: NodeSection,
    #[serde(default)]
    extra_nodes: Option<ExtraNodesSection>,
    #[serde(default)]
    mail: Option<MailSettings>,
    #[serde(default)]
    power_on: Option<PowerOnSection>,
    #[serde(default)]
    power_off: Option<PowerOffSection>,
    #[serde(default)]
    extend_time: Option<ExtendSection>,
    pushover: PushoverSettings,
}

#[derive(Debug, Deserialize)]
struct NodeSection {
    name: String,
    mac: String,
    ip: String,
    port: u16,
    #[serde(default)]
    ssh_port: Option<u16>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtraNodesSection {
    names: String,
    ips: String,
    macs: String,
    #[serde(default)]
    ssh_ports: String,
    #[serde(default)]
    users: String,
    #[serde(default)]
    passwords: String,
}

#[derive(Debug, Deserialize)]
struct PowerOnSection {
    keyword: String,
    allowed_senders: String,
    #[serde(default)]
    allowed_credits: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PowerOffSection {
    #[serde(default)]
    keyword: Option<String>,
    #[serde(default)]
    allowed_senders: Option<String>,
    command: String,
}

#[derive(Debug, Deserialize)]
struct ExtendSection {
    default_hour: u32,
    default_minutes: u32,
    max_hour: u32,
    keyword: String,
    allowed_senders: String,
    extend_hours: u32,
    #[serde(default)]
    job_marker: Option<String>,
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Position-preserving split for optional per-node lists: an empty
/// slot stays `None` so the remaining positions keep their alignment.
fn split_positional(value: &str) -> Vec<Option<String>> {
    if value.trim().is_empty() {
        return Vec::new();
    }
    value
        .split(',')
        .map(|item| {
            let item = item.trim();
            (!item.is_empty()).then(|| item.to_owned())
        })
        .collect()
}

fn positional<T: Clone>(list: &[Option<T>], index: usize) -> Option<T> {
    list.get(index).and_then(Clone::clone)
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source: e,
        })?;
        let file: ConfigFile =
            serde_json::from_str(&content).map_err(|e| ConfigError::Invalid {
                path: path.to_path_buf(),
                source: e,
            })?;
        Self::validate(file)
    }

    fn validate(file: ConfigFile) -> Result<Self, ConfigError> {
        let mac: HardwareAddress = file
            .node
            .mac
            .parse()
            .map_err(|_| ConfigError::BadPrimaryMac(file.node.mac.clone()))?;

        let node = PrimaryNode {
            name: file.node.name,
            mac,
            ip: file.node.ip,
            port: file.node.port,
            ssh_port: file.node.ssh_port,
            user: file.node.user,
            password: file.node.password,
        };

        let extra_nodes = match file.extra_nodes {
            Some(section) => validate_extra_nodes(section)?,
            None => Vec::new(),
        };

        let power_on = match file.power_on {
            Some(section) => Some(validate_power_on(section)?),
            None => None,
        };

        let power_off = file.power_off.map(|section| PowerOffSettings {
            keyword: section.keyword,
            allowed_senders: section.allowed_senders.as_deref().map(split_csv),
            command: section.command,
        });

        let extend = match file.extend_time {
            Some(section) => Some(validate_extend(section)?),
            None => None,
        };

        Ok(Self {
            general: file.general,
            node,
            extra_nodes,
            mail: file.mail,
            power_on,
            power_off,
            extend,
            pushover: file.pushover,
        })
    }
}

fn validate_extra_nodes(section: ExtraNodesSection) -> Result<Vec<ExtraNode>, ConfigError> {
    let names = split_csv(&section.names);
    let ips = split_csv(&section.ips);
    let macs = split_csv(&section.macs);
    if names.len() != ips.len() || names.len() != macs.len() {
        return Err(ConfigError::UnevenNodeLists {
            names: names.len(),
            ips: ips.len(),
            macs: macs.len(),
        });
    }

    let users = split_positional(&section.users);
    let passwords = split_positional(&section.passwords);
    let ports = split_positional(&section.ssh_ports);
    for (key, len) in [
        ("users", users.len()),
        ("passwords", passwords.len()),
        ("ssh_ports", ports.len()),
    ] {
        if len > names.len() {
            return Err(ConfigError::OptionOverflow {
                key,
                got: len,
                nodes: names.len(),
            });
        }
    }

    let mut ssh_ports = Vec::with_capacity(ports.len());
    for port in &ports {
        match port {
            None => ssh_ports.push(None),
            Some(raw) => match raw.parse::<u16>() {
                Ok(p) => ssh_ports.push(Some(p)),
                Err(_) => return Err(ConfigError::BadPort(raw.clone())),
            },
        }
    }

    let nodes = names
        .into_iter()
        .zip(ips)
        .zip(macs)
        .enumerate()
        .map(|(index, ((name, ip), mac))| ExtraNode {
            name,
            ip,
            mac,
            ssh_port: ssh_ports.get(index).copied().flatten(),
            user: positional(&users, index),
            password: positional(&passwords, index),
        })
        .collect();
    Ok(nodes)
}

fn validate_power_on(section: PowerOnSection) -> Result<MailCommand, ConfigError> {
    let allowed_senders = split_csv(&section.allowed_senders);
    let allowed_credits = match section.allowed_credits {
        None => None,
        Some(raw) => {
            let entries = split_csv(&raw);
            if entries.len() != allowed_senders.len() {
                return Err(ConfigError::UnevenCredits {
                    senders: allowed_senders.len(),
                    credits: entries.len(),
                });
            }
            let mut credits = Vec::with_capacity(entries.len());
            for entry in entries {
                credits.push(
                    entry
                        .parse::<i64>()
                        .map_err(|_| ConfigError::BadCredit(entry.clone()))?,
                );
            }
            Some(credits)
        }
    };
    Ok(MailCommand {
        keyword: section.keyword,
        allowed_senders,
        allowed_credits,
    })
}

fn validate_extend(section: ExtendSection) -> Result<ExtendSettings, ConfigError> {
    if section.default_hour >= 24 {
        return Err(ConfigError::BadHour(section.default_hour));
    }
    if section.max_hour > 24 {
        return Err(ConfigError::BadHour(section.max_hour));
    }
    if section.default_minutes >= 60 {
        return Err(ConfigError::BadMinutes(section.default_minutes));
    }
    if section.extend_hours == 0 {
        return Err(ConfigError::BadExtendHours);
    }
    Ok(ExtendSettings {
        default_hour: section.default_hour,
        default_minutes: section.default_minutes,
        max_hour: section.max_hour,
        keyword: section.keyword,
        allowed_senders: split_csv(&section.allowed_senders),
        extend_hours: section.extend_hours,
        job_marker: section.job_marker.unwrap_or_else(|| "power-off".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Config, ConfigError> {
        let file: ConfigFile = serde_json::from_str(json).expect("test json parses");
        Config::validate(file)
    }

    const FULL: &str = r#"{
        "general": {"enabled": true, "dry_run": false, "verbose_logging": true},
        "node": {
            "name": "vault", "mac": "AA:BB:CC:00:11:22", "ip": "192.168.1.10",
            "port": 445, "ssh_port": 22, "user": "admin", "password": "hunter2"
        },
        "extra_nodes": {
            "names": "store1, store2, store3",
            "ips": "192.168.1.11,192.168.1.12,192.168.1.13",
            "macs": "aa:bb:cc:00:11:23,aa:bb:cc:00:11:24,aa:bb:cc:00:11:25",
            "ssh_ports": "22,,22",
            "users": "root,,root",
            "passwords": "pw1,,pw3"
        },
        "mail": {
            "server": "mail.example.com", "port": 587,
            "login": "warden@example.com", "password": "secret",
            "sender": "warden@example.com"
        },
        "power_on": {
            "keyword": "start the server",
            "allowed_senders": "alice@example.com,bob@example.com",
            "allowed_credits": "2,-1"
        },
        "power_off": {
            "keyword": "stop the server",
            "allowed_senders": "alice@example.com",
            "command": "shutdown -h now"
        },
        "extend_time": {
            "default_hour": 22, "default_minutes": 30, "max_hour": 23,
            "keyword": "stay up", "allowed_senders": "alice@example.com",
            "extend_hours": 2
        },
        "pushover": {"user_key": "u", "token_api": "t", "sound": "pushover"}
    }"#;

    #[test]
    fn full_config_validates() {
        let cfg = parse(FULL).unwrap();
        assert_eq!(cfg.node.mac.to_string(), "aa-bb-cc-00-11-22");
        assert_eq!(cfg.extra_nodes.len(), 3);
        assert_eq!(cfg.extra_nodes[0].name, "store1");
        assert_eq!(
            cfg.extra_nodes[0].ssh_credentials(),
            Some(("root", "pw1", 22))
        );
        // The middle node has empty positional slots and therefore no
        // remote-shutdown capability.
        assert_eq!(cfg.extra_nodes[1].ssh_credentials(), None);
        assert_eq!(
            cfg.extra_nodes[2].ssh_credentials(),
            Some(("root", "pw3", 22))
        );
        let power_on = cfg.power_on.unwrap();
        assert_eq!(
            power_on.credit_defaults().unwrap(),
            vec![
                ("alice@example.com".to_string(), 2),
                ("bob@example.com".to_string(), -1)
            ]
        );
        assert_eq!(cfg.extend.unwrap().job_marker, "power-off");
    }

    #[test]
    fn uneven_extra_node_lists_are_rejected() {
        let json = FULL.replace(
            "\"ips\": \"192.168.1.11,192.168.1.12,192.168.1.13\"",
            "\"ips\": \"192.168.1.11\"",
        );
        assert!(matches!(
            parse(&json),
            Err(ConfigError::UnevenNodeLists { .. })
        ));
    }

    #[test]
    fn overflowing_option_list_is_rejected() {
        let json = FULL.replace(
            "\"users\": \"root,,root\"",
            "\"users\": \"root,root,root,root\"",
        );
        assert!(matches!(
            parse(&json),
            Err(ConfigError::OptionOverflow { key: "users", .. })
        ));
    }

    #[test]
    fn uneven_credits_are_rejected() {
        let json = FULL.replace("\"allowed_credits\": \"2,-1\"", "\"allowed_credits\": \"2\"");
        assert!(matches!(
            parse(&json),
            Err(ConfigError::UnevenCredits {
                senders: 2,
                credits: 1
            })
        ));
    }

    #[test]
    fn bad_primary_mac_is_rejected() {
        let json = FULL.replace("AA:BB:CC:00:11:22", "certainly-not-a-mac");
        assert!(matches!(parse(&json), Err(ConfigError::BadPrimaryMac(_))));
    }

    #[test]
    fn extend_bounds_are_checked() {
        let json = FULL.replace("\"default_hour\": 22", "\"default_hour\": 24");
        assert!(matches!(parse(&json), Err(ConfigError::BadHour(24))));
        let json = FULL.replace("\"extend_hours\": 2", "\"extend_hours\": 0");
        assert!(matches!(parse(&json), Err(ConfigError::BadExtendHours)));
    }

    #[test]
    fn minimal_config_needs_no_optional_sections() {
        let json = r#"{
            "general": {"enabled": true, "dry_run": false, "verbose_logging": false},
            "node": {"name": "vault", "mac": "aa-bb-cc-00-11-22", "ip": "192.168.1.10", "port": 445},
            "pushover": {"user_key": "u", "token_api": "t", "sound": "pushover"}
        }"#;
        let cfg = parse(json).unwrap();
        assert!(cfg.extra_nodes.is_empty());
        assert!(cfg.mail.is_none());
        assert!(cfg.node.ssh_credentials().is_none());
    }
}
