//! Docker-style port binding specs: `[hostIp:][hostPort:]containerPort[/protocol]`.
//! IPv6 host addresses are written in brackets, e.g. `[::1]:8080:80`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortSpecError {
    #[error("port binding specification is empty")]
    Empty,
    #[error("invalid port binding '{spec}': {reason}")]
    Invalid { spec: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        })
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "sctp" => Ok(Protocol::Sctp),
            other => Err(format!("unsupported protocol '{}'", other)),
        }
    }
}

/// One host-to-container port publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortBinding {
    pub host_ip: Option<String>,
    pub host_port: Option<u16>,
    pub container_port: u16,
    pub protocol: Protocol,
}

impl PortBinding {
    pub fn new(host_port: u16, container_port: u16) -> Self {
        Self {
            host_ip: None,
            host_port: Some(host_port),
            container_port,
            protocol: Protocol::Tcp,
        }
    }

    fn assemble(
        host_ip: Option<String>,
        host_port: &str,
        container_port: &str,
        protocol: Protocol,
    ) -> Result<Self, String> {
        let container_port = parse_port(container_port)
            .ok_or_else(|| format!("invalid container port '{}'", container_port))?;
        let host_port = if host_port.is_empty() {
            None
        } else {
            Some(parse_port(host_port).ok_or_else(|| format!("invalid host port '{}'", host_port))?)
        };

        Ok(PortBinding {
            host_ip,
            host_port,
            container_port,
            protocol,
        })
    }
}

/// Renders the form accepted by `docker create -p`.
impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ip = self.host_ip.as_deref().map(|ip| {
            if ip.contains(':') {
                format!("[{}]", ip)
            } else {
                ip.to_string()
            }
        });
        match (ip, self.host_port) {
            (Some(ip), Some(port)) => write!(f, "{}:{}:", ip, port)?,
            (Some(ip), None) => write!(f, "{}::", ip)?,
            (None, Some(port)) => write!(f, "{}:", port)?,
            (None, None) => {}
        }
        write!(f, "{}/{}", self.container_port, self.protocol)
    }
}

impl FromStr for PortBinding {
    type Err = PortSpecError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| PortSpecError::Invalid {
            spec: spec.to_string(),
            reason,
        };

        let spec = spec.trim();
        if spec.is_empty() {
            return Err(PortSpecError::Empty);
        }

        let (addr, protocol) = match spec.split_once('/') {
            Some((addr, proto)) => (addr, proto.parse::<Protocol>().map_err(invalid)?),
            None => (spec, Protocol::Tcp),
        };

        // IPv6 host addresses are bracketed: `[::1]:8080:80`.
        if let Some(bracketed) = addr.strip_prefix('[') {
            let (ip, ports) = bracketed
                .split_once("]:")
                .ok_or_else(|| invalid("unterminated '[' in host address".to_string()))?;
            let ip: Ipv6Addr = ip
                .parse()
                .map_err(|_| invalid(format!("invalid IPv6 host address '{}'", ip)))?;
            let (host_port, container_port) = ports
                .split_once(':')
                .ok_or_else(|| invalid("expected [hostIp]:[hostPort]:containerPort".to_string()))?;
            return PortBinding::assemble(Some(ip.to_string()), host_port, container_port, protocol)
                .map_err(invalid);
        }

        let parts: Vec<&str> = addr.split(':').collect();
        let (host_ip, host_port, container_port) = match parts.as_slice() {
            [container] => (None, "", *container),
            [host, container] => (None, *host, *container),
            [ip, host, container] if !ip.is_empty() => (Some(ip.to_string()), *host, *container),
            _ => return Err(invalid("expected [hostIp:][hostPort:]containerPort".to_string())),
        };

        PortBinding::assemble(host_ip, host_port, container_port, protocol).map_err(invalid)
    }
}

fn parse_port(raw: &str) -> Option<u16> {
    match raw.trim().parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

/// Parse every binding in `specs`; each value may hold several comma-separated bindings.
pub fn parse_port_specs<I, S>(specs: I) -> Result<Vec<PortBinding>, PortSpecError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut bindings = Vec::new();
    for spec in specs {
        for part in spec.as_ref().split(',').filter(|p| !p.trim().is_empty()) {
            bindings.push(part.parse()?);
        }
    }

    if bindings.is_empty() {
        return Err(PortSpecError::Empty);
    }
    Ok(bindings)
}

/// Split an inspect key such as `80/tcp` into port and protocol.
pub fn parse_exposed_port(key: &str) -> Option<(u16, Protocol)> {
    let (port, proto) = key.split_once('/').unwrap_or((key, "tcp"));
    Some((parse_port(port)?, proto.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_container_port() {
        let binding: PortBinding = "8080:80".parse().unwrap();
        assert_eq!(binding, PortBinding::new(8080, 80));
        assert_eq!(binding.to_string(), "8080:80/tcp");
    }

    #[test]
    fn parses_protocol_and_host_ip() {
        let binding: PortBinding = "127.0.0.1:5353:53/udp".parse().unwrap();
        assert_eq!(binding.host_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(binding.host_port, Some(5353));
        assert_eq!(binding.container_port, 53);
        assert_eq!(binding.protocol, Protocol::Udp);
        assert_eq!(binding.to_string(), "127.0.0.1:5353:53/udp");
    }

    #[test]
    fn container_port_only_and_ephemeral_host_port() {
        let binding: PortBinding = "80".parse().unwrap();
        assert_eq!(binding.host_port, None);
        assert_eq!(binding.to_string(), "80/tcp");

        let binding: PortBinding = "0.0.0.0::80".parse().unwrap();
        assert_eq!(binding.host_port, None);
        assert_eq!(binding.to_string(), "0.0.0.0::80/tcp");
    }

    #[test]
    fn parses_bracketed_ipv6_host_address() {
        let binding: PortBinding = "[::1]:8080:80".parse().unwrap();
        assert_eq!(binding.host_ip.as_deref(), Some("::1"));
        assert_eq!(binding.host_port, Some(8080));
        assert_eq!(binding.container_port, 80);
        assert_eq!(binding.to_string(), "[::1]:8080:80/tcp");

        let binding: PortBinding = "[fe80::1]::53/udp".parse().unwrap();
        assert_eq!(binding.host_ip.as_deref(), Some("fe80::1"));
        assert_eq!(binding.host_port, None);
        assert_eq!(binding.to_string(), "[fe80::1]::53/udp");
    }

    #[test]
    fn rejects_malformed_ipv6_host_address() {
        for spec in ["[::1:8080:80", "[::1]8080:80", "[not-an-ip]:8080:80", "[::1]:80"] {
            assert!(spec.parse::<PortBinding>().is_err(), "{spec}");
        }
    }

    #[test]
    fn rejects_bad_specs() {
        for spec in ["abc", "8080:", "8080:0", "70000:80", "8080:80/icmp", "a:b:c:d"] {
            assert!(spec.parse::<PortBinding>().is_err(), "{spec}");
        }
        assert_eq!("  ".parse::<PortBinding>(), Err(PortSpecError::Empty));
    }

    #[test]
    fn parses_comma_separated_and_repeated_values() {
        let bindings = parse_port_specs(["8080:80, 8443:443", "9000:9000/udp"]).unwrap();
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[1], PortBinding::new(8443, 443));
        assert_eq!(bindings[2].protocol, Protocol::Udp);
    }

    #[test]
    fn empty_spec_list_is_rejected() {
        assert_eq!(parse_port_specs(Vec::<String>::new()), Err(PortSpecError::Empty));
        assert_eq!(parse_port_specs([","]), Err(PortSpecError::Empty));
    }

    #[test]
    fn exposed_port_keys() {
        assert_eq!(parse_exposed_port("80/tcp"), Some((80, Protocol::Tcp)));
        assert_eq!(parse_exposed_port("53/udp"), Some((53, Protocol::Udp)));
        assert_eq!(parse_exposed_port("bogus"), None);
    }
}
