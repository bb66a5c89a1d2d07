// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! All types validate their invariants at creation time, so the lifecycle
//! code never has to re-check a port, an address or a container id.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;

/// The isolation technology behind a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Docker container runtime.
    Container,
    /// Firecracker microVM.
    #[serde(rename = "microvm")]
    MicroVm,
}

impl BackendKind {
    /// Human-readable name used in reports.
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Container => "Docker Container",
            Self::MicroVm => "Firecracker microVM",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container => write!(f, "container"),
            Self::MicroVm => write!(f, "microvm"),
        }
    }
}

/// Validated network port.
/// Must be in range 1-65535 (0 is reserved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Port(u16);

impl Port {
    /// Create a new Port with validation.
    pub fn new(port: u16) -> Result<Self, HardValidationError> {
        if port == 0 {
            return Err(HardValidationError::InvalidPort {
                port,
                reason: "Port 0 is reserved and cannot be used".to_string(),
            });
        }
        Ok(Self(port))
    }

    /// Get the inner port value.
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for Port {
    type Error = HardValidationError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Port> for u16 {
    fn from(port: Port) -> Self {
        port.0
    }
}

/// Validated process ID.
/// Must be positive (non-zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId(u32);

impl ProcessId {
    /// Create a new ProcessId with validation.
    pub fn new(pid: u32) -> Result<Self, HardValidationError> {
        if pid == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "process_id",
                value: "0".to_string(),
                reason: "Process ID 0 is reserved".to_string(),
            });
        }
        Ok(Self(pid))
    }

    /// Get the inner PID value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Container id as printed by `docker run -d`.
/// Must be non-empty lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Parse a container id from runtime output, trimming whitespace.
    pub fn new(id: impl AsRef<str>) -> Result<Self, HardValidationError> {
        let id = id.as_ref().trim();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "container_id",
                value: id.to_string(),
                reason: "Container ID must be a non-empty hex string".to_string(),
            });
        }
        Ok(Self(id.to_ascii_lowercase()))
    }

    /// Full id.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 12-character short form shown by `docker ps`.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short())
    }
}

/// Opaque runtime handle of a sandbox instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceHandle {
    Container(ContainerId),
    Process(ProcessId),
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container(id) => write!(f, "container {}", id),
            Self::Process(pid) => write!(f, "pid {}", pid),
        }
    }
}

/// IPv4 address with prefix length, e.g. `172.16.0.1/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Cidr {
    addr: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, HardValidationError> {
        if prefix > 32 {
            return Err(HardValidationError::InvalidCidr {
                value: format!("{}/{}", addr, prefix),
                reason: "Prefix length must be at most 32".to_string(),
            });
        }
        Ok(Self { addr, prefix })
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        }
    }

    /// Check whether `other` lies in the same network as this address.
    pub fn same_subnet(&self, other: &Ipv4Cidr) -> bool {
        self.prefix == other.prefix
            && u32::from(self.addr) & self.mask() == u32::from(other.addr) & self.mask()
    }
}

impl FromStr for Ipv4Cidr {
    type Err = HardValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| HardValidationError::InvalidCidr {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| invalid("Expected <address>/<prefix>"))?;
        let addr: Ipv4Addr = addr
            .trim()
            .parse()
            .map_err(|_| invalid("Address is not IPv4"))?;
        let prefix: u8 = prefix
            .trim()
            .parse()
            .map_err(|_| invalid("Prefix is not a number"))?;

        Self::new(addr, prefix)
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Guest MAC address in `AA:BB:CC:DD:EE:FF` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MacAddress(String);

impl MacAddress {
    pub fn new(mac: impl Into<String>) -> Result<Self, HardValidationError> {
        let mac = mac.into();
        let octets: Vec<&str> = mac.split(':').collect();
        let valid = octets.len() == 6
            && octets
                .iter()
                .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));

        if !valid {
            return Err(HardValidationError::InvalidMac { value: mac });
        }
        Ok(Self(mac.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address at which a sandboxed workload must become reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadEndpoint {
    host: String,
    port: Port,
}

impl WorkloadEndpoint {
    pub fn new(host: impl Into<String>, port: Port) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host loopback endpoint used by the container backend. IPv4 only,
    /// matching the address the container port is published on.
    pub fn loopback(port: Port) -> Self {
        Self::new("127.0.0.1", port)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Port {
        self.port
    }

    /// Health URL (`GET /`).
    pub fn url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

impl fmt::Display for WorkloadEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
