//! Config reload broadcast messages.
//!
//! A [`ConfigUpdateRequest`] names the configuration categories a node must
//! reload and, per category, the minimum sequence id the reloaded content must
//! carry. Types and sequence ids travel as two parallel framed string arrays:
//!
//! ```text
//! u32 count | count x (u32 len | type name)
//! [ u32 count | count x (u32 len | sequence id or "") ]   (optional)
//! ```
//!
//! Nodes from before sequence gating stop after the first array; such requests
//! decode with no minimum for any category.

use std::fmt;
use std::str::FromStr;

use rkyv::{Archive, Deserialize, Serialize};

use crate::framing::{FrameReader, FrameWriter};
use crate::Error;

/// Upper bound on categories in one request.
const MAX_CONFIG_TYPES: u32 = 64;

/// Configuration category.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Archive, Serialize, Deserialize,
)]
pub enum ConfigType {
    Roles,
    RolesMapping,
    InternalUsers,
    Config,
}

impl ConfigType {
    /// Every category, in install order.
    pub const ALL: [ConfigType; 4] = [
        ConfigType::Config,
        ConfigType::InternalUsers,
        ConfigType::Roles,
        ConfigType::RolesMapping,
    ];

    /// Canonical lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigType::Roles => "roles",
            ConfigType::RolesMapping => "rolesmapping",
            ConfigType::InternalUsers => "internalusers",
            ConfigType::Config => "config",
        }
    }
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "roles" => Ok(ConfigType::Roles),
            "rolesmapping" => Ok(ConfigType::RolesMapping),
            "internalusers" => Ok(ConfigType::InternalUsers),
            "config" => Ok(ConfigType::Config),
            other => Err(Error::Validation(format!("unknown config type: {}", other))),
        }
    }
}

/// Broadcast asking a node to reload configuration categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigUpdateRequest {
    config_types: Vec<ConfigType>,
    sequence_ids: Vec<Option<u64>>,
}

impl ConfigUpdateRequest {
    /// Reload the given categories without a minimum sequence id.
    pub fn new(config_types: impl IntoIterator<Item = ConfigType>) -> Self {
        let config_types: Vec<ConfigType> = config_types.into_iter().collect();
        let sequence_ids = vec![None; config_types.len()];
        Self {
            config_types,
            sequence_ids,
        }
    }

    /// Reload categories, each at least at the paired sequence id.
    pub fn with_minimums(entries: impl IntoIterator<Item = (ConfigType, u64)>) -> Self {
        let (config_types, sequence_ids) = entries
            .into_iter()
            .map(|(config_type, seq)| (config_type, Some(seq)))
            .unzip();
        Self {
            config_types,
            sequence_ids,
        }
    }

    /// Requested categories.
    pub fn config_types(&self) -> &[ConfigType] {
        &self.config_types
    }

    /// Pairs of category and required minimum.
    pub fn entries(&self) -> impl Iterator<Item = (ConfigType, Option<u64>)> + '_ {
        self.config_types
            .iter()
            .copied()
            .zip(self.sequence_ids.iter().copied())
    }

    /// Reject requests that would do nothing.
    pub fn validate(&self) -> Result<(), Error> {
        if self.config_types.is_empty() {
            return Err(Error::Validation("no config types given".to_string()));
        }
        Ok(())
    }

    /// Encode to the wire form.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        self.validate()?;
        let mut writer = FrameWriter::new();
        writer.put_count(self.config_types.len() as u32);
        for config_type in &self.config_types {
            writer.put_field(config_type.as_str().as_bytes())?;
        }
        writer.put_count(self.sequence_ids.len() as u32);
        for seq in &self.sequence_ids {
            let text = seq.map(|s| s.to_string()).unwrap_or_default();
            writer.put_field(text.as_bytes())?;
        }
        Ok(writer.into_vec())
    }

    /// Encode without the sequence-id section, as older nodes do.
    pub fn encode_without_sequence_ids(&self) -> Result<Vec<u8>, Error> {
        self.validate()?;
        let mut writer = FrameWriter::new();
        writer.put_count(self.config_types.len() as u32);
        for config_type in &self.config_types {
            writer.put_field(config_type.as_str().as_bytes())?;
        }
        Ok(writer.into_vec())
    }

    /// Decode from the wire form.
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let mut reader = FrameReader::new(bytes);

        let count = reader.read_count()?;
        if count > MAX_CONFIG_TYPES {
            return Err(Error::InvalidMessage(format!(
                "too many config types: {}",
                count
            )));
        }
        let config_types = (0..count)
            .map(|_| reader.read_str()?.parse::<ConfigType>())
            .collect::<Result<Vec<ConfigType>, Error>>()?;

        let sequence_ids = if reader.is_empty() {
            vec![None; config_types.len()]
        } else {
            let seq_count = reader.read_count()? as usize;
            if seq_count != config_types.len() {
                return Err(Error::InvalidMessage(format!(
                    "sequence id count {} does not match type count {}",
                    seq_count,
                    config_types.len()
                )));
            }
            (0..seq_count)
                .map(|_| parse_sequence_id(reader.read_str()?))
                .collect::<Result<Vec<_>, Error>>()?
        };

        if !reader.is_empty() {
            return Err(Error::InvalidMessage(format!(
                "{} trailing bytes",
                reader.remaining().len()
            )));
        }

        let request = Self {
            config_types,
            sequence_ids,
        };
        request.validate()?;
        Ok(request)
    }
}

fn parse_sequence_id(text: &str) -> Result<Option<u64>, Error> {
    if text.is_empty() {
        return Ok(None);
    }
    text.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::InvalidMessage(format!("invalid sequence id '{}': {}", text, e)))
}

/// Result of reloading one category on one node.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum ReloadStatus {
    /// The loaded snapshot was installed.
    Installed { previous: u64, installed: u64 },
    /// The node already holds the loaded sequence id.
    AlreadyCurrent { installed: u64 },
    /// The store returned content older than required or than installed.
    StillStale {
        installed: u64,
        loaded: u64,
        minimum: Option<u64>,
    },
    /// The category could not be loaded or parsed.
    Failed { reason: String },
}

impl ReloadStatus {
    /// Whether the node now satisfies the requested minimum.
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            ReloadStatus::Installed { .. } | ReloadStatus::AlreadyCurrent { .. }
        )
    }
}

/// A node's answer to a [`ConfigUpdateRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct ConfigUpdateResponse {
    /// Responding node.
    pub node_id: String,
    /// Per-category outcome, in request order.
    pub statuses: Vec<(ConfigType, ReloadStatus)>,
}

impl ConfigUpdateResponse {
    /// Whether every category converged.
    pub fn is_converged(&self) -> bool {
        self.statuses.iter().all(|(_, status)| status.is_converged())
    }

    /// Categories that did not converge.
    pub fn stale_types(&self) -> Vec<ConfigType> {
        self.statuses
            .iter()
            .filter(|(_, status)| !status.is_converged())
            .map(|(config_type, _)| *config_type)
            .collect()
    }
}
