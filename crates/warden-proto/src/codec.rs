//! Trusted object codec.
//!
//! Principals and request context travel between nodes as opaque byte blobs in
//! request metadata. A blob is a framed type identifier followed by an rkyv
//! payload:
//!
//! ```text
//! +----------------+------------------+-----------------+
//! | u32 BE id len  | type id (UTF-8)  | rkyv payload    |
//! +----------------+------------------+-----------------+
//! ```
//!
//! The type identifier is checked against a fixed allow-list before a single
//! payload byte is touched. Unknown identifiers fail closed with
//! [`CodecError::UntrustedType`].

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rkyv::{Archive, Deserialize, Serialize};

use crate::error::{CodecError, CodecResult};
use crate::framing::{FrameReader, FrameWriter, MAX_FIELD_SIZE};
use crate::principal::Principal;

/// Largest encoded blob accepted by [`Codec::decode`].
pub const MAX_PAYLOAD_SIZE: usize = MAX_FIELD_SIZE;

/// Namespace of the domain types in the current release.
pub const CURRENT_NAMESPACE: &str = "warden.security.";

/// Namespace used by nodes from before the type rename.
pub const LEGACY_NAMESPACE: &str = "guard.security.";

/// Remote socket address of the original caller.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct RemoteAddress {
    /// IP address in textual form.
    pub ip: String,
    /// Port number.
    pub port: u16,
}

/// Source-filtering context propagated alongside a search request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct FieldsContext {
    /// Field patterns to include in `_source`.
    pub includes: Vec<String>,
    /// Field patterns to exclude from `_source`.
    pub excludes: Vec<String>,
    /// Whether `_source` is fetched at all.
    pub fetch_source: bool,
}

/// Values the codec is willing to carry.
#[derive(Debug, Clone, PartialEq)]
pub enum TrustedValue {
    String(String),
    Integer(i64),
    Double(f64),
    SocketAddress(RemoteAddress),
    /// A regular expression in source form.
    Pattern(String),
    Principal(Principal),
    FieldsContext(FieldsContext),
    StringMap(BTreeMap<String, String>),
    StringList(Vec<String>),
}

/// Allow-listed type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeTag {
    String,
    Integer,
    Double,
    SocketAddress,
    Pattern,
    Principal,
    FieldsContext,
    StringMap,
    StringList,
}

/// The allow-list. Domain types are stored without namespace.
const ALLOWED_PRIMITIVES: &[(&str, TypeTag)] = &[
    ("string", TypeTag::String),
    ("i64", TypeTag::Integer),
    ("f64", TypeTag::Double),
    ("socket_addr", TypeTag::SocketAddress),
    ("pattern", TypeTag::Pattern),
    ("string_map", TypeTag::StringMap),
    ("string_list", TypeTag::StringList),
];

const ALLOWED_DOMAIN_TYPES: &[(&str, TypeTag)] = &[
    ("Principal", TypeTag::Principal),
    ("FieldsContext", TypeTag::FieldsContext),
];

impl TypeTag {
    fn of(value: &TrustedValue) -> Self {
        match value {
            TrustedValue::String(_) => TypeTag::String,
            TrustedValue::Integer(_) => TypeTag::Integer,
            TrustedValue::Double(_) => TypeTag::Double,
            TrustedValue::SocketAddress(_) => TypeTag::SocketAddress,
            TrustedValue::Pattern(_) => TypeTag::Pattern,
            TrustedValue::Principal(_) => TypeTag::Principal,
            TrustedValue::FieldsContext(_) => TypeTag::FieldsContext,
            TrustedValue::StringMap(_) => TypeTag::StringMap,
            TrustedValue::StringList(_) => TypeTag::StringList,
        }
    }

    fn type_id(self, namespace: &str) -> String {
        if let Some((name, _)) = ALLOWED_PRIMITIVES.iter().find(|(_, t)| *t == self) {
            return (*name).to_string();
        }
        let name = ALLOWED_DOMAIN_TYPES
            .iter()
            .find(|(_, t)| *t == self)
            .map(|(name, _)| *name)
            .unwrap_or_default();
        format!("{}{}", namespace, name)
    }

    fn lookup(type_id: &str) -> Option<Self> {
        if let Some(name) = type_id.strip_prefix(CURRENT_NAMESPACE) {
            return ALLOWED_DOMAIN_TYPES
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, t)| *t);
        }
        ALLOWED_PRIMITIVES
            .iter()
            .find(|(n, _)| *n == type_id)
            .map(|(_, t)| *t)
    }
}

/// Which type namespaces the codec understands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CodecMode {
    /// Only current identifiers are accepted.
    #[default]
    Strict,
    /// Identifiers in the legacy namespace are mapped onto the current one
    /// before the allow-list check.
    Compat,
}

/// Encoder/decoder for [`TrustedValue`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct Codec {
    mode: CodecMode,
}

impl Codec {
    /// Create a codec in the given mode.
    pub fn new(mode: CodecMode) -> Self {
        Self { mode }
    }

    /// Codec that only accepts current identifiers.
    pub fn strict() -> Self {
        Self::new(CodecMode::Strict)
    }

    /// Codec that also accepts legacy identifiers.
    pub fn compat() -> Self {
        Self::new(CodecMode::Compat)
    }

    /// The configured mode.
    pub fn mode(&self) -> CodecMode {
        self.mode
    }

    /// Encode a value with its current type identifier.
    pub fn encode(&self, value: &TrustedValue) -> CodecResult<Vec<u8>> {
        self.encode_in(value, CURRENT_NAMESPACE)
    }

    /// Encode a value for a peer that still expects legacy identifiers.
    ///
    /// Only available in compatibility mode.
    pub fn encode_legacy(&self, value: &TrustedValue) -> CodecResult<Vec<u8>> {
        if self.mode != CodecMode::Compat {
            return Err(CodecError::Malformed(
                "legacy encoding requires compatibility mode".to_string(),
            ));
        }
        self.encode_in(value, LEGACY_NAMESPACE)
    }

    fn encode_in(&self, value: &TrustedValue, namespace: &str) -> CodecResult<Vec<u8>> {
        let type_id = TypeTag::of(value).type_id(namespace);
        let payload = match value {
            TrustedValue::String(v) | TrustedValue::Pattern(v) => to_bytes(v)?,
            TrustedValue::Integer(v) => to_bytes(v)?,
            TrustedValue::Double(v) => to_bytes(v)?,
            TrustedValue::SocketAddress(v) => to_bytes(v)?,
            TrustedValue::Principal(v) => to_bytes(v)?,
            TrustedValue::FieldsContext(v) => to_bytes(v)?,
            TrustedValue::StringMap(v) => to_bytes(v)?,
            TrustedValue::StringList(v) => to_bytes(v)?,
        };

        let mut writer = FrameWriter::new();
        writer.put_field(type_id.as_bytes())?;
        writer.put_raw(&payload);
        let bytes = writer.into_vec();
        if bytes.len() > MAX_PAYLOAD_SIZE {
            return Err(CodecError::Malformed(format!(
                "encoded size {} exceeds maximum {}",
                bytes.len(),
                MAX_PAYLOAD_SIZE
            )));
        }
        Ok(bytes)
    }

    /// Decode a blob produced by [`Codec::encode`].
    pub fn decode(&self, bytes: &[u8]) -> CodecResult<TrustedValue> {
        if bytes.len() > MAX_PAYLOAD_SIZE {
            return Err(CodecError::Malformed(format!(
                "payload size {} exceeds maximum {}",
                bytes.len(),
                MAX_PAYLOAD_SIZE
            )));
        }

        let mut reader = FrameReader::new(bytes);
        let type_id = reader.read_str()?;
        let tag = self.check_allowed(type_id)?;
        let payload = reader.remaining();

        let value = match tag {
            TypeTag::String => TrustedValue::String(from_bytes(payload)?),
            TypeTag::Integer => TrustedValue::Integer(from_bytes(payload)?),
            TypeTag::Double => TrustedValue::Double(from_bytes(payload)?),
            TypeTag::SocketAddress => TrustedValue::SocketAddress(from_bytes(payload)?),
            TypeTag::Pattern => {
                let source: String = from_bytes(payload)?;
                regex::Regex::new(&source)
                    .map_err(|e| CodecError::Malformed(format!("invalid pattern: {}", e)))?;
                TrustedValue::Pattern(source)
            }
            TypeTag::Principal => {
                let principal: Principal = from_bytes(payload)?;
                TrustedValue::Principal(principal.normalized())
            }
            TypeTag::FieldsContext => TrustedValue::FieldsContext(from_bytes(payload)?),
            TypeTag::StringMap => TrustedValue::StringMap(from_bytes(payload)?),
            TypeTag::StringList => TrustedValue::StringList(from_bytes(payload)?),
        };
        Ok(value)
    }

    /// Allow-list gate. Runs before any payload parsing.
    fn check_allowed(&self, type_id: &str) -> CodecResult<TypeTag> {
        let canonical = match (self.mode, type_id.strip_prefix(LEGACY_NAMESPACE)) {
            (CodecMode::Compat, Some(name)) => format!("{}{}", CURRENT_NAMESPACE, name),
            _ => type_id.to_string(),
        };

        TypeTag::lookup(&canonical).ok_or_else(|| {
            tracing::warn!(type_id = %type_id, mode = ?self.mode, "rejected untrusted type");
            CodecError::UntrustedType(type_id.to_string())
        })
    }

    /// Encode a principal.
    pub fn encode_principal(&self, principal: &Principal) -> CodecResult<Vec<u8>> {
        self.encode(&TrustedValue::Principal(principal.clone()))
    }

    /// Decode a blob that must hold a principal.
    pub fn decode_principal(&self, bytes: &[u8]) -> CodecResult<Principal> {
        match self.decode(bytes)? {
            TrustedValue::Principal(principal) => Ok(principal),
            other => Err(CodecError::Malformed(format!(
                "expected principal, found {:?}",
                TypeTag::of(&other)
            ))),
        }
    }

    /// Encode a value and wrap it in standard base64 for header transport.
    pub fn encode_base64(&self, value: &TrustedValue) -> CodecResult<String> {
        Ok(BASE64.encode(self.encode(value)?))
    }

    /// Unwrap base64 and decode.
    pub fn decode_base64(&self, text: &str) -> CodecResult<TrustedValue> {
        // base64 inflates by 4/3; reject obviously oversized headers early
        if text.len() > MAX_PAYLOAD_SIZE / 3 * 4 + 4 {
            return Err(CodecError::Malformed("encoded header too large".to_string()));
        }
        let bytes = BASE64
            .decode(text.trim())
            .map_err(|e| CodecError::Malformed(format!("invalid base64: {}", e)))?;
        self.decode(&bytes)
    }
}

fn to_bytes<T>(value: &T) -> CodecResult<rkyv::util::AlignedVec>
where
    T: for<'a> Serialize<
        rkyv::api::high::HighSerializer<
            rkyv::util::AlignedVec,
            rkyv::ser::allocator::ArenaHandle<'a>,
            rkyv::rancor::Error,
        >,
    >,
{
    rkyv::to_bytes::<rkyv::rancor::Error>(value)
        .map_err(|e| CodecError::Malformed(format!("failed to serialize: {}", e)))
}

fn from_bytes<T>(payload: &[u8]) -> CodecResult<T>
where
    T: Archive,
    T::Archived: for<'a> rkyv::bytecheck::CheckBytes<rkyv::api::high::HighValidator<'a, rkyv::rancor::Error>>
        + Deserialize<T, rkyv::api::high::HighDeserializer<rkyv::rancor::Error>>,
{
    // Payload follows a variable-length header, so it needs realigning
    let mut aligned: rkyv::util::AlignedVec<16> = rkyv::util::AlignedVec::new();
    aligned.extend_from_slice(payload);
    rkyv::from_bytes::<T, rkyv::rancor::Error>(&aligned)
        .map_err(|e| CodecError::Malformed(format!("failed to deserialize: {}", e)))
}
