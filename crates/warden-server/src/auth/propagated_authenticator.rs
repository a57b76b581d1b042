//! Principal propagated by a preceding node.
//!
//! A node that already authenticated a request forwards the principal in the
//! [`PRINCIPAL_HEADER`] as base64 of trusted codec bytes. The header is only
//! read on requests marked with a verified peer node; on client traffic it is
//! ignored.

use warden_core::IdentityError;
use warden_proto::{Codec, Principal, PRINCIPAL_HEADER};

use super::Authenticator;
use crate::channel::RequestChannel;

/// Reads the forwarded principal from request metadata.
#[derive(Debug, Clone, Default)]
pub struct PropagatedPrincipalAuthenticator {
    codec: Codec,
}

impl PropagatedPrincipalAuthenticator {
    /// Decode with the given codec.
    pub fn new(codec: Codec) -> Self {
        Self { codec }
    }

    /// Header value carrying `principal`.
    pub fn header_value(&self, principal: &Principal) -> Result<String, warden_proto::CodecError> {
        self.codec
            .encode_base64(&warden_proto::TrustedValue::Principal(principal.clone()))
    }
}

impl Authenticator for PropagatedPrincipalAuthenticator {
    fn name(&self) -> &'static str {
        "propagated"
    }

    fn authenticate(&self, request: &dyn RequestChannel) -> Result<Principal, IdentityError> {
        let value = request.header(PRINCIPAL_HEADER).ok_or(IdentityError::NoCredentials)?;
        let Some(node) = request.parts().peer_node.as_deref() else {
            tracing::warn!(remote = ?request.remote_addr(), "ignoring principal header from client connection");
            return Err(IdentityError::NoCredentials);
        };

        match self.codec.decode_base64(value) {
            Ok(warden_proto::TrustedValue::Principal(principal)) => Ok(principal),
            Ok(other) => {
                tracing::warn!(value = ?other, "propagated header holds no principal");
                Err(IdentityError::BadCredentials)
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    node = %node,
                    "rejected propagated principal"
                );
                Err(IdentityError::BadCredentials)
            }
        }
    }
}
