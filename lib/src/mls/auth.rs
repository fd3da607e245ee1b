//! [RFC9420 Sec.5.3.1](https://www.rfc-editor.org/rfc/rfc9420.html#section-5.3.1) Credential
//! validation is delegated to an authentication service.

use async_trait::async_trait;

use crate::mls::crypto::credential::{Credential, Identity};
use crate::mls::ratchet_tree::leaf_node::LeafNode;
use crate::mls::utilities::error::AuthenticationError;

#[async_trait]
pub trait AuthenticationService: Send + Sync {
    type Identity: Send + Sync;

    /// Checks that the credential of `leaf` is acceptable and returns the identity it asserts.
    async fn authenticate_credential(
        &self,
        leaf: &LeafNode,
    ) -> Result<Self::Identity, AuthenticationError>;

    /// Checks that `leaf` still asserts `identity`, used when a member replaces its leaf.
    async fn authenticate_credential_identity(
        &self,
        identity: &Self::Identity,
        leaf: &LeafNode,
    ) -> Result<(), AuthenticationError>;

    /// Whether two credentials belong to the same client.
    async fn is_same_client(&self, a: &Credential, b: &Credential) -> bool;
}

/// Accepts every non-empty basic credential; two credentials are the same client when their
/// identities are equal.
#[derive(Default, Debug, Clone, Copy)]
pub struct BasicAuthenticationService;

#[async_trait]
impl AuthenticationService for BasicAuthenticationService {
    type Identity = Identity;

    async fn authenticate_credential(
        &self,
        leaf: &LeafNode,
    ) -> Result<Self::Identity, AuthenticationError> {
        let identity = leaf.credential.identity();
        if identity.is_empty() {
            return Err(AuthenticationError::CredentialRejected(
                "empty identity".to_owned(),
            ));
        }
        Ok(identity.clone())
    }

    async fn authenticate_credential_identity(
        &self,
        identity: &Self::Identity,
        leaf: &LeafNode,
    ) -> Result<(), AuthenticationError> {
        if leaf.credential.identity() == identity {
            Ok(())
        } else {
            Err(AuthenticationError::IdentityChanged)
        }
    }

    async fn is_same_client(&self, a: &Credential, b: &Credential) -> bool {
        a.identity() == b.identity()
    }
}
