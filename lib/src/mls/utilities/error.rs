//! Error types shared by the whole `mls` module.
//!
//! Component failures are grouped into their own enums ([`PskError`], [`ResumptionJoinError`],
//! [`ReInitJoinError`], [`BranchError`], [`AuthenticationError`], [`ProposalError`] and
//! [`CommitError`]) so integrators can tell a retry-able condition (a PSK that is not available
//! yet) apart from a protocol violation (a bad confirmation tag).

use crate::mls::crypto::cipher_suite::CipherSuite;
use crate::mls::framing::ProtocolVersion;
use crate::mls::utilities::tree_math::LeafIndex;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Codec
    #[error("buffer too small")]
    BufferTooSmall,
    #[error("invalid variable length integer prefix")]
    InvalidVariableLengthIntegerPrefix,
    #[error("minimum varint encoding was not used")]
    MinimumEncodingWasNotUsed,
    #[error("varint exceeds 30 bits")]
    VarintExceeds30Bits,
    #[error("opaque size exceeds maximum value of u32")]
    OpaqueSizeExceedsMaximumValueOfU32,
    #[error("invalid optional value")]
    InvalidOptionalValue,
    #[error("invalid credential type value")]
    InvalidCredentialTypeValue,
    #[error("invalid protocol version {0}")]
    InvalidProtocolVersion(u16),
    #[error("invalid wire format {0}")]
    InvalidWireFormatValue(u16),
    #[error("invalid content type {0}")]
    InvalidContentTypeValue(u8),
    #[error("invalid sender type {0}")]
    InvalidSenderTypeValue(u8),
    #[error("invalid proposal type {0}")]
    InvalidProposalTypeValue(u16),
    #[error("invalid proposal-or-ref type {0}")]
    InvalidProposalOrRefValue(u8),
    #[error("invalid PSK type {0}")]
    InvalidPskTypeValue(u8),
    #[error("invalid resumption PSK usage {0}")]
    InvalidResumptionPskUsageValue(u8),
    #[error("invalid node type {0}")]
    InvalidNodeTypeValue(u8),
    #[error("invalid leaf node source {0}")]
    InvalidLeafNodeSourceValue(u8),
    #[error("padding contains non-zero bytes")]
    PaddingContainsNonZeroBytes,

    // Crypto
    #[error("cipher suite is not supported by the crypto provider")]
    UnsupportedCipherSuite,
    #[error("RustCrypto error: {0}")]
    RustCryptoError(String),
    #[error("invalid Ed25519 key")]
    InvalidEd25519PrivateKey,
    #[error("invalid key or nonce length")]
    InvalidKeyLength,
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("membership tag verification failed")]
    InvalidMembershipTag,
    #[error("nonce and reuse guard length do not match")]
    NonceAndReuseGuardLenNotMatch,

    // Ratchet tree
    #[error("invalid leaf node")]
    InvalidLeafNode,
    #[error("leaf {0} is blank or out of range")]
    BlankLeaf(LeafIndex),
    #[error("parent hash of the tree is not valid")]
    InvalidParentHash,
    #[error("tree hash does not match the group context")]
    TreeHashMismatch,
    #[error("update path does not match the filtered direct path")]
    InvalidUpdatePathLength,
    #[error("no path secret in the update path can be decrypted")]
    NoDecryptablePathSecret,
    #[error("derived public key does not match the update path")]
    PathKeyMismatch,

    // Secret tree
    #[error("generation {0} is too far in the future")]
    GenerationTooFarInFuture(u32),
    #[error("generation {0} was already consumed")]
    GenerationInThePast(u32),

    // Welcome
    #[error("no matching key package for this welcome")]
    NoMatchingKeyPackage,
    #[error("no ratchet tree available to join the group")]
    NoRatchetTreeInGroup,
    #[error("encrypted group secrets not found for provided key package ref")]
    EncryptedGroupSecretsNotFoundForProvidedKeyPackageRef,
    #[error("could not find our own leaf in the joined tree")]
    OwnLeafNotFound,

    // State
    #[error("message is for epoch {got}, group is at epoch {expected}")]
    WrongEpoch { expected: u64, got: u64 },
    #[error("message is for another group")]
    WrongGroupId,
    #[error("protocol version {0:?} is not supported")]
    UnsupportedProtocolVersion(ProtocolVersion),
    #[error("cipher suite {0} does not match the group")]
    CipherSuiteMismatch(CipherSuite),
    #[error("unknown proposal reference")]
    UnknownProposalRef,
    #[error("a resumed group needs at least one member besides its creator")]
    NoResumedMembers,
    #[error("unexpected {0:?} message")]
    UnexpectedWireFormat(crate::mls::framing::WireFormat),

    #[error(transparent)]
    Psk(#[from] PskError),
    #[error(transparent)]
    ResumptionJoin(#[from] ResumptionJoinError),
    #[error(transparent)]
    ReInitJoin(#[from] ReInitJoinError),
    #[error(transparent)]
    Branch(#[from] BranchError),
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),
    #[error(transparent)]
    Proposal(#[from] ProposalError),
    #[error(transparent)]
    Commit(#[from] CommitError),
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PskError {
    #[error("pre-shared key not found")]
    NotFound,
    #[error("PSK nonce has length {got}, expected {expected}")]
    InvalidNonceLength { expected: usize, got: usize },
    #[error("resumption PSK usage is not valid for this commit")]
    UsageMismatch,
    #[error("the same PSK is referenced twice in one commit")]
    Duplicate,
    #[error("resumption commit does not carry exactly one resumption PSK")]
    MissingResumptionPsk,
    #[error("more PSKs than fit in a PSK label")]
    TooMany,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ResumptionJoinError {
    #[error("protocol version of the new group does not match")]
    ProtocolVersionMismatch,
    #[error("cipher suite of the new group does not match")]
    CipherSuiteMismatch,
    #[error("new group contains members that were not in the original group")]
    NewMembersAdded,
    #[error("welcome does not reference the expected resumption PSK")]
    MissingResumptionPsk,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ReInitJoinError {
    #[error("resumption PSK epoch does not match the suspended epoch")]
    EpochMismatch,
    #[error("group id does not match the re-init proposal")]
    GroupIdMismatch,
    #[error("extensions do not match the re-init proposal")]
    ExtensionsMismatch,
    #[error("members of the original group are missing")]
    MembersMissing,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum BranchError {
    #[error("leaves {0:?} are blank")]
    BlankLeavesIncluded(Vec<LeafIndex>),
    #[error("key package does not belong to the member at leaf {0}")]
    KeyPackageMismatch(LeafIndex),
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("credential was rejected: {0}")]
    CredentialRejected(String),
    #[error("credential identity changed")]
    IdentityChanged,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ProposalError {
    #[error("key package version {0:?} does not match the group")]
    KeyPackageVersionMismatch(ProtocolVersion),
    #[error("key package cipher suite {0} does not match the group")]
    KeyPackageCipherSuiteMismatch(CipherSuite),
    #[error("key package signature is not valid")]
    InvalidKeyPackageSignature,
    #[error("key package lifetime is not valid")]
    KeyPackageExpired,
    #[error("key package init key equals its encryption key")]
    InitKeyEqualsEncryptionKey,
    #[error("leaf node signature is not valid")]
    InvalidLeafNodeSignature,
    #[error("leaf node has the wrong source")]
    InvalidLeafNodeSource,
    #[error("signature key already used in the tree")]
    DuplicateSignatureKey,
    #[error("encryption key already used in the tree")]
    DuplicateEncryptionKey,
    #[error("the committer cannot commit its own update proposal")]
    UpdateByCommitter,
    #[error("the committer cannot remove itself")]
    RemoveOfCommitter,
    #[error("leaf {0} is blank")]
    BlankLeaf(LeafIndex),
    #[error("leaf {0} is updated or removed more than once")]
    DuplicateUpdateOrRemove(LeafIndex),
    #[error("a re-init proposal must be the only proposal of a commit")]
    ReInitNotAlone,
    #[error("re-init cannot downgrade the protocol version")]
    ReInitVersionDowngrade,
    #[error("more than one group context extensions proposal")]
    MultipleGroupContextExtensions,
    #[error("extension is not supported by every member")]
    UnsupportedExtension,
    #[error("proposal type is not allowed in a resumption commit")]
    InvalidInResumption,
    #[error("proposal sender is not a member")]
    InvalidSender,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CommitError {
    #[error("confirmation tag does not match")]
    InvalidConfirmationTag,
    #[error("commit is missing its confirmation tag")]
    MissingConfirmationTag,
    #[error("commit signature is not valid")]
    InvalidSignature,
    #[error("commit requires a path but none was provided")]
    PathRequired,
    #[error("commit sender is not a member")]
    InvalidSender,
    #[error("a member cannot process its own commit")]
    OwnCommit,
    #[error("the group is suspended and does not accept commits")]
    GroupSuspended,
    #[error("commit removes the receiving member")]
    RemovedFromGroup,
}
