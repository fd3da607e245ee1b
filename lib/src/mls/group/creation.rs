use bytes::Bytes;

use crate::mls::auth::AuthenticationService;
use crate::mls::crypto::config::CryptoConfig;
use crate::mls::crypto::credential::Credential;
use crate::mls::crypto::key_pair::SignatureKeyPair;
use crate::mls::crypto::provider::CryptoProvider;
use crate::mls::crypto::Secret;
use crate::mls::extensibility::list::MlsExtension;
use crate::mls::extensibility::{ExtensionType, Extensions, RatchetTreeExtension};
use crate::mls::framing::group_info::GroupInfo;
use crate::mls::framing::welcome::Welcome;
use crate::mls::framing::MlsGroupId;
use crate::mls::group::config::GroupConfig;
use crate::mls::group::transcript::{verify_confirmation_tag, ConfirmedTranscriptHash};
use crate::mls::group::{random_group_id, ActiveGroup};
use crate::mls::key_package::KeyPackageBundle;
use crate::mls::key_schedule::{extract_welcome_secret, GroupContext, KeySchedule};
use crate::mls::psk::{
    calculate_psk_secret, validate_psk_ids, PreSharedKeyId, PskLookup, PskResolver,
    ResumptionPskHistory, ResumptionPskUsage,
};
use crate::mls::ratchet_tree::leaf_node::Capabilities;
use crate::mls::ratchet_tree::tree_kem::TreePrivateKeys;
use crate::mls::ratchet_tree::RatchetTree;
use crate::mls::secret_tree::SecretTree;
use crate::mls::utilities::error::{Error, Result};
use crate::mls::utilities::serde::Deserializer;
use crate::mls::utilities::tree_math::LeafIndex;

/// Group joined from a `Welcome`, with the PSKs its first epoch was keyed with.
pub(crate) struct JoinedGroup {
    pub(crate) group: ActiveGroup,
    pub(crate) psks: Vec<PreSharedKeyId>,
}

impl ActiveGroup {
    /// Creates a group at epoch 0 whose only member is the caller.
    ///
    /// A random group id is picked when `group_id` is `None`.
    pub fn new(
        crypto_provider: &impl CryptoProvider,
        config: GroupConfig,
        credential: Credential,
        signature_key_pair: SignatureKeyPair,
        group_id: Option<MlsGroupId>,
    ) -> Result<Self> {
        let crypto_config = config.crypto_config;
        let mut capabilities = Capabilities::with_crypto_provider(crypto_provider);
        capabilities.extensions = config.extensions.extension_types().collect();

        let bundle = KeyPackageBundle::new(
            crypto_provider,
            crypto_config.version,
            crypto_config.cipher_suite,
            credential,
            signature_key_pair,
            capabilities,
            Extensions::default(),
        )?;

        Self::from_key_package_bundle(crypto_provider, config, group_id, bundle)
    }

    /// Creates a group at epoch 0 with the leaf of `bundle` as its only member.
    pub fn from_key_package_bundle(
        crypto_provider: &impl CryptoProvider,
        config: GroupConfig,
        group_id: Option<MlsGroupId>,
        bundle: KeyPackageBundle,
    ) -> Result<Self> {
        let cipher_suite = config.crypto_config.cipher_suite;
        if !crypto_provider.supports(cipher_suite) {
            return Err(Error::UnsupportedCipherSuite);
        }
        if bundle.key_package.cipher_suite != cipher_suite {
            return Err(Error::CipherSuiteMismatch(bundle.key_package.cipher_suite));
        }

        let group_id = group_id.unwrap_or_else(random_group_id);

        let own_leaf = LeafIndex(0);
        let tree = RatchetTree::new(bundle.key_package.leaf_node.clone());
        let private_keys = TreePrivateKeys::from_leaf(own_leaf, bundle.encryption_key_pair);

        let context = GroupContext {
            version: config.crypto_config.version,
            cipher_suite,
            group_id,
            epoch: 0,
            tree_hash: tree.compute_root_tree_hash(crypto_provider, cipher_suite)?,
            confirmed_transcript_hash: Bytes::new(),
            extensions: config.extensions.clone(),
        };

        let key_schedule = KeySchedule::initial(crypto_provider, cipher_suite)?;
        // The confirmation tag of epoch 0 is computed over an empty confirmed transcript hash.
        let confirmation_tag = key_schedule.confirmation_tag(crypto_provider, &[])?;
        let transcript = ConfirmedTranscriptHash::from_confirmed(
            crypto_provider,
            cipher_suite,
            Bytes::new(),
            &confirmation_tag,
        )?;

        let secret_tree = SecretTree::new(
            cipher_suite,
            tree.num_leaves(),
            key_schedule.encryption_secret(),
            config.max_generation_gap,
        );

        let mut resumption_psks = ResumptionPskHistory::new(config.resumption_psk_history);
        resumption_psks.push(0, key_schedule.resumption_psk().clone());

        log::debug!(
            "created group with cipher suite {:?} at epoch 0",
            cipher_suite
        );

        Ok(Self {
            config,
            own_leaf,
            context,
            tree,
            private_keys,
            key_schedule,
            secret_tree,
            transcript,
            confirmation_tag,
            pending_proposals: vec![],
            pending_leaf_keys: vec![],
            resumption_psks,
            signature_key_pair: bundle.signature_key_pair,
        })
    }

    /// As described in `https://www.rfc-editor.org/rfc/rfc9420.html#name-joining-via-welcome-message`
    ///
    /// `ratchet_tree` must be given when the `GroupInfo` carries no ratchet tree extension.
    pub async fn join(
        crypto_provider: &impl CryptoProvider,
        auth_service: &impl AuthenticationService,
        psk_lookup: &impl PskLookup,
        welcome: &Welcome,
        bundle: &KeyPackageBundle,
        ratchet_tree: Option<RatchetTree>,
        config: GroupConfig,
    ) -> Result<Self> {
        let joined = Self::join_with_psks(
            crypto_provider,
            auth_service,
            psk_lookup,
            welcome,
            bundle,
            ratchet_tree,
            config,
            None,
            None,
        )
        .await?;

        Ok(joined.group)
    }

    /// Processes a `Welcome`. `source` resolves the resumption PSK of the group being resumed
    /// and `resumption` is the kind of resumption the `Welcome` must perform.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn join_with_psks(
        crypto_provider: &impl CryptoProvider,
        auth_service: &impl AuthenticationService,
        psk_lookup: &impl PskLookup,
        welcome: &Welcome,
        bundle: &KeyPackageBundle,
        ratchet_tree: Option<RatchetTree>,
        config: GroupConfig,
        source: Option<(&MlsGroupId, u64, &Secret)>,
        resumption: Option<ResumptionPskUsage>,
    ) -> Result<JoinedGroup> {
        let key_package = &bundle.key_package;
        let cipher_suite = key_package.cipher_suite;
        if welcome.cipher_suite() != cipher_suite {
            return Err(Error::CipherSuiteMismatch(welcome.cipher_suite()));
        }

        // https://www.rfc-editor.org/rfc/rfc9420.html#section-12.4.3.1-8.1
        let key_package_ref = key_package.generate_ref(crypto_provider)?;
        if welcome.find_secret(&key_package_ref).is_none() {
            return Err(Error::NoMatchingKeyPackage);
        }
        let group_secrets = welcome.decrypt_group_secrets(
            crypto_provider,
            &key_package_ref,
            bundle.init_key_pair.private_key.as_bytes(),
        )?;

        validate_psk_ids(crypto_provider, cipher_suite, &group_secrets.psks, resumption)?;
        let resolved = PskResolver {
            own: None,
            source,
            lookup: psk_lookup,
        }
        .resolve(&group_secrets.psks)
        .await?;
        let psk_secret = calculate_psk_secret(crypto_provider, cipher_suite, &resolved)?;

        let welcome_secret = extract_welcome_secret(
            crypto_provider,
            cipher_suite,
            &group_secrets.joiner_secret,
            &psk_secret,
        )?;
        let group_info = welcome.decrypt_group_info(crypto_provider, welcome_secret.as_bytes())?;
        let context = group_info.group_context.clone();

        if context.version != key_package.version {
            return Err(Error::UnsupportedProtocolVersion(context.version));
        }
        if context.cipher_suite != cipher_suite {
            return Err(Error::CipherSuiteMismatch(context.cipher_suite));
        }

        let tree = match ratchet_tree {
            Some(tree) => tree,
            None => {
                let data = group_info
                    .extensions
                    .find_extension_data(ExtensionType::RatchetTree)
                    .ok_or(Error::NoRatchetTreeInGroup)?;
                RatchetTree::deserialize_exact(data)?
            }
        };
        tree.verify_integrity(crypto_provider, &context)?;

        let signer = tree
            .get_leaf(group_info.signer)
            .ok_or(Error::BlankLeaf(group_info.signer))?;
        group_info.verify_signature(crypto_provider, &signer.signature_key)?;

        for (_, leaf) in tree.leaves() {
            auth_service.authenticate_credential(leaf).await?;
        }

        let own_leaf = tree
            .find_leaf(&key_package.leaf_node)
            .ok_or(Error::OwnLeafNotFound)?;
        let mut private_keys =
            TreePrivateKeys::from_leaf(own_leaf, bundle.encryption_key_pair.clone());
        if let Some(path_secret) = &group_secrets.path_secret {
            let start = tree
                .common_ancestor_position(group_info.signer, own_leaf)
                .ok_or(Error::NoDecryptablePathSecret)?;
            let derived = tree.derive_path_keys(
                crypto_provider,
                cipher_suite,
                group_info.signer,
                start,
                path_secret.clone(),
            )?;
            for (node, key_pair) in derived.key_pairs {
                private_keys.insert(node, key_pair);
            }
        }

        let key_schedule = KeySchedule::from_joiner_secret(
            crypto_provider,
            &group_secrets.joiner_secret,
            &psk_secret,
            &context,
        )?;
        verify_confirmation_tag(
            crypto_provider,
            cipher_suite,
            key_schedule.confirmation_key(),
            &context.confirmed_transcript_hash,
            &group_info.confirmation_tag,
        )?;
        let transcript = ConfirmedTranscriptHash::from_confirmed(
            crypto_provider,
            cipher_suite,
            context.confirmed_transcript_hash.clone(),
            &group_info.confirmation_tag,
        )?;

        let secret_tree = SecretTree::new(
            cipher_suite,
            tree.num_leaves(),
            key_schedule.encryption_secret(),
            config.max_generation_gap,
        );
        let mut resumption_psks = ResumptionPskHistory::new(config.resumption_psk_history);
        resumption_psks.push(context.epoch, key_schedule.resumption_psk().clone());

        log::debug!(
            "joined group at epoch {} as leaf {} of {}",
            context.epoch,
            own_leaf,
            tree.member_count()
        );

        let config = config.resumed(
            CryptoConfig::new(context.version, cipher_suite),
            context.extensions.clone(),
        );

        Ok(JoinedGroup {
            group: Self {
                config,
                own_leaf,
                context,
                tree,
                private_keys,
                key_schedule,
                secret_tree,
                transcript,
                confirmation_tag: group_info.confirmation_tag,
                pending_proposals: vec![],
                pending_leaf_keys: vec![],
                resumption_psks,
                signature_key_pair: bundle.signature_key_pair.clone(),
            },
            psks: group_secrets.psks,
        })
    }

    /// Signed `GroupInfo` of the current epoch, carrying the ratchet tree.
    pub fn group_info(&self, crypto_provider: &impl CryptoProvider) -> Result<GroupInfo> {
        let extensions = Extensions::try_from(vec![MlsExtension::RatchetTree(
            RatchetTreeExtension::new(self.tree.clone()),
        )])?;

        GroupInfo::new(
            crypto_provider,
            self.context.clone(),
            extensions,
            self.confirmation_tag.clone(),
            self.own_leaf,
            self.signature_key_pair.private_key(),
        )
    }
}
