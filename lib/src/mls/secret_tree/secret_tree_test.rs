use crate::mls::crypto::provider::RustCryptoProvider;
use crate::mls::crypto::{cipher_suite::CipherSuite, provider::CryptoProvider, Secret};
use crate::mls::secret_tree::*;
use crate::mls::utilities::error::*;
use crate::mls::utilities::tree_math::{LeafIndex, NumLeaves};

const CIPHER_SUITE: CipherSuite = CipherSuite::MLS_128_DHKEMX25519_AES128GCM_SHA256_Ed25519;

fn new_tree(num_leaves: u32, max_generation_gap: u32) -> SecretTree {
    SecretTree::new(
        CIPHER_SUITE,
        NumLeaves(num_leaves),
        &Secret::new(vec![0x42; 32]),
        max_generation_gap,
    )
}

#[test]
fn first_key_follows_the_tree_derivation() -> Result<()> {
    let crypto_provider = RustCryptoProvider::default();
    let mut tree = new_tree(2, 10);

    let root = Secret::new(vec![0x42; 32]);
    let leaf = crypto_provider.expand_with_label(CIPHER_SUITE, root.as_bytes(), b"tree", b"left", 32)?;
    let handshake = crypto_provider.expand_with_label(CIPHER_SUITE, leaf.as_bytes(), b"handshake", &[], 32)?;
    let want_key = crypto_provider.expand_with_label(
        CIPHER_SUITE,
        handshake.as_bytes(),
        b"key",
        &0u32.to_be_bytes(),
        16,
    )?;
    let want_nonce = crypto_provider.expand_with_label(
        CIPHER_SUITE,
        handshake.as_bytes(),
        b"nonce",
        &0u32.to_be_bytes(),
        12,
    )?;

    let key = tree.next_key(&crypto_provider, LeafIndex(0), RatchetLabel::Handshake)?;
    assert_eq!(key.generation, 0);
    assert_eq!(key.key, want_key);
    assert_eq!(key.nonce, want_nonce);

    Ok(())
}

#[test]
fn sender_and_receiver_agree_on_keys() -> Result<()> {
    let crypto_provider = RustCryptoProvider::default();
    let mut sender = new_tree(4, 10);
    let mut receiver = new_tree(4, 10);

    for generation in 0..3 {
        let sent = sender.next_key(&crypto_provider, LeafIndex(2), RatchetLabel::Application)?;
        let received = receiver.key_for_generation(
            &crypto_provider,
            LeafIndex(2),
            RatchetLabel::Application,
            generation,
        )?;
        assert_eq!(sent, received);
    }

    Ok(())
}

#[test]
fn ratchets_are_independent_per_leaf_and_label() -> Result<()> {
    let crypto_provider = RustCryptoProvider::default();
    let mut tree = new_tree(4, 10);

    let a = tree.next_key(&crypto_provider, LeafIndex(0), RatchetLabel::Application)?;
    let b = tree.next_key(&crypto_provider, LeafIndex(0), RatchetLabel::Handshake)?;
    let c = tree.next_key(&crypto_provider, LeafIndex(3), RatchetLabel::Application)?;

    assert_ne!(a.key, b.key);
    assert_ne!(a.key, c.key);
    assert_ne!(b.key, c.key);

    Ok(())
}

#[test]
fn out_of_order_generations_are_served_once() -> Result<()> {
    let crypto_provider = RustCryptoProvider::default();
    let mut sender = new_tree(2, 10);
    let mut receiver = new_tree(2, 10);

    let keys: Vec<RatchetKey> = (0..4)
        .map(|_| sender.next_key(&crypto_provider, LeafIndex(1), RatchetLabel::Application))
        .collect::<Result<_>>()?;

    let third = receiver.key_for_generation(&crypto_provider, LeafIndex(1), RatchetLabel::Application, 3)?;
    assert_eq!(third, keys[3]);

    let first = receiver.key_for_generation(&crypto_provider, LeafIndex(1), RatchetLabel::Application, 1)?;
    assert_eq!(first, keys[1]);

    assert_eq!(
        receiver.key_for_generation(&crypto_provider, LeafIndex(1), RatchetLabel::Application, 1),
        Err(Error::GenerationInThePast(1))
    );
    assert_eq!(
        receiver.key_for_generation(&crypto_provider, LeafIndex(1), RatchetLabel::Application, 3),
        Err(Error::GenerationInThePast(3))
    );

    Ok(())
}

#[test]
fn generation_gap_is_bounded() {
    let crypto_provider = RustCryptoProvider::default();
    let mut tree = new_tree(2, 5);

    assert_eq!(
        tree.key_for_generation(&crypto_provider, LeafIndex(0), RatchetLabel::Handshake, 6),
        Err(Error::GenerationTooFarInFuture(6))
    );
    assert!(tree
        .key_for_generation(&crypto_provider, LeafIndex(0), RatchetLabel::Handshake, 5)
        .is_ok());
}

#[test]
fn leaf_outside_the_tree_is_rejected() {
    let crypto_provider = RustCryptoProvider::default();
    let mut tree = new_tree(2, 5);

    assert_eq!(
        tree.next_key(&crypto_provider, LeafIndex(2), RatchetLabel::Handshake),
        Err(Error::BlankLeaf(LeafIndex(2)))
    );
}
