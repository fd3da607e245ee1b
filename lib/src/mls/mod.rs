//! [RFC9420](https://www.rfc-editor.org/rfc/rfc9420.html) Messaging Layer Security
//!
//! The epoch core of an MLS client: the key schedule, pre-shared keys, transcript hashes and the
//! group state machine that moves from one epoch to the next, together with the ratchet tree,
//! the secret tree and the wire codec they depend on.
//!
//! A group is either an [`group::ActiveGroup`] or, once a `ReInit` proposal has been committed,
//! a [`group::SuspendedGroup`] that can only be used to start its successor.

pub mod auth;
pub mod crypto;
pub mod extensibility;
pub mod framing;
pub mod group;
pub mod key_package;
pub mod key_schedule;
pub mod psk;
pub mod ratchet_tree;
pub mod secret_tree;
pub mod utilities;
