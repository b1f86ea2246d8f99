//! End-to-end restore tests over writer-produced containers.
//!
//! Fixtures are built with the real writer + seal path, then restored into a
//! MemoryStore; every test asserts on the report and the store together.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use secrecy::SecretString;

use kbr_codec::{
    item_digest, parse_envelope, write_envelope, BackupEnvelope, ClassKeyEntry, EncodedItem,
    ItemMetadataKey,
};
use kbr_core::{ClassId, ContainerType, Uuid16, WrapType};
use kbr_crypto::{
    build_keyring, generate_class_key, generate_item_key, seal_blob, wrap_class_key,
    wrap_item_key, BlobRole, ClassKey, KeyProvider, StandardProvider,
};
use kbr_restore::{
    decode_outcomes, restore, ItemStatus, ItemStore, MemoryStore, RestoreError, RestoreOptions,
};

const PASSPHRASE: &str = "correct horse battery staple";
const ITERATIONS: u32 = 1_337;

fn secret() -> SecretString {
    SecretString::from(PASSPHRASE)
}

fn passphrase_entry(class: u32, key: &ClassKey) -> ClassKeyEntry {
    let salt = vec![class as u8; 20];
    let kek = StandardProvider.derive_key(&secret(), &salt, ITERATIONS);
    ClassKeyEntry {
        uuid: Uuid16([class as u8; 16]),
        class: ClassId(class),
        wrap: WrapType::Passphrase,
        salt: Some(salt),
        iterations: Some(ITERATIONS),
        wrapped_key: Some(wrap_class_key(&kek, key).unwrap()),
        plain_key: None,
    }
}

fn plain_entry(class: u32, key: &ClassKey) -> ClassKeyEntry {
    ClassKeyEntry {
        uuid: Uuid16([class as u8; 16]),
        class: ClassId(class),
        wrap: WrapType::None,
        salt: None,
        iterations: None,
        wrapped_key: None,
        plain_key: Some(key.as_bytes().to_vec()),
    }
}

/// An item declaring `declared`/`actual` keyclasses whose key is really
/// wrapped under `wrap_under`.
fn make_item(declared: u32, actual: u32, wrap_under: &ClassKey, acct: &str) -> EncodedItem {
    let attrs = serde_json::json!({ "svce": "mail", "acct": acct, "agrp": "com.example" })
        .to_string()
        .into_bytes();
    let digest = item_digest(&attrs);
    let item_key = generate_item_key();
    EncodedItem {
        class: ClassId(declared),
        digest,
        metadata_key: ItemMetadataKey {
            keyclass: ClassId(declared),
            actual_keyclass: ClassId(actual),
            bag_uuid: None,
            aks_wrapped_key: None,
            backup_wrapped_key: Some(wrap_item_key(wrap_under, &item_key).unwrap()),
        },
        attributes: seal_blob(&item_key, &digest, BlobRole::Attributes, &attrs).unwrap(),
        secret_data: seal_blob(
            &item_key,
            &digest,
            BlobRole::SecretData,
            format!("secret-{acct}").as_bytes(),
        )
        .unwrap(),
    }
}

fn envelope(class_keys: Vec<ClassKeyEntry>, items: Vec<EncodedItem>) -> BackupEnvelope {
    BackupEnvelope {
        version: 3,
        container_type: ContainerType::Full,
        uuid: Uuid16([0xC0; 16]),
        integrity_key: vec![0u8; 40],
        class_keys,
        items,
    }
}

#[test]
fn restores_every_item_across_classes() {
    let k6 = generate_class_key();
    let k11 = generate_class_key();
    let env = envelope(
        vec![passphrase_entry(6, &k6), plain_entry(11, &k11)],
        vec![
            make_item(6, 6, &k6, "alice"),
            make_item(6, 6, &k6, "bob"),
            make_item(11, 11, &k11, "carol"),
        ],
    );
    let bytes = write_envelope(&env);

    let mut store = MemoryStore::new();
    let report = restore(
        &bytes,
        &secret(),
        &StandardProvider,
        &mut store,
        &RestoreOptions::default(),
    )
    .unwrap();

    assert!(report.completed);
    assert!(report.locked_classes.is_empty());
    assert_eq!(report.totals.inserted, 3);
    assert_eq!(report.totals.skipped(), 0);
    assert_eq!(store.len(), 3);

    let stored = store.query(&env.items[0].digest).unwrap();
    assert_eq!(stored.attributes["acct"], "alice");
    assert_eq!(stored.secret_data, b"secret-alice");
}

#[test]
fn corrupted_item_is_isolated_at_every_position() {
    let k11 = generate_class_key();
    let accounts = ["a", "b", "c", "d", "e"];

    for corrupt_at in 0..accounts.len() {
        let mut items: Vec<EncodedItem> =
            accounts.iter().map(|acct| make_item(11, 11, &k11, acct)).collect();
        // flip one ciphertext byte past the blob header
        let blob = &mut items[corrupt_at].secret_data;
        let idx = blob.len() - 1;
        blob[idx] ^= 0xFF;

        let env = envelope(vec![plain_entry(11, &k11)], items);
        let mut store = MemoryStore::new();
        let report = restore(
            &write_envelope(&env),
            &secret(),
            &StandardProvider,
            &mut store,
            &RestoreOptions::default(),
        )
        .unwrap();

        assert_eq!(report.totals.inserted, accounts.len() - 1, "position {corrupt_at}");
        assert_eq!(report.totals.skipped_malformed, 1, "position {corrupt_at}");
        for (i, item) in report.items.iter().enumerate() {
            let expected =
                if i == corrupt_at { ItemStatus::SkippedMalformed } else { ItemStatus::Inserted };
            assert_eq!(item.status, expected, "position {corrupt_at}, item {i}");
        }
        assert_eq!(store.len(), accounts.len() - 1);
    }
}

#[test]
fn inconsistent_keyclass_is_healed_not_failed() {
    let k6 = generate_class_key();
    let k9 = generate_class_key();
    // item claims class 6 but its key was wrapped under class 9
    let env = envelope(
        vec![passphrase_entry(6, &k6), passphrase_entry(9, &k9)],
        vec![make_item(6, 9, &k9, "mismatched")],
    );

    let mut store = MemoryStore::new();
    let report = restore(
        &write_envelope(&env),
        &secret(),
        &StandardProvider,
        &mut store,
        &RestoreOptions::default(),
    )
    .unwrap();

    assert_eq!(report.totals.inserted, 1);
    let item = &report.items[0];
    assert_eq!(item.status, ItemStatus::Inserted);
    assert_eq!(item.unwrapped_with, Some(ClassId(9)));
    let healed = item.healed.expect("mismatch must be reported as healed");
    assert_eq!(healed.declared, ClassId(6));
    assert_eq!(healed.actual, ClassId(9));
    assert_eq!(healed.rewritten_to, ClassId(9));

    // the corrective upsert stored a consistent record
    let stored = store.query(&env.items[0].digest).unwrap();
    assert!(stored.metadata_key.is_consistent());
    assert_eq!(stored.metadata_key.keyclass, ClassId(9));
}

#[test]
fn wrong_passphrase_skips_items_under_locked_classes() {
    let k6 = generate_class_key();
    let k11 = generate_class_key();
    let env = envelope(
        vec![passphrase_entry(6, &k6), plain_entry(11, &k11)],
        vec![make_item(6, 6, &k6, "locked-out"), make_item(11, 11, &k11, "survivor")],
    );

    let mut store = MemoryStore::new();
    let report = restore(
        &write_envelope(&env),
        &SecretString::from("not the passphrase"),
        &StandardProvider,
        &mut store,
        &RestoreOptions::default(),
    )
    .unwrap();

    assert_eq!(report.locked_classes.len(), 1);
    assert_eq!(report.locked_classes[0].class, ClassId(6));
    assert_eq!(report.totals.skipped_locked_class, 1);
    assert_eq!(report.totals.inserted, 1);
    assert_eq!(report.items[0].status, ItemStatus::SkippedLockedClass);
    assert_eq!(report.items[1].status, ItemStatus::Inserted);
    assert_eq!(store.len(), 1);
    assert!(store.query(&env.items[1].digest).is_some());
}

// The concrete scenario: one always-available class, one item. Corrupting a
// byte of the item's blob length field fails only that item (the envelope
// still parses); corrupting the outer structure fails the whole restore.
#[test]
fn blob_corruption_is_item_scoped_but_outer_corruption_is_fatal() {
    let k11 = generate_class_key();
    let env = envelope(vec![plain_entry(11, &k11)], vec![make_item(11, 11, &k11, "only")]);

    // clean restore decodes the expected attribute set
    let mut store = MemoryStore::new();
    let report = restore(
        &write_envelope(&env),
        &secret(),
        &StandardProvider,
        &mut store,
        &RestoreOptions::default(),
    )
    .unwrap();
    assert_eq!(report.totals.inserted, 1);
    let stored = store.query(&env.items[0].digest).unwrap();
    assert_eq!(stored.attributes["svce"], "mail");
    assert_eq!(stored.attributes["acct"], "only");

    // corrupt the data blob's ciphertext-length header field
    let mut corrupted = env.clone();
    corrupted.items[0].secret_data[9] ^= 0x01;
    let mut store = MemoryStore::new();
    let report = restore(
        &write_envelope(&corrupted),
        &secret(),
        &StandardProvider,
        &mut store,
        &RestoreOptions::default(),
    )
    .unwrap();
    assert_eq!(report.totals.skipped_malformed, 1, "blob corruption stays item-scoped");
    assert!(store.is_empty());

    // corrupt the outer structure: truncate inside a TLV length
    let bytes = write_envelope(&env);
    let mut store = MemoryStore::new();
    let err = restore(
        &bytes[..bytes.len() - 7],
        &secret(),
        &StandardProvider,
        &mut store,
        &RestoreOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, RestoreError::Malformed(_)), "{err:?}");
}

#[test]
fn re_restore_updates_instead_of_inserting() {
    let k11 = generate_class_key();
    let env = envelope(
        vec![plain_entry(11, &k11)],
        vec![make_item(11, 11, &k11, "x"), make_item(11, 11, &k11, "y")],
    );
    let bytes = write_envelope(&env);

    let mut store = MemoryStore::new();
    let first =
        restore(&bytes, &secret(), &StandardProvider, &mut store, &RestoreOptions::default())
            .unwrap();
    assert_eq!(first.totals.inserted, 2);

    let second =
        restore(&bytes, &secret(), &StandardProvider, &mut store, &RestoreOptions::default())
            .unwrap();
    assert_eq!(second.totals.inserted, 0);
    assert_eq!(second.totals.updated, 2, "idempotent upsert keyed by digest");
    assert_eq!(store.len(), 2);
}

#[test]
fn parallel_restore_matches_serial() {
    let k6 = generate_class_key();
    let k11 = generate_class_key();
    let items: Vec<EncodedItem> = (0..8)
        .map(|i| {
            if i % 2 == 0 {
                make_item(6, 6, &k6, &format!("even-{i}"))
            } else {
                make_item(11, 11, &k11, &format!("odd-{i}"))
            }
        })
        .collect();
    let env = envelope(vec![passphrase_entry(6, &k6), plain_entry(11, &k11)], items);
    let bytes = write_envelope(&env);

    let mut serial_store = MemoryStore::new();
    let serial =
        restore(&bytes, &secret(), &StandardProvider, &mut serial_store, &RestoreOptions::default())
            .unwrap();

    let mut parallel_store = MemoryStore::new();
    let parallel = restore(
        &bytes,
        &secret(),
        &StandardProvider,
        &mut parallel_store,
        &RestoreOptions { parallelism: 4, cancel: None },
    )
    .unwrap();

    assert_eq!(serial.totals, parallel.totals);
    assert_eq!(serial_store.len(), parallel_store.len());
    // report order mirrors envelope stream order in both modes
    let serial_digests: Vec<_> = serial.items.iter().map(|i| i.digest).collect();
    let parallel_digests: Vec<_> = parallel.items.iter().map(|i| i.digest).collect();
    assert_eq!(serial_digests, parallel_digests);
}

#[test]
fn preset_cancellation_stops_before_any_item() {
    let k11 = generate_class_key();
    let env = envelope(vec![plain_entry(11, &k11)], vec![make_item(11, 11, &k11, "never")]);

    let cancel = Arc::new(AtomicBool::new(true));

    let mut store = MemoryStore::new();
    let report = restore(
        &write_envelope(&env),
        &secret(),
        &StandardProvider,
        &mut store,
        &RestoreOptions { parallelism: 0, cancel: Some(cancel) },
    )
    .unwrap();

    assert!(!report.completed);
    assert!(report.items.is_empty());
    assert!(store.is_empty());
}

#[test]
fn decode_outcomes_streams_in_envelope_order() {
    let k11 = generate_class_key();
    let env = envelope(
        vec![plain_entry(11, &k11)],
        vec![make_item(11, 11, &k11, "first"), make_item(11, 11, &k11, "second")],
    );
    let bytes = write_envelope(&env);
    let parsed = parse_envelope(&bytes).unwrap();

    let keyring = build_keyring(&parsed.class_keys, &secret(), &StandardProvider);
    let provider = StandardProvider;
    let mut outcomes = decode_outcomes(&provider, &keyring, &parsed);

    let first = outcomes.next().unwrap();
    assert_eq!(first.digest, env.items[0].digest);
    let (decoded, _) = first.result.unwrap();
    assert_eq!(decoded.attributes["acct"], "first");

    let second = outcomes.next().unwrap();
    assert_eq!(second.digest, env.items[1].digest);
    assert!(outcomes.next().is_none());
}
