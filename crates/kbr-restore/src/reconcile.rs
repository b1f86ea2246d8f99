//! Metadata-key reconciliation.
//!
//! A historical writer defect produced items whose declared protection class
//! disagrees with the class their key was actually wrapped under. Such items
//! are accepted and healed during restore: the corrective upsert rewrites the
//! class field that disagrees with the key that actually worked. Dropping
//! them during decode was considered upstream and deliberately not adopted;
//! there is no flag for it.

use kbr_codec::ItemMetadataKey;
use kbr_core::ClassId;

/// Consistency verdict for one item after the decryptor has tried the
/// declared class and, where eligible, the actual class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Declared == actual; the single unwrap path worked.
    Consistent,
    /// Declared != actual but one of the two keys unwrapped the item.
    /// `rewritten_to` is the class the corrective update settles on.
    RecoverableMismatch { declared: ClassId, actual: ClassId, rewritten_to: ClassId },
    /// No unwrap path succeeded.
    Unrecoverable { declared: ClassId, actual: ClassId },
}

/// Classify one item. `unwrapped_with` is the class whose key decrypted the
/// item, or `None` when every candidate failed.
pub fn classify(mkey: &ItemMetadataKey, unwrapped_with: Option<ClassId>) -> Reconciliation {
    let declared = mkey.keyclass;
    let actual = mkey.actual_keyclass;
    match unwrapped_with {
        None => Reconciliation::Unrecoverable { declared, actual },
        Some(class) if declared == actual => {
            debug_assert_eq!(class, declared);
            Reconciliation::Consistent
        }
        Some(class) => {
            Reconciliation::RecoverableMismatch { declared, actual, rewritten_to: class }
        }
    }
}

/// The corrective record for a recoverable mismatch: both class fields are
/// rewritten to the class whose key actually unwrapped the item. Wrapped key
/// material and the bag UUID pass through untouched.
pub fn healed_metadata_key(mkey: &ItemMetadataKey, rewritten_to: ClassId) -> ItemMetadataKey {
    ItemMetadataKey {
        keyclass: rewritten_to,
        actual_keyclass: rewritten_to,
        bag_uuid: mkey.bag_uuid,
        aks_wrapped_key: mkey.aks_wrapped_key.clone(),
        backup_wrapped_key: mkey.backup_wrapped_key.clone(),
    }
}
