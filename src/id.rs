//! Handler identifiers and sub-route keys.
//!
//! Every RPC method is addressed by a one-byte [`HandlerId`]. Ids have no
//! versioning, so an incompatible change to a handler needs a new id.
//! Several endpoints can share one id through a static subroute, addressed by
//! a [`SubHandlerId`].

use std::fmt;

use sha2::{Digest, Sha256};

/// Upper bound of the handler id space.
pub const MAX_HANDLERS: usize = 255;

/// Trace prefix for handlers without an explicit one.
pub const DEFAULT_TRACE_PREFIX: &str = "grid";

const LOCK_PREFIX: &str = "lockR";
const STORAGE_PREFIX: &str = "storageR";
const BOOTSTRAP_PREFIX: &str = "bootstrap";

/// Handler identifier, used to route requests on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u8);

struct HandlerInfo {
    name: &'static str,
    prefix: Option<&'static str>,
}

macro_rules! handler_ids {
    ($($(#[$meta:meta])* $konst:ident = $value:literal => $name:literal $(, $prefix:expr)?;)+) => {
        impl HandlerId {
            $(
                $(#[$meta])*
                pub const $konst: HandlerId = HandlerId($value);
            )+
        }

        const HANDLER_TABLE: &[HandlerInfo] = &[
            $(HandlerInfo { name: $name, prefix: handler_ids!(@prefix $($prefix)?) },)+
        ];
    };
    (@prefix) => { None };
    (@prefix $prefix:expr) => { Some($prefix) };
}

// Add new handlers above TEST. Values must stay contiguous.
handler_ids! {
    /// Reserved to catch uninitialized values.
    INVALID = 0 => "Invalid";
    LOCK_LOCK = 1 => "LockLock", LOCK_PREFIX;
    LOCK_RLOCK = 2 => "LockRLock", LOCK_PREFIX;
    LOCK_UNLOCK = 3 => "LockUnlock", LOCK_PREFIX;
    LOCK_RUNLOCK = 4 => "LockRUnlock", LOCK_PREFIX;
    LOCK_REFRESH = 5 => "LockRefresh", LOCK_PREFIX;
    LOCK_FORCE_UNLOCK = 6 => "LockForceUnlock", LOCK_PREFIX;
    WALK_DIR = 7 => "WalkDir", STORAGE_PREFIX;
    STAT_VOL = 8 => "StatVol", STORAGE_PREFIX;
    DISK_INFO = 9 => "DiskInfo", STORAGE_PREFIX;
    NS_SCANNER = 10 => "NSScanner", STORAGE_PREFIX;
    READ_XL = 11 => "ReadXL", STORAGE_PREFIX;
    READ_VERSION = 12 => "ReadVersion", STORAGE_PREFIX;
    DELETE_FILE = 13 => "DeleteFile", STORAGE_PREFIX;
    DELETE_VERSION = 14 => "DeleteVersion", STORAGE_PREFIX;
    UPDATE_METADATA = 15 => "UpdateMetadata", STORAGE_PREFIX;
    WRITE_METADATA = 16 => "WriteMetadata", STORAGE_PREFIX;
    CHECK_PARTS = 17 => "CheckParts", STORAGE_PREFIX;
    RENAME_DATA = 18 => "RenameData", STORAGE_PREFIX;
    SERVER_VERIFY = 19 => "ServerVerify", BOOTSTRAP_PREFIX;
    /// First id of the test-only range.
    TEST = 20 => "Test";
    /// Last id of the test-only range.
    TEST2 = 21 => "Test2";
}

/// Number of handler ids in use, including the reserved invalid id.
pub const HANDLER_LAST: usize = HANDLER_TABLE.len();

const _: () = check_handler_space(HANDLER_LAST);

/// Panics if `count` ids do not fit in the handler space.
///
/// Evaluated at compile time for the id table. Widen `HandlerId` when this fires.
pub const fn check_handler_space(count: usize) {
    if count > MAX_HANDLERS {
        panic!("out of handler IDs: handler table exceeds 255 entries");
    }
}

impl HandlerId {
    /// Raw id value.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Look up an id from its raw value. Returns `None` outside the table.
    pub const fn from_u8(value: u8) -> Option<Self> {
        if (value as usize) < HANDLER_LAST {
            Some(HandlerId(value))
        } else {
            None
        }
    }

    /// True unless the id is the reserved invalid id or outside the table.
    #[inline]
    pub const fn valid(self) -> bool {
        self.0 != Self::INVALID.0 && (self.0 as usize) < HANDLER_LAST
    }

    /// True for ids reserved for tests.
    #[inline]
    pub const fn is_test_handler(self) -> bool {
        self.0 >= Self::TEST.0 && self.0 <= Self::TEST2.0
    }

    /// Prefix used to group this handler in traces.
    pub fn trace_prefix(self) -> &'static str {
        HANDLER_TABLE
            .get(self.0 as usize)
            .and_then(|info| info.prefix)
            .unwrap_or(DEFAULT_TRACE_PREFIX)
    }

    /// Table index of this id.
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match HANDLER_TABLE.get(self.0 as usize) {
            Some(info) => f.write_str(info.name),
            None => write!(f, "HandlerId({})", self.0),
        }
    }
}

/// Routing key for a handler registered under a static subroute.
///
/// SHA-256 of the subroute, with byte 0 replaced by the handler id and
/// byte 1 reserved (always 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubHandlerId([u8; 32]);

impl SubHandlerId {
    /// Derive the key for `id` under `subroute`.
    pub fn new(id: HandlerId, subroute: &str) -> Self {
        let digest: [u8; 32] = Sha256::digest(subroute.as_bytes()).into();
        Self(digest).with_handler(id)
    }

    /// Key for `id` with no subroute: id in byte 0, every other byte zero.
    pub fn zero(id: HandlerId) -> Self {
        let mut b = [0u8; 32];
        b[0] = id.as_u8();
        Self(b)
    }

    /// Same route hash, stamped with another handler id.
    #[must_use]
    pub fn with_handler(mut self, id: HandlerId) -> Self {
        self.0[0] = id.as_u8();
        self.0[1] = 0; // reserved
        self
    }

    /// Handler id stored in byte 0.
    #[inline]
    pub fn handler(&self) -> u8 {
        self.0[0]
    }

    /// Raw 32-byte key.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for SubHandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_contiguous() {
        assert_eq!(HANDLER_LAST, HandlerId::TEST2.as_u8() as usize + 1);
        for (i, _) in HANDLER_TABLE.iter().enumerate() {
            assert_eq!(HandlerId::from_u8(i as u8).map(HandlerId::index), Some(i));
        }
    }

    #[test]
    fn test_valid() {
        assert!(!HandlerId::INVALID.valid());
        assert!(HandlerId::LOCK_LOCK.valid());
        assert!(HandlerId::DISK_INFO.valid());
        assert!(HandlerId::TEST2.valid());
        assert!(!HandlerId(HANDLER_LAST as u8).valid());
        assert!(!HandlerId(255).valid());
        assert_eq!(HandlerId::from_u8(255), None);
    }

    #[test]
    fn test_is_test_handler() {
        assert!(HandlerId::TEST.is_test_handler());
        assert!(HandlerId::TEST2.is_test_handler());
        assert!(!HandlerId::SERVER_VERIFY.is_test_handler());
        assert!(!HandlerId::INVALID.is_test_handler());
    }

    #[test]
    fn test_trace_prefixes() {
        assert_eq!(HandlerId::LOCK_REFRESH.trace_prefix(), "lockR");
        assert_eq!(HandlerId::RENAME_DATA.trace_prefix(), "storageR");
        assert_eq!(HandlerId::SERVER_VERIFY.trace_prefix(), "bootstrap");
        assert_eq!(HandlerId::TEST.trace_prefix(), DEFAULT_TRACE_PREFIX);
        assert_eq!(HandlerId(200).trace_prefix(), DEFAULT_TRACE_PREFIX);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(HandlerId::DISK_INFO.to_string(), "DiskInfo");
        assert_eq!(HandlerId::NS_SCANNER.to_string(), "NSScanner");
        assert_eq!(HandlerId(250).to_string(), "HandlerId(250)");
    }

    #[test]
    fn test_handler_space_fits() {
        check_handler_space(HANDLER_LAST);
        check_handler_space(MAX_HANDLERS);
    }

    #[test]
    #[should_panic(expected = "out of handler IDs")]
    fn test_handler_space_overflow_panics() {
        check_handler_space(MAX_HANDLERS + 1);
    }

    #[test]
    fn test_sub_handler_id_layout() {
        let sub = SubHandlerId::new(HandlerId::WALK_DIR, "disk1");
        let digest: [u8; 32] = Sha256::digest(b"disk1").into();

        assert_eq!(sub.as_bytes()[0], HandlerId::WALK_DIR.as_u8());
        assert_eq!(sub.as_bytes()[1], 0);
        assert_eq!(&sub.as_bytes()[2..], &digest[2..]);
        assert_eq!(sub.handler(), HandlerId::WALK_DIR.as_u8());
    }

    #[test]
    fn test_sub_handler_id_deterministic() {
        let a = SubHandlerId::new(HandlerId::READ_XL, "pool-0/set-3");
        let b = SubHandlerId::new(HandlerId::READ_XL, "pool-0/set-3");
        let c = SubHandlerId::new(HandlerId::READ_XL, "pool-0/set-4");
        let d = SubHandlerId::new(HandlerId::READ_VERSION, "pool-0/set-3");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_with_handler_restamps() {
        let a = SubHandlerId::new(HandlerId::READ_XL, "route");
        let b = a.with_handler(HandlerId::READ_VERSION);
        assert_eq!(b, SubHandlerId::new(HandlerId::READ_VERSION, "route"));
        assert_eq!(&a.as_bytes()[2..], &b.as_bytes()[2..]);
    }

    #[test]
    fn test_zero_sub_handler_id() {
        let z = SubHandlerId::zero(HandlerId::STAT_VOL);
        assert_eq!(z.as_bytes()[0], HandlerId::STAT_VOL.as_u8());
        assert!(z.as_bytes()[1..].iter().all(|&b| b == 0));
        assert_ne!(z, SubHandlerId::new(HandlerId::STAT_VOL, ""));
    }

    #[test]
    fn test_sub_handler_id_hex() {
        let z = SubHandlerId::zero(HandlerId::DISK_INFO);
        let s = z.to_string();
        assert_eq!(s.len(), 64);
        assert!(s.starts_with("09"));
        assert!(s[2..].chars().all(|c| c == '0'));
    }
}
