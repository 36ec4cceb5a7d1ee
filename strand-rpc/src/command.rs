//! Command opcodes understood by storage partitions.
//!
//! Each opcode carries an explicit wire discriminant and a fixed argument
//! arity. The locked variants are the same operations issued under a
//! client-held partition lock; partitions admit them while locked.

/// A storage command opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandId {
    /// Membership test for one key.
    Exists = 0,
    /// Read the value of one key.
    Get = 1,
    /// Insert a key that must not already exist.
    Put = 2,
    /// Replace the value of an existing key.
    Update = 3,
    /// Delete one key.
    Remove = 4,
    /// Count the keys held by the partition.
    NumKeys = 5,
    /// Acquire the partition lock.
    Lock = 6,
    /// Release the partition lock.
    Unlock = 7,
    /// [`CommandId::Get`] under a held lock.
    LockedGet = 8,
    /// [`CommandId::Put`] under a held lock.
    LockedPut = 9,
    /// [`CommandId::Update`] under a held lock.
    LockedUpdate = 10,
    /// [`CommandId::Remove`] under a held lock.
    LockedRemove = 11,
}

impl CommandId {
    /// Number of arguments one logical operation of this opcode consumes.
    ///
    /// Zero means the opcode addresses the partition as a whole rather
    /// than individual keys.
    #[must_use]
    pub const fn arity(self) -> usize {
        match self {
            Self::Exists | Self::Get | Self::Remove | Self::LockedGet | Self::LockedRemove => 1,
            Self::Put | Self::Update | Self::LockedPut | Self::LockedUpdate => 2,
            Self::NumKeys | Self::Lock | Self::Unlock => 0,
        }
    }

    /// Folds a locked variant onto its base opcode.
    ///
    /// Opcodes without a locked variant fold onto themselves.
    #[must_use]
    pub const fn base(self) -> Self {
        match self {
            Self::LockedGet => Self::Get,
            Self::LockedPut => Self::Put,
            Self::LockedUpdate => Self::Update,
            Self::LockedRemove => Self::Remove,
            other => other,
        }
    }

    /// The locked variant of a plain data opcode.
    ///
    /// Opcodes without a locked variant map to themselves.
    #[must_use]
    pub const fn locked(self) -> Self {
        match self {
            Self::Get => Self::LockedGet,
            Self::Put => Self::LockedPut,
            Self::Update => Self::LockedUpdate,
            Self::Remove => Self::LockedRemove,
            other => other,
        }
    }
}
