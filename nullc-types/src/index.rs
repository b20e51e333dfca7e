use core::fmt;

use crate::NONE;

macro_rules! index_newtype {
    ($name:ident, $doc:expr) => {
        #[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[doc = $doc]
        pub struct $name(u32);

        impl $name {
            /// The `~0u` sentinel meaning "absent".
            pub const NONE: Self = Self(NONE);

            /// Construct from a raw table index.
            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            /// Raw table index, usable to index the corresponding `Vec`.
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            /// Raw table index as stored on the wire.
            pub const fn raw(self) -> u32 {
                self.0
            }

            /// Whether this is the `~0u` "absent" sentinel.
            pub const fn is_none(self) -> bool {
                self.0 == NONE
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_none() {
                    write!(f, "{}(none)", stringify!($name))
                } else {
                    write!(f, "{}({})", stringify!($name), self.0)
                }
            }
        }

        impl From<u32> for $name {
            fn from(index: u32) -> Self {
                Self(index)
            }
        }
    };
}

index_newtype!(TypeIndex, "Index into the linker's type descriptor table.");
index_newtype!(
    FunctionIndex,
    "Index into the linker's function descriptor table."
);
index_newtype!(LocalIndex, "Index into the linker's local descriptor table.");
index_newtype!(
    GlobalIndex,
    "Index into the linker's global variable descriptor table."
);
index_newtype!(
    LocalCloseListId,
    "Identifier of the upvalue close-list a local belongs to, if any."
);
