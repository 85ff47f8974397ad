//! Identifier newtypes and frame indexing

use serde::{Deserialize, Serialize};
use std::fmt;

/// Frame index. The utterance root hypothesis ends at frame `-1` so that the first
/// word of an utterance starts at frame `0`.
pub type FrameIdx = i32;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $inner:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub $inner);

        impl $name {
            /// Index into the owning table
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Context-independent phone
    PhoneId,
    u16
);
id_type!(
    /// Tied HMM output distribution
    SenoneId,
    u32
);
id_type!(
    /// Senone sequence of one context-dependent phone instance
    SsId,
    u32
);
id_type!(
    /// Dictionary word (one pronunciation)
    WordId,
    u32
);
