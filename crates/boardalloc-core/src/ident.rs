// Dense record IDs. These are plain indices into the owning arenas: ordered
// and hashable so they can key maps, displayable for error messages, and
// nothing more.
macro_rules! identifier {
    ($name: ident, $inner: ty) => {
        #[allow(missing_docs)]
        #[derive(
            Debug,
            Copy,
            Clone,
            PartialOrd,
            Ord,
            PartialEq,
            Eq,
            Hash,
            derive_more::Display,
            serde::Serialize,
            serde::Deserialize,
        )]
        pub struct $name($inner);

        impl $name {
            /// Creates a new ID.
            pub const fn new(val: $inner) -> Self {
                Self(val)
            }

            /// Returns the index this ID wraps.
            pub const fn inner(self) -> $inner {
                self.0
            }
        }
    };
}
