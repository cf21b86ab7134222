//! Ids for use in typed collections.

macro_rules! id {
    ($name:ident, $ty:ty) => {
        #[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
        pub struct $name($ty);

        impl From<$name> for usize {
            fn from(id: $name) -> usize {
                id.0 as usize
            }
        }

        impl From<usize> for $name {
            fn from(val: usize) -> $name {
                Self(val as $ty)
            }
        }
    };
}

id!(FileId, u32);
id!(TaskId, u32);
