pub use hash::{checksum, Sha256sum};

mod hash;
