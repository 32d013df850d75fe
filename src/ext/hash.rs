use sha2::{Digest, Sha256};

pub type Sha256sum = [u8; 32];

pub fn checksum(data: &[u8]) -> Sha256sum {
    Sha256::digest(data).into()
}
