use std::fmt;

/// An opaque, comparable entity identifier with a canonical string form.
///
/// The common concrete form used throughout this crate is a 20-byte
/// SHA-1-sized digest, but the type itself places no constraint on
/// length: callers that mint identifiers from a different hash or a
/// natural key are free to do so.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(Vec<u8>);

impl Identifier {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex form, the canonical string representation used in
    /// logs and as a map key.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<Vec<u8>> for Identifier {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Identifier {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_form_is_lowercase_and_stable() {
        let id = Identifier::new(vec![0xAB, 0x01, 0xff]);
        assert_eq!(id.to_hex(), "ab01ff");
        assert_eq!(id.to_string(), "ab01ff");
    }

    #[test]
    fn equal_bytes_compare_equal() {
        let a = Identifier::new(vec![1, 2, 3]);
        let b = Identifier::new(vec![1, 2, 3]);
        assert_eq!(a, b);
    }
}
