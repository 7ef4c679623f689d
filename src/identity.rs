use std::fmt;

/// Width of the packed address token on the wire.
pub const TOKEN_LEN: usize = 6;

/// Network identity of a process: a numeric id plus a port, packed into a
/// fixed 6-byte address token for transmission. Two identities are equal iff
/// their token encodings are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity {
    pub id: u32,
    pub port: u16,
}

impl Identity {
    /// The all-zero sentinel denoting "no identity".
    pub const NULL: Identity = Identity { id: 0, port: 0 };

    pub fn new(id: u32, port: u16) -> Self {
        Self { id, port }
    }

    /// Packs the identity into its fixed-size address token:
    /// id in bytes 0..4, port in bytes 4..6, little-endian.
    pub fn to_token(&self) -> [u8; TOKEN_LEN] {
        let mut token = [0u8; TOKEN_LEN];
        token[..4].copy_from_slice(&self.id.to_le_bytes());
        token[4..].copy_from_slice(&self.port.to_le_bytes());
        token
    }

    /// Inverse of [`Identity::to_token`]. A malformed token is a caller
    /// contract violation, not a runtime error.
    pub fn from_token(token: [u8; TOKEN_LEN]) -> Self {
        let id = u32::from_le_bytes([token[0], token[1], token[2], token[3]]);
        let port = u16::from_le_bytes([token[4], token[5]]);
        Self { id, port }
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.port)
    }
}
