//! MAC address parsing and formatting.

use std::fmt;

/// Error parsing a MAC address from its string form.
#[derive(Debug, thiserror::Error)]
#[error("invalid MAC address: {0}")]
pub struct MacParseError(String);

/// A 48-bit Ethernet MAC address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Mac(pub [u8; 6]);

impl Mac {
    /// The all-zero MAC used as the FDB's flood/default key.
    pub const ZERO: Mac = Mac([0; 6]);

    /// Whether this address is the I/G (multicast) bit set, or the
    /// reserved all-zero default-entry key.
    pub fn is_multicast_or_zero(&self) -> bool {
        self.0 == [0; 6] || (self.0[0] & 0x01) != 0
    }

    /// Whether this is an ordinary unicast address (not multicast, not zero).
    pub fn is_unicast(&self) -> bool {
        !self.is_multicast_or_zero()
    }

    /// Parse a colon-separated hex MAC string (`aa:bb:cc:dd:ee:ff`).
    pub fn parse(s: &str) -> Result<Self, MacParseError> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(MacParseError(s.to_string()));
        }
        let mut mac = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            mac[i] = u8::from_str_radix(part, 16).map_err(|_| MacParseError(s.to_string()))?;
        }
        Ok(Mac(mac))
    }
}

impl fmt::Debug for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mac({self})")
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl From<[u8; 6]> for Mac {
    fn from(bytes: [u8; 6]) -> Self {
        Mac(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats_round_trip() {
        let mac = Mac::parse("aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn parses_uppercase() {
        let mac = Mac::parse("AA:BB:CC:DD:EE:FF").unwrap();
        assert_eq!(mac, Mac([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]));
    }

    #[test]
    fn rejects_malformed() {
        assert!(Mac::parse("not-a-mac").is_err());
        assert!(Mac::parse("aa:bb:cc:dd:ee").is_err());
        assert!(Mac::parse("aa:bb:cc:dd:ee:ff:00").is_err());
    }

    #[test]
    fn classifies_multicast_and_zero() {
        assert!(Mac::ZERO.is_multicast_or_zero());
        assert!(!Mac::ZERO.is_unicast());

        let multicast = Mac([0x01, 0x00, 0x5e, 0x00, 0x00, 0x01]);
        assert!(multicast.is_multicast_or_zero());

        let unicast = Mac([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert!(unicast.is_unicast());
        assert!(!unicast.is_multicast_or_zero());
    }
}
