//! Capability flags carried by certificates
//!
//! Flags form a closed set with fixed bit codes. Those codes are part of the
//! `.pqcert` format, so unknown bits in an imported file are rejected rather
//! than silently dropped.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A single capability a certificate may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CapabilityFlag {
    /// Certificate belongs to a human operator
    UserCert,
    /// Certificate belongs to the broker/server
    ServerCert,
    /// Certificate belongs to a managed client machine
    ClientCert,
    /// May act as parent for other certificates
    SignCerts,
    /// May sign commands and messages
    SignMessages,
    /// Commands signed with this certificate may not write state
    NoWrite,
    /// Commands signed with this certificate may not read state
    NoRead,
}

impl CapabilityFlag {
    /// Every flag, in bit order
    pub const ALL: [CapabilityFlag; 7] = [
        CapabilityFlag::UserCert,
        CapabilityFlag::ServerCert,
        CapabilityFlag::ClientCert,
        CapabilityFlag::SignCerts,
        CapabilityFlag::SignMessages,
        CapabilityFlag::NoWrite,
        CapabilityFlag::NoRead,
    ];

    /// Wire bit for this flag. Bit 0 is reserved.
    pub const fn bit(self) -> u32 {
        match self {
            CapabilityFlag::UserCert => 1 << 1,
            CapabilityFlag::ServerCert => 1 << 2,
            CapabilityFlag::ClientCert => 1 << 3,
            CapabilityFlag::SignCerts => 1 << 4,
            CapabilityFlag::SignMessages => 1 << 5,
            CapabilityFlag::NoWrite => 1 << 6,
            CapabilityFlag::NoRead => 1 << 7,
        }
    }

    /// Command-line token for this flag
    pub const fn token(self) -> &'static str {
        match self {
            CapabilityFlag::UserCert => "user-cert",
            CapabilityFlag::ServerCert => "server-cert",
            CapabilityFlag::ClientCert => "client-cert",
            CapabilityFlag::SignCerts => "sign-certs",
            CapabilityFlag::SignMessages => "sign-messages",
            CapabilityFlag::NoWrite => "no-write",
            CapabilityFlag::NoRead => "no-read",
        }
    }
}

impl fmt::Display for CapabilityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Error returned for an unrecognized flag token
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown capability flag '{0}'")]
pub struct FlagParseError(pub String);

impl FromStr for CapabilityFlag {
    type Err = FlagParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CapabilityFlag::ALL
            .into_iter()
            .find(|flag| flag.token() == s)
            .ok_or_else(|| FlagParseError(s.to_string()))
    }
}

/// A set of capability flags
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CapabilityFlags(u32);

impl CapabilityFlags {
    /// Mask of every defined bit
    pub const KNOWN_BITS: u32 = 0b1111_1110;

    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build from raw bits, returning `None` if any undefined bit is set
    pub const fn from_bits(bits: u32) -> Option<Self> {
        if bits & !Self::KNOWN_BITS != 0 {
            None
        } else {
            Some(Self(bits))
        }
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, flag: CapabilityFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    pub fn insert(&mut self, flag: CapabilityFlag) {
        self.0 |= flag.bit();
    }

    pub fn remove(&mut self, flag: CapabilityFlag) {
        self.0 &= !flag.bit();
    }

    pub fn with(mut self, flag: CapabilityFlag) -> Self {
        self.insert(flag);
        self
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = CapabilityFlag> {
        CapabilityFlag::ALL
            .into_iter()
            .filter(move |flag| self.contains(*flag))
    }

    /// Parse a comma-separated list such as `server-cert,sign-messages`
    ///
    /// Blank entries are skipped and repeated tokens collapse. Any
    /// unrecognized token fails the whole list.
    pub fn parse_list(list: &str) -> Result<Self, FlagParseError> {
        list.split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .try_fold(Self::empty(), |flags, token| {
                Ok(flags.with(token.parse::<CapabilityFlag>()?))
            })
    }

    /// Compact summary used in listings
    ///
    /// `G` sign-certs, `M` sign-messages, `W` writes allowed, `R` reads
    /// allowed, `C` client, `U` user, `S` server.
    pub fn summary(self) -> String {
        let mut out = String::with_capacity(7);
        if self.contains(CapabilityFlag::SignCerts) {
            out.push('G');
        }
        if self.contains(CapabilityFlag::SignMessages) {
            out.push('M');
        }
        if !self.contains(CapabilityFlag::NoWrite) {
            out.push('W');
        }
        if !self.contains(CapabilityFlag::NoRead) {
            out.push('R');
        }
        if self.contains(CapabilityFlag::ClientCert) {
            out.push('C');
        }
        if self.contains(CapabilityFlag::UserCert) {
            out.push('U');
        }
        if self.contains(CapabilityFlag::ServerCert) {
            out.push('S');
        }
        out
    }
}

impl FromIterator<CapabilityFlag> for CapabilityFlags {
    fn from_iter<I: IntoIterator<Item = CapabilityFlag>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), CapabilityFlags::with)
    }
}

impl<const N: usize> From<[CapabilityFlag; N]> for CapabilityFlags {
    fn from(flags: [CapabilityFlag; N]) -> Self {
        flags.into_iter().collect()
    }
}

impl fmt::Display for CapabilityFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens: Vec<&str> = self.iter().map(CapabilityFlag::token).collect();
        f.write_str(&tokens.join(","))
    }
}

impl fmt::Debug for CapabilityFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        let flags = CapabilityFlags::parse_list("server-cert,sign-certs,sign-messages").unwrap();

        assert!(flags.contains(CapabilityFlag::ServerCert));
        assert!(flags.contains(CapabilityFlag::SignCerts));
        assert!(flags.contains(CapabilityFlag::SignMessages));
        assert!(!flags.contains(CapabilityFlag::NoRead));
        assert_eq!(flags.bits(), (1 << 2) | (1 << 4) | (1 << 5));
    }

    #[test]
    fn test_parse_list_collapses_duplicates_and_ignores_order() {
        let a = CapabilityFlags::parse_list("no-read,user-cert,no-read").unwrap();
        let b = CapabilityFlags::parse_list("user-cert, no-read").unwrap();

        assert_eq!(a, b);
        assert_eq!(a.iter().count(), 2);
    }

    #[test]
    fn test_parse_list_rejects_unknown_token() {
        let result = CapabilityFlags::parse_list("sign-certs,root-cert");

        assert_eq!(result, Err(FlagParseError("root-cert".into())));
    }

    #[test]
    fn test_empty_list() {
        assert_eq!(CapabilityFlags::parse_list("").unwrap(), CapabilityFlags::empty());
    }

    #[test]
    fn test_from_bits_rejects_unknown_bits() {
        assert!(CapabilityFlags::from_bits(CapabilityFlags::KNOWN_BITS).is_some());
        assert!(CapabilityFlags::from_bits(1).is_none());
        assert!(CapabilityFlags::from_bits(1 << 8).is_none());
    }

    #[test]
    fn test_tokens_round_trip() {
        for flag in CapabilityFlag::ALL {
            assert_eq!(flag.token().parse::<CapabilityFlag>().unwrap(), flag);
        }
    }

    #[test]
    fn test_display_lists_tokens_in_bit_order() {
        let flags = CapabilityFlags::from([CapabilityFlag::SignMessages, CapabilityFlag::UserCert]);

        assert_eq!(flags.to_string(), "user-cert,sign-messages");
    }

    #[test]
    fn test_summary() {
        let root = CapabilityFlags::from([CapabilityFlag::SignCerts, CapabilityFlag::SignMessages]);
        assert_eq!(root.summary(), "GMWR");

        let restricted = CapabilityFlags::from([
            CapabilityFlag::NoRead,
            CapabilityFlag::NoWrite,
            CapabilityFlag::ClientCert,
        ]);
        assert_eq!(restricted.summary(), "C");

        let server = CapabilityFlags::parse_list("server-cert,user-cert,no-write").unwrap();
        assert_eq!(server.summary(), "RUS");
    }
}
