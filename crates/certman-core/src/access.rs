//! Command access policy
//!
//! `no-read` and `no-write` restrict what a signed command may do once its
//! signature has been accepted. They mean nothing to the store or codec.

use std::fmt;

use thiserror::Error;
use tracing::warn;

use crate::certificate::CertificateRecord;
use crate::flags::CapabilityFlag;

/// The kind of access a command needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandAccess {
    Read,
    Write,
}

impl fmt::Display for CommandAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandAccess::Read => f.write_str("read"),
            CommandAccess::Write => f.write_str("write"),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessError {
    #[error("certificate {0} may not run read commands")]
    ReadDenied(u64),

    #[error("certificate {0} may not run write commands")]
    WriteDenied(u64),
}

/// Check that `record` may perform `access`
pub fn authorize(record: &CertificateRecord, access: CommandAccess) -> Result<(), AccessError> {
    let serial = record.serial();
    let denied = match access {
        CommandAccess::Read if record.has_flag(CapabilityFlag::NoRead) => {
            Some(AccessError::ReadDenied(serial))
        }
        CommandAccess::Write if record.has_flag(CapabilityFlag::NoWrite) => {
            Some(AccessError::WriteDenied(serial))
        }
        _ => None,
    };

    match denied {
        Some(error) => {
            warn!(serial, access = %access, "Access denied");
            Err(error)
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::CertificateBuilder;
    use crate::crypto::PublicKey;
    use crate::flags::CapabilityFlags;

    fn record_with(flags: &str) -> CertificateRecord {
        CertificateBuilder::new(4, PublicKey::new(vec![0; 32]))
            .parent(0)
            .flags(CapabilityFlags::parse_list(flags).unwrap())
            .unsigned()
            .into()
    }

    #[test]
    fn test_unrestricted_record_may_read_and_write() {
        let record = record_with("sign-messages");

        assert_eq!(authorize(&record, CommandAccess::Read), Ok(()));
        assert_eq!(authorize(&record, CommandAccess::Write), Ok(()));
    }

    #[test]
    fn test_no_write() {
        let record = record_with("sign-messages,no-write");

        assert_eq!(authorize(&record, CommandAccess::Read), Ok(()));
        assert_eq!(
            authorize(&record, CommandAccess::Write),
            Err(AccessError::WriteDenied(4))
        );
    }

    #[test]
    fn test_no_read() {
        let record = record_with("sign-messages,no-read");

        assert_eq!(
            authorize(&record, CommandAccess::Read),
            Err(AccessError::ReadDenied(4))
        );
        assert_eq!(authorize(&record, CommandAccess::Write), Ok(()));
    }
}
