//! The `certman` command surface
//!
//! Commands are addressed by path, written with `/` or spaces between
//! segments, followed by `key=value` arguments:
//!
//! ```text
//! certman/root/show
//! certman root generate name=example.com
//! certman/signing/generate name=deploy parent-serial=0 flags=sign-messages,no-write
//! ```
//!
//! The leading `certman` segment is optional. Every command is classified as
//! a read or a write; when an operator certificate is configured, that
//! classification is checked against it after parsing and before dispatch.

pub mod table;

use std::collections::BTreeMap;
use std::path::PathBuf;

use certman_core::{CapabilityFlags, CommandAccess, FlagParseError};
use thiserror::Error;
use tracing::debug;

use crate::error::AuthorityError;
use crate::service::CertificateAuthorityService;

pub const USAGE: &str = "\
usage: certman <namespace>/<command> [key=value ...]

  root/show
  root/generate name=<string>
  root/export file=<path> [secret=yes] [force=yes]
  root/import file=<path>
  signing/show
  signing/generate name=<string> parent-serial=<uint> flags=<comma-list>
  signing/export serial=<uint> file=<path> [secret=yes] [force=yes]
  signing/import file=<path>
  signing/remove serial=<uint>
  signing/sign-file serial=<uint> file=<path> signature-file=<path> [force=yes]
  signing/verify-file-signature file=<path> signature-file=<path>
  encryption/show
  encryption/generate name=<string> parent-serial=<uint> [flags=<comma-list>]
  encryption/export serial=<uint> file=<path> [secret=yes] [force=yes]
  encryption/import file=<path>
  encryption/remove serial=<uint>

flags: client-cert, no-read, no-write, server-cert, sign-certs, sign-messages, user-cert";

#[derive(Error, Debug)]
pub enum CliError {
    #[error("No such command: {0}")]
    UnknownCommand(String),

    #[error("Argument '{0}' is required")]
    MissingArgument(&'static str),

    #[error("Argument '{0}' requires a value")]
    EmptyValue(String),

    #[error("Unknown argument '{0}'")]
    UnknownArgument(String),

    #[error("Invalid value '{value}' for argument '{key}'")]
    InvalidValue { key: &'static str, value: String },

    #[error(transparent)]
    Flags(#[from] FlagParseError),

    #[error(transparent)]
    Authority(#[from] AuthorityError),
}

/// A parsed certman command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    RootShow,
    RootGenerate {
        name: String,
    },
    RootExport {
        file: PathBuf,
        secret: bool,
        force: bool,
    },
    RootImport {
        file: PathBuf,
    },
    SigningShow,
    SigningGenerate {
        name: String,
        parent_serial: u64,
        flags: CapabilityFlags,
    },
    SigningExport {
        serial: u64,
        file: PathBuf,
        secret: bool,
        force: bool,
    },
    SigningImport {
        file: PathBuf,
    },
    SigningRemove {
        serial: u64,
    },
    SignFile {
        serial: u64,
        file: PathBuf,
        signature_file: PathBuf,
        force: bool,
    },
    VerifyFileSignature {
        file: PathBuf,
        signature_file: PathBuf,
    },
    EncryptionShow,
    EncryptionGenerate {
        name: String,
        parent_serial: u64,
        flags: CapabilityFlags,
    },
    EncryptionExport {
        serial: u64,
        file: PathBuf,
        secret: bool,
        force: bool,
    },
    EncryptionImport {
        file: PathBuf,
    },
    EncryptionRemove {
        serial: u64,
    },
}

/// `key=value` arguments; each key may be consumed once
struct Arguments {
    values: BTreeMap<String, String>,
}

impl Arguments {
    fn parse<'a>(tokens: impl Iterator<Item = &'a str>) -> Result<Self, CliError> {
        let mut values = BTreeMap::new();
        for token in tokens {
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| CliError::UnknownArgument(token.to_string()))?;
            if value.is_empty() {
                return Err(CliError::EmptyValue(key.to_string()));
            }
            values.insert(key.to_string(), value.to_string());
        }
        Ok(Self { values })
    }

    fn required(&mut self, key: &'static str) -> Result<String, CliError> {
        self.values.remove(key).ok_or(CliError::MissingArgument(key))
    }

    /// Flag list; empty when absent
    fn flags(&mut self, key: &'static str) -> Result<CapabilityFlags, CliError> {
        match self.values.remove(key) {
            None => Ok(CapabilityFlags::default()),
            Some(value) => Ok(CapabilityFlags::parse_list(&value)?),
        }
    }

    fn path(&mut self, key: &'static str) -> Result<PathBuf, CliError> {
        self.required(key).map(PathBuf::from)
    }

    fn serial(&mut self, key: &'static str) -> Result<u64, CliError> {
        let value = self.required(key)?;
        value
            .parse()
            .map_err(|_| CliError::InvalidValue { key, value })
    }

    /// Optional yes/no switch, off by default
    fn switch(&mut self, key: &'static str) -> Result<bool, CliError> {
        match self.values.remove(key) {
            None => Ok(false),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "yes" | "true" | "1" => Ok(true),
                "no" | "false" | "0" => Ok(false),
                _ => Err(CliError::InvalidValue { key, value }),
            },
        }
    }

    /// Fail on any argument the command did not consume
    fn finish(self) -> Result<(), CliError> {
        match self.values.into_keys().next() {
            Some(key) => Err(CliError::UnknownArgument(key)),
            None => Ok(()),
        }
    }
}

impl Command {
    /// Parse command-line tokens
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self, CliError> {
        let tokens: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        let split = tokens
            .iter()
            .position(|t| t.contains('='))
            .unwrap_or(tokens.len());
        let (path_tokens, arg_tokens) = tokens.split_at(split);

        let mut path: Vec<&str> = path_tokens
            .iter()
            .flat_map(|t| t.split('/'))
            .filter(|s| !s.is_empty())
            .collect();
        if path.first() == Some(&"certman") {
            path.remove(0);
        }

        let mut args = Arguments::parse(arg_tokens.iter().copied())?;
        let command = match path.as_slice() {
            [] | ["help"] => Command::Help,
            ["root", "show"] => Command::RootShow,
            ["root", "generate"] => Command::RootGenerate {
                name: args.required("name")?,
            },
            ["root", "export"] => Command::RootExport {
                file: args.path("file")?,
                secret: args.switch("secret")?,
                force: args.switch("force")?,
            },
            ["root", "import"] => Command::RootImport {
                file: args.path("file")?,
            },
            ["signing", "show"] => Command::SigningShow,
            ["signing", "generate"] => Command::SigningGenerate {
                name: args.required("name")?,
                parent_serial: args.serial("parent-serial")?,
                flags: CapabilityFlags::parse_list(&args.required("flags")?)?,
            },
            ["signing", "export"] => Command::SigningExport {
                serial: args.serial("serial")?,
                file: args.path("file")?,
                secret: args.switch("secret")?,
                force: args.switch("force")?,
            },
            ["signing", "import"] => Command::SigningImport {
                file: args.path("file")?,
            },
            ["signing", "remove"] => Command::SigningRemove {
                serial: args.serial("serial")?,
            },
            ["signing", "sign-file"] => Command::SignFile {
                serial: args.serial("serial")?,
                file: args.path("file")?,
                signature_file: args.path("signature-file")?,
                force: args.switch("force")?,
            },
            ["signing", "verify-file-signature"] => Command::VerifyFileSignature {
                file: args.path("file")?,
                signature_file: args.path("signature-file")?,
            },
            ["encryption", "show"] => Command::EncryptionShow,
            ["encryption", "generate"] => Command::EncryptionGenerate {
                name: args.required("name")?,
                parent_serial: args.serial("parent-serial")?,
                flags: args.flags("flags")?,
            },
            ["encryption", "export"] => Command::EncryptionExport {
                serial: args.serial("serial")?,
                file: args.path("file")?,
                secret: args.switch("secret")?,
                force: args.switch("force")?,
            },
            ["encryption", "import"] => Command::EncryptionImport {
                file: args.path("file")?,
            },
            ["encryption", "remove"] => Command::EncryptionRemove {
                serial: args.serial("serial")?,
            },
            _ => return Err(CliError::UnknownCommand(path.join("/"))),
        };
        args.finish()?;
        Ok(command)
    }

    /// Access class used by the authorization check
    pub fn access(&self) -> CommandAccess {
        match self {
            Command::Help
            | Command::RootShow
            | Command::SigningShow
            | Command::RootExport { .. }
            | Command::SigningExport { .. }
            | Command::VerifyFileSignature { .. }
            | Command::EncryptionShow
            | Command::EncryptionExport { .. } => CommandAccess::Read,
            Command::RootGenerate { .. }
            | Command::RootImport { .. }
            | Command::SigningGenerate { .. }
            | Command::SigningImport { .. }
            | Command::SigningRemove { .. }
            | Command::SignFile { .. }
            | Command::EncryptionGenerate { .. }
            | Command::EncryptionImport { .. }
            | Command::EncryptionRemove { .. } => CommandAccess::Write,
        }
    }
}

/// Parse, authorize and run a command, returning its output
pub fn run<S: AsRef<str>>(
    service: &CertificateAuthorityService,
    operator_serial: Option<u64>,
    args: &[S],
) -> Result<String, CliError> {
    let command = Command::parse(args)?;
    if let Some(serial) = operator_serial.filter(|_| command != Command::Help) {
        service.authorize_operator(serial, command.access())?;
    }
    debug!(command = ?command, "Dispatching command");
    execute(service, command)
}

fn execute(service: &CertificateAuthorityService, command: Command) -> Result<String, CliError> {
    let output = match command {
        Command::Help => USAGE.to_string(),
        Command::RootShow => match service.root_show() {
            Some(root) => table::root_table(&root).render(),
            None => "No root certificate found".to_string(),
        },
        Command::RootGenerate { name } => {
            let root = service.root_generate(&name)?;
            format!("Generated root certificate with serial {}", root.serial())
        }
        Command::RootExport {
            file,
            secret,
            force,
        } => {
            service.root_export(&file, secret, force)?;
            "Export successful".to_string()
        }
        Command::RootImport { file } => {
            let root = service.root_import(&file)?;
            format!("Imported root certificate with serial {}", root.serial())
        }
        Command::SigningShow => {
            let records = service.signing_show();
            if records.is_empty() {
                "No signing certificates found".to_string()
            } else {
                table::signing_table(&records).render()
            }
        }
        Command::SigningGenerate {
            name,
            parent_serial,
            flags,
        } => {
            let record = service.signing_generate(&name, parent_serial, flags)?;
            format!("Generated certificate with serial {}", record.serial())
        }
        Command::SigningExport {
            serial,
            file,
            secret,
            force,
        } => {
            service.signing_export(serial, &file, secret, force)?;
            "Export successful".to_string()
        }
        Command::SigningImport { file } => {
            let record = service.signing_import(&file)?;
            format!("Imported certificate with serial {}", record.serial())
        }
        Command::SigningRemove { serial } => {
            service.signing_remove(serial)?;
            format!("Removed certificate with serial {}", serial)
        }
        Command::SignFile {
            serial,
            file,
            signature_file,
            force,
        } => {
            service.sign_file(serial, &file, &signature_file, force)?;
            format!("Signature written to {}", signature_file.display())
        }
        Command::VerifyFileSignature {
            file,
            signature_file,
        } => {
            let signer = service.verify_file_signature(&file, &signature_file)?;
            format!(
                "Signature is valid, signed by certificate {} ({})",
                signer.serial(),
                signer.name()
            )
        }
        Command::EncryptionShow => {
            let records = service.encryption_show();
            if records.is_empty() {
                "No encryption certificates found".to_string()
            } else {
                table::encryption_table(&records).render()
            }
        }
        Command::EncryptionGenerate {
            name,
            parent_serial,
            flags,
        } => {
            let record = service.encryption_generate(&name, parent_serial, flags)?;
            format!("Generated encryption certificate with serial {}", record.serial())
        }
        Command::EncryptionExport {
            serial,
            file,
            secret,
            force,
        } => {
            service.encryption_export(serial, &file, secret, force)?;
            "Export successful".to_string()
        }
        Command::EncryptionImport { file } => {
            let record = service.encryption_import(&file)?;
            format!("Imported encryption certificate with serial {}", record.serial())
        }
        Command::EncryptionRemove { serial } => {
            service.encryption_remove(serial)?;
            format!("Removed encryption certificate with serial {}", serial)
        }
    };
    Ok(output)
}
