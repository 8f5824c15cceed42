//! Command line splitting and argument grammars.
//!
//! A command line is split once on the first space into a verb and its
//! arguments. Each handler then parses its own arguments with the functions
//! below, which know nothing about session state beyond the enabled
//! extensions and limits they are given.

use base64::{Engine, engine::general_purpose::STANDARD};
use phf::phf_map;
use postern_common::status::Status;
use thiserror::Error;

use crate::{
    extensions::Extension,
    reply::{Reply, excerpt},
    transaction::{BodyType, DsnNotify, DsnReturn, MailFrom, RcptTo},
};

pub const EHLO_SYNTAX: &str = "\"EHLO\" SP hostname CRLF";
pub const HELO_SYNTAX: &str = "\"HELO\" SP hostname CRLF";
pub const AUTH_SYNTAX: &str = "AUTH SP mechanism [SP initial-response] CRLF";
pub const MAIL_SYNTAX: &str =
    "\"MAIL FROM:\" \"<\" address \">\" / \"<>\" [SP Mail-parameters] CRLF";
pub const RCPT_SYNTAX: &str = "\"RCPT TO:\" \"<\" address \">\" [SP Rcpt-parameters] CRLF";
pub const BDAT_SYNTAX: &str = "\"BDAT\" SP chunk-size [SP \"LAST\"] CRLF";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Ehlo,
    Helo,
    StartTls,
    Auth,
    Mail,
    Rcpt,
    Data,
    Bdat,
    Rset,
    Noop,
    Quit,
}

static VERBS: phf::Map<&'static str, Verb> = phf_map! {
    "EHLO" => Verb::Ehlo,
    "HELO" => Verb::Helo,
    "STARTTLS" => Verb::StartTls,
    "AUTH" => Verb::Auth,
    "MAIL" => Verb::Mail,
    "RCPT" => Verb::Rcpt,
    "DATA" => Verb::Data,
    "BDAT" => Verb::Bdat,
    "RSET" => Verb::Rset,
    "NOOP" => Verb::Noop,
    "QUIT" => Verb::Quit,
};

impl Verb {
    /// Case-insensitive lookup of a command verb.
    #[must_use]
    pub fn lookup(verb: &str) -> Option<Self> {
        VERBS.get(verb.to_ascii_uppercase().as_str()).copied()
    }
}

/// Split a command line (without CRLF) into its verb and the raw remainder.
#[must_use]
pub fn split(line: &str) -> (&str, &str) {
    line.split_once(' ').unwrap_or((line, ""))
}

/// Why a command's arguments were refused. Each variant maps onto exactly one
/// reply.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("Syntax error, syntax: {0}")]
    Syntax(&'static str),

    #[error("Syntax error('address' value must be specified), syntax: {0}")]
    MissingAddress(&'static str),

    #[error("Syntax error(chunk-size must be integer), syntax: {}", BDAT_SYNTAX)]
    InvalidChunkSize,

    #[error("Syntax error: {0} parameter value must be specified.")]
    MissingValue(&'static str),

    #[error("Syntax error: {0}")]
    InvalidValue(String),

    #[error(
        "Syntax error: Parameter 'initial-response' value must be BASE64 or contain a single character '='."
    )]
    InvalidInitialResponse,

    #[error("Message exceeds fixed maximum message size.")]
    SizeExceeded,

    #[error("Unsupported parameter: {0}")]
    Unsupported(String),
}

impl ArgumentError {
    #[must_use]
    pub const fn status(&self) -> Status {
        match self {
            Self::SizeExceeded => Status::ExceededStorage,
            Self::Unsupported(_) => Status::ParameterNotSupported,
            _ => Status::ParameterSyntaxError,
        }
    }
}

impl From<ArgumentError> for Reply {
    fn from(err: ArgumentError) -> Self {
        Self::single(err.status(), err.to_string())
    }
}

/// The single domain (or address literal) argument of EHLO/HELO.
///
/// # Errors
/// Anything other than exactly one token.
pub fn parse_domain(arguments: &str, syntax: &'static str) -> Result<String, ArgumentError> {
    let mut tokens = arguments.split(' ');

    match (tokens.next(), tokens.next()) {
        (Some(domain), None) if !domain.is_empty() => Ok(domain.to_string()),
        _ => Err(ArgumentError::Syntax(syntax)),
    }
}

/// Strip a case-insensitive `prefix` and split `<path> params` apart.
fn path_and_params<'a>(
    arguments: &'a str,
    prefix: &str,
    syntax: &'static str,
) -> Result<(&'a str, &'a str), ArgumentError> {
    let rest = arguments
        .get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| arguments[prefix.len()..].trim())
        .ok_or(ArgumentError::Syntax(syntax))?;

    let rest = rest.strip_prefix('<').ok_or(ArgumentError::Syntax(syntax))?;
    let (path, params) = rest.split_once('>').ok_or(ArgumentError::Syntax(syntax))?;

    Ok((path.trim(), params.trim()))
}

fn value_of<'a>(value: Option<&'a str>, name: &'static str) -> Result<&'a str, ArgumentError> {
    value.ok_or(ArgumentError::MissingValue(name))
}

/// Parse the arguments of a MAIL command (RFC 5321 4.1.1.2).
///
/// Parameters are only recognised when the extension that defines them is
/// enabled; `AUTH=` is always accepted and ignored.
///
/// # Errors
/// See [`ArgumentError`].
pub fn parse_mail_from(
    arguments: &str,
    extensions: &[Extension],
    max_message_size: usize,
) -> Result<MailFrom, ArgumentError> {
    let (mailbox, params) = path_and_params(arguments, "FROM:", MAIL_SYNTAX)?;

    let mut from = MailFrom {
        mailbox: mailbox.to_string(),
        ..MailFrom::default()
    };

    for param in params.split_ascii_whitespace() {
        let (key, value) = param
            .split_once('=')
            .map_or((param, None), |(key, value)| (key, Some(value)));

        match key.to_ascii_uppercase().as_str() {
            "SIZE" if extensions.contains(&Extension::Size) => {
                let size = value_of(value, "SIZE")?.parse::<usize>().map_err(|_| {
                    ArgumentError::InvalidValue("SIZE parameter value must be integer.".to_string())
                })?;

                if size > max_message_size {
                    return Err(ArgumentError::SizeExceeded);
                }

                from.size = Some(size);
            }
            "BODY"
                if extensions.contains(&Extension::EightBitMime)
                    || extensions.contains(&Extension::BinaryMime) =>
            {
                let body = value_of(value, "BODY")?.parse::<BodyType>().map_err(|()| {
                    ArgumentError::InvalidValue(
                        "BODY parameter value must be \"7BIT\",\"8BITMIME\" or \"BINARYMIME\"."
                            .to_string(),
                    )
                })?;

                if body == BodyType::BinaryMime && !extensions.contains(&Extension::BinaryMime) {
                    return Err(ArgumentError::Unsupported(excerpt(param).into_owned()));
                }

                from.body_type = Some(body);
            }
            "RET" if extensions.contains(&Extension::Dsn) => {
                from.dsn_ret = Some(value_of(value, "RET")?.parse().map_err(|()| {
                    ArgumentError::InvalidValue(
                        "RET parameter value must be \"FULL\" or \"HDRS\".".to_string(),
                    )
                })?);
            }
            "ENVID" if extensions.contains(&Extension::Dsn) => {
                from.envid = Some(value_of(value, "ENVID")?.to_string());
            }
            "AUTH" => {}
            _ => return Err(ArgumentError::Unsupported(excerpt(param).into_owned())),
        }
    }

    Ok(from)
}

/// Parse the arguments of a RCPT command (RFC 5321 4.1.1.3).
///
/// # Errors
/// See [`ArgumentError`].
pub fn parse_rcpt_to(arguments: &str, extensions: &[Extension]) -> Result<RcptTo, ArgumentError> {
    let (mailbox, params) = path_and_params(arguments, "TO:", RCPT_SYNTAX)?;

    if mailbox.is_empty() {
        return Err(ArgumentError::MissingAddress(RCPT_SYNTAX));
    }

    let mut to = RcptTo {
        mailbox: mailbox.to_string(),
        ..RcptTo::default()
    };

    for param in params.split_ascii_whitespace() {
        let (key, value) = param
            .split_once('=')
            .map_or((param, None), |(key, value)| (key, Some(value)));

        match key.to_ascii_uppercase().as_str() {
            "NOTIFY" if extensions.contains(&Extension::Dsn) => {
                let mut notify = Vec::new();

                for item in value_of(value, "NOTIFY")?.split(',') {
                    let keyword = item.parse::<DsnNotify>().map_err(|()| {
                        ArgumentError::InvalidValue(format!(
                            "Not supported NOTIFY parameter value '{item}'."
                        ))
                    })?;

                    if !notify.contains(&keyword) {
                        notify.push(keyword);
                    }
                }

                to.dsn_notify = Some(notify);
            }
            "ORCPT" if extensions.contains(&Extension::Dsn) => {
                to.orcpt = Some(value_of(value, "ORCPT")?.to_string());
            }
            _ => return Err(ArgumentError::Unsupported(excerpt(param).into_owned())),
        }
    }

    Ok(to)
}

/// Size and end marker of a BDAT chunk (RFC 3030 2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub size: usize,
    pub last: bool,
}

/// # Errors
/// A missing or non-integer chunk size, or a trailing token other than `LAST`.
pub fn parse_bdat(arguments: &str) -> Result<Chunk, ArgumentError> {
    let tokens = arguments.split(' ').collect::<Vec<_>>();

    if arguments.is_empty() || tokens.len() > 2 {
        return Err(ArgumentError::Syntax(BDAT_SYNTAX));
    }

    let size = tokens[0]
        .parse::<usize>()
        .map_err(|_| ArgumentError::InvalidChunkSize)?;

    let last = match tokens.get(1) {
        None => false,
        Some(marker) if marker.eq_ignore_ascii_case("LAST") => true,
        Some(_) => return Err(ArgumentError::Syntax(BDAT_SYNTAX)),
    };

    Ok(Chunk { size, last })
}

/// Mechanism name and decoded initial response of an AUTH command
/// (RFC 4954 4). A lone `=` stands for an empty initial response.
///
/// # Errors
/// More than two tokens, or an initial response that isn't valid base64.
pub fn parse_auth(arguments: &str) -> Result<(String, Option<Vec<u8>>), ArgumentError> {
    let tokens = arguments.split(' ').collect::<Vec<_>>();

    if arguments.is_empty() || tokens.len() > 2 {
        return Err(ArgumentError::Syntax(AUTH_SYNTAX));
    }

    let initial = match tokens.get(1) {
        None => None,
        Some(&"=") => Some(Vec::new()),
        Some(encoded) => Some(
            STANDARD
                .decode(encoded)
                .map_err(|_| ArgumentError::InvalidInitialResponse)?,
        ),
    };

    Ok((tokens[0].to_ascii_uppercase(), initial))
}
