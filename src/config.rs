//! A small hand-rolled recursive-descent parser for the router's
//! configuration file format.
//!
//! The grammar is deliberately tiny -- a handful of keyword-led blocks with
//! curly braces and semicolons -- so a dependency on a general-purpose
//! parser combinator or grammar crate would buy nothing. A config file looks
//! like:
//!
//! ```text
//! interface serial uart0 {
//!     device "/dev/ttyUSB0";
//!     baud 57600;
//!     filter to_autopilot;
//! }
//!
//! interface udp gcs {
//!     bind 0.0.0.0:14550;
//!     mirror;
//!     filter to_gcs;
//! }
//!
//! chain to_autopilot reject {
//!     accept priority 2 to 1.1;
//!     call common from 255.0;
//! }
//!
//! chain common accept {
//!     reject type BAD_DATA;
//! }
//! ```

use std::fmt;

use crate::address::MavSubnet;
use crate::error::RouterError;
use crate::ip::IpEndpoint;

/// Whether a chain (or the whole filter) lets a packet through by default.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DefaultAction {
    Accept,
    Reject,
}

/// What a matched rule does to the packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Accept, with an optional priority override (defaults to 0).
    Accept(Option<i16>),
    Reject,
    /// Evaluate `chain`; if it does not reach a terminal accept/reject,
    /// fall through to the rules after this one.
    Call(String),
    /// Jump to `chain` and never return to this chain.
    Goto(String),
}

/// A single condition a packet must satisfy for a rule to match. A rule
/// matches only if every one of its conditions matches (conjunction); the
/// rule's `conditions` vec being empty means it always matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    From(MavSubnet),
    To(MavSubnet),
    Type(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub action: Action,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    pub name: String,
    pub default_action: DefaultAction,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceKind {
    Serial { device: String, baud: u32 },
    Udp { bind: IpEndpoint, remote: Option<IpEndpoint> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDef {
    pub name: String,
    pub kind: InterfaceKind,
    pub filter: Option<String>,
    pub mirror: bool,
}

/// The fully parsed contents of a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigFile {
    pub interfaces: Vec<InterfaceDef>,
    pub chains: Vec<Chain>,
}

impl ConfigFile {
    pub fn chain(&self, name: &str) -> Option<&Chain> {
        self.chains.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Num(i64),
    LBrace,
    RBrace,
    Semi,
    Eof,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    src: &'a str,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Lexer<'a> {
        Lexer {
            chars: src.char_indices().peekable(),
            src,
            line: 1,
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.chars.peek() {
                Some((_, c)) if *c == '\n' => {
                    self.line += 1;
                    self.chars.next();
                }
                Some((_, c)) if c.is_whitespace() => {
                    self.chars.next();
                }
                Some((_, '#')) => {
                    while let Some((_, c)) = self.chars.peek() {
                        if *c == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, RouterError> {
        self.skip_trivia();
        let (start, c) = match self.chars.next() {
            Some(pair) => pair,
            None => return Ok(Token::Eof),
        };
        match c {
            '{' => Ok(Token::LBrace),
            '}' => Ok(Token::RBrace),
            ';' => Ok(Token::Semi),
            '"' => {
                let mut s = String::new();
                loop {
                    match self.chars.next() {
                        Some((_, '"')) => break,
                        Some((_, ch)) => s.push(ch),
                        None => {
                            return Err(RouterError::ConfigInvalid(format!(
                                "line {}: unterminated string literal",
                                self.line
                            )))
                        }
                    }
                }
                Ok(Token::Str(s))
            }
            c if c.is_ascii_digit() || (c == '-' && self.peek_is_digit()) => {
                let mut end = start + c.len_utf8();
                while let Some((i, ch)) = self.chars.peek().copied() {
                    if ch.is_ascii_digit() {
                        end = i + ch.len_utf8();
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                let text = &self.src[start..end];
                text.parse::<i64>().map(Token::Num).map_err(|_| {
                    RouterError::ConfigInvalid(format!("line {}: invalid number {:?}", self.line, text))
                })
            }
            c if is_ident_start(c) => {
                let mut end = start + c.len_utf8();
                while let Some((i, ch)) = self.chars.peek().copied() {
                    if is_ident_continue(ch) {
                        end = i + ch.len_utf8();
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                Ok(Token::Ident(self.src[start..end].to_string()))
            }
            other => Err(RouterError::ConfigInvalid(format!(
                "line {}: unexpected character {:?}",
                self.line, other
            ))),
        }
    }

    fn peek_is_digit(&mut self) -> bool {
        matches!(self.chars.peek(), Some((_, c)) if c.is_ascii_digit())
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '/' || c == '.'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '/' || c == '.' || c == ':' || c == '-' || c == '\\'
}

/// A recursive-descent parser over the token stream produced by [`Lexer`].
struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: Token,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Result<Parser<'a>, RouterError> {
        let mut lexer = Lexer::new(src);
        let lookahead = lexer.next_token()?;
        Ok(Parser { lexer, lookahead })
    }

    fn advance(&mut self) -> Result<Token, RouterError> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.lookahead, next))
    }

    fn expect_ident(&mut self) -> Result<String, RouterError> {
        match self.advance()? {
            Token::Ident(s) => Ok(s),
            other => Err(RouterError::ConfigInvalid(format!(
                "expected identifier, found {:?}",
                other
            ))),
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), RouterError> {
        let found = self.advance()?;
        if &found == expected {
            Ok(())
        } else {
            Err(RouterError::ConfigInvalid(format!(
                "expected {:?}, found {:?}",
                expected, found
            )))
        }
    }

    fn parse_config(&mut self) -> Result<ConfigFile, RouterError> {
        let mut config = ConfigFile::default();
        loop {
            match &self.lookahead {
                Token::Eof => break,
                Token::Ident(kw) if kw == "interface" => {
                    config.interfaces.push(self.parse_interface()?);
                }
                Token::Ident(kw) if kw == "chain" => {
                    config.chains.push(self.parse_chain()?);
                }
                other => {
                    return Err(RouterError::ConfigInvalid(format!(
                        "expected \"interface\" or \"chain\", found {:?}",
                        other
                    )))
                }
            }
        }
        Ok(config)
    }

    fn parse_interface(&mut self) -> Result<InterfaceDef, RouterError> {
        self.advance()?; // "interface"
        let transport = self.expect_ident()?;
        let name = self.expect_ident()?;
        self.expect(&Token::LBrace)?;

        let mut device = None;
        let mut baud = None;
        let mut bind = None;
        let mut remote = None;
        let mut filter = None;
        let mut mirror = false;

        loop {
            match &self.lookahead {
                Token::RBrace => break,
                Token::Ident(kw) if kw == "device" => {
                    self.advance()?;
                    device = Some(self.expect_str()?);
                    self.expect(&Token::Semi)?;
                }
                Token::Ident(kw) if kw == "baud" => {
                    self.advance()?;
                    baud = Some(self.expect_num()? as u32);
                    self.expect(&Token::Semi)?;
                }
                Token::Ident(kw) if kw == "bind" => {
                    self.advance()?;
                    bind = Some(self.expect_endpoint()?);
                    self.expect(&Token::Semi)?;
                }
                Token::Ident(kw) if kw == "remote" => {
                    self.advance()?;
                    remote = Some(self.expect_endpoint()?);
                    self.expect(&Token::Semi)?;
                }
                Token::Ident(kw) if kw == "filter" => {
                    self.advance()?;
                    filter = Some(self.expect_ident()?);
                    self.expect(&Token::Semi)?;
                }
                Token::Ident(kw) if kw == "mirror" => {
                    self.advance()?;
                    mirror = true;
                    self.expect(&Token::Semi)?;
                }
                other => {
                    return Err(RouterError::ConfigInvalid(format!(
                        "unexpected token in interface block: {:?}",
                        other
                    )))
                }
            }
        }
        self.expect(&Token::RBrace)?;

        let kind = match transport.as_str() {
            "serial" => InterfaceKind::Serial {
                device: device.ok_or_else(|| {
                    RouterError::ConfigInvalid(format!("interface {:?}: missing \"device\"", name))
                })?,
                baud: baud.unwrap_or(57600),
            },
            "udp" => InterfaceKind::Udp {
                bind: bind.ok_or_else(|| {
                    RouterError::ConfigInvalid(format!("interface {:?}: missing \"bind\"", name))
                })?,
                remote,
            },
            other => {
                return Err(RouterError::ConfigInvalid(format!(
                    "unknown interface transport {:?}",
                    other
                )))
            }
        };

        Ok(InterfaceDef {
            name,
            kind,
            filter,
            mirror,
        })
    }

    fn parse_chain(&mut self) -> Result<Chain, RouterError> {
        self.advance()?; // "chain"
        let name = self.expect_ident()?;
        let default_action = match self.expect_ident()?.as_str() {
            "accept" => DefaultAction::Accept,
            "reject" => DefaultAction::Reject,
            other => {
                return Err(RouterError::ConfigInvalid(format!(
                    "chain {:?}: default action must be \"accept\" or \"reject\", found {:?}",
                    name, other
                )))
            }
        };
        self.expect(&Token::LBrace)?;
        let mut rules = Vec::new();
        while self.lookahead != Token::RBrace {
            rules.push(self.parse_rule()?);
        }
        self.expect(&Token::RBrace)?;
        Ok(Chain {
            name,
            default_action,
            rules,
        })
    }

    fn parse_rule(&mut self) -> Result<Rule, RouterError> {
        let action_kw = self.expect_ident()?;
        let action = match action_kw.as_str() {
            "accept" => {
                let priority = if matches!(&self.lookahead, Token::Ident(kw) if kw == "priority") {
                    self.advance()?;
                    let raw = self.expect_num()?;
                    let priority: i16 = i16::try_from(raw).map_err(|_| {
                        RouterError::ConfigInvalid(format!(
                            "priority ({}) is outside of the allowed range ({} - {})",
                            raw,
                            i16::MIN,
                            i16::MAX
                        ))
                    })?;
                    Some(priority)
                } else {
                    None
                };
                Action::Accept(priority)
            }
            "reject" => Action::Reject,
            "call" => Action::Call(self.expect_ident()?),
            "goto" => Action::Goto(self.expect_ident()?),
            other => {
                return Err(RouterError::ConfigInvalid(format!(
                    "unknown rule action {:?}",
                    other
                )))
            }
        };
        let mut conditions = Vec::new();
        loop {
            match &self.lookahead {
                Token::Semi => break,
                Token::Ident(kw) if kw == "from" => {
                    self.advance()?;
                    let subnet = self.expect_subnet()?;
                    conditions.push(Condition::From(subnet));
                }
                Token::Ident(kw) if kw == "to" => {
                    self.advance()?;
                    let subnet = self.expect_subnet()?;
                    conditions.push(Condition::To(subnet));
                }
                Token::Ident(kw) if kw == "type" => {
                    self.advance()?;
                    conditions.push(Condition::Type(self.expect_ident()?));
                }
                other => {
                    return Err(RouterError::ConfigInvalid(format!(
                        "unexpected token in rule: {:?}",
                        other
                    )))
                }
            }
        }
        self.expect(&Token::Semi)?;
        Ok(Rule { action, conditions })
    }

    fn expect_str(&mut self) -> Result<String, RouterError> {
        match self.advance()? {
            Token::Str(s) => Ok(s),
            other => Err(RouterError::ConfigInvalid(format!(
                "expected string literal, found {:?}",
                other
            ))),
        }
    }

    fn expect_num(&mut self) -> Result<i64, RouterError> {
        match self.advance()? {
            Token::Num(n) => Ok(n),
            other => Err(RouterError::ConfigInvalid(format!(
                "expected number, found {:?}",
                other
            ))),
        }
    }

    fn expect_subnet(&mut self) -> Result<MavSubnet, RouterError> {
        let ident = self.expect_ident()?;
        ident
            .parse()
            .map_err(|_| RouterError::ConfigInvalid(format!("invalid address/subnet {:?}", ident)))
    }

    fn expect_endpoint(&mut self) -> Result<IpEndpoint, RouterError> {
        let ident = self.expect_ident()?;
        ident
            .parse()
            .map_err(|_| RouterError::ConfigInvalid(format!("invalid endpoint {:?}", ident)))
    }
}

/// Parse a complete configuration file.
pub fn parse(src: &str) -> Result<ConfigFile, RouterError> {
    let mut parser = Parser::new(src)?;
    parser.parse_config()
}

impl fmt::Display for DefaultAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultAction::Accept => write!(f, "accept"),
            DefaultAction::Reject => write!(f, "reject"),
        }
    }
}

/// Render a parsed configuration back out as an indented tree, used by the
/// `--ast` CLI flag to help diagnose config files.
pub fn format_ast(config: &ConfigFile) -> String {
    let mut out = String::new();
    for iface in &config.interfaces {
        out.push_str(&format!("interface {:?}\n", iface.name));
        match &iface.kind {
            InterfaceKind::Serial { device, baud } => {
                out.push_str(&format!("  serial device={:?} baud={}\n", device, baud));
            }
            InterfaceKind::Udp { bind, remote } => {
                out.push_str(&format!("  udp bind={}\n", bind));
                if let Some(remote) = remote {
                    out.push_str(&format!("  udp remote={}\n", remote));
                }
            }
        }
        if let Some(filter) = &iface.filter {
            out.push_str(&format!("  filter={}\n", filter));
        }
        if iface.mirror {
            out.push_str("  mirror\n");
        }
    }
    for chain in &config.chains {
        out.push_str(&format!(
            "chain {} default={}\n",
            chain.name, chain.default_action
        ));
        for rule in &chain.rules {
            out.push_str(&format!("  {:?} {:?}\n", rule.action, rule.conditions));
        }
    }
    out
}
