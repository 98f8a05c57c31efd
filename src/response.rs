//! Classification of reply lines.
//!
//! Every line the module sends back maps to exactly one [`ResponseToken`].
//! Classification only looks at the text of the line, so the same line always
//! yields the same token and higher layers never parse raw text themselves.

use std::fmt;

/// Parsed reply from the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseToken {
    /// `ok`
    Ok,
    /// `busy`: the MAC is busy, command not executed.
    Busy,
    /// `denied`: join attempt rejected by the network.
    Denied,
    /// `accepted`: join attempt succeeded.
    Accepted,
    /// `no_free_ch`: all channels busy due to duty cycle.
    NoFreeChannel,
    /// `radio_err`: radio receive window expired or transmit failed.
    RadioError,
    /// `invalid_param`
    InvalidParam,
    /// `not_joined`
    NotJoined,
    /// `mac_tx_ok`: uplink done, no downlink received.
    MacTxOk,
    /// `mac_err`
    MacError,
    /// `radio_tx_ok`
    RadioTxOk,
    /// `mac_rx <port> <hex>`: downlink received after an uplink.
    MacRx { port: u8, payload: String },
    /// `radio_rx <hex>`: packet received in radio mode.
    RadioRx(String),
    /// Reply to `sys get ver`, e.g. `RN2483 1.0.3 Mar 22 2017 14:54:16`.
    VersionInfo(String),
    /// Bare value reply to a `get` command.
    Value(String),
    /// Anything else: empty lines, line noise, non-printable bytes.
    Unrecognized(String),
}

impl ResponseToken {
    /// Classify a line (terminator already stripped).
    pub fn classify(line: &str) -> ResponseToken {
        let text = line.trim();

        match text {
            "ok" => return ResponseToken::Ok,
            "busy" => return ResponseToken::Busy,
            "denied" => return ResponseToken::Denied,
            "accepted" => return ResponseToken::Accepted,
            "no_free_ch" => return ResponseToken::NoFreeChannel,
            "radio_err" => return ResponseToken::RadioError,
            "invalid_param" => return ResponseToken::InvalidParam,
            "not_joined" => return ResponseToken::NotJoined,
            "mac_tx_ok" => return ResponseToken::MacTxOk,
            "mac_err" => return ResponseToken::MacError,
            "radio_tx_ok" => return ResponseToken::RadioTxOk,
            _ => {}
        }

        if let Some(payload) = keyword_argument(text, "radio_rx") {
            if is_hex(payload) {
                return ResponseToken::RadioRx(payload.to_string());
            }
            return ResponseToken::Unrecognized(text.to_string());
        }

        if let Some(args) = keyword_argument(text, "mac_rx") {
            return Self::parse_mac_rx(args)
                .unwrap_or_else(|| ResponseToken::Unrecognized(text.to_string()));
        }

        if is_version_string(text) {
            return ResponseToken::VersionInfo(text.to_string());
        }

        if !text.is_empty() && text.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
            return ResponseToken::Value(text.to_string());
        }

        ResponseToken::Unrecognized(text.to_string())
    }

    fn parse_mac_rx(args: &str) -> Option<ResponseToken> {
        let mut fields = args.split_whitespace();
        let port: u8 = fields.next()?.parse().ok()?;
        let payload = fields.next().unwrap_or("");
        if fields.next().is_some() || !(payload.is_empty() || is_hex(payload)) {
            return None;
        }
        Some(ResponseToken::MacRx {
            port,
            payload: payload.to_string(),
        })
    }

    /// Check if this is a plain `ok`.
    pub fn is_ok(&self) -> bool {
        matches!(self, ResponseToken::Ok)
    }

    /// Tokens that end a join attempt without success.
    pub fn is_join_failure(&self) -> bool {
        matches!(self, ResponseToken::Denied | ResponseToken::NoFreeChannel)
    }

    /// Get the text if this is a `Value` response.
    pub fn as_value(&self) -> Option<&str> {
        match self {
            ResponseToken::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseToken::Ok => f.write_str("ok"),
            ResponseToken::Busy => f.write_str("busy"),
            ResponseToken::Denied => f.write_str("denied"),
            ResponseToken::Accepted => f.write_str("accepted"),
            ResponseToken::NoFreeChannel => f.write_str("no_free_ch"),
            ResponseToken::RadioError => f.write_str("radio_err"),
            ResponseToken::InvalidParam => f.write_str("invalid_param"),
            ResponseToken::NotJoined => f.write_str("not_joined"),
            ResponseToken::MacTxOk => f.write_str("mac_tx_ok"),
            ResponseToken::MacError => f.write_str("mac_err"),
            ResponseToken::RadioTxOk => f.write_str("radio_tx_ok"),
            ResponseToken::MacRx { port, payload } if payload.is_empty() => {
                write!(f, "mac_rx {}", port)
            }
            ResponseToken::MacRx { port, payload } => write!(f, "mac_rx {} {}", port, payload),
            ResponseToken::RadioRx(payload) => write!(f, "radio_rx {}", payload),
            ResponseToken::VersionInfo(text)
            | ResponseToken::Value(text)
            | ResponseToken::Unrecognized(text) => f.write_str(text),
        }
    }
}

// `keyword rest` with at least one space in between.
fn keyword_argument<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(keyword)?;
    if rest.starts_with(' ') {
        Some(rest.trim())
    } else {
        None
    }
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.len() % 2 == 0 && s.chars().all(|c| c.is_ascii_hexdigit())
}

// Model names look like `RN2483` / `RN2903` followed by the firmware version.
fn is_version_string(text: &str) -> bool {
    let model = text.split_whitespace().next().unwrap_or("");
    let digits = match model.strip_prefix("RN") {
        Some(d) => d,
        None => return false,
    };
    digits.len() == 4 && digits.chars().all(|c| c.is_ascii_digit()) && model.len() < text.len()
}
